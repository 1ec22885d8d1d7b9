//! HTTP probe adapter.
//!
//! Implements the [`pipeline::HttpProbe`] trait over `reqwest`. Any HTTP
//! status is a completed call; only transport failures (connect, DNS,
//! timeout) become [`pipeline::ExecutionError`]s.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** TLS, connection pooling, request building and error
//! classification live here. The `runner` crate sees only
//! [`pipeline::HttpProbe`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use pipeline::{ExecutionError, HttpMethod, HttpProbe, ProbeRequest, ProbeResponse};

const USER_AGENT: &str = concat!("resultbus/", env!("CARGO_PKG_VERSION"));

/// [`HttpProbe`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new() -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExecutionError::Request {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Uses an externally configured client (proxies, custom roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn method(m: HttpMethod) -> Method {
    match m {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> ExecutionError {
    if error.is_timeout() {
        ExecutionError::Timeout { after: timeout }
    } else if error.is_connect() {
        ExecutionError::Connect {
            message: error.to_string(),
        }
    } else {
        ExecutionError::Request {
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ExecutionError> {
        debug!(method = %request.method, url = %request.url, "Sending probe request");

        let mut builder = self
            .client
            .request(method(request.method), request.url.clone())
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&e, request.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(&e, request.timeout))?
            .to_vec();

        Ok(ProbeResponse { status, body })
    }
}
