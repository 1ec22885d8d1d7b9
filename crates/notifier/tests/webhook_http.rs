//! `WebhookNotifier` against a local HTTP endpoint.

use std::sync::{Arc, Mutex};

use notifier::WebhookNotifier;
use pipeline::{
    AlertLevel, FailureDetail, Notification, NotificationSummary, Notifier, NotifyError, RunId,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serves one canned response and records the raw request it answered.
async fn one_shot_server(response: &'static str) -> (String, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        *sink.lock().unwrap() = Some(request);
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });
    (format!("http://{addr}/services/T0/B0/secret"), captured)
}

/// Reads the request head plus `content-length` bytes of body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn notification() -> Notification {
    Notification {
        dedup_key: "r1:orders".into(),
        summary: NotificationSummary {
            run_id: RunId::new("r1").unwrap(),
            failed_count: 1,
            total_count: 4,
            failures: vec![FailureDetail {
                test_name: "orders".into(),
                reason: "Expected 200, got 500".into(),
            }],
            alert_level: AlertLevel::Warning,
        },
    }
}

#[tokio::test]
async fn accepted_notification_posts_rendered_json() {
    let (url, captured) =
        one_shot_server("HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
            .await;

    WebhookNotifier::new(&url)
        .unwrap()
        .notify(&notification())
        .await
        .unwrap();

    let request = captured.lock().unwrap().clone().unwrap();
    assert!(request.starts_with("POST /services/T0/B0/secret HTTP/1.1\r\n"));
    assert!(request
        .to_ascii_lowercase()
        .contains("content-type: application/json"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["text"], "API Test Results: PARTIAL SUCCESS (run r1)");
    assert_eq!(json["attachments"][0]["footer"], "dedup-key: r1:orders");
    assert_eq!(
        json["attachments"][0]["fields"][1]["value"],
        "• orders: Expected 200, got 500"
    );
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let (url, _) = one_shot_server(
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\noops",
    )
    .await;

    let err = WebhookNotifier::new(&url)
        .unwrap()
        .notify(&notification())
        .await
        .unwrap_err();

    match err {
        NotifyError::Unavailable { message } => assert!(message.contains("oops")),
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn client_error_is_rejected() {
    let (url, _) = one_shot_server(
        "HTTP/1.1 404 Not Found\r\ncontent-length: 10\r\nconnection: close\r\n\r\nno_service",
    )
    .await;

    let err = WebhookNotifier::new(&url)
        .unwrap()
        .notify(&notification())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NotifyError::Rejected {
            status: 404,
            message: "no_service".into()
        }
    );
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = WebhookNotifier::new(&format!("http://127.0.0.1:{port}/hook"))
        .unwrap()
        .notify(&notification())
        .await
        .unwrap_err();

    assert!(matches!(err, NotifyError::Unavailable { .. }));
}
