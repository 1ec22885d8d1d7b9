//! Detects where a run executes and what it tests, for the run log and the
//! summary file.

use std::path::Path;

use pipeline::{RunContext, UNKNOWN};

/// Mounted into every pod that has a service account.
const KUBERNETES_SECRETS: &str = "/var/run/secrets/kubernetes.io";

/// Environment label, runner label and CI metadata for the summary file.
///
/// The environment label is `TEST_ENVIRONMENT` when set; otherwise
/// well-known markers of Kubernetes (service-account mount, then service host
/// variable), GitHub Actions, Azure Cloud Shell and Docker are checked, in
/// that order.
pub fn run_context() -> RunContext {
    run_context_with(&env_var, &path_exists)
}

/// Human-readable name of the machine kind behind an environment label.
pub fn runner_label(environment: &str) -> String {
    match environment {
        "kubernetes" => "Minikube/Kubernetes (Test Runner)".into(),
        "docker-container" => "Docker Container (Test Runner)".into(),
        "github-actions" => "GitHub Actions Runner".into(),
        "azure-cloud-shell" => "Azure Cloud Shell".into(),
        "minikube" => "Minikube (Test Runner)".into(),
        "local-machine" => "Local Machine".into(),
        other => format!("Unknown Environment ({other})"),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn path_exists(path: &str) -> bool {
    Path::new(path).exists()
}

fn detect_with(var: &dyn Fn(&str) -> Option<String>, exists: &dyn Fn(&str) -> bool) -> String {
    if let Some(explicit) = var("TEST_ENVIRONMENT").filter(|v| !v.is_empty()) {
        return explicit;
    }
    let label = if exists(KUBERNETES_SECRETS) || var("KUBERNETES_SERVICE_HOST").is_some() {
        "kubernetes"
    } else if var("GITHUB_ACTIONS").is_some() {
        "github-actions"
    } else if var("AZURE_HTTP_USER_AGENT").is_some() {
        "azure-cloud-shell"
    } else if exists("/.dockerenv") {
        "docker-container"
    } else {
        "local-machine"
    };
    label.to_string()
}

fn run_context_with(
    var: &dyn Fn(&str) -> Option<String>,
    exists: &dyn Fn(&str) -> bool,
) -> RunContext {
    let environment = detect_with(var, exists);
    let or_unknown = |key: &str| {
        var(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    RunContext {
        runner: runner_label(&environment),
        environment,
        git_commit: or_unknown("GITHUB_SHA"),
        git_branch: or_unknown("GITHUB_REF"),
        github_run_id: or_unknown("GITHUB_RUN_ID"),
        github_repository: or_unknown("GITHUB_REPOSITORY"),
    }
}
