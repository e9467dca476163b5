//! Probe implementations for the four checker kinds
//!
//! Every probe returns `(healthy, message)` — transport failures and
//! timeouts are unhealthy outcomes, never errors.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

pub(crate) async fn http(client: &reqwest::Client, url: &str) -> (bool, String) {
    match client.get(url).send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            ((200..300).contains(&code), format!("HTTP {code} from {url}"))
        }
        Err(e) => (false, format!("HTTP probe to {url} failed: {e}")),
    }
}

pub(crate) async fn tcp(address: &str, timeout: Duration) -> (bool, String) {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
        Ok(Ok(_)) => (true, format!("TCP dial to {address} succeeded")),
        Ok(Err(e)) => (false, format!("TCP dial to {address} failed: {e}")),
        Err(_) => (false, format!("TCP dial to {address} timed out")),
    }
}

/// Containers with a native healthcheck report through it; containers
/// without one count as healthy while the engine says they are running.
pub(crate) async fn container(engine: &Arc<dyn Engine>, container_id: &str) -> (bool, String) {
    match engine.inspect(container_id).await {
        Ok(details) => match details.health_status {
            Some(status) if status.eq_ignore_ascii_case("healthy") => {
                (true, "container reports healthy".to_string())
            }
            Some(status) => (false, format!("container health is {status}")),
            None => (
                details.state == "running",
                format!("no healthcheck, container state is {}", details.state),
            ),
        },
        Err(e) => (false, format!("inspect of {container_id} failed: {e}")),
    }
}

pub(crate) async fn command(
    engine: &Arc<dyn Engine>,
    container_id: &str,
    argv: &[String],
    timeout: Duration,
) -> (bool, String) {
    match engine.exec(container_id, argv, timeout).await {
        Ok(output) if output.success() => (true, "command exited 0".to_string()),
        Ok(output) => {
            let detail = output.stderr.lines().next().unwrap_or("").to_string();
            (
                false,
                format!("command exited {}: {detail}", output.exit_code),
            )
        }
        Err(e) => (false, format!("exec in {container_id} failed: {e}")),
    }
}
