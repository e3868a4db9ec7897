use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::agent::RestartFlag;

/// Shared state of Worker B. The restart flag is the single mutable shared
/// with the collection loop; it is only ever set, never cleared.
#[derive(Clone)]
struct ListenerState {
    flag: Arc<RestartFlag>,
    hostname: String,
}

pub fn router(flag: Arc<RestartFlag>, hostname: String) -> Router {
    let state = ListenerState { flag, hostname };
    Router::new()
        .route("/status", get(handler_status).fallback(handler_not_found))
        .route("/restart", post(handler_restart).fallback(handler_not_found))
        .fallback(handler_not_found)
        .with_state(state)
}

/// Serves the control endpoints on loopback until `shutdown` fires.
/// The main driver owns the shutdown sequence: loop first, listener second.
pub async fn serve(
    port: u16,
    flag: Arc<RestartFlag>,
    mut shutdown: watch::Receiver<()>,
) -> std::io::Result<()> {
    let app = router(flag, hostname());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("control listener on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Canonical name for the `/status` payload. Most systems hand out the bare
/// label, so a reverse lookup of a local address upgrades it to an FQDN
/// where DNS knows one.
pub fn hostname() -> String {
    let short = sysinfo::System::host_name().unwrap_or_else(|| "unknown".into());
    if short.contains('.') {
        return short;
    }
    let resolved = local_addresses()
        .into_iter()
        .filter_map(|addr| dns_lookup::lookup_addr(&addr).ok());
    pick_fqdn(&short, resolved)
}

fn local_addresses() -> Vec<std::net::IpAddr> {
    let networks = sysinfo::Networks::new_with_refreshed_list();
    let mut addrs = Vec::new();
    for (_, data) in &networks {
        for ip in data.ip_networks() {
            if !ip.addr.is_loopback() && !ip.addr.is_unspecified() {
                addrs.push(ip.addr);
            }
        }
    }
    addrs
}

/// First fully qualified candidate wins; the short name is the fallback.
fn pick_fqdn(short: &str, candidates: impl IntoIterator<Item = String>) -> String {
    candidates
        .into_iter()
        .find(|name| name.contains('.') && !name.starts_with("localhost"))
        .unwrap_or_else(|| short.to_string())
}

async fn handler_status(State(state): State<ListenerState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "active", "hostname": state.hostname })),
    )
}

/// Acknowledges first, restarts second: the flag is raised after building
/// the response, and the loop only observes it at its next wait boundary,
/// so the caller always receives the 200.
async fn handler_restart(State(state): State<ListenerState>) -> (StatusCode, Json<Value>) {
    info!("restart requested through the control listener");
    state.flag.raise();
    (StatusCode::OK, Json(json!({ "status": "restarting" })))
}

async fn handler_not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(flag: &Arc<RestartFlag>) -> Router {
        router(Arc::clone(flag), "host-42.example.cl".into())
    }

    #[tokio::test]
    async fn status_reports_active_and_hostname() {
        let flag = Arc::new(RestartFlag::new());
        let response = app(&flag)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "active");
        assert_eq!(body["hostname"], "host-42.example.cl");
        assert!(!flag.is_raised());
    }

    #[tokio::test]
    async fn restart_acknowledges_and_raises_the_flag() {
        let flag = Arc::new(RestartFlag::new());
        let response = app(&flag)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/restart")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "restarting");
        assert!(flag.is_raised());
    }

    #[test]
    fn fqdn_candidates_beat_the_short_name() {
        let picked = pick_fqdn(
            "host-42",
            vec!["localhost.localdomain".to_string(), "host-42.example.cl".to_string()],
        );
        assert_eq!(picked, "host-42.example.cl");
    }

    #[test]
    fn short_name_survives_when_dns_has_nothing_qualified() {
        assert_eq!(pick_fqdn("host-42", Vec::new()), "host-42");
        assert_eq!(pick_fqdn("host-42", vec!["host-43".to_string()]), "host-42");
    }

    #[tokio::test]
    async fn unknown_paths_and_methods_get_404_json() {
        let flag = Arc::new(RestartFlag::new());

        let response = app(&flag)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not found");

        // GET on the restart route is not a restart.
        let response = app(&flag)
            .oneshot(Request::builder().uri("/restart").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!flag.is_raised());
    }
}
