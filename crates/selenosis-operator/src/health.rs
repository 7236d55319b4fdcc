//! Liveness and readiness probes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use selenosis_config::ConfigStore;

/// Probe routes: `/healthz` always answers, `/readyz` waits for the config
/// store's first full list.
pub fn router(store: Arc<ConfigStore>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(store)
}

async fn readyz(State(store): State<Arc<ConfigStore>>) -> (StatusCode, &'static str) {
    if store.is_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "config store not synced")
    }
}

/// Serve the probe endpoints until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    store: Arc<ConfigStore>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind health probe address {}: {}", addr, e))?;
    tracing::info!(%addr, "Health probe server listening");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("health probe server failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use kube::runtime::watcher::Event;
    use tower::ServiceExt;

    async fn status_of(store: Arc<ConfigStore>, path: &str) -> StatusCode {
        let response = router(store)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn liveness_answers_before_sync() {
        let store = Arc::new(ConfigStore::new());
        assert_eq!(status_of(store, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_waits_for_first_list() {
        let store = Arc::new(ConfigStore::new());
        assert_eq!(
            status_of(store.clone(), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        store.handle_event(Event::Init);
        store.handle_event(Event::InitDone);
        assert_eq!(status_of(store, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let store = Arc::new(ConfigStore::new());
        assert_eq!(status_of(store, "/metrics").await, StatusCode::NOT_FOUND);
    }
}
