use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    alertmanager_status, cluster_status, health_check, list_notifiers, stats, test_notification,
    AppState,
};

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Tenant alertmanager lifecycle
        .route(
            "/api/alertmanager/:org_id/status",
            get(alertmanager_status),
        )
        .route(
            "/api/alertmanager/:org_id/test",
            post(test_notification),
        )
        // Channel catalog
        .route("/api/notifiers", get(list_notifiers))
        // Cluster
        .route("/api/cluster/status", get(cluster_status))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until `shutdown` resolves.
pub async fn run_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    tracing::info!("Starting Klaxon server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Klaxon server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use crate::bus::InMemoryBus;
    use crate::cluster::NilPeer;
    use crate::metrics::Metrics;
    use crate::notify::{ChannelRegistry, Dispatcher};
    use crate::tenant::{
        FileStore, InMemoryConfigStore, InMemoryKvStore, InMemoryOrgStore, MultiOrgAlertmanager,
    };

    fn create_test_app(orgs: Vec<i64>) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus: Arc<dyn crate::bus::DispatchBus> = Arc::new(InMemoryBus::new());
        let metrics = Arc::new(Metrics::new());
        let supervisor = Arc::new(MultiOrgAlertmanager::new(
            Arc::new(InMemoryOrgStore::new(orgs)),
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(FileStore::new(dir.path())),
            Arc::new(InMemoryKvStore::new()),
            Arc::new(NilPeer),
            metrics.clone(),
        ));
        supervisor.load_and_sync_alertmanagers().unwrap();

        let state = Arc::new(AppState {
            supervisor,
            dispatcher: Arc::new(Dispatcher::new(bus.clone(), metrics.clone())),
            registry: Arc::new(ChannelRegistry::with_defaults()),
            bus,
            metrics,
        });
        (build_router(state), dir)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _dir) = create_test_app(vec![]);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_for_known_and_unknown_org() {
        let (app, _dir) = create_test_app(vec![1]);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/alertmanager/1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/api/alertmanager/42/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_test_notification_rejects_empty_request() {
        let (app, _dir) = create_test_app(vec![1]);
        let response = app
            .oneshot(
                Request::post("/api/alertmanager/1/test")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notifier_catalog_listed() {
        let (app, _dir) = create_test_app(vec![]);
        let response = app
            .oneshot(Request::get("/api/notifiers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
