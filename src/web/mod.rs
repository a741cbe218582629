//! Web server module.
//!
//! Intake surface for live-state updates and check results.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::events::Dispatcher;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub dispatcher: Dispatcher,
}

/// Intake web server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, dispatcher: Dispatcher) -> Self {
        Self {
            state: AppState {
                config,
                store,
                dispatcher,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Hooks
            .route("/api/hosts/{id}/livestate", post(handlers::handle_host_livestate))
            .route("/api/services/{id}/livestate", post(handlers::handle_service_livestate))
            .route("/api/checkresults", post(handlers::handle_checkresult))
            // Published entities
            .route("/api/hosts/{id}", get(handlers::handle_get_host))
            .route("/api/hosts/{id}/services", get(handlers::handle_get_host_services))
            .route("/api/services/{id}", get(handlers::handle_get_service))
            .route("/api/retention", get(handlers::handle_get_retention))
            .route("/status", get(handlers::handle_status))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    async fn serve(
        &self,
        listener: tokio::net::TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Web server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.routes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Sink;
    use crate::delivery::DeliveryEngine;
    use crate::sink::{PointBatch, SinkError, SinkKind, SinkTransport, Transports};
    use crate::state::OverallStateEngine;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct RefusingTransport;

    #[async_trait]
    impl SinkTransport for RefusingTransport {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn send(&self, _sink: &Sink, _batch: &PointBatch) -> Result<(), SinkError> {
            Err(SinkError::Rejected("read-only".to_string()))
        }
    }

    struct TestServer {
        _tmp: NamedTempFile,
        base: String,
        client: reqwest::Client,
        host: i64,
        service: i64,
        realm: i64,
    }

    async fn start() -> TestServer {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let realm = store.add_realm("All", None).unwrap();
        let host = store.add_host("srv001", realm).unwrap();
        let service = store.add_service("ping", host, realm).unwrap();
        let mut sink = Sink {
            id: 0,
            name: "graphite".to_string(),
            kind: SinkKind::Push,
            realm_id: realm,
            sub_realm: true,
            address: "localhost".to_string(),
            prefix: String::new(),
        };
        store.add_sink(&mut sink).unwrap();

        let transport = Arc::new(RefusingTransport);
        let delivery = DeliveryEngine::new(
            store.clone(),
            Transports::new(transport.clone(), transport),
            Duration::from_millis(200),
            4,
        );
        let dispatcher = Dispatcher::new(OverallStateEngine::new(store.clone()), delivery);
        let server = Server::new(ServerConfig::default(), store, dispatcher);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { server.serve(listener).await });

        TestServer {
            _tmp: tmp,
            base,
            client: reqwest::Client::new(),
            host,
            service,
            realm,
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .post(format!("{}{}", self.base, path))
                .json(&body)
                .send()
                .await
                .unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap_or(Value::Null))
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self
                .client
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap_or(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_livestate_updates() {
        let srv = start().await;

        let (status, host) = srv
            .post(
                &format!("/api/hosts/{}/livestate", srv.host),
                json!({"state": "UP", "state_type": "HARD"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(host["overall_state_id"], 3);

        let (status, service) = srv
            .post(
                &format!("/api/services/{}/livestate", srv.service),
                json!({"state": "OK", "state_type": "HARD"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(service["overall_state_id"], 0);
        assert_eq!(service["state"], "OK");

        let (status, host) = srv.get(&format!("/api/hosts/{}", srv.host)).await;
        assert_eq!(status, 200);
        assert_eq!(host["overall_state_id"], 0);
        assert_eq!(host["name"], "srv001");

        let (status, services) = srv.get(&format!("/api/hosts/{}/services", srv.host)).await;
        assert_eq!(status, 200);
        assert_eq!(services.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_livestate_errors() {
        let srv = start().await;

        let (status, body) = srv
            .post(&format!("/api/services/{}/livestate", srv.service), json!({"state": "OK"}))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["retryable"], false);

        let (status, _) = srv
            .post("/api/hosts/999/livestate", json!({"state": "UP", "state_type": "HARD"}))
            .await;
        assert_eq!(status, 404);

        let (status, _) = srv.get("/api/services/999").await;
        assert_eq!(status, 404);
        let (status, _) = srv.get("/api/hosts/999/services").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_checkresult_reports_retention() {
        let srv = start().await;

        let (status, report) = srv
            .post(
                "/api/checkresults",
                json!({
                    "host_name": "srv001",
                    "service_name": "ping",
                    "realm_id": srv.realm,
                    "perf_data": "rta=0.083000ms;10.000000;15.000000;0.000000 pl=0%;10;;",
                    "last_check": 1475668800
                }),
            )
            .await;
        assert_eq!(status, 202);
        assert_eq!(report["points"], 8);
        assert_eq!(report["attempted"], 1);
        assert_eq!(report["delivered"], 0);
        assert_eq!(report["retained"], 8);

        let (status, counts) = srv.get("/status").await;
        assert_eq!(status, 200);
        assert_eq!(counts["retention"], 8);
        assert_eq!(counts["hosts"], 1);
        assert_eq!(counts["sinks"], 1);

        let (status, retained) = srv.get("/api/retention").await;
        assert_eq!(status, 200);
        let retained = retained.as_array().cloned().unwrap_or_default();
        assert_eq!(retained.len(), 8);
        assert_eq!(retained[0]["name"], "rta");
        assert_eq!(retained[0]["value"], 0);
        assert_eq!(retained[0]["sink_kind"], "push");
        assert_eq!(retained[1]["name"], "rta_warning");
        assert_eq!(retained[1]["value"], 10);
    }
}
