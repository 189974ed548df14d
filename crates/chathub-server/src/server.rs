//! `ChatServer`: Axum HTTP + WebSocket front end for a [`Hub`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chathub_core::ClientId;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::Client;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::transport::WsConnection;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub every upgraded socket joins.
    pub hub: Arc<Hub>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// When the server was created.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP server exposing `/ws`, `/health` and `/metrics`.
pub struct ChatServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ChatServer {
    /// Create a server in front of `hub`.
    pub fn new(config: ServerConfig, hub: Arc<Hub>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until the hub shuts down.
    ///
    /// Returns the bound address (useful with port `0`) and the serving task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let stop = self.hub.shutdown_token();
        info!(%addr, "chat server listening");

        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                error!(error = %err, "server terminated with error");
            }
            info!("chat server stopped");
        });
        Ok((addr, handle))
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn reject(reason: &'static str, body: &'static str) -> Response {
    counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
    warn!(reason, "websocket connection rejected");
    (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.hub.is_shutting_down() {
        return reject("shutting_down", "hub is shutting down");
    }
    if state.hub.client_count() >= state.config.max_connections {
        return reject("capacity", "too many connections");
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let id = ClientId::new(format!("client_{}", Uuid::now_v7().simple()));
    let max = state.hub.config().max_message_size;
    upgrade
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| async move {
            let client = Client::new(id, WsConnection::new(socket), state.hub);
            let _ = client.run().await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.stats(),
        state.hub.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server(max_connections: usize) -> ChatServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections,
        };
        ChatServer::new(config, Arc::new(Hub::new(HubConfig::default())))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(10);
        let resp = server.router().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["shutting_down"], false);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server(10);
        server.hub().shutdown().await;
        let resp = server.router().oneshot(get_req("/health")).await.unwrap();
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn ws_rejected_while_shutting_down() {
        let server = make_server(10);
        server.hub().shutdown().await;
        let resp = server.router().oneshot(get_req("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ws_rejected_at_capacity() {
        let server = make_server(0);
        let resp = server.router().oneshot(get_req("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_client_error() {
        let server = make_server(10);
        let resp = server.router().oneshot(get_req("/ws")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn metrics_not_found_without_recorder() {
        let server = make_server(10);
        let resp = server.router().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_served_with_recorder() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server(10).with_metrics(handle);
        let resp = server.router().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(10);
        let resp = server.router().oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_stops_on_hub_shutdown() {
        let server = make_server(10);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.hub().shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
