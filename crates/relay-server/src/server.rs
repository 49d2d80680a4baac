use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use relay_core::{ClientConfig, EventPayload, RequestId, TransmissionError};
use relay_settings::RelaySettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Instrument};

use crate::relay::{InboundEvent, Relay, TrackOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bind failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbound client: {0}")]
    Client(#[from] TransmissionError),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub client_config: Arc<ClientConfig>,
}

impl AppState {
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, TransmissionError> {
        let relay = Relay::new(
            settings.tracking.clone(),
            Duration::from_millis(settings.server.outbound_timeout_ms),
        )?;
        Ok(Self {
            relay: Arc::new(relay),
            client_config: Arc::new(settings.client_config()),
        })
    }
}

/// Build the Axum router. Relay routes live under `/<namespace>/v1`.
pub fn build_router(state: AppState, namespace: &str) -> Router {
    let base = format!("/{}/v1", namespace.trim_matches('/'));
    Router::new()
        .route(&format!("{base}/track"), post(track_handler))
        .route(&format!("{base}/config"), get(config_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve. Returns a handle to shut the server down.
pub async fn start(settings: &RelaySettings) -> Result<ServerHandle, ServerError> {
    let state = AppState::from_settings(settings)?;
    let router = build_router(state, &settings.server.namespace);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        namespace = %settings.server.namespace,
        active = settings.tracking.active,
        "relay server started"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        server,
    })
}

/// Handle returned by `start()`; dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.server.await;
    }
}

async fn track_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<EventPayload>,
) -> Response {
    let request_id = RequestId::new();
    let span = info_span!(
        "relay",
        request_id = %request_id,
        event_name = payload.event_name().unwrap_or("")
    );

    let event = InboundEvent {
        payload,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    let (jar, outcome) = state.relay.track(event, jar).instrument(span).await;

    match outcome {
        TrackOutcome::Inactive => (StatusCode::OK, Json(false)).into_response(),
        // Forwarding failures stay invisible to the page.
        TrackOutcome::Forwarded { .. } | TrackOutcome::Failed { .. } => {
            (StatusCode::NO_CONTENT, jar).into_response()
        }
    }
}

async fn config_handler(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(state.client_config.as_ref().clone())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active": state.relay.is_active(),
    }))
}
