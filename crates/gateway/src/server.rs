use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        response::IntoResponse,
        routing::{get, post},
    },
    parley_auto_reply::{HandlingResult, OutcomeKind, SessionDispatcher},
    parley_config::ParleyConfig,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use crate::services::GatewayServices;

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<SessionDispatcher>,
    pub version: String,
}

impl AppState {
    pub fn new(dispatcher: Arc<SessionDispatcher>) -> Self {
        Self {
            dispatcher,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router: the event webhook at `webhook_path` plus `/health`.
pub fn build_gateway_app(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(webhook_path, post(webhook_handler))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn start_gateway(config: ParleyConfig) -> anyhow::Result<()> {
    let services = GatewayServices::from_config(&config)?;
    let state = AppState::new(services.dispatcher);
    let app = build_gateway_app(state, &config.server.webhook_path);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        webhook = %config.server.webhook_path,
        version = env!("CARGO_PKG_VERSION"),
        "parley gateway listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("parley gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
    }))
}

/// Subscription handshake sent once when the webhook is registered.
#[derive(Deserialize)]
struct UrlVerification {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// Always answers 200 so the platform does not redeliver an event whose
/// handling failed. Admission runs inline; an admitted event is finished on
/// its own task so a dropped connection cannot cancel it half way.
async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if let Ok(handshake) = serde_json::from_slice::<UrlVerification>(&body)
        && handshake.kind == "url_verification"
    {
        debug!("answering url verification");
        return Json(serde_json::json!({ "challenge": handshake.challenge }));
    }

    let result = match state.dispatcher.accept(&body) {
        Ok(event) => {
            let dispatcher = Arc::clone(&state.dispatcher);
            tokio::spawn(async move {
                dispatcher.process_admitted(event).await;
            });
            HandlingResult {
                admitted: true,
                outcome: OutcomeKind::Accepted,
            }
        },
        Err(result) => result,
    };
    Json(result_body(&result))
}

fn result_body(result: &HandlingResult) -> serde_json::Value {
    let mut body = serde_json::json!({
        "admitted": result.admitted,
        "outcome": result.outcome.as_str(),
    });
    if let OutcomeKind::Ignored(reason) = result.outcome {
        body["reason"] = reason.as_str().into();
    }
    body
}
