//! HTTP API: the GitHub webhook receiver plus the `/ai-email/*` endpoints.
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::agent::{NotificationAgent, TestReport};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::github::{self, SignatureVerifier, WebhookDispatch, EVENT_HEADER, SIGNATURE_HEADER};
use crate::model::PrNotification;

pub struct AppState {
    pub config: Config,
    pub agent: Arc<NotificationAgent>,
    pub verifier: SignatureVerifier,
}

impl AppState {
    pub fn new(config: Config, agent: NotificationAgent) -> Self {
        let verifier = SignatureVerifier::new(config.github.webhook_secret.clone());
        Self {
            config,
            agent: Arc::new(agent),
            verifier,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhooks/github", post(github_webhook))
        .route("/ai-email/test", post(test_email_service))
        .route("/ai-email/status", get(email_status))
        .route("/ai-email/send-pr-notification", post(send_pr_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "serving HTTP API");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "PR mail bot API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "status": "/ai-email/status",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let event_type = header_str(&headers, EVENT_HEADER).unwrap_or_default();
    info!(event = event_type, "received GitHub webhook");

    state
        .verifier
        .verify(&body, header_str(&headers, SIGNATURE_HEADER))?;

    let response = match github::dispatch(event_type, &body)? {
        WebhookDispatch::Notify(pr) => {
            let id = Uuid::new_v4();
            let response = json!({
                "status": "success",
                "message": "PR notification queued for processing",
                "pr_number": pr.number,
                "pr_title": pr.title,
                "notification_id": id,
                "timestamp": Utc::now(),
            });
            spawn_notification(Arc::clone(&state.agent), pr, id);
            response
        }
        WebhookDispatch::Ignored(message) => json!({
            "status": "ignored",
            "message": message,
            "timestamp": Utc::now(),
        }),
        WebhookDispatch::Pong => json!({
            "status": "success",
            "message": "Webhook endpoint is working",
            "timestamp": Utc::now(),
        }),
    };
    Ok(Json(response))
}

fn spawn_notification(agent: Arc<NotificationAgent>, pr: PrNotification, id: Uuid) {
    let span = info_span!("notification", %id);
    tokio::spawn(
        async move {
            match agent.process_pr_notification(&pr).await {
                Ok(email) => info!(source = email.source.as_str(), "background PR notification sent"),
                Err(err) => error!(%err, "background PR notification failed"),
            }
        }
        .instrument(span),
    );
}

async fn test_email_service(State(state): State<Arc<AppState>>) -> Json<TestReport> {
    info!("testing AI email service");
    Json(state.agent.test_email_service().await)
}

async fn email_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let readiness = state.config.readiness();
    let status = if readiness.is_operational() {
        "operational"
    } else {
        "configuration_incomplete"
    };
    Json(json!({
        "status": status,
        "configuration": readiness,
        "timestamp": Utc::now(),
    }))
}

async fn send_pr_notification(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PrNotification>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(pr) = payload?;
    info!(pr = %pr.number_label(), "manual PR notification requested");
    if let Err(err) = state.agent.process_pr_notification(&pr).await {
        error!(%err, "manual PR notification failed");
        return Err(AppError::Delivery(
            "Failed to send PR notification email".into(),
        ));
    }
    Ok(Json(json!({
        "status": "success",
        "message": "PR notification email sent successfully",
        "timestamp": Utc::now(),
    })))
}
