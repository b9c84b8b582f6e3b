//! GitHub webhook verification and pull-request extraction.
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{PrNotification, NO_DESCRIPTION};

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no signature header provided")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Checks `X-Hub-Signature-256` against the shared webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            warn!("GITHUB_WEBHOOK_SECRET not set - webhook signature verification disabled");
        }
        Self { secret }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("webhook secret not configured; skipping signature verification");
            return Ok(());
        };
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::Missing)?;
        let (algorithm, digest) = header.split_once('=').ok_or(SignatureError::Malformed)?;
        if algorithm != "sha256" {
            return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let expected = hex::decode(digest).map_err(|_| SignatureError::Malformed)?;

        let mut mac = new_mac(secret);
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

fn new_mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length.
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}

/// `sha256=<hex>` signature GitHub would send for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub repository: Option<Repository>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullRequest {
    pub title: Option<String>,
    pub number: Option<u64>,
    pub user: Option<Account>,
    pub html_url: Option<String>,
    pub body: Option<String>,
    pub head: Option<GitRef>,
    pub base: Option<GitRef>,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: Option<String>,
    pub html_url: Option<String>,
}

/// What the receiver should do with a verified delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDispatch {
    Notify(PrNotification),
    Ignored(String),
    Pong,
}

/// Only newly opened or reopened pull requests warrant a mail.
pub fn extract_notification(event: &PullRequestEvent) -> Option<PrNotification> {
    let action = event.action.as_deref().unwrap_or_default();
    if !matches!(action, "opened" | "reopened") {
        info!(action, "ignoring PR action");
        return None;
    }

    let empty = PullRequest::default();
    let pr = event.pull_request.as_ref().unwrap_or(&empty);
    let ref_of = |r: &Option<GitRef>| r.as_ref().and_then(|g| g.ref_name.clone());

    let notification = PrNotification {
        number: pr.number,
        title: pr.title.clone().unwrap_or_else(|| "Untitled PR".into()),
        author: pr
            .user
            .as_ref()
            .and_then(|u| u.login.clone())
            .unwrap_or_else(|| "Unknown".into()),
        url: pr.html_url.clone().unwrap_or_default(),
        description: pr
            .body
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| NO_DESCRIPTION.into()),
        branch_from: ref_of(&pr.head).unwrap_or_else(|| "unknown-branch".into()),
        branch_to: ref_of(&pr.base).unwrap_or_else(|| "main".into()),
        files_changed: Vec::new(),
        repository_name: Some(
            event
                .repository
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| "Unknown Repository".into()),
        ),
        repository_url: event.repository.as_ref().and_then(|r| r.html_url.clone()),
        action: Some(action.to_string()),
    };
    info!(
        pr = %notification.number_label(),
        title = %notification.title,
        "extracted PR data"
    );
    Some(notification)
}

/// Route a verified delivery by its `X-GitHub-Event` type.
pub fn dispatch(event_type: &str, body: &[u8]) -> Result<WebhookDispatch, WebhookError> {
    let payload: serde_json::Value = serde_json::from_slice(body)?;
    match event_type {
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_value(payload)?;
            Ok(match extract_notification(&event) {
                Some(pr) => WebhookDispatch::Notify(pr),
                None => WebhookDispatch::Ignored("PR event not relevant for notification".into()),
            })
        }
        "ping" => Ok(WebhookDispatch::Pong),
        other => {
            info!(event = other, "ignoring webhook event type");
            Ok(WebhookDispatch::Ignored(format!(
                "Event type {} not handled",
                other
            )))
        }
    }
}
