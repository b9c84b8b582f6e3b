#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use pr_mailbot::agent::NotificationAgent;
use pr_mailbot::compose::EmailComposer;
use pr_mailbot::config::{self, Config};
use pr_mailbot::llm::{ChatMessage, ChatService};
use pr_mailbot::mailer::{build_message, MailError, MailTransport, OutgoingEmail};
use pr_mailbot::server::AppState;

pub const SECRET: &str = "YOUR_WEBHOOK_SECRET";

#[derive(Default)]
pub struct RecordingChat {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingChat {
    pub fn with_replies(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from(replies)),
            ..Default::default()
        })
    }

    pub async fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ChatService for RecordingChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().await.push(messages.to_vec());
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("model unavailable")))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    /// Poll until `n` mails were handed over or a second has passed.
    pub async fn wait_for(&self, n: usize) -> Vec<OutgoingEmail> {
        for _ in 0..50 {
            let sent = self.sent().await;
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sent().await
    }
}

#[async_trait::async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if self.fail {
            let broken = OutgoingEmail {
                to: "relay refused".into(),
                ..email.clone()
            };
            return match build_message(&broken) {
                Err(err) => Err(err),
                Ok(_) => panic!("expected an address error"),
            };
        }
        build_message(email)?;
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

pub fn example_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

pub fn agent(cfg: &Config, chat: Arc<RecordingChat>, mailer: Arc<RecordingMailer>) -> NotificationAgent {
    NotificationAgent::new(
        EmailComposer::new(chat, &cfg.project),
        mailer,
        cfg.smtp.sender().map(str::to_string),
        cfg.project.owner_email.clone(),
    )
}

pub fn state(cfg: Config, chat: Arc<RecordingChat>, mailer: Arc<RecordingMailer>) -> Arc<AppState> {
    let agent = agent(&cfg, chat, mailer);
    Arc::new(AppState::new(cfg, agent))
}

pub fn model_reply(subject: &str, body: &str) -> Result<String> {
    Ok(serde_json::json!({ "subject": subject, "body": body }).to_string())
}
