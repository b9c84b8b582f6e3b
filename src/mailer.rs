//! SMTP delivery of rendered notification mails.
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::Smtp;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.trim().parse().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}

pub fn build_message(email: &OutgoingEmail) -> Result<Message, MailError> {
    Ok(Message::builder()
        .from(mailbox(&email.from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html_body.clone())?)
}

/// STARTTLS submission to the configured relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    relay: String,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn from_settings(smtp: &Smtp) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
            .port(smtp.port)
            .timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (smtp.username.as_deref(), smtp.password.as_deref()) {
            if !user.trim().is_empty() && !pass.is_empty() {
                builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
            }
        }
        Ok(Self {
            transport: builder.build(),
            relay: format!("{}:{}", smtp.host, smtp.port),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    #[instrument(skip_all, fields(relay = %self.relay, to = %email.to))]
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        let response = self.transport.send(message).await?;
        info!(code = %response.code(), "email accepted by relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "bot@example.com".into(),
            to: "Owner <owner@example.com>".into(),
            subject: "🔔 New PR #42: Analytics".into(),
            html_body: "<p>Please review</p>".into(),
        }
    }

    #[test]
    fn builds_html_message() {
        let message = build_message(&email()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: bot@example.com"));
        assert!(raw.contains("To: Owner <owner@example.com>"));
        assert!(raw.contains("Content-Type: text/html; charset=utf-8"));
        assert!(raw.contains("<p>Please review</p>"));
        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 1);
        assert_eq!(envelope.to()[0].to_string(), "owner@example.com");
    }

    #[test]
    fn rejects_bad_addresses() {
        let mut bad = email();
        bad.to = "not an address".into();
        match build_message(&bad) {
            Err(MailError::Address { address, .. }) => assert_eq!(address, "not an address"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn mailer_builds_from_settings() {
        let smtp = Smtp {
            username: Some("bot@example.com".into()),
            password: Some("app-password".into()),
            ..Smtp::default()
        };
        let mailer = SmtpMailer::from_settings(&smtp).unwrap();
        assert_eq!(mailer.relay, "smtp.gmail.com:587");
    }
}
