use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::compose::EmailComposer;
use crate::mailer::{MailError, MailTransport, OutgoingEmail};
use crate::model::{EmailContent, GeneratedEmail, PrNotification};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipient email configured")]
    NoRecipient,
    #[error("no sender address configured (set FROM_EMAIL or EMAIL_USERNAME)")]
    NoSender,
    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Result of the self-test workflow.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,
    pub email_content: EmailContent,
    pub timestamp: DateTime<Utc>,
}

/// Generates and sends PR notification mails to the project owner.
pub struct NotificationAgent {
    composer: EmailComposer,
    mailer: Arc<dyn MailTransport>,
    sender: Option<String>,
    owner_email: Option<String>,
}

impl NotificationAgent {
    pub fn new(
        composer: EmailComposer,
        mailer: Arc<dyn MailTransport>,
        sender: Option<String>,
        owner_email: Option<String>,
    ) -> Self {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            composer,
            mailer,
            sender: blank_to_none(sender),
            owner_email: blank_to_none(owner_email),
        }
    }

    /// Send an HTML mail; `to` defaults to the owner address.
    pub async fn send_email(
        &self,
        subject: &str,
        body: &str,
        to: Option<&str>,
    ) -> Result<(), NotifyError> {
        let recipient = to
            .filter(|t| !t.trim().is_empty())
            .or(self.owner_email.as_deref())
            .ok_or(NotifyError::NoRecipient)?;
        let from = self.sender.as_deref().ok_or(NotifyError::NoSender)?;
        let email = OutgoingEmail {
            from: from.to_string(),
            to: recipient.to_string(),
            subject: subject.to_string(),
            html_body: body.to_string(),
        };
        self.mailer.send(&email).await?;
        info!(to = recipient, "email sent successfully");
        Ok(())
    }

    /// Generate and send the notification for one PR. No retry: the caller
    /// only logs or reports a failure.
    #[instrument(skip_all, fields(pr = %pr.number_label()))]
    pub async fn process_pr_notification(
        &self,
        pr: &PrNotification,
    ) -> Result<GeneratedEmail, NotifyError> {
        info!(title = %pr.title, "processing PR notification");
        let generated = self.composer.generate(pr).await;
        match self
            .send_email(&generated.content.subject, &generated.content.body, None)
            .await
        {
            Ok(()) => {
                info!(source = generated.source.as_str(), "PR notification email sent");
                Ok(generated)
            }
            Err(err) => {
                error!(%err, "failed to send PR notification email");
                Err(err)
            }
        }
    }

    /// Run the full generate-and-send path against a fixed sample PR.
    #[instrument(skip_all)]
    pub async fn test_email_service(&self) -> TestReport {
        let generated = self.composer.generate(&sample_pr()).await;
        let subject = format!("[TEST] {}", generated.content.subject);
        let body = format!(
            "<p><strong>🧪 This is a test email</strong></p>{}",
            generated.content.body
        );

        let result = self.send_email(&subject, &body, None).await;
        if let Err(err) = &result {
            error!(%err, "test email failed");
        }
        TestReport {
            success: result.is_ok(),
            message: match result {
                Ok(()) => "Test email sent successfully".to_string(),
                Err(err) => format!("Failed to send test email: {}", err),
            },
            email_content: generated.content,
            timestamp: Utc::now(),
        }
    }
}

pub fn sample_pr() -> PrNotification {
    PrNotification {
        number: Some(42),
        title: "Add new feature for task analytics".into(),
        author: "TestDeveloper".into(),
        url: "https://github.com/example/repo/pull/42".into(),
        description: "This PR adds comprehensive analytics features for task management \
                      including completion rates, time tracking, and performance metrics."
            .into(),
        branch_from: "feature/task-analytics".into(),
        branch_to: "main".into(),
        files_changed: vec![
            "task_api.py".into(),
            "analytics.py".into(),
            "requirements.txt".into(),
        ],
        ..Default::default()
    }
}
