//! Drafting notification mails with the chat model, falling back to a
//! static HTML template whenever the model cannot be used.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Project;
use crate::llm::{ChatMessage, ChatService};
use crate::model::{ContentSource, EmailContent, GeneratedEmail, PrNotification};

const SYSTEM_PROMPT: &str = "You are an AI assistant specialized in generating professional \
technical email notifications for software development projects. Always respond with valid \
JSON containing 'subject' and 'body' keys.";

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("model reply is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("model reply missing required key: {0}")]
    MissingKey(&'static str),
}

pub struct EmailComposer {
    chat: Arc<dyn ChatService>,
    project_name: String,
    project_owner: String,
}

impl EmailComposer {
    pub fn new(chat: Arc<dyn ChatService>, project: &Project) -> Self {
        Self {
            chat,
            project_name: project.name.clone(),
            project_owner: project.owner.clone(),
        }
    }

    pub fn build_prompt(&self, pr: &PrNotification) -> String {
        format!(
            "Generate a professional and informative email notification for a new pull request in the {project} project.

PR Details:
- Title: {title}
- PR Number: #{number}
- Author: {author}
- From Branch: {from}
- To Branch: {to}
- Description: {description}
- Files Changed: {files}
- PR URL: {url}

Requirements:
1. Create a compelling subject line (max 80 characters)
2. Generate a professional email body that includes:
   - Greeting to the project owner
   - Summary of the PR
   - Key changes or features
   - Call to action for review
   - Professional closing
3. Use a professional but friendly tone
4. Include relevant technical details
5. Format as HTML for better presentation

Return the response in JSON format with 'subject' and 'body' keys.",
            project = self.project_name,
            title = pr.title,
            number = pr.number_text(),
            author = pr.author,
            from = pr.branch_from,
            to = pr.branch_to,
            description = pr.description,
            files = pr.files_label(),
            url = pr.url,
        )
    }

    /// Draft the mail for `pr`. Never fails: any model problem yields the
    /// fallback template.
    #[instrument(skip_all, fields(pr = %pr.number_label()))]
    pub async fn generate(&self, pr: &PrNotification) -> GeneratedEmail {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.build_prompt(pr)),
        ];
        let content = match self.chat.complete(&messages).await {
            Ok(reply) => match parse_reply(&reply) {
                Ok(content) => {
                    info!("generated AI email content");
                    return GeneratedEmail {
                        content,
                        source: ContentSource::Model,
                    };
                }
                Err(err) => {
                    warn!(%err, "failed to parse AI response; using fallback");
                    self.fallback(pr, Utc::now())
                }
            },
            Err(err) => {
                error!(?err, "error generating AI email content; using fallback");
                self.fallback(pr, Utc::now())
            }
        };
        GeneratedEmail {
            content,
            source: ContentSource::Fallback,
        }
    }

    pub fn fallback(&self, pr: &PrNotification, now: DateTime<Utc>) -> EmailContent {
        let subject = format!("🔔 New PR #{}: {}", pr.number_text(), pr.title);
        let body = format!(
            r#"<html>
<body>
    <h2>🚀 New Pull Request Notification</h2>

    <p>Hello {owner},</p>

    <p>A new pull request has been created for the <strong>{project}</strong> project:</p>

    <div style="background: #f8f9fa; padding: 15px; border-radius: 8px; margin: 15px 0;">
        <h3>📋 PR Details</h3>
        <ul>
            <li><strong>Title:</strong> {title}</li>
            <li><strong>PR Number:</strong> #{number}</li>
            <li><strong>Author:</strong> {author}</li>
            <li><strong>From:</strong> {from}</li>
            <li><strong>To:</strong> {to}</li>
        </ul>
    </div>

    <p><strong>Description:</strong><br>
    {description}</p>

    <p style="text-align: center; margin: 20px 0;">
        <a href="{url}" style="background: #1f77b4; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px;">
            👀 Review Pull Request
        </a>
    </p>

    <p>Please review this pull request at your earliest convenience.</p>

    <p>Best regards,<br>
    AI Agent - {project}</p>

    <hr>
    <p style="font-size: 12px; color: #666;">
        This email was automatically generated by the AI Email Agent.
        Generated at: {generated} UTC
    </p>
</body>
</html>
"#,
            owner = escape_html(&self.project_owner),
            project = escape_html(&self.project_name),
            title = escape_html(&pr.title),
            number = pr.number_text(),
            author = escape_html(&pr.author),
            from = escape_html(&pr.branch_from),
            to = escape_html(&pr.branch_to),
            description = escape_html(&pr.description),
            url = escape_html(&pr.url),
            generated = now.format("%Y-%m-%d %H:%M:%S"),
        );
        EmailContent { subject, body }
    }
}

/// Accepts bare JSON or JSON inside a Markdown code fence.
pub fn parse_reply(reply: &str) -> Result<EmailContent, ComposeError> {
    let json = FENCED_JSON
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| reply.trim());
    let value: serde_json::Value = serde_json::from_str(json)?;
    let field = |key: &'static str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(ComposeError::MissingKey(key))
    };
    Ok(EmailContent {
        subject: field("subject")?,
        body: field("body")?,
    })
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
