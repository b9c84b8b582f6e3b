//! GitHub pull-request notifications drafted by a chat model and delivered
//! over SMTP.

pub mod agent;
pub mod compose;
pub mod config;
pub mod error;
pub mod github;
pub mod launcher;
pub mod llm;
pub mod mailer;
pub mod model;
pub mod server;
pub mod shutdown;
