use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use pr_mailbot::agent::NotificationAgent;
use pr_mailbot::compose::EmailComposer;
use pr_mailbot::config;
use pr_mailbot::llm::AzureOpenAiClient;
use pr_mailbot::mailer::SmtpMailer;
use pr_mailbot::server::{self, AppState};
use pr_mailbot::shutdown::shutdown_signal;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file and LISTEN_ADDR
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err.into());
        }
    }

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.server.listen = listen;
        config::validate(&cfg)?;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.server.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let readiness = cfg.readiness();
    if !readiness.is_operational() {
        warn!(?readiness, "mail workflow configuration incomplete");
    }

    let chat = Arc::new(AzureOpenAiClient::from_config(&cfg)?);
    let mailer = Arc::new(SmtpMailer::from_settings(&cfg.smtp)?);
    let composer = EmailComposer::new(chat, &cfg.project);
    let agent = NotificationAgent::new(
        composer,
        mailer,
        cfg.smtp.sender().map(str::to_string),
        cfg.project.owner_email.clone(),
    );

    let listener = TcpListener::bind(cfg.listen_addr()?).await?;
    let state = Arc::new(AppState::new(cfg, agent));

    info!("starting PR mail bot");
    server::serve(listener, state, async {
        let signal = shutdown_signal().await;
        info!(signal, "shutting down");
    })
    .await
}
