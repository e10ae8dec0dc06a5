// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing::{error, info};

use forestfull_client::{AuthClient, ClientConfig, LogNavigator, LoginOutcome, ReqwestFetch};

#[derive(Debug, Parser)]
#[command(name = "forestfull", version, about = "Cookie-authenticated client for the Forestfull backend")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    /// Log format (json or text).
    #[arg(long, env = "FORESTFULL_LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FORESTFULL_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and print the session claims.
    Login {
        #[arg(long, env = "FORESTFULL_USERNAME")]
        username: String,
        #[arg(long, env = "FORESTFULL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Issue one authenticated request and print status and body.
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...).
        method: String,
        /// Path relative to the base URL, or an absolute URL.
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Log in first with these credentials.
        #[arg(long, env = "FORESTFULL_USERNAME", requires = "password")]
        username: Option<String>,
        #[arg(long, env = "FORESTFULL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log in, connect the messaging channel and print frames until Ctrl-C.
    Listen {
        #[arg(long, env = "FORESTFULL_USERNAME")]
        username: String,
        #[arg(long, env = "FORESTFULL_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = AuthClient::from_config(cli.config, Arc::new(LogNavigator))?;

    match cli.command {
        Command::Login { username, password } => {
            login(&client, &username, &password).await?;
            let claims = client.claims().unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
        Command::Request { method, path, body, username, password } => {
            if let (Some(username), Some(password)) = (username, password) {
                login(&client, &username, &password).await?;
            }
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
            let body = body.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?;
            let resp = client.request(method, &path, body.as_ref(), &[]).await?;
            println!("{}", resp.status);
            println!("{}", resp.text());
        }
        Command::Listen { username, password } => {
            login(&client, &username, &password).await?;
            listen(&client).await?;
        }
    }
    Ok(())
}

async fn login(
    client: &AuthClient<ReqwestFetch>,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    match client.login(username, password).await? {
        LoginOutcome::Success => Ok(()),
        LoginOutcome::UnknownUser => anyhow::bail!("login failed: unknown user {username}"),
        LoginOutcome::InvalidPassword => anyhow::bail!("login failed: invalid password"),
        LoginOutcome::Rejected(status) => anyhow::bail!("login failed: status {status}"),
    }
}

async fn listen(client: &AuthClient<ReqwestFetch>) -> anyhow::Result<()> {
    let channel = client.channel();
    channel.connect(|| info!(url = %channel.url(), "channel ready")).await?;
    let mut frames =
        channel.subscribe().ok_or_else(|| anyhow::anyhow!("channel closed before subscribing"))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                channel.disconnect();
                break;
            }
            frame = frames.recv() => match frame {
                Ok(text) => println!("{text}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "frames dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("channel closed by backend");
                    break;
                }
            },
        }
    }
    Ok(())
}
