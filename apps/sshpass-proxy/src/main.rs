//! sshpass-proxy binary
//!
//! Use as `ssh -o ProxyCommand='sshpass-proxy -a %h:%p -e' user@host`.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use net_transport::RelayOutcome;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sshpass_proxy::cli::{Cli, DEFAULT_LOG_FILTER};
use sshpass_proxy::credentials::{
    CredentialError, default_host_key_path, load_host_key, load_or_generate_host_key,
    resolve_password,
};
use sshpass_proxy::stdio::StdioStream;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the SSH stream; logs go to stderr only
    let filter = match cli.log_filter() {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .init();

    let code = match run(cli).await {
        Ok(outcome) => {
            info!(?outcome, "sshpass-proxy finished");
            0
        }
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    // A blocking stdin read would otherwise keep the runtime alive
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<RelayOutcome> {
    let source = cli
        .password_source()
        .ok_or(CredentialError::MissingPassword)?;
    let password = resolve_password(&source, |name| std::env::var_os(name))?;

    let host_key = match &cli.host_key {
        Some(path) => load_host_key(path)?,
        None => {
            let path = default_host_key_path(
                std::env::var_os("XDG_CONFIG_HOME"),
                std::env::var_os("HOME"),
            )
            .ok_or(CredentialError::NoConfigDir)?;
            load_or_generate_host_key(&path)?
        }
    };
    info!(fingerprint = %host_key.public_key().fingerprint(), "host key loaded");

    let target = cli.target();
    let remote = tokio::time::timeout(cli.connect_timeout(), TcpStream::connect(&target))
        .await
        .with_context(|| format!("timed out connecting to {}", target))?
        .with_context(|| format!("cannot connect to {}", target))?;
    remote.set_nodelay(true)?;
    info!(%target, "connected");

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let outcome = sshpass_proxy::sshpass_proxy(
        StdioStream::new(),
        remote,
        Arc::new(host_key),
        password,
        Arc::new(cli.transport_config()),
        cancel,
    )
    .await?;
    Ok(outcome)
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
            _ = terminate.recv() => info!("terminated"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupted");
    }
    cancel.cancel();
}
