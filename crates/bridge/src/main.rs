use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use axum::routing::get;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod access;
mod auth;
mod config;
mod dispatch;
mod mcp;
mod registry;
mod rpc;
mod timeouts;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI arguments for the bridge.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolbridge-bridge")]
#[command(version, about = "No-code bridge exposing HTTP APIs as MCP tools")]
struct CliArgs {
    /// Path to the bridge config file (YAML).
    #[arg(short = 'c', long = "config", env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address (ip:port).
    #[arg(
        short = 'b',
        long,
        env = "TOOLBRIDGE_BIND",
        default_value = "127.0.0.1:8000"
    )]
    bind: String,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "TOOLBRIDGE_LOG",
        default_value = "info"
    )]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!(version = VERSION, "starting toolbridge bridge");
    run(args).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let endpoint_path = config.server.endpoint_path.clone();

    let snapshot = mcp::Snapshot::from_config(config);
    tracing::info!(
        routes = snapshot.config.routes.len(),
        tools = snapshot.registry.len(),
        oauth = snapshot.config.server.oauth.enabled,
        "tool registry built"
    );

    let upstream_http = build_outbound_client("upstream")?;
    let auth_http = build_outbound_client("authorization-server")?;
    let state = Arc::new(mcp::McpState::new(snapshot, upstream_http, auth_http));

    let ct = CancellationToken::new();
    watch_for_shutdown(ct.clone());
    spawn_reload_watcher(state.clone(), args.config.clone(), ct.clone());

    let app = mcp::router(state, &endpoint_path).route("/health", get(health));

    let bind: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", args.bind))?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind address '{bind}'"))?;
    let bound = listener.local_addr().context("get bind address")?;
    tracing::info!(addr = %bound, endpoint = %endpoint_path, "MCP endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await?;

    tracing::info!("bridge stopped");
    Ok(())
}

/// Outbound clients never follow redirects: a tool call must land on exactly
/// the URL the registry bound for it, and JWKS/introspection traffic must not
/// be bounced to another host. Timeouts are per request, not per client,
/// because the auth path (5 s) and the upstream path (10 s) use different
/// bounds.
fn build_outbound_client(purpose: &'static str) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("toolbridge-bridge/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .with_context(|| format!("build {purpose} HTTP client"))
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<config::BridgeConfig> {
    let Some(path) = path else {
        tracing::warn!("no config file given; serving an empty tool registry");
        return Ok(config::BridgeConfig::default());
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: config::BridgeConfig = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("parse YAML config: {}", path.display()))?;
    config::validate_config(&cfg)
        .with_context(|| format!("validate config: {}", path.display()))?;
    Ok(cfg)
}

fn watch_for_shutdown(ct: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received; draining in-flight requests");
        ct.cancel();
    });
}

/// Completes when the operator asks the process to stop: Ctrl+C anywhere,
/// SIGTERM under a supervisor on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "SIGTERM handler unavailable; only Ctrl+C will stop the bridge"
                );
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// SIGHUP re-reads the config file, rebuilds the registry off the request
/// path and swaps the snapshot in atomically. A broken file keeps the
/// current snapshot.
fn spawn_reload_watcher(
    state: Arc<mcp::McpState>,
    config_path: Option<PathBuf>,
    ct: CancellationToken,
) {
    #[cfg(unix)]
    {
        let Some(path) = config_path else {
            return;
        };
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGHUP handler");
                        return;
                    }
                };
            loop {
                tokio::select! {
                    () = ct.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        match load_config(Some(path.as_path())).await {
                            Ok(cfg) => {
                                let snapshot = mcp::Snapshot::from_config(cfg);
                                tracing::info!(
                                    tools = snapshot.registry.len(),
                                    "config reloaded"
                                );
                                state.install(snapshot);
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "config reload failed; keeping current snapshot"
                                );
                            }
                        }
                    }
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        let _ = (state, config_path, ct);
    }
}

async fn health() -> &'static str {
    "ok"
}

/// A human at a terminal gets the pretty format. Everything else (container
/// logs, the integration harness) gets one JSON object per line with event
/// fields flattened to the top level, so consumers can read e.g. the `addr`
/// of the listening endpoint without un-nesting.
fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let base = tracing_subscriber::registry().with(filter);

    if atty::is(atty::Stream::Stdout) {
        base.with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    } else {
        base.with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    }
}
