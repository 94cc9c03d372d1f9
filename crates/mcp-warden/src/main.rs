mod cli;
mod config;
mod rewriter;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use secret_scanner::Scanner;
use sse_proxy::{ContentPolicy, Finding, Proxy, ProxyConfig, ToolCallRequest};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::rewriter::{ConfigRewriter, RewriteOutcome};

/// Name shown to clients in block messages.
const POLICY_NAME: &str = "mcp-warden";

/// How long to wait for the audit writer to drain on exit.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// SecretPolicy
// ---------------------------------------------------------------------------

/// Wraps the [`Scanner`] as a [`ContentPolicy`].
///
/// Each string argument is scanned on its own; values are never joined, and
/// non-string arguments are not inspected. Finding descriptions name the
/// argument and carry only a redacted preview of the match.
struct SecretPolicy {
    scanner: Scanner,
}

impl ContentPolicy for SecretPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn inspect(&self, request: &ToolCallRequest) -> Vec<Finding> {
        request
            .string_arguments()
            .flat_map(|(name, value)| {
                self.scanner.scan(value).into_iter().map(move |finding| {
                    Finding::new(format!(
                        "{} in argument '{}' ({})",
                        finding.description, name, finding.preview
                    ))
                })
            })
            .collect()
    }
}

fn source() -> AuditSource {
    AuditSource::new("mcp-warden")
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config.
    let mut cfg = config::load(&cli.config)?;

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    // 4. Environment, then CLI overrides.
    cfg.apply_env(|key| std::env::var(key).ok());

    if let Some(port) = cli.port {
        cfg.network.port = port;
    }
    if let Some(ref rules) = cli.rules {
        cfg.scanner.rules_file = Some(rules.clone());
    }

    match cli.command() {
        Command::RewriteConfig { paths, dry_run } => {
            let paths = if paths.is_empty() {
                cfg.rewriter.paths.clone()
            } else {
                paths
            };
            rewrite_configs(&cfg, &paths, dry_run, &AuditSink::disabled()).await;
            Ok(())
        }
        Command::Serve { no_rewrite } => serve(cli.config, cfg, no_rewrite).await,
    }
}

async fn serve(config_file: PathBuf, cfg: Config, no_rewrite: bool) -> Result<()> {
    let listen_addr = cfg.network.listen_addr();
    let public_url = cfg.network.public_url();

    info!(
        config_file = %config_file.display(),
        listen = %listen_addr,
        %public_url,
        isolated_loopback = cfg.network.isolated_loopback,
        api_key_set = cfg.auth.api_key.is_some(),
        "mcp-warden starting"
    );

    // 5. Start audit logger.
    let (audit, audit_handle) = match &cfg.logging.audit_log_path {
        Some(path) => {
            let (sink, handle) = AuditSink::start(path)
                .await
                .context("failed to start audit logger")?;
            (sink, Some(handle))
        }
        None => (AuditSink::disabled(), None),
    };
    info!(enabled = audit.is_enabled(), "audit logger ready");

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStarted,
            source(),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": config_file.display().to_string(),
                "listen": listen_addr,
            }),
        ))
        .await;

    // 6. Build the secret scanner.
    let custom_rules = match &cfg.scanner.rules_file {
        Some(path) => secret_scanner::load_rules(path)
            .with_context(|| format!("failed to load rule pack {}", path.display()))?,
        None => Vec::new(),
    };
    let custom_count = custom_rules.len();
    let scanner =
        Scanner::with_custom_rules(custom_rules).context("failed to initialize secret scanner")?;

    info!(
        rules = scanner.rule_count(),
        custom = custom_count,
        "secret scanner loaded"
    );

    // 7. Route client configs through the gateway.
    if cfg.rewriter.on_startup && !no_rewrite {
        rewrite_configs(&cfg, &cfg.rewriter.paths, false, &audit).await;
    }

    // 8. Set up shutdown signal (ctrl-c + SIGTERM).
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    // 9. Bind and run the gateway.
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    let proxy = Proxy::new(ProxyConfig {
        public_url,
        loopback: cfg.network.loopback(),
        policy: Arc::new(SecretPolicy { scanner }),
        audit: audit.clone(),
    })
    .context("failed to build upstream HTTP clients")?;

    let result = proxy.run(listener, shutdown).await;

    // 10. Log shutdown.
    info!("mcp-warden shutting down");

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStopped,
            source(),
            serde_json::json!({ "result": format!("{result:?}") }),
        ))
        .await;

    drop(audit);
    if let Some(handle) = audit_handle {
        if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("audit writer did not drain before exit");
        }
    }

    result.context("gateway server failure")
}

async fn rewrite_configs(cfg: &Config, paths: &[PathBuf], dry_run: bool, audit: &AuditSink) {
    let rewriter = ConfigRewriter::new(&cfg.network.public_url());
    let results = rewriter.rewrite_all(paths, dry_run);

    let mut rewritten = 0;
    for (path, outcome) in &results {
        if let RewriteOutcome::Rewritten { urls } = outcome {
            rewritten += 1;
            if !dry_run {
                audit
                    .log(AuditEntry::new(
                        AuditEventType::ConfigRewritten,
                        source(),
                        serde_json::json!({ "path": path.display().to_string(), "urls": urls }),
                    ))
                    .await;
            }
        }
    }

    if rewritten == 0 {
        info!(checked = paths.len(), "no client config files needed rewriting");
    } else {
        info!(rewritten, dry_run, "client config files routed through the gateway");
    }
}

/// Cancel `shutdown` on ctrl-c or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                tracing::warn!(%err, "SIGTERM handler unavailable, waiting for ctrl-c only");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }

    shutdown.cancel();
}
