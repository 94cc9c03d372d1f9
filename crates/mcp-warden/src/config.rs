use anyhow::Context;
use serde::Deserialize;
use sse_proxy::LoopbackRewrite;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub rewriter: RewriterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            scanner: ScannerConfig::default(),
            rewriter: RewriterConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL clients reach the gateway at. Derived from `port` if unset.
    #[serde(default)]
    pub public_url: Option<String>,
    /// The gateway runs in its own network namespace, so loopback target
    /// hosts must be redirected to `loopback_alias`.
    #[serde(default)]
    pub isolated_loopback: bool,
    #[serde(default = "default_loopback_alias")]
    pub loopback_alias: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_url: None,
            isolated_loopback: false,
            loopback_alias: default_loopback_alias(),
        }
    }
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    pub fn loopback(&self) -> LoopbackRewrite {
        if self.isolated_loopback {
            LoopbackRewrite::Alias(self.loopback_alias.clone())
        } else {
            LoopbackRewrite::Disabled
        }
    }
}

/// Carried for deployments that set it; requests are not authenticated.
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `null` disables the audit trail.
    #[serde(default = "default_audit_path")]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScannerConfig {
    /// YAML rule pack added to the built-in rules.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct RewriterConfig {
    #[serde(default = "default_true")]
    pub on_startup: bool,
    /// Client config files to rewrite. A leading `~/` is the home directory.
    #[serde(default = "default_rewrite_paths")]
    pub paths: Vec<PathBuf>,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            on_startup: default_true(),
            paths: default_rewrite_paths(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11435
}

fn default_loopback_alias() -> String {
    "host.docker.internal".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> Option<PathBuf> {
    Some(PathBuf::from("mcp-warden-audit.jsonl"))
}

fn default_true() -> bool {
    true
}

fn default_rewrite_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("~/intellij/mcp.json"),
        PathBuf::from(".cursor/mcp.json"),
        PathBuf::from("~/Library/Application Support/Code/User/settings.json"),
    ]
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the defaults, with a warning.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

impl Config {
    /// Apply the deployment environment: `SERVER_PORT`, `DOCKER=true` and
    /// `MCPGUARD_API_KEY`. `lookup` is normally `std::env::var`.
    ///
    /// An unparsable `SERVER_PORT` is ignored with a warning and the
    /// configured port stays in effect.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SERVER_PORT") {
            match port.trim().parse() {
                Ok(port) => self.network.port = port,
                Err(err) => warn!(
                    value = %port,
                    %err,
                    port = self.network.port,
                    "ignoring invalid SERVER_PORT"
                ),
            }
        }

        if lookup("DOCKER").as_deref() == Some("true") {
            // Inside a container the listener must be reachable from the
            // host, and `localhost` targets live on the host.
            self.network.isolated_loopback = true;
            self.network.bind = "0.0.0.0".to_string();
        }

        if let Some(key) = lookup("MCPGUARD_API_KEY").filter(|k| !k.is_empty()) {
            self.auth.api_key = Some(key);
        }
    }
}
