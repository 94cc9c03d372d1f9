//! Rewrites MCP client configuration files so their server URLs go through
//! the gateway.
//!
//! Every string `url` field, at any depth, becomes
//! `<gateway>?targetUrl=<original>`. Values already carrying that prefix are
//! left alone, so running the rewrite twice changes nothing. The original
//! file is kept next to the rewritten one with a `.bak` suffix.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path} as JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode rewritten config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No file at the path.
    Missing,
    /// Every URL already points at the gateway.
    Unchanged,
    /// `urls` fields were (or, in a dry run, would be) rewritten.
    Rewritten { urls: usize },
}

pub struct ConfigRewriter {
    prefix: String,
}

impl ConfigRewriter {
    /// Rewriter targeting the gateway at `public_url`.
    pub fn new(public_url: &str) -> Self {
        Self {
            prefix: format!("{}?targetUrl=", public_url.trim_end_matches('/')),
        }
    }

    /// Rewrite the `url` fields under `value`, returning how many changed.
    pub fn rewrite_value(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => {
                let mut changed = 0;
                for (key, field) in map.iter_mut() {
                    if key == "url" {
                        if let Value::String(url) = &mut *field {
                            if self.should_rewrite(url) {
                                *url = format!("{}{}", self.prefix, url);
                                changed += 1;
                            }
                            continue;
                        }
                    }
                    changed += self.rewrite_value(field);
                }
                changed
            }
            Value::Array(items) => items.iter_mut().map(|item| self.rewrite_value(item)).sum(),
            _ => 0,
        }
    }

    fn should_rewrite(&self, url: &str) -> bool {
        !url.starts_with(&self.prefix)
            && (url.starts_with("http://") || url.starts_with("https://"))
    }

    /// Rewrite one file in place. With `dry_run` nothing is written.
    pub fn rewrite_file(&self, path: &Path, dry_run: bool) -> Result<RewriteOutcome, RewriteError> {
        let original = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RewriteOutcome::Missing),
            Err(source) => {
                return Err(RewriteError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut config: Value =
            serde_json::from_slice(&original).map_err(|source| RewriteError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let urls = self.rewrite_value(&mut config);
        if urls == 0 {
            return Ok(RewriteOutcome::Unchanged);
        }
        if dry_run {
            return Ok(RewriteOutcome::Rewritten { urls });
        }

        let mut encoded = serde_json::to_vec_pretty(&config)?;
        encoded.push(b'\n');

        let backup = with_suffix(path, ".bak");
        fs::write(&backup, &original).map_err(|source| RewriteError::Write {
            path: backup.clone(),
            source,
        })?;

        // Staged beside the target and renamed over it, so readers never
        // see a half-written file.
        let staging = with_suffix(path, ".tmp");
        fs::write(&staging, &encoded)
            .and_then(|()| fs::rename(&staging, path))
            .map_err(|source| RewriteError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(RewriteOutcome::Rewritten { urls })
    }

    /// Rewrite each of `paths`, logging per-file results. Failures are
    /// warnings; the remaining files are still processed.
    pub fn rewrite_all(&self, paths: &[PathBuf], dry_run: bool) -> Vec<(PathBuf, RewriteOutcome)> {
        let mut results = Vec::new();
        for path in paths {
            let path = expand_home(path);
            match self.rewrite_file(&path, dry_run) {
                Ok(outcome) => {
                    match outcome {
                        RewriteOutcome::Rewritten { urls } => {
                            tracing::info!(path = %path.display(), urls, dry_run, "client config rewritten")
                        }
                        RewriteOutcome::Unchanged => {
                            tracing::debug!(path = %path.display(), "client config already routed")
                        }
                        RewriteOutcome::Missing => {
                            tracing::debug!(path = %path.display(), "client config not found")
                        }
                    }
                    results.push((path, outcome));
                }
                Err(err) => tracing::warn!(%err, "skipping client config"),
            }
        }
        results
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Resolve a leading `~` against the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        (Ok(_), None) => {
            tracing::warn!(path = %path.display(), "home directory unknown, path left as is");
            path.to_path_buf()
        }
        (Err(_), _) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GATEWAY: &str = "http://localhost:11435";

    #[test]
    fn rewrites_nested_urls_once() {
        let rewriter = ConfigRewriter::new(GATEWAY);
        let mut config = json!({
            "mcpServers": {
                "tools": { "url": "http://localhost:8084/sse" },
                "remote": { "url": "https://tools.example.com/sse", "headers": { "x": "y" } },
                "local": { "command": "npx", "args": ["server"] }
            },
            "list": [{ "url": "http://a.example/sse" }]
        });

        assert_eq!(rewriter.rewrite_value(&mut config), 3);
        assert_eq!(
            config["mcpServers"]["tools"]["url"],
            "http://localhost:11435?targetUrl=http://localhost:8084/sse"
        );
        assert_eq!(config["mcpServers"]["local"]["command"], "npx");

        // Second pass is a no-op.
        let snapshot = config.clone();
        assert_eq!(rewriter.rewrite_value(&mut config), 0);
        assert_eq!(config, snapshot);
    }

    #[test]
    fn non_http_and_non_string_urls_are_left_alone() {
        let rewriter = ConfigRewriter::new(GATEWAY);
        let mut config = json!({ "a": { "url": "file:///tmp/x" }, "b": { "url": 3 } });
        assert_eq!(rewriter.rewrite_value(&mut config), 0);
    }

    #[test]
    fn file_rewrite_keeps_backup_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let original = r#"{"servers":{"s":{"url":"http://localhost:8084/sse"}}}"#;
        fs::write(&path, original).unwrap();

        let rewriter = ConfigRewriter::new(GATEWAY);
        assert_eq!(
            rewriter.rewrite_file(&path, false).unwrap(),
            RewriteOutcome::Rewritten { urls: 1 }
        );

        let backup = fs::read_to_string(dir.path().join("mcp.json.bak")).unwrap();
        assert_eq!(backup, original);

        let rewritten: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            rewritten["servers"]["s"]["url"],
            "http://localhost:11435?targetUrl=http://localhost:8084/sse"
        );
        assert!(!dir.path().join("mcp.json.tmp").exists());

        assert_eq!(rewriter.rewrite_file(&path, false).unwrap(), RewriteOutcome::Unchanged);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let original = r#"{"url":"http://localhost:8084/sse"}"#;
        fs::write(&path, original).unwrap();

        let outcome = ConfigRewriter::new(GATEWAY).rewrite_file(&path, true).unwrap();
        assert_eq!(outcome, RewriteOutcome::Rewritten { urls: 1 });
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert!(!dir.path().join("mcp.json.bak").exists());
    }

    #[test]
    fn missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let rewriter = ConfigRewriter::new(GATEWAY);
        assert_eq!(
            rewriter.rewrite_file(&dir.path().join("nope.json"), false).unwrap(),
            RewriteOutcome::Missing
        );

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            rewriter.rewrite_file(&bad, false),
            Err(RewriteError::Parse { .. })
        ));

        // A bad file does not stop the others.
        let good = dir.path().join("good.json");
        fs::write(&good, r#"{"url":"http://x.example/sse"}"#).unwrap();
        let results = rewriter.rewrite_all(&[bad, good.clone()], false);
        assert_eq!(results, vec![(good, RewriteOutcome::Rewritten { urls: 1 })]);
    }

    #[test]
    fn home_expansion() {
        let plain = Path::new(".cursor/mcp.json");
        assert_eq!(expand_home(plain), plain);
        let home = dirs::home_dir().expect("test environment has a home directory");
        assert_eq!(
            expand_home(Path::new("~/intellij/mcp.json")),
            home.join("intellij/mcp.json")
        );
        assert_eq!(
            expand_home(Path::new("~/Library/Application Support/Code/User/settings.json")),
            home.join("Library/Application Support/Code/User/settings.json")
        );
        // Only a whole leading `~` component is expanded.
        assert_eq!(expand_home(Path::new("~user/x")), Path::new("~user/x"));
    }
}
