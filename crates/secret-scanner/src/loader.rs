//! YAML rule packs that extend the built-in catalogue.
//!
//! ```yaml
//! version: "1.0"
//! rules:
//!   - id: internal_service_token
//!     description: Internal Service Token
//!     regex: "itk_[a-z0-9]{32}"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::rules::BUILTIN_RULES;

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read rule pack {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse rule pack: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("unsupported rule pack version '{0}'; only '1.0' is supported")]
    UnsupportedVersion(String),

    #[error("rule id must not be empty")]
    EmptyId,

    #[error("duplicate rule id: '{0}'")]
    DuplicateId(String),

    #[error("rule '{id}' has an invalid regex: {source}")]
    InvalidRegex { id: String, source: regex::Error },
}

/// A rule read from a rule pack.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub description: String,
    pub regex: String,
}

#[derive(Debug, Deserialize)]
struct RulePack {
    version: String,
    #[serde(default)]
    rules: Vec<CustomRule>,
}

/// Read and validate the rule pack at `path`.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<CustomRule>, RuleLoadError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_rules_from_str(&contents)
}

/// Parse and validate a rule pack.
///
/// Ids must be non-empty, unique within the pack, and must not shadow a
/// built-in rule. Every regex must compile.
pub fn load_rules_from_str(yaml: &str) -> Result<Vec<CustomRule>, RuleLoadError> {
    let pack: RulePack = serde_yml::from_str(yaml)?;

    if pack.version != "1.0" {
        return Err(RuleLoadError::UnsupportedVersion(pack.version));
    }

    let mut seen: HashSet<&str> = BUILTIN_RULES.iter().map(|r| r.id).collect();
    for rule in &pack.rules {
        if rule.id.trim().is_empty() {
            return Err(RuleLoadError::EmptyId);
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleLoadError::DuplicateId(rule.id.clone()));
        }
        regex::Regex::new(&rule.regex).map_err(|source| RuleLoadError::InvalidRegex {
            id: rule.id.clone(),
            source,
        })?;
    }

    Ok(pack.rules)
}
