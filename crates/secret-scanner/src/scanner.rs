//! Compiled multi-rule scanner.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use crate::loader::CustomRule;
use crate::rules::{RuleCategory, BUILTIN_RULES};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("failed to compile rule pattern: {0}")]
    RegexCompile(#[from] regex::Error),
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// One rule match. The matched text itself is never stored, only a
/// redacted preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub description: String,
    pub category: RuleCategory,
    /// Byte offset of the match within the scanned text.
    pub offset: usize,
    pub preview: String,
}

/// Keep the first four characters of `secret` and mask the rest.
pub fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct CompiledRule {
    id: String,
    description: String,
    category: RuleCategory,
    regex: Regex,
}

/// The [`RegexSet`] answers which rules match; the per-rule [`Regex`] list
/// (same order) locates each match.
pub struct Scanner {
    regex_set: RegexSet,
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Scanner {
    /// Scanner over the built-in catalogue.
    pub fn new() -> Result<Self, ScannerError> {
        Self::with_custom_rules(Vec::new())
    }

    /// Built-in catalogue followed by `custom` rules.
    pub fn with_custom_rules(custom: Vec<CustomRule>) -> Result<Self, ScannerError> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + custom.len());

        for rule in BUILTIN_RULES {
            rules.push(CompiledRule {
                id: rule.id.to_string(),
                description: rule.description.to_string(),
                category: rule.category,
                regex: Regex::new(rule.pattern)?,
            });
        }
        for rule in custom {
            let regex = Regex::new(&rule.regex)?;
            rules.push(CompiledRule {
                id: rule.id,
                description: rule.description,
                category: RuleCategory::Custom,
                regex,
            });
        }

        let regex_set = RegexSet::new(rules.iter().map(|r| r.regex.as_str()))?;

        Ok(Self { regex_set, rules })
    }

    /// Every match of every rule in `text`, ordered by offset.
    pub fn scan(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        for idx in self.regex_set.matches(text).into_iter() {
            let rule = &self.rules[idx];
            for m in rule.regex.find_iter(text) {
                findings.push(Finding {
                    rule_id: rule.id.clone(),
                    description: rule.description.clone(),
                    category: rule.category,
                    offset: m.start(),
                    preview: redact(m.as_str()),
                });
            }
        }

        findings.sort_by_key(|f| f.offset);
        findings
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
