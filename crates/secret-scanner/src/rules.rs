//! Built-in secret detection rules.
//!
//! Each rule names one credential format. Patterns are compiled once when a
//! [`Scanner`](crate::scanner::Scanner) is built.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Broad family of the credential a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Cloud provider access keys.
    CloudCredential,
    /// Source hosting tokens (GitHub, GitLab).
    SourceControlToken,
    /// Chat and webhook tokens.
    MessagingToken,
    /// Payment provider keys.
    PaymentKey,
    /// Hosted model provider keys.
    AiProviderKey,
    /// PEM private key material.
    PrivateKey,
    /// Signed bearer tokens such as JWTs.
    BearerToken,
    /// Key/value assignments that look like a secret.
    GenericSecret,
    /// Rules loaded from a rule pack.
    Custom,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CloudCredential => "cloud_credential",
            Self::SourceControlToken => "source_control_token",
            Self::MessagingToken => "messaging_token",
            Self::PaymentKey => "payment_key",
            Self::AiProviderKey => "ai_provider_key",
            Self::PrivateKey => "private_key",
            Self::BearerToken => "bearer_token",
            Self::GenericSecret => "generic_secret",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Rule definition
// ---------------------------------------------------------------------------

/// A built-in detection rule.
pub struct SecretRule {
    /// Stable snake_case identifier.
    pub id: &'static str,
    /// Human-readable name reported in findings.
    pub description: &'static str,
    pub category: RuleCategory,
    pub pattern: &'static str,
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

pub static BUILTIN_RULES: &[SecretRule] = &[
    // ---- Cloud ---------------------------------------------------------
    SecretRule {
        id: "aws_access_key_id",
        description: "AWS Access Key ID",
        category: RuleCategory::CloudCredential,
        pattern: r"\b(?:AKIA|ASIA|ABIA|ACCA)[A-Z0-9]{16}\b",
    },
    SecretRule {
        id: "google_api_key",
        description: "Google API Key",
        category: RuleCategory::CloudCredential,
        pattern: r"\bAIza[0-9A-Za-z_\-]{35}",
    },
    // ---- Source control ------------------------------------------------
    SecretRule {
        id: "github_pat",
        description: "GitHub Personal Access Token",
        category: RuleCategory::SourceControlToken,
        pattern: r"\bghp_[A-Za-z0-9]{36}\b",
    },
    SecretRule {
        id: "github_fine_grained_pat",
        description: "GitHub Fine-Grained Personal Access Token",
        category: RuleCategory::SourceControlToken,
        pattern: r"\bgithub_pat_[A-Za-z0-9_]{82}\b",
    },
    SecretRule {
        id: "github_oauth_token",
        description: "GitHub OAuth Access Token",
        category: RuleCategory::SourceControlToken,
        pattern: r"\bgho_[A-Za-z0-9]{36}\b",
    },
    SecretRule {
        id: "github_app_token",
        description: "GitHub App Token",
        category: RuleCategory::SourceControlToken,
        pattern: r"\b(?:ghu|ghs)_[A-Za-z0-9]{36}\b",
    },
    SecretRule {
        id: "gitlab_pat",
        description: "GitLab Personal Access Token",
        category: RuleCategory::SourceControlToken,
        pattern: r"\bglpat-[A-Za-z0-9_\-]{20}",
    },
    // ---- Messaging -----------------------------------------------------
    SecretRule {
        id: "slack_token",
        description: "Slack Token",
        category: RuleCategory::MessagingToken,
        pattern: r"\bxox[baprs]-[A-Za-z0-9\-]{10,}",
    },
    SecretRule {
        id: "slack_webhook_url",
        description: "Slack Webhook URL",
        category: RuleCategory::MessagingToken,
        pattern: r"https://hooks\.slack\.com/services/T[A-Z0-9]+/B[A-Z0-9]+/[A-Za-z0-9]+",
    },
    // ---- Payments ------------------------------------------------------
    SecretRule {
        id: "stripe_secret_key",
        description: "Stripe Secret Key",
        category: RuleCategory::PaymentKey,
        pattern: r"\b(?:sk|rk)_(?:live|test)_[A-Za-z0-9]{24,99}\b",
    },
    // ---- Model providers -----------------------------------------------
    SecretRule {
        id: "anthropic_api_key",
        description: "Anthropic API Key",
        category: RuleCategory::AiProviderKey,
        pattern: r"\bsk-ant-(?:api|admin)\d{2}-[A-Za-z0-9_\-]{80,}",
    },
    SecretRule {
        id: "openai_api_key",
        description: "OpenAI API Key",
        category: RuleCategory::AiProviderKey,
        pattern: r"\bsk-(?:proj-|svcacct-)?[A-Za-z0-9_\-]{20,}T3BlbkFJ[A-Za-z0-9_\-]{20,}",
    },
    // ---- Key material --------------------------------------------------
    SecretRule {
        id: "private_key",
        description: "Private Key",
        category: RuleCategory::PrivateKey,
        pattern: r"-----BEGIN (?:[A-Z0-9]+ )*PRIVATE KEY( BLOCK)?-----",
    },
    SecretRule {
        id: "jwt",
        description: "JSON Web Token",
        category: RuleCategory::BearerToken,
        pattern: r"\beyJ[A-Za-z0-9_\-]{10,}\.eyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}",
    },
    // ---- Generic -------------------------------------------------------
    SecretRule {
        id: "generic_api_key",
        description: "Generic API Key",
        category: RuleCategory::GenericSecret,
        pattern: r#"(?i)\b(?:api[_\-]?key|secret[_\-]?key|access[_\-]?token|auth[_\-]?token|client[_\-]?secret)\s*[:=]\s*["']?[A-Za-z0-9_\-./+=]{16,}"#,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_rules_compile() {
        for rule in BUILTIN_RULES {
            regex::Regex::new(rule.pattern)
                .unwrap_or_else(|e| panic!("rule '{}' failed to compile: {e}", rule.id));
        }
    }

    #[test]
    fn ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for rule in BUILTIN_RULES {
            assert!(seen.insert(rule.id), "duplicate rule id: {}", rule.id);
        }
    }

    #[test]
    fn no_builtin_rule_is_custom() {
        assert!(BUILTIN_RULES
            .iter()
            .all(|r| r.category != RuleCategory::Custom));
    }
}
