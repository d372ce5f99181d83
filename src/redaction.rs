//! Redaction policy engine.
//!
//! Two operations over arbitrary JSON values: `redact` rewrites every string
//! node according to the enabled rules, and `assert_no_sensitive_data` is the
//! persistence gate — the storage layer calls it on every write path and
//! refuses the write on the first match.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PrismError, PrismResult};

/// What to do with a matched span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionAction {
    Mask,
    Partial,
    Hash,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionRule {
    pub name: String,
    pub category: String,
    pub action: RedactionAction,
    pub pattern: String,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPolicy {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rules: Vec<RedactionRule>,
}

/// Load a policy from a JSON file.
pub fn load_redaction_policy(path: impl AsRef<Path>) -> PrismResult<RedactionPolicy> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PrismError::Configuration(format!(
            "Cannot read redaction policy {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        PrismError::Configuration(format!(
            "Invalid redaction policy {}: {e}",
            path.display()
        ))
    })
}

impl RedactionPolicy {
    /// Built-in policy covering the mandatory rule set. Used when no policy
    /// file is configured and as the baseline for tests.
    pub fn builtin() -> Self {
        let rule = |name: &str, category: &str, action: RedactionAction, pattern: &str| {
            RedactionRule {
                name: name.to_string(),
                category: category.to_string(),
                action,
                pattern: pattern.to_string(),
                replacement: None,
                enabled: true,
            }
        };
        Self {
            version: "builtin-1".to_string(),
            description: Some("Default secret/PII rule set".to_string()),
            rules: vec![
                rule(
                    "openai_api_key_like",
                    "secret",
                    RedactionAction::Mask,
                    r"sk-(?:proj-)?[A-Za-z0-9_-]{16,}",
                ),
                rule(
                    "github_token",
                    "secret",
                    RedactionAction::Mask,
                    r"(?:ghp_|github_pat_)[A-Za-z0-9_]{16,}",
                ),
                rule(
                    "bearer_token",
                    "secret",
                    RedactionAction::Mask,
                    r"(?i)bearer\s+[A-Za-z0-9._~+/=-]{16,}",
                ),
                rule(
                    "pem_private_key",
                    "secret",
                    RedactionAction::Mask,
                    r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
                ),
                rule(
                    "email",
                    "pii",
                    RedactionAction::Mask,
                    r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
                ),
                rule(
                    "phone_like",
                    "pii",
                    RedactionAction::Mask,
                    r"\+\d{10,15}\b|\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}",
                ),
            ],
        }
    }
}

struct CompiledRule {
    rule: RedactionRule,
    regex: Regex,
}

/// Policy engine with compiled rules.
pub struct Redactor {
    policy_version: String,
    compiled: Vec<CompiledRule>,
    keep_start: usize,
    keep_end: usize,
}

impl Redactor {
    pub fn new(policy: RedactionPolicy) -> PrismResult<Self> {
        Self::with_keep(policy, 4, 4)
    }

    pub fn with_keep(
        policy: RedactionPolicy,
        keep_start: usize,
        keep_end: usize,
    ) -> PrismResult<Self> {
        let mut compiled = Vec::new();
        for rule in policy.rules {
            if !rule.enabled {
                continue;
            }
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                PrismError::Configuration(format!(
                    "Invalid redaction pattern for rule {}: {e}",
                    rule.name
                ))
            })?;
            compiled.push(CompiledRule { rule, regex });
        }
        Ok(Self {
            policy_version: policy.version,
            compiled,
            keep_start,
            keep_end,
        })
    }

    pub fn policy_version(&self) -> &str {
        &self.policy_version
    }

    /// Walk a JSON value depth-first and apply every enabled rule to every
    /// string node. Numbers, booleans, and nulls pass through unchanged.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn redact_str(&self, text: &str) -> String {
        let mut out = text.to_string();
        for compiled in &self.compiled {
            out = compiled
                .regex
                .replace_all(&out, |caps: &regex::Captures<'_>| {
                    self.replacement(&compiled.rule, &caps[0])
                })
                .into_owned();
        }
        out
    }

    fn replacement(&self, rule: &RedactionRule, matched: &str) -> String {
        if let Some(replacement) = &rule.replacement {
            return replacement.clone();
        }
        let mask = format!("***REDACTED:{}***", rule.category);
        match rule.action {
            RedactionAction::Mask | RedactionAction::Drop => mask,
            RedactionAction::Partial => {
                if matched.chars().count() <= self.keep_start + self.keep_end + 4 {
                    return mask;
                }
                let chars: Vec<char> = matched.chars().collect();
                let head: String = chars[..self.keep_start].iter().collect();
                let tail: String = chars[chars.len() - self.keep_end..].iter().collect();
                format!("{head}{mask}{tail}")
            }
            RedactionAction::Hash => {
                let digest = Sha256::digest(matched.as_bytes());
                format!(
                    "***REDACTED:{}:HASH:{}***",
                    rule.category,
                    &hex::encode(digest)[..12]
                )
            }
        }
    }

    /// Persistence gate. Walks the value and fails on the first string that
    /// still matches an enabled rule, reporting the rule name and the JSON
    /// path of the offending node (`$.events[0].content`).
    pub fn assert_no_sensitive_data(&self, value: &Value) -> PrismResult<()> {
        self.check(value, "$")
    }

    fn check(&self, value: &Value, path: &str) -> PrismResult<()> {
        match value {
            Value::String(s) => {
                for compiled in &self.compiled {
                    if compiled.regex.is_match(s) {
                        return Err(PrismError::UnredactedData {
                            rule_name: compiled.rule.name.clone(),
                            json_path: path.to_string(),
                        });
                    }
                }
                Ok(())
            }
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    self.check(item, &format!("{path}[{idx}]"))?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for (key, child) in map {
                    self.check(child, &format!("{path}.{key}"))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn redactor() -> Redactor {
        Redactor::new(RedactionPolicy::builtin()).unwrap()
    }

    #[test]
    fn masks_openai_key() {
        let r = redactor();
        let out = r.redact(&json!({"note": "key sk-proj-1234567890abcdef1234567890"}));
        assert_eq!(out["note"], "key ***REDACTED:secret***");
    }

    #[test]
    fn masks_github_token_and_bearer() {
        let r = redactor();
        let out = r.redact_str("ghp_abcdefghijklmnop123456 and Bearer abcdefghijklmnopqrst");
        assert!(!out.contains("ghp_abcdefghijklmnop123456"));
        assert!(!out.contains("abcdefghijklmnopqrst"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let r = redactor();
        let value = json!({
            "events": [{"content": "contact test@example.com, key sk-proj-abcdefghij0123456789"}],
            "n": 7,
        });
        let once = r.redact(&value);
        let twice = r.redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn guard_reports_rule_and_path() {
        let r = redactor();
        let err = r
            .assert_no_sensitive_data(&json!({"events": [{"content": "mail me at test@example.com"}]}))
            .unwrap_err();
        match err {
            PrismError::UnredactedData { rule_name, json_path } => {
                assert_eq!(rule_name, "email");
                assert_eq!(json_path, "$.events[0].content");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn guard_allows_placeholders() {
        let r = redactor();
        r.assert_no_sensitive_data(&json!({"msg": "token=***REDACTED:secret***"}))
            .unwrap();
    }

    #[test]
    fn partial_keeps_edges_for_long_matches() {
        let policy = RedactionPolicy {
            version: "t".into(),
            description: None,
            rules: vec![RedactionRule {
                name: "tok".into(),
                category: "secret".into(),
                action: RedactionAction::Partial,
                pattern: r"tok_[a-z0-9]{12,}".into(),
                replacement: None,
                enabled: true,
            }],
        };
        let r = Redactor::new(policy).unwrap();
        let out = r.redact_str("tok_abcdefghijkl9876");
        assert!(out.starts_with("tok_"));
        assert!(out.ends_with("9876"));
        assert!(out.contains("***REDACTED:secret***"));
    }

    #[test]
    fn short_partial_collapses_to_mask() {
        let policy = RedactionPolicy {
            version: "t".into(),
            description: None,
            rules: vec![RedactionRule {
                name: "tok".into(),
                category: "secret".into(),
                action: RedactionAction::Partial,
                pattern: r"tok_[a-z0-9]{4}".into(),
                replacement: None,
                enabled: true,
            }],
        };
        let r = Redactor::new(policy).unwrap();
        assert_eq!(r.redact_str("tok_ab12"), "***REDACTED:secret***");
    }

    #[test]
    fn hash_action_embeds_digest_prefix() {
        let policy = RedactionPolicy {
            version: "t".into(),
            description: None,
            rules: vec![RedactionRule {
                name: "acct".into(),
                category: "account".into(),
                action: RedactionAction::Hash,
                pattern: r"acct-\d{6}".into(),
                replacement: None,
                enabled: true,
            }],
        };
        let r = Redactor::new(policy).unwrap();
        let out = r.redact_str("acct-123456");
        assert!(out.starts_with("***REDACTED:account:HASH:"));
        assert!(out.ends_with("***"));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut policy = RedactionPolicy::builtin();
        for rule in &mut policy.rules {
            rule.enabled = false;
        }
        let r = Redactor::new(policy).unwrap();
        let text = "sk-proj-abcdefghij0123456789";
        assert_eq!(r.redact_str(text), text);
    }
}
