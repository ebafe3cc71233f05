use crate::calc::{LiteralPolicy, DEFAULT_PASS_THRESHOLD, SCORE_MAX, SCORE_MIN};
use crate::db;
use crate::entries::BULK_MAX_ITEMS;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "GRADEBOOKD_WORKSPACE";
pub const ENV_LOG: &str = "GRADEBOOKD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(ENV_LOG)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self {
            workspace,
            log_filter,
        }
    }
}

pub const GRADING_SETTINGS_KEY: &str = "setup.grading";

/// Persisted `grading` setup section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingSettings {
    pub pass_threshold: f64,
    pub legacy_literal_policy: LiteralPolicy,
    pub bulk_max_items: usize,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            legacy_literal_policy: LiteralPolicy::Ad18,
            bulk_max_items: BULK_MAX_ITEMS,
        }
    }
}

impl GradingSettings {
    pub fn to_json(self) -> Value {
        json!({
            "passThreshold": self.pass_threshold,
            "legacyLiteralPolicy": self.legacy_literal_policy.as_str(),
            "bulkMaxItems": self.bulk_max_items,
        })
    }

    /// Applies a patch object. Unknown keys and invalid values fail the
    /// whole patch.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = *self;
        for (k, v) in patch {
            match k.as_str() {
                "passThreshold" => {
                    let Some(n) = v.as_f64() else {
                        return Err("passThreshold must be a number".to_string());
                    };
                    if !(SCORE_MIN..=SCORE_MAX).contains(&n) {
                        return Err("passThreshold must be between 0 and 20".to_string());
                    }
                    next.pass_threshold = n;
                }
                "legacyLiteralPolicy" => {
                    let Some(policy) = v.as_str().and_then(LiteralPolicy::parse) else {
                        return Err("legacyLiteralPolicy must be 'ad17' or 'ad18'".to_string());
                    };
                    next.legacy_literal_policy = policy;
                }
                "bulkMaxItems" => {
                    let Some(n) = v.as_u64() else {
                        return Err("bulkMaxItems must be a positive integer".to_string());
                    };
                    if n == 0 || n > BULK_MAX_ITEMS as u64 {
                        return Err(format!("bulkMaxItems must be between 1 and {}", BULK_MAX_ITEMS));
                    }
                    next.bulk_max_items = n as usize;
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        *self = next;
        Ok(())
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = Self::default();
        if let Some(saved) = db::settings_get_json(conn, GRADING_SETTINGS_KEY)? {
            if let Some(obj) = saved.as_object() {
                // Malformed historical values fall back to defaults.
                if let Err(e) = current.merge_patch(obj) {
                    tracing::warn!(error = %e, "ignoring stored grading settings");
                }
            }
        }
        Ok(current)
    }

    pub fn save(self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, GRADING_SETTINGS_KEY, &self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_lookup_defaults_and_trims() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.log_filter, "info");

        let cfg = Config::from_lookup(|k| match k {
            ENV_WORKSPACE => Some(" /tmp/gb ".to_string()),
            ENV_LOG => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/gb")));
        assert_eq!(cfg.log_filter, "debug");
    }

    #[test]
    fn grading_patch_is_all_or_nothing() {
        let mut s = GradingSettings::default();
        let patch = json!({ "passThreshold": 12.5, "legacyLiteralPolicy": "ad17" });
        s.merge_patch(patch.as_object().unwrap()).unwrap();
        assert_eq!(s.pass_threshold, 12.5);
        assert_eq!(s.legacy_literal_policy, LiteralPolicy::Ad17);

        let bad = json!({ "passThreshold": 10.0, "bulkMaxItems": 0 });
        assert!(s.merge_patch(bad.as_object().unwrap()).is_err());
        assert_eq!(s.pass_threshold, 12.5);

        let unknown = json!({ "colour": "red" });
        assert!(s.merge_patch(unknown.as_object().unwrap()).is_err());
    }
}
