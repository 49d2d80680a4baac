//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `RELAY_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file means defaults. Invalid JSON or a settings document
/// that fails validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()
}

fn read_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_env_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("RELAY_PORT", |s| parse_u64_range(s, 1, 65535)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("RELAY_NAMESPACE") {
        settings.server.namespace = v;
    }

    // ── Tracking ────────────────────────────────────────────────────
    if let Some(v) = env.parsed("RELAY_ACTIVE", parse_bool) {
        settings.tracking.active = v;
    }
    if let Some(v) = env.string("RELAY_ENDPOINT") {
        settings.tracking.endpoint = v;
    }
    if let Some(v) = env.string("RELAY_MEASUREMENT_ID") {
        settings.tracking.measurement_id = v;
    }
    if let Some(v) = env.string("RELAY_COOKIE_NAME") {
        settings.tracking.cookie_name = v;
    }
    if let Some(v) = env.parsed("RELAY_COOKIE_EXPIRES", |s| parse_u64_range(s, 0, u32::MAX as u64)) {
        settings.tracking.cookie_expires_seconds = v;
    }
    if let Some(v) = env.parsed("RELAY_COOKIE_SAMESITE", |s| s.parse().ok()) {
        settings.tracking.cookie_samesite = v;
    }
    if let Some(v) = env.parsed("RELAY_CMP_TRACKING", |s| s.parse().ok()) {
        settings.tracking.cmp_tracking = v;
    }
    if let Some(v) = env.parsed("RELAY_CMP_PROVIDER", |s| s.parse().ok()) {
        settings.tracking.cmp_provider = Some(v);
    }
    if let Some(v) = env.parsed("RELAY_DEBUG_MODE", parse_bool) {
        settings.tracking.debug_mode = v;
    }
    if let Some(v) = env.string("RELAY_PREVIEW_STRING") {
        settings.tracking.preview_string = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{CmpProvider, CmpTracking, SameSitePolicy};
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, 9091);
        assert_eq!(settings.tracking.cookie_name, "FPID");
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            json!({
                "server": {"port": 8080},
                "tracking": {
                    "active": "1",
                    "endpoint": "https://sst.example.com/g/collect",
                    "measurement_id": "G-XYZ",
                    "cookie_samesite": "None"
                }
            })
            .to_string(),
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.namespace, "server-side-analytics");
        assert!(settings.tracking.active);
        assert_eq!(settings.tracking.measurement_id, "G-XYZ");
        assert_eq!(settings.tracking.cookie_samesite, SameSitePolicy::None);
        assert_eq!(settings.tracking.cookie_expires_seconds, 63_072_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_file_layer(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = RelaySettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("RELAY_PORT", "7000"),
                ("RELAY_ACTIVE", "yes"),
                ("RELAY_CMP_TRACKING", "hybrid"),
                ("RELAY_CMP_PROVIDER", "cookiebot"),
                ("RELAY_COOKIE_SAMESITE", "lax"),
                ("RELAY_PREVIEW_STRING", "ZW52LTV8"),
            ]),
        );
        assert_eq!(settings.server.port, 7000);
        assert!(settings.tracking.active);
        assert_eq!(settings.tracking.cmp_tracking, CmpTracking::Hybrid);
        assert_eq!(settings.tracking.cmp_provider, Some(CmpProvider::Cookiebot));
        assert_eq!(settings.tracking.cookie_samesite, SameSitePolicy::Lax);
        assert_eq!(settings.tracking.preview_string, "ZW52LTV8");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[("RELAY_PORT", "99999"), ("RELAY_DEBUG_MODE", "maybe")]),
        );
        assert_eq!(settings.server.port, 9091);
        assert!(!settings.tracking.debug_mode);
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": {"b": 1, "c": 2}}), json!({"a": {"b": null, "c": 3}}));
        assert_eq!(merged, json!({"a": {"b": 1, "c": 3}}));
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("sure"), None);
        assert_eq!(parse_u64_range("42", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
    }
}
