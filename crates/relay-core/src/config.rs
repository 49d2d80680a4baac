use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::consent::{CmpProvider, CmpTracking};

pub const DEFAULT_COOKIE_NAME: &str = "FPID";
/// Two years.
pub const DEFAULT_COOKIE_EXPIRES_SECONDS: u64 = 63_072_000;

/// `SameSite` attribute of the identity cookie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SameSitePolicy {
    Lax,
    #[default]
    Strict,
    None,
}

impl SameSitePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

impl fmt::Display for SameSitePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SameSitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lax" => Ok(Self::Lax),
            "strict" => Ok(Self::Strict),
            "none" => Ok(Self::None),
            other => Err(format!("unknown SameSite value: {other}")),
        }
    }
}

/// Relay configuration snapshot. Read-only for the relay pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfiguration {
    /// Remote collection endpoint, e.g. `https://sst.example.com/g/collect`.
    pub endpoint: String,
    pub measurement_id: String,
    pub cookie_name: String,
    pub cookie_expires_seconds: u64,
    pub cookie_samesite: SameSitePolicy,
    #[serde(deserialize_with = "deserialize_provider")]
    pub cmp_provider: Option<CmpProvider>,
    pub cmp_tracking: CmpTracking,
    #[serde(deserialize_with = "deserialize_flag")]
    pub debug_mode: bool,
    /// Value of the `X-Gtm-Server-Preview` header.
    pub preview_string: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub active: bool,
}

impl Default for TrackingConfiguration {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            measurement_id: String::new(),
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            cookie_expires_seconds: DEFAULT_COOKIE_EXPIRES_SECONDS,
            cookie_samesite: SameSitePolicy::default(),
            cmp_provider: None,
            cmp_tracking: CmpTracking::default(),
            debug_mode: false,
            preview_string: String::new(),
            active: false,
        }
    }
}

/// Page bootstrap values that only the client consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientBootstrap {
    pub tag_manager_id: String,
    pub tag_manager_url: String,
    pub timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_flag")]
    pub js_container: bool,
    pub cmp_id: String,
}

/// The configuration object handed to the Event Client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub url: String,
    pub timeout: u64,
    pub js_container: bool,
    pub cmp_provider: Option<CmpProvider>,
    pub cmp_tracking: CmpTracking,
    pub cmp_id: String,
}

impl ClientConfig {
    pub fn from_parts(tracking: &TrackingConfiguration, bootstrap: &ClientBootstrap) -> Self {
        Self {
            id: bootstrap.tag_manager_id.clone(),
            url: bootstrap.tag_manager_url.clone(),
            timeout: bootstrap.timeout_ms,
            js_container: bootstrap.js_container,
            cmp_provider: tracking.cmp_provider,
            cmp_tracking: tracking.cmp_tracking,
            cmp_id: bootstrap.cmp_id.clone(),
        }
    }
}

/// Checkbox values were historically stored as `"1"` / `""`.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(serde::de::Error::custom(format!("invalid flag value: {other}"))),
        },
        other => Err(serde::de::Error::custom(format!("invalid flag value: {other}"))),
    }
}

fn deserialize_provider<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<CmpProvider>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
