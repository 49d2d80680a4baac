use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of consent resolution for one event flow.
///
/// `cookieless` requests are sent without reading or writing the identity
/// cookie, whatever `consent` says.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub consent: bool,
    pub cookieless: bool,
}

impl ConsentDecision {
    /// Tracking with cookies, no questions asked.
    pub const fn unconditional() -> Self {
        Self {
            consent: true,
            cookieless: false,
        }
    }

    /// Map a visitor's answer onto a decision for the given tracking mode.
    ///
    /// A refusal in hybrid mode still transmits, but cookieless; in normal
    /// mode it suppresses transmission.
    pub fn from_answer(analytics_granted: bool, mode: CmpTracking) -> Self {
        if analytics_granted {
            return Self::unconditional();
        }
        let hybrid = mode == CmpTracking::Hybrid;
        Self {
            consent: hybrid,
            cookieless: hybrid,
        }
    }

    /// Whether the identity cookie may be read, forwarded or persisted.
    pub fn allows_persistence(&self) -> bool {
        !self.cookieless
    }
}

/// Consent management mode (`cmp_tracking`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpTracking {
    /// No consent widget; always track with cookies.
    #[default]
    Disable,
    /// Transmit only after consent is granted.
    Normal,
    /// Always transmit, cookieless unless consent is granted.
    Hybrid,
}

impl CmpTracking {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Normal => "normal",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn uses_widget(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl fmt::Display for CmpTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmpTracking {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disable" | "disabled" => Ok(Self::Disable),
            "normal" => Ok(Self::Normal),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown consent tracking mode: {other}")),
        }
    }
}

/// Third-party consent widget vendor (`cmp_provider`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpProvider {
    Cookiehub,
    Cookiebot,
}

impl CmpProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cookiehub => "cookiehub",
            Self::Cookiebot => "cookiebot",
        }
    }
}

impl fmt::Display for CmpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmpProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cookiehub" => Ok(Self::Cookiehub),
            "cookiebot" => Ok(Self::Cookiebot),
            other => Err(format!("unknown consent provider: {other}")),
        }
    }
}
