use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Correlation ids for log records, never sent on the wire.
branded_id!(FlowId, "flow");
branded_id!(RequestId, "req");

const CID_RANDOM_MIN: u32 = 10_000_000;
const CID_RANDOM_MAX: u32 = 90_000_000;

/// Durable browser identity (`cid`).
///
/// Read from the identity cookie when one is present, otherwise
/// synthesized as `<unix-timestamp>.<random 8-digit integer>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity carried by an inbound cookie value. Empty values count as absent.
    pub fn from_cookie(value: Option<&str>) -> Option<Self> {
        value.filter(|v| !v.is_empty()).map(|v| Self(v.to_owned()))
    }

    pub fn synthesize() -> Self {
        let suffix = rand::thread_rng().gen_range(CID_RANDOM_MIN..=CID_RANDOM_MAX);
        Self(format!("{}.{}", chrono::Utc::now().timestamp(), suffix))
    }

    /// Cookie value if present and non-empty, otherwise a fresh identity.
    pub fn resolve(cookie: Option<&str>) -> Self {
        Self::from_cookie(cookie).unwrap_or_else(Self::synthesize)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const SESSION_TOKEN_MIN: u32 = 100_000_000;
pub const SESSION_TOKEN_MAX: u32 = 999_999_999;

/// Per-tab session token (`sid`), a random 9-digit integer.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn mint() -> Self {
        let n = rand::thread_rng().gen_range(SESSION_TOKEN_MIN..=SESSION_TOKEN_MAX);
        Self(n.to_string())
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
