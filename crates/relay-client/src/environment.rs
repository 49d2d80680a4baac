use relay_core::{ConsentDecision, EventPayload};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u8 = 2;
pub const DATA_SOURCE: &str = "web";

/// Read access to the page the Event Client runs in.
pub trait BrowserEnvironment: Send + Sync {
    fn language(&self) -> String;
    fn screen_size(&self) -> (u32, u32);
    fn url(&self) -> String;
    fn title(&self) -> String;
    fn domain(&self) -> String;
}

/// Fixed environment description for headless hosts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticEnvironment {
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub url: String,
    pub title: String,
    pub domain: String,
    /// Sent by the transport, not part of the event.
    pub user_agent: Option<String>,
}

impl BrowserEnvironment for StaticEnvironment {
    fn language(&self) -> String {
        self.language.clone()
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn domain(&self) -> String {
        self.domain.clone()
    }
}

/// Browser fingerprint fields, in their wire names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrowserFields {
    pub v: u8,
    pub ul: String,
    pub sr: String,
    pub dl: String,
    pub dt: String,
    pub dh: String,
    pub ds: &'static str,
    pub cookieless: bool,
    pub consent: bool,
}

impl BrowserFields {
    pub fn capture(env: &dyn BrowserEnvironment, decision: ConsentDecision) -> Self {
        let (width, height) = env.screen_size();
        Self {
            v: PROTOCOL_VERSION,
            ul: env.language(),
            sr: format!("{width}x{height}"),
            dl: env.url(),
            dt: env.title(),
            dh: env.domain(),
            ds: DATA_SOURCE,
            cookieless: decision.cookieless,
            consent: decision.consent,
        }
    }

    pub fn to_payload(&self) -> EventPayload {
        EventPayload::from_serializable(self).unwrap_or_default()
    }
}
