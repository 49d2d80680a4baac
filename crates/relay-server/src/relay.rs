use std::time::Duration;

use axum::http::header::{ACCEPT_ENCODING, CONTENT_TYPE, COOKIE, USER_AGENT};
use axum_extra::extract::cookie::CookieJar;
use relay_core::{ClientIdentity, ConsentDecision, EventPayload, TrackingConfiguration, TransmissionError};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use crate::cookies::CookieManager;

const PREVIEW_HEADER: &str = "x-gtm-server-preview";
const OUTBOUND_ACCEPT_ENCODING: &str = "deflate, gzip, br";
const OUTBOUND_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const RELAY_KEYS: [&str; 3] = ["tid", "cid", "_dbg"];

/// One inbound `track` call.
#[derive(Clone, Debug, Default)]
pub struct InboundEvent {
    pub payload: EventPayload,
    pub user_agent: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum TrackOutcome {
    /// Tracking is switched off; nothing was forwarded.
    Inactive,
    Forwarded {
        client_id: ClientIdentity,
        cookie_set: bool,
    },
    Failed {
        client_id: ClientIdentity,
        error: TransmissionError,
    },
}

/// Forwards browser events to the collection endpoint and mirrors its identity cookie.
pub struct Relay {
    config: TrackingConfiguration,
    cookies: CookieManager,
    http: reqwest::Client,
}

impl Relay {
    pub fn new(
        config: TrackingConfiguration,
        outbound_timeout: Duration,
    ) -> Result<Self, TransmissionError> {
        let http = reqwest::Client::builder()
            .timeout(outbound_timeout)
            .build()
            .map_err(|e| TransmissionError::Network(e.to_string()))?;
        Ok(Self {
            cookies: CookieManager::from_config(&config),
            config,
            http,
        })
    }

    pub fn is_active(&self) -> bool {
        self.config.active
    }

    /// Handle one event. Returns the jar to send back and what happened.
    ///
    /// Exactly one outbound call per active request. Failures are logged
    /// and reported in the outcome, never retried.
    pub async fn track(&self, event: InboundEvent, jar: CookieJar) -> (CookieJar, TrackOutcome) {
        if !self.config.active {
            debug!("tracking inactive, event dropped");
            return (jar, TrackOutcome::Inactive);
        }

        let decision = ConsentDecision {
            consent: event.payload.flag("consent"),
            cookieless: event.payload.flag("cookieless"),
        };
        // Cookieless requests neither read nor forward the identity cookie.
        let existing = if decision.allows_persistence() {
            self.cookies.inbound(&jar)
        } else {
            None
        };
        let client_id = existing.clone().unwrap_or_else(ClientIdentity::synthesize);

        let url = match self.outbound_url(&event.payload, &client_id) {
            Ok(url) => url,
            Err(error) => {
                warn!(error_kind = error.error_kind(), error = %error, "cannot build outbound request");
                return (jar, TrackOutcome::Failed { client_id, error });
            }
        };

        let mut request = self
            .http
            .get(url)
            .version(reqwest::Version::HTTP_11)
            .header(ACCEPT_ENCODING, OUTBOUND_ACCEPT_ENCODING)
            .header(CONTENT_TYPE, OUTBOUND_CONTENT_TYPE)
            .header(PREVIEW_HEADER, self.config.preview_string.as_str());
        if let Some(ua) = event.user_agent.as_deref() {
            request = request.header(USER_AGENT, ua);
        }
        if let Some(identity) = existing.as_ref() {
            request = request.header(COOKIE, format!("{}={}", self.cookies.name(), identity));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let error = TransmissionError::Network(e.to_string());
                warn!(error_kind = error.error_kind(), error = %error, "forwarding failed");
                return (jar, TrackOutcome::Failed { client_id, error });
            }
        };

        let status = response.status();
        let (jar, cookie_set) = if decision.allows_persistence() {
            let candidate = self.cookies.candidate_from_response(response.headers());
            let cookie_set = candidate.is_some() && existing.is_none();
            (self.cookies.propagate(jar, existing.as_ref(), candidate), cookie_set)
        } else {
            debug!("cookieless request, identity cookie withheld");
            (jar, false)
        };

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = TransmissionError::Status {
                status: status.as_u16(),
                body,
            };
            warn!(error_kind = error.error_kind(), status = status.as_u16(), "collection endpoint rejected event");
            return (jar, TrackOutcome::Failed { client_id, error });
        }

        info!(
            status = status.as_u16(),
            cookieless = decision.cookieless,
            cookie_set,
            "event forwarded"
        );
        (jar, TrackOutcome::Forwarded { client_id, cookie_set })
    }

    fn outbound_url(
        &self,
        payload: &EventPayload,
        client_id: &ClientIdentity,
    ) -> Result<Url, TransmissionError> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| TransmissionError::InvalidEndpoint(format!("{}: {e}", self.config.endpoint)))?;
        let query = build_query(payload, &self.config, client_id);
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
            _ => query,
        };
        url.set_query(Some(&query));
        Ok(url)
    }
}

/// Body fields followed by `tid`, `cid` and `_dbg`, form-encoded with `%20` for spaces.
pub fn build_query(
    payload: &EventPayload,
    config: &TrackingConfiguration,
    client_id: &ClientIdentity,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (key, value) in payload.iter() {
        if RELAY_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = query_value(value) {
            query.append_pair(key, &value);
        }
    }
    query.append_pair("tid", &config.measurement_id);
    query.append_pair("cid", client_id.as_str());
    query.append_pair("_dbg", if config.debug_mode { "1" } else { "0" });
    // Literal '+' is already %2B, so only spaces are rewritten.
    query.finish().replace('+', "%20")
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        nested => serde_json::to_string(nested).ok(),
    }
}
