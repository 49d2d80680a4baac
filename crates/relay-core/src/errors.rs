use std::time::Duration;

use crate::consent::CmpProvider;

/// Failures while resolving consent. Terminal to the flow that hit them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsentError {
    #[error("consent widget access failed: {0}")]
    WidgetAccess(String),
    #[error("no consent widget bound for consent-managed tracking")]
    WidgetUnavailable,
    #[error("consent widget {bound} does not match configured provider {configured}")]
    ProviderMismatch {
        configured: CmpProvider,
        bound: CmpProvider,
    },
    #[error("consent not answered within {0:?}")]
    Timeout(Duration),
    #[error("consent polling cancelled")]
    Cancelled,
}

impl ConsentError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::WidgetAccess(_) => "widget_access",
            Self::WidgetUnavailable => "widget_unavailable",
            Self::ProviderMismatch { .. } => "provider_mismatch",
            Self::Timeout(_) => "consent_timeout",
            Self::Cancelled => "consent_cancelled",
        }
    }
}

/// Failures on either hop (browser to relay, relay to collection endpoint).
/// Logged, never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransmissionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransmissionError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Status { .. } => "status_error",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }

    /// Non-2xx responses become `Status`, everything else is not an error.
    pub fn from_status(status: u16, body: String) -> Option<Self> {
        (!(200..300).contains(&status)).then_some(Self::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_error_kinds() {
        assert_eq!(ConsentError::WidgetAccess("boom".into()).error_kind(), "widget_access");
        assert_eq!(ConsentError::Timeout(Duration::from_secs(1)).error_kind(), "consent_timeout");
        assert_eq!(ConsentError::WidgetUnavailable.error_kind(), "widget_unavailable");
    }

    #[test]
    fn mismatch_display_names_both_providers() {
        let err = ConsentError::ProviderMismatch {
            configured: CmpProvider::Cookiebot,
            bound: CmpProvider::Cookiehub,
        };
        let msg = err.to_string();
        assert!(msg.contains("cookiebot"));
        assert!(msg.contains("cookiehub"));
    }

    #[test]
    fn from_status_mapping() {
        assert!(TransmissionError::from_status(200, String::new()).is_none());
        assert!(TransmissionError::from_status(204, String::new()).is_none());
        let err = TransmissionError::from_status(502, "bad gateway".into()).unwrap();
        assert_eq!(err.error_kind(), "status_error");
        assert!(err.to_string().contains("502"));
    }
}
