use relay_core::{ClientBootstrap, ClientConfig, TrackingConfiguration};
use relay_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub tracking: TrackingConfiguration,
    pub bootstrap: ClientBootstrap,
    pub telemetry: TelemetryConfig,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Route prefix: the relay answers on `/<namespace>/v1/track`.
    pub namespace: String,
    /// Upper bound on the forwarded request to the collection endpoint.
    pub outbound_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            namespace: "server-side-analytics".into(),
            outbound_timeout_ms: 10_000,
        }
    }
}

impl RelaySettings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::from_parts(&self.tracking, &self.bootstrap)
    }

    /// Normalize the namespace and reject settings the relay cannot serve.
    pub fn validate(mut self) -> Result<Self> {
        let namespace = self.server.namespace.trim().trim_matches('/').to_string();
        if namespace.is_empty() {
            return Err(SettingsError::InvalidValue("server.namespace is empty".into()));
        }
        self.server.namespace = namespace;

        if self.tracking.active {
            if self.tracking.endpoint.is_empty() {
                return Err(SettingsError::InvalidValue(
                    "tracking.endpoint is required when tracking is active".into(),
                ));
            }
            url::Url::parse(&self.tracking.endpoint).map_err(|e| {
                SettingsError::InvalidValue(format!("tracking.endpoint: {e}"))
            })?;
        }

        if self.tracking.cmp_tracking.uses_widget() && self.tracking.cmp_provider.is_none() {
            return Err(SettingsError::InvalidValue(format!(
                "tracking.cmp_provider is required for cmp_tracking = {}",
                self.tracking.cmp_tracking
            )));
        }

        if self.tracking.cookie_name.is_empty() {
            return Err(SettingsError::InvalidValue("tracking.cookie_name is empty".into()));
        }

        Ok(self)
    }
}
