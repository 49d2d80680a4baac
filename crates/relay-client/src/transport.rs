use std::time::Duration;

use async_trait::async_trait;
use relay_core::{EventPayload, TransmissionError};
use reqwest::Url;

/// Browser → relay hop.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn post(&self, payload: &EventPayload) -> Result<(), TransmissionError>;
}

/// `POST <base>/<namespace>/v1/track` as JSON.
pub struct HttpTransport {
    client: reqwest::Client,
    track_url: Url,
}

pub fn track_url(base: &str, namespace: &str) -> Result<Url, TransmissionError> {
    let raw = format!(
        "{}/{}/v1/track",
        base.trim_end_matches('/'),
        namespace.trim_matches('/')
    );
    Url::parse(&raw).map_err(|e| TransmissionError::InvalidEndpoint(format!("{raw}: {e}")))
}

impl HttpTransport {
    pub fn new(
        base: &str,
        namespace: &str,
        user_agent: Option<&str>,
    ) -> Result<Self, TransmissionError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| TransmissionError::Network(e.to_string()))?;
        Ok(Self {
            client,
            track_url: track_url(base, namespace)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.track_url
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn post(&self, payload: &EventPayload) -> Result<(), TransmissionError> {
        let response = self
            .client
            .post(self.track_url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| TransmissionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransmissionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
