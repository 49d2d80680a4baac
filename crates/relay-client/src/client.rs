use std::sync::Arc;

use relay_core::{ConsentDecision, EventPayload, FlowId};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::environment::{BrowserEnvironment, BrowserFields};
use crate::gate::ConsentGate;
use crate::session::SessionTracker;
use crate::transport::RelayTransport;

/// How one event flow ended. Failures are already logged when this is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Consent was refused in normal mode; nothing left the browser.
    Suppressed,
    ConsentFailed { error_kind: &'static str },
    TransmissionFailed { error_kind: &'static str },
}

/// Composes events and hands them to the relay when consent allows.
#[derive(Clone)]
pub struct EventClient {
    gate: ConsentGate,
    sessions: SessionTracker,
    environment: Arc<dyn BrowserEnvironment>,
    transport: Arc<dyn RelayTransport>,
}

impl EventClient {
    pub fn new(
        gate: ConsentGate,
        sessions: SessionTracker,
        environment: Arc<dyn BrowserEnvironment>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        Self {
            gate,
            sessions,
            environment,
            transport,
        }
    }

    /// Run one event flow to completion. Never fails; see [`SendOutcome`].
    pub async fn send(&self, fields: EventPayload) -> SendOutcome {
        let flow_id = FlowId::new();
        let span = info_span!(
            "event_flow",
            flow_id = %flow_id,
            event_name = fields.event_name().unwrap_or("")
        );
        self.run(fields).instrument(span).await
    }

    /// Fire-and-forget variant; each call is an independent flow.
    pub fn spawn_send(&self, fields: EventPayload) -> JoinHandle<SendOutcome> {
        let client = self.clone();
        tokio::spawn(async move { client.send(fields).await })
    }

    pub async fn page_view(&self) -> SendOutcome {
        self.send(EventPayload::new().with("en", "page_view")).await
    }

    pub async fn button_click(&self, identifier: &str) -> SendOutcome {
        self.send(
            EventPayload::new()
                .with("en", "button_click")
                .with("button_name", identifier),
        )
        .await
    }

    async fn run(&self, fields: EventPayload) -> SendOutcome {
        let resolved = match self.gate.resolve().await {
            Ok(resolved) => resolved,
            Err(rejected) => {
                let error = rejected.release();
                warn!(error_kind = error.error_kind(), error = %error, "consent resolution failed");
                return SendOutcome::ConsentFailed {
                    error_kind: error.error_kind(),
                };
            }
        };

        let outcome = self.dispatch(resolved.decision, fields).await;
        resolved.release();
        outcome
    }

    async fn dispatch(&self, decision: ConsentDecision, fields: EventPayload) -> SendOutcome {
        if !decision.consent {
            debug!("consent refused, event not sent");
            return SendOutcome::Suppressed;
        }

        let mut payload = BrowserFields::capture(self.environment.as_ref(), decision).to_payload();
        payload.merge(self.sessions.current_session(decision.consent).to_payload());
        payload.merge(fields);

        match self.transport.post(&payload).await {
            Ok(()) => {
                debug!(cookieless = decision.cookieless, "event sent");
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(error_kind = e.error_kind(), error = %e, "event transmission failed");
                SendOutcome::TransmissionFailed {
                    error_kind: e.error_kind(),
                }
            }
        }
    }
}
