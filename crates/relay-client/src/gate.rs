use std::sync::Arc;
use std::time::Duration;

use relay_core::{ClientConfig, CmpTracking, ConsentDecision, ConsentError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::widget::{ConsentWidget, WidgetBinding};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Polling cadence for the consent widget.
#[derive(Clone, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    /// Give up after this long. `None` waits for an answer indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Handle on one flow's polling task. Clear it once the decision is consumed.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn clear(self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A decision plus the poll handle that produced it (none when tracking is disabled).
#[derive(Debug)]
pub struct ResolvedConsent {
    pub decision: ConsentDecision,
    pub poll: Option<PollHandle>,
}

impl ResolvedConsent {
    pub fn release(self) -> ConsentDecision {
        if let Some(poll) = self.poll {
            poll.clear();
        }
        self.decision
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RejectedConsent {
    #[source]
    pub error: ConsentError,
    pub poll: Option<PollHandle>,
}

impl RejectedConsent {
    fn without_poll(error: ConsentError) -> Self {
        Self { error, poll: None }
    }

    pub fn release(self) -> ConsentError {
        if let Some(poll) = self.poll {
            poll.clear();
        }
        self.error
    }
}

/// Resolves whether tracking (and cookie persistence) is permitted.
#[derive(Clone)]
pub struct ConsentGate {
    tracking: CmpTracking,
    widget: Option<Arc<dyn ConsentWidget>>,
    poll: PollConfig,
}

impl ConsentGate {
    /// Gate for one of the widget-free or widget-backed modes.
    ///
    /// Fails when the bound widget is not the one the configuration names.
    pub fn new(
        config: &ClientConfig,
        binding: Option<WidgetBinding>,
        poll: PollConfig,
    ) -> Result<Self, ConsentError> {
        if let (Some(configured), Some(binding)) = (config.cmp_provider, binding.as_ref()) {
            if configured != binding.provider() {
                return Err(ConsentError::ProviderMismatch {
                    configured,
                    bound: binding.provider(),
                });
            }
        }
        Ok(Self {
            tracking: config.cmp_tracking,
            widget: binding.map(WidgetBinding::into_widget),
            poll,
        })
    }

    pub async fn resolve(&self) -> Result<ResolvedConsent, RejectedConsent> {
        if !self.tracking.uses_widget() {
            return Ok(ResolvedConsent {
                decision: ConsentDecision::unconditional(),
                poll: None,
            });
        }

        let widget = self
            .widget
            .clone()
            .ok_or_else(|| RejectedConsent::without_poll(ConsentError::WidgetUnavailable))?;

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(poll_widget(
            widget,
            self.tracking,
            self.poll.clone(),
            cancel.clone(),
            tx,
        ));
        let handle = PollHandle { cancel, task };

        match rx.await {
            Ok(Ok(decision)) => Ok(ResolvedConsent {
                decision,
                poll: Some(handle),
            }),
            Ok(Err(error)) => Err(RejectedConsent {
                error,
                poll: Some(handle),
            }),
            Err(_) => Err(RejectedConsent {
                error: ConsentError::Cancelled,
                poll: Some(handle),
            }),
        }
    }
}

/// Check the widget on every tick until it reports an answer.
///
/// The first check happens one interval after start. A widget error or the
/// timeout cancels the token before reporting, so no later tick can resolve.
async fn poll_widget(
    widget: Arc<dyn ConsentWidget>,
    mode: CmpTracking,
    config: PollConfig,
    cancel: CancellationToken,
    tx: oneshot::Sender<Result<ConsentDecision, ConsentError>>,
) {
    let start = Instant::now();
    let deadline = config.timeout.map(|t| start + t);
    let mut ticker = interval_at(start + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if tx.is_closed() {
            debug!("consent poll abandoned by caller");
            return;
        }

        match check_widget(widget.as_ref(), mode) {
            Ok(Some(decision)) => {
                debug!(consent = decision.consent, cookieless = decision.cookieless, "consent answered");
                let _ = tx.send(Ok(decision));
                return;
            }
            Ok(None) => {}
            Err(e) => {
                cancel.cancel();
                let _ = tx.send(Err(e));
                return;
            }
        }

        if let (Some(deadline), Some(timeout)) = (deadline, config.timeout) {
            if Instant::now() >= deadline {
                cancel.cancel();
                let _ = tx.send(Err(ConsentError::Timeout(timeout)));
                return;
            }
        }
    }
}

fn check_widget(
    widget: &dyn ConsentWidget,
    mode: CmpTracking,
) -> Result<Option<ConsentDecision>, ConsentError> {
    if !widget.has_answered()? {
        return Ok(None);
    }
    let granted = widget.has_consented_to_analytics()?;
    Ok(Some(ConsentDecision::from_answer(granted, mode)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::{CookiehubApi, PresetAnswer};
    use relay_core::CmpProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers after `answer_after` checks; counts every check.
    struct ScriptedHub {
        answer_after: usize,
        analytics: bool,
        fail: bool,
        checks: AtomicUsize,
    }

    impl ScriptedHub {
        fn new(answer_after: usize, analytics: bool) -> Arc<Self> {
            Arc::new(Self {
                answer_after,
                analytics,
                fail: false,
                checks: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer_after: 0,
                analytics: false,
                fail: true,
                checks: AtomicUsize::new(0),
            })
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl CookiehubApi for ScriptedHub {
        fn has_answered(&self) -> Result<bool, ConsentError> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ConsentError::WidgetAccess("cookiehub is not defined".into()));
            }
            Ok(n > self.answer_after)
        }

        fn has_consented(&self, _category: &str) -> Result<bool, ConsentError> {
            Ok(self.analytics)
        }
    }

    fn config(mode: CmpTracking) -> ClientConfig {
        ClientConfig {
            cmp_provider: Some(CmpProvider::Cookiehub),
            cmp_tracking: mode,
            ..Default::default()
        }
    }

    fn gate(mode: CmpTracking, hub: Arc<ScriptedHub>, poll: PollConfig) -> ConsentGate {
        ConsentGate::new(&config(mode), Some(WidgetBinding::Cookiehub(hub)), poll).unwrap()
    }

    #[tokio::test]
    async fn disabled_resolves_immediately_without_widget() {
        let hub = ScriptedHub::new(0, false);
        let gate = gate(CmpTracking::Disable, hub.clone(), PollConfig::default());

        let resolved = gate.resolve().await.unwrap();
        assert_eq!(resolved.decision, ConsentDecision::unconditional());
        assert!(resolved.poll.is_none());
        assert_eq!(hub.checks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_answered() {
        let hub = ScriptedHub::new(2, true);
        let gate = gate(CmpTracking::Normal, hub.clone(), PollConfig::default());

        let started = Instant::now();
        let resolved = gate.resolve().await.unwrap();
        assert_eq!(resolved.decision, ConsentDecision::unconditional());
        assert_eq!(hub.checks(), 3);
        assert!(started.elapsed() >= Duration::from_millis(6000));

        let poll = resolved.poll.unwrap();
        poll.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn hybrid_refusal_is_cookieless() {
        let gate = gate(CmpTracking::Hybrid, ScriptedHub::new(0, false), PollConfig::default());
        let decision = gate.resolve().await.unwrap().release();
        assert!(decision.consent);
        assert!(decision.cookieless);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_refusal_denies() {
        let gate = gate(CmpTracking::Normal, ScriptedHub::new(0, false), PollConfig::default());
        let decision = gate.resolve().await.unwrap().release();
        assert!(!decision.consent);
        assert!(!decision.cookieless);
    }

    #[tokio::test(start_paused = true)]
    async fn widget_error_rejects_and_cancels_interval() {
        let hub = ScriptedHub::failing();
        let gate = gate(CmpTracking::Normal, hub.clone(), PollConfig::default());

        let rejected = gate.resolve().await.unwrap_err();
        assert!(matches!(rejected.error, ConsentError::WidgetAccess(_)));
        let poll = rejected.poll.as_ref().unwrap();
        assert!(poll.is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hub.checks(), 1);
        rejected.release();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects() {
        let hub = ScriptedHub::new(usize::MAX, true);
        let poll = PollConfig {
            interval: Duration::from_millis(2000),
            timeout: Some(Duration::from_millis(5000)),
        };
        let gate = gate(CmpTracking::Normal, hub.clone(), poll);

        let err = gate.resolve().await.unwrap_err().release();
        assert_eq!(err, ConsentError::Timeout(Duration::from_millis(5000)));
        assert_eq!(hub.checks(), 3);
    }

    #[tokio::test]
    async fn widget_mode_without_binding_is_rejected() {
        let gate = ConsentGate::new(&config(CmpTracking::Hybrid), None, PollConfig::default()).unwrap();
        let rejected = gate.resolve().await.unwrap_err();
        assert_eq!(rejected.error, ConsentError::WidgetUnavailable);
        assert!(rejected.poll.is_none());
    }

    #[test]
    fn mismatched_binding_is_refused() {
        let binding = PresetAnswer { analytics: true }.binding(CmpProvider::Cookiebot);
        let err = ConsentGate::new(&config(CmpTracking::Normal), Some(binding), PollConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConsentError::ProviderMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_flows_own_their_intervals() {
        let hub = ScriptedHub::new(0, true);
        let gate = gate(CmpTracking::Normal, hub.clone(), PollConfig::default());

        let (a, b) = tokio::join!(gate.resolve(), gate.resolve());
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(hub.checks(), 2);

        a.release();
        let b_poll = b.poll.unwrap();
        assert!(!b_poll.is_cancelled());
        b_poll.clear();
    }
}
