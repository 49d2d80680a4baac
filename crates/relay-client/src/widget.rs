use std::sync::Arc;

use relay_core::{CmpProvider, ConsentError};

/// The two questions the consent gate asks of whichever widget is installed.
///
/// Errors mean the widget could not be read at all (not loaded, threw, ...).
pub trait ConsentWidget: Send + Sync {
    fn provider(&self) -> CmpProvider;

    /// Has the visitor answered the consent prompt yet?
    fn has_answered(&self) -> Result<bool, ConsentError>;

    /// Did the visitor allow analytics?
    fn has_consented_to_analytics(&self) -> Result<bool, ConsentError>;
}

/// Raw Cookiehub surface (`cookiehub.hasAnswered()`, `cookiehub.hasConsented(category)`).
pub trait CookiehubApi: Send + Sync {
    fn has_answered(&self) -> Result<bool, ConsentError>;
    fn has_consented(&self, category: &str) -> Result<bool, ConsentError>;
}

/// Snapshot of the Cookiebot global.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CookiebotState {
    pub has_response: bool,
    pub consented: bool,
    pub marketing: bool,
    pub statistics: bool,
}

pub trait CookiebotApi: Send + Sync {
    fn state(&self) -> Result<CookiebotState, ConsentError>;
}

const ANALYTICS_CATEGORY: &str = "analytics";

pub struct Cookiehub {
    api: Arc<dyn CookiehubApi>,
}

impl Cookiehub {
    pub fn new(api: Arc<dyn CookiehubApi>) -> Self {
        Self { api }
    }
}

impl ConsentWidget for Cookiehub {
    fn provider(&self) -> CmpProvider {
        CmpProvider::Cookiehub
    }

    fn has_answered(&self) -> Result<bool, ConsentError> {
        self.api.has_answered()
    }

    fn has_consented_to_analytics(&self) -> Result<bool, ConsentError> {
        self.api.has_consented(ANALYTICS_CATEGORY)
    }
}

pub struct Cookiebot {
    api: Arc<dyn CookiebotApi>,
}

impl Cookiebot {
    pub fn new(api: Arc<dyn CookiebotApi>) -> Self {
        Self { api }
    }
}

impl ConsentWidget for Cookiebot {
    fn provider(&self) -> CmpProvider {
        CmpProvider::Cookiebot
    }

    fn has_answered(&self) -> Result<bool, ConsentError> {
        Ok(self.api.state()?.has_response)
    }

    // Cookiebot has no analytics category; statistics plus marketing stands in for it.
    fn has_consented_to_analytics(&self) -> Result<bool, ConsentError> {
        let state = self.api.state()?;
        Ok(state.consented || (state.marketing && state.statistics))
    }
}

/// Host-provided access to the installed widget.
#[derive(Clone)]
pub enum WidgetBinding {
    Cookiehub(Arc<dyn CookiehubApi>),
    Cookiebot(Arc<dyn CookiebotApi>),
}

impl WidgetBinding {
    pub fn provider(&self) -> CmpProvider {
        match self {
            Self::Cookiehub(_) => CmpProvider::Cookiehub,
            Self::Cookiebot(_) => CmpProvider::Cookiebot,
        }
    }

    pub fn into_widget(self) -> Arc<dyn ConsentWidget> {
        match self {
            Self::Cookiehub(api) => Arc::new(Cookiehub::new(api)),
            Self::Cookiebot(api) => Arc::new(Cookiebot::new(api)),
        }
    }
}

/// A visitor answer fixed up front, for headless hosts (CLI, replay tools)
/// that have no interactive widget but still honor a recorded decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresetAnswer {
    pub analytics: bool,
}

impl CookiehubApi for PresetAnswer {
    fn has_answered(&self) -> Result<bool, ConsentError> {
        Ok(true)
    }

    fn has_consented(&self, category: &str) -> Result<bool, ConsentError> {
        Ok(category == ANALYTICS_CATEGORY && self.analytics)
    }
}

impl CookiebotApi for PresetAnswer {
    fn state(&self) -> Result<CookiebotState, ConsentError> {
        Ok(CookiebotState {
            has_response: true,
            consented: self.analytics,
            marketing: self.analytics,
            statistics: self.analytics,
        })
    }
}

impl PresetAnswer {
    /// Bind this answer behind the given provider's API.
    pub fn binding(self, provider: CmpProvider) -> WidgetBinding {
        match provider {
            CmpProvider::Cookiehub => WidgetBinding::Cookiehub(Arc::new(self)),
            CmpProvider::Cookiebot => WidgetBinding::Cookiebot(Arc::new(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hub {
        answered: bool,
        categories: Vec<&'static str>,
    }

    impl CookiehubApi for Hub {
        fn has_answered(&self) -> Result<bool, ConsentError> {
            Ok(self.answered)
        }

        fn has_consented(&self, category: &str) -> Result<bool, ConsentError> {
            Ok(self.categories.contains(&category))
        }
    }

    struct Bot(CookiebotState);

    impl CookiebotApi for Bot {
        fn state(&self) -> Result<CookiebotState, ConsentError> {
            Ok(self.0)
        }
    }

    #[test]
    fn cookiehub_asks_for_analytics_category() {
        let hub = Cookiehub::new(Arc::new(Hub {
            answered: true,
            categories: vec!["marketing"],
        }));
        assert!(hub.has_answered().unwrap());
        assert!(!hub.has_consented_to_analytics().unwrap());

        let hub = Cookiehub::new(Arc::new(Hub {
            answered: true,
            categories: vec!["analytics"],
        }));
        assert!(hub.has_consented_to_analytics().unwrap());
    }

    #[test]
    fn cookiebot_needs_marketing_and_statistics() {
        let partial = Cookiebot::new(Arc::new(Bot(CookiebotState {
            has_response: true,
            statistics: true,
            ..Default::default()
        })));
        assert!(!partial.has_consented_to_analytics().unwrap());

        let both = Cookiebot::new(Arc::new(Bot(CookiebotState {
            has_response: true,
            statistics: true,
            marketing: true,
            ..Default::default()
        })));
        assert!(both.has_consented_to_analytics().unwrap());

        let all = Cookiebot::new(Arc::new(Bot(CookiebotState {
            has_response: true,
            consented: true,
            ..Default::default()
        })));
        assert!(all.has_consented_to_analytics().unwrap());
    }

    #[test]
    fn cookiebot_answered_follows_has_response() {
        let pending = Cookiebot::new(Arc::new(Bot(CookiebotState::default())));
        assert!(!pending.has_answered().unwrap());
    }

    #[test]
    fn preset_binding_matches_provider() {
        for provider in [CmpProvider::Cookiehub, CmpProvider::Cookiebot] {
            let binding = PresetAnswer { analytics: true }.binding(provider);
            assert_eq!(binding.provider(), provider);
            let widget = binding.into_widget();
            assert_eq!(widget.provider(), provider);
            assert!(widget.has_answered().unwrap());
            assert!(widget.has_consented_to_analytics().unwrap());
        }
    }
}
