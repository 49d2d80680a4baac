//! Client half of the relay: consent resolution, session identity and
//! event dispatch. Browser facilities (widget globals, storage, page
//! metadata, the network) are injected through traits.

pub mod client;
pub mod environment;
pub mod gate;
pub mod session;
pub mod storage;
pub mod transport;
pub mod widget;

pub use client::{EventClient, SendOutcome};
pub use environment::{BrowserEnvironment, BrowserFields, StaticEnvironment};
pub use gate::{ConsentGate, PollConfig, PollHandle, RejectedConsent, ResolvedConsent};
pub use session::SessionTracker;
pub use storage::{MemoryStorage, ScopedStorage, StorageScope};
pub use transport::{HttpTransport, RelayTransport};
pub use widget::{
    ConsentWidget, Cookiebot, CookiebotApi, CookiebotState, Cookiehub, CookiehubApi, PresetAnswer,
    WidgetBinding,
};
