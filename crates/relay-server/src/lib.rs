pub mod cookies;
pub mod relay;
pub mod server;

pub use cookies::CookieManager;
pub use relay::{build_query, InboundEvent, Relay, TrackOutcome};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
