pub mod config;
pub mod consent;
pub mod errors;
pub mod ids;
pub mod payload;
pub mod session;

pub use config::{ClientBootstrap, ClientConfig, SameSitePolicy, TrackingConfiguration};
pub use consent::{CmpProvider, CmpTracking, ConsentDecision};
pub use errors::{ConsentError, TransmissionError};
pub use ids::{ClientIdentity, FlowId, RequestId, SessionToken};
pub use payload::EventPayload;
pub use session::SessionState;
