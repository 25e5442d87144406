//! nscabuf-gateway: buffers passive check results per service and decides
//! which of them reach the upstream monitoring system.
//!
//! Everything here is synchronous and single-writer. The runtime owns the
//! one [`Gateway`] and feeds it events in order.

pub mod flapper;
pub mod gateway;
pub mod publisher;
pub mod registry;
pub mod time_window;

pub use flapper::Flapper;
pub use gateway::{
    Decision, Gateway, GatewayStats, PushReason, ServicePhase, SilenceReason, UpstreamUpdate,
};
pub use publisher::{PublishError, UpstreamPublisher};
pub use registry::{Registry, ServiceRecord};
pub use time_window::TimeWindow;
