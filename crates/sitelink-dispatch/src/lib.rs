//! Command correlation and notification.
//!
//! Outbound device commands are registered with [`CommandTracker`] under a
//! generated message id before they reach the broker; asynchronous device
//! acks come back through [`ResponseDispatcher`] and are fanned out to the
//! originating tenant's WebSocket connections via [`TenantRegistry`]. Each
//! message id resolves exactly once: the first of {device response, local
//! timeout} wins and the loser is a no-op.

pub mod dispatcher;
pub mod publisher;
pub mod registry;
pub mod tracker;

pub use dispatcher::ResponseDispatcher;
pub use publisher::{CommandPublisher, OutboundPublish, PublishError};
pub use registry::{ConnId, TenantRegistry};
pub use tracker::{CommandRecord, CommandTracker, TrackerError, DEFAULT_COMMAND_TIMEOUT};
