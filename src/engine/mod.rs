//! Boundary to the execution engine that actually runs probes.
//!
//! The engine is reached through command calls (request/response, may fail) and a
//! per-kind event subscription that pushes results followed by a completion signal.

#[cfg(test)]
pub(crate) mod scripted;
mod simulated;
mod targets;

pub use simulated::{SimulatedEngine, SimulationConfig};
pub use targets::TargetCatalog;

use crate::model::{EngineEvent, ProbeKind, ProbeParams, SessionId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receiving side of one event subscription. Dropping it unsubscribes.
pub type EventStream = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Rejected(String),

    #[error("no {0} run is active")]
    Idle(ProbeKind),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ProbeEngine: Send + Sync + 'static {
    /// Start a run for `kind` and return the session id stamped on its events.
    async fn start(&self, kind: ProbeKind, params: &ProbeParams) -> Result<SessionId, EngineError>;

    /// Ask the engine to stop the active run of `kind`. Best effort.
    async fn cancel(&self, kind: ProbeKind) -> Result<(), EngineError>;

    /// Session id of the most recent run of `kind`, 0 if none ever started.
    async fn current_session(&self, kind: ProbeKind) -> Result<SessionId, EngineError>;

    /// Check whether `params` is an acceptable target for `kind`.
    async fn validate(&self, kind: ProbeKind, params: &ProbeParams) -> Result<bool, EngineError>;

    /// Open a subscription to the result and completion events of `kind`.
    fn subscribe(&self, kind: ProbeKind) -> EventStream;
}
