//! Tracks which run is current for one view and issues cancellation to the engine.

use crate::engine::{EngineError, ProbeEngine};
use crate::model::{ProbeKind, ProbeParams, SessionId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    Bound(SessionId),
}

pub struct SessionRegistry<E> {
    engine: Arc<E>,
    kind: ProbeKind,
    binding: Binding,
}

impl<E: ProbeEngine> SessionRegistry<E> {
    pub fn new(engine: Arc<E>, kind: ProbeKind) -> Self {
        Self {
            engine,
            kind,
            binding: Binding::Unbound,
        }
    }

    /// Issue the start command and bind the id it returns. On failure the registry stays
    /// Unbound.
    pub async fn begin_session(&mut self, params: &ProbeParams) -> Result<SessionId, EngineError> {
        let id = self.engine.start(self.kind, params).await?;
        self.binding = Binding::Bound(id);
        tracing::info!(kind = %self.kind, session_id = id, "session bound");
        Ok(id)
    }

    /// Best-effort stop of whatever the engine is running for this kind. Errors are
    /// logged, never returned. Unbinds if a session was bound.
    pub async fn cancel_session(&mut self) {
        if let Err(e) = self.engine.cancel(self.kind).await {
            match e {
                EngineError::Idle(_) => {
                    tracing::debug!(kind = %self.kind, "cancel: engine already idle")
                }
                other => tracing::warn!(kind = %self.kind, error = %other, "cancel failed"),
            }
        }
        if let Binding::Bound(id) = self.binding {
            tracing::debug!(kind = %self.kind, session_id = id, "session unbound");
            self.binding = Binding::Unbound;
        }
    }

    /// Adopt the engine's current session without starting anything. Used after a remount.
    pub async fn resync(&mut self) {
        match self.engine.current_session(self.kind).await {
            Ok(0) => {}
            Ok(id) => {
                self.binding = Binding::Bound(id);
                tracing::debug!(kind = %self.kind, session_id = id, "resynced to engine session");
            }
            Err(e) => tracing::warn!(kind = %self.kind, error = %e, "resync failed"),
        }
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        match self.binding {
            Binding::Bound(id) => Some(id),
            Binding::Unbound => None,
        }
    }

    #[cfg(test)]
    pub fn binding(&self) -> Binding {
        self.binding
    }
}
