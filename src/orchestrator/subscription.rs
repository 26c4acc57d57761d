//! One event subscription per mounted view, filtered by the live session binding.
//!
//! The subscription lives as long as the view, not the run: restarting re-filters against
//! the new binding instead of re-subscribing, so no events are lost between runs.

use super::classify::classify;
use super::store::AggregationStore;
use crate::engine::{EventStream, ProbeEngine};
use crate::model::{EngineEvent, ProbeKind, SessionId};

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Classified and appended to the store.
    Accepted,
    /// Completion for the bound session; `first` is false for repeats.
    Completed { first: bool },
    /// Belongs to another session, or no session is bound.
    Stale,
    /// Wrong kind or a payload shape that does not match the kind.
    Malformed,
}

#[derive(Default)]
pub struct StreamSubscription {
    stream: Option<EventStream>,
}

impl StreamSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the subscription if it is not open yet. Repeated calls keep the existing one.
    pub fn subscribe<E: ProbeEngine>(&mut self, engine: &E, kind: ProbeKind) {
        if self.stream.is_some() {
            return;
        }
        self.stream = Some(engine.subscribe(kind));
        tracing::debug!(%kind, "event subscription opened");
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.stream.is_some()
    }

    /// Wait for the next event. Pending forever when unsubscribed or when the engine
    /// dropped its side, so it can sit in a `select!` without spinning.
    pub async fn next(&mut self) -> EngineEvent {
        if let Some(stream) = self.stream.as_mut() {
            if let Some(ev) = stream.recv().await {
                return ev;
            }
            tracing::debug!("engine closed the event stream");
            self.stream = None;
        }
        futures::future::pending().await
    }

    /// Route one event through the session filter into `store`.
    pub fn dispatch(
        &self,
        event: EngineEvent,
        current: Option<SessionId>,
        store: &mut AggregationStore,
    ) -> Dispatch {
        let kind = store.kind();
        if event.kind() != kind {
            tracing::warn!(expected = %kind, got = %event.kind(), "event for another kind dropped");
            return Dispatch::Malformed;
        }
        let session_id = event.session_id();
        if current != Some(session_id) {
            tracing::debug!(
                event = event.name(),
                session_id,
                current = ?current,
                "ignoring event from stale session"
            );
            return Dispatch::Stale;
        }
        match event {
            EngineEvent::Result { outcome, .. } => match classify(&outcome, kind) {
                Some(result) => {
                    tracing::debug!(session_id, source = %result.source_id, success = result.success, "result accepted");
                    store.accept(result);
                    Dispatch::Accepted
                }
                None => {
                    tracing::warn!(%kind, session_id, "malformed payload dropped");
                    Dispatch::Malformed
                }
            },
            EngineEvent::Complete { .. } => {
                let first = store.mark_completed();
                if first {
                    tracing::info!(%kind, session_id, received = store.received_count(), "run complete");
                }
                Dispatch::Completed { first }
            }
        }
    }

    /// Drop the subscription. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
            tracing::debug!("event subscription closed");
        }
    }
}
