//! Test double that records commands and lets tests push arbitrary events.

use super::{EngineError, EventStream, ProbeEngine};
use crate::model::{EngineEvent, ProbeKind, ProbeParams, SessionId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(ProbeKind, ProbeParams),
    Cancel(ProbeKind),
    CurrentSession(ProbeKind),
    Validate(ProbeKind, ProbeParams),
}

#[derive(Default)]
struct Inner {
    commands: Vec<Command>,
    start_replies: VecDeque<Result<SessionId, EngineError>>,
    next_session: SessionId,
    current: SessionId,
    cancel_reply: Option<EngineError>,
    validate_reply: Option<Result<bool, EngineError>>,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
    subscribe_calls: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply for the next start command. Without one, ids count up from 1.
    pub fn reply_to_start(&self, reply: Result<SessionId, EngineError>) {
        self.inner.lock().unwrap().start_replies.push_back(reply);
    }

    pub fn fail_cancel_with(&self, err: EngineError) {
        self.inner.lock().unwrap().cancel_reply = Some(err);
    }

    pub fn reply_to_validate(&self, reply: Result<bool, EngineError>) {
        self.inner.lock().unwrap().validate_reply = Some(reply);
    }

    pub fn set_current_session(&self, id: SessionId) {
        self.inner.lock().unwrap().current = id;
    }

    pub fn push(&self, event: EngineEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().unwrap().subscribe_calls
    }

    pub fn open_subscriptions(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

#[async_trait]
impl ProbeEngine for ScriptedEngine {
    async fn start(&self, kind: ProbeKind, params: &ProbeParams) -> Result<SessionId, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(Command::Start(kind, params.clone()));
        let reply = match inner.start_replies.pop_front() {
            Some(r) => r,
            None => {
                inner.next_session += 1;
                Ok(inner.next_session)
            }
        };
        if let Ok(id) = reply {
            inner.current = id;
        }
        reply
    }

    async fn cancel(&self, kind: ProbeKind) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(Command::Cancel(kind));
        match inner.cancel_reply.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn current_session(&self, kind: ProbeKind) -> Result<SessionId, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(Command::CurrentSession(kind));
        Ok(inner.current)
    }

    async fn validate(&self, kind: ProbeKind, params: &ProbeParams) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(Command::Validate(kind, params.clone()));
        inner.validate_reply.clone().unwrap_or(Ok(true))
    }

    fn subscribe(&self, _kind: ProbeKind) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribe_calls += 1;
        inner.subscribers.push(tx);
        rx
    }
}
