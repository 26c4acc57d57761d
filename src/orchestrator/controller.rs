//! Run lifecycle controller.
//!
//! Owns validate/cancel/start orchestration for one mounted view and publishes read-only
//! projections for presentation layers. Everything runs on one cooperative loop; the only
//! concurrency is the engine pushing events from outside.

use super::session::SessionRegistry;
use super::store::AggregationStore;
use super::subscription::{Dispatch, StreamSubscription};
use super::validate::{validate_target, ValidationError};
use crate::engine::ProbeEngine;
use crate::model::{EngineEvent, ProbeKind, ProbeParams, RunPhase, SessionId, ViewSnapshot};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// Commands emitted by presentation layers.
#[derive(Debug)]
pub(crate) enum ViewCommand {
    Run {
        params: ProbeParams,
        reply: oneshot::Sender<Result<SessionId, RunError>>,
    },
    Unmount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("a run is already in progress")]
    Busy,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} test failed to start: {message}")]
    StartFailed { kind: ProbeKind, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    /// Give up on a run after this long without an accepted event. `None` waits forever.
    pub stall_timeout: Option<Duration>,
}

/// Coordinator state for one mounted view of one probe kind.
pub struct ProbeView<E> {
    kind: ProbeKind,
    expected_count: usize,
    engine: Arc<E>,
    sessions: SessionRegistry<E>,
    subscription: StreamSubscription,
    store: AggregationStore,
    phase: RunPhase,
    target: Option<String>,
    /// Session of the latest run; outlives the registry binding so reports keep it.
    run_session: Option<SessionId>,
    last_progress: Instant,
    stall_timeout: Option<Duration>,
}

impl<E: ProbeEngine> ProbeView<E> {
    pub fn new(engine: Arc<E>, kind: ProbeKind, expected_count: usize, opts: ViewOptions) -> Self {
        Self {
            kind,
            expected_count,
            sessions: SessionRegistry::new(engine.clone(), kind),
            engine,
            subscription: StreamSubscription::new(),
            store: AggregationStore::new(kind, expected_count),
            phase: RunPhase::Idle,
            target: None,
            run_session: None,
            last_progress: Instant::now(),
            stall_timeout: opts.stall_timeout,
        }
    }

    /// Open the view's single subscription, start from a clean store, and adopt whatever
    /// session the engine reports as current.
    pub async fn mount(&mut self) {
        self.subscription.subscribe(self.engine.as_ref(), self.kind);
        self.store.reset(self.kind, self.expected_count);
        self.phase = RunPhase::Idle;
        self.sessions.resync().await;
        self.run_session = self.sessions.current_session_id();
    }

    /// Validate, cancel whatever ran before, and start a fresh run. Rejected while a run
    /// is starting or running.
    pub async fn run_or_restart(&mut self, params: ProbeParams) -> Result<SessionId, RunError> {
        if self.phase.is_running() {
            tracing::debug!(kind = %self.kind, "start ignored, run in progress");
            return Err(RunError::Busy);
        }
        let params = ProbeParams {
            target: params.target.trim().to_string(),
            ..params
        };

        self.phase = RunPhase::Validating;
        if let Err(e) = validate_target(self.engine.as_ref(), self.kind, &params).await {
            tracing::info!(kind = %self.kind, error = %e, "input rejected");
            self.phase = RunPhase::Idle;
            return Err(e.into());
        }

        self.phase = RunPhase::Starting;
        self.sessions.cancel_session().await;
        // A new store object; anything still referencing the old run cannot reach it.
        self.store = AggregationStore::new(self.kind, self.expected_count);
        self.target = Some(params.target.clone());
        self.run_session = None;

        match self.sessions.begin_session(&params).await {
            Ok(id) => {
                self.run_session = Some(id);
                self.phase = RunPhase::Running;
                self.last_progress = Instant::now();
                Ok(id)
            }
            Err(e) => {
                tracing::error!(kind = %self.kind, error = %e, "start command failed");
                self.phase = RunPhase::Failed;
                Err(RunError::StartFailed {
                    kind: self.kind,
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn next_event(&mut self) -> EngineEvent {
        self.subscription.next().await
    }

    pub fn handle_event(&mut self, event: EngineEvent) -> Dispatch {
        let current = self.sessions.current_session_id();
        let dispatch = self.subscription.dispatch(event, current, &mut self.store);
        match dispatch {
            Dispatch::Accepted => self.last_progress = Instant::now(),
            Dispatch::Completed { first: true } if self.phase == RunPhase::Running => {
                self.phase = RunPhase::Completed;
            }
            _ => {}
        }
        dispatch
    }

    /// Time out a run that has made no progress within the stall timeout. Returns true
    /// when the phase changed.
    pub async fn check_stalled(&mut self, now: Instant) -> bool {
        let Some(limit) = self.stall_timeout else {
            return false;
        };
        if self.phase != RunPhase::Running
            || now.saturating_duration_since(self.last_progress) < limit
        {
            return false;
        }
        tracing::warn!(
            kind = %self.kind,
            session_id = ?self.sessions.current_session_id(),
            received = self.store.received_count(),
            expected = self.expected_count,
            "no progress within {}, giving up on run",
            humantime::format_duration(limit)
        );
        self.phase = RunPhase::TimedOut;
        self.sessions.cancel_session().await;
        true
    }

    /// Tear the view down: a run in flight becomes Cancelled, the engine is told to stop,
    /// and the subscription is closed.
    pub async fn unmount(&mut self) {
        if self.phase.is_running() {
            self.phase = RunPhase::Cancelled;
        }
        self.sessions.cancel_session().await;
        self.subscription.unsubscribe();
    }

    #[cfg(test)]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn current_session_id(&self) -> Option<SessionId> {
        self.sessions.current_session_id()
    }

    #[cfg(test)]
    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            kind: self.kind,
            phase: self.phase,
            target: self.target.clone(),
            session_id: self.run_session,
            accepted: self.store.accepted().to_vec(),
            rejected: self.store.rejected().to_vec(),
            received_count: self.store.received_count(),
            expected_count: self.store.expected_count(),
            completed: self.store.is_completed(),
            is_running: self.phase.is_running(),
            best_result: self.store.best_result(),
            progress: self.store.progress_ratio(),
        }
    }
}

/// Drive one view until it is unmounted, publishing a snapshot after every change.
pub(crate) async fn run_view<E: ProbeEngine>(
    engine: Arc<E>,
    kind: ProbeKind,
    expected_count: usize,
    opts: ViewOptions,
    mut cmd_rx: UnboundedReceiver<ViewCommand>,
    snapshot_tx: watch::Sender<ViewSnapshot>,
) {
    let mut view = ProbeView::new(engine, kind, expected_count, opts);
    view.mount().await;
    snapshot_tx.send_replace(view.snapshot());

    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ViewCommand::Run { params, reply }) => {
                        let res = view.run_or_restart(params).await;
                        // Publish first so a caller holding the reply sees the new run.
                        snapshot_tx.send_replace(view.snapshot());
                        let _ = reply.send(res);
                        continue;
                    }
                    Some(ViewCommand::Unmount) | None => {
                        view.unmount().await;
                        snapshot_tx.send_replace(view.snapshot());
                        break;
                    }
                }
            }
            ev = view.next_event() => {
                if matches!(view.handle_event(ev), Dispatch::Stale | Dispatch::Malformed) {
                    continue;
                }
            }
            _ = watchdog.tick() => {
                if !view.check_stalled(Instant::now()).await {
                    continue;
                }
            }
        }
        snapshot_tx.send_replace(view.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::{Command, ScriptedEngine};
    use crate::engine::{EngineError, SimulatedEngine, SimulationConfig, TargetCatalog};
    use crate::model::{RawOutcome, ThroughputOutcome};
    use crate::orchestrator::build_report;
    use tokio::sync::mpsc;

    const DL: ProbeKind = ProbeKind::DownloadThroughput;

    fn download(session_id: SessionId, source: &str, success: bool, mbps: f64) -> EngineEvent {
        EngineEvent::Result {
            kind: DL,
            outcome: RawOutcome::Download(ThroughputOutcome {
                target: source.into(),
                success,
                download_speed_mbps: mbps,
                downloaded_bytes: 0,
                test_duration_seconds: 1.0,
                error_message: None,
                session_id,
            }),
        }
    }

    fn complete(session_id: SessionId) -> EngineEvent {
        EngineEvent::Complete {
            kind: DL,
            session_id,
        }
    }

    async fn mounted(engine: &Arc<ScriptedEngine>, kind: ProbeKind, expected: usize) -> ProbeView<ScriptedEngine> {
        let mut view = ProbeView::new(engine.clone(), kind, expected, ViewOptions::default());
        view.mount().await;
        view
    }

    fn params(target: &str) -> ProbeParams {
        ProbeParams::new(target)
    }

    #[tokio::test]
    async fn early_completion_keeps_partial_results() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 5).await;
        let id = view.run_or_restart(params("https://example.com/f")).await.unwrap();

        for (src, mbps) in [("a", 10.0), ("b", 30.0), ("c", 20.0)] {
            assert_eq!(view.handle_event(download(id, src, true, mbps)), Dispatch::Accepted);
        }
        view.handle_event(complete(id));

        let snap = view.snapshot();
        assert_eq!(snap.received_count, 3);
        assert!(snap.completed);
        assert_eq!(snap.phase, RunPhase::Completed);
        assert!(!snap.is_running);
        let best = snap.best_result.unwrap();
        assert_eq!(best.source_id, "b");
        assert_eq!(best.metric, Some(30.0 * 1_000_000.0 / 8.0));
        assert_eq!(snap.progress, 0.6);
    }

    #[tokio::test]
    async fn restart_isolates_late_events_from_previous_session() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.reply_to_start(Ok(1));
        engine.reply_to_start(Ok(2));
        let mut view = mounted(&engine, DL, 26).await;

        assert_eq!(view.run_or_restart(params("https://a.com/x")).await, Ok(1));
        // Second start while running is refused, so unmount-free restart goes through a
        // terminal state first.
        assert_eq!(
            view.run_or_restart(params("https://a.com/x")).await,
            Err(RunError::Busy)
        );
        view.handle_event(complete(1));
        assert_eq!(view.run_or_restart(params("https://b.com/y")).await, Ok(2));

        view.handle_event(download(2, "mine", true, 5.0));
        assert_eq!(view.handle_event(download(1, "late", true, 99.0)), Dispatch::Stale);
        assert_eq!(view.handle_event(complete(1)), Dispatch::Stale);

        let snap = view.snapshot();
        assert_eq!(snap.session_id, Some(2));
        assert_eq!(snap.received_count, 1);
        assert_eq!(snap.accepted[0].source_id, "mine");
        assert!(!snap.completed);
        assert_eq!(snap.phase, RunPhase::Running);
    }

    #[tokio::test]
    async fn remount_drops_events_from_abandoned_run() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut first = mounted(&engine, DL, 26).await;
        assert_eq!(first.run_or_restart(params("https://a.com/x")).await, Ok(1));
        first.unmount().await;

        let mut second = mounted(&engine, DL, 26).await;
        assert_eq!(second.run_or_restart(params("https://b.com/y")).await, Ok(2));
        assert_eq!(second.handle_event(download(1, "late", true, 50.0)), Dispatch::Stale);
        assert_eq!(second.handle_event(download(2, "mine", false, 0.0)), Dispatch::Accepted);

        let snap = second.snapshot();
        assert_eq!(snap.received_count, 1);
        assert_eq!(snap.rejected[0].source_id, "mine");
        assert!(snap.accepted.is_empty());
    }

    #[tokio::test]
    async fn start_cancels_before_starting() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 3).await;
        view.run_or_restart(params("  https://a.com/x  ")).await.unwrap();
        assert_eq!(
            engine.commands(),
            vec![
                Command::CurrentSession(DL),
                Command::Cancel(DL),
                Command::Start(DL, params("https://a.com/x")),
            ]
        );
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_engine_commands() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = ProbeView::new(
            engine.clone(),
            ProbeKind::ResolverReachability,
            25,
            ViewOptions::default(),
        );
        let err = view.run_or_restart(params("")).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(ValidationError::Empty(_))));
        assert_eq!(view.phase(), RunPhase::Idle);
        assert!(engine.commands().is_empty());
    }

    #[tokio::test]
    async fn completion_without_results() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 26).await;
        let id = view.run_or_restart(params("https://a.com/x")).await.unwrap();
        assert_eq!(
            view.handle_event(complete(id)),
            Dispatch::Completed { first: true }
        );
        assert_eq!(
            view.handle_event(complete(id)),
            Dispatch::Completed { first: false }
        );
        let snap = view.snapshot();
        assert!(snap.completed);
        assert!(snap.accepted.is_empty() && snap.rejected.is_empty());
        assert_eq!(snap.best_result, None);
        assert_eq!(snap.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn start_failure_surfaces_engine_message() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.reply_to_start(Err(EngineError::Rejected(
            "URL must start with http:// or https://".into(),
        )));
        let mut view = mounted(&engine, DL, 26).await;
        let err = view.run_or_restart(params("example.com")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "download test failed to start: URL must start with http:// or https://"
        );
        assert_eq!(view.phase(), RunPhase::Failed);
        assert_eq!(view.current_session_id(), None);

        // A failed run does not block the next one.
        assert!(view.run_or_restart(params("https://a.com/x")).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_failure_never_blocks_a_start() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.fail_cancel_with(EngineError::Unavailable("socket closed".into()));
        let mut view = mounted(&engine, DL, 26).await;
        assert!(view.run_or_restart(params("https://a.com/x")).await.is_ok());
        assert_eq!(view.phase(), RunPhase::Running);
    }

    #[tokio::test]
    async fn mount_adopts_engine_session() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.set_current_session(41);
        let mut view = mounted(&engine, DL, 26).await;
        assert_eq!(view.current_session_id(), Some(41));
        assert_eq!(view.handle_event(download(41, "a", true, 1.0)), Dispatch::Accepted);
        assert_eq!(view.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn unmount_mid_run_cancels() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 26).await;
        view.run_or_restart(params("https://a.com/x")).await.unwrap();
        view.unmount().await;
        assert_eq!(view.phase(), RunPhase::Cancelled);
        assert_eq!(view.current_session_id(), None);
        assert_eq!(engine.commands().last(), Some(&Command::Cancel(DL)));
        assert_eq!(engine.open_subscriptions(), 0);
        view.unmount().await;
    }

    #[tokio::test]
    async fn report_keeps_session_after_unmount() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 5).await;
        let id = view.run_or_restart(params("https://a.com/x")).await.unwrap();
        view.handle_event(download(id, "a", true, 8.0));
        view.handle_event(complete(id));

        view.unmount().await;
        assert_eq!(view.current_session_id(), None);
        let report = build_report(&view.snapshot());
        assert_eq!(report.session_id, Some(id));
        assert_eq!(report.phase, RunPhase::Completed);
        assert_eq!(report.accepted.len(), 1);
    }

    #[tokio::test]
    async fn failed_start_clears_previous_session() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = mounted(&engine, DL, 5).await;
        let id = view.run_or_restart(params("https://a.com/x")).await.unwrap();
        view.handle_event(complete(id));
        assert_eq!(view.snapshot().session_id, Some(id));

        engine.reply_to_start(Err(EngineError::Rejected("no route".into())));
        assert!(view.run_or_restart(params("https://a.com/x")).await.is_err());
        assert_eq!(view.snapshot().session_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_run_times_out() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut view = ProbeView::new(
            engine.clone(),
            DL,
            26,
            ViewOptions {
                stall_timeout: Some(Duration::from_secs(30)),
            },
        );
        view.mount().await;
        let id = view.run_or_restart(params("https://a.com/x")).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!view.check_stalled(Instant::now()).await);
        view.handle_event(download(id, "a", true, 1.0));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!view.check_stalled(Instant::now()).await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(view.check_stalled(Instant::now()).await);
        assert_eq!(view.phase(), RunPhase::TimedOut);
        assert_eq!(view.snapshot().session_id, Some(id));

        // Cancelled and unbound: the hung session can no longer write.
        assert_eq!(view.handle_event(complete(id)), Dispatch::Stale);
        assert_eq!(view.store().received_count(), 1);
        assert!(view.run_or_restart(params("https://a.com/x")).await.is_ok());
    }

    #[tokio::test]
    async fn run_view_drives_a_simulated_run_to_completion() {
        let catalog = TargetCatalog {
            resolvers: vec!["1.1.1.1".into(), "8.8.8.8".into(), "9.9.9.9".into()],
            registries: vec!["focker.ir".into()],
        };
        let engine = Arc::new(SimulatedEngine::new(
            catalog,
            SimulationConfig {
                failure_rate: 0.5,
                pace: Duration::from_millis(10),
            },
        ));
        let kind = ProbeKind::ResolverReachability;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snap_tx, mut snap_rx) = watch::channel(ViewSnapshot::empty(kind, 3));
        let handle = tokio::spawn(run_view(
            engine,
            kind,
            3,
            ViewOptions::default(),
            cmd_rx,
            snap_tx,
        ));

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ViewCommand::Run {
                params: params("example.com"),
                reply: reply_tx,
            })
            .unwrap();
        let id = reply_rx.await.unwrap().unwrap();

        let snap = snap_rx
            .wait_for(|s| s.phase == RunPhase::Completed)
            .await
            .unwrap()
            .clone();
        assert_eq!(snap.session_id, Some(id));
        assert_eq!(snap.received_count, 3);
        assert_eq!(snap.progress, 1.0);

        cmd_tx.send(ViewCommand::Unmount).unwrap();
        handle.await.unwrap();
    }
}
