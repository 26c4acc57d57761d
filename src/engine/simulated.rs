//! In-process synthetic engine.
//!
//! Produces plausible outcomes with random latency and throughput instead of touching the
//! network. Cancellation is cooperative: a cancelled run stops launching new targets, but
//! probes already in flight still publish their results under the old session id.

use super::{EngineError, EventStream, ProbeEngine, TargetCatalog};
use crate::model::{EngineEvent, ProbeKind, ProbeParams, RawOutcome, SessionId, ThroughputOutcome};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Probability that a single target fails.
    pub failure_rate: f64,
    /// Upper bound of the simulated time one target takes.
    pub pace: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.25,
            pace: Duration::from_millis(800),
        }
    }
}

struct ActiveRun {
    session_id: SessionId,
    cancel: Arc<AtomicBool>,
}

struct Shared {
    catalog: TargetCatalog,
    cfg: SimulationConfig,
    next_session: AtomicU64,
    current: Mutex<HashMap<ProbeKind, SessionId>>,
    active: Mutex<HashMap<ProbeKind, ActiveRun>>,
    subscribers: Mutex<Vec<(ProbeKind, mpsc::UnboundedSender<EngineEvent>)>>,
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        // Closed receivers are pruned on the way.
        lock(&self.subscribers).retain(|(k, tx)| *k != kind || tx.send(event.clone()).is_ok());
    }

    fn finish(&self, kind: ProbeKind, session_id: SessionId) {
        let mut active = lock(&self.active);
        if active.get(&kind).map(|r| r.session_id) == Some(session_id) {
            active.remove(&kind);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone)]
pub struct SimulatedEngine {
    shared: Arc<Shared>,
}

impl SimulatedEngine {
    pub fn new(catalog: TargetCatalog, cfg: SimulationConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog,
                cfg,
                next_session: AtomicU64::new(1),
                current: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    fn check_params(kind: ProbeKind, params: &ProbeParams) -> Result<String, EngineError> {
        let target = params.target.trim().to_string();
        if target.is_empty() {
            return Err(EngineError::Rejected(format!(
                "Please enter a valid {}",
                kind.target_label()
            )));
        }
        match kind {
            ProbeKind::ResolverReachability => {}
            ProbeKind::DownloadThroughput => {
                if !target.starts_with("http://") && !target.starts_with("https://") {
                    return Err(EngineError::Rejected(
                        "URL must start with http:// or https://".into(),
                    ));
                }
            }
            ProbeKind::RegistryThroughput => {
                if !is_valid_image_reference(&target) {
                    return Err(EngineError::Rejected(
                        "Invalid Docker image name format".into(),
                    ));
                }
            }
        }
        Ok(target)
    }
}

/// Image reference grammar: `[registry[:port]/][namespace/]name[:tag][@digest]`.
pub fn is_valid_image_reference(image: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:[a-zA-Z0-9\-._]+(?::[0-9]+)?/)?(?:[a-z0-9\-._]+/)?[a-z0-9\-._]+(?::[a-zA-Z0-9\-._]+)?(?:@[a-zA-Z0-9\-._:]+)?$",
        )
        .ok()
    });
    match re {
        Some(re) => re.is_match(image) && !image.contains("@@"),
        None => false,
    }
}

#[async_trait]
impl ProbeEngine for SimulatedEngine {
    async fn start(&self, kind: ProbeKind, params: &ProbeParams) -> Result<SessionId, EngineError> {
        let target = Self::check_params(kind, params)?;
        let timeout = params.timeout.unwrap_or_else(|| kind.default_timeout());

        let session_id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut active = lock(&self.shared.active);
            if let Some(prev) = active.insert(
                kind,
                ActiveRun {
                    session_id,
                    cancel: cancel.clone(),
                },
            ) {
                prev.cancel.store(true, Ordering::Relaxed);
            }
        }
        lock(&self.shared.current).insert(kind, session_id);

        tracing::info!(%kind, session_id, target = %target, "simulated run started");
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match kind {
                ProbeKind::ResolverReachability => {
                    run_parallel(shared, kind, session_id, target, timeout, cancel).await
                }
                ProbeKind::DownloadThroughput | ProbeKind::RegistryThroughput => {
                    run_sequential(shared, kind, session_id, target, timeout, cancel).await
                }
            }
        });
        Ok(session_id)
    }

    async fn cancel(&self, kind: ProbeKind) -> Result<(), EngineError> {
        match lock(&self.shared.active).remove(&kind) {
            Some(run) => {
                run.cancel.store(true, Ordering::Relaxed);
                tracing::info!(%kind, session_id = run.session_id, "simulated run cancelled");
                Ok(())
            }
            None => Err(EngineError::Idle(kind)),
        }
    }

    async fn current_session(&self, kind: ProbeKind) -> Result<SessionId, EngineError> {
        Ok(lock(&self.shared.current).get(&kind).copied().unwrap_or(0))
    }

    async fn validate(&self, kind: ProbeKind, params: &ProbeParams) -> Result<bool, EngineError> {
        Ok(Self::check_params(kind, params).is_ok())
    }

    fn subscribe(&self, kind: ProbeKind) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.subscribers).push((kind, tx));
        rx
    }
}

/// Resolver probes fan out across every target at once.
async fn run_parallel(
    shared: Arc<Shared>,
    kind: ProbeKind,
    session_id: SessionId,
    domain: String,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
) {
    let targets = shared.catalog.targets(kind).to_vec();
    let remaining = Arc::new(AtomicUsize::new(targets.len()));
    if targets.is_empty() {
        complete(&shared, kind, session_id, &cancel);
        return;
    }
    for server in targets {
        let shared = shared.clone();
        let cancel = cancel.clone();
        let remaining = remaining.clone();
        let domain = domain.clone();
        tokio::spawn(async move {
            let (elapsed, failed) = sample(&shared.cfg);
            tokio::time::sleep(elapsed.min(timeout)).await;
            let outcome = if elapsed > timeout {
                resolver_outcome(server, session_id, None, Some("timed out".into()))
            } else if failed {
                resolver_outcome(
                    server,
                    session_id,
                    None,
                    Some(format!("no answer for {domain}")),
                )
            } else {
                resolver_outcome(server, session_id, Some(elapsed.as_millis() as u64), None)
            };
            shared.emit(EngineEvent::Result { kind, outcome });
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                complete(&shared, kind, session_id, &cancel);
            }
        });
    }
}

/// Throughput probes run one target at a time so they do not compete for bandwidth.
async fn run_sequential(
    shared: Arc<Shared>,
    kind: ProbeKind,
    session_id: SessionId,
    target: String,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
) {
    let targets = shared.catalog.targets(kind).to_vec();
    for source in targets {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!(%kind, session_id, "simulated run stopping after cancel");
            return;
        }
        let (elapsed, failed) = sample(&shared.cfg);
        let elapsed = elapsed.min(timeout);
        tokio::time::sleep(elapsed).await;

        let secs = elapsed.as_secs_f64().max(1e-3);
        let (success, mbps, bytes, error_message) = if failed {
            (false, 0.0, 0, Some("connection reset by peer".to_string()))
        } else {
            let mbps = rand::thread_rng().gen_range(0.05..80.0);
            let bytes = (mbps * 1_000_000.0 / 8.0 * secs) as u64;
            (true, mbps, bytes, None)
        };
        let outcome = ThroughputOutcome {
            target: source,
            success,
            download_speed_mbps: mbps,
            downloaded_bytes: bytes,
            test_duration_seconds: secs,
            error_message,
            session_id,
        };
        let outcome = match kind {
            ProbeKind::RegistryThroughput => RawOutcome::Registry {
                image_name: target.clone(),
                outcome,
            },
            _ => RawOutcome::Download(outcome),
        };
        shared.emit(EngineEvent::Result { kind, outcome });
    }
    complete(&shared, kind, session_id, &cancel);
}

fn complete(shared: &Shared, kind: ProbeKind, session_id: SessionId, cancel: &AtomicBool) {
    shared.finish(kind, session_id);
    if cancel.load(Ordering::Relaxed) {
        return;
    }
    shared.emit(EngineEvent::Complete { kind, session_id });
}

fn sample(cfg: &SimulationConfig) -> (Duration, bool) {
    let mut rng = rand::thread_rng();
    let max_ms = cfg.pace.as_millis().max(2) as u64;
    let elapsed = Duration::from_millis(rng.gen_range(1..max_ms));
    let rate = if cfg.failure_rate.is_finite() {
        cfg.failure_rate.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let failed = rng.gen_bool(rate);
    (elapsed, failed)
}

fn resolver_outcome(
    dns_server: String,
    session_id: SessionId,
    response_time: Option<u64>,
    error_message: Option<String>,
) -> RawOutcome {
    RawOutcome::Resolver {
        dns_server,
        status: response_time.is_some(),
        response_time,
        error_message,
        session_id,
    }
}
