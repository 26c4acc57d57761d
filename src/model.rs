use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier the engine stamps on every run. 0 means "no run has started yet".
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    /// Which resolvers can resolve a domain
    #[value(name = "resolver")]
    ResolverReachability,
    /// Download throughput of a URL through each resolver
    #[value(name = "download")]
    DownloadThroughput,
    /// Manifest fetch speed of an image through each registry mirror
    #[value(name = "registry")]
    RegistryThroughput,
}

/// Event channel names the engine publishes for a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventNames {
    pub result: &'static str,
    pub complete: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Milliseconds,
    BytesPerSecond,
}

impl ProbeKind {
    pub fn event_names(self) -> EventNames {
        match self {
            ProbeKind::ResolverReachability => EventNames {
                result: "dns-test-result",
                complete: "dns-test-complete",
            },
            ProbeKind::DownloadThroughput => EventNames {
                result: "download-test-result",
                complete: "download-test-complete",
            },
            ProbeKind::RegistryThroughput => EventNames {
                result: "docker-registry-test-result",
                complete: "docker-registry-test-complete",
            },
        }
    }

    pub fn metric_unit(self) -> MetricUnit {
        match self {
            ProbeKind::ResolverReachability => MetricUnit::Milliseconds,
            ProbeKind::DownloadThroughput | ProbeKind::RegistryThroughput => {
                MetricUnit::BytesPerSecond
            }
        }
    }

    /// Per-target timeout used when the caller does not pick one.
    pub fn default_timeout(self) -> Duration {
        match self {
            ProbeKind::ResolverReachability => Duration::from_secs(5),
            ProbeKind::DownloadThroughput | ProbeKind::RegistryThroughput => {
                Duration::from_secs(10)
            }
        }
    }

    /// Throughput kinds rank their accepted results and badge the fastest one.
    pub fn is_throughput(self) -> bool {
        matches!(self.metric_unit(), MetricUnit::BytesPerSecond)
    }

    pub fn target_label(self) -> &'static str {
        match self {
            ProbeKind::ResolverReachability => "domain",
            ProbeKind::DownloadThroughput => "URL",
            ProbeKind::RegistryThroughput => "image",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeKind::ResolverReachability => "resolver",
            ProbeKind::DownloadThroughput => "download",
            ProbeKind::RegistryThroughput => "registry",
        };
        f.write_str(s)
    }
}

/// Input parameters handed to the engine's start command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeParams {
    pub target: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ProbeParams {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Throughput payload shared by the download and registry kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputOutcome {
    /// Resolver or registry the probe went through.
    #[serde(alias = "dns_server", alias = "registry")]
    pub target: String,
    pub success: bool,
    pub download_speed_mbps: f64,
    pub downloaded_bytes: u64,
    pub test_duration_seconds: f64,
    #[serde(default)]
    pub error_message: Option<String>,
    pub session_id: SessionId,
}

/// A partial outcome exactly as the engine pushes it. Each kind has its own shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawOutcome {
    Resolver {
        dns_server: String,
        status: bool,
        #[serde(default)]
        response_time: Option<u64>,
        #[serde(default)]
        error_message: Option<String>,
        session_id: SessionId,
    },
    Download(ThroughputOutcome),
    Registry {
        image_name: String,
        #[serde(flatten)]
        outcome: ThroughputOutcome,
    },
}

impl RawOutcome {
    pub fn session_id(&self) -> SessionId {
        match self {
            RawOutcome::Resolver { session_id, .. } => *session_id,
            RawOutcome::Download(o) => o.session_id,
            RawOutcome::Registry { outcome, .. } => outcome.session_id,
        }
    }

    /// The kind whose payload shape this is.
    pub fn shape_kind(&self) -> ProbeKind {
        match self {
            RawOutcome::Resolver { .. } => ProbeKind::ResolverReachability,
            RawOutcome::Download(_) => ProbeKind::DownloadThroughput,
            RawOutcome::Registry { .. } => ProbeKind::RegistryThroughput,
        }
    }
}

/// Push notifications from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// `<kind>-result`
    Result { kind: ProbeKind, outcome: RawOutcome },
    /// `<kind>-complete`
    Complete { kind: ProbeKind, session_id: SessionId },
}

impl EngineEvent {
    pub fn kind(&self) -> ProbeKind {
        match self {
            EngineEvent::Result { kind, .. } | EngineEvent::Complete { kind, .. } => *kind,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            EngineEvent::Result { outcome, .. } => outcome.session_id(),
            EngineEvent::Complete { session_id, .. } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        let names = self.kind().event_names();
        match self {
            EngineEvent::Result { .. } => names.result,
            EngineEvent::Complete { .. } => names.complete,
        }
    }
}

/// One classified outcome, units already normalized for its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub source_id: String,
    pub success: bool,
    #[serde(default)]
    pub metric: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Validating,
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
    /// No progress for the bound session within the stall timeout.
    TimedOut,
}

impl RunPhase {
    pub fn is_running(self) -> bool {
        matches!(self, RunPhase::Starting | RunPhase::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Cancelled | RunPhase::Failed | RunPhase::TimedOut
        )
    }
}

/// Read-only projection of one view, republished after every change.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub kind: ProbeKind,
    pub phase: RunPhase,
    pub target: Option<String>,
    pub session_id: Option<SessionId>,
    pub accepted: Vec<ProbeResult>,
    pub rejected: Vec<ProbeResult>,
    pub received_count: usize,
    pub expected_count: usize,
    pub completed: bool,
    pub is_running: bool,
    pub best_result: Option<ProbeResult>,
    pub progress: f64,
}

impl ViewSnapshot {
    pub fn empty(kind: ProbeKind, expected_count: usize) -> Self {
        Self {
            kind,
            phase: RunPhase::Idle,
            target: None,
            session_id: None,
            accepted: Vec::new(),
            rejected: Vec::new(),
            received_count: 0,
            expected_count,
            completed: false,
            is_running: false,
            best_result: None,
            progress: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub unit: MetricUnit,
    pub mean: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
}

/// Final report for one run, printed in JSON mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: ProbeKind,
    pub target: String,
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub finished_at: String,
    pub phase: RunPhase,
    pub expected_count: usize,
    pub received_count: usize,
    pub accepted: Vec<ProbeResult>,
    pub rejected: Vec<ProbeResult>,
    pub best: Option<ProbeResult>,
    #[serde(default)]
    pub metric_summary: Option<MetricSummary>,
}
