use crate::engine::{SimulatedEngine, SimulationConfig, TargetCatalog};
use crate::model::{ProbeKind, ProbeParams, SessionId, ViewSnapshot};
use crate::orchestrator::{build_report, run_view, RunError, ViewCommand, ViewOptions};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot, watch};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bargozin-cli",
    version,
    about = "Find which resolvers and registry mirrors work from your network"
)]
pub struct Cli {
    /// Probe kind to run
    #[arg(value_enum)]
    pub kind: ProbeKind,

    /// Domain, URL, or image to probe (required unless --interactive)
    pub target: Option<String>,

    /// Per-target timeout (defaults to 5s for resolvers, 10s otherwise)
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Print the final report as JSON and exit
    #[arg(long)]
    pub json: bool,

    /// Stream results as text and print a summary (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Read one target per line from stdin; each line restarts the run
    #[arg(long)]
    pub interactive: bool,

    /// JSON file overriding the built-in resolver and registry lists
    #[arg(long)]
    pub targets: Option<std::path::PathBuf>,

    /// Give up on a run that makes no progress for this long
    #[arg(long, default_value = "60s")]
    pub stall_timeout: humantime::Duration,

    /// Disable the stall watchdog
    #[arg(long)]
    pub no_watchdog: bool,

    /// Probability that a simulated target fails
    #[arg(long, default_value_t = 0.25)]
    pub failure_rate: f64,

    /// Upper bound of the simulated time per target
    #[arg(long, default_value = "800ms")]
    pub pace: humantime::Duration,

    /// Default log filter; BARGOZIN_LOG takes precedence
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Everything one mounted view needs: its command sender, its projection, and its task.
struct ViewHandle {
    cmd_tx: mpsc::UnboundedSender<ViewCommand>,
    snap_rx: watch::Receiver<ViewSnapshot>,
    task: tokio::task::JoinHandle<()>,
}

impl ViewHandle {
    async fn run(&self, params: ProbeParams) -> Result<Result<SessionId, RunError>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ViewCommand::Run { params, reply })
            .map_err(|_| anyhow::anyhow!("view task stopped"))?;
        rx.await.context("view task dropped the run reply")
    }

    async fn unmount(self) -> Result<ViewSnapshot> {
        let _ = self.cmd_tx.send(ViewCommand::Unmount);
        self.task.await.context("view task failed")?;
        let snapshot = self.snap_rx.borrow().clone();
        Ok(snapshot)
    }
}

/// Output mode resolved from flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Json,
    Silent,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive"));
    }
    if !args.interactive && args.target.is_none() {
        return Err(anyhow::anyhow!(
            "a {} is required unless --interactive is set",
            args.kind.target_label()
        ));
    }

    let mode = if args.silent {
        Mode::Silent
    } else if args.json {
        Mode::Json
    } else {
        Mode::Text
    };

    let catalog =
        TargetCatalog::load(args.targets.as_deref()).context("failed to load target catalog")?;
    let view = mount_view(&args, catalog);

    let (out_tx, out_handle) = spawn_output_writer();
    let res = if args.interactive {
        run_interactive(&args, mode, view, &out_tx).await
    } else {
        run_single(&args, mode, view, &out_tx).await
    };

    drop(out_tx);
    let _ = out_handle.await;
    res
}

fn mount_view(args: &Cli, catalog: TargetCatalog) -> ViewHandle {
    let kind = args.kind;
    let expected = catalog.expected_count(kind);
    let engine = Arc::new(SimulatedEngine::new(
        catalog,
        SimulationConfig {
            failure_rate: args.failure_rate.clamp(0.0, 1.0),
            pace: args.pace.into(),
        },
    ));
    let opts = ViewOptions {
        stall_timeout: (!args.no_watchdog).then(|| args.stall_timeout.into()),
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (snap_tx, snap_rx) = watch::channel(ViewSnapshot::empty(kind, expected));
    let task = tokio::spawn(run_view(engine, kind, expected, opts, cmd_rx, snap_tx));
    tracing::debug!(%kind, expected, "view mounted");
    ViewHandle {
        cmd_tx,
        snap_rx,
        task,
    }
}

fn build_params(args: &Cli, target: &str) -> ProbeParams {
    let params = ProbeParams::new(target);
    match args.timeout {
        Some(t) => params.with_timeout(t.into()),
        None => params.with_timeout(args.kind.default_timeout()),
    }
}

async fn run_single(
    args: &Cli,
    mode: Mode,
    mut view: ViewHandle,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let target = args.target.as_deref().unwrap_or_default();
    if let Err(e) = view.run(build_params(args, target)).await? {
        let _ = view.unmount().await;
        return Err(e).context("probe run was not started");
    }

    let mut printer = StreamPrinter::default();
    let interrupted = loop {
        let snap = view.snap_rx.borrow_and_update().clone();
        if mode == Mode::Text {
            for line in printer.lines(&snap) {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
        }
        if snap.phase.is_terminal() {
            break false;
        }
        tokio::select! {
            changed = view.snap_rx.changed() => {
                if changed.is_err() {
                    break false;
                }
            }
            _ = tokio::signal::ctrl_c() => break true,
        }
    };
    if interrupted {
        tracing::info!(kind = %args.kind, "interrupted, cancelling run");
    }

    let snapshot = view.unmount().await?;
    emit_final(mode, &snapshot, out_tx)
}

async fn run_interactive(
    args: &Cli,
    mode: Mode,
    mut view: ViewHandle,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut printer = StreamPrinter::default();
    let mut pending = false;

    if mode == Mode::Text {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Enter a {} per line; Ctrl-D to quit.",
            args.kind.target_label()
        )));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match view.run(build_params(args, &line)).await? {
                    Ok(_) => pending = true,
                    Err(e) => {
                        if mode != Mode::Silent {
                            let _ = out_tx.send(OutputLine::Stderr(format!("error: {e}")));
                        }
                        continue;
                    }
                }
            }
            changed = view.snap_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        let snap = view.snap_rx.borrow_and_update().clone();
        if mode == Mode::Text {
            for line in printer.lines(&snap) {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
        }
        if pending && snap.phase.is_terminal() {
            pending = false;
            emit_final(mode, &snap, out_tx)?;
        }
    }

    let snapshot = view.unmount().await?;
    if pending {
        emit_final(mode, &snapshot, out_tx)?;
    }
    Ok(())
}

fn emit_final(
    mode: Mode,
    snapshot: &ViewSnapshot,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    match mode {
        Mode::Silent => {}
        Mode::Json => {
            let report = build_report(snapshot);
            let out = serde_json::to_string_pretty(&report)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        }
        Mode::Text => {
            let summary = crate::text_summary::build_text_summary(snapshot);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    }
    Ok(())
}

/// Turns successive snapshots into the lines that are new since the last one.
#[derive(Debug, Default)]
struct StreamPrinter {
    session: Option<SessionId>,
    accepted: usize,
    rejected: usize,
}

impl StreamPrinter {
    fn lines(&mut self, snap: &ViewSnapshot) -> Vec<String> {
        // A timed-out run is unbound but keeps its partial results.
        if snap.session_id.is_some() && snap.session_id != self.session {
            self.session = snap.session_id;
            self.accepted = 0;
            self.rejected = 0;
        }
        let unit = snap.kind.metric_unit();
        let mut out = Vec::new();
        for r in snap.accepted.iter().skip(self.accepted) {
            out.push(crate::text_summary::format_result_line(unit, r, false));
        }
        for r in snap.rejected.iter().skip(self.rejected) {
            out.push(crate::text_summary::format_result_line(unit, r, false));
        }
        self.accepted = snap.accepted.len();
        self.rejected = snap.rejected.len();
        out
    }
}
