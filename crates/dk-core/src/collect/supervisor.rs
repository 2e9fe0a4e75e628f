//! Resource-bounded supervision of the external analysis tool.
//!
//! The tool is spawned with a single argument (the artifact path) and
//! polled on a fixed interval. Each tick samples cpu and private memory;
//! crossing either ceiling kills the tool and stops polling. Output is
//! captured by reader threads into a channel and only read back once the
//! tool has exited.
//!
//! ```ignore
//! use dk_core::collect::supervisor::{Supervisor, SupervisorConfig};
//!
//! let supervisor = Supervisor::new(SupervisorConfig::new("/opt/diag/DiagCli"));
//! let result = supervisor.run(Path::new("/tmp/dumps/web01_w3wp_0xC00000FD.dmp"))?;
//! if result.outcome.was_killed() { /* partial payload */ }
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dk_common::{
    AnalysisPayload, AnalysisRunResult, BreachKind, ProcessOutcome, ProcessResourceSample,
    ResourceBreach,
};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use super::resource::{ProcfsSampler, ResourceSampler};
use crate::config::AnalysisConfig;
use crate::logging::event_names;

/// Poll interval between lifecycle checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Total (user + privileged) cpu seconds allowed.
pub const DEFAULT_CPU_CEILING_SECS: f64 = 300.0;

/// Private memory allowed (800 MiB).
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 800 * 1024 * 1024;

/// How long to wait for the output readers after the tool exits.
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 2000;

const READ_CHUNK_BYTES: usize = 8192;

/// Errors that prevent a supervised run from producing a result.
///
/// Resource breaches and unparsable output are not errors; they are
/// reported through [`AnalysisRunResult`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no analysis tool configured")]
    NotConfigured,

    #[error("analysis tool not found: {0}")]
    ToolNotFound(PathBuf),

    #[error("invalid analysis tool path: {0}")]
    InvalidPath(String),

    #[error("failed to spawn analysis tool: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed waiting for analysis tool: {0}")]
    Wait(#[source] std::io::Error),
}

impl From<SupervisorError> for dk_common::Error {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::NotConfigured => {
                dk_common::Error::ToolNotFound("analysis.tool_path is not set".to_string())
            }
            SupervisorError::ToolNotFound(path) => {
                dk_common::Error::ToolNotFound(path.display().to_string())
            }
            other => dk_common::Error::Analysis(other.to_string()),
        }
    }
}

/// Cpu and memory ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub cpu_ceiling_secs: f64,
    pub memory_ceiling_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_ceiling_secs: DEFAULT_CPU_CEILING_SECS,
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
        }
    }
}

impl ResourceLimits {
    /// The breach this sample represents, if any. Cpu is checked first.
    pub fn check(&self, sample: &ProcessResourceSample, tick: u32) -> Option<ResourceBreach> {
        let kind = if sample.total_cpu_secs > self.cpu_ceiling_secs {
            BreachKind::Cpu
        } else if sample.private_memory_bytes > self.memory_ceiling_bytes {
            BreachKind::Memory
        } else {
            return None;
        };
        Some(ResourceBreach {
            kind,
            sample: *sample,
            tick,
        })
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub tool: PathBuf,
    pub poll_interval: Duration,
    pub limits: ResourceLimits,
    pub drain_grace: Duration,
}

impl SupervisorConfig {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            limits: ResourceLimits::default(),
            drain_grace: Duration::from_millis(DEFAULT_DRAIN_GRACE_MS),
        }
    }

    /// Build from the `analysis` config section.
    pub fn from_analysis(config: &AnalysisConfig) -> Result<Self, SupervisorError> {
        let tool = config
            .tool_path
            .clone()
            .ok_or(SupervisorError::NotConfigured)?;
        Ok(Self {
            tool,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            limits: ResourceLimits {
                cpu_ceiling_secs: config.cpu_ceiling_secs,
                memory_ceiling_bytes: config.memory_ceiling_bytes,
            },
            drain_grace: Duration::from_millis(config.drain_grace_ms),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

/// Lifecycle of one supervised process.
///
/// Settles exactly once; later attempts are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Lifecycle {
    #[default]
    Running,
    Settled(ProcessOutcome),
}

impl Lifecycle {
    /// Record the terminal outcome. Returns false if already settled.
    pub fn settle(&mut self, outcome: ProcessOutcome) -> bool {
        match self {
            Lifecycle::Running => {
                *self = Lifecycle::Settled(outcome);
                true
            }
            Lifecycle::Settled(_) => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Lifecycle::Settled(_))
    }

    pub fn outcome(&self) -> Option<ProcessOutcome> {
        match self {
            Lifecycle::Running => None,
            Lifecycle::Settled(outcome) => Some(*outcome),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum CaptureMsg {
    Chunk(Stream, Vec<u8>),
    Eof,
}

/// Bytes collected from the tool's standard streams.
#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Reader threads forwarding a child's stdout/stderr over a channel.
struct OutputCapture {
    rx: Receiver<CaptureMsg>,
    readers: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    fn start(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
        }
        // Readers hold the only senders; the channel disconnects when both finish
        drop(tx);
        Self { rx, readers }
    }

    /// Collect everything sent so far and until both streams close.
    ///
    /// A grandchild that inherited the pipes can keep them open after the
    /// tool exits, so this gives up after `grace` and keeps what arrived.
    fn finish(self, grace: Duration) -> CapturedOutput {
        let deadline = Instant::now() + grace;
        let mut output = CapturedOutput::default();
        let mut open = self.readers.len();

        while open > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(CaptureMsg::Chunk(Stream::Stdout, bytes)) => output.stdout.extend(bytes),
                Ok(CaptureMsg::Chunk(Stream::Stderr, bytes)) => output.stderr.extend(bytes),
                Ok(CaptureMsg::Eof) => open -= 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        open_streams = open,
                        grace_ms = grace.as_millis() as u64,
                        "output pipes still open after drain grace, keeping partial output"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if open == 0 {
            for reader in self.readers {
                let _ = reader.join();
            }
        }
        output
    }
}

fn spawn_reader<R>(mut source: R, stream: Stream, tx: Sender<CaptureMsg>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let msg = CaptureMsg::Chunk(stream, chunk[..n].to_vec());
                    if tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(?stream, error = %e, "output reader stopped");
                    break;
                }
            }
        }
        let _ = tx.send(CaptureMsg::Eof);
    })
}

/// Parse captured stdout as an analysis payload.
///
/// Empty or malformed output is logged and yields `None`.
pub fn parse_payload(raw: &str) -> Option<AnalysisPayload> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        debug!("analysis tool produced no output");
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "analysis output is not a valid payload");
            None
        }
    }
}

/// Spawns and polices the analysis tool.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the tool against `artifact`, sampling resources from procfs.
    pub fn run(&self, artifact: &Path) -> Result<AnalysisRunResult, SupervisorError> {
        self.run_with_sampler(artifact, &mut ProcfsSampler)
    }

    /// Run the tool against `artifact` with an injected sampler.
    #[instrument(skip(self, sampler), fields(artifact = %artifact.display()))]
    pub fn run_with_sampler(
        &self,
        artifact: &Path,
        sampler: &mut dyn ResourceSampler,
    ) -> Result<AnalysisRunResult, SupervisorError> {
        validate_tool(&self.config.tool)?;

        let start = Instant::now();
        let mut child = Command::new(&self.config.tool)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SupervisorError::ToolNotFound(self.config.tool.clone())
                }
                _ => SupervisorError::SpawnFailed(e),
            })?;
        let pid = child.id();
        info!(
            event = event_names::ANALYZE_SPAWNED,
            pid,
            tool = %self.config.tool.display(),
            "analysis tool started"
        );

        let capture = OutputCapture::start(&mut child);
        let mut lifecycle = Lifecycle::default();
        let mut samples = Vec::new();
        let mut tick: u32 = 0;

        while !lifecycle.is_settled() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    lifecycle.settle(ProcessOutcome::Exited {
                        exit_code: status.code(),
                    });
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SupervisorError::Wait(e));
                }
            }

            if let Some(sample) = sampler.sample(pid) {
                trace!(
                    event = event_names::ANALYZE_SAMPLE,
                    tick,
                    total_cpu_secs = sample.total_cpu_secs,
                    private_bytes = sample.private_memory_bytes,
                    "sampled"
                );
                samples.push(sample);

                if let Some(breach) = self.config.limits.check(&sample, tick) {
                    warn!(
                        event = event_names::ANALYZE_BREACH,
                        kind = %breach.kind,
                        tick,
                        user_cpu_secs = sample.user_cpu_secs,
                        privileged_cpu_secs = sample.privileged_cpu_secs,
                        total_cpu_secs = sample.total_cpu_secs,
                        private_bytes = sample.private_memory_bytes,
                        cpu_ceiling_secs = self.config.limits.cpu_ceiling_secs,
                        memory_ceiling_bytes = self.config.limits.memory_ceiling_bytes,
                        "resource ceiling exceeded, killing analysis tool"
                    );
                    let outcome = settle_breach(
                        child.kill(),
                        || child.try_wait().ok().flatten().map(|status| status.code()),
                        breach,
                    );
                    if !outcome.was_killed() {
                        debug!(pid, "analysis tool exited before the kill landed");
                    }
                    lifecycle.settle(outcome);
                    break;
                }
            }

            tick = tick.saturating_add(1);
            thread::sleep(self.config.poll_interval);
        }

        let status = child.wait().map_err(SupervisorError::Wait)?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let output = capture.finish(self.config.drain_grace);

        let outcome = lifecycle.outcome().unwrap_or(ProcessOutcome::Exited {
            exit_code: status.code(),
        });
        info!(
            event = event_names::ANALYZE_EXITED,
            pid,
            elapsed_ms,
            killed = outcome.was_killed(),
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "analysis tool finished"
        );

        let raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        let payload = parse_payload(&raw_output);

        Ok(AnalysisRunResult {
            artifact: artifact.display().to_string(),
            elapsed_ms,
            outcome,
            samples,
            raw_output,
            diagnostics_output: String::from_utf8_lossy(&output.stderr).into_owned(),
            payload,
        })
    }
}

/// Outcome of a breach once the kill has been attempted.
///
/// A failed kill usually means the tool exited between the poll and the
/// kill; `exited` reports its exit code if so, and the natural exit wins.
fn settle_breach<F>(kill: std::io::Result<()>, exited: F, breach: ResourceBreach) -> ProcessOutcome
where
    F: FnOnce() -> Option<Option<i32>>,
{
    if let Err(e) = kill {
        debug!(error = %e, "kill failed");
        if let Some(exit_code) = exited() {
            return ProcessOutcome::Exited { exit_code };
        }
    }
    ProcessOutcome::KilledForResourceBreach { breach }
}

/// Reject tool paths that could be misread as shell syntax or do not exist.
fn validate_tool(tool: &Path) -> Result<(), SupervisorError> {
    let text = tool.to_string_lossy();
    if text.trim().is_empty() {
        return Err(SupervisorError::NotConfigured);
    }
    if text.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
        return Err(SupervisorError::InvalidPath(format!(
            "contains shell metacharacters: {}",
            text
        )));
    }
    if tool.is_absolute() && !tool.exists() {
        return Err(SupervisorError::ToolNotFound(tool.to_path_buf()));
    }
    Ok(())
}
