//! Procfs implementation of the debug-attach contract.
//!
//! Reads thread identity from `/proc/<pid>/task/<tid>/{comm,stat,wchan}` and
//! frames from `/proc/<pid>/task/<tid>/stack`, which needs CAP_SYS_ADMIN on
//! most kernels. When the stack file is unreadable the wait channel stands
//! in as a single frame. Nothing is suspended or written, so detach has
//! nothing to undo.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dk_common::{ThreadRoles, UNKNOWN_STATE};
use tracing::{debug, trace};

use super::debug_attach::{
    AttachError, DebugSession, DebugTarget, LiveThread, RuntimeVersion, RuntimeView,
};
use super::resource::parse_proc_stat_content;

/// Flavor reported for the single runtime view procfs exposes.
pub const NATIVE_FLAVOR: &str = "native";

/// Attach backend rooted at a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsTarget {
    root: PathBuf,
}

impl Default for ProcfsTarget {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsTarget {
    /// Backend reading from `root` instead of `/proc`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether the procfs root looks usable.
    pub fn is_available(&self) -> bool {
        self.root.join("self").join("task").is_dir()
    }
}

impl DebugTarget for ProcfsTarget {
    fn attach(&self, pid: u32, timeout: Duration) -> Result<Box<dyn DebugSession>, AttachError> {
        if !cfg!(target_os = "linux") && self.root == Path::new("/proc") {
            return Err(AttachError::RuntimeUnavailable(
                "procfs capture requires Linux".to_string(),
            ));
        }

        let proc_dir = self.root.join(pid.to_string());
        let task_dir = proc_dir.join("task");
        match fs::read_dir(&task_dir) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AttachError::ProcessNotFound { pid })
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(AttachError::PermissionDenied { pid })
            }
            Err(e) => return Err(AttachError::Io(e)),
        }

        debug!(pid, root = %self.root.display(), "attached via procfs");
        Ok(Box::new(ProcfsSession {
            root: self.root.clone(),
            pid,
            task_dir,
            timeout,
            deadline: Instant::now() + timeout,
        }))
    }
}

struct ProcfsSession {
    root: PathBuf,
    pid: u32,
    task_dir: PathBuf,
    timeout: Duration,
    deadline: Instant,
}

impl ProcfsSession {
    fn check_deadline(&self) -> Result<(), AttachError> {
        if Instant::now() >= self.deadline {
            return Err(AttachError::Timeout {
                pid: self.pid,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

impl DebugSession for ProcfsSession {
    fn set_symbol_path(&mut self, path: &str) {
        // Kernel stacks are already symbolized
        trace!(path, "symbol path ignored by procfs backend");
    }

    fn runtime_versions(&self) -> Result<Vec<RuntimeVersion>, AttachError> {
        self.check_deadline()?;
        let release = fs::read_to_string(self.root.join("sys/kernel/osrelease"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(vec![RuntimeVersion::new(NATIVE_FLAVOR, release)])
    }

    fn runtime(&self, version: &RuntimeVersion) -> Result<Box<dyn RuntimeView + '_>, AttachError> {
        if version.flavor != NATIVE_FLAVOR {
            return Err(AttachError::RuntimeUnavailable(version.to_string()));
        }
        Ok(Box::new(ProcfsRuntime { session: self }))
    }

    fn detach(&mut self) {}
}

struct ProcfsRuntime<'a> {
    session: &'a ProcfsSession,
}

impl ProcfsRuntime<'_> {
    fn thread_dir(&self, tid: u64) -> PathBuf {
        self.session.task_dir.join(tid.to_string())
    }
}

impl RuntimeView for ProcfsRuntime<'_> {
    fn live_threads(&self) -> Result<Vec<LiveThread>, AttachError> {
        let pid = self.session.pid;
        let entries = fs::read_dir(&self.session.task_dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AttachError::ProcessNotFound { pid },
            ErrorKind::PermissionDenied => AttachError::PermissionDenied { pid },
            _ => AttachError::Io(e),
        })?;

        let mut tids: Vec<u64> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();

        let mut threads = Vec::with_capacity(tids.len());
        for tid in tids {
            self.session.check_deadline()?;
            let dir = self.thread_dir(tid);
            // Thread exited while enumerating
            let Ok(stat) = fs::read_to_string(dir.join("stat")) else {
                continue;
            };
            let parsed = parse_proc_stat_content(&stat);
            let name = fs::read_to_string(dir.join("comm"))
                .ok()
                .map(|s| s.trim_end_matches('\n').to_string())
                .or_else(|| parsed.as_ref().map(|p| p.comm.clone()))
                .filter(|s| !s.is_empty());
            let state = parsed
                .as_ref()
                .map(|p| state_name(p.state))
                .unwrap_or(UNKNOWN_STATE);

            threads.push(LiveThread {
                os_thread_id: tid,
                managed_thread_id: None,
                roles: name.as_deref().map(roles_from_name).unwrap_or_default(),
                name,
                state: state.to_string(),
                state_detail: read_wchan(&dir),
            });
        }
        Ok(threads)
    }

    fn raw_stack_frames(&self, thread: &LiveThread) -> Result<Vec<String>, AttachError> {
        self.session.check_deadline()?;
        let dir = self.thread_dir(thread.os_thread_id);
        let pid_dir = self.session.root.join(self.session.pid.to_string());
        if !pid_dir.exists() {
            return Err(AttachError::ProcessNotFound {
                pid: self.session.pid,
            });
        }

        match fs::read_to_string(dir.join("stack")) {
            Ok(content) => {
                let frames = parse_kernel_stack(&content);
                if !frames.is_empty() {
                    return Ok(frames);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound && !dir.exists() => {
                return Err(AttachError::FramesUnavailable {
                    os_thread_id: thread.os_thread_id,
                    reason: "thread exited".to_string(),
                });
            }
            Err(e) => {
                trace!(tid = thread.os_thread_id, error = %e, "stack unreadable, using wchan")
            }
        }

        Ok(read_wchan(&dir).into_iter().collect())
    }
}

fn read_wchan(dir: &Path) -> Option<String> {
    let wchan = fs::read_to_string(dir.join("wchan")).ok()?;
    let wchan = wchan.trim();
    if wchan.is_empty() || wchan == "0" {
        None
    } else {
        Some(wchan.to_string())
    }
}

/// Frames from `/proc/<pid>/task/<tid>/stack`, dropping the `[<addr>] ` prefix.
pub fn parse_kernel_stack(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix("[<") {
            Some(rest) => rest
                .split_once(">]")
                .map(|(_, symbol)| symbol.trim())
                .unwrap_or(line),
            None => line,
        })
        .filter(|symbol| !symbol.is_empty())
        .map(str::to_string)
        .collect()
}

/// Thread state name for a stat state character.
pub fn state_name(state: char) -> &'static str {
    match state {
        'R' => "RUNNING",
        'S' => "SLEEPING",
        'D' => "DISK_SLEEP",
        'T' | 't' => "STOPPED",
        'Z' => "ZOMBIE",
        'X' | 'x' => "DEAD",
        'I' => "IDLE",
        'W' => "PAGING",
        _ => UNKNOWN_STATE,
    }
}

/// Infer runtime roles from a thread name.
///
/// Linux truncates thread names to 15 bytes, so only prefixes are reliable.
pub fn roles_from_name(name: &str) -> ThreadRoles {
    let mut roles = ThreadRoles::default();
    let Some(rest) = name.strip_prefix(".NET ") else {
        return roles;
    };

    if rest.starts_with("Finalizer") {
        roles.finalizer = true;
    } else if rest.starts_with("TP Worker") || rest.starts_with("ThreadPool Wor") {
        roles.threadpool_worker = true;
    } else if rest.starts_with("TP IO") || rest.starts_with("IOCP") || rest.starts_with("TP Wait") {
        roles.threadpool_completion_port = true;
    } else if rest.starts_with("Timer") || rest.starts_with("TP Gate") {
        roles.threadpool_timer = true;
    } else if rest.starts_with("BGC") || rest.starts_with("Server GC") || rest.starts_with("GC") {
        roles.gc = true;
    } else if rest.starts_with("Debugger") {
        roles.debugger_helper = true;
    }

    // Runtime-created threads never keep the process alive
    roles.background = true;
    roles
}
