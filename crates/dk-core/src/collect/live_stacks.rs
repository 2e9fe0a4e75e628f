//! Live stack capture.
//!
//! Attaches to a process through a [`DebugTarget`], walks every runtime and
//! live thread, filters noise frames and suppresses repeated stacks. A
//! capture never fails from the caller's point of view: attach failures and
//! a target that disappears mid-walk are logged and whatever was collected
//! so far is returned.

use std::time::Duration;

use dk_common::ThreadRecord;
use tracing::{debug, error, info, info_span, warn};

use super::debug_attach::{AttachError, AttachedSession, DebugTarget, LiveThread};
use super::dedup::ThreadRecordDeduplicator;
use super::frame_filter::StackFrameFilter;
use crate::config::StacksConfig;
use crate::logging::event_names;

/// Attach timeout.
pub const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 20_000;

/// Threads processed per runtime view.
pub const DEFAULT_MAX_THREADS: usize = 1000;

/// Environment fallback for the symbol path.
pub const SYMBOL_PATH_ENV: &str = "DIAGKIT_SYMBOL_PATH";

/// Capture settings.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub attach_timeout: Duration,
    pub max_threads: usize,
    /// Explicit symbol path; `DIAGKIT_SYMBOL_PATH` is consulted when absent.
    pub symbol_path: Option<String>,
    pub filter: StackFrameFilter,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            attach_timeout: Duration::from_millis(DEFAULT_ATTACH_TIMEOUT_MS),
            max_threads: DEFAULT_MAX_THREADS,
            symbol_path: None,
            filter: StackFrameFilter::default(),
        }
    }
}

impl CollectorConfig {
    pub fn from_stacks(config: &StacksConfig) -> Self {
        Self {
            attach_timeout: Duration::from_millis(config.attach_timeout_ms),
            max_threads: config.max_threads,
            symbol_path: config.symbol_path.clone(),
            filter: StackFrameFilter::with_additions(
                &config.extra_excluded_frames,
                &config.extra_excluded_substrings,
            ),
        }
    }

    fn resolve_symbol_path(&self) -> Option<String> {
        self.symbol_path
            .clone()
            .or_else(|| std::env::var(SYMBOL_PATH_ENV).ok())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Captures thread records from live processes.
pub struct LiveStackCollector<T: DebugTarget> {
    target: T,
    config: CollectorConfig,
}

impl<T: DebugTarget> LiveStackCollector<T> {
    pub fn new(target: T, config: CollectorConfig) -> Self {
        Self { target, config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Capture all threads of `pid`.
    ///
    /// Errors are logged, never returned; the result may be partial or empty.
    pub fn collect(&self, pid: u32) -> Vec<ThreadRecord> {
        let _span = info_span!("capture", pid).entered();

        let mut records = Vec::new();
        let mut dedup = ThreadRecordDeduplicator::new();

        if let Err(e) = self.capture_into(pid, &mut records, &mut dedup) {
            error!(
                pid,
                error = %e,
                partial_threads = records.len(),
                "stack capture failed, returning partial result"
            );
        }

        info!(
            event = event_names::CAPTURE_FINISHED,
            pid,
            threads = records.len(),
            distinct_stacks = dedup.distinct(),
            "stack capture finished"
        );
        records
    }

    fn capture_into(
        &self,
        pid: u32,
        records: &mut Vec<ThreadRecord>,
        dedup: &mut ThreadRecordDeduplicator,
    ) -> Result<(), AttachError> {
        let session = self.target.attach(pid, self.config.attach_timeout)?;
        let mut session = AttachedSession::new(session, pid);

        if let Some(path) = self.config.resolve_symbol_path() {
            debug!(symbol_path = %path, "setting symbol path");
            session.session_mut().set_symbol_path(&path);
        }

        let versions = session.session().runtime_versions()?;
        info!(
            event = event_names::CAPTURE_ATTACHED,
            runtimes = versions.len(),
            "attached to target"
        );

        for version in &versions {
            let view = match session.session().runtime(version) {
                Ok(view) => view,
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!(runtime = %version, error = %e, "skipping runtime");
                    continue;
                }
            };

            let threads = view.live_threads()?;
            if threads.len() > self.config.max_threads {
                warn!(
                    runtime = %version,
                    threads = threads.len(),
                    max_threads = self.config.max_threads,
                    "thread count above cap, truncating"
                );
            }

            for thread in threads.into_iter().take(self.config.max_threads) {
                let mut record = thread_record(&thread);
                match view.raw_stack_frames(&thread) {
                    Ok(frames) => record.call_stack = self.config.filter.apply(&frames),
                    Err(e) if e.is_run_fatal() => return Err(e),
                    Err(e) => debug!(
                        event = event_names::CAPTURE_FRAME_ERROR,
                        os_thread_id = thread.os_thread_id,
                        error = %e,
                        "frames unavailable, keeping thread metadata"
                    ),
                }
                dedup.apply(&mut record);
                records.push(record);
            }
        }

        Ok(())
    }
}

fn thread_record(thread: &LiveThread) -> ThreadRecord {
    let mut record = ThreadRecord::new(thread.managed_thread_id.unwrap_or(thread.os_thread_id));
    record.os_thread_id = Some(thread.os_thread_id);
    record.name = thread.name.clone();
    record.roles = thread.roles;
    record.state = thread.state.clone();
    record.state_detail = thread.state_detail.clone();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::debug_attach::{DebugSession, RuntimeVersion, RuntimeView};
    use dk_common::ThreadRoles;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct FakeThread {
        tid: u64,
        frames: Result<Vec<&'static str>, fn(u64) -> AttachError>,
    }

    #[derive(Clone, Default)]
    struct FakeTarget {
        threads: Vec<FakeThread>,
        attach_error: Option<fn(u32) -> AttachError>,
        detaches: Rc<Cell<u32>>,
        symbol_path: Rc<std::cell::RefCell<Option<String>>>,
    }

    struct FakeSession(FakeTarget);
    struct FakeView<'a>(&'a FakeTarget);

    impl DebugTarget for FakeTarget {
        fn attach(
            &self,
            pid: u32,
            _timeout: Duration,
        ) -> Result<Box<dyn DebugSession>, AttachError> {
            if let Some(make) = self.attach_error {
                return Err(make(pid));
            }
            Ok(Box::new(FakeSession(self.clone())))
        }
    }

    impl DebugSession for FakeSession {
        fn set_symbol_path(&mut self, path: &str) {
            *self.0.symbol_path.borrow_mut() = Some(path.to_string());
        }
        fn runtime_versions(&self) -> Result<Vec<RuntimeVersion>, AttachError> {
            Ok(vec![RuntimeVersion::new("coreclr", "8.0.1")])
        }
        fn runtime(&self, _v: &RuntimeVersion) -> Result<Box<dyn RuntimeView + '_>, AttachError> {
            Ok(Box::new(FakeView(&self.0)))
        }
        fn detach(&mut self) {
            self.0.detaches.set(self.0.detaches.get() + 1);
        }
    }

    impl RuntimeView for FakeView<'_> {
        fn live_threads(&self) -> Result<Vec<LiveThread>, AttachError> {
            Ok(self
                .0
                .threads
                .iter()
                .map(|t| LiveThread {
                    os_thread_id: t.tid,
                    managed_thread_id: Some(t.tid + 1000),
                    name: None,
                    roles: ThreadRoles::default(),
                    state: "Running".to_string(),
                    state_detail: None,
                })
                .collect())
        }
        fn raw_stack_frames(&self, thread: &LiveThread) -> Result<Vec<String>, AttachError> {
            let fake = self
                .0
                .threads
                .iter()
                .find(|t| t.tid == thread.os_thread_id)
                .ok_or(AttachError::ProcessNotFound { pid: 0 })?;
            match &fake.frames {
                Ok(frames) => Ok(frames.iter().map(|s| s.to_string()).collect()),
                Err(make) => Err(make(thread.os_thread_id)),
            }
        }
    }

    const STACK: &[&str] = &[
        "Monitor.Wait()",
        "[GCFrame]",
        "Worker.Loop()",
        "Thread.Start()",
        "Main()",
    ];

    fn thread(tid: u64, frames: &[&'static str]) -> FakeThread {
        FakeThread {
            tid,
            frames: Ok(frames.to_vec()),
        }
    }

    #[test]
    fn duplicate_stack_cleared_on_second_thread() {
        let target = FakeTarget {
            threads: vec![thread(1, STACK), thread(2, STACK)],
            ..Default::default()
        };
        let detaches = target.detaches.clone();
        let collector = LiveStackCollector::new(target, CollectorConfig::default());
        let records = collector.collect(42);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].depth(), 4);
        assert!(!records[0].call_stack.contains(&"[GCFrame]".to_string()));
        assert!(records[0].stack_hash.is_some());
        assert_eq!(records[0].stack_hash, records[1].stack_hash);
        assert!(records[1].call_stack.is_empty());
        assert_eq!(records[1].thread_id, 1002);
        assert_eq!(records[1].os_thread_id, Some(2));
        assert_eq!(detaches.get(), 1);
    }

    #[test]
    fn each_collect_starts_fresh() {
        let target = FakeTarget {
            threads: vec![thread(1, STACK)],
            ..Default::default()
        };
        let collector = LiveStackCollector::new(target, CollectorConfig::default());
        let first = collector.collect(1);
        let second = collector.collect(1);
        assert_eq!(first[0].depth(), 4);
        assert_eq!(second[0].depth(), 4);
    }

    #[test]
    fn attach_failure_yields_empty() {
        let target = FakeTarget {
            attach_error: Some(|pid| AttachError::Timeout {
                pid,
                timeout: Duration::from_millis(DEFAULT_ATTACH_TIMEOUT_MS),
            }),
            ..Default::default()
        };
        let detaches = target.detaches.clone();
        let records = LiveStackCollector::new(target, CollectorConfig::default()).collect(5);
        assert!(records.is_empty());
        assert_eq!(detaches.get(), 0);
    }

    #[test]
    fn vanished_target_returns_partial_and_detaches() {
        let target = FakeTarget {
            threads: vec![
                thread(1, &["a", "b"]),
                FakeThread {
                    tid: 2,
                    frames: Err(|_| AttachError::ProcessNotFound { pid: 5 }),
                },
                thread(3, &["c"]),
            ],
            ..Default::default()
        };
        let detaches = target.detaches.clone();
        let records = LiveStackCollector::new(target, CollectorConfig::default()).collect(5);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].os_thread_id, Some(1));
        assert_eq!(detaches.get(), 1);
    }

    #[test]
    fn frame_errors_are_tolerated() {
        let target = FakeTarget {
            threads: vec![
                FakeThread {
                    tid: 1,
                    frames: Err(|tid| AttachError::FramesUnavailable {
                        os_thread_id: tid,
                        reason: "unresolved".into(),
                    }),
                },
                thread(2, &["x"]),
            ],
            ..Default::default()
        };
        let records = LiveStackCollector::new(target, CollectorConfig::default()).collect(5);
        assert_eq!(records.len(), 2);
        assert!(records[0].call_stack.is_empty());
        assert!(records[0].stack_hash.is_none());
        assert_eq!(records[1].call_stack, vec!["x"]);
    }

    #[test]
    fn thread_cap_applies() {
        let target = FakeTarget {
            threads: (0..10).map(|i| thread(i, &["f"])).collect(),
            ..Default::default()
        };
        let config = CollectorConfig {
            max_threads: 3,
            ..CollectorConfig::default()
        };
        assert_eq!(LiveStackCollector::new(target, config).collect(1).len(), 3);
    }

    #[test]
    fn explicit_symbol_path_is_passed() {
        let target = FakeTarget {
            threads: vec![thread(1, &["f"])],
            ..Default::default()
        };
        let seen = target.symbol_path.clone();
        let config = CollectorConfig {
            symbol_path: Some("srv*/tmp/symbols".to_string()),
            ..CollectorConfig::default()
        };
        LiveStackCollector::new(target, config).collect(1);
        assert_eq!(seen.borrow().as_deref(), Some("srv*/tmp/symbols"));
    }

    #[test]
    fn from_stacks_config_extends_filter() {
        let stacks = StacksConfig {
            extra_excluded_frames: vec!["Noise()".to_string()],
            max_threads: 7,
            ..StacksConfig::default()
        };
        let config = CollectorConfig::from_stacks(&stacks);
        assert_eq!(config.max_threads, 7);
        assert!(config.filter.is_excluded("Noise()"));
        assert!(config.filter.is_excluded("[GCFrame]"));
    }
}
