//! Live stack capture through the procfs backend.
//!
//! Most tests run against a synthetic procfs tree so stacks are fully
//! controlled; one test captures the test process itself on Linux.

use std::fs;
use std::path::Path;

use dk_core::collect::{CollectorConfig, LiveStackCollector, ProcfsTarget, StackFrameFilter};

const PID: u32 = 4242;

fn write_thread(root: &Path, tid: u64, comm: &str, stack: &[&str]) {
    let dir = root.join(format!("{PID}/task/{tid}"));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{tid} ({comm}) S 1 1 1 0 -1 0 0 0 0 0 3 1 0 0 20 0 1 0 100 0 0"),
    )
    .unwrap();
    fs::write(dir.join("wchan"), "futex_wait_queue").unwrap();
    let body: String = stack.iter().map(|f| format!("[<0>] {f}\n")).collect();
    fs::write(dir.join("stack"), body).unwrap();
}

const WAIT_STACK: &[&str] = &[
    "futex_wait_queue+0x6c/0xa0",
    "futex_wait+0x15b/0x240",
    "do_futex+0x10e/0x1c0",
    "__x64_sys_futex+0x74/0x1d0",
    "do_syscall_64+0x5d/0x90",
];

#[test]
fn identical_stacks_second_thread_cleared() {
    let root = tempfile::tempdir().unwrap();
    write_thread(root.path(), 100, "main", WAIT_STACK);
    write_thread(root.path(), 101, "worker", WAIT_STACK);

    let collector =
        LiveStackCollector::new(ProcfsTarget::new(root.path()), CollectorConfig::default());
    let records = collector.collect(PID);

    assert_eq!(records.len(), 2);
    let (first, second) = (&records[0], &records[1]);
    assert_eq!(first.os_thread_id, Some(100));
    assert_eq!(first.call_stack.len(), WAIT_STACK.len());
    assert!(first.stack_hash.is_some());
    assert_eq!(second.stack_hash, first.stack_hash);
    assert!(second.call_stack.is_empty());
    assert!(second.is_suppressed_duplicate());
    assert_eq!(second.name.as_deref(), Some("worker"));
    assert_eq!(second.state, "SLEEPING");
}

#[test]
fn shallow_stacks_are_never_hashed_or_suppressed() {
    let root = tempfile::tempdir().unwrap();
    let shallow = &WAIT_STACK[..3];
    write_thread(root.path(), 100, "a", shallow);
    write_thread(root.path(), 101, "b", shallow);

    let collector =
        LiveStackCollector::new(ProcfsTarget::new(root.path()), CollectorConfig::default());
    let records = collector.collect(PID);

    for record in &records {
        assert_eq!(record.call_stack.len(), 3);
        assert!(record.stack_hash.is_none());
    }
}

#[test]
fn hash_covers_filtered_frames_only() {
    let root = tempfile::tempdir().unwrap();
    let mut noisy = WAIT_STACK.to_vec();
    noisy.insert(2, "IL_STUB_PInvoke+0x0/0x10");
    write_thread(root.path(), 100, "a", WAIT_STACK);
    write_thread(root.path(), 101, "b", &noisy);

    let config = CollectorConfig {
        filter: StackFrameFilter::default(),
        ..CollectorConfig::default()
    };
    let records = LiveStackCollector::new(ProcfsTarget::new(root.path()), config).collect(PID);

    assert_eq!(records[0].stack_hash, records[1].stack_hash);
    assert!(records[1].call_stack.is_empty());
}

#[test]
fn fresh_dedup_state_per_collection() {
    let root = tempfile::tempdir().unwrap();
    write_thread(root.path(), 100, "main", WAIT_STACK);

    let collector =
        LiveStackCollector::new(ProcfsTarget::new(root.path()), CollectorConfig::default());
    let first = collector.collect(PID);
    let second = collector.collect(PID);

    assert_eq!(first[0].call_stack.len(), WAIT_STACK.len());
    assert_eq!(second[0].call_stack.len(), WAIT_STACK.len());
}

#[test]
fn vanished_process_yields_empty() {
    let root = tempfile::tempdir().unwrap();
    let collector =
        LiveStackCollector::new(ProcfsTarget::new(root.path()), CollectorConfig::default());
    let records = collector.collect(PID);
    assert!(records.is_empty());
}

#[test]
fn thread_cap_truncates() {
    let root = tempfile::tempdir().unwrap();
    for tid in 0..5 {
        write_thread(root.path(), 200 + tid, "t", &["only_frame"]);
    }
    let config = CollectorConfig {
        max_threads: 2,
        ..CollectorConfig::default()
    };
    let records = LiveStackCollector::new(ProcfsTarget::new(root.path()), config).collect(PID);
    assert_eq!(records.len(), 2);
}

#[cfg(target_os = "linux")]
#[test]
fn captures_own_process() {
    let _helper = std::thread::spawn(|| std::thread::sleep(std::time::Duration::from_millis(500)));
    let pid = std::process::id();

    let collector = LiveStackCollector::new(ProcfsTarget::default(), CollectorConfig::default());
    let records = collector.collect(pid);

    assert!(!records.is_empty());
    assert!(records.iter().any(|r| r.os_thread_id == Some(pid as u64)));
    for record in &records {
        assert_eq!(Some(record.thread_id), record.os_thread_id);
    }
}
