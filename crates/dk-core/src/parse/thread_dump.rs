//! Textual thread-dump parser.
//!
//! A dump is scanned line by line with two states, outside and inside a
//! thread block. A thread block starts at a header line carrying both a
//! `#<id>` token and a `nid=` marker, e.g.
//!
//! ```text
//! "pool-1" #26 daemon prio=5 os_prio=0 tid=0x0 nid=0x36a4 runnable [0x0]
//!    java.lang.Thread.State: RUNNABLE
//!         at java.net.SocketInputStream.read(SocketInputStream.java:141)
//!         - locked <0x00000000d7a0> (a java.io.InputStream)
//! ```
//!
//! Frame (`at `) and lock (`- `) lines are appended to the current thread
//! with the marker removed. Every thread is hashed over its comma-joined
//! frames; unlike live capture, repeated stacks are kept.

use std::sync::OnceLock;

use dk_common::{ThreadDumpReport, ThreadRecord};
use regex::Regex;
use tracing::{debug, info};

use crate::collect::dedup::hash_frames;
use crate::logging::event_names;

/// Separator used when hashing parsed dump stacks.
pub const DUMP_FRAME_SEPARATOR: &str = ",";

/// Marker of the state line that may follow a thread header.
pub const THREAD_STATE_MARKER: &str = "Thread.State:";

/// Native thread id marker on a thread header.
pub const NATIVE_ID_MARKER: &str = "nid=";

/// Case-insensitive marker that opens the deadlock banner.
pub const DEADLOCK_MARKER: &str = "deadlock";

const FRAME_PREFIX: &str = "at ";
const LOCK_PREFIX: &str = "- ";

struct Patterns {
    native_id: Regex,
    state: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        native_id: Regex::new(r"nid=(0[xX][0-9a-fA-F]+|\d+)").unwrap(),
        state: Regex::new(r"Thread\.State:\s*(?P<state>[^\s(]+)(?:\s*\((?P<detail>[^)]*)\))?")
            .unwrap(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    Inside,
}

/// A parsed thread header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHeader {
    pub thread_id: u64,
    pub name: Option<String>,
    pub daemon: bool,
    pub native_id: Option<u64>,
}

/// Whether `line` starts a thread block: it carries both `#` and `nid=`.
///
/// VM-internal threads such as `"GC Thread#0"` match here but have no
/// `#<id>` token, so [`parse_thread_header`] rejects them and the block
/// they open is skipped.
pub fn is_thread_start(line: &str) -> bool {
    line.contains('#') && line.contains(NATIVE_ID_MARKER)
}

/// Parse a thread header line.
///
/// Returns `None` when the line is not a header or its `#` id is not numeric.
pub fn parse_thread_header(line: &str) -> Option<ThreadHeader> {
    if !line.contains(NATIVE_ID_MARKER) {
        return None;
    }
    let (name, tokens) = header_tokens(line);

    let mut thread_id = None;
    let mut daemon = false;
    for token in tokens {
        if thread_id.is_none() {
            if let Some(id) = token.strip_prefix('#') {
                thread_id = Some(id.parse::<u64>().ok()?);
                continue;
            }
        }
        if token == "daemon" {
            daemon = true;
        }
    }

    let native_id = patterns()
        .native_id
        .captures(line)
        .and_then(|c| parse_native_id(&c[1]));

    Some(ThreadHeader {
        thread_id: thread_id?,
        name,
        daemon,
        native_id,
    })
}

/// Split a header into the quoted thread name and the remaining tokens.
fn header_tokens(line: &str) -> (Option<String>, std::str::SplitWhitespace<'_>) {
    let trimmed = line.trim_start();
    if let Some(after_quote) = trimmed.strip_prefix('"') {
        if let Some(end) = after_quote.rfind('"') {
            let name = after_quote[..end].to_string();
            return (Some(name), after_quote[end + 1..].split_whitespace());
        }
    }
    (None, trimmed.split_whitespace())
}

fn parse_native_id(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse a `Thread.State:` line into state and optional parenthetical detail.
pub fn parse_state_line(line: &str) -> Option<(String, Option<String>)> {
    let caps = patterns().state.captures(line)?;
    let state = caps.name("state")?.as_str().to_string();
    let detail = caps
        .name("detail")
        .map(|d| d.as_str().trim().to_string())
        .filter(|d| !d.is_empty());
    Some((state, detail))
}

/// Parse the full text of a thread dump.
pub fn parse_thread_dump(content: &str) -> ThreadDumpReport {
    let lines: Vec<&str> = content.lines().collect();
    let mut report = ThreadDumpReport::default();
    let mut state = ScanState::Outside;
    let mut current: Option<ThreadRecord> = None;
    let mut seen_thread_start = false;
    let mut discarded = 0usize;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if is_thread_start(line) {
            seen_thread_start = true;
            if let Some(done) = current.take() {
                report.threads.push(done);
            }
            let Some(header) = parse_thread_header(line) else {
                debug!(line = i, "discarding thread header with unparsable id");
                discarded += 1;
                state = ScanState::Outside;
                continue;
            };

            let mut record = ThreadRecord::new(header.thread_id);
            record.name = header.name;
            record.os_thread_id = header.native_id;
            record.roles.background = header.daemon;

            if let Some(next) = lines.get(i) {
                if next.contains(THREAD_STATE_MARKER) {
                    if let Some((s, detail)) = parse_state_line(next) {
                        record.state = s;
                        record.state_detail = detail;
                    }
                    i += 1;
                }
            }

            current = Some(record);
            state = ScanState::Inside;
            continue;
        }

        match state {
            ScanState::Inside => {
                let trimmed = line.trim_start();
                let frame = trimmed
                    .strip_prefix(FRAME_PREFIX)
                    .or_else(|| trimmed.strip_prefix(LOCK_PREFIX));
                if let (Some(frame), Some(record)) = (frame, current.as_mut()) {
                    record.call_stack.push(frame.trim_end().to_string());
                }
            }
            ScanState::Outside if !seen_thread_start => {
                accumulate_deadlock(&mut report.deadlock_message, line);
            }
            ScanState::Outside => {}
        }
    }

    if let Some(done) = current.take() {
        report.threads.push(done);
    }

    for record in &mut report.threads {
        record.stack_hash = Some(hash_frames(&record.call_stack, DUMP_FRAME_SEPARATOR));
    }

    info!(
        event = event_names::PARSE_FINISHED,
        threads = report.threads.len(),
        discarded_headers = discarded,
        deadlock = report.has_deadlock(),
        "thread dump parsed"
    );
    report
}

fn accumulate_deadlock(message: &mut Option<String>, line: &str) {
    let trimmed = line.trim();
    match message {
        None => {
            if trimmed.to_ascii_lowercase().contains(DEADLOCK_MARKER) {
                *message = Some(trimmed.to_string());
            }
        }
        Some(text) => {
            if !trimmed.is_empty() {
                text.push('\n');
                text.push_str(trimmed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_HEADER: &str =
        r#""pool-1" #26 daemon prio=5 os_prio=0 tid=0x0 nid=0x36a4 runnable [0x0]"#;

    #[test]
    fn header_extracts_identity() {
        let header = parse_thread_header(POOL_HEADER).unwrap();
        assert_eq!(header.thread_id, 26);
        assert_eq!(header.name.as_deref(), Some("pool-1"));
        assert!(header.daemon);
        assert_eq!(header.native_id, Some(0x36a4));
    }

    #[test]
    fn name_containing_hash_is_not_the_id() {
        let line = r#""worker #9" #12 prio=5 nid=0x10 waiting"#;
        let header = parse_thread_header(line).unwrap();
        assert_eq!(header.thread_id, 12);
        assert_eq!(header.name.as_deref(), Some("worker #9"));
        assert!(!header.daemon);
    }

    #[test]
    fn unparsable_id_is_none() {
        assert!(is_thread_start(r#""x" #abc nid=0x1"#));
        assert!(parse_thread_header(r#""x" #abc nid=0x1"#).is_none());
        assert!(!is_thread_start("\"x\" #1 prio=5"));
    }

    #[test]
    fn state_line_splits_detail() {
        assert_eq!(
            parse_state_line("   java.lang.Thread.State: TIMED_WAITING (sleeping)"),
            Some(("TIMED_WAITING".to_string(), Some("sleeping".to_string())))
        );
        assert_eq!(
            parse_state_line("java.lang.Thread.State: RUNNABLE"),
            Some(("RUNNABLE".to_string(), None))
        );
    }

    #[test]
    fn pool_thread_example() {
        let text = format!("{POOL_HEADER}\n   java.lang.Thread.State: RUNNABLE\n");
        let report = parse_thread_dump(&text);
        assert_eq!(report.threads.len(), 1);
        let t = &report.threads[0];
        assert_eq!(t.thread_id, 26);
        assert_eq!(t.state, "RUNNABLE");
        assert!(t.state_detail.is_none());
        assert!(t.roles.background);
    }

    #[test]
    fn frames_and_locks_are_stripped_and_ordered() {
        let text = "\"main\" #1 prio=5 nid=0x1 waiting on condition\n\
                    \tat java.lang.Thread.sleep(Native Method)\n\
                    \t- locked <0x1> (a java.lang.Object)\n\
                    \tat App.main(App.java:5)\n\
                    \n\
                    noise that is ignored\n";
        let report = parse_thread_dump(text);
        let t = &report.threads[0];
        assert_eq!(
            t.call_stack,
            vec![
                "java.lang.Thread.sleep(Native Method)",
                "locked <0x1> (a java.lang.Object)",
                "App.main(App.java:5)",
            ]
        );
        assert_eq!(t.state, dk_common::UNKNOWN_STATE);
        assert_eq!(
            t.stack_hash.as_deref(),
            Some(hash_frames(&t.call_stack, ",").as_str())
        );
    }

    #[test]
    fn identical_stacks_are_kept() {
        let text = "\"a\" #1 nid=0x1\n at X.y()\n\"b\" #2 nid=0x2\n at X.y()\n";
        let report = parse_thread_dump(text);
        assert_eq!(report.threads.len(), 2);
        assert_eq!(report.threads[0].stack_hash, report.threads[1].stack_hash);
        assert_eq!(report.threads[1].call_stack, vec!["X.y()"]);
    }

    #[test]
    fn bad_header_ends_current_thread() {
        let text = "\"a\" #1 nid=0x1\n at A.a()\n\"b\" #zz nid=0x2\n at B.b()\n";
        let report = parse_thread_dump(text);
        assert_eq!(report.threads.len(), 1);
        assert_eq!(report.threads[0].call_stack, vec!["A.a()"]);
    }

    #[test]
    fn vm_thread_with_hash_in_name_closes_previous_block() {
        let text = "\"main\" #1 prio=5 nid=0x1 runnable\n\
                    \tat A.a()\n\
                    \"GC Thread#0\" os_prio=0 tid=0x1 nid=0x2 runnable\n\
                    \t- locked <0x9> (a X)\n\
                    \tat B.b()\n";
        assert!(is_thread_start(r#""GC Thread#0" os_prio=0 tid=0x1 nid=0x2 runnable"#));
        let report = parse_thread_dump(text);
        assert_eq!(report.threads.len(), 1);
        assert_eq!(report.threads[0].call_stack, vec!["A.a()"]);
    }

    #[test]
    fn deadlock_banner_before_first_thread() {
        let text = "Full thread dump\n\
                    Found one Java-level deadlock:\n\
                    =============================\n\
                    \n\
                    \"t1\": waiting to lock monitor 0x1\n\
                    \"a\" #1 nid=0x1\n\
                    Found one Java-level deadlock: ignored after start\n";
        let report = parse_thread_dump(text);
        let expected = "Found one Java-level deadlock:\n\
                        =============================\n\
                        \"t1\": waiting to lock monitor 0x1";
        assert_eq!(report.deadlock_message.as_deref(), Some(expected));
        assert_eq!(report.threads.len(), 1);
    }

    #[test]
    fn empty_input() {
        let report = parse_thread_dump("");
        assert!(report.threads.is_empty());
        assert!(!report.has_deadlock());
    }
}
