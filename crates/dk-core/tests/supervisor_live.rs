//! Supervisor tests against real child processes.
//!
//! The tool is `/bin/sh` and the "artifact" is a script, so each test
//! controls what the supervised process does without writing executables.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use dk_common::{BreachKind, ProcessOutcome, ProcessResourceSample};
use dk_core::collect::{
    ResourceLimits, ScriptedSampler, Supervisor, SupervisorConfig, SupervisorError,
    DEFAULT_CPU_CEILING_SECS, DEFAULT_MEMORY_CEILING_BYTES,
};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    path
}

fn supervisor() -> Supervisor {
    Supervisor::new(
        SupervisorConfig::new("/bin/sh")
            .with_poll_interval(Duration::from_millis(20))
            .with_drain_grace(Duration::from_millis(500)),
    )
}

fn idle() -> ProcessResourceSample {
    ProcessResourceSample::new(0.5, 0.1, 10 * 1024 * 1024)
}

#[test]
fn natural_exit_parses_payload() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(
        dir.path(),
        "web01_w3wp_1.dmp",
        r#"echo '{"interpretedResults":[{"title":"Deadlock","level":"error"}],"assets":{"clrmodule":{"count":2}}}'"#,
    );
    let mut sampler = ScriptedSampler::new(vec![idle()]);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();

    assert_eq!(
        result.outcome,
        ProcessOutcome::Exited { exit_code: Some(0) }
    );
    let payload = result.payload.expect("payload should parse");
    assert_eq!(payload.interpreted_results.len(), 1);
    assert_eq!(
        payload.interpreted_results[0].title.as_deref(),
        Some("Deadlock")
    );
    assert_eq!(
        payload.assets.clrmodule,
        Some(serde_json::json!({"count": 2}))
    );
    assert!(result.raw_output.contains("interpretedResults"));
    assert!(result.artifact.ends_with("web01_w3wp_1.dmp"));
}

#[test]
fn invalid_output_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(
        dir.path(),
        "a.dmp",
        "echo 'analysis crashed'\necho oops >&2\nexit 3\n",
    );
    let mut sampler = ScriptedSampler::new(vec![idle()]);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();

    assert_eq!(
        result.outcome,
        ProcessOutcome::Exited { exit_code: Some(3) }
    );
    assert!(result.payload.is_none());
    assert_eq!(result.raw_output.trim(), "analysis crashed");
    assert_eq!(result.diagnostics_output.trim(), "oops");
}

#[test]
fn empty_output_has_no_payload() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "true\n");
    let mut sampler = ScriptedSampler::new(vec![idle()]);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();
    assert!(result.raw_output.is_empty());
    assert!(result.payload.is_none());
}

#[test]
fn cpu_breach_kills_on_the_breaching_tick() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "sleep 30\n");
    let breaching = ProcessResourceSample::new(250.0, 50.5, 1024);
    let k = 3;
    let mut samples = vec![idle(); k];
    samples.push(breaching);
    samples.push(ProcessResourceSample::new(999.0, 0.0, 0));
    let mut sampler = ScriptedSampler::new(samples);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();

    match result.outcome {
        ProcessOutcome::KilledForResourceBreach { breach } => {
            assert_eq!(breach.kind, BreachKind::Cpu);
            assert_eq!(breach.tick, k as u32);
            assert_eq!(breach.sample, breaching);
            assert!(breach.sample.total_cpu_secs > DEFAULT_CPU_CEILING_SECS);
        }
        other => panic!("expected a kill, got {other:?}"),
    }
    // Polling stops right after the kill.
    assert_eq!(sampler.taken(), k + 1);
    assert_eq!(result.samples.len(), k + 1);
    assert!(result.elapsed_ms < 10_000);
}

#[test]
fn memory_breach_kills() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "sleep 30\n");
    let mut sampler = ScriptedSampler::new(vec![
        idle(),
        ProcessResourceSample::new(1.0, 0.0, DEFAULT_MEMORY_CEILING_BYTES + 1),
    ]);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();

    match result.outcome {
        ProcessOutcome::KilledForResourceBreach { breach } => {
            assert_eq!(breach.kind, BreachKind::Memory);
            assert_eq!(breach.tick, 1);
        }
        other => panic!("expected a kill, got {other:?}"),
    }
}

#[test]
fn custom_limits_apply() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "sleep 30\n");
    let supervisor = Supervisor::new(
        SupervisorConfig::new("/bin/sh")
            .with_poll_interval(Duration::from_millis(10))
            .with_limits(ResourceLimits {
                cpu_ceiling_secs: 1.0,
                memory_ceiling_bytes: u64::MAX,
            }),
    );
    let mut sampler = ScriptedSampler::new(vec![ProcessResourceSample::new(0.9, 0.2, 0)]);

    let result = supervisor.run_with_sampler(&tool, &mut sampler).unwrap();
    assert!(result.outcome.was_killed());
}

#[test]
fn output_written_before_kill_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "echo partial\nsleep 30\n");
    let mut sampler = ScriptedSampler::new(vec![
        idle(),
        idle(),
        idle(),
        ProcessResourceSample::new(400.0, 0.0, 0),
    ]);

    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();
    assert!(result.outcome.was_killed());
    assert_eq!(result.raw_output.trim(), "partial");
    assert!(result.payload.is_none());
}

#[test]
fn grandchild_holding_pipe_does_not_hang() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "a.dmp", "sleep 30 &\necho '{}'\n");
    let mut sampler = ScriptedSampler::new(vec![idle()]);

    let started = std::time::Instant::now();
    let result = supervisor().run_with_sampler(&tool, &mut sampler).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        result.outcome,
        ProcessOutcome::Exited { exit_code: Some(0) }
    );
}

#[test]
fn missing_tool_is_reported() {
    let supervisor = Supervisor::new(SupervisorConfig::new("/nonexistent/diag/analyzer"));
    let err = supervisor
        .run_with_sampler(Path::new("a.dmp"), &mut ScriptedSampler::default())
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ToolNotFound(_)));
    let common: dk_common::Error = err.into();
    assert_eq!(common.code(), 31);
}

#[cfg(target_os = "linux")]
#[test]
fn procfs_sampling_of_real_child() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(
        dir.path(),
        "a.dmp",
        "i=0\nwhile [ $i -lt 2000 ]; do i=$((i+1)); done\n",
    );
    let supervisor = Supervisor::new(
        SupervisorConfig::new("/bin/sh").with_poll_interval(Duration::from_millis(5)),
    );

    let result = supervisor.run(&tool).unwrap();

    assert_eq!(
        result.outcome,
        ProcessOutcome::Exited { exit_code: Some(0) }
    );
    for sample in &result.samples {
        assert!(sample.total_cpu_secs >= 0.0);
        assert!(
            (sample.total_cpu_secs - (sample.user_cpu_secs + sample.privileged_cpu_secs)).abs()
                < 1e-9
        );
    }
}
