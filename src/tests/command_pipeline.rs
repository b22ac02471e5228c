#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;

use crate::{
    CancellationToken, RunContext, StepTimeout,
    config::Config,
    timings::{StepOutcome, TimingRecorder},
};

fn load(raw: &str) -> Config {
    Config::parse(raw).unwrap()
}

#[tokio::test]
async fn steps_from_config_run_in_file_order() {
    let root = tempfile::tempdir().unwrap();
    let config = load(
        r#"
[env]
STAGE = "ci"

[steps.build]
run = "echo build-$STAGE >> log"
validation = true

[steps.test]
cmd = ["sh", "-c", "echo test >> log"]

[steps.format-check]
run = "true"
fail_on_output = true
"#,
    );
    let timing = Arc::new(TimingRecorder::new());
    let pipeline = config
        .pipeline(&[], &IndexSet::new())
        .unwrap()
        .with_timing(timing.clone());
    let ctx = RunContext::new(root.path()).with_envs(config.env.clone());
    pipeline.execute(&ctx).await.unwrap();

    let log = std::fs::read_to_string(root.path().join("log")).unwrap();
    assert_eq!(log, "build-ci\ntest\n");
    for step in ["build", "test", "format-check"] {
        assert_eq!(timing.outcome(step), Some(StepOutcome::Passed));
    }
}

#[tokio::test]
async fn formatter_output_stops_the_run() {
    let root = tempfile::tempdir().unwrap();
    let config = load(
        r#"
[steps.format-check]
run = "echo main.go"
fail_on_output = true

[steps.build]
run = "touch built"
"#,
    );
    let pipeline = config.pipeline(&[], &IndexSet::new()).unwrap();
    let err = pipeline
        .execute(&RunContext::new(root.path()))
        .await
        .unwrap_err();
    assert_eq!(err.step(), "format-check");
    assert!(err.is_validation());
    assert_eq!(err.exit_code(), crate::error::EXIT_FAILURE);
    assert!(!root.path().join("built").exists());
}

#[tokio::test]
async fn slow_push_times_out_and_is_killed() {
    let root = tempfile::tempdir().unwrap();
    let config = load(
        r#"
grace = 1

[steps.push]
cmd = ["sleep", "30"]
timeout = 1
"#,
    );
    let timing = Arc::new(TimingRecorder::new());
    let pipeline = config
        .pipeline(&[], &IndexSet::new())
        .unwrap()
        .with_timing(timing.clone());
    let cancel = CancellationToken::new();
    let started = std::time::Instant::now();
    let err = pipeline
        .execute(&RunContext::new(root.path()).with_cancel(cancel.clone()))
        .await
        .unwrap_err();

    assert_eq!(err.step(), "push");
    assert_eq!(
        err.cause().downcast_ref::<StepTimeout>().map(|t| t.0),
        Some(Duration::from_secs(1))
    );
    assert!(!cancel.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(timing.outcome("push"), Some(StepOutcome::TimedOut));
}

#[tokio::test]
async fn background_children_do_not_stall_the_run() {
    let root = tempfile::tempdir().unwrap();
    let config = load(
        r#"
[steps.serve]
run = "sleep 5 & echo started"
fail_on_output = true

[steps.build]
run = "touch built"
"#,
    );
    let started = std::time::Instant::now();
    let err = config
        .pipeline(&[], &IndexSet::new())
        .unwrap()
        .execute(&RunContext::new(root.path()))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(err.step(), "serve");
    assert!(err.is_validation());
    assert!(err.message().ends_with("started"), "{}", err.message());
    assert!(!root.path().join("built").exists());
}
