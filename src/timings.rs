use crate::Result;
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::{sync::Mutex as StdMutex, time::Instant};

/// How a step's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepOutcome {
    Passed,
    Failed,
    Interrupted,
    TimedOut,
}

#[derive(Debug)]
pub struct TimingRecorder {
    started_at: DateTime<Utc>,
    start_instant: Instant,
    steps: StdMutex<IndexMap<String, TimingReportStep>>,
}

#[derive(Debug, Serialize, Clone)]
struct TimingReportTotal {
    started_at: String,
    wall_time_ms: u128,
}

#[derive(Debug, Serialize, Clone)]
struct TimingReportJson {
    total: TimingReportTotal,
    steps: IndexMap<String, TimingReportStep>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
struct TimingReportStep {
    wall_time_ms: u128,
    outcome: StepOutcome,
}

impl Default for TimingRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start_instant: Instant::now(),
            steps: StdMutex::new(IndexMap::new()),
        }
    }

    pub fn now_ms(&self) -> u128 {
        self.start_instant.elapsed().as_millis()
    }

    pub fn record(&self, step: &str, start_ms: u128, end_ms: u128, outcome: StepOutcome) {
        let mut steps = self.steps.lock().unwrap();
        steps.insert(
            step.to_string(),
            TimingReportStep {
                wall_time_ms: end_ms.saturating_sub(start_ms),
                outcome,
            },
        );
    }

    pub fn outcome(&self, step: &str) -> Option<StepOutcome> {
        self.steps.lock().unwrap().get(step).map(|s| s.outcome)
    }

    fn build_report(&self) -> TimingReportJson {
        TimingReportJson {
            total: TimingReportTotal {
                started_at: self.started_at.to_rfc3339(),
                wall_time_ms: self.now_ms(),
            },
            steps: self.steps.lock().unwrap().clone(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(&self.build_report())?;
        std::fs::write(path, data).wrap_err_with(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        let s = serde_json::to_string_pretty(&self.build_report())?;
        Ok(s)
    }
}

/// Measures one step from creation until `finish`.
#[derive(Debug)]
pub struct StepTimingGuard {
    recorder: Arc<TimingRecorder>,
    step_name: String,
    start_ms: u128,
}

impl StepTimingGuard {
    pub fn new(recorder: Arc<TimingRecorder>, step: &str) -> Self {
        let start_ms = recorder.now_ms();
        Self {
            recorder,
            step_name: step.to_string(),
            start_ms,
        }
    }

    pub fn finish(self, outcome: StepOutcome) {
        let end_ms = self.recorder.now_ms();
        self.recorder
            .record(&self.step_name, self.start_ms, end_ms, outcome);
    }
}
