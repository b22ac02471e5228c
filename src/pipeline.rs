//! Sequential step execution.
//!
//! A [`Pipeline`] runs its steps one at a time, in the order they were given,
//! and stops at the first one that fails. Every failure comes back as a
//! [`StepError`] naming the step it came from:
//!
//! - the action returned an error: its message and cause are kept as-is
//! - the run's cancel token tripped (before or during a step): [`Cause::Interrupted`]
//! - the step outlived its timeout: [`Cause::Failed`] holding a [`StepTimeout`]
//!
//! A step that is interrupted or times out gets `grace` to notice its token
//! and return on its own; after that its future is dropped.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;

use crate::error::{Cause, Error, StepError, StepTimeout};
use crate::step::{ActionFuture, Step};
use crate::step_context::RunContext;
use crate::timings::{StepOutcome, StepTimingGuard, TimingRecorder};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<Step>,
    grace: Duration,
    timing: Option<Arc<TimingRecorder>>,
}

impl Pipeline {
    /// Fails if two steps share a name.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Result<Self, Error> {
        let steps: Vec<Step> = steps.into_iter().collect();
        let mut seen = IndexSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(Error::DuplicateStep(step.name().to_string()));
            }
        }
        Ok(Self {
            steps,
            grace: DEFAULT_GRACE,
            timing: None,
        })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_timing(mut self, timing: Arc<TimingRecorder>) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order. Consumes the pipeline: a pipeline runs once.
    #[tracing::instrument(level = "info", name = "pipeline.execute", skip_all, fields(steps = self.steps.len()))]
    pub async fn execute(self, ctx: &RunContext) -> Result<(), StepError> {
        for step in &self.steps {
            if ctx.cancel.is_cancelled() {
                debug!("{step}: not starting, run was interrupted");
                return Err(StepError::interrupted(step.name()));
            }
            let guard = self
                .timing
                .as_ref()
                .map(|timing| StepTimingGuard::new(timing.clone(), step.name()));
            let result = self.run_step(step, ctx).await;
            let outcome = outcome_of(&result);
            if let Some(guard) = guard {
                guard.finish(outcome);
            }
            match result {
                Ok(()) => info!("{step}: {outcome}"),
                Err(err) => {
                    match outcome {
                        StepOutcome::Interrupted => warn!("{step}: {outcome}"),
                        _ => error!("{step}: {outcome}: {}: {}", err.message(), err.cause()),
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", name = "step.run", skip_all, fields(step = %step))]
    async fn run_step(&self, step: &Step, ctx: &RunContext) -> Result<(), StepError> {
        info!("{step}: running");
        let step_ctx = ctx.step_context(step.name());
        let step_cancel = step_ctx.cancel.clone();
        let mut action = step.start(step_ctx);
        let deadline = async {
            match step.timeout() {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                self.wind_down(step, action).await;
                Err(StepError::interrupted(step.name()))
            }
            result = &mut action => {
                result.map_err(|err| StepError::from_action(step.name(), err))
            }
            _ = deadline => {
                let timeout = step.timeout().unwrap_or_default();
                step_cancel.cancel();
                self.wind_down(step, action).await;
                Err(StepError::new(
                    step.name(),
                    format!("did not finish within {timeout:?}"),
                    Cause::failed(StepTimeout(timeout)),
                ))
            }
        }
    }

    /// Gives a cancelled action `grace` to return before dropping it.
    async fn wind_down(&self, step: &Step, action: ActionFuture) {
        match tokio::time::timeout(self.grace, action).await {
            Ok(Ok(())) => debug!("{step}: finished after being cancelled"),
            Ok(Err(err)) => debug!("{step}: stopped: {err}"),
            Err(_) => warn!(
                "{step}: still running {:?} after cancellation, abandoning it",
                self.grace
            ),
        }
    }
}

fn outcome_of(result: &Result<(), StepError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Passed,
        Err(err) if err.is_interrupted() => StepOutcome::Interrupted,
        Err(err) if err.cause().downcast_ref::<StepTimeout>().is_some() => StepOutcome::TimedOut,
        Err(_) => StepOutcome::Failed,
    }
}
