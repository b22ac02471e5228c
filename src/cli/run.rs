use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::Project;
use crate::{
    Result, StepError, env, step_context::RunContext, timings::TimingRecorder, watcher,
};

/// Runs the pipeline, stopping at the first failing step
#[derive(Debug, clap::Args)]
#[clap(visible_alias = "r")]
pub struct Run {
    /// Run only these steps
    #[clap(short, long = "step", value_name = "STEP")]
    steps: Vec<String>,
    /// Skip these steps
    #[clap(short = 'S', long = "skip-step", value_name = "STEP")]
    skip_steps: Vec<String>,
}

impl Run {
    pub async fn run(&self, project: &Project) -> Result<()> {
        let config = project.load()?;
        let mut skip = env::CIRUN_SKIP_STEPS.clone();
        skip.extend(self.skip_steps.iter().cloned());

        let timing = Arc::new(TimingRecorder::new());
        let pipeline = config
            .pipeline(&self.steps, &skip)?
            .with_timing(timing.clone());
        if pipeline.is_empty() {
            info!("no steps to run");
            return Ok(());
        }
        let total = pipeline.len();

        let cancel = CancellationToken::new();
        let ctx = RunContext::new(project.root.clone())
            .with_cancel(cancel.clone())
            .with_envs(config.env.clone());
        let watcher = watcher::watch_for_signals(cancel);
        let result = pipeline.execute(&ctx).await;
        watcher.abort();

        finish(result, &timing, env::CIRUN_TIMING_JSON.as_deref())?;
        info!("all {total} steps passed");
        Ok(())
    }
}

/// Writes the timing report, if asked for, and hands back the run's result.
/// A report that cannot be written never hides the step failure.
fn finish(
    result: std::result::Result<(), StepError>,
    timing: &TimingRecorder,
    report: Option<&Path>,
) -> Result<()> {
    if let Some(path) = report
        && let Err(err) = timing.write_json(path)
    {
        warn!("failed to write timing report: {err:#}");
    }
    Ok(result?)
}
