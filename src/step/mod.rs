//! Steps: named units of pipeline work.
//!
//! A [`Step`] pairs a name with an action. The action is any async function
//! taking a [`StepContext`] and returning `Result<(), ActionError>`; it knows
//! nothing about the pipeline it runs in. [`CommandStep`] is the built-in
//! action that runs an external program.
//!
//! ```ignore
//! let fmt = Step::command(
//!     "format-check",
//!     CommandStep::new("cargo", ["fmt", "--check"]).validation(true),
//! );
//! let smoke = Step::new("smoke", |ctx| async move {
//!     if ctx.is_cancelled() {
//!         return Err(ActionError::interrupted("stopped before smoke test"));
//!     }
//!     Ok(())
//! })
//! .with_timeout(Duration::from_secs(30));
//! ```

mod command;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ActionError;
use crate::step_context::StepContext;

pub use command::CommandStep;

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;
type ActionFn = dyn Fn(StepContext) -> ActionFuture + Send + Sync;

#[derive(Clone)]
pub struct Step {
    name: String,
    action: Arc<ActionFn>,
    timeout: Option<Duration>,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move |ctx: StepContext| Box::pin(action(ctx)) as ActionFuture),
            timeout: None,
        }
    }

    pub fn command(name: impl Into<String>, command: CommandStep) -> Self {
        let command = Arc::new(command);
        Self::new(name, move |ctx| {
            let command = command.clone();
            async move { command.run(ctx).await }
        })
    }

    /// Fail the step if its action has not returned after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn start(&self, ctx: StepContext) -> ActionFuture {
        (self.action)(ctx)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_context::RunContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn action_runs_each_time_it_is_started() {
        let calls = Arc::new(AtomicUsize::new(0));
        let step = Step::new("count", {
            let calls = calls.clone();
            move |_ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        });
        let ctx = RunContext::new(".");
        step.start(ctx.step_context(step.name())).await.unwrap();
        step.clone()
            .start(ctx.step_context(step.name()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn action_sees_its_own_name() {
        let step = Step::new("lint", |ctx| async move {
            if ctx.step == "lint" {
                Ok(())
            } else {
                Err(ActionError::validation(format!("wrong step: {}", ctx.step)))
            }
        });
        let ctx = RunContext::new(".");
        step.start(ctx.step_context(step.name())).await.unwrap();
    }

    #[test]
    fn display_and_timeout() {
        let step = Step::new("deploy", |_| async { Ok(()) }).with_timeout(Duration::from_secs(10));
        assert_eq!(step.to_string(), "deploy");
        assert_eq!(step.timeout(), Some(Duration::from_secs(10)));
        assert!(format!("{step:?}").contains("deploy"));
    }
}
