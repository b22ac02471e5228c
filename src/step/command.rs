use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::cmd::{self, CmdLineRunner};
use crate::error::ActionError;
use crate::step_context::StepContext;

/// A step action that runs one external program.
///
/// By default a non-zero exit is an execution failure. `validation` turns it
/// into a validation failure (a build that does not compile means the input
/// is bad), and `fail_on_output` treats anything printed on stdout as a
/// validation failure, for checkers that list offending files and exit 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: IndexMap<String, String>,
    pub validation: bool,
    pub fail_on_output: bool,
    pub quiet: bool,
}

impl CommandStep {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Runs `script` through `shell` (default `sh -o errexit -c`).
    pub fn script(script: impl Into<String>, shell: Option<&str>) -> Self {
        let step = match shell {
            Some(shell) => {
                let mut parts = shell.split_whitespace();
                let program = parts.next().unwrap_or("sh");
                Self::new(program, parts.chain(std::iter::once("-c")))
            }
            None if cfg!(windows) => Self::new("cmd.exe", ["/c"]),
            None => Self::new("sh", ["-o", "errexit", "-c"]),
        };
        step.arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn fail_on_output(mut self, fail_on_output: bool) -> Self {
        self.fail_on_output = fail_on_output;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub(crate) async fn run(&self, ctx: StepContext) -> Result<(), ActionError> {
        let dir = match &self.dir {
            Some(dir) => ctx.resolve(dir),
            None => ctx.dir.clone(),
        };
        let runner = CmdLineRunner::new(&self.program)
            .args(&self.args)
            .current_dir(&dir)
            .envs(&ctx.env)
            .envs(&self.env)
            .with_cancel_token(ctx.cancel.clone())
            .show_output(!self.quiet && !self.fail_on_output);
        match runner.execute().await {
            Ok(result) => {
                let stdout = result.stdout.trim_end();
                if self.fail_on_output && !stdout.is_empty() {
                    return Err(ActionError::validation(format!(
                        "{self} reported problems:\n{stdout}"
                    )));
                }
                Ok(())
            }
            Err(cmd::Error::Cancelled(_)) => {
                Err(ActionError::interrupted(format!("{self} was stopped")))
            }
            Err(err @ cmd::Error::ScriptFailed(..)) if self.validation => {
                Err(ActionError::validation(err.to_string()))
            }
            Err(err) => Err(ActionError::failed(format!("failed to run {self}"), err)),
        }
    }
}

impl fmt::Display for CommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.program)
        } else {
            write!(f, "{} {}", self.program, self.args.iter().join(" "))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::Cause;
    use crate::step_context::RunContext;
    use std::time::Duration;

    fn ctx() -> StepContext {
        RunContext::new(std::env::temp_dir()).step_context("cmd")
    }

    #[tokio::test]
    async fn success() {
        CommandStep::script("true", None)
            .run(ctx())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_execution_failure() {
        let err = CommandStep::script("exit 4", None)
            .quiet(true)
            .run(ctx())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "failed to run sh -o errexit -c exit 4");
        match err.cause().downcast_ref::<cmd::Error>() {
            Some(cmd::Error::ScriptFailed(_, result)) => {
                assert_eq!(result.status.code(), Some(4))
            }
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_zero_exit_can_mean_invalid_input() {
        let err = CommandStep::new("sh", ["-c", "exit 1"])
            .validation(true)
            .run(ctx())
            .await
            .unwrap_err();
        assert!(err.cause().is_validation());
        assert_eq!(err.message(), "sh exited with non-zero status: exit code 1");
    }

    #[tokio::test]
    async fn output_means_failure_when_asked() {
        let err = CommandStep::script("echo main.go", None)
            .fail_on_output(true)
            .run(ctx())
            .await
            .unwrap_err();
        assert!(err.cause().is_validation());
        assert!(err.message().ends_with("reported problems:\nmain.go"));

        CommandStep::script("echo all good >&2", None)
            .fail_on_output(true)
            .run(ctx())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn env_and_dir_are_applied() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("web")).unwrap();
        std::fs::write(root.path().join("web").join("marker"), "").unwrap();
        let ctx = RunContext::new(root.path())
            .with_env("FROM_RUN", "a")
            .step_context("cmd");
        CommandStep::script(r#"test -f marker && test "$FROM_RUN$FROM_STEP" = ab"#, None)
            .dir("web")
            .env("FROM_STEP", "b")
            .run(ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_opaque() {
        let err = CommandStep::new("no-such-binary-for-cirun", Vec::<String>::new())
            .run(ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err.cause(),
            Cause::Failed(inner) if inner.downcast_ref::<cmd::Error>().is_some()
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = CommandStep::new("sleep", ["30"])
            .run(ctx)
            .await
            .unwrap_err();
        assert!(err.cause().is_interrupted());
    }

    #[test]
    fn custom_shell() {
        let step = CommandStep::script("echo hi", Some("bash -eu"));
        assert_eq!(step.program, "bash");
        assert_eq!(step.args, ["-eu", "-c", "echo hi"]);
        assert_eq!(step.to_string(), "bash -eu -c echo hi");
    }
}
