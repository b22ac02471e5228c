use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

/// Shared parameters for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Tripped once, by the signal watcher, when the run should stop.
    pub cancel: CancellationToken,
    /// Project root every step runs relative to.
    pub dir: PathBuf,
    /// Extra environment handed to every step.
    pub env: IndexMap<String, String>,
}

impl RunContext {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            dir: dir.into(),
            env: IndexMap::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Builds the context one step's action sees. Its token is a child of the
    /// run's token: tripping the run trips the step, but a step deadline only
    /// trips the step.
    pub(crate) fn step_context(&self, step: &str) -> StepContext {
        StepContext {
            step: step.to_string(),
            cancel: self.cancel.child_token(),
            dir: self.dir.clone(),
            env: self.env.clone(),
        }
    }
}

/// What a step action receives.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub step: String,
    pub cancel: CancellationToken,
    pub dir: PathBuf,
    pub env: IndexMap<String, String>,
}

impl StepContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the step should stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Resolves `path` against the project root unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_token_follows_run_token() {
        let run = RunContext::new("/tmp/project");
        let step = run.step_context("build");
        assert!(!step.is_cancelled());
        run.cancel.cancel();
        assert!(step.is_cancelled());
    }

    #[test]
    fn step_token_does_not_trip_run() {
        let run = RunContext::new("/tmp/project");
        let step = run.step_context("deploy");
        step.cancel.cancel();
        assert!(step.is_cancelled());
        assert!(!run.cancel.is_cancelled());
    }

    #[test]
    fn resolve_relative_to_root() {
        let ctx = RunContext::new("/srv/app")
            .with_env("CI", "true")
            .step_context("build");
        assert_eq!(ctx.resolve(Path::new("web")), PathBuf::from("/srv/app/web"));
        assert_eq!(ctx.resolve(Path::new("/opt")), PathBuf::from("/opt"));
        assert_eq!(ctx.env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(ctx.step, "build");
    }
}
