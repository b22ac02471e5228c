use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::{
    Result, env,
    error::Error,
    pipeline::{DEFAULT_GRACE, Pipeline},
    step::{CommandStep, Step},
};

pub const DEFAULT_CONFIG_FILE: &str = "cirun.toml";

/// The pipeline definition read from `cirun.toml`.
///
/// ```toml
/// grace = 5
///
/// [env]
/// CI = "true"
///
/// [steps.format-check]
/// cmd = ["gofmt", "-l", "."]
/// fail_on_output = true
///
/// [steps.build]
/// run = "go build ./..."
/// validation = true
///
/// [steps.push]
/// cmd = ["git", "push", "origin", "main"]
/// timeout = 10
/// ```
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(debug_assertions, serde(deny_unknown_fields))]
pub struct Config {
    /// Seconds a cancelled step gets to wind down
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub grace: Option<Duration>,
    /// Environment passed to every step
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Steps in the order they run
    #[serde(default)]
    pub steps: IndexMap<String, StepConfig>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(debug_assertions, serde(deny_unknown_fields))]
pub struct StepConfig {
    /// Script run through `shell`
    pub run: Option<String>,
    /// Program and arguments, run without a shell
    pub cmd: Option<Vec<String>>,
    /// Shell used for `run`, e.g. "bash -eu"
    pub shell: Option<String>,
    /// Working directory, relative to the project root
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
    /// A non-zero exit means the input is invalid
    #[serde(default)]
    pub validation: bool,
    /// Anything printed on stdout means the input is invalid
    #[serde(default)]
    pub fail_on_output: bool,
    /// Capture output without echoing it
    #[serde(default)]
    pub quiet: bool,
}

impl Config {
    /// Where the config lives: `explicit`, then `CIRUN_FILE`, then
    /// `cirun.toml` under `root`.
    pub fn resolve_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| env::CIRUN_FILE.clone())
            .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()).into());
        }
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config =
            Self::parse(&raw).wrap_err_with(|| format!("invalid config {}", path.display()))?;
        debug!("loaded {} step(s) from {}", config.steps.len(), path.display());
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        for (name, step) in &self.steps {
            step.validate(name)?;
        }
        Ok(())
    }

    pub fn grace(&self) -> Duration {
        self.grace.unwrap_or(DEFAULT_GRACE)
    }

    /// Builds the pipeline. A non-empty `only` keeps just those steps and
    /// `skip` drops steps. Order always follows the config file.
    pub fn pipeline(&self, only: &[String], skip: &IndexSet<String>) -> Result<Pipeline> {
        if let Some(name) = only.iter().find(|name| !self.steps.contains_key(*name)) {
            return Err(Error::UnknownStep(name.clone()).into());
        }
        for name in skip.iter().filter(|name| !self.steps.contains_key(*name)) {
            warn!("cannot skip unknown step: {name}");
        }
        let steps = self
            .steps
            .iter()
            .filter(|(name, _)| only.is_empty() || only.contains(*name))
            .filter(|(name, _)| {
                let skipped = skip.contains(*name);
                if skipped {
                    info!("{name}: skipped");
                }
                !skipped
            })
            .map(|(name, step)| step.to_step(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Pipeline::new(steps)?.with_grace(self.grace()))
    }
}

impl StepConfig {
    fn validate(&self, name: &str) -> std::result::Result<(), Error> {
        match (&self.run, &self.cmd) {
            (Some(_), Some(_)) | (None, None) => Err(Error::AmbiguousCommand(name.to_string())),
            (Some(run), None) if run.trim().is_empty() => Err(Error::EmptyCommand(name.to_string())),
            (None, Some(cmd)) if cmd.is_empty() || cmd[0].trim().is_empty() => {
                Err(Error::EmptyCommand(name.to_string()))
            }
            (None, Some(_)) if self.shell.is_some() => {
                Err(Error::ShellWithoutRun(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn to_step(&self, name: &str) -> std::result::Result<Step, Error> {
        self.validate(name)?;
        let mut command = match (&self.run, &self.cmd) {
            (Some(run), _) => CommandStep::script(run.as_str(), self.shell.as_deref()),
            (None, Some(cmd)) => CommandStep::new(&cmd[0], cmd[1..].iter().map(String::as_str)),
            (None, None) => unreachable!("validated above"),
        }
        .validation(self.validation)
        .fail_on_output(self.fail_on_output)
        .quiet(self.quiet);
        if let Some(dir) = &self.dir {
            command = command.dir(dir);
        }
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        let mut step = Step::command(name, command);
        if let Some(timeout) = self.timeout {
            step = step.with_timeout(timeout);
        }
        Ok(step)
    }
}

impl Display for StepConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.run, &self.cmd) {
            (Some(run), _) => write!(f, "{run}"),
            (None, Some(cmd)) => write!(f, "{}", cmd.iter().join(" ")),
            (None, None) => Ok(()),
        }
    }
}
