use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = eyre::Result<T>;

/// Any error an action can hand back as an opaque cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Exit status for validation and execution failures.
pub const EXIT_FAILURE: i32 = 1;
/// Exit status reserved for runs stopped by an interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors raised while loading configuration or assembling a pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("step \"{0}\" must set exactly one of `run` or `cmd`")]
    AmbiguousCommand(String),
    #[error("step \"{0}\" has an empty command")]
    EmptyCommand(String),
    #[error("step \"{0}\" sets `shell` without `run`")]
    ShellWithoutRun(String),
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
}

/// Why a step stopped the pipeline.
///
/// `Validation` and `Interrupted` are the two well-known categories; every
/// other failure is carried as-is in `Failed` so it can still be inspected.
#[derive(Debug)]
pub enum Cause {
    /// The step's input or preconditions were invalid. Never transient.
    Validation,
    /// The run was cancelled by an external signal.
    Interrupted,
    /// Anything else the action reported.
    Failed(BoxError),
}

impl Cause {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Cause::Failed(err.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Cause::Validation)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Cause::Interrupted)
    }

    /// The error a `source()` walk should reach next: the wrapped error for
    /// `Failed`, the cause itself otherwise.
    fn as_source(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Cause::Failed(err) => &**err,
            other => other,
        }
    }

    /// Looks inside a `Failed` cause for a concrete error type.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            Cause::Failed(err) => err.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Validation => write!(f, "validation failed"),
            Cause::Interrupted => write!(f, "received signal"),
            Cause::Failed(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for Cause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Cause::Failed(err) => Some(&**err),
            _ => None,
        }
    }
}

/// Failure reported by a step action, before the pipeline tags it with the
/// step's name.
#[derive(Debug)]
pub struct ActionError {
    message: String,
    cause: Cause,
}

impl ActionError {
    pub fn new(message: impl Into<String>, cause: Cause) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, Cause::Validation)
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(message, Cause::Interrupted)
    }

    pub fn failed(message: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Self::new(message, Cause::Failed(err.into()))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.cause)
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_source())
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        Self::failed("i/o error", err)
    }
}

impl From<eyre::Report> for ActionError {
    fn from(err: eyre::Report) -> Self {
        Self::failed(err.to_string(), err)
    }
}

/// A failure tagged with the name of the step that produced it.
#[derive(Debug)]
pub struct StepError {
    step: String,
    message: String,
    cause: Cause,
}

impl StepError {
    pub fn new(step: impl Into<String>, message: impl Into<String>, cause: Cause) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            cause,
        }
    }

    pub(crate) fn from_action(step: impl Into<String>, err: ActionError) -> Self {
        Self::new(step, err.message, err.cause)
    }

    pub(crate) fn interrupted(step: impl Into<String>) -> Self {
        Self::new(step, "run interrupted", Cause::Interrupted)
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The cause exactly as it was handed over when the error was built.
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn into_cause(self) -> Cause {
        self.cause
    }

    /// Two step errors match when they came from the same step. Message and
    /// cause are ignored.
    pub fn matches(&self, other: &StepError) -> bool {
        self.step == other.step
    }

    pub fn is_validation(&self) -> bool {
        self.cause.is_validation()
    }

    pub fn is_interrupted(&self) -> bool {
        self.cause.is_interrupted()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_interrupted() {
            EXIT_INTERRUPTED
        } else {
            EXIT_FAILURE
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step: {:?}: {}: cause: {}",
            self.step, self.message, self.cause
        )
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_source())
    }
}

/// Cause recorded when a step outlives its own timeout.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {0:?}")]
pub struct StepTimeout(pub Duration);
