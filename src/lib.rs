#[macro_use]
extern crate log;

pub use error::{ActionError, Cause, Error, Result, StepError, StepTimeout};
pub use pipeline::Pipeline;
pub use step::{CommandStep, Step};
pub use step_context::{RunContext, StepContext};
pub use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod cmd;
pub mod config;
pub mod env;
pub mod error;
mod logger;
pub mod pipeline;
pub mod step;
pub mod step_context;
pub mod timings;
mod trace;
pub mod watcher;

#[cfg(test)]
mod tests;
