use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;

use crate::{
    Result,
    config::Config,
    env::{self, TraceMode},
    logger,
};

mod list;
mod run;
mod validate;

#[derive(clap::Parser)]
#[clap(name = "cirun", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    /// Run as if started in this directory
    #[clap(short = 'C', long = "cd", global = true, value_name = "DIR")]
    cd: Option<PathBuf>,
    /// Path to the pipeline file (default: cirun.toml)
    #[clap(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Enables verbose output
    #[clap(short, long, global = true, action = clap::ArgAction::Count, overrides_with = "quiet")]
    verbose: u8,
    /// Suppresses output
    #[clap(short, long, global = true, overrides_with = "verbose")]
    quiet: bool,
    /// Enable tracing spans for the pipeline and its steps
    #[clap(long, global = true)]
    trace: bool,
    /// Output traces as JSON Lines (requires --trace)
    #[clap(long, global = true, requires = "trace")]
    json: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    List(Box<list::List>),
    Run(Box<run::Run>),
    Validate(Box<validate::Validate>),
}

/// Where the pipeline runs and which file describes it.
#[derive(Debug)]
pub(crate) struct Project {
    root: PathBuf,
    config_path: PathBuf,
}

impl Project {
    fn new(cd: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        let root = match cd {
            Some(dir) => dir
                .canonicalize()
                .wrap_err_with(|| format!("cannot enter {}", dir.display()))?,
            None => std::env::current_dir()?,
        };
        let config_path = Config::resolve_path(&root, config.as_deref());
        Ok(Self { root, config_path })
    }

    fn load(&self) -> Result<Config> {
        Config::load(&self.config_path)
    }
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    let trace_mode = *env::CIRUN_TRACE;
    let trace_enabled = args.trace || trace_mode != TraceMode::Off;
    if trace_enabled {
        crate::trace::init_tracing(args.json || trace_mode == TraceMode::Json)?;
    }

    let mut level = None;
    if args.verbose > 1 {
        level = Some(log::LevelFilter::Trace);
    }
    if args.verbose == 1 {
        level = Some(log::LevelFilter::Debug);
    }
    if args.quiet {
        level = Some(log::LevelFilter::Warn);
    }
    // tracing already receives log records
    if !trace_enabled {
        logger::init(level);
    }

    let project = Project::new(args.cd, args.config)?;
    trace!("{project:?}");
    match args.command {
        Commands::List(cmd) => cmd.run(&project).await,
        Commands::Run(cmd) => cmd.run(&project).await,
        Commands::Validate(cmd) => cmd.run(&project).await,
    }
}
