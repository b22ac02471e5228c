use indexmap::IndexSet;

use super::Project;
use crate::Result;

/// Checks the pipeline file without running anything
#[derive(Debug, clap::Args)]
pub struct Validate {}

impl Validate {
    pub async fn run(&self, project: &Project) -> Result<()> {
        let config = project.load()?;
        let pipeline = config.pipeline(&[], &IndexSet::new())?;
        info!(
            "{} is valid ({} steps)",
            project.config_path.display(),
            pipeline.len()
        );
        Ok(())
    }
}
