use console::style;

use super::Project;
use crate::Result;

/// Lists the configured steps in the order they run
#[derive(Debug, clap::Args)]
#[clap(visible_alias = "ls")]
pub struct List {}

impl List {
    pub async fn run(&self, project: &Project) -> Result<()> {
        let config = project.load()?;
        let width = config.steps.keys().map(|name| name.len()).max().unwrap_or(0);
        for (name, step) in &config.steps {
            let name = style(format!("{name:width$}")).bold();
            match step.timeout {
                Some(timeout) => println!(
                    "{name}  {step} {}",
                    style(format!("(timeout {}s)", timeout.as_secs())).dim()
                ),
                None => println!("{name}  {step}"),
            }
        }
        Ok(())
    }
}
