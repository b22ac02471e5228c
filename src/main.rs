use cirun::{StepError, error::EXIT_FAILURE};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    if let Err(err) = cirun::cli::run().await {
        if let Some(err) = err.downcast_ref::<StepError>() {
            log::error!("step \"{}\" failed: {}: {}", err.step(), err.message(), err.cause());
            std::process::exit(err.exit_code());
        }
        eprintln!("{err:?}");
        std::process::exit(EXIT_FAILURE);
    }
    Ok(())
}
