use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cellpose_inference::{CellposeError, Config};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Parsing arguments...");
    let config = Config::parse();

    let outcome = config.resolve().and_then(cellpose_inference::run);

    let result = match outcome {
        Ok(_) => Ok(()),
        Err(e) if e.is_reported_abort() => {
            report_abort(&e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    info!("Closing the plugin");
    result
}

fn report_abort(err: &CellposeError) {
    match err {
        CellposeError::OutputExists { path } => error!(
            "Zarr file exists. Delete the existing file {}",
            path.display()
        ),
        _ => error!("{err}"),
    }
}
