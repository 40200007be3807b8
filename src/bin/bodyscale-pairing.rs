use clap::Parser;
use log::{info, LevelFilter};
use bodyscale_pairing::cli::args::Args;
use bodyscale_pairing::{init_logging, run};
use bodyscale_pairing::error::{report_error, AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();

    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("bodyscale-pairing ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("Another pairing session is already running");
            Ok(())
        },
        Err(err @ AppRunError::NotCompleted { .. }) => {
            info!("{}", err);
            Err(err)
        },
        Err(err) => {
            report_error("Unexpected error", &err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
