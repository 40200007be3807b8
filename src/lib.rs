use std::env;
use crate::cli::args::Args;
use crate::cli::commands::{load_config, run_command};
use crate::config::io::ConfigIO;
use crate::error::AppRunError;

pub mod cli;
pub mod config;
pub mod error;
pub mod record;
pub mod scale;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;

    // one pairing session per user; the lock is released when this function returns
    let mut locker = config_io.locker()?;
    let _guard = if args.action.needs_session_lock() {
        Some(locker.lock()?)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = load_config(&config_io).await;
        run_command(args, config, &config_io).await
    })
}
