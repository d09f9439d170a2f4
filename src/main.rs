mod assembler;
mod cli;
mod config;
mod database;
mod error;
mod formats;
mod images;
mod ingest;
mod passes;
mod pipeline;
mod schema;
mod thumbnails;

use clap::Parser;
use cli::Cli;
use config::Config;
use error::PassPulseError;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

const LOG_BASENAME: &str = "passpulse";
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const LOG_FILES_KEPT: usize = 5;

fn start_logging(config: &Config) -> Result<LoggerHandle, PassPulseError> {
    // Dependencies stay at warn; our own level comes from the config
    let spec = format!("warn, passpulse={}", config.logging.passpulse);

    Logger::try_with_str(&spec)
        .and_then(|logger| {
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(config.paths.log_dir())
                        .basename(LOG_BASENAME),
                )
                .rotate(
                    Criterion::Size(LOG_ROTATE_BYTES),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(LOG_FILES_KEPT),
                )
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(flexi_logger::detailed_format)
                .start()
        })
        .map_err(|e| PassPulseError::Error(format!("Failed to start logging: {}", e)))
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load_config(&cli.config_path());

    // Logging failures are not fatal
    let _logger = match start_logging(&config) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("{}", err);
            None
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = cli.run(config) {
        error!("{:?}", err);
        eprint!("{}", err);
        std::process::exit(1);
    }
}
