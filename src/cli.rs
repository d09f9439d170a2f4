use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::database::Database;
use crate::error::PassPulseError;
use crate::ingest::{IngestMode, Ingestor};
use crate::pipeline::{Pipeline, RunReport};
use crate::thumbnails::ThumbnailEngine;

#[derive(Parser)]
#[command(
    name = "passpulse",
    version,
    about = "PassPulse: satellite pass ingestion and thumbnail generation"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the local data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Ingest new, settled pass directories, then generate missing thumbnails
    Update,
    /// Rebuild the store from the live output directory, then generate missing thumbnails
    Repopulate,
    /// Rebuild the store from the live output directory without generating thumbnails
    Rebuild,
    /// Generate missing thumbnails only
    Thumbnails,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(Config::default_config_path)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn run(&self, config: Config) -> Result<(), PassPulseError> {
        match self.command {
            Command::Update => Self::print_report(Pipeline::new(config).run_update()?),
            Command::Repopulate => Self::print_report(Pipeline::new(config).run_repopulate()?),
            Command::Rebuild => Self::rebuild(&config),
            Command::Thumbnails => Self::thumbnails(&config),
        }
    }

    fn print_report(report: RunReport) -> Result<(), PassPulseError> {
        println!("{}", serde_json::to_string_pretty(&report)?);

        if report.updated {
            Ok(())
        } else {
            Err(PassPulseError::Error(report.message))
        }
    }

    fn rebuild(config: &Config) -> Result<(), PassPulseError> {
        let db = Database::open(&config.paths.data_dir())?;
        let interrupt_token = Arc::new(AtomicBool::new(false));

        let stats = Ingestor::from_config(config).run(&db, IngestMode::Rebuild, &interrupt_token)?;
        info!("Rebuild of '{}' finished", db.path().display());

        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }

    fn thumbnails(config: &Config) -> Result<(), PassPulseError> {
        let db = Database::open(&config.paths.data_dir())?;
        let interrupt_token = Arc::new(AtomicBool::new(false));

        let stats = ThumbnailEngine::from_config(config).run(&db, &interrupt_token)?;

        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
