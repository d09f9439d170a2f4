use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use serde::Serialize;
use strum::Display;

use crate::assembler;
use crate::config::Config;
use crate::database::Database;
use crate::error::PassPulseError;
use crate::formats::FormatKind;
use crate::passes::Pass;

#[derive(Debug, Display, PartialEq, Eq, Copy, Clone)]
#[strum(serialize_all = "lowercase")]
pub enum IngestMode {
    /// Drop and recreate the schema, then ingest everything.
    Rebuild,
    /// Clear both tables, then ingest everything.
    Repopulate,
    /// Only ingest directories that are new and no longer being written.
    Update,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub added: u64,
    pub skipped_existing: u64,
    pub skipped_unstable: u64,
    pub unrecognized: u64,
    pub failed: u64,
    pub images_added: u64,
}

pub struct Ingestor {
    root: PathBuf,
    stability_threshold: Duration,
}

impl Ingestor {
    pub fn new(root: &Path, stability_threshold: Duration) -> Self {
        Ingestor {
            root: root.to_path_buf(),
            stability_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Ingestor::new(
            &config.paths.live_output_dir(),
            config.ingest.stability_threshold(),
        )
    }

    pub fn run(
        &self,
        db: &Database,
        mode: IngestMode,
        interrupt_token: &Arc<AtomicBool>,
    ) -> Result<IngestStats, PassPulseError> {
        self.run_at(db, mode, interrupt_token, SystemTime::now())
    }

    /// Runs one ingest pass, judging directory stability against `now`.
    pub fn run_at(
        &self,
        db: &Database,
        mode: IngestMode,
        interrupt_token: &Arc<AtomicBool>,
        now: SystemTime,
    ) -> Result<IngestStats, PassPulseError> {
        let _tmr = timer!(Level::Trace; "Ingestor::run", "{}", mode);

        match mode {
            IngestMode::Rebuild => db.recreate_schema()?,
            IngestMode::Repopulate => db.clear_tables()?,
            IngestMode::Update => {}
        }

        let dir_names = self.pass_directories()?;
        info!(
            "Ingest ({}) of '{}': {} candidate directories",
            mode,
            self.root.display(),
            dir_names.len()
        );

        let conn = db.conn();
        let mut stats = IngestStats::default();

        for dir_name in dir_names {
            check_interrupted(interrupt_token)?;

            let pass_dir = self.root.join(&dir_name);

            if mode == IngestMode::Update {
                if Pass::exists(conn, &dir_name)? {
                    stats.skipped_existing += 1;
                    continue;
                }
                if !is_stable(&pass_dir, now, self.stability_threshold) {
                    debug!("'{}' may still be receiving data, skipping", dir_name);
                    stats.skipped_unstable += 1;
                    continue;
                }
            }

            let Some(kind) = FormatKind::classify(&dir_name) else {
                info!("No known format for '{}', skipping", dir_name);
                stats.unrecognized += 1;
                continue;
            };

            let result = kind.extractor().extract(&pass_dir).and_then(|extraction| {
                assembler::assemble(conn, &dir_name, &pass_dir, kind, &extraction)?;
                Ok(extraction.images.len())
            });

            match result {
                Ok(image_count) => {
                    stats.added += 1;
                    stats.images_added += image_count as u64;
                }
                Err(e) => {
                    error!("Failed to ingest '{}' as {}: {}", dir_name, kind, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Ingest ({}) complete: {} added ({} images), {} existing, {} unstable, \
             {} unrecognized, {} failed, {} passes stored",
            mode,
            stats.added,
            stats.images_added,
            stats.skipped_existing,
            stats.skipped_unstable,
            stats.unrecognized,
            stats.failed,
            Pass::count(conn)?
        );

        Ok(stats)
    }

    /// Names of the capture root's immediate subdirectories, sorted.
    fn pass_directories(&self) -> Result<Vec<String>, PassPulseError> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping directory with non UTF-8 name: {:?}", raw),
            }
        }

        names.sort();
        Ok(names)
    }
}

/// A directory is stable once its modification time is strictly older than
/// `threshold`. Future or unreadable times are never stable.
fn is_stable(dir: &Path, now: SystemTime, threshold: Duration) -> bool {
    let modified = match fs::metadata(dir).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(e) => {
            warn!("Unable to read modification time of '{}': {}", dir.display(), e);
            return false;
        }
    };

    match now.duration_since(modified) {
        Ok(age) => age > threshold,
        Err(_) => false,
    }
}

fn check_interrupted(interrupt_token: &Arc<AtomicBool>) -> Result<(), PassPulseError> {
    if interrupt_token.load(Ordering::Acquire) {
        Err(PassPulseError::Interrupted)
    } else {
        Ok(())
    }
}
