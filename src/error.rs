use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PassPulseError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into PassPulseError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors

    #[error("Run interrupted")]
    Interrupted,

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("Cooldown active: {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: u64 },
}
