use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, warn};
use rusqlite::Connection;
use strum::Display;

use crate::error::PassPulseError;
use crate::formats::{Extraction, FormatKind};
use crate::passes::Pass;

pub const UNKNOWN_SATELLITE: &str = "Unknown";

/// 2100-01-01T00:00:00Z. Dataset timestamps past this are treated as garbage.
pub const MAX_EPOCH_SECONDS: i64 = 4_102_444_800;

const FOLDER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";
const FOLDER_TIMESTAMP_LEN: usize = 16;

const RAW_EXTENSIONS: &[&str] = &["cadu", "raw16"];
const IGNORED_RAW_FILE: &str = "others.cadu";

#[derive(Debug, Display, PartialEq, Eq, Copy, Clone)]
pub enum Downlink {
    #[strum(serialize = "VHF")]
    Vhf,
    #[strum(serialize = "L Band")]
    LBand,
    #[strum(serialize = "S Band")]
    SBand,
    #[strum(serialize = "Unknown")]
    Unknown,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum Family {
    Meteor,
    Noaa,
    Fengyun,
    Elektro,
    Aws,
    Metop,
    Proba,
    Uvsq,
}

impl Family {
    const TOKENS: &'static [(&'static str, Family)] = &[
        ("meteor", Family::Meteor),
        ("noaa", Family::Noaa),
        ("fengyun", Family::Fengyun),
        ("elektro", Family::Elektro),
        ("aws", Family::Aws),
        ("metop", Family::Metop),
        ("proba", Family::Proba),
        ("uvsq", Family::Uvsq),
    ];

    fn identify(lowercase_name: &str) -> Option<Family> {
        Family::TOKENS
            .iter()
            .find(|(token, _)| lowercase_name.contains(token))
            .map(|(_, family)| *family)
    }
}

/// Resolves the band a pass was received on. The satellite name picks the
/// family; multi-mode families need a mode token in the directory name.
pub fn downlink_for(satellite: &str, dir_name: &str) -> Downlink {
    let dir = dir_name.to_lowercase();
    let family = Family::identify(&satellite.to_lowercase()).or_else(|| Family::identify(&dir));

    match family {
        Some(Family::Meteor) if dir.contains("lrpt") => Downlink::Vhf,
        Some(Family::Meteor) if dir.contains("hrpt") => Downlink::LBand,
        Some(Family::Noaa) if dir.contains("apt") => Downlink::Vhf,
        Some(Family::Noaa) if dir.contains("hrpt") => Downlink::LBand,
        Some(Family::Fengyun | Family::Elektro | Family::Aws | Family::Metop) => Downlink::LBand,
        Some(Family::Proba | Family::Uvsq) => Downlink::SBand,
        _ => Downlink::Unknown,
    }
}

/// Parses a leading `YYYY-MM-DD_HH-MM` from a directory name as UTC.
pub fn folder_timestamp(dir_name: &str) -> Option<i64> {
    let prefix = dir_name.get(..FOLDER_TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(prefix, FOLDER_TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn sane_timestamp(timestamp: f64) -> Option<i64> {
    if timestamp.is_finite() && timestamp >= 1.0 && timestamp <= MAX_EPOCH_SECONDS as f64 {
        Some(timestamp as i64)
    } else {
        None
    }
}

/// Formats whose decoders never write a usable acquisition time.
fn uses_folder_timestamp(kind: FormatKind) -> bool {
    matches!(
        kind,
        FormatKind::FengyunSvissr | FormatKind::Proba2 | FormatKind::ProbaV | FormatKind::UvsqNg
    )
}

/// First raw capture file at the top of the pass directory, by name.
pub fn find_raw_data_path(pass_dir: &Path) -> Option<String> {
    let entries = match fs::read_dir(pass_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unable to list '{}' for raw data: {}", pass_dir.display(), e);
            return None;
        }
    };

    let mut candidates: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_raw_capture(name))
        .collect();

    candidates.sort();
    candidates.into_iter().next()
}

fn is_raw_capture(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    if lower == IGNORED_RAW_FILE {
        return false;
    }

    Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RAW_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Turns one extracted pass directory into a `Pass` row ready to persist.
pub fn resolve_pass(
    dir_name: &str,
    pass_dir: &Path,
    kind: FormatKind,
    extraction: &Extraction,
) -> Pass {
    let dataset = extraction.dataset.as_ref();

    let satellite = dataset
        .map(|summary| summary.satellite.trim())
        .filter(|satellite| !satellite.is_empty())
        .unwrap_or(UNKNOWN_SATELLITE);

    let timestamp = if uses_folder_timestamp(kind) {
        folder_timestamp(dir_name)
    } else {
        dataset
            .and_then(|summary| sane_timestamp(summary.timestamp))
            .or_else(|| folder_timestamp(dir_name))
    };

    let downlink = downlink_for(satellite, dir_name);

    Pass::new(
        dir_name,
        satellite,
        timestamp,
        find_raw_data_path(pass_dir),
        &downlink.to_string(),
    )
}

/// Resolves and persists one pass with its images. Returns the new pass id.
pub fn assemble(
    conn: &Connection,
    dir_name: &str,
    pass_dir: &Path,
    kind: FormatKind,
    extraction: &Extraction,
) -> Result<i64, PassPulseError> {
    let mut pass = resolve_pass(dir_name, pass_dir, kind, extraction);
    pass.insert_with_images(conn, &extraction.images)?;

    debug!(
        "Stored pass {} '{}' ({}, {}, timestamp {:?}, raw {:?}, {} images)",
        pass.id(),
        pass.name(),
        pass.satellite(),
        pass.downlink(),
        pass.timestamp(),
        pass.raw_data_path(),
        extraction.images.len()
    );

    Ok(pass.id())
}
