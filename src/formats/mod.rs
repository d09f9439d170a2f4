//! Per-format extraction of image descriptors from a pass directory.
//!
//! Every supported downlink format lays out its products differently. Each
//! layout has an [`Extractor`] that walks it and reports what it found in the
//! same shape, so the classifier only has to pick one.

mod classifier;
mod fixed_dir;
mod flat;
mod nested;
mod paired;
mod products;

use std::fs;
use std::io;
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::PassPulseError;

pub use classifier::FormatKind;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

pub(crate) const DATASET_FILE: &str = "dataset.json";

/// One image product found in a pass directory, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Relative to the live output root, '/' separated.
    pub path: String,
    pub composite: String,
    pub sensor: String,
    pub map_overlay: bool,
    pub corrected: bool,
    pub filled: bool,
    pub v_pixels: Option<u32>,
}

/// What a format's metadata sidecar says about the pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetSummary {
    pub satellite: String,
    /// Seconds since the epoch as declared by the recorder. Zero when unknown.
    pub timestamp: f64,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub images: Vec<ImageDescriptor>,
    pub dataset: Option<DatasetSummary>,
}

/// Walks one format's directory layout.
///
/// Implementations treat missing optional pieces (sidecars, product
/// subdirectories, the format root) as "nothing found". Only a failure to
/// read a directory that is known to exist is returned as an error.
pub trait Extractor: Send + Sync {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError>;
}

/// `dataset.json` as written by the recorder. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DatasetFile {
    #[serde(default)]
    pub satellite: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub products: Vec<String>,
}

impl DatasetFile {
    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            satellite: self.satellite.clone(),
            timestamp: self.timestamp,
        }
    }
}

pub(crate) fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Lowercased file name without its extension.
pub(crate) fn composite_of(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub(crate) fn has_token(file_name: &str, token: &str) -> bool {
    file_name.to_lowercase().contains(token)
}

/// Reads only the image header to get the vertical resolution.
pub(crate) fn header_height(path: &Path) -> Option<u32> {
    image::image_dimensions(path).ok().map(|(_, height)| height)
}

pub(crate) fn pass_dir_name(pass_dir: &Path) -> String {
    pass_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn rel_path(parts: &[&str]) -> String {
    parts.join("/")
}

/// Names of the image files directly inside `dir`, sorted.
pub(crate) fn image_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_file() && is_image_file(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Names of the subdirectories directly inside `dir`, sorted.
pub(crate) fn subdirectories(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Like [`image_files`] for a directory the format does not require: a
/// missing directory is empty and an unreadable one is skipped with a warning.
pub(crate) fn optional_image_files(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }
    match image_files(dir) {
        Ok(names) => names,
        Err(e) => {
            warn!("Skipping unreadable directory '{}': {}", dir.display(), e);
            Vec::new()
        }
    }
}

/// Parses a JSON sidecar. Absence is normal; a malformed file is logged and
/// treated as absent.
pub(crate) fn read_sidecar<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Could not read sidecar '{}': {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed sidecar '{}': {}", path.display(), e);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{write_file, write_image};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("rgb_221.png"));
        assert!(is_image_file("AVHRR_3A.JPG"));
        assert!(is_image_file("x.jpeg"));
        assert!(is_image_file("x.gif"));
        assert!(is_image_file("x.webp"));
        assert!(!is_image_file("noaa.cadu"));
        assert!(!is_image_file("dataset.json"));
        assert!(!is_image_file("png"));
    }

    #[test]
    fn test_composite_of() {
        assert_eq!(composite_of("MSU-MR-RGB-221-EQU.png"), "msu-mr-rgb-221-equ");
        assert_eq!(composite_of("raw.sync.jpg"), "raw.sync");
    }

    #[test]
    fn test_image_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write_image(&dir.path().join("b.png"), 4, 4);
        write_image(&dir.path().join("a.jpg"), 4, 4);
        write_file(&dir.path().join("notes.txt"), "x");
        fs::create_dir(dir.path().join("sub.png")).unwrap();

        assert_eq!(image_files(dir.path()).unwrap(), vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_header_height_reads_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        write_image(&path, 30, 17);
        assert_eq!(header_height(&path), Some(17));

        let bogus = dir.path().join("bogus.png");
        write_file(&bogus, "not an image");
        assert_eq!(header_height(&bogus), None);
    }

    #[test]
    fn test_read_sidecar_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATASET_FILE);
        assert!(read_sidecar::<DatasetFile>(&path).is_none());

        write_file(&path, "{ not json");
        assert!(read_sidecar::<DatasetFile>(&path).is_none());

        write_file(&path, r#"{"satellite":"METOP-C","timestamp":1714566600,"products":["AVHRR"]}"#);
        let dataset = read_sidecar::<DatasetFile>(&path).unwrap();
        assert_eq!(dataset.satellite, "METOP-C");
        assert_eq!(dataset.timestamp, 1714566600.0);
        assert_eq!(dataset.products, vec!["AVHRR"]);
    }

    #[test]
    fn test_optional_image_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(optional_image_files(&dir.path().join("nope")).is_empty());
    }
}
