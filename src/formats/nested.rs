use std::collections::HashMap;
use std::path::Path;

use log::warn;
use serde::Deserialize;

use crate::error::PassPulseError;

use super::{
    composite_of, has_token, image_files, pass_dir_name, read_sidecar, rel_path, subdirectories,
    DatasetSummary, Extraction, Extractor, ImageDescriptor,
};

const COMPOSITE_CACHE_FILE: &str = ".composite_cache_do_not_delete.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidecar {
    None,
    /// Hidden composite cache left by the LRIT decoder: composite name ->
    /// `{ "time": <epoch seconds> }`.
    CompositeCache,
}

#[derive(Debug, Deserialize)]
struct CacheEntry {
    #[serde(default)]
    time: i64,
}

/// A format root whose immediate children are per-orbit (or per-frame-set)
/// folders of images, all at the format's single canonical frame size
/// (Elektro LRIT, FengYun SVISSR, UVSQ-NG).
pub struct NestedExtractor {
    /// Path of the format root below the pass directory. Empty for the pass
    /// directory itself.
    pub root: &'static [&'static str],
    pub sensor: &'static str,
    pub satellite: &'static str,
    pub v_pixels: u32,
    pub map_overlay: bool,
    pub sidecar: Sidecar,
}

impl NestedExtractor {
    fn sidecar_timestamp(&self, pass_dir: &Path) -> f64 {
        match self.sidecar {
            Sidecar::None => 0.0,
            Sidecar::CompositeCache => {
                let cache: Option<HashMap<String, CacheEntry>> =
                    read_sidecar(&pass_dir.join(COMPOSITE_CACHE_FILE));
                // Earliest composite time is the start of the acquisition
                cache
                    .and_then(|entries| entries.values().map(|entry| entry.time).min())
                    .unwrap_or(0) as f64
            }
        }
    }
}

impl Extractor for NestedExtractor {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError> {
        let format_root = self
            .root
            .iter()
            .fold(pass_dir.to_path_buf(), |path, part| path.join(part));

        if !format_root.is_dir() {
            return Ok(Extraction::default());
        }

        let dir_name = pass_dir_name(pass_dir);
        let mut prefix: Vec<&str> = vec![dir_name.as_str()];
        prefix.extend_from_slice(self.root);

        let mut images = Vec::new();

        for folder in subdirectories(&format_root)? {
            let names = match image_files(&format_root.join(&folder)) {
                Ok(names) => names,
                Err(e) => {
                    warn!(
                        "Skipping unreadable folder '{}' in '{}': {}",
                        folder, dir_name, e
                    );
                    continue;
                }
            };

            for name in names {
                let mut parts = prefix.clone();
                parts.push(&folder);
                parts.push(&name);

                images.push(ImageDescriptor {
                    path: rel_path(&parts),
                    composite: composite_of(&name),
                    sensor: self.sensor.to_owned(),
                    map_overlay: self.map_overlay && has_token(&name, "map"),
                    corrected: true,
                    filled: true,
                    v_pixels: Some(self.v_pixels),
                });
            }
        }

        Ok(Extraction {
            images,
            dataset: Some(DatasetSummary {
                satellite: self.satellite.to_owned(),
                timestamp: self.sidecar_timestamp(pass_dir),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_support::{write_file, write_image};
    use crate::formats::FormatKind;
    use tempfile::TempDir;

    #[test]
    fn test_elektro_per_orbit_folders_and_cache() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-08-20_06-00_elektro_lrit");
        let format_root = pass.join("IMAGES/ELEKTRO-L3");
        write_image(&format_root.join("2024-08-20_06-00-00/natural_color_map.png"), 4, 4);
        write_image(&format_root.join("2024-08-20_06-30-00/ch1.png"), 4, 4);
        write_file(&format_root.join("stray.png"), "not in an orbit folder");
        write_file(
            &pass.join(COMPOSITE_CACHE_FILE),
            r#"{"natural_color":{"time":1724135400},"ch1":{"time":1724133600}}"#,
        );

        let extraction = FormatKind::ElektroLrit.extractor().extract(&pass).unwrap();
        let images = extraction.images;

        assert_eq!(images.len(), 2);
        assert_eq!(
            images[0].path,
            concat!(
                "2024-08-20_06-00_elektro_lrit/IMAGES/ELEKTRO-L3/",
                "2024-08-20_06-00-00/natural_color_map.png"
            )
        );
        assert!(images[0].map_overlay);
        assert_eq!(images[0].v_pixels, Some(2784));
        assert_eq!(images[1].composite, "ch1");
        assert!(!images[1].map_overlay);

        let dataset = extraction.dataset.unwrap();
        assert_eq!(dataset.satellite, "Elektro-L3");
        assert_eq!(dataset.timestamp, 1724133600.0);
    }

    #[test]
    fn test_elektro_missing_root() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("elektro_lrit");
        std::fs::create_dir_all(&pass).unwrap();

        let extraction = FormatKind::ElektroLrit.extractor().extract(&pass).unwrap();
        assert!(extraction.images.is_empty());
        assert!(extraction.dataset.is_none());
    }

    #[test]
    fn test_uvsq_walks_pass_directory_itself() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-09-01_10-10_uvsq-ng");
        write_image(&pass.join("frames_001/nanocam_map.png"), 4, 4);
        write_image(&pass.join("top_level.png"), 4, 4);

        let extraction = FormatKind::UvsqNg.extractor().extract(&pass).unwrap();

        assert_eq!(extraction.images.len(), 1);
        let image = &extraction.images[0];
        assert_eq!(image.path, "2024-09-01_10-10_uvsq-ng/frames_001/nanocam_map.png");
        assert!(!image.map_overlay);
        assert_eq!(image.sensor, "NanoCam");
        assert_eq!(extraction.dataset.unwrap().timestamp, 0.0);
    }

    #[test]
    fn test_fengyun_orbit_folders_under_image() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-05-01_12-30_FengYun_SVISSR");
        write_image(&pass.join("IMAGE/2024-05-01_12-30/full_disk_map.png"), 4, 4);
        write_image(&pass.join("IMAGE/2024-05-01_12-30/ir.png"), 4, 4);
        // Only the IMAGE root belongs to this layout
        write_image(&pass.join("IMAGES/2024-05-01_12-30/other.png"), 4, 4);

        let extraction = FormatKind::FengyunSvissr.extractor().extract(&pass).unwrap();
        let images = extraction.images;

        assert_eq!(images.len(), 2);
        assert_eq!(
            images[0].path,
            "2024-05-01_12-30_FengYun_SVISSR/IMAGE/2024-05-01_12-30/full_disk_map.png"
        );
        assert!(images[0].map_overlay);
        assert_eq!(images[1].composite, "ir");
        assert!(!images[1].map_overlay);
        for image in &images {
            assert_eq!(image.sensor, "SVISSR");
            assert_eq!(image.v_pixels, Some(2501));
        }

        let dataset = extraction.dataset.unwrap();
        assert_eq!(dataset.satellite, "FengYun");
        assert_eq!(dataset.timestamp, 0.0);
    }
}
