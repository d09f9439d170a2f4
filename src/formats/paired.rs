use std::path::Path;

use crate::error::PassPulseError;

use super::{
    composite_of, has_token, header_height, optional_image_files, pass_dir_name, read_sidecar,
    rel_path, DatasetFile, Extraction, Extractor, ImageDescriptor, DATASET_FILE,
};

/// A fixed pair of subdirectories holding the raw and gap-filled renderings
/// of one instrument (Meteor LRPT: "MSU-MR" and "MSU-MR (Filled)").
pub struct PairedExtractor {
    pub subdirs: [&'static str; 2],
    pub sensor: &'static str,
}

impl Extractor for PairedExtractor {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError> {
        let dataset: DatasetFile = read_sidecar(&pass_dir.join(DATASET_FILE)).unwrap_or_default();
        let dir_name = pass_dir_name(pass_dir);
        let mut images = Vec::new();

        for subdir in self.subdirs {
            let full_subdir = pass_dir.join(subdir);
            let filled = has_token(subdir, "filled");

            for name in optional_image_files(&full_subdir) {
                images.push(ImageDescriptor {
                    path: rel_path(&[dir_name.as_str(), subdir, name.as_str()]),
                    composite: composite_of(&name),
                    sensor: self.sensor.to_owned(),
                    map_overlay: has_token(&name, "map"),
                    corrected: has_token(&name, "corrected"),
                    filled,
                    v_pixels: header_height(&full_subdir.join(&name)),
                });
            }
        }

        Ok(Extraction {
            images,
            dataset: Some(dataset.summary()),
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
    fn test_filled_follows_subdirectory() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-07-11_17-02_meteor_m2-4_lrpt");
        write_file(
            &pass.join("dataset.json"),
            r#"{"satellite":"METEOR-M2 4","timestamp":1720717320}"#,
        );
        write_image(&pass.join("MSU-MR/msu_mr_rgb_221_corrected.png"), 12, 30);
        write_image(&pass.join("MSU-MR (Filled)/msu_mr_rgb_221_map.png"), 12, 31);

        let extraction = FormatKind::MeteorLrpt.extractor().extract(&pass).unwrap();
        let images = extraction.images;

        assert_eq!(images.len(), 2);
        assert!(!images[0].filled);
        assert!(images[0].corrected);
        assert!(!images[0].map_overlay);
        assert_eq!(images[0].sensor, "MSU-MR");

        assert_eq!(
            images[1].path,
            "2024-07-11_17-02_meteor_m2-4_lrpt/MSU-MR (Filled)/msu_mr_rgb_221_map.png"
        );
        assert!(images[1].filled);
        assert!(!images[1].corrected);
        assert!(images[1].map_overlay);
        assert_eq!(images[1].v_pixels, Some(31));

        assert_eq!(extraction.dataset.unwrap().satellite, "METEOR-M2 4");
    }

    #[test]
    fn test_missing_subdirectories_yield_nothing() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("meteor_lrpt");
        std::fs::create_dir_all(&pass).unwrap();

        let extraction = FormatKind::MeteorLrpt.extractor().extract(&pass).unwrap();
        assert!(extraction.images.is_empty());
    }
}
