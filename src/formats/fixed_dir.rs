use std::path::Path;

use crate::error::PassPulseError;

use super::{
    composite_of, image_files, pass_dir_name, rel_path, DatasetSummary, Extraction, Extractor,
    ImageDescriptor,
};

/// One named subdirectory of same-sized frames (PROBA-2 SWAP, PROBA-V
/// Vegetation). These recorders write no sidecar; the satellite is implied by
/// the format and the time comes from the folder name.
pub struct FixedDirExtractor {
    pub subdir: &'static str,
    pub sensor: &'static str,
    pub satellite: &'static str,
    pub v_pixels: u32,
}

impl Extractor for FixedDirExtractor {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError> {
        let images_root = pass_dir.join(self.subdir);
        if !images_root.is_dir() {
            return Ok(Extraction::default());
        }

        let dir_name = pass_dir_name(pass_dir);

        let images = image_files(&images_root)?
            .into_iter()
            .map(|name| ImageDescriptor {
                path: rel_path(&[dir_name.as_str(), self.subdir, name.as_str()]),
                composite: composite_of(&name),
                sensor: self.sensor.to_owned(),
                map_overlay: false,
                corrected: true,
                filled: true,
                v_pixels: Some(self.v_pixels),
            })
            .collect();

        Ok(Extraction {
            images,
            dataset: Some(DatasetSummary {
                satellite: self.satellite.to_owned(),
                timestamp: 0.0,
            }),
        })
    }
}
