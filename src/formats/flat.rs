use std::path::Path;

use crate::error::PassPulseError;

use super::{
    composite_of, has_token, header_height, image_files, pass_dir_name, read_sidecar, rel_path,
    DatasetFile, Extraction, Extractor, ImageDescriptor, DATASET_FILE,
};

/// All images sit directly in the pass directory (NOAA APT).
pub struct FlatExtractor {
    pub sensor: &'static str,
}

impl Extractor for FlatExtractor {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError> {
        let dataset: DatasetFile = read_sidecar(&pass_dir.join(DATASET_FILE)).unwrap_or_default();
        let dir_name = pass_dir_name(pass_dir);

        let images = image_files(pass_dir)?
            .into_iter()
            .map(|name| ImageDescriptor {
                path: rel_path(&[dir_name.as_str(), name.as_str()]),
                composite: composite_of(&name),
                sensor: self.sensor.to_owned(),
                map_overlay: has_token(&name, "map"),
                corrected: true,
                filled: true,
                v_pixels: header_height(&pass_dir.join(&name)),
            })
            .collect();

        Ok(Extraction {
            images,
            dataset: Some(dataset.summary()),
        })
    }
}
