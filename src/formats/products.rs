use std::path::{Component, Path};

use log::warn;

use crate::error::PassPulseError;

use super::{
    composite_of, has_token, header_height, optional_image_files, pass_dir_name, read_sidecar,
    rel_path, DatasetFile, Extraction, Extractor, ImageDescriptor, DATASET_FILE,
};

/// Product subdirectories are listed in `dataset.json` (NOAA HRPT, MetOp
/// AHRPT, Meteor HRPT, AWS PFM). Every product other than the raw one is a
/// corrected projection; the raw product marks corrected images by name.
pub struct ProductsExtractor {
    pub raw_product: &'static str,
}

impl ProductsExtractor {
    fn is_corrected(&self, product: &str, file_name: &str) -> bool {
        product != self.raw_product || has_token(file_name, "corrected")
    }
}

/// A product must name a single directory directly below the pass.
fn is_plain_name(product: &str) -> bool {
    let mut components = Path::new(product).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !product.contains(['/', '\\'])
}

impl Extractor for ProductsExtractor {
    fn extract(&self, pass_dir: &Path) -> Result<Extraction, PassPulseError> {
        let dataset: Option<DatasetFile> = read_sidecar(&pass_dir.join(DATASET_FILE));
        let Some(dataset) = dataset else {
            return Ok(Extraction::default());
        };

        let dir_name = pass_dir_name(pass_dir);
        let mut images = Vec::new();

        for product in &dataset.products {
            if !is_plain_name(product) {
                warn!("Ignoring product '{}' declared by '{}'", product, dir_name);
                continue;
            }
            let product_dir = pass_dir.join(product);

            for name in optional_image_files(&product_dir) {
                images.push(ImageDescriptor {
                    path: rel_path(&[dir_name.as_str(), product.as_str(), name.as_str()]),
                    composite: composite_of(&name),
                    sensor: product.clone(),
                    map_overlay: has_token(&name, "map"),
                    corrected: self.is_corrected(product, &name),
                    filled: true,
                    v_pixels: header_height(&product_dir.join(&name)),
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
    fn test_declared_products_are_walked() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-06-02_09-14_metop_ahrpt");
        write_file(
            &pass.join("dataset.json"),
            r#"{"satellite":"MetOp-B","timestamp":1717319640,
                "products":["AVHRR","MHS","Missing"]}"#,
        );
        write_image(&pass.join("AVHRR/avhrr_3_rgb_221.png"), 10, 40);
        write_image(&pass.join("AVHRR/avhrr_3_rgb_221_corrected_map.png"), 10, 41);
        write_image(&pass.join("MHS/mhs_ch1.png"), 10, 8);
        write_image(&pass.join("Undeclared/other.png"), 10, 8);

        let extraction = FormatKind::MetopAhrpt.extractor().extract(&pass).unwrap();
        let images = extraction.images;

        assert_eq!(images.len(), 3);

        assert_eq!(images[0].path, "2024-06-02_09-14_metop_ahrpt/AVHRR/avhrr_3_rgb_221.png");
        assert_eq!(images[0].sensor, "AVHRR");
        assert!(!images[0].corrected);
        assert!(!images[0].map_overlay);
        assert_eq!(images[0].v_pixels, Some(40));

        assert_eq!(images[1].composite, "avhrr_3_rgb_221_corrected_map");
        assert!(images[1].corrected);
        assert!(images[1].map_overlay);

        assert_eq!(images[2].sensor, "MHS");
        assert!(images[2].corrected);
        assert!(images[2].filled);

        let dataset = extraction.dataset.unwrap();
        assert_eq!(dataset.satellite, "MetOp-B");
        assert_eq!(dataset.timestamp, 1717319640.0);
    }

    #[test]
    fn test_without_dataset_nothing_is_found() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-06-02_09-14_noaa_hrpt");
        write_image(&pass.join("AVHRR/avhrr.png"), 10, 10);

        let extraction = FormatKind::NoaaHrpt.extractor().extract(&pass).unwrap();
        assert!(extraction.images.is_empty());
        assert!(extraction.dataset.is_none());
    }

    #[test]
    fn test_products_outside_the_pass_are_ignored() {
        let root = TempDir::new().unwrap();
        let pass = root.path().join("2024-06-02_09-14_aws_pfm");
        write_file(
            &pass.join("dataset.json"),
            r#"{"satellite":"AWS","timestamp":1717319640,
                "products":["../outside", "..", ".", "", "MWR/../..", "nested/MWR", "MWR"]}"#,
        );
        write_image(&root.path().join("outside/stolen.png"), 10, 10);
        write_image(&pass.join("nested/MWR/deep.png"), 10, 10);
        write_image(&pass.join("MWR/mwr_ch1.png"), 10, 10);

        let extraction = FormatKind::AwsPfm.extractor().extract(&pass).unwrap();

        let paths: Vec<&str> = extraction.images.iter().map(|image| image.path.as_str()).collect();
        assert_eq!(paths, vec!["2024-06-02_09-14_aws_pfm/MWR/mwr_ch1.png"]);
        assert_eq!(extraction.dataset.unwrap().satellite, "AWS");
    }
}
