use strum::{Display, EnumIter};

use super::fixed_dir::FixedDirExtractor;
use super::flat::FlatExtractor;
use super::nested::{NestedExtractor, Sidecar};
use super::paired::PairedExtractor;
use super::products::ProductsExtractor;
use super::Extractor;

/// Directory layouts the ingester knows how to read.
#[derive(Debug, Display, EnumIter, PartialEq, Eq, Copy, Clone, Hash)]
pub enum FormatKind {
    NoaaApt,
    NoaaHrpt,
    MetopAhrpt,
    MeteorLrpt,
    MeteorHrpt,
    AwsPfm,
    ElektroLrit,
    UvsqNg,
    Proba2,
    ProbaV,
    FengyunSvissr,
}

struct Rule {
    /// Every token must appear in the lowercased directory name.
    tokens: &'static [&'static str],
    kind: FormatKind,
}

// Evaluated top to bottom; the first matching rule wins.
const RULES: &[Rule] = &[
    Rule {
        tokens: &["noaa", "apt"],
        kind: FormatKind::NoaaApt,
    },
    Rule {
        tokens: &["noaa", "hrpt"],
        kind: FormatKind::NoaaHrpt,
    },
    Rule {
        tokens: &["metop", "ahrpt"],
        kind: FormatKind::MetopAhrpt,
    },
    Rule {
        tokens: &["meteor", "lrpt"],
        kind: FormatKind::MeteorLrpt,
    },
    Rule {
        tokens: &["meteor", "hrpt"],
        kind: FormatKind::MeteorHrpt,
    },
    Rule {
        tokens: &["aws", "pfm"],
        kind: FormatKind::AwsPfm,
    },
    Rule {
        tokens: &["elektro", "lrit"],
        kind: FormatKind::ElektroLrit,
    },
    Rule {
        tokens: &["uvsq", "ng"],
        kind: FormatKind::UvsqNg,
    },
    Rule {
        tokens: &["proba2"],
        kind: FormatKind::Proba2,
    },
    Rule {
        tokens: &["probav"],
        kind: FormatKind::ProbaV,
    },
    Rule {
        tokens: &["fengyun", "svissr"],
        kind: FormatKind::FengyunSvissr,
    },
];

static NOAA_APT: FlatExtractor = FlatExtractor { sensor: "AVHRR" };

static DECLARED_PRODUCTS: ProductsExtractor = ProductsExtractor { raw_product: "AVHRR" };

static METEOR_LRPT: PairedExtractor = PairedExtractor {
    subdirs: ["MSU-MR", "MSU-MR (Filled)"],
    sensor: "MSU-MR",
};

static PROBA2: FixedDirExtractor = FixedDirExtractor {
    subdir: "SWAP",
    sensor: "SWAP",
    satellite: "Proba2",
    v_pixels: 1024,
};

static PROBAV: FixedDirExtractor = FixedDirExtractor {
    subdir: "Vegetation",
    sensor: "VNIR",
    satellite: "ProbaV",
    v_pixels: 1024,
};

static ELEKTRO_LRIT: NestedExtractor = NestedExtractor {
    root: &["IMAGES", "ELEKTRO-L3"],
    sensor: "MSU-GS",
    satellite: "Elektro-L3",
    v_pixels: 2784,
    map_overlay: true,
    sidecar: Sidecar::CompositeCache,
};

static FENGYUN_SVISSR: NestedExtractor = NestedExtractor {
    root: &["IMAGE"],
    sensor: "SVISSR",
    satellite: "FengYun",
    v_pixels: 2501,
    map_overlay: true,
    sidecar: Sidecar::None,
};

static UVSQ_NG: NestedExtractor = NestedExtractor {
    root: &[],
    sensor: "NanoCam",
    satellite: "UVSQ-NG",
    v_pixels: 2501,
    map_overlay: false,
    sidecar: Sidecar::None,
};

impl FormatKind {
    /// Picks the layout for a pass directory from its name alone.
    pub fn classify(dir_name: &str) -> Option<FormatKind> {
        let lower = dir_name.to_lowercase();
        RULES
            .iter()
            .find(|rule| rule.tokens.iter().all(|token| lower.contains(token)))
            .map(|rule| rule.kind)
    }

    pub fn extractor(self) -> &'static dyn Extractor {
        match self {
            FormatKind::NoaaApt => &NOAA_APT,
            FormatKind::NoaaHrpt
            | FormatKind::MetopAhrpt
            | FormatKind::MeteorHrpt
            | FormatKind::AwsPfm => &DECLARED_PRODUCTS,
            FormatKind::MeteorLrpt => &METEOR_LRPT,
            FormatKind::ElektroLrit => &ELEKTRO_LRIT,
            FormatKind::UvsqNg => &UVSQ_NG,
            FormatKind::Proba2 => &PROBA2,
            FormatKind::ProbaV => &PROBAV,
            FormatKind::FengyunSvissr => &FENGYUN_SVISSR,
        }
    }
}
