pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

-- One row per capture directory found under the live output root
CREATE TABLE IF NOT EXISTS passes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE,              -- Directory name, natural key for idempotent ingest
    satellite TEXT,                -- 'Unknown' when no sidecar names it
    timestamp INTEGER,             -- Epoch seconds (UTC), NULL when unresolvable
    rawDataPath TEXT,              -- First .cadu/.raw16 file in the pass directory
    downlink TEXT                  -- 'VHF', 'L Band', 'S Band' or 'Unknown'
);

-- One row per image product of a pass
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT,                     -- Relative to the live output root, '/' separated
    composite TEXT,
    sensor TEXT,
    mapOverlay INTEGER,
    corrected INTEGER,
    filled INTEGER,
    vPixels INTEGER,
    passId INTEGER,
    needsThumb INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (passId) REFERENCES passes(id)
);

CREATE INDEX IF NOT EXISTS idx_images_needs_thumb ON images (needsThumb);
CREATE INDEX IF NOT EXISTS idx_images_pass ON images (passId);

COMMIT;
"#;

pub const DROP_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;
DROP TABLE IF EXISTS images;
DROP TABLE IF EXISTS passes;
COMMIT;
"#;

/// Columns whose absence marks a store written by an older release.
/// Any of these missing causes both tables to be dropped and recreated.
pub const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("passes", "downlink"),
    ("images", "sensor"),
    ("images", "needsThumb"),
];
