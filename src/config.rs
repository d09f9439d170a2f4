use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub passpulse: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const PASSPULSE_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            passpulse: Self::PASSPULSE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.passpulse.clone();
        self.passpulse = self.passpulse.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.passpulse.as_str()) {
            eprintln!(
                "Config error: passpulse log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::PASSPULSE_LEVEL
            );
            self.passpulse = Self::PASSPULSE_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathsConfig {
    data_dir: String,
    live_output_dir: String,
    thumbnail_dir: String,
    log_dir: String,
}

impl PathsConfig {
    fn default() -> Self {
        PathsConfig {
            data_dir: "data".to_owned(),
            live_output_dir: "live_output".to_owned(),
            thumbnail_dir: String::new(),
            log_dir: "logs".to_owned(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn live_output_dir(&self) -> PathBuf {
        PathBuf::from(&self.live_output_dir)
    }

    /// `None` selects side-by-side renditions (`<image dir>/thumbnails/`).
    pub fn thumbnail_dir(&self) -> Option<PathBuf> {
        let trimmed = self.thumbnail_dir.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThumbgenConfig {
    max_workers: i64,
    batch_size: i64,
    thumbnail_width: i64,
    quality: i64,
}

impl ThumbgenConfig {
    const MAX_WORKERS: i64 = 4;
    const BATCH_SIZE: i64 = 1000;
    const THUMBNAIL_WIDTH: i64 = 200;
    const QUALITY: i64 = 75;

    fn default() -> Self {
        ThumbgenConfig {
            max_workers: Self::MAX_WORKERS,
            batch_size: Self::BATCH_SIZE,
            thumbnail_width: Self::THUMBNAIL_WIDTH,
            quality: Self::QUALITY,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers as usize
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size as usize
    }

    pub fn thumbnail_width(&self) -> u32 {
        self.thumbnail_width as u32
    }

    pub fn quality(&self) -> f32 {
        self.quality as f32
    }

    fn ensure_valid(&mut self) {
        // Non-positive values mean "unset" and fall back to the defaults
        ensure_positive(&mut self.max_workers, "thumbgen.max_workers", Self::MAX_WORKERS);
        ensure_positive(&mut self.batch_size, "thumbgen.batch_size", Self::BATCH_SIZE);
        ensure_positive(
            &mut self.thumbnail_width,
            "thumbgen.thumbnail_width",
            Self::THUMBNAIL_WIDTH,
        );
        ensure_positive(&mut self.quality, "thumbgen.quality", Self::QUALITY);
        if self.quality > 100 {
            eprintln!(
                "Config error: thumbgen.quality of '{}' is above 100 - using 100",
                self.quality
            );
            self.quality = 100;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IngestConfig {
    stability_minutes: i64,
}

impl IngestConfig {
    const STABILITY_MINUTES: i64 = 15;

    fn default() -> Self {
        IngestConfig {
            stability_minutes: Self::STABILITY_MINUTES,
        }
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_secs(self.stability_minutes as u64 * 60)
    }

    fn ensure_valid(&mut self) {
        if self.stability_minutes < 0 {
            eprintln!(
                "Config error: ingest.stability_minutes of '{}' is invalid - using default of '{}'",
                self.stability_minutes,
                Self::STABILITY_MINUTES
            );
            self.stability_minutes = Self::STABILITY_MINUTES;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    update_cooldown_secs: i64,
    run_timeout_secs: i64,
}

impl PipelineConfig {
    const UPDATE_COOLDOWN_SECS: i64 = 60;
    const RUN_TIMEOUT_SECS: i64 = 600;

    fn default() -> Self {
        PipelineConfig {
            update_cooldown_secs: Self::UPDATE_COOLDOWN_SECS,
            run_timeout_secs: Self::RUN_TIMEOUT_SECS,
        }
    }

    pub fn update_cooldown(&self) -> Duration {
        Duration::from_secs(self.update_cooldown_secs as u64)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs as u64)
    }

    fn ensure_valid(&mut self) {
        ensure_positive(
            &mut self.update_cooldown_secs,
            "pipeline.update_cooldown_secs",
            Self::UPDATE_COOLDOWN_SECS,
        );
        ensure_positive(
            &mut self.run_timeout_secs,
            "pipeline.run_timeout_secs",
            Self::RUN_TIMEOUT_SECS,
        );
    }
}

fn ensure_positive(value: &mut i64, name: &str, default: i64) {
    if *value <= 0 {
        eprintln!(
            "Config error: {} of '{}' is invalid - using default of '{}'",
            name, value, default
        );
        *value = default;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub thumbgen: ThumbgenConfig,
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig::default(),
            thumbgen: ThumbgenConfig::default(),
            ingest: IngestConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    const ENV_PREFIX: &str = "PASSPULSE_";

    /// Location of `config.toml` in the platform's local data directory.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "passpulse")
            .map(|dirs| dirs.data_local_dir().join("config.toml"))
    }

    /// Loads the configuration from `config_path`, layered as defaults, then the
    /// TOML file, then `PASSPULSE_` environment variables (`__` separates
    /// sections). If the file is missing the defaults are written there first.
    /// If extraction fails, defaults are used.
    pub fn load_config(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            Self::write_default(config_path, &default_config);
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    /// Defaults rooted at the given directories.
    #[cfg(test)]
    pub fn with_dirs(data_dir: &Path, live_output_dir: &Path) -> Self {
        let mut config = Config::default();
        config.paths.data_dir = data_dir.to_string_lossy().into_owned();
        config.paths.live_output_dir = live_output_dir.to_string_lossy().into_owned();
        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.thumbgen.ensure_valid();
        self.ingest.ensure_valid();
        self.pipeline.ensure_valid();
    }
}
