use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use image::imageops::FilterType;
use image::GenericImageView;
use log::{debug, info, Level};
use logging_timer::timer;
use serde::Serialize;
use threadpool::ThreadPool;

use crate::config::Config;
use crate::database::Database;
use crate::error::PassPulseError;
use crate::images::{self, PendingThumb};

const SIDE_BY_SIDE_DIR: &str = "thumbnails";
const RENDITION_EXTENSION: &str = "webp";
const PROGRESS_INTERVAL: u64 = 5000;
/// Largest width or height libwebp accepts.
const MAX_WEBP_DIMENSION: u32 = 16383;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbStats {
    pub queued: u64,
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
}

enum Outcome {
    Created(i64),
    /// Destination already present; counts as done without touching the source.
    Skipped(i64),
    Failed,
}

/// Height that keeps the source aspect ratio at `target_width`, never zero.
pub fn thumb_height(src_width: u32, src_height: u32, target_width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let height = u64::from(target_width) * u64::from(src_height) / u64::from(src_width);
    height.clamp(1, u64::from(u32::MAX)) as u32
}

/// Everything a worker needs to turn one stored path into a rendition.
#[derive(Debug, Clone)]
struct Renderer {
    capture_root: PathBuf,
    thumbnail_dir: Option<PathBuf>,
    width: u32,
    quality: f32,
}

impl Renderer {
    fn source(&self, rel_path: &str) -> PathBuf {
        self.capture_root.join(normalize(rel_path))
    }

    fn destination(&self, rel_path: &str) -> PathBuf {
        let rel = PathBuf::from(normalize(rel_path));

        match &self.thumbnail_dir {
            Some(thumbnail_dir) => thumbnail_dir.join(rel.with_extension(RENDITION_EXTENSION)),
            None => {
                let file_name = rel.with_extension(RENDITION_EXTENSION);
                let file_name = file_name.file_name().unwrap_or_default();
                let parent = rel.parent().unwrap_or_else(|| Path::new(""));
                self.capture_root
                    .join(parent)
                    .join(SIDE_BY_SIDE_DIR)
                    .join(file_name)
            }
        }
    }

    fn render(&self, job: &PendingThumb) -> Outcome {
        let dest = self.destination(&job.path);

        if dest.exists() {
            debug!("[SKIP] {} -> {}", job.path, dest.display());
            return Outcome::Skipped(job.id);
        }

        match self.write_rendition(&self.source(&job.path), &dest) {
            Ok(()) => {
                debug!("[OK] {} -> {}", job.path, dest.display());
                Outcome::Created(job.id)
            }
            Err(e) => {
                debug!("[FAIL] {}: {}", job.path, e);
                Outcome::Failed
            }
        }
    }

    fn write_rendition(&self, src: &Path, dest: &Path) -> Result<(), PassPulseError> {
        let img = image::open(src)?;
        let (src_width, src_height) = img.dimensions();
        let height = thumb_height(src_width, src_height, self.width);
        if height > MAX_WEBP_DIMENSION || self.width > MAX_WEBP_DIMENSION {
            return Err(PassPulseError::Error(format!(
                "Rendition {}x{} exceeds the WebP limit of {} pixels",
                self.width, height, MAX_WEBP_DIMENSION
            )));
        }

        let rgba = img
            .resize_exact(self.width, height, FilterType::Lanczos3)
            .to_rgba8();
        let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
            .encode_simple(false, self.quality)
            .map_err(|e| PassPulseError::Error(format!("WebP encoding failed: {:?}", e)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Renamed into place so a half-written file is never taken as done
        let tmp = dest.with_extension("webp.tmp");
        if let Err(e) = fs::write(&tmp, &*encoded).and_then(|_| fs::rename(&tmp, dest)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(())
    }
}

fn normalize(rel_path: &str) -> String {
    rel_path.replace('\\', "/")
}

pub struct ThumbnailEngine {
    renderer: Renderer,
    max_workers: usize,
    batch_size: usize,
}

impl ThumbnailEngine {
    pub fn new(
        capture_root: &Path,
        thumbnail_dir: Option<PathBuf>,
        max_workers: usize,
        batch_size: usize,
        width: u32,
        quality: f32,
    ) -> Self {
        ThumbnailEngine {
            renderer: Renderer {
                capture_root: capture_root.to_path_buf(),
                thumbnail_dir,
                width,
                quality,
            },
            max_workers: max_workers.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        ThumbnailEngine::new(
            &config.paths.live_output_dir(),
            config.paths.thumbnail_dir(),
            config.thumbgen.max_workers(),
            config.thumbgen.batch_size(),
            config.thumbgen.thumbnail_width(),
            config.thumbgen.quality(),
        )
    }

    /// Renders every image still flagged `needsThumb`, then clears the flag for
    /// each one that now has a rendition. On interrupt the successes gathered
    /// so far are still committed before returning `Interrupted`.
    pub fn run(
        &self,
        db: &Database,
        interrupt_token: &Arc<AtomicBool>,
    ) -> Result<ThumbStats, PassPulseError> {
        let _tmr = timer!(Level::Trace; "ThumbnailEngine::run");
        let conn = db.conn();

        let pending = images::count_pending_thumbs(conn)?;
        if pending == 0 {
            info!("No images need thumbnails");
            return Ok(ThumbStats::default());
        }
        info!(
            "Generating thumbnails for {} images with {} workers",
            pending, self.max_workers
        );

        let (job_sender, job_receiver) = bounded::<PendingThumb>(self.batch_size);
        let (outcome_sender, outcome_receiver) = bounded::<Outcome>(self.batch_size);

        let pool = ThreadPool::new(self.max_workers);
        for _ in 0..self.max_workers {
            let job_receiver = job_receiver.clone();
            let outcome_sender = outcome_sender.clone();
            let renderer = self.renderer.clone();
            let interrupt_token = Arc::clone(interrupt_token);

            pool.execute(move || {
                while let Ok(job) = job_receiver.recv() {
                    // Drain without work once interrupted so the dispatcher never blocks
                    if interrupt_token.load(Ordering::Acquire) {
                        continue;
                    }
                    if outcome_sender.send(renderer.render(&job)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_receiver);
        drop(outcome_sender);

        let collector = thread::spawn(move || {
            let mut stats = ThumbStats::default();
            let mut done_ids = Vec::new();

            for outcome in outcome_receiver {
                match outcome {
                    Outcome::Created(id) => {
                        stats.created += 1;
                        done_ids.push(id);
                    }
                    Outcome::Skipped(id) => {
                        stats.skipped += 1;
                        done_ids.push(id);
                    }
                    Outcome::Failed => stats.failed += 1,
                }
            }

            (stats, done_ids)
        });

        let mut queued: u64 = 0;
        let dispatch_result = images::for_each_pending_thumb(conn, |job| {
            if interrupt_token.load(Ordering::Acquire) {
                return ControlFlow::Break(());
            }
            if job_sender.send(job).is_err() {
                return ControlFlow::Break(());
            }
            queued += 1;
            if queued % PROGRESS_INTERVAL == 0 {
                info!("Queued {}/{} thumbnails", queued, pending);
            }
            ControlFlow::Continue(())
        });

        drop(job_sender);
        pool.join();

        let (mut stats, done_ids) = collector
            .join()
            .map_err(|_| PassPulseError::Error("Thumbnail collector thread panicked".to_owned()))?;
        stats.queued = queued;

        let marked = images::mark_thumbs_done(conn, &done_ids)?;

        info!(
            "Thumbnails: {} queued, {} created, {} skipped, {} failed, {} marked done",
            stats.queued, stats.created, stats.skipped, stats.failed, marked
        );

        dispatch_result?;
        if interrupt_token.load(Ordering::Acquire) {
            return Err(PassPulseError::Interrupted);
        }

        Ok(stats)
    }
}
