use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{error, info, warn, Level};
use logging_timer::timer;
use serde::Serialize;
use strum::Display;

use crate::config::Config;
use crate::database::Database;
use crate::error::PassPulseError;
use crate::ingest::{IngestMode, IngestStats, Ingestor};
use crate::thumbnails::{ThumbStats, ThumbnailEngine};

/// The phase a failed run stopped in.
#[derive(Debug, Display, Serialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStep {
    Ingestion,
    Derivation,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<RunStep>,
    pub message: String,
    pub started_at: String,
    pub duration_ms: u64,
    pub ingest: IngestStats,
    pub thumbnails: ThumbStats,
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: bool,
    last_success: Option<Instant>,
}

/// Single-flight admission for pipeline runs, shared by every entry point.
pub struct RunGate {
    state: Mutex<GateState>,
    cooldown: Duration,
}

/// Held for the duration of one run. Dropping it frees the gate.
pub struct RunPermit<'a> {
    gate: &'a RunGate,
    succeeded: bool,
}

impl RunGate {
    pub fn new(cooldown: Duration) -> Self {
        RunGate {
            state: Mutex::new(GateState::default()),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // The state is two plain fields; a panic mid-update cannot corrupt it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reserve(&self, enforce_cooldown: bool) -> Result<RunPermit<'_>, PassPulseError> {
        self.reserve_at(enforce_cooldown, Instant::now())
    }

    fn reserve_at(
        &self,
        enforce_cooldown: bool,
        now: Instant,
    ) -> Result<RunPermit<'_>, PassPulseError> {
        let mut state = self.lock();

        if state.in_flight {
            return Err(PassPulseError::RunInProgress);
        }

        if enforce_cooldown {
            if let Some(last_success) = state.last_success {
                let since = now.saturating_duration_since(last_success);
                if since < self.cooldown {
                    let remaining = self.cooldown - since;
                    return Err(PassPulseError::CooldownActive {
                        remaining_secs: remaining.as_secs_f64().round() as u64,
                    });
                }
            }
        }

        state.in_flight = true;
        Ok(RunPermit {
            gate: self,
            succeeded: false,
        })
    }
}

impl RunPermit<'_> {
    fn mark_success(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.in_flight = false;
        if self.succeeded {
            state.last_success = Some(Instant::now());
        }
    }
}

/// Raises the interrupt token if the run is still going after `timeout`.
struct Watchdog {
    done: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn start(timeout: Duration, interrupt_token: Arc<AtomicBool>) -> Self {
        let (done, done_receiver) = bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);

        let handle = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_receiver.recv_timeout(timeout) {
                warn!("Run exceeded {}s, interrupting", timeout.as_secs());
                fired_clone.store(true, Ordering::Release);
                interrupt_token.store(true, Ordering::Release);
            }
        });

        Watchdog {
            done: Some(done),
            handle: Some(handle),
            fired,
        }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the watchdog thread
        self.done.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Ingestion followed by thumbnail derivation, behind one gate.
pub struct Pipeline {
    config: Config,
    gate: RunGate,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let gate = RunGate::new(config.pipeline.update_cooldown());
        Pipeline { config, gate }
    }

    /// Incremental ingest then derivation. Subject to the update cooldown.
    pub fn run_update(&self) -> Result<RunReport, PassPulseError> {
        self.run("update", IngestMode::Update, true)
    }

    /// Full rebuild of the store then derivation. Only the in-flight check
    /// applies.
    pub fn run_repopulate(&self) -> Result<RunReport, PassPulseError> {
        self.run("repopulate", IngestMode::Rebuild, false)
    }

    fn run(
        &self,
        label: &str,
        mode: IngestMode,
        enforce_cooldown: bool,
    ) -> Result<RunReport, PassPulseError> {
        let mut permit = self.gate.reserve(enforce_cooldown)?;
        let _tmr = timer!(Level::Trace; "Pipeline::run", "{}", label);

        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let start = Instant::now();
        let interrupt_token = Arc::new(AtomicBool::new(false));

        let timeout = self.config.pipeline.run_timeout();
        let watchdog = Watchdog::start(timeout, Arc::clone(&interrupt_token));
        let mut ingest = IngestStats::default();
        let mut thumbnails = ThumbStats::default();
        let outcome = self.run_phases(mode, &interrupt_token, &mut ingest, &mut thumbnails);
        let timed_out = watchdog.fired();
        drop(watchdog);

        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match outcome {
            Ok(()) => {
                permit.mark_success();
                info!("Pipeline ({}) completed in {}ms", label, duration_ms);
                RunReport {
                    updated: true,
                    step: None,
                    message: format!("{} completed", label),
                    started_at,
                    duration_ms,
                    ingest,
                    thumbnails,
                }
            }
            Err((step, e)) => {
                let message = if timed_out {
                    format!("{} timed out after {}s", step, timeout.as_secs())
                } else {
                    format!("{} failed: {}", step, e)
                };
                error!("Pipeline ({}): {}", label, message);
                RunReport {
                    updated: false,
                    step: Some(step),
                    message,
                    started_at,
                    duration_ms,
                    ingest,
                    thumbnails,
                }
            }
        };

        Ok(report)
    }

    fn run_phases(
        &self,
        mode: IngestMode,
        interrupt_token: &Arc<AtomicBool>,
        ingest: &mut IngestStats,
        thumbnails: &mut ThumbStats,
    ) -> Result<(), (RunStep, PassPulseError)> {
        let db = Database::open(&self.config.paths.data_dir())
            .map_err(|e| (RunStep::Ingestion, e))?;

        *ingest = Ingestor::from_config(&self.config)
            .run(&db, mode, interrupt_token)
            .map_err(|e| (RunStep::Ingestion, e))?;

        *thumbnails = ThumbnailEngine::from_config(&self.config)
            .run(&db, interrupt_token)
            .map_err(|e| (RunStep::Derivation, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_support::write_image;
    use crate::images;
    use crate::passes::Pass;
    use std::panic::{self, AssertUnwindSafe};
    use tempfile::TempDir;

    #[test]
    fn test_gate_rejects_while_in_flight() {
        let gate = RunGate::new(Duration::from_secs(60));
        let permit = gate.reserve(false).unwrap();

        assert!(matches!(gate.reserve(false), Err(PassPulseError::RunInProgress)));
        assert!(matches!(gate.reserve(true), Err(PassPulseError::RunInProgress)));

        drop(permit);
        assert!(gate.reserve(true).is_ok());
    }

    #[test]
    fn test_cooldown_after_success_only() {
        let gate = RunGate::new(Duration::from_secs(60));

        // A failed run does not start the cooldown
        drop(gate.reserve(true).unwrap());
        assert!(gate.reserve(true).is_ok());

        let mut permit = gate.reserve(true).unwrap();
        permit.mark_success();
        drop(permit);

        let now = Instant::now();
        match gate.reserve_at(true, now) {
            Err(PassPulseError::CooldownActive { remaining_secs }) => {
                assert!((59..=60).contains(&remaining_secs))
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("cooldown was not enforced"),
        }

        // Repopulate ignores the cooldown
        assert!(gate.reserve_at(false, now).is_ok());
        // And it has expired a minute later
        assert!(gate.reserve_at(true, now + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_gate_released_on_panic() {
        let gate = RunGate::new(Duration::from_secs(60));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _permit = gate.reserve(false).unwrap();
            panic!("run blew up");
        }));

        assert!(result.is_err());
        assert!(gate.reserve(true).is_ok());
    }

    #[test]
    fn test_watchdog_interrupts_long_runs() {
        let interrupt = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::start(Duration::from_millis(10), Arc::clone(&interrupt));
        thread::sleep(Duration::from_millis(200));

        assert!(watchdog.fired());
        assert!(interrupt.load(Ordering::Acquire));
    }

    #[test]
    fn test_watchdog_quiet_when_run_finishes() {
        let interrupt = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::start(Duration::from_secs(600), Arc::clone(&interrupt));
        drop(watchdog);

        assert!(!interrupt.load(Ordering::Acquire));
    }

    #[test]
    fn test_update_runs_both_phases() {
        let data = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let pass = live.path().join("2024-08-20_06-00_proba2");
        write_image(&pass.join("SWAP/swap_174.png"), 40, 40);

        let pipeline = Pipeline::new(Config::with_dirs(data.path(), live.path()));
        let report = pipeline.run_repopulate().unwrap();

        assert!(report.updated);
        assert_eq!(report.step, None);
        assert_eq!(report.ingest.added, 1);
        assert_eq!(report.thumbnails.created, 1);
        assert!(pass.join("SWAP/thumbnails/swap_174.png").with_extension("webp").exists());

        let db = Database::open(data.path()).unwrap();
        let stored = Pass::get_by_name(db.conn(), "2024-08-20_06-00_proba2").unwrap().unwrap();
        assert_eq!(stored.downlink(), "S Band");
        assert_eq!(images::count_pending_thumbs(db.conn()).unwrap(), 0);

        // Repopulate does not start a cooldown for itself
        assert!(pipeline.run_repopulate().is_ok());
    }

    #[test]
    fn test_update_cooldown_between_calls() {
        let data = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::with_dirs(data.path(), live.path()));

        assert!(pipeline.run_update().unwrap().updated);
        assert!(matches!(
            pipeline.run_update(),
            Err(PassPulseError::CooldownActive { .. })
        ));
    }

    #[test]
    fn test_failed_phase_is_reported() {
        let data = TempDir::new().unwrap();
        let live = TempDir::new().unwrap();
        let missing_root = live.path().join("absent");
        let pipeline = Pipeline::new(Config::with_dirs(data.path(), &missing_root));

        let report = pipeline.run_update().unwrap();
        assert!(!report.updated);
        assert_eq!(report.step, Some(RunStep::Ingestion));
        assert!(report.message.starts_with("ingestion failed"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["step"], "ingestion");
        assert_eq!(json["updated"], false);

        // Failure leaves no cooldown behind
        assert!(pipeline.run_update().is_ok());
    }
}
