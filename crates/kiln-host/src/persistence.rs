//! Restart Snapshots and Firing Logs
//!
//! The restart snapshot lets a power-interrupted firing resume where it left
//! off. Writes are atomic — serialize into a fresh temp file in the target
//! directory, fsync, rename over the destination — so a reader never observes
//! a torn file, and throttled to spare the SD card the controller usually
//! lives on. Critical transitions (abort, completion) bypass the throttle.
//!
//! A missed snapshot is logged and swallowed: persistence trouble must never
//! take the engine down mid-firing.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::config::KilnConfig;
use crate::state::{RunState, SegmentPhase, StateSnapshot};

/// The subset of the state snapshot a restart needs. Deserialized from the
/// same JSON the live snapshot writes.
#[derive(Debug, Clone, Deserialize)]
pub struct RestartState {
    pub state: RunState,
    pub runtime: f64,
    pub profile: Option<String>,
    #[serde(default)]
    pub cost: f64,
    pub current_segment: Option<usize>,
    #[serde(default)]
    pub segment_phase: SegmentPhase,
}

/// Writes throttled, atomic state snapshots and reads them back.
pub struct StateStore {
    path: PathBuf,
    enabled: bool,
    interval: f64,
    last_save: f64,
}

impl StateStore {
    pub fn new(cfg: &KilnConfig) -> Self {
        Self {
            path: cfg.storage.state_file.clone(),
            enabled: cfg.restart.enabled,
            interval: cfg.restart.state_save_interval,
            last_save: 0.0,
        }
    }

    /// Saves unless a save happened within the throttle interval. Returns
    /// whether a write was attempted.
    pub fn save_throttled(&mut self, now: f64, snapshot: &StateSnapshot) -> bool {
        if !self.enabled {
            return false;
        }
        if now - self.last_save < self.interval && self.last_save != 0.0 {
            return false;
        }
        self.last_save = now;
        self.save_now(snapshot);
        true
    }

    /// Unthrottled save for critical transitions.
    pub fn save_now(&mut self, snapshot: &StateSnapshot) {
        if !self.enabled {
            return;
        }
        if let Err(e) = write_atomic(&self.path, snapshot) {
            error!("failed to save state: {e:#}");
        }
    }

    /// Parses the snapshot file, if present and readable.
    pub fn load(&self) -> Option<RestartState> {
        let data = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&data) {
            Ok(state) => Some(state),
            Err(e) => {
                error!("failed to read state file: {e}");
                None
            }
        }
    }

    /// True when the snapshot exists, is younger than `window_minutes` and
    /// recorded a RUNNING firing.
    pub fn restart_eligible(&self, window_minutes: f64) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(metadata) = fs::metadata(&self.path) else {
            return false;
        };
        let age_ok = metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .map(|age| age.as_secs_f64() / 60.0 <= window_minutes)
            .unwrap_or(false);
        if !age_ok {
            return false;
        }
        matches!(
            self.load(),
            Some(RestartState {
                state: RunState::Running,
                ..
            })
        )
    }
}

/// Temp file + fsync + rename. Advisory locking is deliberately omitted: the
/// rename alone is atomic on POSIX, and the snapshot is the only cross-process
/// file.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir).context("creating temp state file")?;
    serde_json::to_writer_pretty(&mut tmp, value).context("serializing state")?;
    tmp.flush()?;
    tmp.as_file().sync_all().context("fsync state file")?;
    tmp.persist(path).context("renaming state file")?;
    Ok(())
}

/// One `{runtime, temperature, target}` sample of the firing's history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemperaturePoint {
    pub runtime: f64,
    pub temperature: f64,
    pub target: f64,
}

/// The per-run firing log written when a run ends, however it ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiringLog {
    pub profile_name: String,
    /// ISO 8601.
    pub start_time: Option<String>,
    /// ISO 8601.
    pub end_time: String,
    pub duration_seconds: i64,
    pub final_cost: f64,
    pub final_temperature: f64,
    pub avg_divergence: f64,
    pub currency_type: String,
    pub temp_scale: String,
    /// `completed`, `aborted`, `emergency_stop`, `stalled` or `runaway`.
    pub status: String,
    pub temperature_log: Vec<TemperaturePoint>,
}

/// Condensed summary kept alongside the full logs for the UI's "last firing"
/// panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LastFiring {
    profile_name: String,
    end_time: String,
    duration_seconds: i64,
    final_cost: f64,
    avg_divergence: f64,
    currency_type: String,
    temp_scale: String,
    status: String,
    log_filename: String,
}

/// Writes the firing log and the last-firing summary. Returns the log path.
pub fn save_firing_log(cfg: &KilnConfig, log: &FiringLog) -> Result<PathBuf> {
    fs::create_dir_all(&cfg.storage.firing_logs_dir)
        .context("creating firing logs directory")?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let safe_name: String = log
        .profile_name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let filename = format!("{timestamp}_{}.json", safe_name.trim());
    let path = cfg.storage.firing_logs_dir.join(&filename);

    fs::write(&path, serde_json::to_string_pretty(log)?)
        .with_context(|| format!("writing firing log {path:?}"))?;
    info!("firing log saved: {}", path.display());

    let summary = LastFiring {
        profile_name: log.profile_name.clone(),
        end_time: log.end_time.clone(),
        duration_seconds: log.duration_seconds,
        final_cost: log.final_cost,
        avg_divergence: log.avg_divergence,
        currency_type: log.currency_type.clone(),
        temp_scale: log.temp_scale.clone(),
        status: log.status.clone(),
        log_filename: filename,
    };
    if let Some(dir) = cfg.storage.last_firing_file.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(
        &cfg.storage.last_firing_file,
        serde_json::to_string_pretty(&summary)?,
    )
    .context("writing last firing summary")?;

    Ok(path)
}
