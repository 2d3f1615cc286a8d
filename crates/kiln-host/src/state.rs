//! Engine State Types
//!
//! The `StateSnapshot` published after every control tick is the single wire
//! format shared by the observer fan-out, the restart snapshot file and the
//! operator UI. The restart reader parses the same JSON as a subset.

use serde::{Deserialize, Serialize};
use thermal::pid::PidStats;

/// The firing engine's machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
}

/// Where we are inside the current segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SegmentPhase {
    #[default]
    #[serde(rename = "ramp")]
    Ramp,
    #[serde(rename = "hold")]
    Hold,
    #[serde(rename = "complete")]
    Complete,
}

/// One control tick's worth of observable engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: RunState,
    /// Schedule seconds (includes any seek/startat offset).
    pub runtime: f64,
    /// Wall-clock seconds since the run actually started (no offset).
    pub actual_elapsed_time: f64,
    pub temperature: f64,
    pub target: f64,
    /// Duty cycle commanded this tick, 0..=1.
    pub heat: f64,
    /// Observed heating rate in degrees/hour.
    pub heat_rate: f64,
    /// Estimated total schedule seconds.
    pub totaltime: f64,
    pub cost: f64,
    pub kwh_rate: f64,
    pub currency_type: String,
    pub profile: Option<String>,
    pub pidstats: PidStats,
    /// True while the v1 catch-up shift is freezing the schedule clock.
    pub catching_up: bool,
    /// `"Calculating..."`, `"Ready"` or `"HH:MM"` while cooling; absent otherwise.
    pub cooling_estimate: Option<String>,

    // Segment-based (v2) fields
    pub target_heat_rate: f64,
    /// Schedule progress, 0..=100.
    pub progress: f64,
    pub current_segment: usize,
    pub segment_phase: SegmentPhase,
    pub eta_seconds: f64,
    pub total_segments: usize,
}
