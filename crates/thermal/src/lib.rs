//! # Thermal Control Crate
//!
//! `thermal` provides the control-law building blocks for a kiln temperature
//! controller. Everything in this crate is pure logic: it takes timestamps,
//! temperatures and duty cycles as plain numbers and never touches hardware,
//! threads or the filesystem, which keeps it trivially testable.
//!
//! ## Features
//!
//! - **Signal Filtering**: A sliding-median filter that rejects single-sample
//!   outliers from a noisy thermocouple better than an average would.
//! - **Fault Tracking**: A sliding success/failure window over sensor reads,
//!   used for the error-rate safety interlock.
//! - **PID Controller**: A discrete-time PID with a bang-bang fallback outside
//!   a control window and saturation-aware anti-windup.
//! - **Cooling Estimation**: Newton's-law-of-cooling fit by log-linear
//!   regression, for "time until the ware can be unloaded" estimates.
//! - **Safety Interlocks**: Overtemperature, sensor error rate, stall and
//!   runaway detection with timed hysteresis.
//! - **Capability Traits**: The seams (`TemperatureSource`, `HeatSink`,
//!   `Clock`) that let the same control loop drive a real relay or a
//!   simulated kiln.

pub mod cooling;
pub mod filter;
pub mod pid;
pub mod safety;
pub mod tracker;
pub mod traits;

// Re-export key types
pub use cooling::{CoolingConfig, CoolingEstimator, Estimate};
pub use filter::{Filter, MedianFilter};
pub use pid::{Pid, PidStats};
pub use safety::{InterlockLimits, SafetyMonitor, TripCause};
pub use tracker::FaultTracker;
pub use traits::{Clock, HeatSink, SystemClock, TemperatureSource};
