//! Simulated Kiln
//!
//! A lumped two-body thermodynamic model of an electric kiln (heating element
//! plus chamber), implementing the same capability traits the real hardware
//! does. The firing engine cannot tell the difference, which is the point:
//! every integration test and the `--simulate` mode run the production
//! control loop against this crate.

pub mod clock;
pub mod kiln;

pub use clock::{ManualClock, SimClock};
pub use kiln::{KilnModel, KilnParams, SimKiln, SimHeatSink};
