//! Thermocouple Sampling
//!
//! A background thread reads the thermocouple `average_samples` times per
//! control tick, converts each raw Celsius reading to the system scale and
//! feeds a sliding-median filter. The control loop only ever sees the median
//! and the fault tracker's verdict, published behind a mutex.
//!
//! Chip drivers (MAX31855, MAX31856, ...) are deliberately behind the
//! [`RawReader`] seam: each chip maps its native error reporting onto the
//! [`FaultKind`] classes here, and everything above the seam is chip-agnostic.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tracing::error;

use crate::config::{FaultPolicy, KilnConfig, TempScale};
use thermal::filter::{Filter, MedianFilter};
use thermal::tracker::FaultTracker;
use thermal::traits::{Clock, TemperatureSource};

/// Classified thermocouple fault, normalised across chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    NotConnected,
    ShortCircuit,
    ColdJunctionRange,
    ThermocoupleRange,
    ColdJunctionHigh,
    ColdJunctionLow,
    TcTooHigh,
    TcTooLow,
    Voltage,
    Unknown,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            FaultKind::NotConnected => "not connected",
            FaultKind::ShortCircuit => "short circuit",
            FaultKind::ColdJunctionRange => "cold junction range fault",
            FaultKind::ThermocoupleRange => "thermocouple range fault",
            FaultKind::ColdJunctionHigh => "cold junction temp too high",
            FaultKind::ColdJunctionLow => "cold junction temp too low",
            FaultKind::TcTooHigh => "thermocouple temp too high",
            FaultKind::TcTooLow => "thermocouple temp too low",
            FaultKind::Voltage => "voltage too high or low",
            FaultKind::Unknown => "unknown",
        };
        f.write_str(message)
    }
}

/// Raw access to a thermocouple chip. Returns Celsius or a classified fault.
pub trait RawReader: Send {
    fn read(&mut self) -> Result<f64, FaultKind>;
}

struct SensorShared {
    filter: Mutex<MedianFilter<f64>>,
    tracker: Mutex<FaultTracker>,
}

/// Cloneable read handle to the sampler's published state. This is the
/// engine's `TemperatureSource` on real hardware.
#[derive(Clone)]
pub struct SensorHandle {
    shared: Arc<SensorShared>,
}

impl TemperatureSource for SensorHandle {
    fn temperature(&self) -> f64 {
        self.shared.filter.lock().output()
    }

    fn over_error_limit(&self) -> bool {
        self.shared.tracker.lock().over_limit()
    }
}

/// Starts the sampling thread and returns the shared read handle.
///
/// Ignored fault classes still count as good reads in the tracker but
/// contribute nothing to the median, so a chattering-but-ignored fault cannot
/// poison the smoothed temperature.
pub fn spawn_sampler<R, C>(cfg: &KilnConfig, mut reader: R, clock: C) -> SensorHandle
where
    R: RawReader + 'static,
    C: Clock + 'static,
{
    let shared = Arc::new(SensorShared {
        filter: Mutex::new(MedianFilter::new(cfg.sensor.average_samples)),
        tracker: Mutex::new(FaultTracker::new(cfg.sensor.average_samples)),
    });

    let handle = SensorHandle {
        shared: shared.clone(),
    };
    let scale = cfg.temp_scale;
    let faults = cfg.sensor.faults;
    let sleep_secs = cfg.sensor.time_wait / cfg.sensor.average_samples as f64;

    thread::Builder::new()
        .name("temp-sampler".to_string())
        .spawn(move || {
            sample_loop(&mut reader, &shared, scale, faults, sleep_secs, clock);
        })
        .expect("failed to spawn sensor thread");

    handle
}

fn sample_loop<R: RawReader, C: Clock>(
    reader: &mut R,
    shared: &SensorShared,
    scale: TempScale,
    faults: FaultPolicy,
    sleep_secs: f64,
    clock: C,
) {
    loop {
        match reader.read() {
            Ok(celsius) => {
                shared.filter.lock().add_sample(scale.from_celsius(celsius));
                shared.tracker.lock().good();
            }
            Err(fault) if faults.ignores(fault) => {
                error!("problem reading temp (ignored) {fault}");
                shared.tracker.lock().good();
            }
            Err(fault) => {
                error!("problem reading temp {fault}");
                shared.tracker.lock().bad();
            }
        }
        clock.sleep(sleep_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KilnConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thermal::traits::SystemClock;

    /// Scripted reader: yields each outcome once, then repeats the last.
    struct Script {
        outcomes: Vec<Result<f64, FaultKind>>,
        cursor: Arc<AtomicUsize>,
    }

    impl RawReader for Script {
        fn read(&mut self) -> Result<f64, FaultKind> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.outcomes[i.min(self.outcomes.len() - 1)]
        }
    }

    fn fast_cfg() -> KilnConfig {
        let mut cfg = KilnConfig::default();
        // 4 reads per 20 ms tick keeps the tests quick
        cfg.sensor.time_wait = 0.02;
        cfg.sensor.average_samples = 4;
        cfg
    }

    fn wait_for_reads(cursor: &Arc<AtomicUsize>, count: usize) {
        for _ in 0..500 {
            if cursor.load(Ordering::SeqCst) >= count {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        panic!("sampler made no progress");
    }

    #[test]
    fn sampler_publishes_median_in_system_scale() {
        let cfg = fast_cfg(); // Fahrenheit
        let cursor = Arc::new(AtomicUsize::new(0));
        let reader = Script {
            outcomes: vec![Ok(100.0)],
            cursor: cursor.clone(),
        };
        let handle = spawn_sampler(&cfg, reader, SystemClock::new());
        wait_for_reads(&cursor, 6);
        assert_eq!(handle.temperature(), 212.0);
        assert!(!handle.over_error_limit());
    }

    #[test]
    fn ignored_faults_count_as_good() {
        let mut cfg = fast_cfg();
        cfg.sensor.faults.ignore_short_circuit = true;
        let cursor = Arc::new(AtomicUsize::new(0));
        let reader = Script {
            outcomes: vec![Err(FaultKind::ShortCircuit)],
            cursor: cursor.clone(),
        };
        let handle = spawn_sampler(&cfg, reader, SystemClock::new());
        wait_for_reads(&cursor, 10);
        assert!(!handle.over_error_limit());
    }

    #[test]
    fn unignored_faults_trip_the_tracker() {
        let cfg = fast_cfg(); // tracker window of 8
        let cursor = Arc::new(AtomicUsize::new(0));
        let reader = Script {
            outcomes: vec![Err(FaultKind::NotConnected)],
            cursor: cursor.clone(),
        };
        let handle = spawn_sampler(&cfg, reader, SystemClock::new());
        wait_for_reads(&cursor, 10);
        assert!(handle.over_error_limit());
    }
}
