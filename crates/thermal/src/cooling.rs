//! Cooling-time estimation via Newton's law of cooling.
//!
//! While the kiln cools naturally, temperature follows
//! `T(t) = A + (T0 - A) * e^(-k*t)` for ambient temperature `A` and a cooling
//! constant `k` that depends on the kiln's mass and insulation. Log-linearise
//! the samples (`y = ln((T - A)/(T0 - A))`, `x = t - t0`) and `k` falls out of
//! an ordinary least-squares fit as the negated slope. With `k` in hand,
//! time-to-target is a single logarithm.

use std::fmt;

/// How often a refit is attempted, in seconds.
const REFIT_INTERVAL: f64 = 150.0;

/// Sample buffer cap (roughly 30 minutes at a 2 s tick).
const MAX_SAMPLES: usize = 900;

/// Estimates beyond a week mean the fit is nonsense.
const MAX_HORIZON_SECS: f64 = 7.0 * 86_400.0;

/// Minimum temperature delta above ambient for a fit to be meaningful.
const MIN_DELTA_FROM_AMBIENT: f64 = 10.0;

/// Cooling estimator parameters, all in the system temperature scale.
#[derive(Debug, Clone, Copy)]
pub struct CoolingConfig {
    /// Ambient (room) temperature the kiln cools toward.
    pub ambient_temp: f64,
    /// Temperature at which the ware can safely be unloaded.
    pub target_temp: f64,
    /// Minimum number of usable samples before a fit is attempted.
    pub min_samples: usize,
}

/// The operator-facing estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// Not enough data yet for a trustworthy fit.
    Calculating,
    /// Already at or below the unload target.
    Ready,
    /// Estimated seconds until the unload target is reached.
    Remaining(f64),
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Calculating => write!(f, "Calculating..."),
            Estimate::Ready => write!(f, "Ready"),
            Estimate::Remaining(secs) => {
                let hours = (secs / 3600.0).floor();
                let minutes = ((secs % 3600.0) / 60.0).floor();
                write!(f, "{:02}:{:02}", hours as u64, minutes as u64)
            }
        }
    }
}

/// Collects `(time, temperature)` samples during cooling and periodically
/// refits the cooling constant.
#[derive(Debug, Clone)]
pub struct CoolingEstimator {
    cfg: CoolingConfig,
    samples: Vec<(f64, f64)>,
    last_fit_at: f64,
    estimate: Estimate,
}

impl CoolingEstimator {
    /// Starts a fresh estimator. `now` delays the first fit attempt by one
    /// refit interval so the buffer has something to work with.
    pub fn new(cfg: CoolingConfig, now: f64) -> Self {
        Self {
            cfg,
            samples: Vec::new(),
            last_fit_at: now,
            estimate: Estimate::Calculating,
        }
    }

    /// Feeds one sample and returns the current estimate.
    pub fn push(&mut self, now: f64, temp: f64) -> Estimate {
        self.samples.push((now, temp));
        if self.samples.len() > MAX_SAMPLES {
            let excess = self.samples.len() - MAX_SAMPLES;
            self.samples.drain(..excess);
        }

        if temp <= self.cfg.target_temp {
            self.estimate = Estimate::Ready;
            return self.estimate;
        }

        if now - self.last_fit_at >= REFIT_INTERVAL {
            match self.fit_k().and_then(|k| self.time_to_target(temp, k)) {
                Some(remaining) => {
                    self.estimate = Estimate::Remaining(remaining);
                    // only a successful fit resets the interval; failures
                    // retry on every subsequent sample
                    self.last_fit_at = now;
                }
                None => self.estimate = Estimate::Calculating,
            }
        }

        self.estimate
    }

    /// The most recent estimate without feeding a sample.
    pub fn estimate(&self) -> Estimate {
        self.estimate
    }

    /// Least-squares fit of the cooling constant over the sample buffer.
    /// Returns `None` whenever the data cannot support a trustworthy fit.
    fn fit_k(&self) -> Option<f64> {
        if self.samples.len() < self.cfg.min_samples {
            return None;
        }

        let (t0, temp0) = self.samples[0];
        let initial_delta = temp0 - self.cfg.ambient_temp;
        if initial_delta.abs() < MIN_DELTA_FROM_AMBIENT {
            // too close to ambient: the log ratio is all noise
            return None;
        }

        let mut xs = Vec::with_capacity(self.samples.len());
        let mut ys = Vec::with_capacity(self.samples.len());
        for &(t, temp) in &self.samples {
            let delta = temp - self.cfg.ambient_temp;
            if delta <= 0.0 || initial_delta <= 0.0 {
                continue;
            }
            let ratio = delta / initial_delta;
            if ratio <= 0.0 {
                continue;
            }
            xs.push(t - t0);
            ys.push(ratio.ln());
        }

        if xs.len() < self.cfg.min_samples {
            return None;
        }

        let n = xs.len() as f64;
        let sum_x: f64 = xs.iter().sum();
        let sum_y: f64 = ys.iter().sum();
        let sum_xx: f64 = xs.iter().map(|x| x * x).sum();
        let sum_xy: f64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < 1e-10 {
            return None;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let k = -slope;

        // k > 1 would mean the kiln sheds its heat in about a second
        if !k.is_finite() || k <= 0.0 || k > 1.0 {
            return None;
        }
        Some(k)
    }

    /// Seconds until `current_temp` decays to the unload target, given `k`.
    fn time_to_target(&self, current_temp: f64, k: f64) -> Option<f64> {
        if current_temp <= self.cfg.target_temp {
            return Some(0.0);
        }

        let numerator = self.cfg.target_temp - self.cfg.ambient_temp;
        let denominator = current_temp - self.cfg.ambient_temp;
        if numerator <= 0.0 || denominator <= 0.0 {
            return None;
        }

        let ratio = numerator / denominator;
        if ratio <= 0.0 || ratio > 1.0 {
            return None;
        }

        let secs = -ratio.ln() / k;
        if !secs.is_finite() || secs < 0.0 || secs > MAX_HORIZON_SECS {
            return None;
        }
        Some(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn cfg() -> CoolingConfig {
        CoolingConfig {
            ambient_temp: 70.0,
            target_temp: 150.0,
            min_samples: 5,
        }
    }

    /// Synthesizes ideal Newton cooling and checks the estimator recovers it.
    #[test]
    fn fits_synthetic_decay() {
        let k = 1.0e-4;
        let t0_temp = 1800.0;
        let mut est = CoolingEstimator::new(cfg(), 0.0);

        let mut last = Estimate::Calculating;
        for i in 0..200 {
            let t = i as f64 * 2.0;
            let temp = 70.0 + (t0_temp - 70.0) * (-k * t).exp();
            last = est.push(t, temp);
        }
        let remaining = match last {
            Estimate::Remaining(secs) => secs,
            other => panic!("expected a time estimate, got {:?}", other),
        };
        // the last successful refit happens at t=300; the estimate is the
        // analytic time from that sample's temperature down to 150
        let t_now = 300.0;
        let temp_now = 70.0 + (t0_temp - 70.0) * (-k * t_now).exp();
        let expected = -((150.0 - 70.0) / (temp_now - 70.0)).ln() / k;
        assert!(
            approx_eq!(f64, remaining, expected, epsilon = 60.0),
            "estimate {remaining} vs analytic {expected}"
        );
    }

    #[test]
    fn rejects_fit_near_ambient() {
        let near = CoolingConfig {
            ambient_temp: 70.0,
            target_temp: 71.0,
            min_samples: 5,
        };
        let mut est = CoolingEstimator::new(near, 0.0);
        // first sample within 10 degrees of ambient: no trustworthy fit
        for i in 0..200 {
            let t = i as f64 * 2.0;
            est.push(t, 78.0 - i as f64 * 0.005);
        }
        assert_eq!(est.estimate(), Estimate::Calculating);
    }

    #[test]
    fn ready_below_target() {
        let mut est = CoolingEstimator::new(cfg(), 0.0);
        assert_eq!(est.push(0.0, 120.0), Estimate::Ready);
    }

    #[test]
    fn formats_hh_mm() {
        assert_eq!(Estimate::Remaining(3660.0).to_string(), "01:01");
        assert_eq!(Estimate::Remaining(59.0).to_string(), "00:00");
        assert_eq!(Estimate::Ready.to_string(), "Ready");
        assert_eq!(Estimate::Calculating.to_string(), "Calculating...");
    }

    #[test]
    fn needs_minimum_samples() {
        let mut est = CoolingEstimator::new(cfg(), 0.0);
        // only three samples by the time the refit interval passes
        est.push(0.0, 1000.0);
        est.push(80.0, 990.0);
        let last = est.push(160.0, 980.0);
        assert_eq!(last, Estimate::Calculating);
    }
}
