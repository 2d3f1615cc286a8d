//! Safety interlocks for the firing engine.
//!
//! Four independent conditions can abort a firing: absolute overtemperature,
//! a thermocouple error rate over the limit, a stalled heater (commanded hard
//! on with no temperature rise — broken element or welded-open relay), and
//! runaway heating (commanded off with temperature still climbing — a welded
//! relay). Stall and runaway use timed hysteresis: the condition must persist
//! for a configured span before tripping, and any excursion of the duty cycle
//! out of the arming band resets the timer.

/// Why a firing was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCause {
    /// Temperature reached `emergency_shutoff_temp`.
    Overtemp,
    /// Thermocouple error rate exceeded the tracker limit.
    SensorErrors,
    /// Heater near full duty with no meaningful temperature rise.
    Stall,
    /// Heater near zero duty with temperature still rising.
    Runaway,
}

impl TripCause {
    /// Status string recorded in the firing log.
    pub fn as_status(&self) -> &'static str {
        match self {
            TripCause::Overtemp | TripCause::SensorErrors => "emergency_stop",
            TripCause::Stall => "stalled",
            TripCause::Runaway => "runaway",
        }
    }
}

/// Thresholds and per-class ignore flags for the interlocks.
#[derive(Debug, Clone, Copy)]
pub struct InterlockLimits {
    pub emergency_shutoff_temp: f64,
    pub ignore_overtemp: bool,
    pub ignore_sensor_errors: bool,
    /// Seconds of sustained >95% duty before the stall check fires.
    pub stall_detect_time: f64,
    /// Minimum rise over the stall span for the heater to be considered live.
    pub stall_min_temp_rise: f64,
    /// Seconds of sustained <5% duty before the runaway check fires.
    pub runaway_detect_time: f64,
    /// Rise over the runaway span beyond which the relay is presumed stuck.
    pub runaway_min_temp_rise: f64,
}

/// Duty thresholds for arming the stall and runaway timers.
const STALL_ARM_DUTY: f64 = 0.95;
const RUNAWAY_ARM_DUTY: f64 = 0.05;

/// Evaluates the interlocks once per control tick.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    limits: InterlockLimits,
    /// `(armed_at, temp_at_arming)` while duty has stayed above 95%.
    stall_armed: Option<(f64, f64)>,
    /// `(armed_at, temp_at_arming)` while duty has stayed below 5%.
    runaway_armed: Option<(f64, f64)>,
}

impl SafetyMonitor {
    pub fn new(limits: InterlockLimits) -> Self {
        Self {
            limits,
            stall_armed: None,
            runaway_armed: None,
        }
    }

    /// Runs all interlocks. `running` gates the stall/runaway timers, which
    /// only make sense while a schedule is actively driving the duty cycle;
    /// overtemperature and sensor error rate are always checked.
    pub fn check(
        &mut self,
        now: f64,
        temp: f64,
        duty: f64,
        sensor_over_limit: bool,
        running: bool,
    ) -> Option<TripCause> {
        if temp >= self.limits.emergency_shutoff_temp && !self.limits.ignore_overtemp {
            return Some(TripCause::Overtemp);
        }

        if sensor_over_limit && !self.limits.ignore_sensor_errors {
            return Some(TripCause::SensorErrors);
        }

        if !running {
            self.disarm();
            return None;
        }

        // stall: heater running hard but the kiln is not getting hotter
        if duty > STALL_ARM_DUTY {
            match self.stall_armed {
                None => self.stall_armed = Some((now, temp)),
                Some((armed_at, armed_temp)) => {
                    if now - armed_at > self.limits.stall_detect_time
                        && temp - armed_temp < self.limits.stall_min_temp_rise
                    {
                        return Some(TripCause::Stall);
                    }
                }
            }
        } else {
            self.stall_armed = None;
        }

        // runaway: heater commanded off but the kiln keeps heating
        if duty < RUNAWAY_ARM_DUTY {
            match self.runaway_armed {
                None => self.runaway_armed = Some((now, temp)),
                Some((armed_at, armed_temp)) => {
                    if now - armed_at > self.limits.runaway_detect_time
                        && temp - armed_temp > self.limits.runaway_min_temp_rise
                    {
                        return Some(TripCause::Runaway);
                    }
                }
            }
        } else {
            self.runaway_armed = None;
        }

        None
    }

    /// Clears the stall/runaway arming timers (used when leaving RUNNING).
    pub fn disarm(&mut self) {
        self.stall_armed = None;
        self.runaway_armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> InterlockLimits {
        InterlockLimits {
            emergency_shutoff_temp: 2300.0,
            ignore_overtemp: false,
            ignore_sensor_errors: false,
            stall_detect_time: 1800.0,
            stall_min_temp_rise: 2.0,
            runaway_detect_time: 300.0,
            runaway_min_temp_rise: 10.0,
        }
    }

    #[test]
    fn overtemp_trips_immediately() {
        let mut monitor = SafetyMonitor::new(limits());
        assert_eq!(
            monitor.check(0.0, 2301.0, 0.5, false, true),
            Some(TripCause::Overtemp)
        );
    }

    #[test]
    fn overtemp_respects_ignore_flag() {
        let mut l = limits();
        l.ignore_overtemp = true;
        let mut monitor = SafetyMonitor::new(l);
        assert_eq!(monitor.check(0.0, 2301.0, 0.5, false, true), None);
    }

    #[test]
    fn sensor_error_rate_trips() {
        let mut monitor = SafetyMonitor::new(limits());
        assert_eq!(
            monitor.check(0.0, 500.0, 0.5, true, true),
            Some(TripCause::SensorErrors)
        );
    }

    #[test]
    fn stall_needs_sustained_full_duty() {
        let mut monitor = SafetyMonitor::new(limits());
        // armed at t=0, flat temperature
        assert_eq!(monitor.check(0.0, 500.0, 1.0, false, true), None);
        assert_eq!(monitor.check(1000.0, 500.5, 1.0, false, true), None);
        assert_eq!(
            monitor.check(1801.0, 501.0, 1.0, false, true),
            Some(TripCause::Stall)
        );
    }

    #[test]
    fn stall_timer_resets_on_duty_drop() {
        let mut monitor = SafetyMonitor::new(limits());
        monitor.check(0.0, 500.0, 1.0, false, true);
        monitor.check(1000.0, 500.0, 0.5, false, true);
        // re-armed at t=1000; 1801 is within the window again
        assert_eq!(monitor.check(1801.0, 500.0, 1.0, false, true), None);
    }

    #[test]
    fn no_stall_when_temperature_rises() {
        let mut monitor = SafetyMonitor::new(limits());
        monitor.check(0.0, 500.0, 1.0, false, true);
        assert_eq!(monitor.check(1801.0, 550.0, 1.0, false, true), None);
    }

    #[test]
    fn runaway_trips_on_rise_with_heater_off() {
        let mut monitor = SafetyMonitor::new(limits());
        monitor.check(0.0, 500.0, 0.0, false, true);
        assert_eq!(
            monitor.check(301.0, 515.0, 0.0, false, true),
            Some(TripCause::Runaway)
        );
    }

    #[test]
    fn runaway_timer_resets_on_heat_command() {
        let mut monitor = SafetyMonitor::new(limits());
        monitor.check(0.0, 500.0, 0.0, false, true);
        monitor.check(200.0, 510.0, 0.5, false, true);
        assert_eq!(monitor.check(301.0, 515.0, 0.0, false, true), None);
    }

    #[test]
    fn timers_disarm_when_not_running() {
        let mut monitor = SafetyMonitor::new(limits());
        monitor.check(0.0, 500.0, 1.0, false, true);
        monitor.check(900.0, 500.0, 1.0, false, false);
        // arming starts over once running again
        assert_eq!(monitor.check(1801.0, 500.0, 1.0, false, true), None);
    }
}
