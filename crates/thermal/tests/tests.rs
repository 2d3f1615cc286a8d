use float_cmp::approx_eq;
use thermal::cooling::{CoolingConfig, CoolingEstimator, Estimate};
use thermal::filter::{Filter, MedianFilter};
use thermal::pid::{Pid, Throttle};
use thermal::safety::{InterlockLimits, SafetyMonitor, TripCause};
use thermal::tracker::FaultTracker;

#[test]
fn median_filter_smooths_spiky_sensor() {
    let mut filter = MedianFilter::new(10);
    for i in 0..10 {
        filter.add_sample(1000.0 + i as f64);
    }
    // one glitched SPI read
    filter.add_sample(-200.0);
    let smoothed = filter.output();
    assert!(
        (1000.0..=1010.0).contains(&smoothed),
        "median {smoothed} dragged by outlier"
    );
}

#[test]
fn fault_tracker_limit_is_thirty_percent_of_double_window() {
    let samples = 5; // window of 10
    let mut tracker = FaultTracker::new(samples);
    for _ in 0..3 {
        tracker.bad();
    }
    assert!(approx_eq!(f64, tracker.error_percent(), 30.0));
    assert!(!tracker.over_limit());
    tracker.bad();
    assert!(tracker.over_limit());
}

/// Spec'd saturation behavior: with a huge persistent error the output pins at
/// full heat while the integral stays bounded, and once the error collapses
/// the output leaves saturation within a single step.
#[test]
fn pid_windup_is_bounded_under_sustained_saturation() {
    let mut pid = Pid::new(1.0, 1.0, 1.0, 100.0, 0.0);

    let mut out = 0.0;
    for tick in 1..=200 {
        out = pid.compute(100.0, 0.0, tick as f64);
    }
    assert_eq!(out, 1.0, "saturated high after sustained error");
    let wound = pid.stats().i;
    // error is exactly at the window edge (bang-bang not engaged), but the
    // clamp keeps the integral from integrating 200 ticks' worth
    assert!(wound <= 100.0, "integral {wound} exceeded output span");

    // setpoint collapses far below the process value: bang-bang cooling takes
    // over within one tick and clears the wound-up integral with it
    let out = pid.compute(0.0, 200.0, 201.0);
    assert_eq!(out, 0.0);
    assert_eq!(pid.stats().i, 0.0);
}

#[test]
fn pid_drives_simple_plant_to_setpoint() {
    // first-order plant: gain on duty, loss to ambient
    let mut temp = 65.0;
    let ambient = 65.0;
    let setpoint = 200.0;
    let mut pid = Pid::new(25.0, 200.0, 20.0, 100.0, 0.0);

    for tick in 1..=600 {
        let duty = pid.compute(setpoint, temp, tick as f64);
        temp += duty * 2.0 - (temp - ambient) * 0.01;
    }

    assert!(
        approx_eq!(f64, temp, setpoint, epsilon = 5.0),
        "plant settled at {temp}, wanted {setpoint}"
    );
}

#[test]
fn pid_throttles_soft_start_only_below_threshold() {
    let mut pid = Pid::new(1.0, 1.0, 1.0, 50.0, 0.0).with_throttle(Some(Throttle {
        below: 212.0,
        fraction: 0.25,
    }));
    assert_eq!(pid.compute(150.0, 0.0, 1.0), 0.25);
    assert_eq!(pid.compute(500.0, 0.0, 2.0), 1.0);
}

#[test]
fn cooling_estimator_full_cycle() {
    let cfg = CoolingConfig {
        ambient_temp: 70.0,
        target_temp: 200.0,
        min_samples: 5,
    };
    let k = 5.0e-5;
    let mut est = CoolingEstimator::new(cfg, 0.0);

    let mut saw_estimate = false;
    let mut t = 0.0;
    let mut temp = 1900.0;
    while temp > cfg.target_temp {
        match est.push(t, temp) {
            Estimate::Remaining(secs) => {
                saw_estimate = true;
                assert!(secs > 0.0 && secs < 7.0 * 86_400.0);
            }
            Estimate::Ready => break,
            Estimate::Calculating => {}
        }
        t += 30.0;
        temp = cfg.ambient_temp + (1900.0 - cfg.ambient_temp) * (-k * t).exp();
    }
    assert!(saw_estimate, "never produced a numeric estimate");
    assert_eq!(est.push(t, cfg.target_temp - 1.0), Estimate::Ready);
}

#[test]
fn interlocks_cover_all_four_causes() {
    let limits = InterlockLimits {
        emergency_shutoff_temp: 2264.0,
        ignore_overtemp: false,
        ignore_sensor_errors: false,
        stall_detect_time: 1800.0,
        stall_min_temp_rise: 2.0,
        runaway_detect_time: 300.0,
        runaway_min_temp_rise: 10.0,
    };

    let mut monitor = SafetyMonitor::new(limits);
    assert_eq!(
        monitor.check(0.0, 2300.0, 0.5, false, true),
        Some(TripCause::Overtemp)
    );

    let mut monitor = SafetyMonitor::new(limits);
    assert_eq!(
        monitor.check(0.0, 800.0, 0.5, true, true),
        Some(TripCause::SensorErrors)
    );

    let mut monitor = SafetyMonitor::new(limits);
    monitor.check(0.0, 800.0, 1.0, false, true);
    assert_eq!(
        monitor.check(1900.0, 801.0, 1.0, false, true),
        Some(TripCause::Stall)
    );

    let mut monitor = SafetyMonitor::new(limits);
    monitor.check(0.0, 800.0, 0.01, false, true);
    assert_eq!(
        monitor.check(400.0, 850.0, 0.01, false, true),
        Some(TripCause::Runaway)
    );
}

#[test]
fn trip_causes_map_to_firing_log_statuses() {
    assert_eq!(TripCause::Overtemp.as_status(), "emergency_stop");
    assert_eq!(TripCause::SensorErrors.as_status(), "emergency_stop");
    assert_eq!(TripCause::Stall.as_status(), "stalled");
    assert_eq!(TripCause::Runaway.as_status(), "runaway");
}
