//! Snapshot atomicity, throttling and restart eligibility.

use std::fs;
use std::time::Duration;

use kiln_host::config::KilnConfig;
use kiln_host::persistence::{save_firing_log, FiringLog, StateStore, TemperaturePoint};
use kiln_host::state::{RunState, SegmentPhase, StateSnapshot};
use thermal::pid::PidStats;

fn cfg_in(dir: &std::path::Path) -> KilnConfig {
    let mut cfg = KilnConfig::default();
    cfg.storage.state_file = dir.join("state.json");
    cfg.storage.firing_logs_dir = dir.join("firing_logs");
    cfg.storage.last_firing_file = dir.join("last_firing.json");
    cfg.storage.profiles_dir = dir.join("profiles");
    cfg
}

fn snapshot(state: RunState) -> StateSnapshot {
    StateSnapshot {
        state,
        runtime: 5000.0,
        actual_elapsed_time: 5100.0,
        temperature: 824.0,
        target: 830.0,
        heat: 0.42,
        heat_rate: 148.0,
        totaltime: 25560.0,
        cost: 1.23,
        kwh_rate: 0.1319,
        currency_type: "$".to_string(),
        profile: Some("cone-6".to_string()),
        pidstats: PidStats::default(),
        catching_up: false,
        cooling_estimate: None,
        target_heat_rate: 150.0,
        progress: 40.0,
        current_segment: 1,
        segment_phase: SegmentPhase::Hold,
        eta_seconds: 9000.0,
        total_segments: 3,
    }
}

#[test]
fn snapshot_round_trips_through_the_restart_reader() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let mut store = StateStore::new(&cfg);

    store.save_now(&snapshot(RunState::Running));
    let restored = store.load().expect("snapshot should parse");
    assert_eq!(restored.state, RunState::Running);
    assert_eq!(restored.runtime, 5000.0);
    assert_eq!(restored.profile.as_deref(), Some("cone-6"));
    assert_eq!(restored.cost, 1.23);
    assert_eq!(restored.current_segment, Some(1));
    assert_eq!(restored.segment_phase, SegmentPhase::Hold);
}

#[test]
fn concurrent_readers_never_observe_a_torn_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let path = cfg.storage.state_file.clone();

    let writer = std::thread::spawn(move || {
        let mut store = StateStore::new(&cfg);
        for _ in 0..200 {
            store.save_now(&snapshot(RunState::Running));
        }
    });

    // readers race the writer; every observed file must parse completely
    let mut observed = 0;
    while !writer.is_finished() {
        if let Ok(data) = fs::read_to_string(&path) {
            let parsed: Result<serde_json::Value, _> = serde_json::from_str(&data);
            assert!(parsed.is_ok(), "torn snapshot observed: {data:.40}");
            observed += 1;
        }
    }
    writer.join().unwrap();
    assert!(observed > 0, "reader never saw the file");
}

#[test]
fn throttle_suppresses_frequent_saves() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let mut store = StateStore::new(&cfg);

    assert!(store.save_throttled(100.0, &snapshot(RunState::Running)));
    assert!(!store.save_throttled(110.0, &snapshot(RunState::Running)));
    assert!(!store.save_throttled(159.0, &snapshot(RunState::Running)));
    assert!(store.save_throttled(161.0, &snapshot(RunState::Running)));
}

#[test]
fn restart_requires_a_running_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let mut store = StateStore::new(&cfg);

    // no file yet
    assert!(!store.restart_eligible(15.0));

    store.save_now(&snapshot(RunState::Idle));
    assert!(!store.restart_eligible(15.0));

    store.save_now(&snapshot(RunState::Running));
    assert!(store.restart_eligible(15.0));
}

#[test]
fn restart_window_expires() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());
    let mut store = StateStore::new(&cfg);

    store.save_now(&snapshot(RunState::Running));
    std::thread::sleep(Duration::from_millis(120));
    // a ~6 ms window has long passed; a generous one has not
    assert!(!store.restart_eligible(0.0001));
    assert!(store.restart_eligible(15.0));
}

#[test]
fn disabled_restarts_never_save_or_match() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cfg_in(dir.path());
    cfg.restart.enabled = false;
    let mut store = StateStore::new(&cfg);

    assert!(!store.save_throttled(100.0, &snapshot(RunState::Running)));
    store.save_now(&snapshot(RunState::Running));
    assert!(!cfg.storage.state_file.exists());
    assert!(!store.restart_eligible(15.0));
}

#[test]
fn firing_log_and_summary_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = cfg_in(dir.path());

    let log = FiringLog {
        profile_name: "cone 6 glaze / fast!".to_string(),
        start_time: Some("2026-02-01T08:00:00-05:00".to_string()),
        end_time: "2026-02-01T16:30:00-05:00".to_string(),
        duration_seconds: 30600,
        final_cost: 4.56,
        final_temperature: 2232.0,
        avg_divergence: 3.2,
        currency_type: "$".to_string(),
        temp_scale: "f".to_string(),
        status: "completed".to_string(),
        temperature_log: vec![TemperaturePoint {
            runtime: 0.0,
            temperature: 65.0,
            target: 65.0,
        }],
    };

    let path = save_firing_log(&cfg, &log).unwrap();
    assert!(path.exists());
    // awkward profile characters are stripped from the filename
    assert!(!path.file_name().unwrap().to_str().unwrap().contains('/'));
    assert!(!path.file_name().unwrap().to_str().unwrap().contains('!'));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&cfg.storage.last_firing_file).unwrap()).unwrap();
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["final_cost"], 4.56);
    assert_eq!(
        summary["log_filename"],
        serde_json::Value::String(path.file_name().unwrap().to_str().unwrap().to_string())
    );
}
