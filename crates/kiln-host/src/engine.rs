//! The Firing Engine
//!
//! One long-lived control loop owning all run state. Per tick it reads the
//! smoothed temperature, derives the target from the profile (time-based v1
//! or rate-based v2), asks the PID for a duty cycle, lets the safety monitor
//! veto, commands the heat sink (which blocks for the tick, pacing the loop),
//! accrues cost, snapshots state and publishes to observers.
//!
//! The engine is generic over its environment ([`TemperatureSource`],
//! [`HeatSink`], [`Clock`]) so the identical loop drives real hardware and
//! the simulated kiln.

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread;
use tracing::{error, info, warn};

use crate::config::KilnConfig;
use crate::persistence::{save_firing_log, FiringLog, StateStore};
use crate::profile::{Profile, RateSpec};
use crate::state::{RunState, SegmentPhase, StateSnapshot};
use crate::watcher::{ObserverEvent, ProfileGraph, Watcher};
use thermal::cooling::{CoolingEstimator, Estimate};
use thermal::pid::Pid;
use thermal::safety::{SafetyMonitor, TripCause};
use thermal::traits::{Clock, HeatSink, TemperatureSource};

/// Seek-start only engages when the kiln is this far above the schedule's
/// starting target.
const SEEK_START_GUARD: f64 = 5.0;

/// Heat-rate sample buffer floor and ceiling.
const HEAT_RATE_MIN_SAMPLES: usize = 10;
const HEAT_RATE_MAX_SAMPLES: usize = 1000;

/// Commands accepted by the control loop.
pub enum Command {
    Run {
        profile: Profile,
        startat_minutes: f64,
        allow_seek: bool,
    },
    Pause,
    Resume,
    Stop,
    Subscribe(Sender<ObserverEvent>),
    GetState(Sender<StateSnapshot>),
}

/// Cloneable handle for the out-of-scope front end to drive the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<Command>,
}

impl EngineHandle {
    pub fn run_profile(&self, profile: Profile, startat_minutes: f64, allow_seek: bool) {
        let _ = self.tx.send(Command::Run {
            profile,
            startat_minutes,
            allow_seek,
        });
    }

    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Registers an observer channel; it receives a backlog immediately and a
    /// snapshot per tick afterwards.
    pub fn subscribe(&self, observer: Sender<ObserverEvent>) {
        let _ = self.tx.send(Command::Subscribe(observer));
    }

    /// Fetches a snapshot from the loop; answers within one tick.
    pub fn state(&self) -> Option<StateSnapshot> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx.send(Command::GetState(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }
}

/// Everything that varies over a run, owned exclusively by the control loop.
struct Context {
    state: RunState,
    profile: Option<Profile>,
    /// Schedule seconds at run start (manual startat plus any seek offset).
    startat: f64,
    runtime: f64,
    totaltime: f64,
    actual_elapsed: f64,
    target: f64,
    duty: f64,
    cost: f64,
    catching_up: bool,
    heat_rate: f64,
    heat_rate_samples: Vec<(f64, f64)>,
    divergence_samples: Vec<f64>,
    /// Clock second the schedule clock is anchored to (`now - runtime`).
    schedule_start: f64,
    /// Clock second the run actually started (no offset).
    wall_start: f64,
    started_at: Option<DateTime<Local>>,
    last_tick: f64,

    // Segment-based (v2) state
    segment_index: usize,
    segment_phase: SegmentPhase,
    segment_start_time: f64,
    segment_start_temp: f64,
    hold_start: Option<f64>,
    progress: f64,
    target_heat_rate: f64,
}

impl Context {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            profile: None,
            startat: 0.0,
            runtime: 0.0,
            totaltime: 0.0,
            actual_elapsed: 0.0,
            target: 0.0,
            duty: 0.0,
            cost: 0.0,
            catching_up: false,
            heat_rate: 0.0,
            heat_rate_samples: Vec::new(),
            divergence_samples: Vec::new(),
            schedule_start: 0.0,
            wall_start: 0.0,
            started_at: None,
            last_tick: 0.0,
            segment_index: 0,
            segment_phase: SegmentPhase::Ramp,
            segment_start_time: 0.0,
            segment_start_temp: 0.0,
            hold_start: None,
            progress: 0.0,
            target_heat_rate: 0.0,
        }
    }
}

pub struct FiringEngine<S, H, C> {
    cfg: KilnConfig,
    sensor: S,
    sink: H,
    clock: C,
    rx: Receiver<Command>,
    ctx: Context,
    pid: Pid,
    monitor: SafetyMonitor,
    cooling: Option<CoolingEstimator>,
    store: StateStore,
    watcher: Watcher,
}

impl<S, H, C> FiringEngine<S, H, C>
where
    S: TemperatureSource,
    H: HeatSink,
    C: Clock,
{
    pub fn new(cfg: KilnConfig, sensor: S, sink: H, clock: C) -> (Self, EngineHandle) {
        let (tx, rx) = unbounded();
        let pid = Pid::new(
            cfg.pid.kp,
            cfg.pid.ki,
            cfg.pid.kd,
            cfg.pid.control_window,
            clock.now(),
        )
        .with_throttle(cfg.throttle());
        let monitor = SafetyMonitor::new(cfg.interlock_limits());
        let store = StateStore::new(&cfg);

        let engine = Self {
            cfg,
            sensor,
            sink,
            clock,
            rx,
            ctx: Context::new(),
            pid,
            monitor,
            cooling: None,
            store,
            watcher: Watcher::new(),
        };
        (engine, EngineHandle { tx })
    }

    /// Runs the control loop forever.
    pub fn run(mut self) {
        info!("firing engine started");
        loop {
            self.drain_commands();
            match self.ctx.state {
                RunState::Idle => self.idle_tick(),
                RunState::Paused => self.paused_tick(),
                RunState::Running => self.running_tick(),
            }
        }
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(self) -> thread::JoinHandle<()>
    where
        S: 'static,
        H: 'static,
        C: 'static,
    {
        thread::Builder::new()
            .name("firing-engine".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn engine thread")
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Run {
                    profile,
                    startat_minutes,
                    allow_seek,
                } => self.start_run(profile, startat_minutes, allow_seek),
                Command::Pause => {
                    if self.ctx.state == RunState::Running {
                        info!("firing paused");
                        self.ctx.state = RunState::Paused;
                    } else {
                        warn!("cannot pause, state is {:?}", self.ctx.state);
                    }
                }
                Command::Resume => {
                    if self.ctx.state == RunState::Paused {
                        info!("firing resumed");
                        self.ctx.state = RunState::Running;
                    } else {
                        warn!("cannot resume, state is {:?}", self.ctx.state);
                    }
                }
                Command::Stop => {
                    if self.ctx.state != RunState::Idle {
                        info!("stop requested by operator");
                        self.finish_run("aborted");
                    }
                }
                Command::Subscribe(observer) => self.watcher.add_observer(observer),
                Command::GetState(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------

    fn idle_tick(&mut self) {
        let now = self.clock.now();
        if self.store.restart_eligible(self.cfg.restart.window_minutes) {
            match self.automatic_restart(now) {
                Ok(()) => return,
                Err(e) => warn!("automatic restart failed: {e:#}"),
            }
        }

        self.update_cooling_estimate(now);
        let snapshot = self.snapshot();
        self.watcher.publish(&snapshot);
        self.clock.sleep(1.0);
    }

    fn paused_tick(&mut self) {
        let now = self.clock.now();
        let dt = (now - self.ctx.last_tick).max(0.0);

        // freeze every schedule clock forward by the pause interval
        self.ctx.schedule_start += dt;
        self.ctx.segment_start_time += dt;
        if let Some(hold) = self.ctx.hold_start.as_mut() {
            *hold += dt;
        }

        self.update_runtime(now);
        self.update_target(now);
        self.heat_then_cool(now);
        if self.check_safety(now) {
            return;
        }
        if self.ctx.runtime > self.ctx.totaltime && !self.use_segments() {
            self.complete_run();
            return;
        }

        let snapshot = self.snapshot();
        self.watcher.publish(&snapshot);
        self.ctx.last_tick = now;
    }

    fn running_tick(&mut self) {
        let now = self.clock.now();
        self.ctx.actual_elapsed = now - self.ctx.wall_start;

        self.update_cost();
        self.track_divergence();
        let snapshot = self.snapshot();
        self.store.save_throttled(now, &snapshot);

        if self.use_segments() {
            self.update_segment_progress(now);
            self.update_runtime(now);
            self.update_target(now);
            self.check_rate_deviation();
            self.update_schedule_progress(now);
            if self.ctx.segment_index >= self.segment_count() {
                info!("all segments complete, shutting down");
                self.complete_run();
                return;
            }
        } else {
            self.kiln_catch_up(now);
            self.update_runtime(now);
            self.update_target(now);
            if self.ctx.runtime > self.ctx.totaltime {
                info!("schedule ended, shutting down");
                self.complete_run();
                return;
            }
        }

        self.heat_then_cool(now);
        if self.check_safety(now) {
            return;
        }

        let snapshot = self.snapshot();
        self.watcher.publish(&snapshot);
        self.ctx.last_tick = now;
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    fn start_run(&mut self, profile: Profile, startat_minutes: f64, allow_seek: bool) {
        let now = self.clock.now();
        let mut runtime = startat_minutes * 60.0;

        if allow_seek && self.ctx.state == RunState::Idle && self.cfg.seek_start {
            let temp = self.read_temp();
            if temp > profile.target_at(0.0) + SEEK_START_GUARD {
                let seek = profile.time_at_temperature(temp);
                runtime += seek;
                info!(
                    "seek_start is in effect, starting at: {:.0} s, {:.0} deg",
                    seek, temp
                );
            }
        }

        self.reset_context(now);
        self.ctx.startat = runtime;
        self.ctx.runtime = runtime;
        self.ctx.schedule_start = now - runtime;
        self.ctx.wall_start = now;
        self.ctx.started_at = Some(Local::now());
        self.ctx.totaltime = profile.duration();
        self.ctx.last_tick = now;

        if self.cfg.rate.use_rate_based_control {
            self.ctx.segment_index = 0;
            self.ctx.segment_phase = SegmentPhase::Ramp;
            self.ctx.segment_start_time = now;
            self.ctx.segment_start_temp = self.read_temp();
            self.ctx.hold_start = None;
            info!(
                "using rate-based control with {} segments",
                profile.segments.len()
            );
        }

        let actual_temp = self.read_temp();
        self.watcher.record(ProfileGraph {
            name: profile.name.clone(),
            data: profile.to_points(actual_temp),
            kind: "profile".to_string(),
        });

        info!(
            "running schedule {} starting at {:.0} minutes",
            profile.name, startat_minutes
        );
        self.ctx.profile = Some(profile);
        self.ctx.state = RunState::Running;
    }

    /// Resumes an interrupted firing from the restart snapshot.
    fn automatic_restart(&mut self, now: f64) -> anyhow::Result<()> {
        let Some(restart) = self.store.load() else {
            anyhow::bail!("state file unreadable");
        };
        if restart.state != RunState::Running {
            anyhow::bail!("state file not RUNNING");
        }
        let Some(name) = restart.profile.clone() else {
            anyhow::bail!("state file has no profile name");
        };

        let path = self.cfg.storage.profiles_dir.join(format!("{name}.json"));
        let json = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("profile {path:?}: {e}"))?;
        let profile = Profile::from_json(
            &json,
            self.cfg.temp_scale,
            crate::profile::ProjectionRates {
                max_heating: self.cfg.rate.estimated_max_heating_rate,
                natural_cooling: self.cfg.rate.estimated_natural_cooling_rate,
            },
        )?;

        if self.cfg.rate.use_rate_based_control {
            if let Some(segment_index) = restart.current_segment {
                info!(
                    "automatic restart (v2): profile={name}, segment={segment_index}, phase={:?}",
                    restart.segment_phase
                );
                let graph_temp = self.read_temp();

                self.reset_context(now);
                self.ctx.totaltime = profile.duration();
                self.ctx.schedule_start = now - restart.runtime;
                self.ctx.runtime = restart.runtime;
                self.ctx.wall_start = now;
                self.ctx.started_at = Some(Local::now());
                self.ctx.last_tick = now;
                self.ctx.segment_index = segment_index.min(profile.segments.len());
                self.ctx.segment_phase = restart.segment_phase;
                self.ctx.segment_start_time = now;
                self.ctx.segment_start_temp = graph_temp;
                // conservative: a resumed hold restarts from now, so the ware
                // may soak longer but never shorter than scheduled
                self.ctx.hold_start = match restart.segment_phase {
                    SegmentPhase::Hold => {
                        info!("resuming hold phase - hold timer restarted");
                        Some(now)
                    }
                    _ => None,
                };

                self.watcher.record(ProfileGraph {
                    name: profile.name.clone(),
                    data: profile.to_points(graph_temp),
                    kind: "profile".to_string(),
                });
                self.ctx.profile = Some(profile);
                self.ctx.cost = restart.cost;
                self.ctx.state = RunState::Running;
                return Ok(());
            }
        }

        // legacy v1 restart: resume at the recorded runtime, seek disabled
        let startat_minutes = restart.runtime / 60.0;
        info!("automatic restart (v1): profile={name} at minute={startat_minutes:.0}");
        self.start_run(profile, startat_minutes, false);
        self.ctx.cost = restart.cost;
        Ok(())
    }

    /// Normal completion: log, cool-down bookkeeping, back to IDLE.
    fn complete_run(&mut self) {
        info!(
            "total cost = {}{:.2}",
            self.cfg.cost.currency_type, self.ctx.cost
        );
        self.finish_run("completed");
    }

    /// Every path that leaves RUNNING funnels through here. Order is a safety
    /// property: relay off, then the firing log, then the IDLE transition,
    /// then the final (unthrottled) snapshot.
    fn finish_run(&mut self, status: &str) {
        self.sink.off();

        if self.ctx.profile.is_some() {
            let log = self.compose_firing_log(status);
            if let Err(e) = save_firing_log(&self.cfg, &log) {
                error!("failed to save firing log: {e:#}");
            }
        }

        let now = self.clock.now();
        self.reset_context(now);

        let snapshot = self.snapshot();
        self.store.save_now(&snapshot);
        self.watcher.publish(&snapshot);
    }

    fn reset_context(&mut self, now: f64) {
        self.ctx = Context::new();
        self.pid.reset(now);
        self.monitor.disarm();
    }

    fn compose_firing_log(&self, status: &str) -> FiringLog {
        let divergence = &self.ctx.divergence_samples;
        let avg_divergence = if divergence.is_empty() {
            0.0
        } else {
            divergence.iter().sum::<f64>() / divergence.len() as f64
        };

        FiringLog {
            profile_name: self
                .ctx
                .profile
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            start_time: self.ctx.started_at.map(|t| t.to_rfc3339()),
            end_time: Local::now().to_rfc3339(),
            duration_seconds: self.ctx.runtime as i64,
            final_cost: (self.ctx.cost * 100.0).round() / 100.0,
            final_temperature: (self.read_temp() * 100.0).round() / 100.0,
            avg_divergence: (avg_divergence * 100.0).round() / 100.0,
            currency_type: self.cfg.cost.currency_type.clone(),
            temp_scale: self.cfg.temp_scale.as_str().to_string(),
            status: status.to_string(),
            temperature_log: self.watcher.temperature_log(500),
        }
    }

    // ------------------------------------------------------------------
    // Per-tick pieces
    // ------------------------------------------------------------------

    fn read_temp(&self) -> f64 {
        self.sensor.temperature() + self.cfg.sensor.offset
    }

    fn use_segments(&self) -> bool {
        self.cfg.rate.use_rate_based_control && self.ctx.profile.is_some()
    }

    fn segment_count(&self) -> usize {
        self.ctx
            .profile
            .as_ref()
            .map(|p| p.segments.len())
            .unwrap_or(0)
    }

    fn update_runtime(&mut self, now: f64) {
        self.ctx.runtime = (now - self.ctx.schedule_start).max(0.0);
    }

    fn update_target(&mut self, now: f64) {
        if self.use_segments() {
            self.ctx.target = self.rate_based_target(now);
            self.ctx.target_heat_rate = self
                .ctx
                .profile
                .as_ref()
                .map(|p| p.rate_for_segment(self.ctx.segment_index))
                .and_then(|r| r.per_hour())
                .unwrap_or(0.0);
        } else if let Some(profile) = &self.ctx.profile {
            self.ctx.target = profile.target_at(self.ctx.runtime);
        }
    }

    /// v1 catch-up: freeze the schedule clock while the kiln is outside the
    /// control window in either direction.
    fn kiln_catch_up(&mut self, now: f64) {
        if !self.cfg.kiln_must_catch_up {
            return;
        }
        let temp = self.read_temp();
        if self.ctx.target - temp > self.cfg.pid.control_window {
            info!("kiln must catch up, too cold, shifting schedule");
            self.ctx.schedule_start = now - self.ctx.runtime;
            self.ctx.catching_up = true;
        } else if temp - self.ctx.target > self.cfg.pid.control_window {
            info!("kiln must catch up, too hot, shifting schedule");
            self.ctx.schedule_start = now - self.ctx.runtime;
            self.ctx.catching_up = true;
        } else {
            self.ctx.catching_up = false;
        }
    }

    /// Temperature-driven segment advancement (v2).
    fn update_segment_progress(&mut self, now: f64) {
        let Some(segment) = self
            .ctx
            .profile
            .as_ref()
            .and_then(|p| p.segments.get(self.ctx.segment_index))
            .copied()
        else {
            return;
        };

        let temp = self.read_temp();
        let tolerance = self.cfg.rate.segment_complete_tolerance;

        match self.ctx.segment_phase {
            SegmentPhase::Ramp => {
                let reached = match segment.rate {
                    RateSpec::PerHour(rate) if rate > 0.0 => temp >= segment.target - tolerance,
                    RateSpec::PerHour(rate) if rate < 0.0 => temp <= segment.target + tolerance,
                    RateSpec::PerHour(_) => true, // pure hold
                    RateSpec::Max => temp >= segment.target - tolerance,
                    RateSpec::NaturalCool => temp <= segment.target + tolerance,
                };
                if reached {
                    if segment.hold > 0.0 {
                        self.ctx.segment_phase = SegmentPhase::Hold;
                        self.ctx.hold_start = Some(now);
                        info!(
                            "segment {}: reached target {:.1}, starting {:.1} min hold",
                            self.ctx.segment_index,
                            segment.target,
                            segment.hold / 60.0
                        );
                    } else {
                        self.advance_segment(now);
                    }
                }
            }
            SegmentPhase::Hold => {
                if let Some(hold_start) = self.ctx.hold_start {
                    if now - hold_start >= segment.hold {
                        self.advance_segment(now);
                    }
                }
            }
            SegmentPhase::Complete => {}
        }
    }

    fn advance_segment(&mut self, now: f64) {
        self.ctx.segment_index += 1;
        if self.ctx.segment_index >= self.segment_count() {
            self.ctx.segment_phase = SegmentPhase::Complete;
            return;
        }
        self.ctx.segment_phase = SegmentPhase::Ramp;
        self.ctx.segment_start_time = now;
        self.ctx.segment_start_temp = self.read_temp();
        self.ctx.hold_start = None;
        if let Some(segment) = self
            .ctx
            .profile
            .as_ref()
            .and_then(|p| p.segments.get(self.ctx.segment_index))
        {
            info!(
                "starting segment {}: rate={:?}, target={:.1}",
                self.ctx.segment_index, segment.rate, segment.target
            );
        }
    }

    /// The v2 target: a rate-enforcing ceiling plus a clamped lead for PID
    /// responsiveness, never past the segment target.
    fn rate_based_target(&self, now: f64) -> f64 {
        let Some(profile) = &self.ctx.profile else {
            return 0.0;
        };
        let Some(segment) = profile.segments.get(self.ctx.segment_index) else {
            return 0.0;
        };

        if self.ctx.segment_phase == SegmentPhase::Hold {
            return segment.target;
        }

        let rate = match segment.rate {
            RateSpec::Max | RateSpec::NaturalCool => return segment.target,
            RateSpec::PerHour(rate) if rate == 0.0 => return segment.target,
            RateSpec::PerHour(rate) => rate,
        };

        let elapsed = (now - self.ctx.segment_start_time).max(0.0);
        let ceiling = self.ctx.segment_start_temp + rate * elapsed / 3600.0;

        let lookahead = elapsed.min(self.cfg.rate.lookahead_seconds);
        let raw_lead = rate * lookahead / 3600.0;
        let max_divergence = self.cfg.rate.max_target_divergence;
        let lead = raw_lead.clamp(-max_divergence, max_divergence);

        let target = ceiling + lead;
        if rate > 0.0 {
            target.min(segment.target)
        } else {
            target.max(segment.target)
        }
    }

    /// Logs when the observed heating rate strays from the prescribed one.
    fn check_rate_deviation(&self) {
        if self.ctx.segment_phase != SegmentPhase::Ramp {
            return;
        }
        let Some(rate) = self
            .ctx
            .profile
            .as_ref()
            .map(|p| p.rate_for_segment(self.ctx.segment_index))
            .and_then(|r| r.per_hour())
        else {
            return;
        };
        if rate == 0.0 {
            return;
        }

        let target_rate = rate.abs();
        let actual_rate = self.ctx.heat_rate.abs();
        let deviation = (target_rate - actual_rate).abs();
        if deviation > self.cfg.rate.deviation_warning {
            if actual_rate < target_rate {
                warn!(
                    "kiln heating slower than target: actual {actual_rate:.1} deg/hr vs target \
                     {target_rate:.1} deg/hr (deviation: {deviation:.1} deg/hr)"
                );
            } else {
                info!(
                    "kiln heating faster than target: actual {actual_rate:.1} deg/hr vs target \
                     {target_rate:.1} deg/hr"
                );
            }
        }
    }

    /// Segment-weighted completion percentage for the UI.
    fn update_schedule_progress(&mut self, now: f64) {
        let Some(profile) = &self.ctx.profile else {
            self.ctx.progress = 0.0;
            return;
        };
        let total = profile.segments.len();
        if total == 0 {
            self.ctx.progress = 0.0;
            return;
        }

        let mut progress = self.ctx.segment_index as f64 / total as f64 * 100.0;

        if let Some(segment) = profile.segments.get(self.ctx.segment_index) {
            let temp = self.read_temp();
            let start_temp = if self.ctx.segment_start_temp != 0.0 {
                self.ctx.segment_start_temp
            } else if self.ctx.segment_index == 0 {
                profile.start_temp
            } else {
                profile.segments[self.ctx.segment_index - 1].target
            };
            let temp_range = (segment.target - start_temp).abs();

            let ramp_time = match segment.rate {
                RateSpec::PerHour(rate) if rate != 0.0 => temp_range / rate.abs() * 3600.0,
                RateSpec::PerHour(_) => 0.0,
                RateSpec::Max => temp_range / self.cfg.rate.estimated_max_heating_rate * 3600.0,
                RateSpec::NaturalCool => {
                    temp_range / self.cfg.rate.estimated_natural_cooling_rate * 3600.0
                }
            };
            let total_time = ramp_time + segment.hold;
            let (ramp_weight, hold_weight) = if total_time > 0.0 {
                (ramp_time / total_time, segment.hold / total_time)
            } else {
                (1.0, 0.0)
            };

            let segment_progress = match self.ctx.segment_phase {
                SegmentPhase::Ramp => {
                    let temp_progress = if temp_range > 0.0 {
                        ((temp - start_temp).abs() / temp_range).clamp(0.0, 1.0)
                    } else {
                        1.0
                    };
                    temp_progress * ramp_weight
                }
                SegmentPhase::Hold | SegmentPhase::Complete => {
                    let hold_progress = match (self.ctx.hold_start, segment.hold > 0.0) {
                        (Some(start), true) => ((now - start) / segment.hold).clamp(0.0, 1.0),
                        _ => 1.0,
                    };
                    ramp_weight + hold_progress * hold_weight
                }
            };
            progress += segment_progress / total as f64 * 100.0;
        }

        self.ctx.progress = progress.min(100.0);
    }

    /// Rate-derived seconds until the schedule completes (v2 UI field).
    fn estimate_remaining(&self, now: f64) -> f64 {
        let Some(profile) = &self.ctx.profile else {
            return 0.0;
        };
        let current_temp = self.read_temp();
        let mut remaining = 0.0;

        if let Some(segment) = profile.segments.get(self.ctx.segment_index) {
            match self.ctx.segment_phase {
                SegmentPhase::Ramp => {
                    let temp_remaining = (segment.target - current_temp).abs();
                    let rate = match segment.rate {
                        RateSpec::PerHour(rate) if rate != 0.0 => Some(rate.abs()),
                        RateSpec::PerHour(_) => None,
                        RateSpec::Max => Some(self.cfg.rate.estimated_max_heating_rate),
                        RateSpec::NaturalCool => {
                            Some(self.cfg.rate.estimated_natural_cooling_rate)
                        }
                    };
                    if let Some(rate) = rate {
                        remaining += temp_remaining / rate * 3600.0;
                    }
                    remaining += segment.hold;
                }
                SegmentPhase::Hold => {
                    if let Some(start) = self.ctx.hold_start {
                        remaining += (segment.hold - (now - start)).max(0.0);
                    }
                }
                SegmentPhase::Complete => {}
            }
        }

        let mut prev_target = current_temp;
        for segment in profile.segments.iter().skip(self.ctx.segment_index + 1) {
            let temp_diff = (segment.target - prev_target).abs();
            let rate = match segment.rate {
                RateSpec::PerHour(rate) if rate != 0.0 => Some(rate.abs()),
                RateSpec::PerHour(_) => None,
                RateSpec::Max => Some(self.cfg.rate.estimated_max_heating_rate),
                RateSpec::NaturalCool => Some(self.cfg.rate.estimated_natural_cooling_rate),
            };
            if let Some(rate) = rate {
                remaining += temp_diff / rate * 3600.0;
            }
            remaining += segment.hold;
            prev_target = segment.target;
        }
        remaining
    }

    /// Computes the duty cycle and drives the sink for one tick.
    fn heat_then_cool(&mut self, now: f64) {
        let temp = self.read_temp();
        let mut duty = self.pid.compute(self.ctx.target, temp, now);

        // during a controlled-cooling segment with the kiln at or above
        // target, heating makes no sense whatever the integral thinks
        if self.ctx.target_heat_rate < 0.0 && temp >= self.ctx.target {
            duty = 0.0;
            self.pid.suppress_heating();
        }

        self.ctx.duty = duty;
        let time_for_rate = if self.use_segments() {
            self.ctx.actual_elapsed
        } else {
            self.ctx.runtime
        };
        self.update_heat_rate(time_for_rate, temp);

        self.sink.apply(duty, self.cfg.sensor.time_wait);
    }

    /// Hybrid sample retention: keep at least `HEAT_RATE_MIN_SAMPLES`, or the
    /// configured time window, whichever holds more data.
    fn update_heat_rate(&mut self, time: f64, temp: f64) {
        let samples = &mut self.ctx.heat_rate_samples;
        samples.push((time, temp));

        if samples.len() > HEAT_RATE_MIN_SAMPLES {
            let cutoff = time - self.cfg.rate.heat_rate_window_seconds;
            let recent = samples.iter().filter(|(t, _)| *t >= cutoff).count();
            if recent >= HEAT_RATE_MIN_SAMPLES {
                samples.retain(|(t, _)| *t >= cutoff);
            } else {
                let keep_from = samples.len() - HEAT_RATE_MIN_SAMPLES;
                samples.drain(..keep_from);
            }
        }
        if samples.len() > HEAT_RATE_MAX_SAMPLES {
            let excess = samples.len() - HEAT_RATE_MAX_SAMPLES;
            samples.drain(..excess);
        }

        if samples.len() >= 2 {
            let (t1, temp1) = samples[0];
            let (t2, temp2) = samples[samples.len() - 1];
            if t2 > t1 {
                self.ctx.heat_rate = (temp2 - temp1) / (t2 - t1) * 3600.0;
            }
        }
    }

    /// Duty-weighted energy cost for the previous tick.
    fn update_cost(&mut self) {
        if self.ctx.duty > 0.0 {
            self.ctx.cost += self.cfg.cost.kwh_rate
                * self.cfg.cost.kw_elements
                * self.ctx.duty
                * (self.cfg.sensor.time_wait / 3600.0);
        }
    }

    fn track_divergence(&mut self) {
        let divergence = (self.ctx.target - self.read_temp()).abs();
        self.ctx.divergence_samples.push(divergence);
    }

    /// Runs the interlocks; on a trip, logs the cause and aborts. Returns
    /// true when the run was aborted.
    fn check_safety(&mut self, now: f64) -> bool {
        let temp = self.read_temp();
        let cause = self.monitor.check(
            now,
            temp,
            self.ctx.duty,
            self.sensor.over_error_limit(),
            self.ctx.state == RunState::Running,
        );
        let Some(cause) = cause else {
            return false;
        };

        match cause {
            TripCause::Overtemp => error!("emergency!!! temperature too high"),
            TripCause::SensorErrors => error!("emergency!!! too many errors in a short period"),
            TripCause::Stall => error!(
                "emergency: kiln stall detected, heater saturated with only {:.1} deg rise",
                self.cfg.safety.stall_min_temp_rise
            ),
            TripCause::Runaway => error!(
                "emergency: runaway heating detected, heater off but temperature still rising"
            ),
        }
        self.finish_run(cause.as_status());
        true
    }

    /// While IDLE above the cool-down target, keep the unload estimate fresh.
    fn update_cooling_estimate(&mut self, now: f64) {
        let cooling_cfg = self.cfg.cooling_config();
        let temp = self.read_temp();
        if temp > cooling_cfg.target_temp {
            let estimator = self
                .cooling
                .get_or_insert_with(|| CoolingEstimator::new(cooling_cfg, now));
            estimator.push(now, temp);
        } else {
            // ride through to Ready, then drop the estimator entirely
            let ready = self
                .cooling
                .as_mut()
                .map(|estimator| estimator.push(now, temp) == Estimate::Ready)
                .unwrap_or(false);
            if ready {
                self.cooling = None;
            }
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.ctx.state,
            runtime: self.ctx.runtime,
            actual_elapsed_time: self.ctx.actual_elapsed,
            temperature: self.read_temp(),
            target: self.ctx.target,
            heat: self.ctx.duty,
            heat_rate: self.ctx.heat_rate,
            totaltime: self.ctx.totaltime,
            cost: self.ctx.cost,
            kwh_rate: self.cfg.cost.kwh_rate,
            currency_type: self.cfg.cost.currency_type.clone(),
            profile: self.ctx.profile.as_ref().map(|p| p.name.clone()),
            pidstats: self.pid.stats(),
            catching_up: self.ctx.catching_up,
            cooling_estimate: self.cooling.as_ref().map(|c| c.estimate().to_string()),
            target_heat_rate: self.ctx.target_heat_rate,
            progress: self.ctx.progress,
            current_segment: self.ctx.segment_index,
            segment_phase: self.ctx.segment_phase,
            eta_seconds: if self.use_segments() {
                self.estimate_remaining(self.clock.now())
            } else {
                (self.ctx.totaltime - self.ctx.runtime).max(0.0)
            },
            total_segments: self.segment_count(),
        }
    }
}
