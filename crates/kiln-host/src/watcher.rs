//! Observer Fan-Out and Run Recording
//!
//! The control loop posts a state snapshot here after every tick. Each
//! observer (a websocket client in the out-of-scope HTTP layer) owns a
//! bounded channel; a full or disconnected channel drops the observer rather
//! than ever blocking the control loop. The watcher also keeps the per-run
//! snapshot history that becomes the firing log's temperature trace, and the
//! profile graph adjusted to the kiln's live start temperature.

use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info};

use crate::persistence::TemperaturePoint;
use crate::state::{RunState, StateSnapshot};

/// Profile graph data sent to newly-joined observers.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileGraph {
    pub name: String,
    pub data: Vec<(f64, f64)>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// What observers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// Catch-up message for a new observer: the adjusted profile graph plus a
    /// subsample of the run so far.
    Backlog {
        profile: Option<ProfileGraph>,
        log: Vec<StateSnapshot>,
    },
    /// A live per-tick snapshot.
    State(StateSnapshot),
}

/// Default backlog size for new observers.
const BACKLOG_POINTS: usize = 50;

pub struct Watcher {
    observers: Vec<Sender<ObserverEvent>>,
    last_log: Vec<StateSnapshot>,
    profile_graph: Option<ProfileGraph>,
}

impl Watcher {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            last_log: Vec::new(),
            profile_graph: None,
        }
    }

    /// Starts recording a new run. `graph` is the profile projected from the
    /// kiln's actual temperature so the profile line and the live line start
    /// at the same place.
    pub fn record(&mut self, graph: ProfileGraph) {
        info!("recording run of profile {}", graph.name);
        self.last_log.clear();
        self.profile_graph = Some(graph);
    }

    /// Publishes one tick's snapshot to the run history and all observers.
    pub fn publish(&mut self, snapshot: &StateSnapshot) {
        if snapshot.state == RunState::Running {
            self.last_log.push(snapshot.clone());
        }

        self.observers.retain(|observer| {
            match observer.try_send(ObserverEvent::State(snapshot.clone())) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    debug!("dropping slow or closed observer");
                    false
                }
            }
        });
    }

    /// Registers an observer and sends it the backlog.
    pub fn add_observer(&mut self, observer: Sender<ObserverEvent>) {
        let backlog = ObserverEvent::Backlog {
            profile: self.profile_graph.clone(),
            log: self.subsample(BACKLOG_POINTS),
        };
        if observer.try_send(backlog).is_ok() {
            self.observers.push(observer);
        } else {
            debug!("could not send backlog to new observer");
        }
    }

    /// About `max_points` evenly-spaced snapshots from the run history.
    pub fn subsample(&self, max_points: usize) -> Vec<StateSnapshot> {
        let total = self.last_log.len();
        if total <= max_points {
            return self.last_log.clone();
        }
        let every_nth = (total / (max_points - 1)).max(1);
        self.last_log
            .iter()
            .step_by(every_nth)
            .cloned()
            .collect()
    }

    /// The firing log's temperature trace, subsampled to `max_points`.
    pub fn temperature_log(&self, max_points: usize) -> Vec<TemperaturePoint> {
        self.subsample(max_points)
            .into_iter()
            .map(|snap| TemperaturePoint {
                runtime: (snap.runtime * 100.0).round() / 100.0,
                temperature: (snap.temperature * 100.0).round() / 100.0,
                target: (snap.target * 100.0).round() / 100.0,
            })
            .collect()
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}
