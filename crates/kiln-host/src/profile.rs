//! Firing Profiles
//!
//! Two wire formats are supported. The legacy v1 format is a polyline of
//! `[seconds, temperature]` points; the v2 format is a list of ramp-and-hold
//! segments with an explicit heating rate. Internally everything becomes
//! segments (v1 rates are derived from the point pairs), and a projected point
//! list is kept alongside for graphing and for the v1 time-based control mode.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::config::TempScale;
use crate::error::ProfileError;

/// How fast a segment moves toward its target, in degrees per hour — or one
/// of the two sentinel behaviors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateSpec {
    /// Signed rate in degrees/hour; 0 means "hold at target".
    PerHour(f64),
    /// Full duty until the target is reached.
    Max,
    /// Zero duty until the kiln has cooled to the target.
    NaturalCool,
}

impl RateSpec {
    /// The numeric rate, if this is not a sentinel.
    pub fn per_hour(&self) -> Option<f64> {
        match self {
            RateSpec::PerHour(r) => Some(*r),
            _ => None,
        }
    }
}

impl Serialize for RateSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RateSpec::PerHour(r) => serializer.serialize_f64(*r),
            RateSpec::Max => serializer.serialize_str("max"),
            RateSpec::NaturalCool => serializer.serialize_str("cool"),
        }
    }
}

impl<'de> Deserialize<'de> for RateSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Word(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(r) => Ok(RateSpec::PerHour(r)),
            Raw::Word(w) => match w.as_str() {
                "max" => Ok(RateSpec::Max),
                "cool" => Ok(RateSpec::NaturalCool),
                other => Err(D::Error::custom(format!("unknown rate {other:?}"))),
            },
        }
    }
}

/// One ramp-and-hold step of a firing schedule. `hold` is in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub rate: RateSpec,
    pub target: f64,
    pub hold: f64,
}

impl Segment {
    /// Rejects a numeric rate whose sign contradicts the direction of travel
    /// from the previous target.
    pub fn validate(&self, index: usize, previous_target: f64) -> Result<(), ProfileError> {
        if let RateSpec::PerHour(rate) = self.rate {
            if rate < 0.0 && self.target > previous_target {
                return Err(ProfileError::Segment {
                    index,
                    reason: format!(
                        "negative rate ({rate}) with increasing target ({previous_target} -> {})",
                        self.target
                    ),
                });
            }
            if rate > 0.0 && self.target < previous_target {
                return Err(ProfileError::Segment {
                    index,
                    reason: format!(
                        "positive rate ({rate}) with decreasing target ({previous_target} -> {})",
                        self.target
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Projection constants for the sentinel rates, taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionRates {
    pub max_heating: f64,
    pub natural_cooling: f64,
}

impl ProjectionRates {
    fn for_rate(&self, rate: RateSpec) -> Option<f64> {
        match rate {
            RateSpec::PerHour(r) if r != 0.0 => Some(r.abs()),
            RateSpec::PerHour(_) => None,
            RateSpec::Max => Some(self.max_heating),
            RateSpec::NaturalCool => Some(self.natural_cooling),
        }
    }
}

/// v2 wire form of a segment: `hold_minutes` on the wire, seconds in memory.
#[derive(Debug, Serialize, Deserialize)]
struct SegmentWire {
    rate: RateSpec,
    target: f64,
    #[serde(default)]
    hold_minutes: f64,
}

/// v2 wire form of a profile.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileWireV2 {
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub start_temp: f64,
    #[serde(default = "default_units")]
    pub temp_units: String,
    segments: Vec<SegmentWire>,
}

fn default_units() -> String {
    "f".to_string()
}

/// v1 wire form: `{name, data: [[t_s, temp], ...], type: "profile"}`.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileWireV1 {
    name: String,
    data: Vec<(f64, f64)>,
}

/// A loaded, validated firing schedule in the system temperature scale.
/// Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub version: u64,
    pub start_temp: f64,
    pub segments: Vec<Segment>,
    /// Legacy `(seconds, temperature)` projection, used by the v1 control
    /// mode, seek-start and graphing.
    points: Vec<(f64, f64)>,
    rates: ProjectionRates,
}

impl Profile {
    /// Parses either wire format, converting into `scale` when the profile
    /// declares different units.
    pub fn from_json(
        json: &str,
        scale: TempScale,
        rates: ProjectionRates,
    ) -> Result<Self, ProfileError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(1);
        match version {
            1 => Self::from_v1(serde_json::from_value(value)?, rates),
            2 => Self::from_v2(serde_json::from_value(value)?, scale, rates),
            other => Err(ProfileError::Version(other)),
        }
    }

    fn from_v1(wire: ProfileWireV1, rates: ProjectionRates) -> Result<Self, ProfileError> {
        if wire.data.is_empty() {
            return Err(ProfileError::Empty);
        }
        let mut points = wire.data;
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let start_temp = points[0].1;
        let mut segments: Vec<Segment> = Vec::new();

        for pair in points.windows(2) {
            let (prev_time, prev_temp) = pair[0];
            let (curr_time, curr_temp) = pair[1];
            let time_diff = curr_time - prev_time;
            if time_diff <= 0.0 {
                continue;
            }
            let temp_diff = curr_temp - prev_temp;
            if temp_diff != 0.0 {
                segments.push(Segment {
                    rate: RateSpec::PerHour(temp_diff / time_diff * 3600.0),
                    target: curr_temp,
                    hold: 0.0,
                });
            } else {
                // a hold: fold into the preceding segment when it ends at the
                // same temperature, so consecutive holds collapse
                let merged = match segments.last_mut() {
                    Some(last) if last.target == curr_temp => {
                        last.hold += time_diff;
                        true
                    }
                    _ => false,
                };
                if !merged {
                    segments.push(Segment {
                        rate: RateSpec::PerHour(0.0),
                        target: curr_temp,
                        hold: time_diff,
                    });
                }
            }
        }

        Ok(Self {
            name: wire.name,
            version: 1,
            start_temp,
            segments,
            points,
            rates,
        })
    }

    fn from_v2(
        wire: ProfileWireV2,
        scale: TempScale,
        rates: ProjectionRates,
    ) -> Result<Self, ProfileError> {
        if wire.segments.is_empty() {
            return Err(ProfileError::Empty);
        }

        let profile_units = wire.temp_units.to_ascii_lowercase();
        let to_f = profile_units == "c" && scale == TempScale::Fahrenheit;
        let to_c = profile_units == "f" && scale == TempScale::Celsius;

        let convert_temp = |t: f64| {
            if to_f {
                t * 9.0 / 5.0 + 32.0
            } else if to_c {
                (t - 32.0) * 5.0 / 9.0
            } else {
                t
            }
        };
        let convert_rate = |r: RateSpec| match r {
            RateSpec::PerHour(rate) if to_f => RateSpec::PerHour(rate * 9.0 / 5.0),
            RateSpec::PerHour(rate) if to_c => RateSpec::PerHour(rate * 5.0 / 9.0),
            other => other,
        };

        let start_temp = convert_temp(wire.start_temp);
        let mut segments = Vec::with_capacity(wire.segments.len());
        let mut previous_target = start_temp;
        for (index, seg) in wire.segments.into_iter().enumerate() {
            let segment = Segment {
                rate: convert_rate(seg.rate),
                target: convert_temp(seg.target),
                hold: seg.hold_minutes * 60.0,
            };
            segment.validate(index, previous_target)?;
            previous_target = segment.target;
            segments.push(segment);
        }

        let mut profile = Self {
            name: wire.name,
            version: 2,
            start_temp,
            segments,
            points: Vec::new(),
            rates,
        };
        profile.points = profile.to_points(start_temp);
        Ok(profile)
    }

    /// Re-serialises into the v2 wire form (temperatures stay in the system
    /// scale they were converted to at load).
    pub fn to_v2_wire(&self) -> ProfileWireV2 {
        ProfileWireV2 {
            name: self.name.clone(),
            version: 2,
            start_temp: self.start_temp,
            temp_units: "f".to_string(),
            segments: self
                .segments
                .iter()
                .map(|s| SegmentWire {
                    rate: s.rate,
                    target: s.target,
                    hold_minutes: s.hold / 60.0,
                })
                .collect(),
        }
    }

    /// Projects the segments onto `(seconds, temperature)` points starting
    /// from `start_temp`. Sentinel rates use the configured estimates. The
    /// watcher calls this with the kiln's live temperature so the graph line
    /// starts where the ware actually is; the profile itself is never
    /// rewritten.
    pub fn to_points(&self, start_temp: f64) -> Vec<(f64, f64)> {
        let mut data = vec![(0.0, start_temp)];
        let mut time = 0.0;
        let mut temp = start_temp;

        for segment in &self.segments {
            if let Some(rate) = self.rates.for_rate(segment.rate) {
                let temp_diff = (segment.target - temp).abs();
                time += temp_diff / rate * 3600.0;
                temp = segment.target;
                data.push((time, temp));
            }
            if segment.hold > 0.0 {
                time += segment.hold;
                data.push((time, temp));
            }
        }
        data
    }

    /// Estimated total schedule seconds, from rates and holds.
    pub fn estimate_duration(&self, start_temp: Option<f64>) -> f64 {
        let mut total = 0.0;
        let mut temp = start_temp.unwrap_or(self.start_temp);
        for segment in &self.segments {
            if let Some(rate) = self.rates.for_rate(segment.rate) {
                total += (segment.target - temp).abs() / rate * 3600.0;
            }
            total += segment.hold;
            temp = segment.target;
        }
        total
    }

    /// Total seconds covered by the projected points.
    pub fn duration(&self) -> f64 {
        self.points
            .iter()
            .map(|(t, _)| *t)
            .fold(0.0, f64::max)
    }

    /// The projected point list.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// The rate of segment `index`, or a zero rate past the end.
    pub fn rate_for_segment(&self, index: usize) -> RateSpec {
        self.segments
            .get(index)
            .map(|s| s.rate)
            .unwrap_or(RateSpec::PerHour(0.0))
    }

    /// Hold seconds of segment `index`, or 0 past the end.
    pub fn hold_duration(&self, index: usize) -> f64 {
        self.segments.get(index).map(|s| s.hold).unwrap_or(0.0)
    }

    /// Linear interpolation of the target temperature at schedule time `t`
    /// (v1 control mode). Returns 0 beyond the end of the schedule.
    pub fn target_at(&self, time: f64) -> f64 {
        if time > self.duration() || self.points.is_empty() {
            return 0.0;
        }

        let (prev, next) = self.surrounding_points(time);
        if next.0 == prev.0 {
            return prev.1;
        }
        let slope = (next.1 - prev.1) / (next.0 - prev.0);
        prev.1 + (time - prev.0) * slope
    }

    fn surrounding_points(&self, time: f64) -> ((f64, f64), (f64, f64)) {
        let last = self.points[self.points.len() - 1];
        if time >= last.0 {
            if self.points.len() >= 2 {
                return (self.points[self.points.len() - 2], last);
            }
            return (last, last);
        }
        for i in 1..self.points.len() {
            if time < self.points[i].0 {
                return (self.points[i - 1], self.points[i]);
            }
        }
        (last, last)
    }

    /// Seek-start inversion: the earliest schedule time whose target equals
    /// `temperature` on a strictly rising segment. Flat and falling segments
    /// are ineligible; returns 0 when no segment qualifies.
    pub fn time_at_temperature(&self, temperature: f64) -> f64 {
        for pair in self.points.windows(2) {
            let (x1, y1) = pair[0];
            let (x2, y2) = pair[1];
            if y2 <= y1 {
                continue;
            }
            if temperature < y1 || temperature > y2 {
                continue;
            }
            // x = (y - y1)(x2 - x1)/(y2 - y1) + x1
            let time = (temperature - y1) * (x2 - x1) / (y2 - y1) + x1;
            debug!(temperature, time, "seek-start intersection");
            return time;
        }
        0.0
    }
}
