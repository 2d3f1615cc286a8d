//! Kiln Configuration Loader
//!
//! Parses the controller's INI configuration file into one immutable,
//! strongly-typed `KilnConfig` value that is passed by reference into every
//! constructor. Missing keys fall back to safe defaults so a minimal config
//! (or none at all, for simulation) still produces a usable controller.

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

use crate::sensor::FaultKind;
use thermal::cooling::CoolingConfig;
use thermal::safety::InterlockLimits;

/// The temperature scale everything inside the engine runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempScale {
    Celsius,
    Fahrenheit,
}

impl TempScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempScale::Celsius => "c",
            TempScale::Fahrenheit => "f",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TempScale::Celsius),
            "f" | "fahrenheit" => Ok(TempScale::Fahrenheit),
            other => Err(anyhow!("unknown temperature scale {other:?}")),
        }
    }

    /// Converts a raw Celsius reading into this scale.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TempScale::Celsius => celsius,
            TempScale::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// Converts a Fahrenheit figure (the scale config constants are written
    /// in) into this scale.
    pub fn from_fahrenheit(&self, fahrenheit: f64) -> f64 {
        match self {
            TempScale::Fahrenheit => fahrenheit,
            TempScale::Celsius => (fahrenheit - 32.0) * 5.0 / 9.0,
        }
    }
}

/// Per-fault-class "keep going anyway" policy for the thermocouple.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultPolicy {
    pub ignore_not_connected: bool,
    pub ignore_short_circuit: bool,
    pub ignore_cold_junction_range: bool,
    pub ignore_thermocouple_range: bool,
    pub ignore_cold_junction_high: bool,
    pub ignore_cold_junction_low: bool,
    pub ignore_tc_too_high: bool,
    pub ignore_tc_too_low: bool,
    pub ignore_voltage: bool,
    pub ignore_unknown: bool,
}

impl FaultPolicy {
    /// True when this fault class is configured to be ignored (the read still
    /// counts as good in the fault tracker).
    pub fn ignores(&self, fault: FaultKind) -> bool {
        match fault {
            FaultKind::NotConnected => self.ignore_not_connected,
            FaultKind::ShortCircuit => self.ignore_short_circuit,
            FaultKind::ColdJunctionRange => self.ignore_cold_junction_range,
            FaultKind::ThermocoupleRange => self.ignore_thermocouple_range,
            FaultKind::ColdJunctionHigh => self.ignore_cold_junction_high,
            FaultKind::ColdJunctionLow => self.ignore_cold_junction_low,
            FaultKind::TcTooHigh => self.ignore_tc_too_high,
            FaultKind::TcTooLow => self.ignore_tc_too_low,
            FaultKind::Voltage => self.ignore_voltage,
            FaultKind::Unknown => self.ignore_unknown,
        }
    }
}

/// `[sensor]` section.
#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub thermocouple_type: String,
    /// Control tick period in seconds; also the sensor's duty-cycle window.
    pub time_wait: f64,
    /// Readings per duty cycle contributing to the median.
    pub average_samples: usize,
    /// Calibration shim added to every reading the engine sees.
    pub offset: f64,
    /// Mains-hum rejection selector forwarded to the chip configuration.
    pub ac_freq_50hz: bool,
    pub faults: FaultPolicy,
}

/// `[pid]` section.
#[derive(Debug, Clone)]
pub struct PidSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Half-width of the window outside which the PID goes bang-bang.
    pub control_window: f64,
    pub throttle_below_temp: Option<f64>,
    pub throttle_percent: Option<f64>,
}

/// `[safety]` section.
#[derive(Debug, Clone)]
pub struct SafetySettings {
    pub emergency_shutoff_temp: f64,
    pub ignore_temp_too_high: bool,
    pub ignore_tc_too_many_errors: bool,
    pub stall_detect_time: f64,
    pub stall_min_temp_rise: f64,
    pub runaway_detect_time: f64,
    pub runaway_min_temp_rise: f64,
}

/// `[cost]` section.
#[derive(Debug, Clone)]
pub struct CostSettings {
    pub kwh_rate: f64,
    pub kw_elements: f64,
    pub currency_type: String,
}

/// `[restart]` section.
#[derive(Debug, Clone)]
pub struct RestartSettings {
    pub enabled: bool,
    /// Maximum snapshot age, in minutes, still eligible for auto-restart.
    pub window_minutes: f64,
    /// Minimum seconds between throttled snapshot writes.
    pub state_save_interval: f64,
}

/// `[cooling]` section. Temperatures are written in Fahrenheit in the config
/// file and converted to the system scale on access.
#[derive(Debug, Clone)]
pub struct CoolingSettings {
    pub ambient_temp_f: f64,
    pub target_temp_f: f64,
    pub min_samples: usize,
}

/// `[rate]` section: everything specific to segment-based (v2) control.
#[derive(Debug, Clone)]
pub struct RateSettings {
    pub use_rate_based_control: bool,
    pub segment_complete_tolerance: f64,
    pub lookahead_seconds: f64,
    pub max_target_divergence: f64,
    pub estimated_max_heating_rate: f64,
    pub estimated_natural_cooling_rate: f64,
    pub heat_rate_window_seconds: f64,
    pub deviation_warning: f64,
}

/// `[gpio]` section. Pin numbers are opaque to the engine; the hardware
/// integration maps them onto a concrete `OutputPin`/SPI backend.
#[derive(Debug, Clone, Default)]
pub struct GpioSettings {
    pub heat_pin: Option<u64>,
    pub heat_invert: bool,
    pub spi_sclk: Option<u64>,
    pub spi_mosi: Option<u64>,
    pub spi_miso: Option<u64>,
    pub spi_cs: Option<u64>,
}

/// `[storage]` section.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub state_file: PathBuf,
    pub firing_logs_dir: PathBuf,
    pub last_firing_file: PathBuf,
    pub profiles_dir: PathBuf,
}

/// `[sim]` section: the simulated kiln's physical constants.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub speedup_factor: f64,
    pub t_env: f64,
    pub c_heat: f64,
    pub c_oven: f64,
    pub p_heat: f64,
    pub r_o_nocool: f64,
    pub r_ho: f64,
    pub initial_temp: Option<f64>,
}

/// The whole controller configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct KilnConfig {
    pub temp_scale: TempScale,
    /// v1 catch-up: freeze the schedule while the kiln lags the target.
    pub kiln_must_catch_up: bool,
    /// Advance the schedule clock to match a pre-heated kiln at run start.
    pub seek_start: bool,
    pub sensor: SensorSettings,
    pub pid: PidSettings,
    pub safety: SafetySettings,
    pub cost: CostSettings,
    pub restart: RestartSettings,
    pub cooling: CoolingSettings,
    pub rate: RateSettings,
    pub gpio: GpioSettings,
    pub storage: StorageSettings,
    pub sim: SimSettings,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            temp_scale: TempScale::Fahrenheit,
            kiln_must_catch_up: true,
            seek_start: true,
            sensor: SensorSettings {
                thermocouple_type: "K".to_string(),
                time_wait: 2.0,
                average_samples: 10,
                offset: 0.0,
                ac_freq_50hz: false,
                faults: FaultPolicy::default(),
            },
            pid: PidSettings {
                kp: 25.0,
                ki: 1088.0,
                kd: 217.0,
                control_window: 100.0,
                throttle_below_temp: None,
                throttle_percent: None,
            },
            safety: SafetySettings {
                emergency_shutoff_temp: 2264.0,
                ignore_temp_too_high: false,
                ignore_tc_too_many_errors: false,
                stall_detect_time: 1800.0,
                stall_min_temp_rise: 2.0,
                runaway_detect_time: 300.0,
                runaway_min_temp_rise: 10.0,
            },
            cost: CostSettings {
                kwh_rate: 0.1319,
                kw_elements: 11.0,
                currency_type: "$".to_string(),
            },
            restart: RestartSettings {
                enabled: true,
                window_minutes: 15.0,
                state_save_interval: 60.0,
            },
            cooling: CoolingSettings {
                ambient_temp_f: 65.0,
                target_temp_f: 150.0,
                min_samples: 5,
            },
            rate: RateSettings {
                use_rate_based_control: true,
                segment_complete_tolerance: 5.0,
                lookahead_seconds: 60.0,
                max_target_divergence: 50.0,
                estimated_max_heating_rate: 500.0,
                estimated_natural_cooling_rate: 100.0,
                heat_rate_window_seconds: 300.0,
                deviation_warning: 50.0,
            },
            gpio: GpioSettings::default(),
            storage: StorageSettings {
                state_file: PathBuf::from("storage/state.json"),
                firing_logs_dir: PathBuf::from("storage/firing_logs"),
                last_firing_file: PathBuf::from("storage/last_firing.json"),
                profiles_dir: PathBuf::from("storage/profiles"),
            },
            sim: SimSettings {
                speedup_factor: 100.0,
                t_env: 65.0,
                c_heat: 100.0,
                c_oven: 5000.0,
                p_heat: 5450.0,
                r_o_nocool: 1.0,
                r_ho: 0.1,
                initial_temp: None,
            },
        }
    }
}

impl KilnConfig {
    /// Loads and parses the configuration file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("failed to load configuration file: {path:?}"))?;

        let mut cfg = KilnConfig::default();

        if let Some(scale) = ini.get("kiln", "temp_scale") {
            cfg.temp_scale = TempScale::parse(&scale)?;
        }
        read_bool(&ini, "kiln", "kiln_must_catch_up", &mut cfg.kiln_must_catch_up)?;
        read_bool(&ini, "kiln", "seek_start", &mut cfg.seek_start)?;

        if let Some(tc) = ini.get("sensor", "thermocouple_type") {
            cfg.sensor.thermocouple_type = tc;
        }
        read_float(&ini, "sensor", "sensor_time_wait", &mut cfg.sensor.time_wait)?;
        read_usize(
            &ini,
            "sensor",
            "temperature_average_samples",
            &mut cfg.sensor.average_samples,
        )?;
        read_float(&ini, "sensor", "thermocouple_offset", &mut cfg.sensor.offset)?;
        read_bool(&ini, "sensor", "ac_freq_50hz", &mut cfg.sensor.ac_freq_50hz)?;
        {
            let f = &mut cfg.sensor.faults;
            read_bool(&ini, "sensor", "ignore_tc_lost_connection", &mut f.ignore_not_connected)?;
            read_bool(&ini, "sensor", "ignore_tc_short_errors", &mut f.ignore_short_circuit)?;
            read_bool(
                &ini,
                "sensor",
                "ignore_tc_cold_junction_range_error",
                &mut f.ignore_cold_junction_range,
            )?;
            read_bool(&ini, "sensor", "ignore_tc_range_error", &mut f.ignore_thermocouple_range)?;
            read_bool(
                &ini,
                "sensor",
                "ignore_tc_cold_junction_temp_high",
                &mut f.ignore_cold_junction_high,
            )?;
            read_bool(
                &ini,
                "sensor",
                "ignore_tc_cold_junction_temp_low",
                &mut f.ignore_cold_junction_low,
            )?;
            read_bool(&ini, "sensor", "ignore_tc_temp_high", &mut f.ignore_tc_too_high)?;
            read_bool(&ini, "sensor", "ignore_tc_temp_low", &mut f.ignore_tc_too_low)?;
            read_bool(&ini, "sensor", "ignore_tc_voltage_error", &mut f.ignore_voltage)?;
            read_bool(&ini, "sensor", "ignore_tc_unknown_error", &mut f.ignore_unknown)?;
        }

        read_float(&ini, "pid", "kp", &mut cfg.pid.kp)?;
        read_float(&ini, "pid", "ki", &mut cfg.pid.ki)?;
        read_float(&ini, "pid", "kd", &mut cfg.pid.kd)?;
        read_float(&ini, "pid", "pid_control_window", &mut cfg.pid.control_window)?;
        cfg.pid.throttle_below_temp = get_float(&ini, "pid", "throttle_below_temp")?;
        cfg.pid.throttle_percent = get_float(&ini, "pid", "throttle_percent")?;

        read_float(
            &ini,
            "safety",
            "emergency_shutoff_temp",
            &mut cfg.safety.emergency_shutoff_temp,
        )?;
        read_bool(&ini, "safety", "ignore_temp_too_high", &mut cfg.safety.ignore_temp_too_high)?;
        read_bool(
            &ini,
            "safety",
            "ignore_tc_too_many_errors",
            &mut cfg.safety.ignore_tc_too_many_errors,
        )?;
        read_float(&ini, "safety", "stall_detect_time", &mut cfg.safety.stall_detect_time)?;
        read_float(&ini, "safety", "stall_min_temp_rise", &mut cfg.safety.stall_min_temp_rise)?;
        read_float(&ini, "safety", "runaway_detect_time", &mut cfg.safety.runaway_detect_time)?;
        read_float(
            &ini,
            "safety",
            "runaway_min_temp_rise",
            &mut cfg.safety.runaway_min_temp_rise,
        )?;

        read_float(&ini, "cost", "kwh_rate", &mut cfg.cost.kwh_rate)?;
        read_float(&ini, "cost", "kw_elements", &mut cfg.cost.kw_elements)?;
        if let Some(currency) = ini.get("cost", "currency_type") {
            cfg.cost.currency_type = currency;
        }

        read_bool(&ini, "restart", "automatic_restarts", &mut cfg.restart.enabled)?;
        read_float(
            &ini,
            "restart",
            "automatic_restart_window",
            &mut cfg.restart.window_minutes,
        )?;
        read_float(&ini, "restart", "state_save_interval", &mut cfg.restart.state_save_interval)?;

        read_float(&ini, "cooling", "cooling_ambient_temp", &mut cfg.cooling.ambient_temp_f)?;
        read_float(&ini, "cooling", "cooling_target_temp", &mut cfg.cooling.target_temp_f)?;
        read_usize(&ini, "cooling", "cooling_min_samples", &mut cfg.cooling.min_samples)?;

        read_bool(
            &ini,
            "rate",
            "use_rate_based_control",
            &mut cfg.rate.use_rate_based_control,
        )?;
        read_float(
            &ini,
            "rate",
            "segment_complete_tolerance",
            &mut cfg.rate.segment_complete_tolerance,
        )?;
        read_float(&ini, "rate", "rate_lookahead_seconds", &mut cfg.rate.lookahead_seconds)?;
        read_float(&ini, "rate", "max_target_divergence", &mut cfg.rate.max_target_divergence)?;
        read_float(
            &ini,
            "rate",
            "estimated_max_heating_rate",
            &mut cfg.rate.estimated_max_heating_rate,
        )?;
        read_float(
            &ini,
            "rate",
            "estimated_natural_cooling_rate",
            &mut cfg.rate.estimated_natural_cooling_rate,
        )?;
        read_float(
            &ini,
            "rate",
            "heat_rate_window_seconds",
            &mut cfg.rate.heat_rate_window_seconds,
        )?;
        read_float(&ini, "rate", "rate_deviation_warning", &mut cfg.rate.deviation_warning)?;

        cfg.gpio.heat_pin = get_uint(&ini, "gpio", "gpio_heat")?;
        read_bool(&ini, "gpio", "gpio_heat_invert", &mut cfg.gpio.heat_invert)?;
        cfg.gpio.spi_sclk = get_uint(&ini, "gpio", "spi_sclk")?;
        cfg.gpio.spi_mosi = get_uint(&ini, "gpio", "spi_mosi")?;
        cfg.gpio.spi_miso = get_uint(&ini, "gpio", "spi_miso")?;
        cfg.gpio.spi_cs = get_uint(&ini, "gpio", "spi_cs")?;

        read_path(&ini, "storage", "state_file", &mut cfg.storage.state_file);
        read_path(&ini, "storage", "firing_logs_directory", &mut cfg.storage.firing_logs_dir);
        read_path(&ini, "storage", "last_firing_file", &mut cfg.storage.last_firing_file);
        read_path(&ini, "storage", "profiles_directory", &mut cfg.storage.profiles_dir);

        read_float(&ini, "sim", "speedup_factor", &mut cfg.sim.speedup_factor)?;
        read_float(&ini, "sim", "t_env", &mut cfg.sim.t_env)?;
        read_float(&ini, "sim", "c_heat", &mut cfg.sim.c_heat)?;
        read_float(&ini, "sim", "c_oven", &mut cfg.sim.c_oven)?;
        read_float(&ini, "sim", "p_heat", &mut cfg.sim.p_heat)?;
        read_float(&ini, "sim", "r_o_nocool", &mut cfg.sim.r_o_nocool)?;
        read_float(&ini, "sim", "r_ho", &mut cfg.sim.r_ho)?;
        cfg.sim.initial_temp = get_float(&ini, "sim", "initial_temp")?;

        Ok(cfg)
    }

    /// Cooling constants converted to the system scale.
    pub fn cooling_config(&self) -> CoolingConfig {
        CoolingConfig {
            ambient_temp: self.temp_scale.from_fahrenheit(self.cooling.ambient_temp_f),
            target_temp: self.temp_scale.from_fahrenheit(self.cooling.target_temp_f),
            min_samples: self.cooling.min_samples,
        }
    }

    /// The safety monitor's limit set.
    pub fn interlock_limits(&self) -> InterlockLimits {
        InterlockLimits {
            emergency_shutoff_temp: self.safety.emergency_shutoff_temp,
            ignore_overtemp: self.safety.ignore_temp_too_high,
            ignore_sensor_errors: self.safety.ignore_tc_too_many_errors,
            stall_detect_time: self.safety.stall_detect_time,
            stall_min_temp_rise: self.safety.stall_min_temp_rise,
            runaway_detect_time: self.safety.runaway_detect_time,
            runaway_min_temp_rise: self.safety.runaway_min_temp_rise,
        }
    }

    /// The soft-start throttle, when both halves are configured.
    pub fn throttle(&self) -> Option<thermal::pid::Throttle> {
        match (self.pid.throttle_below_temp, self.pid.throttle_percent) {
            (Some(below), Some(percent)) => Some(thermal::pid::Throttle {
                below,
                fraction: percent / 100.0,
            }),
            _ => None,
        }
    }
}

fn get_float(ini: &Ini, section: &str, key: &str) -> Result<Option<f64>> {
    ini.getfloat(section, key)
        .map_err(|e| anyhow!("[{section}] {key}: {e}"))
}

fn get_uint(ini: &Ini, section: &str, key: &str) -> Result<Option<u64>> {
    ini.getuint(section, key)
        .map_err(|e| anyhow!("[{section}] {key}: {e}"))
}

fn read_float(ini: &Ini, section: &str, key: &str, slot: &mut f64) -> Result<()> {
    if let Some(value) = get_float(ini, section, key)? {
        *slot = value;
    }
    Ok(())
}

fn read_usize(ini: &Ini, section: &str, key: &str, slot: &mut usize) -> Result<()> {
    if let Some(value) = get_uint(ini, section, key)? {
        *slot = value as usize;
    }
    Ok(())
}

fn read_bool(ini: &Ini, section: &str, key: &str, slot: &mut bool) -> Result<()> {
    if let Some(value) = ini
        .getboolcoerce(section, key)
        .map_err(|e| anyhow!("[{section}] {key}: {e}"))?
    {
        *slot = value;
    }
    Ok(())
}

fn read_path(ini: &Ini, section: &str, key: &str, slot: &mut PathBuf) {
    if let Some(value) = ini.get(section, key) {
        *slot = PathBuf::from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = KilnConfig::default();
        assert_eq!(cfg.pid.control_window, 100.0);
        assert_eq!(cfg.safety.stall_detect_time, 1800.0);
        assert_eq!(cfg.restart.state_save_interval, 60.0);
        assert!(cfg.throttle().is_none());
    }

    #[test]
    fn loads_overrides_and_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[kiln]\ntemp_scale = c\n\n[pid]\nkp = 10\nthrottle_below_temp = 300\nthrottle_percent = 40\n\n[sensor]\nignore_tc_short_errors = true\n"
        )
        .unwrap();

        let cfg = KilnConfig::load(file.path()).unwrap();
        assert_eq!(cfg.temp_scale, TempScale::Celsius);
        assert_eq!(cfg.pid.kp, 10.0);
        // untouched keys keep their defaults
        assert_eq!(cfg.pid.ki, 1088.0);
        assert!(cfg.sensor.faults.ignore_short_circuit);
        let throttle = cfg.throttle().unwrap();
        assert_eq!(throttle.below, 300.0);
        assert_eq!(throttle.fraction, 0.4);
    }

    #[test]
    fn cooling_constants_convert_to_celsius() {
        let mut cfg = KilnConfig::default();
        cfg.temp_scale = TempScale::Celsius;
        let cooling = cfg.cooling_config();
        assert!((cooling.target_temp - (150.0 - 32.0) * 5.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn scale_conversions_round_trip() {
        let f = TempScale::Fahrenheit.from_celsius(100.0);
        assert_eq!(f, 212.0);
        assert!((TempScale::Celsius.from_fahrenheit(f) - 100.0).abs() < 1e-9);
    }
}
