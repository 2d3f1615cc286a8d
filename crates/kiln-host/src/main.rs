//! # Kiln Host
//!
//! Entry point for the kiln firing controller. Loads the configuration,
//! assembles the engine around either the simulated kiln or a hardware
//! integration, optionally starts a firing straight from the command line,
//! and then lets the control loop run.
//!
//! ## Concurrency
//!
//! Two long-lived threads do the real work: the thermocouple sampler and the
//! control loop. Observers receive state over bounded channels and can never
//! block either thread.

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use kiln_host::config::KilnConfig;
use kiln_host::engine::{EngineHandle, FiringEngine};
use kiln_host::profile::{Profile, ProjectionRates};
use sim::{KilnModel, KilnParams, SimClock, SimKiln};

/// A Rust-based host process for a kiln firing controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the kiln controller.
    Run(RunArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the kiln configuration file.
    #[arg(short, long, default_value = "kiln.cfg")]
    config_path: PathBuf,

    /// Run against the simulated kiln instead of real hardware.
    #[arg(long)]
    simulate: bool,

    /// Start firing this profile JSON file immediately.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Start the schedule at this many minutes in.
    #[arg(long, default_value_t = 0.0)]
    startat: f64,

    /// Disable seek-start even when the config enables it.
    #[arg(long)]
    no_seek: bool,
}

fn main() -> Result<()> {
    // Initialize the logging subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_controller(args),
    }
}

/// Builds the engine for the selected backend and runs it to completion
/// (which, for a controller, is never).
fn run_controller(args: RunArgs) -> Result<()> {
    info!("starting kiln controller");

    let cfg = if args.config_path.exists() {
        info!("loading configuration from: {:?}", args.config_path);
        KilnConfig::load(&args.config_path)?
    } else {
        warn!(
            "configuration file {:?} not found, using defaults",
            args.config_path
        );
        KilnConfig::default()
    };

    if !args.simulate {
        // Chip and GPIO backends live outside this crate: implement
        // `sensor::RawReader` for the thermocouple and hand an
        // `embedded_hal::digital::OutputPin` to `relay::Relay`, then wire
        // them up exactly as the simulated path below does.
        bail!("no hardware backend compiled in; run with --simulate");
    }

    info!("this is a simulation");
    let params = KilnParams {
        t_env: cfg.sim.t_env,
        c_heat: cfg.sim.c_heat,
        c_oven: cfg.sim.c_oven,
        p_heat: cfg.sim.p_heat,
        r_o_nocool: cfg.sim.r_o_nocool,
        r_ho: cfg.sim.r_ho,
    };
    let model = match cfg.sim.initial_temp {
        Some(temp) => KilnModel::with_initial_temp(params, temp),
        None => KilnModel::new(params),
    };
    let kiln = SimKiln::new(model);
    let clock = SimClock::new(cfg.sim.speedup_factor);
    let sink = kiln.heat_sink(clock.clone());

    let profile = args
        .profile
        .as_ref()
        .map(|path| load_profile(path, &cfg))
        .transpose()?;

    let (engine, handle) = FiringEngine::new(cfg, kiln, sink, clock);
    let engine_thread = engine.spawn();

    if let Some(profile) = profile {
        start_requested_profile(&handle, profile, &args);
    }

    engine_thread
        .join()
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    Ok(())
}

fn load_profile(path: &PathBuf, cfg: &KilnConfig) -> Result<Profile> {
    let json = fs::read_to_string(path).with_context(|| format!("reading profile {path:?}"))?;
    let profile = Profile::from_json(
        &json,
        cfg.temp_scale,
        ProjectionRates {
            max_heating: cfg.rate.estimated_max_heating_rate,
            natural_cooling: cfg.rate.estimated_natural_cooling_rate,
        },
    )
    .with_context(|| format!("parsing profile {path:?}"))?;
    Ok(profile)
}

fn start_requested_profile(handle: &EngineHandle, profile: Profile, args: &RunArgs) {
    info!("starting profile {} from the command line", profile.name);
    handle.run_profile(profile, args.startat, !args.no_seek && args.startat == 0.0);
}
