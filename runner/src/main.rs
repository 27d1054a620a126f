// Constellation Emulation Experiment
// Runs one emulation of a LEO constellation against the remote execution host

mod console;

use anyhow::{Context, Result};
use clap::Parser;
use emulation_orchestrator::{
    ConstellationConfig, EmulationOrchestrator, ExternalGeometry, GroundStation,
    PrecomputedGeometry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

/// Environment variable carrying the total satellite count
const SATS_ENV: &str = "STARRYNET_SATS";

/// Read when `STARRYNET_SATS` is unset
const SATS_ENV_FALLBACK: &str = "CONSTELLATION_SATS";

/// ESA Redu (BE) and NASA White Sands (US)
const DEFAULT_GROUND_STATIONS: [(f64, f64); 2] = [(50.002352, 5.148141), (32.500649, -106.608803)];

#[derive(Parser, Debug)]
#[command(
    name = "experiment",
    about = "Run a time-stepped LEO constellation emulation on a remote host",
    after_help = "The total satellite count is read from STARRYNET_SATS (or CONSTELLATION_SATS), e.g.\n  STARRYNET_SATS=200 experiment --config ./config.json"
)]
struct Args {
    /// Constellation configuration (JSON)
    #[arg(short, long, default_value = "./config.json")]
    config: PathBuf,

    /// OSPF hello interval in seconds
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=200))]
    hello_interval: u32,

    /// Ground station as LAT,LON (repeatable, defaults to Redu and White Sands)
    #[arg(
        short = 'g',
        long = "ground-station",
        value_parser = parse_ground_station,
        allow_hyphen_values = true
    )]
    ground_stations: Vec<GroundStation>,

    /// External geometry engine; without it the artifacts must already exist
    #[arg(long)]
    geometry_cmd: Option<PathBuf>,

    /// Extra argument passed to the geometry engine (repeatable)
    #[arg(long = "geometry-arg", requires = "geometry_cmd")]
    geometry_args: Vec<String>,

    /// Open the command console instead of the scripted run
    #[arg(short, long)]
    interactive: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_ground_station(s: &str) -> std::result::Result<GroundStation, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {:?}", s))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("bad latitude {:?}", lat))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("bad longitude {:?}", lon))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("{},{} is not a valid coordinate", lat, lon));
    }
    Ok(GroundStation::new(lat, lon))
}

fn usage() -> String {
    format!(
        "Please specify the number of satellites to simulate as the environment variable {0}\n{0}=200 experiment",
        SATS_ENV
    )
}

/// Raw satellite count, preferring `STARRYNET_SATS`
fn satellite_count_var(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(SATS_ENV).or_else(|| lookup(SATS_ENV_FALLBACK))
}

/// Satellite count from the raw environment value
fn parse_satellite_count(raw: Option<String>) -> std::result::Result<u32, String> {
    let raw = raw.ok_or_else(usage)?;
    raw.trim()
        .parse()
        .map_err(|_| format!("{} is not an integer", raw))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let raw = satellite_count_var(|name| std::env::var(name).ok());
    let sat_count = match parse_satellite_count(raw) {
        Ok(n) => n,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(1);
        }
    };

    let default_filter = if args.verbose {
        "emulation_runner=debug,emulation_orchestrator=debug,orbital_topology=debug"
    } else {
        "emulation_runner=info,emulation_orchestrator=info,orbital_topology=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()))
        .init();

    let start = Instant::now();
    match run_experiment(args, sat_count).await {
        Ok(()) => {
            info!("Experiment took {:.3} seconds", start.elapsed().as_secs_f64());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Experiment failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_experiment(args: Args, sat_count: u32) -> Result<()> {
    let config = ConstellationConfig::load(&args.config)
        .with_context(|| format!("Failed to load {:?}", args.config))?;
    config.validate()?;

    // Orbit count is fixed by the config file, the satellite count per orbit is not
    let sats_per_orbit = sat_count.div_ceil(config.orbit_count);
    let ground_stations = if args.ground_stations.is_empty() {
        DEFAULT_GROUND_STATIONS
            .iter()
            .map(|&(lat, lon)| GroundStation::new(lat, lon))
            .collect()
    } else {
        args.ground_stations
    };
    let config = config
        .with_sats_per_orbit(sats_per_orbit)
        .with_ground_stations(ground_stations)
        .with_hello_interval(args.hello_interval);

    info!("{}", "=".repeat(60));
    info!(
        "Constellation {}: {} orbits x {} satellites, {} ground stations, {} s",
        config.name,
        config.orbit_count,
        config.sats_per_orbit,
        config.ground_station_count(),
        config.duration
    );
    info!("Remote host {}, run directory {:?}", config.remote.host, config.workdir());
    info!("{}", "=".repeat(60));

    let builder = EmulationOrchestrator::builder(config);
    let builder = match args.geometry_cmd {
        Some(program) => builder.geometry(ExternalGeometry::new(program).args(args.geometry_args)),
        None => builder.geometry(PrecomputedGeometry),
    };
    let mut sn = builder.launch().await?;

    if args.interactive {
        return console::run(&mut sn).await;
    }

    sn.create_nodes()?;
    sn.create_links()?;
    sn.run_routing_daemon()?;
    sn.start_emulation().await?;
    sn.stop_emulation().await?;
    Ok(())
}
