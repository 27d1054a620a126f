//! Constellation run configuration
//!
//! Deserialised from the experiment's JSON file. Keys keep the names the
//! experiment files already use (`"Altitude (km)"`, `"# of orbit"`, ...);
//! unknown keys are ignored. Fields that are not part of the file (ground
//! stations, hello interval, AS partition, base directory) are set at
//! runtime through the `with_*` overrides.

use orbital_topology::{ArtifactLayout, NodeId, TimeStep};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_COMMAND_PORT: u16 = 18650;
pub const DEFAULT_TRANSFER_PORT: u16 = 18651;
pub const DEFAULT_CONNECT_TIMEOUT_S: u64 = 10;
pub const DEFAULT_HELLO_INTERVAL: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("AS partition invalid: {0}")]
    AsPartition(String),
}

/// Static ground station, supplied at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundStation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GroundStation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Inclusive node-id range `[start, end]` of one autonomous system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsRange(pub NodeId, pub NodeId);

/// Remote execution host and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(rename = "remote_machine_IP")]
    pub host: String,
    #[serde(rename = "remote_machine_username")]
    pub username: String,
    #[serde(rename = "remote_machine_password")]
    pub password: String,
    #[serde(rename = "remote_command_port", default = "default_command_port")]
    pub command_port: u16,
    #[serde(rename = "remote_transfer_port", default = "default_transfer_port")]
    pub transfer_port: u16,
    #[serde(
        rename = "remote_connect_timeout_s",
        default = "default_connect_timeout"
    )]
    pub connect_timeout_s: u64,
}

fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}

fn default_transfer_port() -> u16 {
    DEFAULT_TRANSFER_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_S
}

fn default_hello_interval() -> u32 {
    DEFAULT_HELLO_INTERVAL
}

fn default_antenna_number() -> u32 {
    1
}

fn default_ip_version() -> String {
    "IPv4".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstellationConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Altitude (km)")]
    pub altitude_km: u32,
    #[serde(rename = "Cycle (s)", default)]
    pub cycle_s: u32,
    #[serde(rename = "Inclination")]
    pub inclination: f64,
    #[serde(rename = "Phase shift", default)]
    pub phase_shift: u32,
    #[serde(rename = "# of orbit")]
    pub orbit_count: u32,
    #[serde(rename = "# of satellites")]
    pub sats_per_orbit: u32,
    #[serde(rename = "Satellite link")]
    pub link_style: String,
    #[serde(rename = "Duration (s)")]
    pub duration: TimeStep,
    #[serde(rename = "IP version", default = "default_ip_version")]
    pub ip_version: String,
    #[serde(rename = "Intra-AS routing")]
    pub intra_routing: String,
    #[serde(rename = "Inter-AS routing")]
    pub inter_routing: String,
    #[serde(rename = "Link policy")]
    pub link_policy: String,
    #[serde(rename = "Handover policy", default)]
    pub handover_policy: String,
    #[serde(rename = "update_time (s)")]
    pub update_interval: u32,
    #[serde(rename = "satellite link bandwidth (\"X\" Gbps)")]
    pub sat_bandwidth_gbps: f64,
    #[serde(rename = "sat-ground bandwidth (\"X\" Gbps)")]
    pub sat_ground_bandwidth_gbps: f64,
    #[serde(rename = "satellite link loss (\"X\"% )")]
    pub sat_loss_pct: f64,
    #[serde(rename = "sat-ground loss (\"X\"% )")]
    pub sat_ground_loss_pct: f64,
    #[serde(rename = "multi-machine (\"0\" for no, \"1\" for yes)", default)]
    pub multi_machine: u8,
    #[serde(rename = "antenna number", default = "default_antenna_number")]
    pub antenna_number: u32,
    #[serde(rename = "antenna_inclination_angle", default)]
    pub antenna_inclination: f64,
    #[serde(flatten)]
    pub remote: RemoteConfig,

    #[serde(skip)]
    pub ground_stations: Vec<GroundStation>,
    #[serde(skip, default = "default_hello_interval")]
    pub hello_interval: u32,
    #[serde(skip)]
    autonomous_systems: Option<Vec<AsRange>>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ConstellationConfig {
    /// Load from a JSON file; the run directory is resolved next to it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let read_err = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };
        let text = std::fs::read_to_string(path).map_err(read_err)?;
        let config: Self = serde_json::from_str(&text)?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let base_dir = parent.canonicalize().map_err(read_err)?;
        Ok(config.with_base_dir(base_dir))
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_sats_per_orbit(mut self, sats_per_orbit: u32) -> Self {
        self.sats_per_orbit = sats_per_orbit;
        self
    }

    pub fn with_duration(mut self, duration: TimeStep) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_ground_stations(mut self, ground_stations: Vec<GroundStation>) -> Self {
        self.ground_stations = ground_stations;
        self
    }

    pub fn with_hello_interval(mut self, hello_interval: u32) -> Self {
        self.hello_interval = hello_interval;
        self
    }

    pub fn with_autonomous_systems(mut self, ranges: Vec<AsRange>) -> Self {
        self.autonomous_systems = Some(ranges);
        self
    }

    pub fn constellation_size(&self) -> usize {
        self.orbit_count as usize * self.sats_per_orbit as usize
    }

    pub fn ground_station_count(&self) -> usize {
        self.ground_stations.len()
    }

    pub fn node_size(&self) -> usize {
        self.constellation_size() + self.ground_station_count()
    }

    /// AS partition, one AS spanning every node unless overridden
    pub fn autonomous_systems(&self) -> Vec<AsRange> {
        match &self.autonomous_systems {
            Some(ranges) => ranges.clone(),
            None => vec![AsRange(1, self.node_size())],
        }
    }

    pub fn run_dir_name(&self) -> String {
        format!(
            "sim-data-{}-{}-{}-{}-{}-{}-{}",
            self.name,
            self.orbit_count,
            self.sats_per_orbit,
            self.altitude_km,
            self.inclination,
            self.link_style,
            self.link_policy
        )
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn workdir(&self) -> PathBuf {
        self.base_dir.join(self.run_dir_name())
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.workdir())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("# of orbit", self.orbit_count),
            ("# of satellites", self.sats_per_orbit),
            ("Duration (s)", self.duration),
            ("update_time (s)", self.update_interval),
        ];
        if let Some((field, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*field));
        }
        self.validate_partition()
    }

    fn validate_partition(&self) -> Result<(), ConfigError> {
        let ranges = self.autonomous_systems();
        let node_size = self.node_size();
        let mut next = 1;
        for AsRange(start, end) in &ranges {
            if *start != next {
                return Err(ConfigError::AsPartition(format!(
                    "range [{}, {}] should start at {}",
                    start, end, next
                )));
            }
            if end < start {
                return Err(ConfigError::AsPartition(format!(
                    "range [{}, {}] is reversed",
                    start, end
                )));
            }
            if *end > node_size {
                return Err(ConfigError::AsPartition(format!(
                    "range [{}, {}] exceeds node {}",
                    start, end, node_size
                )));
            }
            next = end + 1;
        }
        if next != node_size + 1 {
            return Err(ConfigError::AsPartition(format!(
                "ranges cover [1, {}], expected [1, {}]",
                next - 1,
                node_size
            )));
        }
        Ok(())
    }
}
