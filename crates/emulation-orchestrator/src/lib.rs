//! Emulation Orchestrator Library
//!
//! Drives one constellation emulation run against a remote execution host:
//! connect, provision the run directory, hand geometry to an engine, record
//! simulation events, then ship everything to the remote daemon in a single
//! batch and wait for it to finish.
//!
//! ```no_run
//! # async fn run(config: emulation_orchestrator::ConstellationConfig) -> emulation_orchestrator::Result<()> {
//! use emulation_orchestrator::EmulationOrchestrator;
//!
//! let mut sn = EmulationOrchestrator::builder(config).launch().await?;
//! let neighbors = sn.topology().neighbors(1, 0)?;
//! sn.recorder_mut().record_ping(1, neighbors[0], 5);
//! sn.start_emulation().await?;
//! sn.stop_emulation().await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod backend;
pub mod batch;
pub mod config;
pub mod events;
pub mod geometry;
pub mod orchestrator;
pub mod protocol;
pub mod remote;

pub use backend::{BackendError, ContainerSet, InertBackend, NodeBackend};
pub use batch::EmulationBatch;
pub use config::{AsRange, ConfigError, ConstellationConfig, GroundStation, RemoteConfig};
pub use events::{EventRecord, EventRecorder};
pub use geometry::{ExternalGeometry, GeometryEngine, GeometryError, GeometryRequest, PrecomputedGeometry};
pub use orchestrator::{EmulationOrchestrator, Failure, OrchestratorBuilder, Phase};
pub use protocol::ChannelKind;
pub use remote::{RemoteError, RemoteSession};

pub use orbital_topology::{NodeId, TimeStep, TopologyError};

/// Why a worker task did not complete its phase
#[derive(Error, Debug)]
pub enum WorkerFailure {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot encode batch: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Worker task aborted: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum EmulationError {
    #[error("Remote connect failure on {channel} channel: {reason}")]
    RemoteConnect { channel: ChannelKind, reason: String },
    #[error("Remote error: {0}")]
    Remote(RemoteError),
    #[error("{operation} worker failed: {source}")]
    Worker {
        operation: &'static str,
        #[source]
        source: WorkerFailure,
    },
    #[error("Cannot {operation} while {phase:?}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },
    #[error("Remote session is no longer available")]
    SessionUnavailable,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl From<RemoteError> for EmulationError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Connect { channel, reason } => {
                EmulationError::RemoteConnect { channel, reason }
            }
            other => EmulationError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EmulationError>;
