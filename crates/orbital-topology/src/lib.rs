//! Orbital Topology Library
//!
//! Read-only access to the per-time-step artifacts a geometry engine writes
//! for one emulation run: the `delay/<t>.npy` adjacency matrices and the
//! `position/<t>.txt` satellite position snapshots.
//!
//! Node identifiers are 1-indexed at this boundary. Satellites occupy
//! `[1, constellation_size]`, ground stations follow up to `node_size`.

use std::path::PathBuf;
use thiserror::Error;

pub mod layout;
pub mod npy;
pub mod positions;
pub mod store;

pub use layout::ArtifactLayout;
pub use npy::{DelayMatrix, NpyError};
pub use positions::{GeodeticPosition, PositionSeries, Positions};
pub use store::TopologyStore;

/// 1-indexed node identifier (satellites first, then ground stations)
pub type NodeId = usize;

/// Discrete 1-second emulation step in `[0, duration)`
pub type TimeStep = u32;

/// Delays at or below this value (seconds) mean "no link"
pub const LINK_THRESHOLD_S: f64 = 0.01;

/// Delay-to-distance factor baked into the emulator's delay encoding (km per second of delay)
pub const DELAY_TO_KM: f64 = 17.31 / 29.5 * 299_792.458;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Artifact not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("Node index {index} outside [1, {max}]")]
    IndexOutOfRange { index: NodeId, max: usize },
    #[error("Malformed delay matrix {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: NpyError,
    },
    #[error("Delay matrix {} is {rows}x{cols}, expected {expected}x{expected}", path.display())]
    ShapeMismatch {
        path: PathBuf,
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Map a read failure to `NotFound` when the artifact simply is not there
pub(crate) fn read_error(path: &std::path::Path, err: std::io::Error) -> TopologyError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TopologyError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        TopologyError::Io(err)
    }
}

/// Convert a link delay (seconds) to the emulator's distance (km)
pub fn delay_to_distance_km(delay_s: f64) -> f64 {
    delay_s * DELAY_TO_KM
}
