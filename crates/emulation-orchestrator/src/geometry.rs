//! Geometry engine seam
//!
//! The engine writes `delay/<t>.npy` and `position/<t>.txt` for every step
//! of the run. Whatever the engine reports, the orchestrator only advances
//! once every artifact exists.

use crate::config::{AsRange, ConstellationConfig, GroundStation};
use orbital_topology::{ArtifactLayout, TimeStep};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

pub const REQUEST_FILE: &str = "geometry_request.json";

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot encode geometry request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Geometry engine {program} failed: {status}")]
    EngineFailed { program: String, status: String },
    #[error("{count} artifacts missing after geometry step, first {}", first.display())]
    MissingArtifacts { count: usize, first: PathBuf },
    #[error("Geometry engine error: {0}")]
    Engine(String),
}

/// Everything an engine needs to produce one run's artifacts
#[derive(Debug, Clone, Serialize)]
pub struct GeometryRequest {
    pub name: String,
    pub altitude_km: u32,
    pub inclination: f64,
    pub orbit_count: u32,
    pub sats_per_orbit: u32,
    pub phase_shift: u32,
    pub duration: TimeStep,
    pub link_style: String,
    pub link_policy: String,
    pub intra_routing: String,
    pub hello_interval: u32,
    pub antenna_number: u32,
    pub antenna_inclination: f64,
    pub ground_stations: Vec<GroundStation>,
    pub autonomous_systems: Vec<AsRange>,
    pub workdir: PathBuf,
}

impl GeometryRequest {
    pub fn new(config: &ConstellationConfig) -> Self {
        Self {
            name: config.name.clone(),
            altitude_km: config.altitude_km,
            inclination: config.inclination,
            orbit_count: config.orbit_count,
            sats_per_orbit: config.sats_per_orbit,
            phase_shift: config.phase_shift,
            duration: config.duration,
            link_style: config.link_style.clone(),
            link_policy: config.link_policy.clone(),
            intra_routing: config.intra_routing.clone(),
            hello_interval: config.hello_interval,
            antenna_number: config.antenna_number,
            antenna_inclination: config.antenna_inclination,
            ground_stations: config.ground_stations.clone(),
            autonomous_systems: config.autonomous_systems(),
            workdir: config.workdir(),
        }
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.workdir)
    }

    /// Write the request as JSON under `mid_files/`, returning its path
    pub fn write_to(&self, layout: &ArtifactLayout) -> Result<PathBuf, GeometryError> {
        let dir = layout.mid_files_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(REQUEST_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

pub trait GeometryEngine: Send {
    fn compute(&mut self, request: &GeometryRequest) -> Result<(), GeometryError>;
}

/// Artifacts were produced out of band; nothing to compute
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedGeometry;

impl GeometryEngine for PrecomputedGeometry {
    fn compute(&mut self, request: &GeometryRequest) -> Result<(), GeometryError> {
        info!("Using precomputed geometry in {:?}", request.workdir);
        Ok(())
    }
}

/// Runs an external program with the request file as its last argument
#[derive(Debug, Clone)]
pub struct ExternalGeometry {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalGeometry {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl GeometryEngine for ExternalGeometry {
    fn compute(&mut self, request: &GeometryRequest) -> Result<(), GeometryError> {
        let request_path = request.write_to(&request.layout())?;
        info!("Running geometry engine {:?}", self.program);
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&request_path)
            .status()?;
        if !status.success() {
            return Err(GeometryError::EngineFailed {
                program: self.program.display().to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Engine backed by a closure, mostly for in-process generators
pub struct FnGeometry<F>(F);

pub fn from_fn<F>(f: F) -> FnGeometry<F>
where
    F: FnMut(&GeometryRequest) -> Result<(), GeometryError> + Send,
{
    FnGeometry(f)
}

impl<F> GeometryEngine for FnGeometry<F>
where
    F: FnMut(&GeometryRequest) -> Result<(), GeometryError> + Send,
{
    fn compute(&mut self, request: &GeometryRequest) -> Result<(), GeometryError> {
        (self.0)(request)
    }
}

/// Fail unless every artifact for `[0, duration)` is on disk
pub fn verify_artifacts(layout: &ArtifactLayout, duration: TimeStep) -> Result<(), GeometryError> {
    let missing = layout.missing_artifacts(duration);
    match missing.first() {
        None => Ok(()),
        Some(first) => Err(GeometryError::MissingArtifacts {
            count: missing.len(),
            first: first.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;

    #[test]
    fn test_request_carries_run_parameters() {
        let config = sample().with_base_dir("/runs").with_hello_interval(5);
        let request = GeometryRequest::new(&config);
        assert_eq!(request.sats_per_orbit, 2);
        assert_eq!(request.hello_interval, 5);
        assert_eq!(request.ground_stations.len(), 1);
        assert_eq!(request.autonomous_systems, vec![AsRange(1, 5)]);
        assert_eq!(request.layout(), config.layout());
    }

    #[test]
    fn test_write_request_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample().with_base_dir(dir.path());
        let request = GeometryRequest::new(&config);
        let path = request.write_to(&config.layout()).unwrap();
        assert!(path.ends_with("mid_files/geometry_request.json"));

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["name"], "Starlink");
        assert_eq!(written["autonomous_systems"][0][1], 5);
    }

    #[test]
    fn test_verify_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let err = verify_artifacts(&layout, 2).unwrap_err();
        assert!(matches!(err, GeometryError::MissingArtifacts { count: 4, .. }));
        assert!(verify_artifacts(&layout, 0).is_ok());
    }

    #[test]
    fn test_closure_engine() {
        let mut calls = 0;
        {
            let mut engine = from_fn(|request: &GeometryRequest| {
                calls += 1;
                if request.duration == 0 {
                    return Err(GeometryError::Engine("empty run".into()));
                }
                Ok(())
            });
            let request = GeometryRequest::new(&sample());
            engine.compute(&request).unwrap();
            let empty = GeometryRequest::new(&sample().with_duration(0));
            assert!(engine.compute(&empty).is_err());
        }
        assert_eq!(calls, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_engine_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample().with_base_dir(dir.path());
        let request = GeometryRequest::new(&config);

        let mut ok = ExternalGeometry::new("true");
        ok.compute(&request).unwrap();
        assert!(config.layout().mid_files_dir().join(REQUEST_FILE).is_file());

        let mut failing = ExternalGeometry::new("false");
        assert!(matches!(
            failing.compute(&request),
            Err(GeometryError::EngineFailed { .. })
        ));
    }
}
