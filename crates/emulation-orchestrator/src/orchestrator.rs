//! Emulation lifecycle state machine
//!
//! ```text
//! Uninitialized -> RemoteConnected -> DirectoryProvisioned -> GeometryReady
//!   -> (NodesCreated -> LinksCreated -> RoutingStarted)* -> Emulating -> Stopped
//! ```
//!
//! Provisioning and emulation start each run on one spawned worker task
//! that the caller joins immediately. The worker takes the remote session
//! with it and hands it back on completion, so the session is never
//! reachable from two places. A worker error or panic moves the machine to
//! `Failed`; the failure stays inspectable until the orchestrator is
//! dropped.

use crate::backend::{ContainerSet, InertBackend, NodeBackend};
use crate::batch::{EmulationBatch, BATCH_FILE};
use crate::config::ConstellationConfig;
use crate::events::EventRecorder;
use crate::geometry::{verify_artifacts, GeometryEngine, GeometryRequest, PrecomputedGeometry};
use crate::remote::RemoteSession;
use crate::{EmulationError, Result, WorkerFailure};
use orbital_topology::{ArtifactLayout, TopologyStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::task::JoinError;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Uninitialized,
    RemoteConnected,
    DirectoryProvisioned,
    GeometryReady,
    NodesCreated,
    LinksCreated,
    RoutingStarted,
    Emulating,
    Stopped,
    Failed,
}

impl Phase {
    /// Phases from which node-backend steps and emulation start may run
    fn is_prepared(self) -> bool {
        matches!(
            self,
            Phase::GeometryReady | Phase::NodesCreated | Phase::LinksCreated | Phase::RoutingStarted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub operation: &'static str,
    pub phase: Phase,
    pub reason: String,
}

pub struct OrchestratorBuilder {
    config: ConstellationConfig,
    geometry: Box<dyn GeometryEngine>,
    backend: Box<dyn NodeBackend>,
}

impl OrchestratorBuilder {
    pub fn geometry(mut self, engine: impl GeometryEngine + 'static) -> Self {
        self.geometry = Box::new(engine);
        self
    }

    pub fn backend(mut self, backend: impl NodeBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    /// Validate the config and open the remote session
    pub async fn connect(self) -> Result<EmulationOrchestrator> {
        self.config.validate()?;
        let session = RemoteSession::connect(&self.config.remote).await?;
        let layout = self.config.layout();
        let topology = TopologyStore::new(
            layout,
            self.config.constellation_size(),
            self.config.node_size(),
        );
        info!(
            "Orchestrator ready for {} ({} satellites, {} nodes, {} steps)",
            self.config.name,
            self.config.constellation_size(),
            self.config.node_size(),
            self.config.duration
        );
        Ok(EmulationOrchestrator {
            config: self.config,
            topology,
            session: Some(session),
            recorder: EventRecorder::new(),
            containers: ContainerSet::new(),
            geometry: self.geometry,
            backend: self.backend,
            phase: Phase::RemoteConnected,
            failure: None,
        })
    }

    /// Connect, provision the run directory and prepare geometry
    pub async fn launch(self) -> Result<EmulationOrchestrator> {
        let mut orchestrator = self.connect().await?;
        orchestrator.provision().await?;
        orchestrator.prepare_geometry()?;
        Ok(orchestrator)
    }
}

pub struct EmulationOrchestrator {
    config: ConstellationConfig,
    topology: TopologyStore,
    session: Option<RemoteSession>,
    recorder: EventRecorder,
    containers: ContainerSet,
    geometry: Box<dyn GeometryEngine>,
    backend: Box<dyn NodeBackend>,
    phase: Phase,
    failure: Option<Failure>,
}

impl EmulationOrchestrator {
    pub fn builder(config: ConstellationConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            geometry: Box::new(PrecomputedGeometry),
            backend: Box::new(InertBackend),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn config(&self) -> &ConstellationConfig {
        &self.config
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut EventRecorder {
        &mut self.recorder
    }

    pub fn containers(&self) -> &ContainerSet {
        &self.containers
    }

    pub fn workdir(&self) -> &Path {
        self.topology.layout().root()
    }

    /// Clear and create the run directory locally and on the remote host
    pub async fn provision(&mut self) -> Result<()> {
        const OP: &str = "provision";
        self.expect(OP, |p| p == Phase::RemoteConnected)?;
        let mut session = self.take_session()?;
        let layout = self.topology.layout().clone();
        let run_dir = self.config.run_dir_name();

        info!("Provisioning {}", run_dir);
        let joined = tokio::spawn(async move {
            let result = provision_run_dir(&mut session, &layout, &run_dir).await;
            (session, result)
        })
        .await;
        self.join_worker(OP, joined)?;

        self.advance(Phase::DirectoryProvisioned);
        Ok(())
    }

    /// Have the geometry engine produce every step's artifacts
    pub fn prepare_geometry(&mut self) -> Result<()> {
        const OP: &str = "prepare_geometry";
        self.expect(OP, |p| p == Phase::DirectoryProvisioned)?;

        let request = GeometryRequest::new(&self.config);
        let computed = self
            .geometry
            .compute(&request)
            .and_then(|()| verify_artifacts(self.topology.layout(), self.config.duration));
        if let Err(e) = computed {
            return Err(self.fail(OP, e.into()));
        }

        self.advance(Phase::GeometryReady);
        Ok(())
    }

    pub fn create_nodes(&mut self) -> Result<()> {
        const OP: &str = "create_nodes";
        self.expect(OP, Phase::is_prepared)?;
        if let Err(e) = self.backend.create_nodes(&mut self.containers) {
            return Err(self.fail(OP, e.into()));
        }
        self.advance(Phase::NodesCreated);
        Ok(())
    }

    pub fn create_links(&mut self) -> Result<()> {
        const OP: &str = "create_links";
        self.expect(OP, Phase::is_prepared)?;
        if let Err(e) = self.backend.create_links(&self.containers) {
            return Err(self.fail(OP, e.into()));
        }
        self.advance(Phase::LinksCreated);
        Ok(())
    }

    pub fn run_routing_daemon(&mut self) -> Result<()> {
        const OP: &str = "run_routing_daemon";
        self.expect(OP, Phase::is_prepared)?;
        if let Err(e) = self.backend.run_routing_daemon(&self.containers) {
            return Err(self.fail(OP, e.into()));
        }
        self.advance(Phase::RoutingStarted);
        Ok(())
    }

    /// Ship the batch to the remote daemon and block until the run finishes
    pub async fn start_emulation(&mut self) -> Result<()> {
        const OP: &str = "start_emulation";
        self.expect(OP, Phase::is_prepared)?;
        let mut session = self.take_session()?;
        let batch = EmulationBatch::new(&self.config, &self.recorder, &self.containers);
        let local_copy = self.topology.layout().mid_files_dir().join(BATCH_FILE);
        let remote_path = format!("{}/{}", self.config.run_dir_name(), BATCH_FILE);

        self.advance(Phase::Emulating);
        let joined = tokio::spawn(async move {
            let result = run_emulation(&mut session, batch, local_copy, remote_path).await;
            (session, result)
        })
        .await;
        self.containers = self.join_worker(OP, joined)?;

        info!("Emulation finished");
        Ok(())
    }

    /// Close the session and release the containers; no-op once stopped
    pub async fn stop_emulation(&mut self) -> Result<()> {
        if self.phase == Phase::Stopped {
            return Ok(());
        }
        self.containers.clear();
        let closed = match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        self.advance(Phase::Stopped);
        if let Err(e) = closed {
            warn!("Session did not close cleanly: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn expect(&self, operation: &'static str, allowed: impl Fn(Phase) -> bool) -> Result<()> {
        if allowed(self.phase) {
            Ok(())
        } else {
            Err(EmulationError::InvalidTransition {
                operation,
                phase: self.phase,
            })
        }
    }

    fn advance(&mut self, phase: Phase) {
        info!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, operation: &'static str, err: EmulationError) -> EmulationError {
        error!("{} failed in {:?}: {}", operation, self.phase, err);
        self.failure = Some(Failure {
            operation,
            phase: self.phase,
            reason: err.to_string(),
        });
        self.phase = Phase::Failed;
        err
    }

    fn take_session(&mut self) -> Result<RemoteSession> {
        self.session.take().ok_or(EmulationError::SessionUnavailable)
    }

    /// Put the session back and surface the worker's outcome
    fn join_worker<T>(
        &mut self,
        operation: &'static str,
        joined: std::result::Result<
            (RemoteSession, std::result::Result<T, WorkerFailure>),
            JoinError,
        >,
    ) -> Result<T> {
        let failure = match joined {
            Ok((session, Ok(value))) => {
                self.session = Some(session);
                return Ok(value);
            }
            Ok((session, Err(e))) => {
                self.session = Some(session);
                e
            }
            Err(e) => WorkerFailure::Panicked(e.to_string()),
        };
        Err(self.fail(
            operation,
            EmulationError::Worker {
                operation,
                source: failure,
            },
        ))
    }
}

async fn provision_run_dir(
    session: &mut RemoteSession,
    layout: &ArtifactLayout,
    run_dir: &str,
) -> std::result::Result<(), WorkerFailure> {
    let cleared = clear_text_files(layout.root()).await?;
    for dir in [layout.delay_dir(), layout.position_dir(), layout.mid_files_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    if cleared > 0 {
        info!("Removed {} stale text files from {:?}", cleared, layout.root());
    }

    let quoted = shell_quote(run_dir);
    session
        .exec(&format!("mkdir -p {0} {0}/delay", quoted))
        .await?;
    session.exec(&format!("rm -f {}/*.txt", quoted)).await?;
    Ok(())
}

/// Single-quote `word` for a POSIX shell
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Remove top-level `*.txt` files, returning how many were removed
async fn clear_text_files(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_text = path.extension().is_some_and(|ext| ext == "txt");
        if is_text && entry.file_type().await?.is_file() {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

async fn run_emulation(
    session: &mut RemoteSession,
    mut batch: EmulationBatch,
    local_copy: PathBuf,
    remote_path: String,
) -> std::result::Result<ContainerSet, WorkerFailure> {
    if batch.containers.is_empty() {
        let ids = session.list_containers().await?;
        info!("Remote host reports {} containers", ids.len());
        batch.containers = ContainerSet::from(ids);
    }

    let payload = batch.to_json()?;
    tokio::fs::write(&local_copy, &payload).await?;
    session.put(&remote_path, &payload).await?;
    info!(
        "Uploaded batch {} ({} events, {} bytes)",
        batch.run_id,
        batch.events.len(),
        payload.len()
    );

    session.run_emulation(&remote_path).await?;
    Ok(batch.containers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepared_phases() {
        assert!(Phase::GeometryReady.is_prepared());
        assert!(Phase::RoutingStarted.is_prepared());
        assert!(!Phase::DirectoryProvisioned.is_prepared());
        assert!(!Phase::Emulating.is_prepared());
        assert!(!Phase::Failed.is_prepared());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("sim-data-a"), "'sim-data-a'");
        assert_eq!(shell_quote("my run"), "'my run'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("$(rm -rf x)"), "'$(rm -rf x)'");
    }

    #[tokio::test]
    async fn test_clear_text_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("keep.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("position")).unwrap();
        std::fs::write(dir.path().join("position/0.txt"), "1,2,3").unwrap();

        assert_eq!(clear_text_files(dir.path()).await.unwrap(), 2);
        assert!(!dir.path().join("a.txt").exists());
        assert!(dir.path().join("keep.json").exists());
        assert!(dir.path().join("position/0.txt").exists());

        let missing = dir.path().join("not-there");
        assert_eq!(clear_text_files(&missing).await.unwrap(), 0);
    }
}
