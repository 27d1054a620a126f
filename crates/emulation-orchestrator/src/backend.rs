//! Node backend capability interface
//!
//! Creating containers, wiring links and launching routing daemons belong
//! to a container runtime on the remote host. The orchestrator only calls
//! through [`NodeBackend`]; [`InertBackend`] leaves every step as a no-op
//! so a run can go straight from geometry to emulation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{operation} failed: {reason}")]
pub struct BackendError {
    pub operation: &'static str,
    pub reason: String,
}

impl BackendError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// Remote container identifiers, one per node in node order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerSet(Vec<String>);

impl ContainerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>) {
        self.0.push(id.into());
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    /// Container of 1-indexed node `node`
    pub fn get(&self, node: usize) -> Option<&str> {
        node.checked_sub(1)
            .and_then(|i| self.0.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl From<Vec<String>> for ContainerSet {
    fn from(ids: Vec<String>) -> Self {
        Self(ids)
    }
}

pub trait NodeBackend: Send {
    fn create_nodes(&mut self, containers: &mut ContainerSet) -> Result<(), BackendError> {
        let _ = containers;
        Ok(())
    }

    fn create_links(&mut self, containers: &ContainerSet) -> Result<(), BackendError> {
        let _ = containers;
        Ok(())
    }

    fn run_routing_daemon(&mut self, containers: &ContainerSet) -> Result<(), BackendError> {
        let _ = containers;
        Ok(())
    }
}

/// Deliberately does nothing; containers are left to the remote daemon
#[derive(Debug, Clone, Copy, Default)]
pub struct InertBackend;

impl NodeBackend for InertBackend {}
