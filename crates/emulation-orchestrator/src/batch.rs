//! One-shot emulation batch handed to the remote daemon

use crate::backend::ContainerSet;
use crate::config::{AsRange, ConstellationConfig};
use crate::events::EventRecorder;
use chrono::{DateTime, Utc};
use orbital_topology::TimeStep;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BATCH_FILE: &str = "emulation_batch.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkParameters {
    pub sat_bandwidth_gbps: f64,
    pub sat_loss_pct: f64,
    pub sat_ground_bandwidth_gbps: f64,
    pub sat_ground_loss_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingParameters {
    pub intra: String,
    pub inter: String,
    pub hello_interval: u32,
    pub autonomous_systems: Vec<AsRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulationBatch {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub constellation: String,
    pub constellation_size: usize,
    pub node_size: usize,
    pub duration: TimeStep,
    pub update_interval: u32,
    pub links: LinkParameters,
    pub routing: RoutingParameters,
    pub containers: ContainerSet,
    pub events: EventRecorder,
}

impl EmulationBatch {
    pub fn new(
        config: &ConstellationConfig,
        events: &EventRecorder,
        containers: &ContainerSet,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            constellation: config.name.clone(),
            constellation_size: config.constellation_size(),
            node_size: config.node_size(),
            duration: config.duration,
            update_interval: config.update_interval,
            links: LinkParameters {
                sat_bandwidth_gbps: config.sat_bandwidth_gbps,
                sat_loss_pct: config.sat_loss_pct,
                sat_ground_bandwidth_gbps: config.sat_ground_bandwidth_gbps,
                sat_ground_loss_pct: config.sat_ground_loss_pct,
            },
            routing: RoutingParameters {
                intra: config.intra_routing.clone(),
                inter: config.inter_routing.clone(),
                hello_interval: config.hello_interval,
                autonomous_systems: config.autonomous_systems(),
            },
            containers: containers.clone(),
            events: events.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;

    #[test]
    fn test_batch_snapshot() {
        let config = sample();
        let mut events = EventRecorder::new();
        events.record_ping(3, 7, 12);
        events.record_ping(5, 9, 13);

        let batch = EmulationBatch::new(&config, &events, &ContainerSet::new());
        assert_eq!(batch.constellation_size, 4);
        assert_eq!(batch.node_size, 5);
        assert_eq!(batch.links.sat_ground_loss_pct, 1.0);
        assert_eq!(batch.routing.autonomous_systems, vec![AsRange(1, 5)]);

        let decoded: EmulationBatch = serde_json::from_slice(&batch.to_json().unwrap()).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.events.pings()[1].src, 5);
    }

    #[test]
    fn test_run_ids_are_unique() {
        let config = sample();
        let events = EventRecorder::new();
        let a = EmulationBatch::new(&config, &events, &ContainerSet::new());
        let b = EmulationBatch::new(&config, &events, &ContainerSet::new());
        assert_ne!(a.run_id, b.run_id);
    }
}
