//! Time-indexed simulation events collected before the emulation starts
//!
//! One ordered sequence per event kind. The remote daemon replays each kind
//! on its own timeline keyed by `time`, so only the order within a kind is
//! preserved; nothing records how kinds interleave. Times are not checked
//! against the run duration.

use orbital_topology::{NodeId, TimeStep};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingEvent {
    pub src: NodeId,
    pub dst: NodeId,
    pub time: TimeStep,
}

/// Throughput probe between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfEvent {
    pub src: NodeId,
    pub dst: NodeId,
    pub time: TimeStep,
}

/// Static next-hop override installed on `sat` for `dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHopEvent {
    pub sat: NodeId,
    pub dest: NodeId,
    pub next_hop: NodeId,
    pub time: TimeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCheckEvent {
    pub sat: NodeId,
    pub time: TimeStep,
}

/// Random link damage affecting `ratio` of the satellites
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub ratio: f64,
    pub time: TimeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub time: TimeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityCheckEvent {
    pub time: TimeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRecord {
    Ping(PingEvent),
    Perf(PerfEvent),
    NextHop(NextHopEvent),
    RouteCheck(RouteCheckEvent),
    Damage(DamageEvent),
    Recovery(RecoveryEvent),
    UtilityCheck(UtilityCheckEvent),
}

impl EventRecord {
    pub fn time(&self) -> TimeStep {
        match self {
            EventRecord::Ping(e) => e.time,
            EventRecord::Perf(e) => e.time,
            EventRecord::NextHop(e) => e.time,
            EventRecord::RouteCheck(e) => e.time,
            EventRecord::Damage(e) => e.time,
            EventRecord::Recovery(e) => e.time,
            EventRecord::UtilityCheck(e) => e.time,
        }
    }
}

/// Append-only event accumulator
///
/// Serialises as one array per kind, which is the shape the emulation
/// batch hands to the remote daemon. Single writer; wrap it yourself if it
/// has to be shared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecorder {
    pings: Vec<PingEvent>,
    perfs: Vec<PerfEvent>,
    next_hops: Vec<NextHopEvent>,
    route_checks: Vec<RouteCheckEvent>,
    damages: Vec<DamageEvent>,
    recoveries: Vec<RecoveryEvent>,
    utility_checks: Vec<UtilityCheckEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: EventRecord) {
        match event {
            EventRecord::Ping(e) => self.pings.push(e),
            EventRecord::Perf(e) => self.perfs.push(e),
            EventRecord::NextHop(e) => self.next_hops.push(e),
            EventRecord::RouteCheck(e) => self.route_checks.push(e),
            EventRecord::Damage(e) => self.damages.push(e),
            EventRecord::Recovery(e) => self.recoveries.push(e),
            EventRecord::UtilityCheck(e) => self.utility_checks.push(e),
        }
    }

    pub fn record_ping(&mut self, src: NodeId, dst: NodeId, time: TimeStep) {
        self.pings.push(PingEvent { src, dst, time });
    }

    pub fn record_perf(&mut self, src: NodeId, dst: NodeId, time: TimeStep) {
        self.perfs.push(PerfEvent { src, dst, time });
    }

    pub fn record_next_hop(&mut self, sat: NodeId, dest: NodeId, next_hop: NodeId, time: TimeStep) {
        self.next_hops.push(NextHopEvent {
            sat,
            dest,
            next_hop,
            time,
        });
    }

    pub fn record_route_check(&mut self, sat: NodeId, time: TimeStep) {
        self.route_checks.push(RouteCheckEvent { sat, time });
    }

    pub fn record_damage(&mut self, ratio: f64, time: TimeStep) {
        self.damages.push(DamageEvent { ratio, time });
    }

    pub fn record_recovery(&mut self, time: TimeStep) {
        self.recoveries.push(RecoveryEvent { time });
    }

    pub fn record_utility_check(&mut self, time: TimeStep) {
        self.utility_checks.push(UtilityCheckEvent { time });
    }

    pub fn pings(&self) -> &[PingEvent] {
        &self.pings
    }

    pub fn perfs(&self) -> &[PerfEvent] {
        &self.perfs
    }

    pub fn next_hops(&self) -> &[NextHopEvent] {
        &self.next_hops
    }

    pub fn route_checks(&self) -> &[RouteCheckEvent] {
        &self.route_checks
    }

    pub fn damages(&self) -> &[DamageEvent] {
        &self.damages
    }

    pub fn recoveries(&self) -> &[RecoveryEvent] {
        &self.recoveries
    }

    pub fn utility_checks(&self) -> &[UtilityCheckEvent] {
        &self.utility_checks
    }

    /// Total number of recorded events across all kinds
    pub fn len(&self) -> usize {
        self.pings.len()
            + self.perfs.len()
            + self.next_hops.len()
            + self.route_checks.len()
            + self.damages.len()
            + self.recoveries.len()
            + self.utility_checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_order_preserved_across_kinds() {
        let mut recorder = EventRecorder::new();
        recorder.record_ping(3, 7, 12);
        recorder.record_damage(0.1, 5);
        recorder.record_perf(1, 2, 0);
        recorder.record_ping(5, 9, 13);
        recorder.record_recovery(8);

        let pings: Vec<_> = recorder
            .pings()
            .iter()
            .map(|p| (p.src, p.dst, p.time))
            .collect();
        assert_eq!(pings, vec![(3, 7, 12), (5, 9, 13)]);
        assert_eq!(recorder.len(), 5);
    }

    #[test]
    fn test_record_dispatch() {
        let mut recorder = EventRecorder::new();
        let events = [
            EventRecord::NextHop(NextHopEvent {
                sat: 1,
                dest: 4,
                next_hop: 2,
                time: 3,
            }),
            EventRecord::RouteCheck(RouteCheckEvent { sat: 1, time: 4 }),
            EventRecord::UtilityCheck(UtilityCheckEvent { time: 2 }),
            EventRecord::UtilityCheck(UtilityCheckEvent { time: 1 }),
        ];
        for event in events {
            recorder.record(event);
        }
        assert_eq!(recorder.next_hops()[0].next_hop, 2);
        assert_eq!(recorder.route_checks().len(), 1);
        let times: Vec<_> = recorder.utility_checks().iter().map(|u| u.time).collect();
        assert_eq!(times, vec![2, 1]);
        assert_eq!(events[1].time(), 4);
    }

    #[test]
    fn test_empty_recorder() {
        let recorder = EventRecorder::new();
        assert!(recorder.is_empty());
        assert!(recorder.pings().is_empty());
    }

    #[test]
    fn test_serialises_one_array_per_kind() {
        let mut recorder = EventRecorder::new();
        recorder.record_next_hop(2, 9, 3, 1);
        recorder.record_damage(0.25, 4);

        let value = serde_json::to_value(&recorder).unwrap();
        assert_eq!(value["next_hops"][0]["next_hop"], 3);
        assert_eq!(value["damages"][0]["ratio"], 0.25);
        assert_eq!(value["pings"].as_array().unwrap().len(), 0);

        let tagged = serde_json::to_value(EventRecord::Recovery(RecoveryEvent { time: 7 })).unwrap();
        assert_eq!(tagged["kind"], "recovery");
        assert_eq!(tagged["time"], 7);
    }
}
