//! Topology queries keyed by `(node, time step)`
//!
//! Every query is a fresh read of the run's artifacts; nothing is cached.
//! Reads are side-effect free, so a store can be shared between threads.
//!
//! Link direction: `neighbors` and `ground_stations` test the delay from
//! each candidate row to the queried column, `matrix[i][a]`. The matrices
//! are expected to be symmetric but this is not checked here.

use crate::{
    delay_to_distance_km, npy, ArtifactLayout, DelayMatrix, NodeId, PositionSeries, Result,
    TimeStep, TopologyError, LINK_THRESHOLD_S,
};
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct TopologyStore {
    layout: ArtifactLayout,
    constellation_size: usize,
    node_size: usize,
}

impl TopologyStore {
    /// `constellation_size` satellites followed by ground stations, `node_size` nodes in total
    pub fn new(layout: ArtifactLayout, constellation_size: usize, node_size: usize) -> Self {
        Self {
            layout,
            constellation_size: constellation_size.min(node_size),
            node_size,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn constellation_size(&self) -> usize {
        self.constellation_size
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// 0-based matrix index for a 1-based node id
    fn matrix_index(&self, id: NodeId) -> Result<usize> {
        if id == 0 || id > self.node_size {
            return Err(TopologyError::IndexOutOfRange {
                index: id,
                max: self.node_size,
            });
        }
        Ok(id - 1)
    }

    /// Full adjacency matrix for step `t`, checked to be `node_size` square
    pub fn delay_matrix(&self, t: TimeStep) -> Result<DelayMatrix> {
        let path = self.layout.delay_path(t);
        let matrix = npy::read_matrix(&path)?;
        if matrix.rows() != self.node_size || matrix.cols() != self.node_size {
            return Err(TopologyError::ShapeMismatch {
                path,
                expected: self.node_size,
                rows: matrix.rows(),
                cols: matrix.cols(),
            });
        }
        Ok(matrix)
    }

    /// Propagation delay (seconds) from node `a` to node `b` at step `t`
    pub fn delay(&self, a: NodeId, b: NodeId, t: TimeStep) -> Result<f64> {
        let row = self.matrix_index(a)?;
        let col = self.matrix_index(b)?;
        let matrix = self.delay_matrix(t)?;
        Ok(matrix[(row, col)])
    }

    /// Link distance (km) between `a` and `b` at step `t`
    pub fn distance(&self, a: NodeId, b: NodeId, t: TimeStep) -> Result<f64> {
        Ok(delay_to_distance_km(self.delay(a, b, t)?))
    }

    /// Satellites linked to node `a` at step `t`, ascending
    pub fn neighbors(&self, a: NodeId, t: TimeStep) -> Result<Vec<NodeId>> {
        self.linked(a, t, 0..self.constellation_size)
    }

    /// Ground stations linked to node `a` at step `t`, ascending
    pub fn ground_stations(&self, a: NodeId, t: TimeStep) -> Result<Vec<NodeId>> {
        self.linked(a, t, self.constellation_size..self.node_size)
    }

    fn linked(&self, a: NodeId, t: TimeStep, rows: Range<usize>) -> Result<Vec<NodeId>> {
        let col = self.matrix_index(a)?;
        let matrix = self.delay_matrix(t)?;
        Ok(matrix
            .column(col)
            .enumerate()
            .skip(rows.start)
            .take(rows.len())
            .filter(|(_, delay)| *delay > LINK_THRESHOLD_S)
            .map(|(i, _)| i + 1)
            .collect())
    }

    /// Satellite positions at step `t`
    pub fn positions(&self, t: TimeStep) -> Result<PositionSeries> {
        PositionSeries::load(self.layout.position_path(t))
    }

    /// Raw snapshot record of satellite `a` at step `t`
    pub fn position(&self, a: NodeId, t: TimeStep) -> Result<String> {
        let series = self.positions(t)?;
        let out_of_range = || TopologyError::IndexOutOfRange {
            index: a,
            max: series.line_count(),
        };
        let index = a.checked_sub(1).ok_or_else(out_of_range)?;
        series
            .record(index)
            .map(str::to_string)
            .ok_or_else(out_of_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DELAY_TO_KM;
    use proptest::prelude::*;
    use tempfile::TempDir;

    /// 4 satellites + 1 ground station, 3 steps
    fn fixture() -> (TempDir, TopologyStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        std::fs::create_dir_all(layout.delay_dir()).unwrap();
        std::fs::create_dir_all(layout.position_dir()).unwrap();

        for t in 0..3 {
            let mut m = DelayMatrix::zeros(5, 5);
            if t == 1 {
                m[(0, 1)] = 0.02;
            }
            if t == 2 {
                for (a, b, d) in [(0, 1, 0.013), (1, 0, 0.013), (2, 0, 0.005), (4, 0, 0.004)] {
                    m[(a, b)] = d;
                }
                m[(4, 2)] = 0.031;
                m[(2, 4)] = 0.031;
                m[(3, 2)] = 0.011;
            }
            npy::write_matrix(layout.delay_path(t), &m).unwrap();
            let snapshot = (0..4)
                .map(|i| format!("{}.0,{}.5,550.0\n", i, -i))
                .collect::<String>();
            std::fs::write(layout.position_path(t), snapshot).unwrap();
        }

        (dir, TopologyStore::new(layout, 4, 5))
    }

    #[test]
    fn test_neighbors_follow_column() {
        let (_dir, store) = fixture();
        // matrix[0][1] = 0.02 -> node 1 is linked into node 2's column only
        assert_eq!(store.neighbors(2, 1).unwrap(), vec![1]);
        assert!(store.neighbors(1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_symmetric_link_seen_from_both_ends() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        std::fs::create_dir_all(layout.delay_dir()).unwrap();
        let mut m = DelayMatrix::zeros(5, 5);
        m[(0, 1)] = 0.02;
        m[(1, 0)] = 0.02;
        npy::write_matrix(layout.delay_path(1), &m).unwrap();

        let store = TopologyStore::new(layout, 4, 5);
        assert_eq!(store.neighbors(2, 1).unwrap(), vec![1]);
        assert_eq!(store.neighbors(1, 1).unwrap(), vec![2]);
        assert!(store.ground_stations(1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_is_strict() {
        let (_dir, store) = fixture();
        // 0.005 from row 3 and 0.004 from row 5 are below the link threshold
        assert_eq!(store.neighbors(1, 2).unwrap(), vec![2]);
        assert!(store.ground_stations(1, 2).unwrap().is_empty());
        assert_eq!(store.neighbors(3, 2).unwrap(), vec![4]);
        assert_eq!(store.ground_stations(3, 2).unwrap(), vec![5]);
    }

    #[test]
    fn test_neighbors_and_ground_stations_disjoint() {
        let (_dir, store) = fixture();
        for a in 1..=5 {
            let sats = store.neighbors(a, 2).unwrap();
            let gses = store.ground_stations(a, 2).unwrap();
            assert!(sats.iter().all(|i| *i <= 4));
            assert!(gses.iter().all(|i| *i == 5));
        }
        // ground station queried as the target node
        assert_eq!(store.neighbors(5, 2).unwrap(), vec![3]);
    }

    #[test]
    fn test_delay_and_distance() {
        let (_dir, store) = fixture();
        assert_eq!(store.delay(1, 2, 1).unwrap(), 0.02);
        assert_eq!(store.delay(2, 1, 1).unwrap(), 0.0);
        let d = store.distance(1, 2, 1).unwrap();
        assert!((d - 0.02 * DELAY_TO_KM).abs() < 1e-9);
        assert_eq!(store.distance(3, 3, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_out_of_range_nodes() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.delay(0, 1, 0),
            Err(TopologyError::IndexOutOfRange { index: 0, max: 5 })
        ));
        assert!(matches!(
            store.delay(6, 1, 0),
            Err(TopologyError::IndexOutOfRange { index: 6, max: 5 })
        ));
        assert!(matches!(
            store.neighbors(6, 0),
            Err(TopologyError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_step_is_not_found() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.delay(1, 2, 3),
            Err(TopologyError::NotFound { .. })
        ));
        assert!(matches!(
            store.positions(3),
            Err(TopologyError::NotFound { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let (_dir, store) = fixture();
        npy::write_matrix(store.layout().delay_path(0), &DelayMatrix::zeros(4, 4)).unwrap();
        assert!(matches!(
            store.delay(1, 1, 0),
            Err(TopologyError::ShapeMismatch { rows: 4, cols: 4, expected: 5, .. })
        ));
    }

    #[test]
    fn test_positions_and_single_record() {
        let (_dir, store) = fixture();
        let series = store.positions(0).unwrap();
        let positions: Vec<_> = series.iter().collect();
        assert_eq!(positions.len(), 4);
        assert_eq!(positions[2].latitude, 2.0);
        assert_eq!(positions[2].longitude, -2.5);

        assert_eq!(store.position(1, 0).unwrap(), "0.0,0.5,550.0");
        assert!(matches!(
            store.position(0, 0),
            Err(TopologyError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            store.position(5, 0),
            Err(TopologyError::IndexOutOfRange { index: 5, max: 4 })
        ));
    }

    proptest! {
        #[test]
        fn test_distance_scales_delay(delay in 0.0f64..0.5, a in 1usize..=3, b in 1usize..=3) {
            let dir = tempfile::tempdir().unwrap();
            let layout = ArtifactLayout::new(dir.path());
            std::fs::create_dir_all(layout.delay_dir()).unwrap();
            let mut m = DelayMatrix::zeros(3, 3);
            m[(a - 1, b - 1)] = delay;
            npy::write_matrix(layout.delay_path(0), &m).unwrap();

            let store = TopologyStore::new(layout, 3, 3);
            let distance = store.distance(a, b, 0).unwrap();
            let expected = store.delay(a, b, 0).unwrap() * (17.31 / 29.5 * 299792.458);
            prop_assert!((distance - expected).abs() < 1e-6);
        }
    }
}
