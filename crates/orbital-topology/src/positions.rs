//! Satellite position snapshots
//!
//! One text line per satellite, `latitude,longitude,altitude`, ordered by
//! satellite index. Lines that are not exactly three numeric fields are
//! skipped, never treated as errors.

use crate::{read_error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
}

impl GeodeticPosition {
    /// Parse one snapshot record, `None` if it is not three numeric fields
    pub fn parse_record(line: &str) -> Option<Self> {
        let mut fields = line.split(',');
        let latitude = fields.next()?.trim().parse().ok()?;
        let longitude = fields.next()?.trim().parse().ok()?;
        let altitude_km = fields.next()?.trim().parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
            altitude_km,
        })
    }
}

/// Snapshot for one time step, parsed lazily on iteration
///
/// The file is read once; every call to [`PositionSeries::iter`] restarts
/// from the first record and yields the same sequence.
#[derive(Debug, Clone)]
pub struct PositionSeries {
    path: PathBuf,
    text: String,
}

impl PositionSeries {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| read_error(path, e))?;
        debug!(
            "Loaded position snapshot {:?} ({} lines)",
            path,
            text.lines().count()
        );
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn iter(&self) -> Positions<'_> {
        Positions {
            lines: self.text.lines(),
        }
    }

    /// Raw line `index` (0-based) as written by the geometry engine
    pub fn record(&self, index: usize) -> Option<&str> {
        self.text.lines().nth(index)
    }

    /// Number of raw lines, well-formed or not
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

impl<'a> IntoIterator for &'a PositionSeries {
    type Item = GeodeticPosition;
    type IntoIter = Positions<'a>;

    fn into_iter(self) -> Positions<'a> {
        self.iter()
    }
}

/// Well-formed records of a [`PositionSeries`], in file order
pub struct Positions<'a> {
    lines: std::str::Lines<'a>,
}

impl Iterator for Positions<'_> {
    type Item = GeodeticPosition;

    fn next(&mut self) -> Option<GeodeticPosition> {
        for line in self.lines.by_ref() {
            match GeodeticPosition::parse_record(line) {
                Some(pos) => return Some(pos),
                None => debug!("Skipping malformed position record {:?}", line),
            }
        }
        None
    }
}
