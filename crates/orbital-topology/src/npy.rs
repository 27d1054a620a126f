//! NumPy `.npy` codec for delay matrices
//!
//! Reads format versions 1.0, 2.0 and 3.0 holding a 2-D `f8` or `f4`
//! array in either byte order and either memory order. Writes version 1.0,
//! little-endian `f8`, C order, which is what the geometry engine emits.

use crate::{read_error, Result, TopologyError};
use std::ops::{Index, IndexMut};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Total preamble + header length is padded to a multiple of this
const HEADER_ALIGN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NpyError {
    #[error("missing NUMPY magic")]
    BadMagic,
    #[error("unsupported format version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("file truncated")]
    Truncated,
    #[error("bad header: {0}")]
    Header(String),
    #[error("unsupported dtype {0}")]
    UnsupportedDtype(String),
    #[error("expected a 2-D array, got shape {0:?}")]
    NotTwoDimensional(Vec<usize>),
}

/// Dense row-major matrix of link delays (seconds)
#[derive(Debug, Clone, PartialEq)]
pub struct DelayMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DelayMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from nested rows; `None` if the rows are ragged
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        Some(Self {
            rows: rows.len(),
            cols,
            data: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Values of one column, top to bottom
    pub fn column(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(col).step_by(self.cols.max(1)).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl Index<(usize, usize)> for DelayMatrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        assert!(row < self.rows && col < self.cols, "matrix index out of bounds");
        &self.data[row * self.cols + col]
    }
}

impl IndexMut<(usize, usize)> for DelayMatrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        assert!(row < self.rows && col < self.cols, "matrix index out of bounds");
        &mut self.data[row * self.cols + col]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F8 { little: bool },
    F4 { little: bool },
}

impl Dtype {
    fn parse(descr: &str) -> std::result::Result<Self, NpyError> {
        let unsupported = || NpyError::UnsupportedDtype(descr.to_string());
        let mut chars = descr.chars();
        let little = match chars.next() {
            Some('<') => true,
            Some('>') => false,
            Some('=') => cfg!(target_endian = "little"),
            _ => return Err(unsupported()),
        };
        match chars.as_str() {
            "f8" => Ok(Dtype::F8 { little }),
            "f4" => Ok(Dtype::F4 { little }),
            _ => Err(unsupported()),
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F8 { .. } => 8,
            Dtype::F4 { .. } => 4,
        }
    }

    fn read(self, chunk: &[u8]) -> f64 {
        match self {
            Dtype::F8 { little } => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                if little {
                    f64::from_le_bytes(buf)
                } else {
                    f64::from_be_bytes(buf)
                }
            }
            Dtype::F4 { little } => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(chunk);
                let v = if little {
                    f32::from_le_bytes(buf)
                } else {
                    f32::from_be_bytes(buf)
                };
                v as f64
            }
        }
    }
}

#[derive(Debug)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Raw text following `'key':` in the header dict
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = [format!("'{}'", key), format!("\"{}\"", key)]
        .iter()
        .find_map(|k| header.find(k.as_str()).map(|i| i + k.len()))?;
    let rest = header[start..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

fn parse_header(text: &str) -> std::result::Result<Header, NpyError> {
    let missing = |key: &str| NpyError::Header(format!("missing '{}'", key));

    let descr_raw = dict_value(text, "descr").ok_or_else(|| missing("descr"))?;
    let quote = descr_raw
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| NpyError::Header("descr is not a string".into()))?;
    let descr = descr_raw[1..]
        .split(quote)
        .next()
        .ok_or_else(|| NpyError::Header("unterminated descr".into()))?;
    let dtype = Dtype::parse(descr)?;

    let fortran_raw = dict_value(text, "fortran_order").ok_or_else(|| missing("fortran_order"))?;
    let fortran_order = if fortran_raw.starts_with("True") {
        true
    } else if fortran_raw.starts_with("False") {
        false
    } else {
        return Err(NpyError::Header("fortran_order is not a bool".into()));
    };

    let shape_raw = dict_value(text, "shape").ok_or_else(|| missing("shape"))?;
    let inner = shape_raw
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| NpyError::Header("shape is not a tuple".into()))?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| NpyError::Header(format!("bad shape dimension {:?}", s)))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Decode an in-memory `.npy` file
pub fn decode(bytes: &[u8]) -> std::result::Result<DelayMatrix, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => {
            let raw = bytes.get(8..10).ok_or(NpyError::Truncated)?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
        }
        2 | 3 => {
            let raw = bytes.get(8..12).ok_or(NpyError::Truncated)?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                12,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };

    let data_start = header_start + header_len;
    let header_bytes = bytes
        .get(header_start..data_start)
        .ok_or(NpyError::Truncated)?;
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|_| NpyError::Header("header is not text".into()))?;
    let header = parse_header(header_text)?;

    let (rows, cols) = match header.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => return Err(NpyError::NotTwoDimensional(other.to_vec())),
    };

    let size = header.dtype.size();
    let count = rows.checked_mul(cols).ok_or(NpyError::Truncated)?;
    let data_end = count
        .checked_mul(size)
        .and_then(|len| len.checked_add(data_start))
        .ok_or(NpyError::Truncated)?;
    let payload = bytes
        .get(data_start..data_end)
        .ok_or(NpyError::Truncated)?;
    let values: Vec<f64> = payload
        .chunks_exact(size)
        .map(|chunk| header.dtype.read(chunk))
        .collect();

    let data = if header.fortran_order {
        let mut row_major = vec![0.0; count];
        for c in 0..cols {
            for r in 0..rows {
                row_major[r * cols + c] = values[c * rows + r];
            }
        }
        row_major
    } else {
        values
    };

    Ok(DelayMatrix { rows, cols, data })
}

/// Encode as a version 1.0, `<f8`, C-order `.npy` file
pub fn encode(matrix: &DelayMatrix) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.rows, matrix.cols
    );
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + matrix.data.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in &matrix.data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Load the matrix stored at `path`
pub fn read_matrix(path: impl AsRef<Path>) -> Result<DelayMatrix> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
    let matrix = decode(&bytes).map_err(|source| TopologyError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(
        "Loaded delay matrix {:?} ({}x{})",
        path,
        matrix.rows(),
        matrix.cols()
    );
    Ok(matrix)
}

/// Persist `matrix` at `path` (parent directory must exist)
pub fn write_matrix(path: impl AsRef<Path>, matrix: &DelayMatrix) -> Result<()> {
    std::fs::write(path, encode(matrix))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_npy(descr: &str, fortran: bool, shape: &str, payload: &[u8]) -> Vec<u8> {
        let header = format!(
            "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}\n",
            descr,
            if fortran { "True" } else { "False" },
            shape
        );
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_encode_header_alignment() {
        let bytes = encode(&DelayMatrix::zeros(5, 5));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 25 * 8);
    }

    #[test]
    fn test_decode_written_matrix() {
        let mut m = DelayMatrix::zeros(3, 2);
        m[(0, 1)] = 0.02;
        m[(2, 0)] = 1.5;
        let decoded = decode(&encode(&m)).unwrap();
        assert_eq!(decoded, m);
        assert_eq!(decoded.get(0, 1), Some(0.02));
        assert_eq!(decoded.get(3, 0), None);
    }

    #[test]
    fn test_decode_big_endian_f4() {
        let payload: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let m = decode(&raw_npy(">f4", false, "(2, 2)", &payload)).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_decode_fortran_order() {
        // Column-major [[1, 2, 3], [4, 5, 6]]
        let payload: Vec<u8> = [1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let m = decode(&raw_npy("<f8", true, "(2, 3)", &payload)).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.column(1).collect::<Vec<_>>(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(decode(b"not numpy at all"), Err(NpyError::BadMagic));

        let payload = 1.0f64.to_le_bytes();
        assert!(matches!(
            decode(&raw_npy("<f8", false, "(1,)", &payload)),
            Err(NpyError::NotTwoDimensional(_))
        ));
        assert!(matches!(
            decode(&raw_npy("|O", false, "(1, 1)", &payload)),
            Err(NpyError::UnsupportedDtype(_))
        ));
        assert_eq!(
            decode(&raw_npy("<f8", false, "(2, 2)", &payload)),
            Err(NpyError::Truncated)
        );

        let mut v9 = encode(&DelayMatrix::zeros(1, 1));
        v9[6] = 9;
        assert_eq!(decode(&v9), Err(NpyError::UnsupportedVersion(9, 0)));
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(DelayMatrix::from_rows(&[vec![0.0, 1.0], vec![2.0]]).is_none());
        let m = DelayMatrix::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
        assert_eq!(m[(1, 0)], 2.0);
    }

    proptest! {
        #[test]
        fn test_codec_preserves_arbitrary_shapes(
            rows in 0usize..12,
            cols in 1usize..12,
            seed in proptest::collection::vec(0.0f64..10.0, 144),
        ) {
            let mut m = DelayMatrix::zeros(rows, cols);
            for r in 0..rows {
                for c in 0..cols {
                    m[(r, c)] = seed[r * 12 + c];
                }
            }
            let decoded = decode(&encode(&m)).unwrap();
            prop_assert_eq!(decoded, m);
        }
    }
}
