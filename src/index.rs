//! Exact nearest-neighbour index over embedded knowledge statements.
//!
//! The corpus is a few dozen rows, so a flat row-major scan under squared L2 is
//! both exact and fast enough. Results are fully deterministic: ties on distance
//! are broken by insertion position.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use thiserror::Error;

const MAGIC: &[u8; 4] = b"ERIX";
const FORMAT_VERSION: u32 = 1;
// magic + version + dimension + count
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const CHECKSUM_LEN: usize = 4;

/// Errors raised while building, querying, or persisting an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch at row {position}: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Offending vector length.
        found: usize,
        /// Row (or `usize::MAX` for a query vector).
        position: usize,
    },
    /// Search was attempted on an index without rows.
    #[error("index contains no vectors")]
    EmptyIndex,
    /// `k` must be at least one.
    #[error("k must be positive")]
    ZeroK,
    /// Persisted bytes could not be decoded.
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    /// Persisted file was written by an incompatible layout revision.
    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),
    /// Underlying filesystem failure.
    #[error("index io: {0}")]
    Io(#[from] std::io::Error),
}

/// Query vector position marker used in [`IndexError::DimensionMismatch`].
pub const QUERY_POSITION: usize = usize::MAX;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Squared L2 distance to the query.
    pub distance: f32,
    /// Insertion position of the matched row.
    pub position: usize,
}

/// Flat exact index under squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    rows: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Builds an index from vectors in insertion order.
    pub fn build<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Self, IndexError> {
        let dimension = vectors.first().map(|v| v.as_ref().len()).unwrap_or(0);
        if !vectors.is_empty() && dimension == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                found: 0,
                position: 0,
            });
        }
        let mut data = Vec::with_capacity(dimension * vectors.len());
        for (position, vector) in vectors.iter().enumerate() {
            let vector = vector.as_ref();
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    found: vector.len(),
                    position,
                });
            }
            data.extend_from_slice(vector);
        }
        Ok(Self {
            dimension,
            rows: vectors.len(),
            data,
        })
    }

    /// Vector dimension shared by every row (0 for an empty index).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Returns the `min(k, len)` closest rows, ascending by distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if k == 0 {
            return Err(IndexError::ZeroK);
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
                position: QUERY_POSITION,
            });
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                distance: squared_l2(query, row),
                position,
            })
            .collect();
        let k = k.min(hits.len());
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, compare_hits);
            hits.truncate(k);
        }
        hits.sort_by(compare_hits);
        Ok(hits)
    }

    /// Encodes the index into its private binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + CHECKSUM_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.rows as u64).to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Decodes bytes produced by [`FlatL2Index::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(IndexError::Corrupt(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        let stored = u32::from_le_bytes(trailer.try_into().map_err(corrupt_slice)?);
        if crc32fast::hash(body) != stored {
            return Err(IndexError::Corrupt("checksum mismatch".to_string()));
        }
        let version = u32::from_le_bytes(body[4..8].try_into().map_err(corrupt_slice)?);
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let dimension = u32::from_le_bytes(body[8..12].try_into().map_err(corrupt_slice)?) as usize;
        let rows = u64::from_le_bytes(body[12..20].try_into().map_err(corrupt_slice)?) as usize;
        let payload = &body[HEADER_LEN..];
        let expected = dimension
            .checked_mul(rows)
            .and_then(|cells| cells.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("row count overflows".to_string()))?;
        if payload.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} payload bytes for {}x{}, found {}",
                expected,
                rows,
                dimension,
                payload.len()
            )));
        }
        if rows > 0 && dimension == 0 {
            return Err(IndexError::Corrupt("rows without a dimension".to_string()));
        }
        let data = payload
            .chunks_exact(4)
            .map(|cell| f32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]))
            .collect();
        Ok(Self {
            dimension,
            rows,
            data,
        })
    }

    /// Writes the binary layout to `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Reads an index previously written by [`FlatL2Index::save`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn compare_hits(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.position.cmp(&b.position))
}

fn corrupt_slice(_: std::array::TryFromSliceError) -> IndexError {
    IndexError::Corrupt("truncated header".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 2.0],
            vec![3.0, 3.0],
            vec![1.0, 0.0],
        ]
    }

    #[test]
    fn search_is_sorted_and_bounded() {
        let index = FlatL2Index::build(&sample()).expect("build");
        for k in 1..=7 {
            let hits = index.search(&[0.9, 0.1], k).expect("search");
            assert_eq!(hits.len(), k.min(index.len()));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    fn hit(distance: f32, position: usize) -> Neighbor {
        Neighbor { distance, position }
    }

    #[test]
    fn distances_are_squared_l2_and_ties_keep_insertion_order() {
        let index = FlatL2Index::build(&sample()).expect("build");
        let hits = index.search(&[1.0, 0.0], 3).expect("search");
        assert_eq!(
            hits,
            vec![
                hit(0.0, 1),
                hit(0.0, 4),
                hit(1.0, 0),
            ]
        );
    }

    #[test]
    fn inconsistent_lengths_are_rejected() {
        let err = FlatL2Index::build(&[vec![1.0, 2.0], vec![1.0]]).expect_err("mismatch");
        match err {
            IndexError::DimensionMismatch {
                expected,
                found,
                position,
            } => assert_eq!((expected, found, position), (2, 1, 1)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = FlatL2Index::build(&sample()).expect("build");
        assert!(matches!(
            index.search(&[1.0, 2.0, 3.0], 1),
            Err(IndexError::DimensionMismatch { position: QUERY_POSITION, .. })
        ));
    }

    #[test]
    fn empty_index_refuses_search() {
        let index = FlatL2Index::build::<Vec<f32>>(&[]).expect("empty build");
        assert!(matches!(index.search(&[1.0], 1), Err(IndexError::EmptyIndex)));
    }

    #[test]
    fn zero_k_is_rejected() {
        let index = FlatL2Index::build(&sample()).expect("build");
        assert!(matches!(index.search(&[0.0, 0.0], 0), Err(IndexError::ZeroK)));
    }

    #[test]
    fn binary_round_trip_preserves_search() {
        let index = FlatL2Index::build(&sample()).expect("build");
        let restored = FlatL2Index::from_bytes(&index.to_bytes()).expect("decode");
        assert_eq!(restored, index);
        for query in sample() {
            assert_eq!(
                restored.search(&query, 3).expect("restored"),
                index.search(&query, 3).expect("original")
            );
        }
    }

    #[test]
    fn save_and_load_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        let index = FlatL2Index::build(&sample()).expect("build");
        index.save(&path).expect("save");
        let loaded = FlatL2Index::load(&path).expect("load");
        assert_eq!(loaded.search(&[3.0, 2.5], 2).unwrap(), index.search(&[3.0, 2.5], 2).unwrap());
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = FlatL2Index::build(&sample()).expect("build").to_bytes();
        bytes[HEADER_LEN + 1] ^= 0xff;
        assert!(matches!(
            FlatL2Index::from_bytes(&bytes),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let bytes = FlatL2Index::build(&sample()).expect("build").to_bytes();
        assert!(matches!(
            FlatL2Index::from_bytes(&bytes[..10]),
            Err(IndexError::Corrupt(_))
        ));
    }
}
