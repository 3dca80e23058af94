//! Exact nearest-neighbor index over fixed-dimension embedding vectors.

use std::{
    io::Write,
    path::Path,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"DCVI";
const FORMAT_VERSION: u32 = 1;

/// Snapshot header: magic, version, metric, dimension (u32 each) and the
/// vector count (u64), all little-endian.
const HEADER_SIZE: usize = 24;

/// Distance metric used both when inserting vectors and when querying.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared L2 distance on the raw vectors.
    Euclidean,
    /// `1 - cos(a, b)`, computed on L2-normalized vectors.
    #[default]
    Cosine,
}

impl Metric {
    fn code(self) -> u32 {
        match self {
            Self::Euclidean => 0,
            Self::Cosine => 1,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Euclidean),
            1 => Some(Self::Cosine),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::Cosine => "cosine",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(Error::Config(format!("unknown metric: {other}"))),
        }
    }
}

/// One search hit: the position of a stored vector and its distance from
/// the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Flat (brute-force) vector index.
///
/// Vectors are stored row-major in one contiguous buffer. With
/// [`Metric::Cosine`] every vector is normalized on insert and every query
/// is normalized before scoring, so both sides go through the same
/// transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
        }
    }

    /// Build an index from a batch of vectors, inserted in order.
    pub fn build(
        dimension: usize,
        metric: Metric,
        vectors: &[Vec<f32>],
    ) -> Result<Self> {
        let mut index = Self::new(dimension, metric);
        index.data.reserve(dimension * vectors.len());
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector; its position is the previous `len()`.
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        match self.metric {
            Metric::Euclidean => self.data.extend_from_slice(vector),
            Metric::Cosine => self.data.extend(normalized(vector)),
        }
        Ok(())
    }

    /// The stored (possibly normalized) vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Return the `k` stored vectors closest to `query`, nearest first.
    ///
    /// Equal distances are ordered by position, so results are fully
    /// deterministic. Asking for more neighbors than stored vectors
    /// returns every vector.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query: Vec<f32> = match self.metric {
            Metric::Euclidean => query.to_vec(),
            Metric::Cosine => normalized(query).collect(),
        };

        let mut neighbors: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, stored)| Neighbor {
                position,
                distance: self.distance(&query, stored),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }

    /// Hex-encoded BLAKE3 digest of the metric, dimension and vector data.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.metric.code().to_le_bytes());
        hasher.update(&(self.dimension as u64).to_le_bytes());
        hasher.update(bytemuck::cast_slice(&self.data));
        hasher.finalize().to_hex().to_string()
    }

    /// Write the index to a single snapshot file.
    ///
    /// Binary format:
    /// - 4 bytes: magic `DCVI`
    /// - 4 bytes: format version (u32 LE)
    /// - 4 bytes: metric code (u32 LE)
    /// - 4 bytes: dimension D (u32 LE)
    /// - 8 bytes: vector count N (u64 LE)
    /// - N * D * 4 bytes: f32 LE values in row-major order
    ///
    /// The file is written next to its destination and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            Error::Snapshot(format!(
                "dimension {} does not fit the snapshot header",
                self.dimension
            ))
        })?;

        let mut bytes = Vec::with_capacity(
            HEADER_SIZE + std::mem::size_of_val(self.data.as_slice()),
        );
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.metric.code().to_le_bytes());
        bytes.extend_from_slice(&dimension.to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(&self.data));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;

        tracing::debug!(
            path = %path.display(),
            vectors = self.len(),
            dimension = self.dimension,
            "wrote index snapshot"
        );
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let corrupt =
            |what: &str| Error::Snapshot(format!("{}: {what}", path.display()));

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(corrupt("not an index snapshot"));
        }

        let read_u32 = |at: usize| {
            u32::from_le_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
            ])
        };

        let version = read_u32(4);
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!(
                "unsupported snapshot version {version}"
            )));
        }

        let metric = Metric::from_code(read_u32(8))
            .ok_or_else(|| corrupt("unknown metric code"))?;
        let dimension = read_u32(12) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[16..24]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected_len != Some(bytes.len()) {
            return Err(corrupt("length does not match header"));
        }

        let data: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..]);

        Ok(Self {
            dimension,
            metric,
            data,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn distance(&self, query: &[f32], stored: &[f32]) -> f32 {
        match self.metric {
            Metric::Euclidean => query
                .iter()
                .zip(stored)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            Metric::Cosine => {
                let dot: f32 =
                    query.iter().zip(stored).map(|(a, b)| a * b).sum();
                1.0 - dot
            }
        }
    }
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn normalized(vector: &[f32]) -> impl Iterator<Item = f32> + '_ {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let scale = if norm > f32::EPSILON { 1.0 / norm } else { 1.0 };
    vector.iter().map(move |v| v * scale)
}
