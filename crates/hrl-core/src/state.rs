//! Fixed-size state vectors and their named layouts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;

use crate::error::{HrlError, Result};

/// A named contiguous segment of a state vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub range: Range<usize>,
}

/// Segmentation of an agent's state vector, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateLayout {
    regions: Vec<Region>,
    size: usize,
}

impl StateLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a region of `len` cells
    pub fn region(mut self, name: &'static str, len: usize) -> Self {
        let start = self.size;
        self.size += len;
        self.regions.push(Region {
            name,
            range: start..self.size,
        });
        self
    }

    /// Append a single-cell region
    pub fn scalar(self, name: &'static str) -> Self {
        self.region(name, 1)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Index range of a region; panics on names the layout never declared
    pub fn range(&self, name: &str) -> Range<usize> {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.range.clone())
            .unwrap_or_else(|| panic!("state layout has no region named {}", name))
    }

    /// Index of a single-cell region
    pub fn index(&self, name: &str) -> usize {
        self.range(name).start
    }

    pub fn zeros(&self) -> StateVector {
        StateVector::zeros(self.size)
    }
}

/// Fixed-length numeric state; the length never changes after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector(Vec<f64>);

impl StateVector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> f64 {
        self.0[idx]
    }

    pub fn set(&mut self, idx: usize, value: f64) {
        self.0[idx] = value;
    }

    pub fn add(&mut self, idx: usize, value: f64) {
        self.0[idx] += value;
    }

    pub fn slice(&self, range: Range<usize>) -> &[f64] {
        &self.0[range]
    }

    /// Whether any cell in `range` is positive
    pub fn any_positive(&self, range: Range<usize>) -> bool {
        self.0[range].iter().any(|&v| v > 0.0)
    }

    /// Zero every cell
    pub fn clear(&mut self) {
        self.0.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Overwrite with `other`, which must have the same length
    pub fn copy_from(&mut self, other: &StateVector) -> Result<()> {
        if other.len() != self.len() {
            return Err(HrlError::invariant(
                "state",
                format!("state length changed from {} to {}", self.len(), other.len()),
            ));
        }
        self.0.copy_from_slice(&other.0);
        Ok(())
    }

    /// Hex SHA-256 of the cell values, for logs and determinism checks
    pub fn fingerprint(&self) -> String {
        hex::encode(self.digest())
    }

    /// First eight digest bytes as an integer seed
    pub fn seed(&self) -> u64 {
        let digest = self.digest();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for v in &self.0 {
            hasher.update(v.to_le_bytes());
        }
        hasher.finalize().into()
    }
}
