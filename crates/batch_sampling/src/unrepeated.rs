//! Evaluation samplers that never repeat an index across replicas.
//!
//! Training samplers pad so that every replica steps the same number of times.
//! Evaluation cannot afford that: a padded index would be scored twice. These
//! samplers split the epoch order so every index lands on exactly one replica,
//! at the cost of replicas emitting up to one sample more or less than their
//! peers.

use crate::error::{ensure_config, Result};
use crate::sampler::{derive_rng_for_epoch, Sampler};
use rand::seq::SliceRandom;
use std::cmp::Reverse;

/// The `(num_replicas, rank)` slot an unrepeated sampler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReplicaSlot {
    num_replicas: usize,
    rank: usize,
}

impl Default for ReplicaSlot {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            rank: 0,
        }
    }
}

impl ReplicaSlot {
    fn new(num_samples: usize, num_replicas: usize, rank: usize) -> Result<Self> {
        ensure_config!(num_replicas > 0, "num_replicas must be > 0");
        ensure_config!(
            num_replicas <= num_samples,
            "The number of replicas ({}) should be lesser than the number of samples ({})",
            num_replicas,
            num_samples
        );
        ensure_config!(
            rank < num_replicas,
            "Invalid rank {}, rank should be in the interval [0, {}]",
            rank,
            num_replicas - 1
        );
        Ok(Self { num_replicas, rank })
    }

    /// Indices this replica owns when the order is dealt out one by one.
    fn strided(&self, indices: Vec<usize>) -> Vec<usize> {
        indices
            .into_iter()
            .skip(self.rank)
            .step_by(self.num_replicas)
            .collect()
    }

    fn strided_len(&self, num_samples: usize) -> usize {
        let common = num_samples / self.num_replicas;
        common + usize::from(self.rank < num_samples % self.num_replicas)
    }
}

/// ============================================================================
/// Identity or seeded-shuffle order, dealt out round-robin across replicas.
///
/// # Arguments:
/// - `num_samples`: Total number of samples in the dataset.
/// - `shuffle`: Shuffle with an RNG seeded by `seed + epoch`.
/// - `seed`: Base RNG seed, must be identical on every replica.
#[derive(Debug, Clone)]
pub struct UnrepeatedRandomSampler {
    num_samples: usize,
    shuffle: bool,
    seed: u64,
    slot: ReplicaSlot,
}

impl UnrepeatedRandomSampler {
    pub fn new(num_samples: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            num_samples,
            shuffle,
            seed,
            slot: ReplicaSlot::default(),
        }
    }

    /// Should be called right after construction, before the first epoch.
    pub fn set_distributed(&mut self, num_replicas: usize, rank: usize) -> Result<()> {
        self.slot = ReplicaSlot::new(self.num_samples, num_replicas, rank)?;
        Ok(())
    }

    /// Number of indices this replica yields per epoch.
    pub fn len(&self) -> usize {
        self.slot.strided_len(self.num_samples)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn generate_indices(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.num_samples).collect();
        if self.shuffle {
            indices.shuffle(&mut derive_rng_for_epoch(self.seed, epoch));
        }
        indices
    }
}

impl Sampler for UnrepeatedRandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let indices = self.slot.strided(self.generate_indices(epoch));
        debug_assert_eq!(indices.len(), self.len());
        Box::new(indices.into_iter())
    }
}

/// ============================================================================
/// Longest-first order, dealt out round-robin across replicas. Never shuffles.
///
/// Useful for evaluation where large inputs should be processed while memory is
/// still fresh, and where every replica's first batch is its most expensive one.
#[derive(Debug, Clone)]
pub struct UnrepeatedSortedSampler {
    sorted_indices: Vec<usize>,
    slot: ReplicaSlot,
}

impl UnrepeatedSortedSampler {
    /// # Arguments:
    /// - `lengths`: per-item length, one entry per dataset sample.
    pub fn new(lengths: &[usize]) -> Self {
        let mut sorted_indices: Vec<usize> = (0..lengths.len()).collect();
        sorted_indices.sort_by_key(|&index| Reverse(lengths[index]));
        Self {
            sorted_indices,
            slot: ReplicaSlot::default(),
        }
    }

    pub fn set_distributed(&mut self, num_replicas: usize, rank: usize) -> Result<()> {
        self.slot = ReplicaSlot::new(self.sorted_indices.len(), num_replicas, rank)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slot.strided_len(self.sorted_indices.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sampler for UnrepeatedSortedSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(self.slot.strided(self.sorted_indices.clone()).into_iter())
    }
}

/// ============================================================================
/// Identity order split across replicas.
///
/// # Arguments:
/// - `num_samples`: Total number of samples.
/// - `chunk_dist`: If `true`, each replica reads one contiguous chunk and the
///                 last replica also takes the remainder. With 10 samples on 2
///                 replicas: rank 0 reads `[0..5)`, rank 1 reads `[5..10)`.
///                 If `false`, indices are dealt out round-robin:
///                 rank 0 reads `[0, 2, 4, 6, 8]`, rank 1 reads `[1, 3, 5, 7, 9]`.
#[derive(Debug, Clone)]
pub struct UnrepeatedSequentialSampler {
    num_samples: usize,
    chunk_dist: bool,
    slot: ReplicaSlot,
}

impl UnrepeatedSequentialSampler {
    pub fn new(num_samples: usize, chunk_dist: bool) -> Self {
        Self {
            num_samples,
            chunk_dist,
            slot: ReplicaSlot::default(),
        }
    }

    pub fn set_distributed(&mut self, num_replicas: usize, rank: usize) -> Result<()> {
        self.slot = ReplicaSlot::new(self.num_samples, num_replicas, rank)?;
        Ok(())
    }

    fn chunk_bounds(&self) -> (usize, usize) {
        let ReplicaSlot { num_replicas, rank } = self.slot;
        let chunk_size = self.num_samples / num_replicas;
        let start = chunk_size * rank;
        let end = if rank == num_replicas - 1 {
            self.num_samples
        } else {
            chunk_size * (rank + 1)
        };
        (start, end)
    }

    pub fn len(&self) -> usize {
        if self.chunk_dist {
            let (start, end) = self.chunk_bounds();
            end - start
        } else {
            self.slot.strided_len(self.num_samples)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sampler for UnrepeatedSequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        if self.chunk_dist {
            let (start, end) = self.chunk_bounds();
            Box::new(start..end)
        } else {
            Box::new(
                (0..self.num_samples)
                    .skip(self.slot.rank)
                    .step_by(self.slot.num_replicas),
            )
        }
    }
}
