//! Helpers shared by the integration tests.
#![allow(dead_code)]

use batch_sampling::{
    BucketedBatchSampler, RandomBatchSampler, ReproducibleBatchSampler, Result,
};
use std::collections::HashMap;

/// Drains the current pass.
pub fn drain<S: ReproducibleBatchSampler>(sampler: &mut S) -> Vec<Vec<usize>> {
    sampler.batches().collect()
}

/// Pulls up to `k` batches.
pub fn take<S: ReproducibleBatchSampler>(sampler: &mut S, k: usize) -> Vec<Vec<usize>> {
    (0..k).map_while(|_| sampler.next_batch()).collect()
}

/// Simulates `num_replicas` ranks: builds one sampler per rank with `make`,
/// installs the view, and drains one pass of `epoch` from each.
pub fn run_ranks<S, F>(
    num_replicas: usize,
    pad: bool,
    epoch: usize,
    make: F,
) -> Result<Vec<Vec<Vec<usize>>>>
where
    S: ReproducibleBatchSampler,
    F: Fn() -> Result<S>,
{
    (0..num_replicas)
        .map(|rank| {
            let mut sampler = make()?;
            sampler.set_distributed(num_replicas, rank, pad)?;
            sampler.set_epoch(epoch);
            Ok(drain(&mut sampler))
        })
        .collect()
}

/// All indices emitted by all ranks, sorted.
pub fn union(per_rank: &[Vec<Vec<usize>>]) -> Vec<usize> {
    let mut all: Vec<usize> = per_rank.iter().flatten().flatten().copied().collect();
    all.sort_unstable();
    all
}

/// Number of emissions beyond the first, summed over all indices.
pub fn extra_emissions(indices: &[usize]) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &index in indices {
        *counts.entry(index).or_default() += 1;
    }
    counts.values().map(|&c| c - 1).sum()
}

/// Lengths equal to the index: sorted position == index.
pub fn identity_lengths(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// Lengths with many ties and no relation to the index.
pub fn scrambled_lengths(n: usize) -> Vec<usize> {
    (0..n).map(|i| (i * 7919 + 13) % 17).collect()
}

pub fn random_sampler(
    n: usize,
    batch_size: usize,
    seed: u64,
) -> impl Fn() -> Result<RandomBatchSampler> {
    move || RandomBatchSampler::new(n, batch_size, true, false, seed)
}

pub fn bucketed_sampler(
    lengths: Vec<usize>,
    batch_size: usize,
    num_batch_per_bucket: usize,
    seed: u64,
) -> impl Fn() -> Result<BucketedBatchSampler> {
    move || {
        BucketedBatchSampler::new(
            lengths.len(),
            &lengths,
            batch_size,
            num_batch_per_bucket,
            true,
            false,
            seed,
        )
    }
}
