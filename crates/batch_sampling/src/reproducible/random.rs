use super::distributed::{DistributedView, EpochPlan};
use super::progress::{Position, Progress};
use super::ReproducibleBatchSampler;
use crate::error::{ensure_config, Result, SamplerError};
use crate::sampler::derive_rng_for_epoch;
use crate::state::{type_mismatch, RandomState, SamplerState, SamplerType};
use rand::seq::SliceRandom;
use tracing::info;

/// ============================================================================
/// Batches an identity or seeded-shuffle order of `0..num_samples`.
///
/// The epoch order depends only on `(seed, epoch)`, never on the batch size,
/// so a checkpoint is a single consumed-sample count into that order. Loading
/// it into a sampler with another `batch_size` or world size skips the same
/// samples and groups the rest with the new settings.
///
/// # Arguments:
/// - `num_samples`: Dataset size `N`
/// - `batch_size`: Samples per batch. Must be >= 1
/// - `shuffle`: Shuffle with an RNG seeded by `seed + epoch`
/// - `drop_last`: Discard a trailing short batch
/// - `seed`: Base RNG seed, identical on every replica
///
/// # Example
/// ```ignore
/// let mut sampler = RandomBatchSampler::new(1000, 32, true, false, 42)?;
/// sampler.set_distributed(world_size, rank, true)?;
/// for epoch in 0..num_epochs {
///     sampler.set_epoch(epoch);
///     for batch in sampler.batches() {
///         // ...
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RandomBatchSampler {
    num_samples: usize,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: u64,
    progress: Progress<RandomState>,
}

impl RandomBatchSampler {
    pub fn new(
        num_samples: usize,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Result<Self> {
        ensure_config!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            num_samples,
            batch_size,
            shuffle,
            drop_last,
            seed,
            progress: Progress::new(SamplerType::Random),
        })
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn distributed_view(&self) -> &DistributedView {
        self.progress.view()
    }

    fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.num_samples).collect();
        if self.shuffle {
            indices.shuffle(&mut derive_rng_for_epoch(self.seed, epoch));
        }
        indices
    }

    fn plan_pass(&self, resume: Option<&RandomState>) -> EpochPlan {
        let skip = resume.map_or(0, |state| state.num_consumed_samples);
        let order = self.epoch_order(self.progress.epoch());
        let remaining = order.get(skip..).unwrap_or_default();

        let logical: Vec<Vec<usize>> = remaining
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        // The order is independent of the batch size, so any resumed pass is
        // still a prefix of it and stays snapshot-able.
        self.progress.view().plan(logical, skip, false)
    }

    fn record(&self, num_consumed_samples: usize) -> SamplerState {
        SamplerState::Random(RandomState {
            num_consumed_samples,
            epoch: self.progress.epoch(),
            seed: self.seed,
            num_samples: self.num_samples,
            shuffle: self.shuffle,
            batch_size: self.batch_size,
        })
    }
}

impl ReproducibleBatchSampler for RandomBatchSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::Random
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.progress.set_epoch(epoch);
    }

    fn set_distributed(&mut self, num_replicas: usize, rank: usize, pad: bool) -> Result<()> {
        let view = DistributedView::new(num_replicas, rank, pad)?;
        if self.drop_last {
            ensure_config!(
                num_replicas
                    .checked_mul(self.batch_size)
                    .is_some_and(|needed| needed <= self.num_samples),
                "num_replicas ({}) * batch_size ({}) exceeds num_samples ({}) with drop_last; \
                 some replicas would never receive a batch",
                num_replicas,
                self.batch_size,
                self.num_samples
            );
        }
        self.progress.set_view(view)
    }

    fn next_batch(&mut self) -> Option<Vec<usize>> {
        if !self.progress.in_pass() {
            let resume = self.progress.take_pending();
            let plan = self.plan_pass(resume.as_ref());
            self.progress.begin(plan);
        }
        self.progress.advance()
    }

    fn num_batches(&self) -> usize {
        self.progress
            .remaining()
            .unwrap_or_else(|| self.plan_pass(self.progress.pending()).remaining())
    }

    fn num_consumed_samples(&self) -> usize {
        self.progress.num_consumed_samples()
    }

    fn state_dict(&self) -> Result<SamplerState> {
        Ok(match self.progress.position()? {
            Position::Idle => self.record(0),
            Position::Pending(pending) => SamplerState::Random(pending.clone()),
            Position::InPass { consumed } => self.record(consumed),
        })
    }

    fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        let mut state = match state {
            SamplerState::Random(state) => state,
            other => return Err(type_mismatch(SamplerType::Random, &other)),
        };
        self.progress.ensure_idle("load_state_dict")?;
        if state.num_samples != self.num_samples {
            return Err(SamplerError::incompatible(format!(
                "record was taken over {} samples but the dataset has {}",
                state.num_samples, self.num_samples
            )));
        }
        if state.num_consumed_samples >= self.num_samples {
            // snapshot taken on the last sample: nothing left to resume
            state.num_consumed_samples = 0;
        }
        if state.shuffle != self.shuffle {
            info!(
                recorded = state.shuffle,
                configured = self.shuffle,
                "Using shuffle setting from the checkpoint"
            );
            self.shuffle = state.shuffle;
        }
        if state.batch_size != self.batch_size {
            info!(
                recorded = state.batch_size,
                configured = self.batch_size,
                "Regrouping remaining samples with the configured batch_size"
            );
        }
        info!(
            epoch = state.epoch,
            seed = state.seed,
            consumed = state.num_consumed_samples,
            "Loaded Random sampler checkpoint"
        );
        self.seed = state.seed;
        self.progress.resume_at(state.epoch, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn drain(sampler: &mut RandomBatchSampler) -> Vec<Vec<usize>> {
        sampler.batches().collect()
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(RandomBatchSampler::new(10, 0, false, false, 0).is_err());
    }

    #[test]
    fn sequential_order_when_not_shuffled() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(7, 3, false, false, 0)?;
        assert_eq!(
            drain(&mut sampler),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
        Ok(())
    }

    #[test]
    fn drop_last_discards_short_tail() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(7, 3, true, true, 5)?;
        assert_eq!(sampler.num_batches(), 2);
        let batches = drain(&mut sampler);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 3));
        Ok(())
    }

    #[test]
    fn shuffle_depends_on_seed_and_epoch() -> Result<()> {
        let mut a = RandomBatchSampler::new(64, 8, true, false, 3)?;
        let mut b = RandomBatchSampler::new(64, 8, true, false, 3)?;
        a.set_epoch(2);
        b.set_epoch(2);
        let first = drain(&mut a);
        assert_eq!(first, drain(&mut b));

        b.set_epoch(3);
        assert_ne!(first, drain(&mut b));
        Ok(())
    }

    #[test]
    fn seeded_order_is_stable() -> Result<()> {
        // ChaCha8 seeded with 42, then 43; stored records replay this order
        let mut sampler = RandomBatchSampler::new(10, 4, true, false, 42)?;
        assert_eq!(
            drain(&mut sampler),
            vec![vec![7, 1, 5, 4], vec![6, 9, 3, 8], vec![2, 0]]
        );
        sampler.set_epoch(1);
        assert_eq!(sampler.next_batch(), Some(vec![2, 8, 5, 9]));
        Ok(())
    }

    #[test]
    fn next_pass_starts_after_end() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(4, 2, false, false, 0)?;
        assert_eq!(drain(&mut sampler).len(), 2);
        assert_eq!(sampler.num_consumed_samples(), 0);
        assert_eq!(sampler.next_batch(), Some(vec![0, 1]));
        Ok(())
    }

    #[test]
    fn snapshot_mid_pass_and_resume_with_new_batch_size() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(50, 4, true, false, 11)?;
        sampler.set_epoch(1);
        let mut seen: Vec<usize> = (0..3).filter_map(|_| sampler.next_batch()).flatten().collect();
        let state = sampler.state_dict()?;
        assert_eq!(state.num_consumed_samples(), 12);

        let mut resumed = RandomBatchSampler::new(50, 5, true, false, 999)?;
        resumed.load_state_dict(state)?;
        resumed.set_epoch(1);
        assert_eq!(resumed.num_batches(), 8);
        for batch in resumed.batches() {
            seen.extend(batch);
        }

        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 50);
        assert_eq!(unique.len(), 50);
        Ok(())
    }

    #[test]
    fn pending_record_is_returned_unchanged() -> Result<()> {
        let state = SamplerState::Random(RandomState {
            num_consumed_samples: 6,
            epoch: 2,
            seed: 1,
            num_samples: 20,
            shuffle: true,
            batch_size: 3,
        });
        let mut sampler = RandomBatchSampler::new(20, 4, true, false, 1)?;
        sampler.load_state_dict(state.clone())?;
        assert_eq!(sampler.num_consumed_samples(), 6);
        assert_eq!(sampler.state_dict()?, state);
        Ok(())
    }

    #[test]
    fn changing_epoch_discards_pending_record() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(20, 4, false, false, 1)?;
        sampler.load_state_dict(SamplerState::Random(RandomState {
            num_consumed_samples: 8,
            epoch: 0,
            seed: 1,
            num_samples: 20,
            shuffle: false,
            batch_size: 4,
        }))?;
        sampler.set_epoch(0);
        assert_eq!(sampler.next_batch(), Some(vec![8, 9, 10, 11]));

        sampler.set_epoch(1);
        assert_eq!(sampler.next_batch(), Some(vec![0, 1, 2, 3]));
        Ok(())
    }

    #[test]
    fn consumed_at_end_restarts_epoch() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(10, 4, false, false, 0)?;
        sampler.load_state_dict(SamplerState::Random(RandomState {
            num_consumed_samples: 10,
            epoch: 0,
            seed: 0,
            num_samples: 10,
            shuffle: false,
            batch_size: 4,
        }))?;
        assert_eq!(sampler.num_consumed_samples(), 0);
        assert_eq!(sampler.num_batches(), 3);
        Ok(())
    }

    #[test]
    fn rejects_wrong_dataset_size_and_type() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(10, 4, false, false, 0)?;
        let wrong_size = SamplerState::Random(RandomState {
            num_consumed_samples: 0,
            epoch: 0,
            seed: 0,
            num_samples: 11,
            shuffle: false,
            batch_size: 4,
        });
        assert!(sampler.load_state_dict(wrong_size).unwrap_err().is_state_error());

        let wrong_type = SamplerState::Reproduce(crate::state::ReproduceState {
            index_list: (0..10).collect(),
            num_consumed_samples: 0,
        });
        assert!(sampler.load_state_dict(wrong_type).unwrap_err().is_state_error());
        Ok(())
    }

    #[test]
    fn set_distributed_and_load_are_rejected_mid_pass() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(10, 2, false, false, 0)?;
        let snapshot = sampler.state_dict()?;
        sampler.next_batch();
        assert!(sampler
            .set_distributed(2, 0, false)
            .unwrap_err()
            .is_sequencing_error());
        assert!(sampler
            .load_state_dict(snapshot)
            .unwrap_err()
            .is_sequencing_error());

        sampler.set_epoch(0);
        sampler.set_distributed(2, 0, false)?;
        Ok(())
    }

    #[test]
    fn drop_last_requires_a_batch_per_replica() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(10, 4, false, true, 0)?;
        assert!(sampler.set_distributed(3, 0, false).is_err());
        sampler.set_distributed(2, 1, false)?;
        assert_eq!(sampler.distributed_view().rank, 1);
        Ok(())
    }

    #[test]
    fn oversized_drop_last_world_is_a_configuration_error() -> Result<()> {
        let mut sampler = RandomBatchSampler::new(10, usize::MAX, false, true, 0)?;
        let err = sampler.set_distributed(2, 0, false).unwrap_err();
        assert!(matches!(err, SamplerError::Configuration { .. }), "{err}");
        Ok(())
    }
}
