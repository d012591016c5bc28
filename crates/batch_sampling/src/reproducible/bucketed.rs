use super::distributed::{DistributedView, EpochPlan};
use super::progress::{Position, Progress};
use super::ReproducibleBatchSampler;
use crate::dataset::{FieldDataset, LengthSource};
use crate::error::{ensure_config, Result, SamplerError};
use crate::sampler::derive_rng_for_epoch;
use crate::state::{type_mismatch, BucketedState, SamplerState, SamplerType};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::info;

/// Parameters that decide how the sorted order is cut into buckets and batches.
///
/// The flat epoch order depends on all three, which is why a checkpoint
/// records them next to the consumed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grouping {
    batch_size: usize,
    num_batch_per_bucket: usize,
    num_replicas: usize,
}

impl Grouping {
    /// Sorted positions per bucket: each replica draws `num_batch_per_bucket`
    /// batches from every bucket. `None` when the product overflows.
    fn bucket_width(&self) -> Option<usize> {
        self.batch_size
            .checked_mul(self.num_batch_per_bucket)?
            .checked_mul(self.num_replicas)
    }
}

impl From<&BucketedState> for Grouping {
    fn from(state: &BucketedState) -> Self {
        Self {
            batch_size: state.batch_size,
            num_batch_per_bucket: state.num_batch_per_bucket,
            num_replicas: state.num_replicas,
        }
    }
}

/// Cuts `sorted` into buckets, optionally shuffles, then cuts buckets into
/// batches.
///
/// With an RNG, samples are shuffled within each bucket and full buckets are
/// shuffled among themselves. A trailing short bucket always stays last, so
/// the only short batch of the epoch is the final one.
fn bucket_batches(
    sorted: &[usize],
    grouping: Grouping,
    drop_last: bool,
    rng: Option<ChaCha8Rng>,
) -> Vec<Vec<usize>> {
    // groupings are validated on entry; a width past usize::MAX is one bucket
    let width = grouping.bucket_width().unwrap_or(usize::MAX);
    let mut buckets: Vec<Vec<usize>> = sorted.chunks(width).map(<[usize]>::to_vec).collect();

    if let Some(mut rng) = rng {
        for bucket in &mut buckets {
            bucket.shuffle(&mut rng);
        }
        let full = buckets.iter().take_while(|b| b.len() == width).count();
        buckets[..full].shuffle(&mut rng);
    }

    let mut batches: Vec<Vec<usize>> = buckets
        .iter()
        .flat_map(|bucket| bucket.chunks(grouping.batch_size).map(<[usize]>::to_vec))
        .collect();
    if drop_last && batches.last().is_some_and(|b| b.len() < grouping.batch_size) {
        batches.pop();
    }
    batches
}

/// Drops the first `skip` samples of a batch sequence, splitting the batch the
/// boundary falls into.
fn skip_samples(batches: Vec<Vec<usize>>, skip: usize) -> Vec<Vec<usize>> {
    let mut to_skip = skip;
    batches
        .into_iter()
        .filter_map(|mut batch| {
            if to_skip == 0 {
                Some(batch)
            } else if to_skip >= batch.len() {
                to_skip -= batch.len();
                None
            } else {
                let tail = batch.split_off(to_skip);
                to_skip = 0;
                Some(tail)
            }
        })
        .collect()
}

/// ============================================================================
/// Groups samples of similar length into the same batch.
///
/// Samples are sorted by length (stable, ascending) and the sorted order is cut
/// into buckets of `batch_size * num_batch_per_bucket * num_replicas`
/// positions. Every batch is drawn from a single bucket, which bounds the
/// length spread inside a batch and therefore its padding cost. With `shuffle`
/// the buckets and their contents are permuted by an RNG seeded with
/// `seed + epoch`.
///
/// # Arguments:
/// - `num_samples`: Dataset size `N`
/// - `lengths`: One length per sample, `lengths.len() == num_samples`
/// - `batch_size`: Samples per batch. Must be >= 1
/// - `num_batch_per_bucket`: Batches per replica in each bucket. Must be >= 1
/// - `shuffle`: Permute buckets and bucket contents per epoch
/// - `drop_last`: Discard the final short batch of the epoch
/// - `seed`: Base RNG seed, identical on every replica
///
/// # Resuming
/// Loading a checkpoint regenerates the recorded epoch order, skips the
/// consumed samples and either continues the recorded batches as they were
/// (same grouping) or re-buckets what is left with the new grouping. The set
/// of remaining samples is the same either way.
#[derive(Debug, Clone)]
pub struct BucketedBatchSampler {
    batch_size: usize,
    num_batch_per_bucket: usize,
    shuffle: bool,
    drop_last: bool,
    seed: u64,
    /// Sample indices in ascending length order
    sorted_order: Vec<usize>,
    /// `sorted_position[i]` is where sample `i` sits in `sorted_order`
    sorted_position: Vec<usize>,
    progress: Progress<BucketedState>,
}

impl BucketedBatchSampler {
    pub fn new(
        num_samples: usize,
        lengths: &[usize],
        batch_size: usize,
        num_batch_per_bucket: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Result<Self> {
        ensure_config!(
            lengths.len() == num_samples,
            "Length array has {} entries but the dataset has {} samples",
            lengths.len(),
            num_samples
        );
        ensure_config!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        ensure_config!(
            num_batch_per_bucket > 0,
            "num_batch_per_bucket must be > 0, but got num_batch_per_bucket={}",
            num_batch_per_bucket
        );
        ensure_config!(
            batch_size.checked_mul(num_batch_per_bucket).is_some(),
            "batch_size ({}) * num_batch_per_bucket ({}) overflows the bucket width",
            batch_size,
            num_batch_per_bucket
        );

        let mut sorted_order: Vec<usize> = (0..num_samples).collect();
        sorted_order.sort_by_key(|&index| lengths[index]);
        let mut sorted_position = vec![0; num_samples];
        for (position, &index) in sorted_order.iter().enumerate() {
            sorted_position[index] = position;
        }

        Ok(Self {
            batch_size,
            num_batch_per_bucket,
            shuffle,
            drop_last,
            seed,
            sorted_order,
            sorted_position,
            progress: Progress::new(SamplerType::Bucketed),
        })
    }

    /// Builds a sampler over `dataset`, reading lengths from `lengths`.
    pub fn from_dataset<D: FieldDataset + ?Sized>(
        dataset: &D,
        lengths: &LengthSource,
        batch_size: usize,
        num_batch_per_bucket: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Result<Self> {
        let lengths = lengths.resolve(dataset)?;
        Self::new(
            dataset.len(),
            &lengths,
            batch_size,
            num_batch_per_bucket,
            shuffle,
            drop_last,
            seed,
        )
    }

    pub fn num_samples(&self) -> usize {
        self.sorted_order.len()
    }

    pub fn num_batch_per_bucket(&self) -> usize {
        self.num_batch_per_bucket
    }

    pub fn distributed_view(&self) -> &DistributedView {
        self.progress.view()
    }

    /// Position of `index` in ascending length order.
    pub fn sorted_position(&self, index: usize) -> Option<usize> {
        self.sorted_position.get(index).copied()
    }

    fn grouping(&self) -> Grouping {
        Grouping {
            batch_size: self.batch_size,
            num_batch_per_bucket: self.num_batch_per_bucket,
            num_replicas: self.progress.view().num_replicas,
        }
    }

    fn epoch_batches(&self, sorted: &[usize], grouping: Grouping) -> Vec<Vec<usize>> {
        let rng = self
            .shuffle
            .then(|| derive_rng_for_epoch(self.seed, self.progress.epoch()));
        bucket_batches(sorted, grouping, self.drop_last, rng)
    }

    fn plan_pass(&self, resume: Option<&BucketedState>) -> EpochPlan {
        let current = self.grouping();
        let view = self.progress.view();
        let Some(state) = resume else {
            return view.plan(self.epoch_batches(&self.sorted_order, current), 0, false);
        };

        let recorded = Grouping::from(state);
        let skip = state.num_consumed_samples;
        let remaining = skip_samples(self.epoch_batches(&self.sorted_order, recorded), skip);
        if recorded == current {
            return view.plan(remaining, skip, false);
        }

        let mut rest: Vec<usize> = remaining.into_iter().flatten().collect();
        rest.sort_by_key(|&index| self.sorted_position[index]);
        view.plan(self.epoch_batches(&rest, current), skip, true)
    }

    fn record(&self, num_consumed_samples: usize) -> SamplerState {
        let grouping = self.grouping();
        SamplerState::Bucketed(BucketedState {
            num_consumed_samples,
            epoch: self.progress.epoch(),
            seed: self.seed,
            num_samples: self.num_samples(),
            shuffle: self.shuffle,
            batch_size: grouping.batch_size,
            num_batch_per_bucket: grouping.num_batch_per_bucket,
            num_replicas: grouping.num_replicas,
        })
    }
}

impl ReproducibleBatchSampler for BucketedBatchSampler {
    fn sampler_type(&self) -> SamplerType {
        SamplerType::Bucketed
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.progress.set_epoch(epoch);
    }

    fn set_distributed(&mut self, num_replicas: usize, rank: usize, pad: bool) -> Result<()> {
        let view = DistributedView::new(num_replicas, rank, pad)?;
        let grouping = Grouping {
            num_replicas,
            ..self.grouping()
        };
        ensure_config!(
            grouping.bucket_width().is_some(),
            "batch_size ({}) * num_batch_per_bucket ({}) * num_replicas ({}) overflows \
             the bucket width",
            self.batch_size,
            self.num_batch_per_bucket,
            num_replicas
        );
        if self.drop_last {
            ensure_config!(
                num_replicas
                    .checked_mul(self.batch_size)
                    .is_some_and(|needed| needed <= self.num_samples()),
                "num_replicas ({}) * batch_size ({}) exceeds num_samples ({}) with drop_last; \
                 some replicas would never receive a batch",
                num_replicas,
                self.batch_size,
                self.num_samples()
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
            Position::Pending(pending) => SamplerState::Bucketed(pending.clone()),
            Position::InPass { consumed } => self.record(consumed),
        })
    }

    fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        let mut state = match state {
            SamplerState::Bucketed(state) => state,
            other => return Err(type_mismatch(SamplerType::Bucketed, &other)),
        };
        self.progress.ensure_idle("load_state_dict")?;
        if state.num_samples != self.num_samples() {
            return Err(SamplerError::incompatible(format!(
                "record was taken over {} samples but the dataset has {}",
                state.num_samples,
                self.num_samples()
            )));
        }
        if Grouping::from(&state).bucket_width().filter(|&width| width > 0).is_none() {
            return Err(SamplerError::incompatible(format!(
                "record has an unusable grouping: batch_size={}, num_batch_per_bucket={}, \
                 num_replicas={}",
                state.batch_size, state.num_batch_per_bucket, state.num_replicas
            )));
        }
        if state.num_consumed_samples >= self.num_samples() {
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
        info!(
            epoch = state.epoch,
            seed = state.seed,
            consumed = state.num_consumed_samples,
            recorded_batch_size = state.batch_size,
            recorded_num_batch_per_bucket = state.num_batch_per_bucket,
            recorded_num_replicas = state.num_replicas,
            "Loaded Bucketed sampler checkpoint"
        );
        self.seed = state.seed;
        self.progress.resume_at(state.epoch, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity_lengths(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    fn drain(sampler: &mut BucketedBatchSampler) -> Vec<Vec<usize>> {
        sampler.batches().collect()
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn validates_parameters() {
            assert!(BucketedBatchSampler::new(3, &[1, 2], 2, 2, false, false, 0).is_err());
            assert!(BucketedBatchSampler::new(2, &[1, 2], 0, 2, false, false, 0).is_err());
            assert!(BucketedBatchSampler::new(2, &[1, 2], 2, 0, false, false, 0).is_err());
            assert!(BucketedBatchSampler::new(2, &[1, 2], 2, 2, false, false, 0).is_ok());
        }

        #[test]
        fn rejects_overflowing_bucket_width() -> Result<()> {
            let lengths = [1, 2, 3, 4];
            let err = BucketedBatchSampler::new(4, &lengths, usize::MAX / 2, 3, false, false, 0)
                .unwrap_err();
            assert!(matches!(err, SamplerError::Configuration { .. }), "{err}");

            let mut sampler =
                BucketedBatchSampler::new(4, &lengths, usize::MAX / 2, 1, true, false, 0)?;
            let err = sampler.set_distributed(3, 0, false).unwrap_err();
            assert!(matches!(err, SamplerError::Configuration { .. }), "{err}");
            assert_eq!(sampler.distributed_view().num_replicas, 1);

            let mut batch = sampler.next_batch().unwrap_or_default();
            batch.sort_unstable();
            assert_eq!(batch, vec![0, 1, 2, 3]);
            Ok(())
        }

        #[test]
        fn sort_is_stable_for_equal_lengths() -> Result<()> {
            let sampler = BucketedBatchSampler::new(4, &[2, 1, 2, 1], 1, 1, false, false, 0)?;
            assert_eq!(sampler.sorted_order, vec![1, 3, 0, 2]);
            assert_eq!(sampler.sorted_position(0), Some(2));
            assert_eq!(sampler.sorted_position(4), None);
            Ok(())
        }
    }

    mod ordering_tests {
        use super::*;

        #[test]
        fn unshuffled_batches_follow_length_order() -> Result<()> {
            let mut sampler =
                BucketedBatchSampler::new(6, &[5, 3, 9, 1, 7, 2], 2, 1, false, false, 0)?;
            assert_eq!(
                drain(&mut sampler),
                vec![vec![3, 5], vec![1, 0], vec![4, 2]]
            );
            Ok(())
        }

        #[test]
        fn shuffled_batches_stay_inside_one_bucket() -> Result<()> {
            let lengths = identity_lengths(100);
            let mut sampler = BucketedBatchSampler::new(100, &lengths, 4, 3, true, false, 9)?;
            let width = 12;
            for batch in drain(&mut sampler) {
                let bucket = batch[0] / width;
                assert!(batch.iter().all(|&i| i / width == bucket), "{batch:?}");
            }
            Ok(())
        }

        #[test]
        fn short_bucket_stays_last() -> Result<()> {
            let lengths = identity_lengths(10);
            for seed in 0..8 {
                let mut sampler = BucketedBatchSampler::new(10, &lengths, 2, 2, true, false, seed)?;
                let batches = drain(&mut sampler);
                let mut last = batches[batches.len() - 1].clone();
                last.sort_unstable();
                assert_eq!(last, vec![8, 9]);
            }
            Ok(())
        }

        #[test]
        fn drop_last_only_drops_final_batch() -> Result<()> {
            let lengths = identity_lengths(11);
            let mut sampler = BucketedBatchSampler::new(11, &lengths, 2, 2, true, true, 3)?;
            assert_eq!(sampler.num_batches(), 5);
            let batches = drain(&mut sampler);
            assert!(batches.iter().all(|b| b.len() == 2));
            // the dropped sample comes from the short last bucket
            let emitted: HashSet<usize> = batches.into_iter().flatten().collect();
            assert_eq!(emitted.len(), 10);
            assert!((0..8).all(|i| emitted.contains(&i)));
            Ok(())
        }
    }

    mod resume_tests {
        use super::*;

        #[test]
        fn same_grouping_continues_exactly() -> Result<()> {
            let lengths: Vec<usize> = (0..60).map(|i| (i * 37) % 23).collect();
            let mut original = BucketedBatchSampler::new(60, &lengths, 4, 2, true, false, 5)?;
            original.set_epoch(3);
            for _ in 0..4 {
                original.next_batch();
            }
            let state = original.state_dict()?;
            assert_eq!(state.num_consumed_samples(), 16);

            let mut resumed = BucketedBatchSampler::new(60, &lengths, 4, 2, true, false, 0)?;
            resumed.load_state_dict(state)?;
            resumed.set_epoch(3);
            assert_eq!(drain(&mut resumed), drain(&mut original));
            Ok(())
        }

        #[test]
        fn regrouped_pass_cannot_be_snapshot_until_done() -> Result<()> {
            let lengths = identity_lengths(40);
            let mut original = BucketedBatchSampler::new(40, &lengths, 5, 2, true, false, 1)?;
            let mut seen: Vec<usize> = (0..2).filter_map(|_| original.next_batch()).flatten().collect();
            let state = original.state_dict()?;

            let mut resumed = BucketedBatchSampler::new(40, &lengths, 3, 2, true, false, 1)?;
            resumed.load_state_dict(state.clone())?;
            assert_eq!(resumed.state_dict()?, state);

            seen.extend(resumed.next_batch().unwrap_or_default());
            let err = resumed.state_dict().unwrap_err();
            assert!(matches!(err, SamplerError::PrematureSnapshot { .. }));

            seen.extend(resumed.batches().flatten());
            assert_eq!(resumed.state_dict()?.num_consumed_samples(), 0);

            let unique: HashSet<usize> = seen.iter().copied().collect();
            assert_eq!(seen.len(), 40);
            assert_eq!(unique.len(), 40);
            Ok(())
        }

        #[test]
        fn record_carries_grouping() -> Result<()> {
            let mut sampler =
                BucketedBatchSampler::new(30, &identity_lengths(30), 3, 2, false, false, 8)?;
            sampler.set_distributed(2, 1, true)?;
            match sampler.state_dict()? {
                SamplerState::Bucketed(state) => {
                    assert_eq!(state.batch_size, 3);
                    assert_eq!(state.num_batch_per_bucket, 2);
                    assert_eq!(state.num_replicas, 2);
                    assert_eq!(state.num_samples, 30);
                }
                other => panic!("unexpected record {other:?}"),
            }
            Ok(())
        }

        #[test]
        fn rejects_mismatched_records() -> Result<()> {
            let mut sampler =
                BucketedBatchSampler::new(10, &identity_lengths(10), 2, 2, false, false, 0)?;
            let mut state = match sampler.state_dict()? {
                SamplerState::Bucketed(state) => state,
                other => panic!("unexpected record {other:?}"),
            };

            state.num_samples = 12;
            let err = sampler
                .load_state_dict(SamplerState::Bucketed(state.clone()))
                .unwrap_err();
            assert!(err.is_state_error());

            state.num_samples = 10;
            state.num_batch_per_bucket = 0;
            let err = sampler
                .load_state_dict(SamplerState::Bucketed(state.clone()))
                .unwrap_err();
            assert!(err.is_state_error());

            state.batch_size = usize::MAX;
            state.num_batch_per_bucket = 2;
            let err = sampler
                .load_state_dict(SamplerState::Bucketed(state))
                .unwrap_err();
            assert!(err.is_state_error(), "{err}");
            assert_eq!(sampler.next_batch(), Some(vec![0, 1]));
            Ok(())
        }
    }
}
