use crate::error::{ensure_config, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A `Sampler` defines the strategy for how to iterate and draw samples from
/// a dataset.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator
///    - For index samplers this is a `usize` index
///    - For batch samplers it is a `Vec<usize>` of indices
///
/// # Method
/// - `iter(epoch)`: returns a sequential or shuffled sequence for that epoch.
///    - Users pass the `epoch` parameter so internally the sampler uses it
///      together with the base RNG seed to shuffle in a reproducible way across epochs.
///
/// A plain `Sampler` cannot be checkpointed in the middle of an epoch. Wrap it in
/// [`ReproduceBatchSampler`](crate::reproducible::ReproduceBatchSampler) to make
/// it resumable.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    type Item = S::Item;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        (**self).iter(epoch)
    }
}

/// Items a sampler can yield that flatten into dataset indices.
///
/// Lets index samplers and batch samplers be materialized the same way.
pub trait IndexBatch {
    fn append_to(self, out: &mut Vec<usize>);
}

impl IndexBatch for usize {
    fn append_to(self, out: &mut Vec<usize>) {
        out.push(self);
    }
}

impl IndexBatch for Vec<usize> {
    fn append_to(mut self, out: &mut Vec<usize>) {
        out.append(&mut self);
    }
}

/// Derives the RNG used for one epoch: `base_seed + epoch`.
///
/// Every sampler in this crate seeds through here, so two replicas given the
/// same seed and epoch draw identical permutations. ChaCha8 has a fixed output
/// stream across rand releases and platforms, which checkpoints that store
/// only `(seed, epoch)` depend on.
#[inline]
pub(crate) fn derive_rng_for_epoch(base_seed: u64, epoch: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(epoch as u64))
}

/// ============================================================================
/// Yields indices sequentially in order `(0,1,2,...,dataset_size-1)`.
///
/// # Arguments:
/// - `dataset_size`: Total number of samples in a dataset
///
/// # Examples
/// ```ignore
/// let sampler = SequentialSampler::new(5);
/// let indices: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(indices, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Self {
        Self { dataset_size }
    }
}

impl Sampler for SequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.dataset_size)
    }
}

/// ============================================================================
/// Random uniform sampling over `0..dataset_size`, with optional replacement.
///
/// # Arguments:
/// - `dataset_size`: Total number of samples in a dataset.
/// - `replacement`: If `true`, each draw is independent and indices may repeat;
///                  If `false`, each index can only appear once.
/// - `num_samples`: Number of samples to draw (defaults to `dataset_size` if `None`).
///                  If `replacement=false`, users must have num_samples <= dataset_size.
/// - `base_seed`: Base RNG seed.
///
/// # Seed handling
/// For each epoch the RNG is derived as `base_seed + epoch`: a fresh shuffle every
/// epoch that is still reproducible from the same `base_seed`.
///
/// # Example usage
/// ```ignore
/// // Without replacement
/// let sampler1 = RandomSampler::new(1000, false, None, 42)?;
///
/// // With replacement
/// let sampler2 = RandomSampler::new(1000, true, None, 42)?;
/// ```
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    replacement: bool,
    num_samples: usize,
    base_seed: u64,
}

impl RandomSampler {
    pub fn new(
        dataset_size: usize,
        replacement: bool,
        num_samples: Option<usize>,
        base_seed: u64,
    ) -> Result<Self> {
        let num_samples = num_samples.unwrap_or(dataset_size);
        ensure_config!(
            num_samples > 0,
            "num_samples must be a positive integer value, but got num_samples={}",
            num_samples
        );

        if !replacement {
            ensure_config!(
                num_samples <= dataset_size,
                "num_samples ({}) exceeds dataset size ({}) without replacement",
                num_samples,
                dataset_size
            );
        }

        Ok(Self {
            dataset_size,
            replacement,
            num_samples,
            base_seed,
        })
    }
}

impl Sampler for RandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = derive_rng_for_epoch(self.base_seed, epoch);
        if self.replacement {
            Box::new((0..self.num_samples).map(move |_| rng.random_range(0..self.dataset_size)))
        } else {
            let mut indices: Vec<_> = (0..self.dataset_size).collect();
            indices.shuffle(&mut rng);
            indices.truncate(self.num_samples);
            Box::new(indices.into_iter())
        }
    }
}

/// ============================================================================
/// Wraps a [`Sampler`] to yield mini-batches of items.
///
/// Each call to `.iter(epoch)` produces successive `Vec<S::Item>` batches, where each
/// mini-batch contains up to `batch_size` elements drawn from the underlying sampler.
/// If `drop_last` is `true`, any final mini-batch smaller than `batch_size` will be discarded.
///
/// # Arguments:
/// - `sampler`: Base sampler to wrap
/// - `batch_size`: Number of items per batch. Must be >= 1
/// - `drop_last`: If true, discards mini-batches smaller than `batch_size`
///
/// # Example
/// ```ignore
/// let base_sampler = SequentialSampler::new(1000);
/// let batch_sampler = BatchSampler::new(base_sampler, 32, false)?;
///
/// for mini_batch in batch_sampler.iter(0) {
///     // `mini_batch` is Vec<usize> of length 32, except the last mini-batch
///     println!("Batch size: {}", mini_batch.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BatchSampler<S> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure_config!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            sampler,
            batch_size,
            drop_last,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<S: Sampler> Sampler for BatchSampler<S> {
    type Item = Vec<S::Item>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        let mut sampler_iter = self.sampler.iter(epoch);
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;

        Box::new(std::iter::from_fn(move || {
            let mut mini_batch = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                if let Some(item) = sampler_iter.next() {
                    mini_batch.push(item);
                } else {
                    break;
                }
            }
            if mini_batch.len() == batch_size || (!drop_last && !mini_batch.is_empty()) {
                Some(mini_batch)
            } else {
                None
            }
        }))
    }
}
