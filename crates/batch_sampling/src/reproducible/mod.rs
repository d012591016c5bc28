//! Batch samplers that can be checkpointed mid-epoch and resumed exactly.
//!
//! ```text
//! reproducible/
//! ├── mod.rs          # ReproducibleBatchSampler trait, Batches iterator
//! ├── distributed.rs  # DistributedView: round-robin partition + padding
//! ├── progress.rs     # pass / resume bookkeeping for seeded samplers
//! ├── random.rs       # RandomBatchSampler
//! ├── bucketed.rs     # BucketedBatchSampler
//! └── reproduce.rs    # ReproduceBatchSampler (wraps any Sampler)
//! ```
//!
//! # Lifecycle
//! ```ignore
//! let mut sampler = BucketedBatchSampler::new(n, &lengths, 32, 10, true, false, seed)?;
//! sampler.set_distributed(world_size, rank, true)?;
//! if let Some(state) = checkpoint {
//!     sampler.load_state_dict(state)?;
//! }
//! for epoch in start_epoch..num_epochs {
//!     sampler.set_epoch(epoch);
//!     while let Some(batch) = sampler.next_batch() {
//!         // ... train ...
//!         if should_checkpoint {
//!             save(sampler.state_dict()?);
//!         }
//!     }
//! }
//! ```
//!
//! # Consumption accounting
//! `num_consumed_samples` counts samples of the cluster-wide epoch sequence.
//! After a rank emits its `t`-th batch, every rank is assumed to have emitted
//! step `t` as well, so all ranks record the same value without talking to
//! each other. Replayed padding batches are never counted.

mod bucketed;
mod distributed;
mod progress;
mod random;
mod reproduce;

pub use bucketed::BucketedBatchSampler;
pub use distributed::DistributedView;
pub use random::RandomBatchSampler;
pub use reproduce::ReproduceBatchSampler;

use crate::error::Result;
use crate::state::{SamplerState, SamplerType};

/// A batch sampler whose position inside an epoch can be saved and restored.
///
/// Iteration is pull based: the sampler owns its cursor, so a caller can pull
/// some batches, take a snapshot and keep pulling from the same instance.
pub trait ReproducibleBatchSampler: Send {
    fn sampler_type(&self) -> SamplerType;

    /// Batch size new batches are grouped with.
    fn batch_size(&self) -> usize;

    /// Start-of-epoch hook. Seeded samplers abandon an unfinished pass and
    /// drop a loaded record taken in another epoch.
    fn set_epoch(&mut self, epoch: usize);

    /// Serve `rank` out of `num_replicas`. With `pad` every replica emits the
    /// same number of batches by replaying batches from the front of the
    /// epoch sequence.
    fn set_distributed(&mut self, num_replicas: usize, rank: usize, pad: bool) -> Result<()>;

    /// Next batch of this rank. `None` ends the pass; the following call
    /// starts a new pass over the same epoch.
    fn next_batch(&mut self) -> Option<Vec<usize>>;

    /// Iterates the rest of the current pass.
    fn batches(&mut self) -> Batches<'_, Self>
    where
        Self: Sized,
    {
        Batches { sampler: self }
    }

    /// Batches this rank still emits in the current pass, or in the next one
    /// if no pass is running.
    fn num_batches(&self) -> usize;

    /// Cluster-wide samples consumed in the current epoch.
    fn num_consumed_samples(&self) -> usize;

    fn state_dict(&self) -> Result<SamplerState>;

    /// Restores a record. Rejected while a pass is partially consumed.
    fn load_state_dict(&mut self, state: SamplerState) -> Result<()>;
}

impl<S: ReproducibleBatchSampler + ?Sized> ReproducibleBatchSampler for Box<S> {
    fn sampler_type(&self) -> SamplerType {
        (**self).sampler_type()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn set_epoch(&mut self, epoch: usize) {
        (**self).set_epoch(epoch)
    }

    fn set_distributed(&mut self, num_replicas: usize, rank: usize, pad: bool) -> Result<()> {
        (**self).set_distributed(num_replicas, rank, pad)
    }

    fn next_batch(&mut self) -> Option<Vec<usize>> {
        (**self).next_batch()
    }

    fn num_batches(&self) -> usize {
        (**self).num_batches()
    }

    fn num_consumed_samples(&self) -> usize {
        (**self).num_consumed_samples()
    }

    fn state_dict(&self) -> Result<SamplerState> {
        (**self).state_dict()
    }

    fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        (**self).load_state_dict(state)
    }
}

/// Iterator over the remaining batches of one pass.
///
/// Created by [`ReproducibleBatchSampler::batches`].
pub struct Batches<'a, S: ?Sized> {
    sampler: &'a mut S,
}

impl<S: ReproducibleBatchSampler + ?Sized> Iterator for Batches<'_, S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.sampler.next_batch()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sampler.num_batches();
        (remaining, Some(remaining))
    }
}
