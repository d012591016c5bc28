use super::ReproducibleBatchSampler;
use crate::error::{ensure_config, Result, SamplerError};
use crate::sampler::{IndexBatch, Sampler};
use crate::state::{type_mismatch, ReproduceState, SamplerState, SamplerType};
use tracing::{debug, info};

/// ============================================================================
/// Makes any [`Sampler`] resumable by recording *where* it is instead of *how*
/// it orders.
///
/// On the first pull of a pass the wrapped sampler's epoch order is flattened
/// into one index list. Batches are then sliced from that list with the
/// current `batch_size`, so a checkpoint (the list plus an offset) can be
/// resumed with any batch size and at any point of the pass.
///
/// The wrapped sampler may yield single indices or batches of indices.
///
/// # Arguments:
/// - `sampler`: The sampler to wrap
/// - `batch_size`: Samples per emitted batch. Must be >= 1
/// - `drop_last`: Discard a trailing short slice
///
/// # Example
/// ```ignore
/// let inner = BatchSampler::new(SequentialSampler::new(26), 4, false)?;
/// let mut sampler = ReproduceBatchSampler::new(inner, 4, false)?;
/// sampler.next_batch(); // [0, 1, 2, 3]
/// let state = sampler.state_dict()?;
/// ```
#[derive(Debug, Clone)]
pub struct ReproduceBatchSampler<S> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
    epoch: usize,
    /// The order being served; `None` until the next pass materializes it.
    index_list: Option<Vec<usize>>,
    num_consumed_samples: usize,
    /// A batch has been emitted from `index_list` and the pass has not ended.
    during_iter: bool,
}

impl<S> ReproduceBatchSampler<S>
where
    S: Sampler,
    S::Item: IndexBatch,
{
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
            epoch: 0,
            index_list: None,
            num_consumed_samples: 0,
            during_iter: false,
        })
    }

    pub fn inner(&self) -> &S {
        &self.sampler
    }

    fn materialize(&self) -> Vec<usize> {
        let mut index_list = Vec::new();
        for item in self.sampler.iter(self.epoch) {
            item.append_to(&mut index_list);
        }
        index_list
    }

    fn end_pass(&mut self) {
        self.index_list = None;
        self.num_consumed_samples = 0;
        self.during_iter = false;
    }
}

impl<S> ReproducibleBatchSampler for ReproduceBatchSampler<S>
where
    S: Sampler,
    S::Item: IndexBatch,
{
    fn sampler_type(&self) -> SamplerType {
        SamplerType::Reproduce
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Forwarded to the wrapped sampler at the next materialization. An order
    /// that is already materialized (or restored) is served to its end first.
    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    /// Only the single-replica view is accepted, and it changes nothing.
    fn set_distributed(&mut self, num_replicas: usize, rank: usize, _pad: bool) -> Result<()> {
        if num_replicas == 1 && rank == 0 {
            return Ok(());
        }
        Err(SamplerError::config(format!(
            "Reproduce sampler cannot shard itself (requested rank {rank} of {num_replicas}); \
             wrap an already-sharded sampler instead"
        )))
    }

    fn next_batch(&mut self) -> Option<Vec<usize>> {
        if self.index_list.is_none() {
            let index_list = self.materialize();
            debug!(
                epoch = self.epoch,
                num_samples = index_list.len(),
                "Materialized epoch order"
            );
            self.index_list = Some(index_list);
        }

        let start = self.num_consumed_samples;
        let slice = self
            .index_list
            .as_deref()
            .and_then(|list| list.get(start..(start + self.batch_size).min(list.len())))
            .filter(|slice| !slice.is_empty())
            .filter(|slice| !self.drop_last || slice.len() == self.batch_size)
            .map(<[usize]>::to_vec);

        match slice {
            Some(batch) => {
                self.num_consumed_samples += batch.len();
                self.during_iter = true;
                Some(batch)
            }
            None => {
                self.end_pass();
                None
            }
        }
    }

    fn num_batches(&self) -> usize {
        let total = match &self.index_list {
            Some(list) => list.len(),
            None => self.materialize().len(),
        };
        let remaining = total.saturating_sub(self.num_consumed_samples);
        if self.drop_last {
            remaining / self.batch_size
        } else {
            remaining.div_ceil(self.batch_size)
        }
    }

    fn num_consumed_samples(&self) -> usize {
        self.num_consumed_samples
    }

    fn state_dict(&self) -> Result<SamplerState> {
        let index_list = match &self.index_list {
            Some(list) => list.clone(),
            None => self.materialize(),
        };
        Ok(SamplerState::Reproduce(ReproduceState {
            index_list,
            num_consumed_samples: self.num_consumed_samples,
        }))
    }

    fn load_state_dict(&mut self, state: SamplerState) -> Result<()> {
        let state = match state {
            SamplerState::Reproduce(state) => state,
            other => return Err(type_mismatch(SamplerType::Reproduce, &other)),
        };
        if self.during_iter {
            return Err(SamplerError::IterationInProgress {
                sampler: SamplerType::Reproduce,
                operation: "load_state_dict",
                consumed: self.num_consumed_samples,
            });
        }

        let expected = self.materialize().len();
        if state.index_list.len() != expected {
            return Err(SamplerError::incompatible(format!(
                "record holds {} indices but the wrapped sampler yields {} per epoch",
                state.index_list.len(),
                expected
            )));
        }
        if state.num_consumed_samples > state.index_list.len() {
            return Err(SamplerError::incompatible(format!(
                "record claims {} consumed samples out of {}",
                state.num_consumed_samples,
                state.index_list.len()
            )));
        }

        info!(
            consumed = state.num_consumed_samples,
            num_samples = state.index_list.len(),
            "Loaded Reproduce sampler checkpoint"
        );
        self.num_consumed_samples = state.num_consumed_samples;
        self.index_list = Some(state.index_list);
        Ok(())
    }
}
