//! Mapping one epoch's logical batch sequence onto `(num_replicas, rank)`.
//!
//! Every replica builds the same logical sequence of `M` batches from the
//! shared seed and epoch, then keeps the batches whose position is congruent to
//! its rank. No replica ever talks to another.
//!
//! ```text
//! logical:  b0 b1 b2 b3 b4        (M = 5, R = 2)
//! rank 0:   b0    b2    b4
//! rank 1:      b1    b3    b0     (pad = true replays from the front)
//! ```

use crate::error::{ensure_config, Result};

/// Which slice of the cluster this sampler instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedView {
    pub num_replicas: usize,
    pub rank: usize,
    /// Replay batches from the front so every replica steps equally often.
    pub pad: bool,
}

impl Default for DistributedView {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            rank: 0,
            pad: false,
        }
    }
}

impl DistributedView {
    pub fn new(num_replicas: usize, rank: usize, pad: bool) -> Result<Self> {
        ensure_config!(
            num_replicas > 0,
            "num_replicas must be > 0, but got num_replicas={}",
            num_replicas
        );
        ensure_config!(
            rank < num_replicas,
            "rank must be in [0, num_replicas), but got rank={} with num_replicas={}",
            rank,
            num_replicas
        );
        Ok(Self {
            num_replicas,
            rank,
            pad,
        })
    }

    /// Number of batches this rank emits out of `num_logical` logical batches.
    pub fn num_batches_for_rank(&self, num_logical: usize) -> usize {
        if self.pad {
            num_logical.div_ceil(self.num_replicas)
        } else {
            num_logical / self.num_replicas
                + usize::from(self.rank < num_logical % self.num_replicas)
        }
    }

    /// Logical positions this rank emits, in emission order.
    ///
    /// Positions past the end of the sequence wrap to its front.
    pub fn positions(&self, num_logical: usize) -> impl Iterator<Item = usize> + '_ {
        let rank = self.rank;
        let num_replicas = self.num_replicas;
        (0..self.num_batches_for_rank(num_logical))
            .map(move |step| (rank + step * num_replicas) % num_logical)
    }

    /// Selects this rank's share of `items`.
    pub fn partition<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.positions(items.len())
            .map(|position| items[position].clone())
            .collect()
    }

    /// Partitions a logical batch sequence and prepares cursor and
    /// consumption bookkeeping for pulling it batch by batch.
    ///
    /// `base_consumed` is the number of samples of the epoch that were consumed
    /// before `logical` starts (non-zero when resuming).
    pub(crate) fn plan(
        &self,
        logical: Vec<Vec<usize>>,
        base_consumed: usize,
        regrouped: bool,
    ) -> EpochPlan {
        let num_logical = logical.len();

        // prefix[j] = samples in logical batches 0..j
        let mut prefix = Vec::with_capacity(num_logical + 1);
        prefix.push(0);
        for batch in &logical {
            prefix.push(prefix[prefix.len() - 1] + batch.len());
        }

        let batches = self.partition(&logical);
        let consumed_after = (0..batches.len())
            .map(|step| {
                let cluster_steps = ((step + 1) * self.num_replicas).min(num_logical);
                base_consumed + prefix[cluster_steps]
            })
            .collect();

        EpochPlan {
            batches,
            consumed_after,
            base_consumed,
            cursor: 0,
            regrouped,
        }
    }
}

/// One pass of one rank: its batches plus a cursor.
#[derive(Debug, Clone)]
pub(crate) struct EpochPlan {
    batches: Vec<Vec<usize>>,
    /// Cluster-wide consumed samples once step `t` has been emitted everywhere.
    consumed_after: Vec<usize>,
    base_consumed: usize,
    cursor: usize,
    /// Built from a record whose grouping differs from the sampler's own.
    regrouped: bool,
}

impl EpochPlan {
    pub(crate) fn next_batch(&mut self) -> Option<Vec<usize>> {
        let batch = self.batches.get_mut(self.cursor).map(std::mem::take)?;
        self.cursor += 1;
        Some(batch)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.batches.len() - self.cursor
    }

    pub(crate) fn consumed(&self) -> usize {
        match self.cursor {
            0 => self.base_consumed,
            n => self.consumed_after[n - 1],
        }
    }

    pub(crate) fn is_regrouped(&self) -> bool {
        self.regrouped
    }
}
