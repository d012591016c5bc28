//! Pass bookkeeping shared by the seeded samplers.
//!
//! A seeded sampler is always in one of three positions:
//!
//! - idle: no pass running, nothing to resume
//! - pending: a checkpoint record was loaded and the next pass resumes it
//! - in pass: an [`EpochPlan`] is being pulled batch by batch

use super::distributed::{DistributedView, EpochPlan};
use crate::error::{Result, SamplerError};
use crate::state::{BucketedState, RandomState, SamplerType};
use tracing::{debug, warn};

/// A loaded checkpoint record waiting for the next pass.
pub(crate) trait ResumePoint {
    fn epoch(&self) -> usize;
    fn consumed(&self) -> usize;
}

impl ResumePoint for RandomState {
    fn epoch(&self) -> usize {
        self.epoch
    }

    fn consumed(&self) -> usize {
        self.num_consumed_samples
    }
}

impl ResumePoint for BucketedState {
    fn epoch(&self) -> usize {
        self.epoch
    }

    fn consumed(&self) -> usize {
        self.num_consumed_samples
    }
}

/// Where a snapshot would describe the sampler to be.
pub(crate) enum Position<'a, R> {
    Idle,
    Pending(&'a R),
    InPass { consumed: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct Progress<R> {
    sampler: SamplerType,
    epoch: usize,
    view: DistributedView,
    plan: Option<EpochPlan>,
    pending: Option<R>,
}

impl<R: ResumePoint> Progress<R> {
    pub(crate) fn new(sampler: SamplerType) -> Self {
        Self {
            sampler,
            epoch: 0,
            view: DistributedView::default(),
            plan: None,
            pending: None,
        }
    }

    pub(crate) fn epoch(&self) -> usize {
        self.epoch
    }

    pub(crate) fn view(&self) -> &DistributedView {
        &self.view
    }

    /// Abandons a running pass. A pending resume point survives only if it was
    /// recorded in the epoch being entered.
    pub(crate) fn set_epoch(&mut self, epoch: usize) {
        if let Some(plan) = self.plan.take() {
            debug!(
                sampler = %self.sampler,
                abandoned_batches = plan.remaining(),
                "Abandoning unfinished pass"
            );
        }
        if let Some(pending) = &self.pending {
            if pending.epoch() != epoch {
                warn!(
                    sampler = %self.sampler,
                    recorded_epoch = pending.epoch(),
                    new_epoch = epoch,
                    consumed = pending.consumed(),
                    "Discarding loaded checkpoint: epoch changed before it was resumed"
                );
                self.pending = None;
            }
        }
        self.epoch = epoch;
    }

    /// Fails with `IterationInProgress` if a pass is partially consumed.
    pub(crate) fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        match &self.plan {
            Some(plan) => Err(SamplerError::IterationInProgress {
                sampler: self.sampler,
                operation,
                consumed: plan.consumed(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn set_view(&mut self, view: DistributedView) -> Result<()> {
        self.ensure_idle("set_distributed")?;
        self.view = view;
        Ok(())
    }

    /// Installs a loaded record; the next pass resumes from it.
    pub(crate) fn resume_at(&mut self, epoch: usize, record: R) -> Result<()> {
        self.ensure_idle("load_state_dict")?;
        self.epoch = epoch;
        self.pending = Some(record);
        Ok(())
    }

    pub(crate) fn pending(&self) -> Option<&R> {
        self.pending.as_ref()
    }

    pub(crate) fn in_pass(&self) -> bool {
        self.plan.is_some()
    }

    /// Consumes the pending record; called exactly when a pass starts.
    pub(crate) fn take_pending(&mut self) -> Option<R> {
        self.pending.take()
    }

    pub(crate) fn begin(&mut self, plan: EpochPlan) {
        debug!(
            sampler = %self.sampler,
            epoch = self.epoch,
            rank = self.view.rank,
            num_replicas = self.view.num_replicas,
            batches = plan.remaining(),
            start_consumed = plan.consumed(),
            regrouped = plan.is_regrouped(),
            "Starting pass"
        );
        self.plan = Some(plan);
    }

    /// Pulls from the running pass; `None` ends it.
    pub(crate) fn advance(&mut self) -> Option<Vec<usize>> {
        let batch = self.plan.as_mut().and_then(EpochPlan::next_batch);
        if batch.is_none() {
            self.plan = None;
        }
        batch
    }

    pub(crate) fn remaining(&self) -> Option<usize> {
        self.plan.as_ref().map(EpochPlan::remaining)
    }

    pub(crate) fn num_consumed_samples(&self) -> usize {
        match (&self.plan, &self.pending) {
            (Some(plan), _) => plan.consumed(),
            (None, Some(pending)) => pending.consumed(),
            (None, None) => 0,
        }
    }

    /// Resolves what `state_dict()` should describe, failing inside a pass
    /// whose batches no longer follow the sampler's own grouping.
    pub(crate) fn position(&self) -> Result<Position<'_, R>> {
        match (&self.plan, &self.pending) {
            (Some(plan), _) if plan.is_regrouped() => Err(SamplerError::PrematureSnapshot {
                sampler: self.sampler,
                reason: format!(
                    "the current pass was regrouped from a checkpoint with different grouping \
                     parameters; {} batches remain before it can be recorded",
                    plan.remaining()
                ),
            }),
            (Some(plan), _) => Ok(Position::InPass {
                consumed: plan.consumed(),
            }),
            (None, Some(pending)) => Ok(Position::Pending(pending)),
            (None, None) => Ok(Position::Idle),
        }
    }
}
