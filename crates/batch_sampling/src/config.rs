//! src/config.rs
//!
//! Configuration for building reproducible batch samplers
//!
//! `SamplerConfig` stores the construction parameters of a batch sampler so
//! they can live in a training config file next to everything else, and
//! rebuilds the right sampler when a checkpoint is resumed.
//!
//! Example:
//! ```ignore
//! let config = SamplerConfig::builder()
//!     .kind(SamplerKind::Bucketed)
//!     .batch_size(32)
//!     .num_batch_per_bucket(10)
//!     .length_field("input_ids")
//!     .seed(42)
//!     .build();
//! let mut sampler = config.build(&dataset)?;
//!
//! // ... later, from a checkpoint ...
//! let mut sampler = config.restore(&dataset, state)?;
//! ```
//!
//! JSON form (every field optional):
//! ```text
//! {"kind": "bucketed", "batch_size": 32, "length_field": "input_ids"}
//! ```

use crate::dataset::{FieldDataset, LengthSource};
use crate::error::{ensure_config, Result, SamplerError};
use crate::reproducible::{
    BucketedBatchSampler, RandomBatchSampler, ReproduceBatchSampler, ReproducibleBatchSampler,
};
use crate::sampler::{RandomSampler, SequentialSampler};
use crate::state::{SamplerState, SamplerType};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Which reproducible batch sampler to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    #[default]
    Random,
    Bucketed,
    /// Wraps a plain sequential or shuffling index sampler
    Reproduce,
}

impl From<SamplerType> for SamplerKind {
    fn from(sampler_type: SamplerType) -> Self {
        match sampler_type {
            SamplerType::Random => SamplerKind::Random,
            SamplerType::Bucketed => SamplerKind::Bucketed,
            SamplerType::Reproduce => SamplerKind::Reproduce,
        }
    }
}

/// Construction parameters for a reproducible batch sampler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub kind: SamplerKind,
    /// Samples per batch (must be > 0)
    pub batch_size: usize,
    /// Shuffle every epoch with an RNG seeded by `seed + epoch`
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Base seed, identical on every replica
    pub seed: u64,
    /// Bucketed only: batches per replica drawn from each length bucket
    pub num_batch_per_bucket: usize,
    /// Bucketed only: record field the per-item length is read from
    pub length_field: Option<String>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Random,
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 0,
            num_batch_per_bucket: 10,
            length_field: None,
        }
    }
}

impl SamplerConfig {
    pub fn builder() -> SamplerConfigBuilder {
        SamplerConfigBuilder::default()
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sampler config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid sampler config in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Rejected sampler config in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_config!(
            self.batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            self.batch_size
        );
        if self.kind == SamplerKind::Bucketed {
            ensure_config!(
                self.num_batch_per_bucket > 0,
                "num_batch_per_bucket must be > 0, but got num_batch_per_bucket={}",
                self.num_batch_per_bucket
            );
            ensure_config!(
                self.length_field.is_some(),
                "a bucketed sampler needs `length_field` to read per-item lengths"
            );
        }
        Ok(())
    }

    /// Builds the configured sampler over `dataset`.
    pub fn build<D: FieldDataset + ?Sized>(
        &self,
        dataset: &D,
    ) -> Result<Box<dyn ReproducibleBatchSampler>> {
        self.validate()?;
        self.build_kind(self.kind, dataset)
    }

    /// Builds the sampler the record was taken from and loads it.
    ///
    /// The record's `sampler_type` decides the sampler kind; a different
    /// configured kind is overridden.
    pub fn restore<D: FieldDataset + ?Sized>(
        &self,
        dataset: &D,
        state: SamplerState,
    ) -> Result<Box<dyn ReproducibleBatchSampler>> {
        let kind = SamplerKind::from(state.sampler_type());
        if kind != self.kind {
            info!(
                configured = ?self.kind,
                recorded = ?kind,
                "Checkpoint was taken with another sampler kind; building the recorded one"
            );
        }
        let mut sampler = self.build_kind(kind, dataset)?;
        sampler.load_state_dict(state)?;
        Ok(sampler)
    }

    fn build_kind<D: FieldDataset + ?Sized>(
        &self,
        kind: SamplerKind,
        dataset: &D,
    ) -> Result<Box<dyn ReproducibleBatchSampler>> {
        let num_samples = dataset.len();
        let sampler: Box<dyn ReproducibleBatchSampler> = match kind {
            SamplerKind::Random => Box::new(RandomBatchSampler::new(
                num_samples,
                self.batch_size,
                self.shuffle,
                self.drop_last,
                self.seed,
            )?),
            SamplerKind::Bucketed => {
                let Some(field) = &self.length_field else {
                    return Err(SamplerError::config(
                        "a bucketed sampler needs `length_field` to read per-item lengths",
                    ));
                };
                Box::new(BucketedBatchSampler::from_dataset(
                    dataset,
                    &LengthSource::Field(field.clone()),
                    self.batch_size,
                    self.num_batch_per_bucket,
                    self.shuffle,
                    self.drop_last,
                    self.seed,
                )?)
            }
            SamplerKind::Reproduce if self.shuffle => Box::new(ReproduceBatchSampler::new(
                RandomSampler::new(num_samples, false, None, self.seed)?,
                self.batch_size,
                self.drop_last,
            )?),
            SamplerKind::Reproduce => Box::new(ReproduceBatchSampler::new(
                SequentialSampler::new(num_samples),
                self.batch_size,
                self.drop_last,
            )?),
        };
        Ok(sampler)
    }
}

/// Builder for SamplerConfig with method chaining
#[derive(Default)]
pub struct SamplerConfigBuilder {
    config: SamplerConfig,
}

impl SamplerConfigBuilder {
    pub fn kind(mut self, kind: SamplerKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = drop;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set how many batches per replica each length bucket holds.
    /// Larger buckets mix more lengths per step but pad more.
    pub fn num_batch_per_bucket(mut self, count: usize) -> Self {
        self.config.num_batch_per_bucket = count;
        self
    }

    pub fn length_field(mut self, field: impl Into<String>) -> Self {
        self.config.length_field = Some(field.into());
        self
    }

    pub fn build(self) -> SamplerConfig {
        self.config
    }
}
