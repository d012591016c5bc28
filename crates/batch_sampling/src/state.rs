//! Checkpoint records for reproducible batch samplers.
//!
//! A record is embedded in a larger training checkpoint owned by the caller.
//! It is tagged by `sampler_type`, and the tag set is closed: a record with an
//! unknown tag never reaches a sampler.
//!
//! JSON layout of a seeded record:
//! ```text
//! {
//!   "sampler_type": "Bucketed",
//!   "num_consumed_samples": 70,
//!   "epoch": 0,
//!   "seed": 42,
//!   "num_samples": 1000,
//!   "shuffle": true,
//!   "batch_size": 7,
//!   "num_batch_per_bucket": 4,
//!   "num_replicas": 1
//! }
//! ```

use crate::error::{Result, SamplerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of reproducible batch sampler kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerType {
    Reproduce,
    Random,
    Bucketed,
}

impl fmt::Display for SamplerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplerType::Reproduce => "Reproduce",
            SamplerType::Random => "Random",
            SamplerType::Bucketed => "Bucketed",
        };
        f.write_str(name)
    }
}

/// Record of a `ReproduceBatchSampler`: the whole materialized epoch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproduceState {
    pub index_list: Vec<usize>,
    pub num_consumed_samples: usize,
}

/// Record of a `RandomBatchSampler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomState {
    pub num_consumed_samples: usize,
    pub epoch: usize,
    pub seed: u64,
    /// Dataset size when the record was taken
    pub num_samples: usize,
    pub shuffle: bool,
    /// Batch size the consumed count was produced with
    pub batch_size: usize,
}

/// Record of a `BucketedBatchSampler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketedState {
    pub num_consumed_samples: usize,
    pub epoch: usize,
    pub seed: u64,
    pub num_samples: usize,
    pub shuffle: bool,
    /// Grouping the flat epoch order was generated with. The order depends on
    /// all three, so reloading regenerates it from these and not from the
    /// reloading sampler's own settings.
    pub batch_size: usize,
    pub num_batch_per_bucket: usize,
    pub num_replicas: usize,
}

/// A persisted sampler checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sampler_type")]
pub enum SamplerState {
    Reproduce(ReproduceState),
    Random(RandomState),
    Bucketed(BucketedState),
}

impl SamplerState {
    pub fn sampler_type(&self) -> SamplerType {
        match self {
            SamplerState::Reproduce(_) => SamplerType::Reproduce,
            SamplerState::Random(_) => SamplerType::Random,
            SamplerState::Bucketed(_) => SamplerType::Bucketed,
        }
    }

    /// Samples already produced in the current unfinished epoch.
    pub fn num_consumed_samples(&self) -> usize {
        match self {
            SamplerState::Reproduce(state) => state.num_consumed_samples,
            SamplerState::Random(state) => state.num_consumed_samples,
            SamplerState::Bucketed(state) => state.num_consumed_samples,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| SamplerError::incompatible(format!("record is not serializable: {e}")))
    }

    /// Parses a record embedded in a larger JSON checkpoint bundle.
    ///
    /// A missing or unknown `sampler_type` is rejected here, before any
    /// sampler sees the record.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| SamplerError::incompatible(format!("unreadable sampler record: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SamplerError::incompatible(format!("record is not serializable: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SamplerError::incompatible(format!("unreadable sampler record: {e}")))
    }
}

/// Builds the error for a record handed to the wrong sampler kind.
pub(crate) fn type_mismatch(expected: SamplerType, state: &SamplerState) -> SamplerError {
    SamplerError::incompatible(format!(
        "record was taken from a {} sampler but is being loaded into a {} sampler",
        state.sampler_type(),
        expected
    ))
}
