//! Reproducible, distributed, resumable batch sampling.
//!
//! Batch samplers decide which dataset indices form each training batch, shard
//! that decision across replicas without coordination, and can be
//! checkpointed mid-epoch and resumed, with a different batch size or world
//! size if needed, without skipping or repeating samples.

pub mod config;
pub mod dataset;
pub mod error;
pub mod readers;
pub mod reproducible;
pub mod sampler;
pub mod state;
pub mod unrepeated;

pub use config::{SamplerConfig, SamplerKind};
pub use dataset::{Dataset, FieldDataset, InMemoryDataset, LengthSource};
pub use error::{Result, SamplerError};
pub use readers::JsonlSource;
pub use reproducible::{
    Batches, BucketedBatchSampler, DistributedView, RandomBatchSampler, ReproduceBatchSampler,
    ReproducibleBatchSampler,
};
pub use sampler::{BatchSampler, IndexBatch, RandomSampler, Sampler, SequentialSampler};
pub use state::{BucketedState, RandomState, ReproduceState, SamplerState, SamplerType};
pub use unrepeated::{UnrepeatedRandomSampler, UnrepeatedSequentialSampler, UnrepeatedSortedSampler};
