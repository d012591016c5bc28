use crate::error::{Result, SamplerError};
use serde_json::Value;
use std::sync::Arc;

/// What a sampler needs from a dataset: how many items it holds.
///
/// Samplers never touch records, only indices `0..len()`.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dataset whose records expose named fields a length can be read from.
pub trait FieldDataset: Dataset {
    /// One length per record, read from `field`.
    ///
    /// An integer field is used as-is; a sized field (sequence, string,
    /// mapping) contributes its size.
    fn field_lengths(&self, field: &str) -> Result<Vec<usize>>;
}

/// Where a length-aware sampler gets its per-item lengths from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LengthSource {
    /// One length per item, in index order
    Explicit(Vec<usize>),
    /// A named field of every record
    Field(String),
}

impl LengthSource {
    pub fn resolve<D: FieldDataset + ?Sized>(&self, dataset: &D) -> Result<Vec<usize>> {
        match self {
            LengthSource::Explicit(lengths) => Ok(lengths.clone()),
            LengthSource::Field(field) => dataset.field_lengths(field),
        }
    }
}

/// A dataset of JSON records held in memory behind an `Arc`.
///
/// Cloning only bumps the reference count, so one dataset can back the
/// samplers of several dataloaders.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    records: Arc<[Value]>,
}

impl InMemoryDataset {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.records.iter()
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.records.len()
    }
}

impl FieldDataset for InMemoryDataset {
    fn field_lengths(&self, field: &str) -> Result<Vec<usize>> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| value_length(index, field, record.get(field)))
            .collect()
    }
}

fn value_length(index: usize, field: &str, value: Option<&Value>) -> Result<usize> {
    let unusable = |found: &str| {
        SamplerError::config(format!(
            "record {index}: field '{field}' is {found}, expected a non-negative integer or a sized value"
        ))
    };
    match value {
        None => Err(unusable("missing")),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| unusable(&format!("the number {number}"))),
        Some(Value::Array(items)) => Ok(items.len()),
        Some(Value::String(text)) => Ok(text.chars().count()),
        Some(Value::Object(map)) => Ok(map.len()),
        Some(Value::Bool(_)) => Err(unusable("a bool")),
        Some(Value::Null) => Err(unusable("null")),
    }
}

#[cfg(test)]
mod in_memory_dataset_tests {
    use super::*;
    use serde_json::json;

    fn records() -> InMemoryDataset {
        InMemoryDataset::new(vec![
            json!({"tokens": [1, 2, 3], "text": "héllo", "seq_len": 7, "meta": {"a": 1}}),
            json!({"tokens": [], "text": "", "seq_len": 0, "meta": {}}),
        ])
    }

    #[test]
    fn reports_length() {
        let dataset = records();
        assert_eq!(dataset.len(), 2);
        assert!(!dataset.is_empty());
        assert!(InMemoryDataset::new(Vec::new()).is_empty());
        assert_eq!(dataset.iter().count(), 2);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn reads_lengths_from_fields() -> Result<()> {
        let dataset = records();
        assert_eq!(dataset.field_lengths("tokens")?, vec![3, 0]);
        assert_eq!(dataset.field_lengths("text")?, vec![5, 0]);
        assert_eq!(dataset.field_lengths("seq_len")?, vec![7, 0]);
        assert_eq!(dataset.field_lengths("meta")?, vec![1, 0]);
        Ok(())
    }

    #[test]
    fn rejects_unusable_fields() {
        let dataset = InMemoryDataset::new(vec![
            json!({"n": 1, "flag": true}),
            json!({"n": -4, "flag": false}),
        ]);
        let err = dataset.field_lengths("n").unwrap_err();
        assert!(err.to_string().contains("record 1"), "{err}");
        assert!(dataset.field_lengths("flag").is_err());
        assert!(dataset.field_lengths("absent").is_err());
        assert!(InMemoryDataset::new(vec![json!({"n": 2.5})])
            .field_lengths("n")
            .is_err());
    }

    #[test]
    fn length_source_resolves_both_ways() -> Result<()> {
        let dataset = records();
        assert_eq!(
            LengthSource::Explicit(vec![4, 4]).resolve(&dataset)?,
            vec![4, 4]
        );
        assert_eq!(
            LengthSource::Field("tokens".into()).resolve(&dataset)?,
            vec![3, 0]
        );
        Ok(())
    }
}
