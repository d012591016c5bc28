use crate::dataset::InMemoryDataset;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fs::File, io::BufRead, path::PathBuf};
use tracing::debug;

/// A line-by-line JSONL reader, typed (`T: DeserializeOwned`) or untyped
/// (`Value`).
///
/// # Examples
/// ```ignore
/// // Whole file as a dataset for length-aware sampling
/// let dataset = JsonlSource::new("train.jsonl").load_dataset()?;
/// let sampler = BucketedBatchSampler::from_dataset(
///     &dataset,
///     &LengthSource::Field("input_ids".into()),
///     32, 10, true, false, 42,
/// )?;
///
/// // Streaming typed records
/// #[derive(serde::Deserialize)]
/// struct Example { text: String }
/// for example in JsonlSource::new("train.jsonl").stream::<Example>()? {
///     println!("{}", example?.text);
/// }
/// ```
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// # Arguments
    /// - `path`: Accepts `String`, `&str`, or `PathBuf`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Streams lines as Rust types.
    ///
    /// # Errors
    /// - Fails if the file cannot be opened or any line is invalid JSON for `T`.
    /// - Includes line numbers in errors (e.g., "Invalid JSON at line 3").
    pub fn stream<T: DeserializeOwned>(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<T>> + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let reader = std::io::BufReader::new(file);

        let iter = reader.lines().enumerate().filter_map(|(line_num, line)| {
            let line = match line {
                Ok(l) if l.trim().is_empty() => return None, // Skip blanks
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            Some(
                serde_json::from_str::<T>(&line)
                    .with_context(|| format!("Invalid JSON at line {}", line_num + 1)),
            )
        });
        Ok(Box::new(iter))
    }

    /// Streams lines as `serde_json::Value`.
    pub fn stream_values(&self) -> Result<Box<dyn Iterator<Item = Result<Value>> + Send>> {
        self.stream()
    }

    /// Reads every record into an [`InMemoryDataset`].
    pub fn load_dataset(&self) -> Result<InMemoryDataset> {
        let records = self
            .stream_values()?
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to load dataset from {}", self.path.display()))?;
        debug!(path = %self.path.display(), records = records.len(), "Loaded JSONL dataset");
        Ok(InMemoryDataset::new(records))
    }
}
