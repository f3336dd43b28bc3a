//! Per-upload item metadata
//!
//! Built at upload time from the file's parsed name and the job config.

use crate::config::JobConfig;
use crate::item::filename::ParsedFilename;

/// Ordered metadata key/value pairs plus the derive flag
///
/// A key may repeat; the store client numbers repeated keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemMetadata {
    pairs: Vec<(String, String)>,
    derive: bool,
}

impl ItemMetadata {
    /// Metadata for one file of a job
    pub fn for_file(parsed: &ParsedFilename, job: &JobConfig) -> Self {
        let mut meta = Self {
            pairs: Vec::new(),
            derive: job.derive,
        };

        for (key, values) in &job.metadata {
            for value in values {
                meta.push(key, value);
            }
        }
        for collection in &job.collections {
            meta.push("collection", collection);
        }
        meta.push("crawler", parsed.crawler);
        meta.push("date", parsed.year());
        meta.push("description", &job.description);
        meta.push("operator", &job.operator);
        meta.push("title", &job.title_prefix);
        meta.push("scanner", &parsed.fqdn);

        meta
    }

    /// Append a pair; empty values are dropped
    pub fn push(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.pairs.push((key.to_string(), value.to_string()));
        }
    }

    /// All pairs in insertion order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Values recorded for a key, in order
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn derive(&self) -> bool {
        self.derive
    }
}
