//! Label Batching
//!
//! Accumulates labels into request-sized chunks so the controller is not
//! sent one request per label nor one unbounded request.

/// Default buffer size past which a batch is flushed
pub const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Default separator appended after every label
pub const DEFAULT_SEPARATOR: &str = " ";

/// Builds label batches.
///
/// Every label is appended followed by the separator. Once the buffer grows
/// past `limit` characters it is handed back as a complete batch.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    limit: usize,
    separator: String,
    buffer: String,
}

impl BatchBuilder {
    pub fn new(limit: usize, separator: &str) -> Self {
        Self {
            limit,
            separator: separator.to_string(),
            buffer: String::new(),
        }
    }

    /// Append a label, returning a batch when the limit has been exceeded
    pub fn push(&mut self, label: &str) -> Option<String> {
        self.buffer.push_str(label);
        self.buffer.push_str(&self.separator);
        if self.buffer.chars().count() > self.limit {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Take whatever is left over
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    /// Split all labels into batches in order
    pub fn batches<'a, I>(mut self, labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut batches: Vec<String> = labels
            .into_iter()
            .filter_map(|label| self.push(label))
            .collect();
        batches.extend(self.finish());
        batches
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_LIMIT, DEFAULT_SEPARATOR)
    }
}
