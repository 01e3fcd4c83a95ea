//! Label Sets
//!
//! The raw text of a label file and the comparisons the watcher makes on it.

use std::path::Path;

/// Label token the controller always reports and which is never removed
pub const SENTINEL_LABEL: &str = "swarm";

/// Whitespace-delimited label text as read from the label file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    text: String,
}

impl LabelSet {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read the whole label file
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self { text })
    }

    /// Synchronous variant used at construction time
    pub fn read_blocking(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Individual labels in file order
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }

    /// Case-insensitive comparison of the full text.
    ///
    /// Reordering labels or changing the whitespace between them counts as
    /// a change.
    pub fn matches(&self, other: &LabelSet) -> bool {
        self.text
            .chars()
            .flat_map(char::to_lowercase)
            .eq(other.text.chars().flat_map(char::to_lowercase))
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Labels the controller reports for this agent, minus the sentinel
pub fn removable_labels(controller_labels: &str) -> Vec<&str> {
    controller_labels
        .split_whitespace()
        .filter(|label| *label != SENTINEL_LABEL)
        .collect()
}
