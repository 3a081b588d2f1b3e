//! AI service boundary
//!
//! Summarization and classification are opaque remote calls behind the
//! [`AiAdapter`] trait. [`AdapterRunner`] adds what the pipeline needs around
//! them: hard per-call timeout, bounded retries for transient failures,
//! bounded concurrency and cancellation.

pub mod http;
pub mod runner;

pub use http::HttpAdapter;
pub use runner::{
    AdapterRunner, Classification, ClassifiedRecord, ClassifyReport, GroupSummary, RetryPolicy,
    SummaryOutcome, SummaryReport,
};

use async_trait::async_trait;
use thiserror::Error;

/// Label recorded when no label from the set could be obtained
pub const UNCLASSIFIED: &str = "unclassified";

/// Marker recorded when a summary could not be obtained
pub const SUMMARY_UNAVAILABLE: &str = "summary_unavailable";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Timeout, throttling, or a 5xx: worth retrying
    #[error("Transient adapter failure: {0}")]
    Transient(String),

    /// The request itself is unacceptable: never retried
    #[error("Adapter rejected request: {0}")]
    Permanent(String),

    #[error("Adapter call cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Remote summarize/classify service
#[async_trait]
pub trait AiAdapter: Send + Sync {
    /// Summarize a batch of descriptive text lines
    async fn summarize(&self, texts: &[String]) -> Result<String, AdapterError>;

    /// Pick a label for `text`. The answer is free text; callers map it onto
    /// the label set.
    async fn classify(&self, text: &str, labels: &[String]) -> Result<String, AdapterError>;
}

/// Non-empty, de-duplicated label vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() || unique.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                continue;
            }
            unique.push(label.to_string());
        }

        if unique.is_empty() {
            return Err(AdapterError::permanent("label set must not be empty"));
        }
        Ok(Self { labels: unique })
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    /// Map an adapter answer onto the vocabulary, ignoring case and padding
    pub fn resolve(&self, answer: &str) -> Option<&str> {
        let answer = answer.trim();
        self.labels
            .iter()
            .find(|label| label.eq_ignore_ascii_case(answer))
            .map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_rejects_empty() {
        assert!(matches!(
            LabelSet::new(Vec::<String>::new()),
            Err(AdapterError::Permanent(_))
        ));
        assert!(LabelSet::new(["  ", ""]).is_err());
    }

    #[test]
    fn test_label_set_dedups_and_resolves() {
        let labels = LabelSet::new(["error", "Warning", "ERROR", " info "]).unwrap();
        assert_eq!(labels.as_slice(), &["error", "Warning", "info"]);
        assert_eq!(labels.resolve("  WARNING\n"), Some("Warning"));
        assert_eq!(labels.resolve("info"), Some("info"));
        assert_eq!(labels.resolve("debug"), None);
    }

    #[test]
    fn test_error_kinds() {
        assert!(AdapterError::transient("503").is_transient());
        assert!(!AdapterError::permanent("400").is_transient());
        assert!(!AdapterError::Cancelled.is_transient());
    }
}
