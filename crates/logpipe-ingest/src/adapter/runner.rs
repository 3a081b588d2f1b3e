//! Bounded, retrying execution of adapter calls
//!
//! Every call runs under a hard timeout; an expired timeout is a transient
//! failure. Transient failures are retried with capped exponential backoff.
//! Scans run at most `concurrency` calls at a time and keep their input order.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AdapterError, AiAdapter, LabelSet, SUMMARY_UNAVAILABLE, UNCLASSIFIED};
use crate::config::AdapterConfig;
use crate::store::{CuratedRecord, GroupField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            call_timeout: config.call_timeout(),
            initial_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut call: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                result = tokio::time::timeout(self.call_timeout, call()) => result,
            };

            let error = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_transient() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => AdapterError::transient(format!(
                    "call timed out after {}ms",
                    self.call_timeout.as_millis()
                )),
            };

            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %error, "Adapter call failed, giving up");
                return Err(error);
            }

            let delay = self.backoff(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying adapter call");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}

/// Label outcome for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Classification {
    Label(String),
    /// Retries exhausted or the answer was outside the label set
    Unclassified,
    /// The adapter refused the request
    Rejected(String),
}

impl Classification {
    /// Label as stored or displayed
    pub fn label(&self) -> &str {
        match self {
            Classification::Label(label) => label,
            Classification::Unclassified | Classification::Rejected(_) => UNCLASSIFIED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub raw_record_id: i64,
    pub classification: Classification,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyReport {
    pub records: Vec<ClassifiedRecord>,
    pub labelled: usize,
    pub unclassified: usize,
    pub rejected: usize,
    pub cancelled: bool,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Summary(String),
    Unavailable,
    Rejected(String),
}

impl SummaryOutcome {
    pub fn text(&self) -> &str {
        match self {
            SummaryOutcome::Summary(text) => text,
            SummaryOutcome::Unavailable | SummaryOutcome::Rejected(_) => SUMMARY_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// `None` for the global batch
    pub field: Option<GroupField>,
    /// Group value; `None` collects records where the field is NULL
    pub key: Option<String>,
    pub record_count: usize,
    pub outcome: SummaryOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryReport {
    pub groups: Vec<GroupSummary>,
    pub unavailable: usize,
    pub rejected: usize,
    pub cancelled: bool,
    pub duration_seconds: f64,
}

pub struct AdapterRunner {
    adapter: Arc<dyn AiAdapter>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl AdapterRunner {
    pub fn new(adapter: Arc<dyn AiAdapter>, policy: RetryPolicy, concurrency: usize) -> Self {
        Self {
            adapter,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(adapter: Arc<dyn AiAdapter>, config: &AdapterConfig) -> Self {
        Self::new(adapter, RetryPolicy::from_config(config), config.concurrency)
    }

    /// Classify one text.
    ///
    /// Exhausted transient failures and off-vocabulary answers yield
    /// `unclassified`; permanent failures are returned.
    pub async fn classify_one(
        &self,
        text: &str,
        labels: &LabelSet,
        cancel: &CancellationToken,
    ) -> Result<String, AdapterError> {
        match self.classify_text(text, labels, cancel).await? {
            Classification::Rejected(reason) => Err(AdapterError::Permanent(reason)),
            other => Ok(other.label().to_string()),
        }
    }

    /// `Err` only for cancellation
    async fn classify_text(
        &self,
        text: &str,
        labels: &LabelSet,
        cancel: &CancellationToken,
    ) -> Result<Classification, AdapterError> {
        let answer = self
            .policy
            .run(cancel, || self.adapter.classify(text, labels.as_slice()))
            .await;

        match answer {
            Ok(answer) => Ok(match labels.resolve(&answer) {
                Some(label) => Classification::Label(label.to_string()),
                None => {
                    debug!(answer = %answer, "Adapter answer outside label set");
                    Classification::Unclassified
                },
            }),
            Err(AdapterError::Transient(_)) => Ok(Classification::Unclassified),
            Err(AdapterError::Permanent(reason)) => Ok(Classification::Rejected(reason)),
            Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
        }
    }

    /// Classify every record's descriptive text; results keep record order.
    ///
    /// Records not started before cancellation are left out of the report.
    pub async fn classify_scan(
        &self,
        records: &[CuratedRecord],
        labels: &LabelSet,
        cancel: &CancellationToken,
    ) -> ClassifyReport {
        let start = Instant::now();
        info!(
            records = records.len(),
            labels = labels.as_slice().len(),
            concurrency = self.concurrency,
            "Starting classify scan"
        );

        let results: Vec<Option<ClassifiedRecord>> = stream::iter(records)
            .map(|record| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let text = record.descriptive_text();
                let classification = self.classify_text(&text, labels, cancel).await.ok()?;
                Some(ClassifiedRecord {
                    raw_record_id: record.raw_record_id,
                    classification,
                })
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ClassifyReport::default();
        for result in results {
            let Some(classified) = result else {
                report.cancelled = true;
                continue;
            };
            match &classified.classification {
                Classification::Label(_) => report.labelled += 1,
                Classification::Unclassified => report.unclassified += 1,
                Classification::Rejected(reason) => {
                    warn!(raw_record_id = classified.raw_record_id, reason = %reason, "Classification rejected");
                    report.rejected += 1;
                },
            }
            report.records.push(classified);
        }

        report.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            labelled = report.labelled,
            unclassified = report.unclassified,
            rejected = report.rejected,
            cancelled = report.cancelled,
            "Classify scan complete in {:.2}s",
            report.duration_seconds
        );
        report
    }

    /// One summary over every record
    pub async fn summarize_all(
        &self,
        records: &[CuratedRecord],
        cancel: &CancellationToken,
    ) -> SummaryReport {
        let texts: Vec<String> = records.iter().map(CuratedRecord::descriptive_text).collect();
        self.summarize_batches(vec![(None, None, texts)], cancel).await
    }

    /// One summary per distinct value of `field`, in key order
    pub async fn summarize_groups(
        &self,
        records: &[CuratedRecord],
        field: GroupField,
        cancel: &CancellationToken,
    ) -> SummaryReport {
        let mut groups: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
        for record in records {
            groups
                .entry(field.value_of(&record.fields).map(str::to_string))
                .or_default()
                .push(record.descriptive_text());
        }

        let batches = groups
            .into_iter()
            .map(|(key, texts)| (Some(field), key, texts))
            .collect();
        self.summarize_batches(batches, cancel).await
    }

    async fn summarize_batches(
        &self,
        batches: Vec<(Option<GroupField>, Option<String>, Vec<String>)>,
        cancel: &CancellationToken,
    ) -> SummaryReport {
        let start = Instant::now();

        let results: Vec<Option<GroupSummary>> = stream::iter(batches)
            .filter(|(_, _, texts)| std::future::ready(!texts.is_empty()))
            .map(|(field, key, texts)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let outcome = match self
                    .policy
                    .run(cancel, || self.adapter.summarize(&texts))
                    .await
                {
                    Ok(summary) => SummaryOutcome::Summary(summary),
                    Err(AdapterError::Transient(_)) => SummaryOutcome::Unavailable,
                    Err(AdapterError::Permanent(reason)) => SummaryOutcome::Rejected(reason),
                    Err(AdapterError::Cancelled) => return None,
                };
                Some(GroupSummary {
                    field,
                    key,
                    record_count: texts.len(),
                    outcome,
                })
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = SummaryReport::default();
        for result in results {
            let Some(group) = result else {
                report.cancelled = true;
                continue;
            };
            match group.outcome {
                SummaryOutcome::Summary(_) => {},
                SummaryOutcome::Unavailable => report.unavailable += 1,
                SummaryOutcome::Rejected(_) => report.rejected += 1,
            }
            report.groups.push(group);
        }

        report.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            groups = report.groups.len(),
            unavailable = report.unavailable,
            rejected = report.rejected,
            "Summaries complete in {:.2}s",
            report.duration_seconds
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::CuratedFields;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers from the message text: "stall" never returns, "bad" is refused,
    /// "flaky" fails transiently once, anything else echoes the level.
    #[derive(Default)]
    struct ScriptedAdapter {
        calls: Mutex<HashMap<String, usize>>,
        summaries: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn calls_for(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(text, _)| text.contains(needle))
                .map(|(_, n)| *n)
                .sum()
        }
    }

    #[async_trait]
    impl AiAdapter for ScriptedAdapter {
        async fn summarize(&self, texts: &[String]) -> Result<String, AdapterError> {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("stall")) {
                std::future::pending::<()>().await;
            }
            Ok(format!("{} events", texts.len()))
        }

        async fn classify(&self, text: &str, _labels: &[String]) -> Result<String, AdapterError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(text.to_string()).or_insert(0);
                *count += 1;
                *count
            };

            if text.contains("stall") {
                std::future::pending::<()>().await;
            }
            if text.contains("bad") {
                return Err(AdapterError::permanent("400 Bad Request"));
            }
            if text.contains("flaky") && count == 1 {
                return Err(AdapterError::transient("503 Service Unavailable"));
            }
            if text.contains("chatty") {
                return Ok("I think this is probably fine".to_string());
            }
            Ok(if text.contains("/ERROR/") { " Error " } else { "ok" }.to_string())
        }
    }

    fn record(id: i64, level: &str, message: &str) -> CuratedRecord {
        CuratedRecord {
            id,
            raw_record_id: id,
            source_file_id: "a.jsonl".to_string(),
            position_in_file: id,
            fields: CuratedFields {
                service: Some("checkout".to_string()),
                level: Some(level.to_string()),
                event_type: Some("request".to_string()),
                message: Some(message.to_string()),
                ..CuratedFields::default()
            },
            curated_at: Utc::now(),
        }
    }

    fn runner(adapter: Arc<ScriptedAdapter>) -> AdapterRunner {
        let policy = RetryPolicy {
            max_attempts: 3,
            call_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };
        AdapterRunner::new(adapter, policy, 2)
    }

    fn labels() -> LabelSet {
        LabelSet::new(["error", "ok"]).unwrap()
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            call_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_yield_unclassified_others_labelled() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let runner = runner(adapter.clone());
        let records = vec![
            record(1, "ERROR", "disk full"),
            record(2, "INFO", "stall forever"),
            record(3, "INFO", "all good"),
        ];

        let report = runner
            .classify_scan(&records, &labels(), &CancellationToken::new())
            .await;

        let labels: Vec<&str> = report.records.iter().map(|r| r.classification.label()).collect();
        assert_eq!(labels, vec!["error", UNCLASSIFIED, "ok"]);
        assert_eq!(report.records[1].classification, Classification::Unclassified);
        assert_eq!(report.labelled, 2);
        assert_eq!(report.unclassified, 1);
        assert_eq!(adapter.calls_for("stall"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let runner = runner(adapter.clone());

        let label = runner
            .classify_one("[unknown time] flaky", &labels(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(label, "ok");
        assert_eq!(adapter.calls_for("flaky"), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let runner = runner(adapter.clone());
        let cancel = CancellationToken::new();

        let err = runner.classify_one("bad input", &labels(), &cancel).await.unwrap_err();
        assert!(matches!(err, AdapterError::Permanent(_)));
        assert_eq!(adapter.calls_for("bad"), 1);

        let report = runner
            .classify_scan(&[record(1, "INFO", "bad input")], &labels(), &cancel)
            .await;
        assert_eq!(report.rejected, 1);
        assert_eq!(report.records[0].classification.label(), UNCLASSIFIED);
    }

    #[tokio::test]
    async fn test_off_vocabulary_answer_is_unclassified() {
        let runner = runner(Arc::new(ScriptedAdapter::default()));
        let label = runner
            .classify_one("chatty record", &labels(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(label, UNCLASSIFIED);
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_partial() {
        let runner = runner(Arc::new(ScriptedAdapter::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = runner
            .classify_scan(&[record(1, "INFO", "a"), record(2, "INFO", "b")], &labels(), &cancel)
            .await;
        assert!(report.cancelled);
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_all_and_groups() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let runner = runner(adapter.clone());
        let cancel = CancellationToken::new();
        let records = vec![
            record(1, "ERROR", "disk full"),
            record(2, "INFO", "ok"),
            record(3, "INFO", "ok again"),
        ];

        let all = runner.summarize_all(&records, &cancel).await;
        assert_eq!(all.groups.len(), 1);
        assert_eq!(all.groups[0].field, None);
        assert_eq!(all.groups[0].outcome.text(), "3 events");

        let by_level = runner.summarize_groups(&records, GroupField::Level, &cancel).await;
        let keys: Vec<_> = by_level.groups.iter().map(|g| g.key.clone()).collect();
        assert_eq!(keys, vec![Some("ERROR".to_string()), Some("INFO".to_string())]);
        assert_eq!(by_level.groups[1].record_count, 2);
        assert_eq!(adapter.summaries.load(Ordering::SeqCst), 3);

        let empty = runner.summarize_all(&[], &cancel).await;
        assert!(empty.groups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_summary_is_unavailable() {
        let runner = runner(Arc::new(ScriptedAdapter::default()));
        let report = runner
            .summarize_all(&[record(1, "INFO", "stall")], &CancellationToken::new())
            .await;
        assert_eq!(report.unavailable, 1);
        assert_eq!(report.groups[0].outcome.text(), SUMMARY_UNAVAILABLE);
    }
}
