//! Sequential, paced, cancellable classification of a bounded message batch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{Classification, ClassificationError, Classifier};
use crate::settings::BatchSettings;
use crate::taxonomy::{UNKNOWN, UNKNOWN_SEVERITY};

/// Identifier attached to a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    /// 1-based position in the input.
    Position(usize),
    /// Identifier supplied by the input source.
    Supplied(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Position(position) => write!(f, "{position}"),
            EventId::Supplied(id) => f.write_str(id),
        }
    }
}

/// One message handed to the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInput {
    /// Identifier from the source, if any.
    pub event_id: Option<String>,
    /// Raw log message.
    pub message: String,
}

impl LogInput {
    /// Message without a source identifier.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            event_id: None,
            message: message.into(),
        }
    }
}

/// Output row: a flattened classification plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Source identifier or 1-based position.
    pub event_id: EventId,
    /// Event class label.
    #[serde(rename = "eventClass")]
    pub event_class: String,
    /// Outcome label.
    #[serde(rename = "eventOutcome")]
    pub event_outcome: String,
    /// Severity 1-5, or 0 when unknown.
    #[serde(rename = "eventSeverity")]
    pub event_severity: u8,
    /// Device category label.
    #[serde(rename = "eventDeviceCat")]
    pub event_device_cat: String,
    /// Operation label.
    #[serde(rename = "eventOperation")]
    pub event_operation: String,
    /// Model-reported (or, after fallback, combined) confidence.
    pub confidence: f64,
    /// Retrieval-derived confidence.
    pub vector_confidence: f64,
    /// Blended confidence.
    pub combined_confidence: f64,
    /// `true` whenever `eventClass` is `"unknown"`.
    #[serde(rename = "fallbackApplied")]
    pub fallback_applied: bool,
}

impl ResultRecord {
    /// Flattens a successful classification.
    pub fn from_classification(event_id: EventId, classification: Classification) -> Self {
        let fallback_applied = classification.is_fallback();
        Self {
            event_id,
            event_class: classification.event_class,
            event_outcome: classification.event_outcome,
            event_severity: classification.event_severity,
            event_device_cat: classification.event_device_cat,
            event_operation: classification.event_operation,
            confidence: classification.confidence,
            vector_confidence: classification.vector_confidence,
            combined_confidence: classification.combined_confidence,
            fallback_applied,
        }
    }

    /// Zero-confidence fallback row for a failed classification.
    pub fn unknown(event_id: EventId) -> Self {
        Self {
            event_id,
            event_class: UNKNOWN.to_string(),
            event_outcome: UNKNOWN.to_string(),
            event_severity: UNKNOWN_SEVERITY,
            event_device_cat: UNKNOWN.to_string(),
            event_operation: UNKNOWN.to_string(),
            confidence: 0.0,
            vector_confidence: 0.0,
            combined_confidence: 0.0,
            fallback_applied: true,
        }
    }
}

/// Shared flag that stops a batch between messages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, un-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the current message finishes first.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Records produced by a run plus summary counters.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// One record per processed message, in input order.
    pub records: Vec<ResultRecord>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
    /// Messages whose classification returned an error.
    pub errors: usize,
}

impl BatchOutcome {
    /// Records flagged as fallbacks (errors included).
    pub fn fallbacks(&self) -> usize {
        self.records.iter().filter(|r| r.fallback_applied).count()
    }
}

/// Drives a [`Classifier`] over an ordered batch.
pub struct BatchRunner {
    classifier: Classifier,
    settings: BatchSettings,
    cancel: CancelFlag,
}

impl BatchRunner {
    /// Creates a runner with its own cancellation flag.
    pub fn new(classifier: Classifier, settings: BatchSettings) -> Self {
        Self {
            classifier,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    /// Replaces the cancellation flag, e.g. with one wired to a signal handler.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Classifies at most `limit` inputs in order. Never aborts on a single
    /// message; a cancelled run returns the records collected so far.
    pub fn run(&self, inputs: &[LogInput], limit: usize) -> BatchOutcome {
        let total = inputs.len().min(limit);
        let mut records = Vec::with_capacity(total);
        let mut errors = 0usize;
        let mut cancelled = false;
        let mut last_call: Option<Instant> = None;

        for (position, input) in inputs.iter().take(limit).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(processed = records.len(), total, "batch cancelled");
                cancelled = true;
                break;
            }
            if let Some(last) = last_call {
                let elapsed = last.elapsed();
                if elapsed < self.settings.pacing() {
                    thread::sleep(self.settings.pacing() - elapsed);
                }
            }
            last_call = Some(Instant::now());

            let event_id = match &input.event_id {
                Some(id) => EventId::Supplied(id.clone()),
                None => EventId::Position(position + 1),
            };
            let record = match self.classifier.classify(&input.message) {
                Ok(classification) => ResultRecord::from_classification(event_id, classification),
                Err(ClassificationError { reason, detail }) => {
                    errors += 1;
                    warn!(%event_id, %reason, %detail, "classification failed; recording fallback");
                    ResultRecord::unknown(event_id)
                }
            };
            debug!(
                event_id = %record.event_id,
                class = %record.event_class,
                combined = record.combined_confidence,
                fallback = record.fallback_applied,
                "classified message"
            );
            records.push(record);
        }

        let outcome = BatchOutcome {
            records,
            cancelled,
            errors,
        };
        info!(
            processed = outcome.records.len(),
            fallbacks = outcome.fallbacks(),
            errors = outcome.errors,
            cancelled = outcome.cancelled,
            "batch finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_ids_serialize_untagged() {
        let json = serde_json::to_string(&[EventId::Position(3), EventId::Supplied("4624".into())])
            .expect("encode");
        assert_eq!(json, r#"[3,"4624"]"#);
    }

    #[test]
    fn unknown_record_is_flagged() {
        let record = ResultRecord::unknown(EventId::Position(1));
        assert!(record.fallback_applied);
        assert_eq!(record.event_severity, 0);
        let json = serde_json::to_value(&record).expect("encode");
        assert_eq!(json["eventClass"], "unknown");
        assert_eq!(json["fallbackApplied"], true);
        assert_eq!(json["event_id"], 1);
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
