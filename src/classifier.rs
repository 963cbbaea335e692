//! Retrieval-augmented classification of a single log message.
//!
//! One call walks `PROMPTING -> (RETRY)* -> PARSING -> VALIDATING -> DONE`; any
//! stage can end in a [`ClassificationError`]. Nothing escapes as a panic or as
//! a foreign error type.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedder::Embedder;
use crate::extract::extract_json;
use crate::llm::LlmProvider;
use crate::prompt::build_prompt;
use crate::retriever::{Retrieval, RetrievalError, Retriever};
use crate::retry::RetryError;
use crate::settings::ClassifierSettings;
use crate::store::KnowledgeStore;
use crate::taxonomy::{Field, SEVERITY_RANGE, UNKNOWN, UNKNOWN_SEVERITY};

/// Why a classification could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The language model failed permanently or retries ran out.
    GenerationFailed,
    /// The response contained nothing resembling a JSON object.
    NoJsonFound,
    /// The extracted text was not a valid JSON object.
    ParseError,
    /// Any other failure, e.g. retrieval.
    ProcessingError,
}

impl ErrorReason {
    /// Stable wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::GenerationFailed => "generation_failed",
            ErrorReason::NoJsonFound => "no_json_found",
            ErrorReason::ParseError => "parse_error",
            ErrorReason::ProcessingError => "processing_error",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned instead of a classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {detail}")]
pub struct ClassificationError {
    /// Failure category.
    pub reason: ErrorReason,
    /// Human-readable detail for logs.
    pub detail: String,
}

impl ClassificationError {
    fn new(reason: ErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl From<RetrievalError> for ClassificationError {
    fn from(err: RetrievalError) -> Self {
        ClassificationError::new(ErrorReason::ProcessingError, err.to_string())
    }
}

/// Taxonomy labels plus confidence scores for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
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
    /// Model-reported confidence; the combined confidence after a fallback.
    pub confidence: f64,
    /// Retrieval-derived confidence, rounded to 3 decimals.
    pub vector_confidence: f64,
    /// Mean of model and retrieval confidence, rounded to 3 decimals.
    pub combined_confidence: f64,
}

impl Classification {
    /// Whether the labels were replaced by the unknown fallback.
    pub fn is_fallback(&self) -> bool {
        self.event_class == UNKNOWN
    }

    fn apply_fallback(&mut self) {
        self.event_class = UNKNOWN.to_string();
        self.event_outcome = UNKNOWN.to_string();
        self.event_device_cat = UNKNOWN.to_string();
        self.event_operation = UNKNOWN.to_string();
        self.event_severity = UNKNOWN_SEVERITY;
        self.confidence = self.combined_confidence;
    }
}

/// Read-only state shared by every classification call.
pub struct ClassifierContext {
    store: KnowledgeStore,
    retriever: Retriever,
    llm: Arc<dyn LlmProvider>,
}

impl ClassifierContext {
    /// Bundles the knowledge store with the embedding and generation capabilities.
    pub fn new(
        store: KnowledgeStore,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            store,
            retriever: Retriever::new(embedder),
            llm,
        }
    }

    /// Retrieves the `k` statements closest to `query`.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval, RetrievalError> {
        self.retriever
            .retrieve(query, k, self.store.statements(), self.store.index())
    }
}

/// Classifies log messages against the knowledge store.
#[derive(Clone)]
pub struct Classifier {
    context: Arc<ClassifierContext>,
    settings: ClassifierSettings,
}

impl Classifier {
    /// Creates a classifier over a shared context.
    pub fn new(context: Arc<ClassifierContext>, settings: ClassifierSettings) -> Self {
        Self { context, settings }
    }

    /// Classifies one message.
    pub fn classify(&self, log_message: &str) -> Result<Classification, ClassificationError> {
        let retrieval = self.context.retrieve(log_message, self.settings.top_k())?;
        let prompt = build_prompt(&retrieval.contexts, log_message);
        debug!(stage = "prompting", context = retrieval.contexts.len(), "built prompt");

        let llm = &self.context.llm;
        let response = self
            .settings
            .retry()
            .run(|attempt| {
                debug!(stage = "generating", attempt, provider = llm.name(), "calling model");
                llm.generate(&prompt)
            })
            .map_err(|err: RetryError<_>| {
                warn!(error = %err, "generation failed");
                ClassificationError::new(ErrorReason::GenerationFailed, err.to_string())
            })?;

        self.interpret(&response, retrieval.vector_confidence)
    }

    /// Parses, validates, and scores a raw model response.
    pub fn interpret(
        &self,
        response: &str,
        vector_confidence: f64,
    ) -> Result<Classification, ClassificationError> {
        debug!(stage = "parsing", bytes = response.len(), "extracting json");
        let extracted = extract_json(response).ok_or_else(|| {
            ClassificationError::new(ErrorReason::NoJsonFound, preview(response))
        })?;
        let value: Value = serde_json::from_str(extracted.text)
            .map_err(|err| ClassificationError::new(ErrorReason::ParseError, err.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ClassificationError::new(
                ErrorReason::ParseError,
                "response JSON is not an object",
            ));
        };

        debug!(stage = "validating", source = ?extracted.source, "validating fields");
        let model_confidence = read_confidence(&object);
        let combined = (model_confidence + vector_confidence) / 2.0;
        let mut classification = Classification {
            event_class: read_label(&object, Field::Class),
            event_outcome: read_label(&object, Field::Outcome),
            event_severity: read_severity(&object),
            event_device_cat: read_label(&object, Field::DeviceCategory),
            event_operation: read_label(&object, Field::Operation),
            confidence: model_confidence,
            vector_confidence: round3(vector_confidence),
            combined_confidence: round3(combined),
        };
        if combined.is_nan() || combined < self.settings.fallback_threshold() {
            debug!(
                combined,
                threshold = self.settings.fallback_threshold(),
                "confidence below threshold; applying fallback"
            );
            classification.apply_fallback();
        }
        Ok(classification)
    }
}

/// Rounds half away from zero to 3 decimals.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn read_label(object: &Map<String, Value>, field: Field) -> String {
    let raw = match object.get(field.key()) {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim(),
        Some(Value::Null) | None => return UNKNOWN.to_string(),
        Some(other) => {
            warn!(field = field.key(), value = %other, "non-string label; using unknown");
            return UNKNOWN.to_string();
        }
    };
    match field.canonical(raw) {
        Some(canonical) => canonical.to_string(),
        None if raw.eq_ignore_ascii_case(UNKNOWN) => UNKNOWN.to_string(),
        None => {
            warn!(field = field.key(), value = raw, "label outside taxonomy");
            raw.to_string()
        }
    }
}

fn read_severity(object: &Map<String, Value>) -> u8 {
    let level = match object.get("eventSeverity") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    level
        .and_then(|level| u8::try_from(level).ok())
        .filter(|level| SEVERITY_RANGE.contains(level))
        .unwrap_or(UNKNOWN_SEVERITY)
}

fn read_confidence(object: &Map<String, Value>) -> f64 {
    let value = match object.get("confidence") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn preview(response: &str) -> String {
    const LIMIT: usize = 120;
    match response.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &response[..cut]),
        None => response.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ProviderError;
    use crate::index::FlatL2Index;
    use crate::knowledge::KnowledgeStatement;
    use crate::retry::RetryPolicy;
    use anyhow::Result;
    use std::sync::Mutex;
    use std::time::Duration;

    struct UnitEmbedder;

    impl Embedder for UnitEmbedder {
        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    struct Scripted {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, ProviderError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
        }
    }

    // One statement at distance 0 from every query, so vector confidence is 1.0.
    fn classifier(llm: Arc<Scripted>) -> Classifier {
        let store = KnowledgeStore::from_parts(
            vec![KnowledgeStatement {
                id: 0,
                text: "eventOperation 'Login' refers to user authentication.".into(),
            }],
            FlatL2Index::build(&[vec![0.0]]).unwrap(),
        )
        .unwrap();
        let context = ClassifierContext::new(store, Arc::new(UnitEmbedder), llm);
        Classifier::new(
            Arc::new(context),
            ClassifierSettings::new(5, 0.4, RetryPolicy::new(3, Duration::ZERO)),
        )
    }

    fn bare() -> Classifier {
        classifier(Arc::new(Scripted::new(Vec::new())))
    }

    #[test]
    fn well_formed_response_is_scored() {
        let reply = r#"```json
{"eventClass": "security", "eventOutcome": "Success", "eventSeverity": "2",
 "eventDeviceCat": "Workstation", "eventOperation": "Login", "confidence": 0.8, "extra": true}
```"#;
        let result = bare().interpret(reply, 0.6).expect("classified");
        assert_eq!(result.event_class, "Security");
        assert_eq!(result.event_severity, 2);
        assert_eq!(result.event_operation, "Login");
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.vector_confidence, 0.6);
        assert_eq!(result.combined_confidence, 0.7);
        assert!(!result.is_fallback());
    }

    #[test]
    fn low_combined_confidence_falls_back() {
        let reply = r#"{"eventClass": "Network", "eventOutcome": "Failure", "eventSeverity": 4,
            "eventDeviceCat": "Server", "eventOperation": "Scan", "confidence": 0.1}"#;
        let result = bare().interpret(reply, 0.3).expect("classified");
        assert_eq!(result.event_class, UNKNOWN);
        assert_eq!(result.event_outcome, UNKNOWN);
        assert_eq!(result.event_device_cat, UNKNOWN);
        assert_eq!(result.event_operation, UNKNOWN);
        assert_eq!(result.event_severity, 0);
        assert_eq!(result.combined_confidence, 0.2);
        assert_eq!(result.confidence, 0.2);
    }

    #[test]
    fn fallback_invariant_holds_across_confidences() {
        let classifier = bare();
        for model in 0..=10 {
            for vector in 0..=10 {
                let reply = format!(
                    r#"{{"eventClass":"System","eventSeverity":3,"confidence":{}}}"#,
                    model as f64 / 10.0
                );
                let result = classifier
                    .interpret(&reply, vector as f64 / 10.0)
                    .expect("classified");
                if result.combined_confidence < 0.4 {
                    assert_eq!(result.event_class, UNKNOWN);
                    assert_eq!(result.event_severity, 0);
                }
            }
        }
    }

    #[test]
    fn missing_confidence_defaults_to_zero() {
        let reply = r#"{"eventClass": "System", "confidence": "high"}"#;
        let result = bare().interpret(reply, 1.0).expect("classified");
        assert_eq!(result.combined_confidence, 0.5);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.event_outcome, UNKNOWN);
        assert_eq!(result.event_severity, 0);
    }

    #[test]
    fn out_of_range_values_are_normalised() {
        let reply = r#"{"eventClass": "Kernel", "eventSeverity": 9, "confidence": 3.5}"#;
        let result = bare().interpret(reply, 0.5).expect("classified");
        assert_eq!(result.event_class, "Kernel");
        assert_eq!(result.event_severity, 0);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.combined_confidence, 0.75);
    }

    #[test]
    fn unknown_labels_in_any_case_are_canonical_fallbacks() {
        let reply = r#"{"eventClass": "Unknown", "eventOutcome": "UNKNOWN", "eventSeverity": 2,
            "eventDeviceCat": "unknown", "eventOperation": " Unknown ", "confidence": 0.9}"#;
        let result = bare().interpret(reply, 1.0).expect("classified");
        assert_eq!(result.event_class, UNKNOWN);
        assert_eq!(result.event_outcome, UNKNOWN);
        assert_eq!(result.event_device_cat, UNKNOWN);
        assert_eq!(result.event_operation, UNKNOWN);
        assert!(result.is_fallback());
        assert_eq!(result.combined_confidence, 0.95);
    }

    #[test]
    fn nan_vector_confidence_falls_back() {
        let reply = r#"{"eventClass": "System", "eventSeverity": 3, "confidence": 0.9}"#;
        let result = bare().interpret(reply, f64::NAN).expect("classified");
        assert!(result.is_fallback());
        assert_eq!(result.event_severity, 0);
    }

    #[test]
    fn non_json_reply_is_no_json_found() {
        let err = bare().interpret("not json at all", 1.0).expect_err("no json");
        assert_eq!(err.reason, ErrorReason::NoJsonFound);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = bare()
            .interpret("{\"eventClass\": System}", 1.0)
            .expect_err("malformed");
        assert_eq!(err.reason, ErrorReason::ParseError);
    }

    #[test]
    fn transient_failures_are_retried() {
        let llm = Arc::new(Scripted::new(vec![
            Err(ProviderError::RateLimited {
                status: 429,
                body: "quota".into(),
            }),
            Ok(r#"{"eventClass":"System","eventOutcome":"Information","eventSeverity":1,
                "eventDeviceCat":"Server","eventOperation":"Start","confidence":0.9}"#
                .into()),
        ]));
        let result = classifier(Arc::clone(&llm))
            .classify("Service started")
            .expect("classified");
        assert_eq!(llm.calls(), 2);
        assert_eq!(result.event_operation, "Start");
        assert_eq!(result.vector_confidence, 1.0);
        assert_eq!(result.combined_confidence, 0.95);
    }

    #[test]
    fn exhausted_retries_are_generation_failed() {
        let timeouts = (0..5)
            .map(|_| Err(ProviderError::Timeout("deadline".into())))
            .collect();
        let llm = Arc::new(Scripted::new(timeouts));
        let err = classifier(Arc::clone(&llm))
            .classify("anything")
            .expect_err("exhausted");
        assert_eq!(err.reason, ErrorReason::GenerationFailed);
        assert_eq!(llm.calls(), 3);
    }

    #[test]
    fn fatal_provider_error_is_not_retried() {
        let llm = Arc::new(Scripted::new(vec![Err(ProviderError::Rejected {
            status: 401,
            body: "bad key".into(),
        })]));
        let err = classifier(Arc::clone(&llm))
            .classify("anything")
            .expect_err("fatal");
        assert_eq!(err.reason, ErrorReason::GenerationFailed);
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn retrieval_failure_is_processing_error() {
        struct Broken;
        impl Embedder for Broken {
            fn encode(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
                anyhow::bail!("model offline")
            }
        }
        let store = KnowledgeStore::from_parts(
            vec![KnowledgeStatement {
                id: 0,
                text: "x".into(),
            }],
            FlatL2Index::build(&[vec![0.0]]).unwrap(),
        )
        .unwrap();
        let llm = Arc::new(Scripted::new(Vec::new()));
        let context = ClassifierContext::new(store, Arc::new(Broken), llm.clone());
        let err = Classifier::new(Arc::new(context), ClassifierSettings::default())
            .classify("anything")
            .expect_err("processing");
        assert_eq!(err.reason, ErrorReason::ProcessingError);
        assert!(err.detail.contains("model offline"));
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn round3_matches_reported_precision() {
        assert_eq!(round3(0.66666), 0.667);
        assert_eq!(round3(0.4), 0.4);
        assert_eq!(round3(0.0), 0.0);
    }
}
