//! Classification prompt rendering.

use crate::retriever::RetrievedContext;
use crate::taxonomy::{Field, SEVERITY_RANGE};

/// Keys the model must emit, in order.
pub const RESPONSE_KEYS: [&str; 6] = [
    "eventClass",
    "eventOutcome",
    "eventSeverity",
    "eventDeviceCat",
    "eventOperation",
    "confidence",
];

/// Renders ranked context as `"<rank>. <text>"` lines.
pub fn render_context(contexts: &[RetrievedContext]) -> String {
    let mut out = String::new();
    for context in contexts {
        out.push_str(&format!("{}. {}\n", context.rank, context.text.trim()));
    }
    out
}

/// Builds the single-turn prompt for one log message.
pub fn build_prompt(contexts: &[RetrievedContext], log_message: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a security log classification expert. Using the knowledge base excerpts and the log message below, classify the log.\n\n");
    prompt.push_str("Knowledge Base:\n");
    if contexts.is_empty() {
        prompt.push_str("(no relevant entries)\n");
    } else {
        prompt.push_str(&render_context(contexts));
    }
    prompt.push_str("\nLog Message: \"");
    prompt.push_str(log_message);
    prompt.push_str("\"\n\nFields:\n");
    for field in [Field::Class, Field::Outcome] {
        push_domain(&mut prompt, field);
    }
    prompt.push_str(&format!(
        "- eventSeverity is an integer from {} to {} (1=Informational, 5=Critical)\n",
        SEVERITY_RANGE.start(),
        SEVERITY_RANGE.end()
    ));
    for field in [Field::DeviceCategory, Field::Operation] {
        push_domain(&mut prompt, field);
    }
    prompt.push_str("- confidence is a number from 0.0 to 1.0 indicating your confidence in the classification\n\n");
    prompt.push_str("Respond with only a JSON object with exactly these keys: ");
    prompt.push_str(&RESPONSE_KEYS.join(", "));
    prompt.push_str(". Do not add any other text.\n");
    prompt
}

fn push_domain(prompt: &mut String, field: Field) {
    prompt.push_str(&format!(
        "- {} is one of: {}\n",
        field.key(),
        field.domain().join(", ")
    ));
}
