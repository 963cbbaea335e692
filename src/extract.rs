//! Locates the JSON object inside free-form model output.
//!
//! Two stages run in order: a fenced code block (```` ```json ... ``` ````), then
//! the first top-level `{...}` span in the raw text. Spans are found with a
//! brace-depth scan that skips braces inside string literals.

const FENCE: &str = "```";

/// Where the extracted text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSource {
    /// Body of a fenced code block.
    Fenced,
    /// Bare object span in the response text.
    Braces,
}

/// Candidate JSON text borrowed from the model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedJson<'a> {
    /// Text to hand to the JSON parser.
    pub text: &'a str,
    /// Stage that produced it.
    pub source: JsonSource,
}

/// Runs both extraction stages; `None` means no JSON-looking text exists.
pub fn extract_json(response: &str) -> Option<ExtractedJson<'_>> {
    if let Some(text) = fenced_block(response) {
        return Some(ExtractedJson {
            text,
            source: JsonSource::Fenced,
        });
    }
    object_span(response).map(|text| ExtractedJson {
        text,
        source: JsonSource::Braces,
    })
}

/// Returns the object inside the first fenced block tagged `json` (or untagged)
/// whose body starts with `{`.
pub fn fenced_block(response: &str) -> Option<&str> {
    let mut rest = response;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let close = after_open.find(FENCE)?;
        let block = &after_open[..close];
        rest = &after_open[close + FENCE.len()..];

        let (tag, body) = match block.find('\n') {
            Some(newline) => (block[..newline].trim(), &block[newline + 1..]),
            None => ("", block),
        };
        if !(tag.is_empty() || tag.eq_ignore_ascii_case("json")) {
            continue;
        }
        let body = body.trim();
        if body.starts_with('{') {
            return object_span(body);
        }
    }
    None
}

/// Returns the first top-level `{...}` span.
///
/// When the outermost object never closes (truncated output) the remainder from
/// the opening brace is returned so the parser reports it as malformed rather
/// than as missing.
pub fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_no_json() {
        assert_eq!(extract_json("not json at all"), None);
    }

    #[test]
    fn fenced_block_wins_over_earlier_braces() {
        let response = "Set {x} aside.\n```json\n{\"eventClass\": \"Security\"}\n```\ntrailing";
        assert_eq!(
            extract_json(response),
            Some(ExtractedJson {
                text: "{\"eventClass\": \"Security\"}",
                source: JsonSource::Fenced,
            })
        );
    }

    #[test]
    fn untagged_fence_is_accepted_and_other_languages_skipped() {
        let response = "```python\n{'a': 1}\n```\n```\n{\"a\": 2}\n```";
        assert_eq!(fenced_block(response), Some("{\"a\": 2}"));
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let response = r#"Result: {"note": "closing } and { inside", "nested": {"x": "\"}"}} done {"#;
        assert_eq!(
            object_span(response),
            Some(r#"{"note": "closing } and { inside", "nested": {"x": "\"}"}}"#)
        );
    }

    #[test]
    fn first_object_is_taken_not_greedy_span() {
        assert_eq!(object_span("{\"a\":1} and {\"b\":2}"), Some("{\"a\":1}"));
    }

    #[test]
    fn unterminated_object_returns_remainder() {
        assert_eq!(object_span("prefix {\"a\": {\"b\": 1}"), Some("{\"a\": {\"b\": 1}"));
    }
}
