//! Brace-balanced scanner for JSON object literals embedded in markup.
//!
//! Pages ship their product state as inline JSON inside `<script>` tags,
//! attribute values and framework bootstrap blobs. Rather than parsing the
//! surrounding markup, the scanner walks the raw text, cuts out every
//! depth-balanced `{...}` span and hands it to `serde_json`.
//!
//! Each byte is visited once: after a span closes, scanning resumes right
//! behind it whether or not the span parsed. Objects nested inside a span
//! that fails to parse are therefore never retried on their own.

use std::ops::Range;

use serde_json::{Map, Value};
use thiserror::Error;

/// A JSON object recovered from the text, with the byte range it came from.
#[derive(Debug, Clone)]
pub struct CandidateObject {
    pub span: Range<usize>,
    pub fields: Map<String, Value>,
}

/// A balanced span that is not strict JSON (JS object literals, template
/// fragments, trailing commas...).
#[derive(Debug, Error)]
#[error("malformed JSON span at {}..{}: {error}", span.start, span.end)]
pub struct MalformedSpan {
    pub span: Range<usize>,
    #[source]
    pub error: serde_json::Error,
}

pub type ScanOutcome = Result<CandidateObject, MalformedSpan>;

/// Lazy left-to-right scan. Restart by building a new scanner over the same
/// text.
pub struct JsonScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> JsonScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        JsonScanner { text, pos: 0 }
    }

    /// Parsed objects only; malformed spans are dropped.
    pub fn objects(self) -> impl Iterator<Item = CandidateObject> + 'a {
        self.filter_map(Result::ok)
    }
}

impl Iterator for JsonScanner<'_> {
    type Item = ScanOutcome;

    fn next(&mut self) -> Option<ScanOutcome> {
        let bytes = self.text.as_bytes();
        loop {
            let offset = bytes[self.pos..].iter().position(|&b| b == b'{')?;
            let start = self.pos + offset;

            let Some(end) = balanced_end(bytes, start) else {
                // Unterminated: nothing after `start` can close at depth zero.
                self.pos = bytes.len();
                return None;
            };
            self.pos = end;

            // `{`, `}`, `"` and `\` are ASCII, so both ends sit on char boundaries.
            let raw = &self.text[start..end];
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(fields)) => {
                    return Some(Ok(CandidateObject {
                        span: start..end,
                        fields,
                    }))
                }
                Ok(_) => continue,
                Err(error) => {
                    return Some(Err(MalformedSpan {
                        span: start..end,
                        error,
                    }))
                }
            }
        }
    }
}

/// Index one past the `}` that brings depth back to zero, starting from the
/// `{` at `start`. A backslash escapes the next byte; quotes toggle string
/// mode unless escaped; braces only count outside strings.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Running totals for one scan, reported in the run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounts {
    pub objects: usize,
    pub malformed: usize,
}

impl ScanCounts {
    pub fn record(&mut self, outcome: &ScanOutcome) {
        match outcome {
            Ok(_) => self.objects += 1,
            Err(_) => self.malformed += 1,
        }
    }
}
