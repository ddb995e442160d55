//! Conversion of capability responses into bounded plain text.
//!
//! Every entry point is total: extraction problems come back as an
//! `<extract error: ...>` marker string, never as an error.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::Event;

pub const DEFAULT_DUMP_LIMIT: usize = 1000;

/// Keys checked, in order, when a mapping is normalized.
pub const TEXT_KEYS: [&str; 4] = ["text", "content", "message", "output"];

#[derive(Debug, Error)]
enum NormalizationError {
    #[error("{0}")]
    Serialize(#[from] serde_json::Error),
}

/// Turns any response shape into text.
///
/// Only the fallback dump of an unrecognized shape is always bounded, by
/// `dump_limit`. Model text, whether plain or pulled out of a mapping or event,
/// is kept whole by default. Set `text_limit` (`text_limit` in the config file)
/// to cap it as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseNormalizer {
    /// Cap for fallback dumps of unrecognized shapes.
    pub dump_limit: usize,
    /// Optional cap for extracted text. `None` leaves model text untouched.
    pub text_limit: Option<usize>,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self {
            dump_limit: DEFAULT_DUMP_LIMIT,
            text_limit: None,
        }
    }
}

impl ResponseNormalizer {
    pub fn new(dump_limit: usize, text_limit: Option<usize>) -> Self {
        Self {
            dump_limit,
            text_limit,
        }
    }

    /// Plain text is returned as is, subject only to `text_limit`.
    pub fn normalize_text(&self, text: &str) -> String {
        match self.text_limit {
            Some(limit) => truncate_chars(text, limit),
            None => text.to_string(),
        }
    }

    /// Normalize an arbitrary JSON value.
    pub fn normalize_value(&self, value: &Value) -> String {
        match value {
            Value::String(text) => self.normalize_text(text),
            Value::Object(map) => match self.extract_field(map) {
                Some(Ok(text)) => text,
                Some(Err(e)) => extract_error(&e),
                None => self.dump(value),
            },
            _ => self.dump(value),
        }
    }

    /// Normalize a typed event: first content part, then loose fields, then a dump.
    pub fn normalize_event(&self, event: &Event) -> String {
        if let Some(text) = event
            .content
            .as_ref()
            .and_then(|content| content.parts.first())
            .and_then(|part| part.text.as_deref())
        {
            return self.normalize_text(text);
        }

        match self.extract_field(&event.fields) {
            Some(Ok(text)) => text,
            Some(Err(e)) => extract_error(&e),
            None => self.dump(event),
        }
    }

    fn extract_field(&self, map: &Map<String, Value>) -> Option<Result<String, NormalizationError>> {
        let value = TEXT_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find(|value| is_present(value))?;

        Some(self.field_text(value))
    }

    fn field_text(&self, value: &Value) -> Result<String, NormalizationError> {
        if let Value::String(text) = value {
            return Ok(self.normalize_text(text));
        }

        // A nested content structure: take its first text part.
        if let Some(text) = value
            .get("parts")
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
        {
            return Ok(self.normalize_text(text));
        }

        let rendered = serde_json::to_string(value)?;
        Ok(truncate_chars(&rendered, self.dump_limit))
    }

    fn dump<T: Serialize + ?Sized>(&self, value: &T) -> String {
        match serde_json::to_string(value) {
            Ok(rendered) => truncate_chars(&rendered, self.dump_limit),
            Err(e) => extract_error(&NormalizationError::from(e)),
        }
    }
}

/// Mapping fields count only when they carry something: no nulls, empty strings,
/// empty collections, `false` or zero.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn extract_error(err: &NormalizationError) -> String {
    format!("<extract error: {}>", err)
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
