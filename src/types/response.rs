use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::BackendFailure;

/// Incremental events; consumed once, not restartable.
pub type EventStream = BoxStream<'static, Result<Event, BackendFailure>>;

/// What a capability returns for one invocation.
pub enum Response {
    Text(String),
    EventList(Vec<Event>),
    EventStream(EventStream),
}

impl Response {
    pub fn shape(&self) -> &'static str {
        match self {
            Response::Text(_) => "text",
            Response::EventList(_) => "event_list",
            Response::EventStream(_) => "event_stream",
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Response::EventList(events) => f.debug_tuple("EventList").field(events).finish(),
            Response::EventStream(_) => f.write_str("EventStream(..)"),
        }
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::Text(text)
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Response::Text(text.to_string())
    }
}

/// One event produced by the capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    // Anything else the backend attached, kept for mapping-style extraction.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// An event whose content is a single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content {
                role: None,
                parts: vec![Part::text(text)],
            }),
            ..Self::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}
