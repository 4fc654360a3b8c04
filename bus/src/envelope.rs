//! Message and envelope model carried by the bus.
//!
//! A [`Message`] is what a component hands to [`crate::EventBus::publish`].
//! The bus stamps it with an id and timestamp and delivers it to subscribers
//! as an [`Envelope`]. Field names on the wire follow the console's JSON
//! convention (`type`, `correlationId`, `isReply`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Suffix that marks a message type as a reply.
pub const REPLY_SUFFIX: &str = "/reply";

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a bus-local id of the form `<prefix>_<millis>_<seq>`.
#[must_use]
pub fn next_id(prefix: &str) -> String {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    format!("{prefix}_{}_{seq}", now_ms())
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

/// A named component on either end of a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub component: String,
}

impl Endpoint {
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into() }
    }
}

/// Envelope metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Milliseconds since the Unix epoch. Filled in by `publish` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Correlation id linking a request to its reply.
    #[serde(rename = "correlationId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Explicit reply marker for replies whose type does not end in `/reply`.
    #[serde(rename = "isReply", default, skip_serializing_if = "is_false")]
    pub is_reply: bool,
    /// Any other metadata the sender attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// A message before it is published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Endpoint>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub meta: Meta,
}

impl Message {
    /// Create a message of the given type with an empty object payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: None,
            target: None,
            payload: Value::Object(Map::new()),
            meta: Meta::default(),
        }
    }

    /// Set the sending component.
    #[must_use]
    pub fn from(mut self, component: impl Into<String>) -> Self {
        self.source = Some(Endpoint::new(component));
        self
    }

    /// Set the receiving component.
    #[must_use]
    pub fn to(mut self, component: impl Into<String>) -> Self {
        self.target = Some(Endpoint::new(component));
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an extra metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.extra.insert(key.into(), value);
        self
    }

    /// Build a reply to `request`.
    ///
    /// The reply carries the request's correlation id, is flagged as a reply,
    /// and is addressed back to the request's source component.
    pub fn reply_to(request: &Envelope, kind: impl Into<String>) -> Self {
        let mut reply = Self::new(kind);
        reply.target = request.source.clone();
        reply.meta.correlation_id = request.meta.correlation_id.clone();
        reply.meta.is_reply = true;
        reply
    }
}

/// A published message as seen by subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Endpoint>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub meta: Meta,
}

impl Envelope {
    /// Wrap a message with a fresh id, stamping the timestamp if missing.
    pub(crate) fn seal(message: Message) -> Self {
        let Message { kind, source, target, payload, mut meta } = message;
        if meta.timestamp.is_none() {
            meta.timestamp = Some(now_ms());
        }
        Self { id: next_id("evt"), kind, source, target, payload, meta }
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.meta.timestamp.unwrap_or_default()
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.meta.correlation_id.as_deref()
    }

    /// True when the type ends in `/reply` or the reply flag is set.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.kind.ends_with(REPLY_SUFFIX) || self.meta.is_reply
    }

    #[must_use]
    pub fn source_component(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.component.as_str())
    }

    #[must_use]
    pub fn target_component(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.component.as_str())
    }
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
