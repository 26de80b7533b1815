use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of whoever published an event (a connection, or a component).
pub type SourceId = uuid::Uuid;

/// A transient message travelling over the bus.
///
/// `kind` is a colon-delimited hierarchical tag such as `files:file:opened`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceId>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            source: None,
            data,
        }
    }

    /// Tag the event with the identity of its publisher.
    pub fn from_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Decode the payload into a typed request.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// True if `kind` equals `prefix` or continues it at a `:` boundary.
    pub fn is_within(&self, prefix: &str) -> bool {
        match self.kind.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(':') || prefix.ends_with(':'),
            None => false,
        }
    }
}
