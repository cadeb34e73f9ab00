//! One JSON line per tracing event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-contained log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Display name of the client that wrote the entry
    pub client: String,

    /// Module path of the event
    pub target: String,

    pub msg: String,

    /// Structured event fields (`op`, `queue_id`, `event_timestamp`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, outermost first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: impl Into<String>,
        client: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            client: client.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// A structured field rendered as text, if present.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = self.fields.as_ref()?.get(name)?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Entry counts per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelCounts {
    pub error: usize,
    pub warn: usize,
    pub info: usize,
    pub debug: usize,
    pub trace: usize,
}

impl LevelCounts {
    pub fn add(&mut self, level: &str) {
        match level {
            "error" => self.error += 1,
            "warn" => self.warn += 1,
            "info" => self.info += 1,
            "debug" => self.debug += 1,
            _ => self.trace += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.error + self.warn + self.info + self.debug + self.trace
    }
}
