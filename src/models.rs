//! Core data models used throughout the relay.
//!
//! These types represent the notes, their change state, and the outcomes
//! that flow from ingestion through the ledger to each consumer.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frontmatter::Header;

/// A capture note read from disk. Rebuilt fresh on every ingestion pass.
#[derive(Debug, Clone)]
pub struct Record {
    /// Absolute path; the record's identity across runs.
    pub path: PathBuf,
    pub header: Header,
    pub body: String,
    pub raw: String,
    /// SHA-256 of `raw`, lowercase hex.
    pub fingerprint: String,
}

impl Record {
    /// Path string used as the ledger key.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Header `tags` as strings. A scalar becomes a one-element list.
    pub fn tags(&self) -> Vec<String> {
        match self.header.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter(|v| !v.is_null())
                .map(value_to_string)
                .collect(),
            Some(other) => vec![value_to_string(other)],
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = tag.to_lowercase();
        self.tags().iter().any(|t| t.to_lowercase() == wanted)
    }

    pub fn title(&self) -> Option<String> {
        self.header_str("title")
    }

    /// Header value rendered as a trimmed string, if present and non-empty.
    pub fn header_str(&self, key: &str) -> Option<String> {
        match self.header.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => {
                let s = value_to_string(value);
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
        }
    }
}

/// Render a header value without JSON quoting for strings.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How a record changed since the previous run.
#[derive(Debug, Clone)]
pub struct ChangeState {
    pub record: Record,
    /// Fingerprint stored before this run, `None` if never seen.
    pub previous: Option<String>,
}

impl ChangeState {
    pub fn is_new(&self) -> bool {
        self.previous.is_none()
    }

    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.record.fingerprint.as_str())
    }
}

/// Outcome status of one (consumer, record) dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionStatus {
    Success,
    Skip,
    Error,
    Limit,
}

impl EmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skip => "skip",
            Self::Error => "error",
            Self::Limit => "limit",
        }
    }

    /// Success and skip settle the record for the consumer; limit and error
    /// leave it pending so the next run retries.
    pub fn settles(&self) -> bool {
        matches!(self, Self::Success | Self::Skip)
    }
}

impl fmt::Display for EmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmissionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "skip" => Ok(Self::Skip),
            "error" => Ok(Self::Error),
            "limit" => Ok(Self::Limit),
            other => anyhow::bail!("unknown emission status: '{}'", other),
        }
    }
}

/// What a consumer reports for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOutcome {
    pub status: EmissionStatus,
    pub message: String,
    pub metadata: Value,
}

impl ConsumerOutcome {
    pub fn new(status: EmissionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(EmissionStatus::Success, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(EmissionStatus::Skip, message)
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(EmissionStatus::Limit, message)
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Ledger row for a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEntry {
    pub path: String,
    pub fingerprint: String,
    pub header_json: String,
    pub seen_at: i64,
}

/// Ledger row for a (consumer, record) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionEntry {
    pub consumer: String,
    pub path: String,
    pub fingerprint: String,
    pub status: EmissionStatus,
    pub emitted_at: i64,
    pub metadata: Option<Value>,
}
