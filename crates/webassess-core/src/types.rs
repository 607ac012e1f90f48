use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Snapshot of one model as reported by the runtime's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    /// Token budget of the model, when the runtime reports one.
    #[serde(default)]
    pub context_window_size: Option<usize>,
}

impl ModelDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified_at: None,
            size: 0,
            context_window_size: None,
        }
    }
}

/// Models this tool may download on its own.
pub const ALLOWED_MODELS: &[&str] = &[
    "gemma:2b",
    "gemma:7b",
    "llama3.1:8b",
    "qwen2.5:0.5b",
    "qwen2.5:1b",
    "qwen2.5:3b",
    "qwen2.5:7b",
    "qwen2.5:14b",
    "mistral:7b",
    "mistral-nemo:12b",
    "dolphin-mistral:7b",
    "qwen2.5-coder:1.5b",
    "phi3:3.8b",
];

/// Immutable set of model names permitted for automatic download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    names: BTreeSet<String>,
}

impl AllowList {
    /// The compiled-in list.
    pub fn builtin() -> Self {
        Self::from_names(ALLOWED_MODELS.iter().copied())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One record of the runtime's model pull stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            digest: None,
            total: None,
            completed: None,
            error: None,
        }
    }

    /// Download progress as a percentage, when the record carries byte counts.
    pub fn percent(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Result envelope of one URL assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlReport {
    pub target: String,
    /// Synthesized model output; absent whenever any step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: i32,
}

impl UrlReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            output: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            status: 0,
        }
    }

    /// Records the first fatal error; partial output is discarded.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.output = None;
        self.errors.push(message.into());
        self.status = 1;
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == 0 && self.errors.is_empty()
    }
}
