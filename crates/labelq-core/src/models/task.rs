//! Task, label type, status, and extracted field models.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Literal the extraction service returns for fields absent from a label.
pub const NOT_FOUND: &str = "Not found";

/// Store-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a label document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    /// Outbound shipping label.
    Shipping,
    /// Return label.
    Return,
    /// Product information label.
    Product,
}

impl LabelType {
    /// All label types, in routing order.
    pub const ALL: [LabelType; 3] = [LabelType::Shipping, LabelType::Return, LabelType::Product];

    /// Lowercase name, also used as the broker routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelType::Shipping => "shipping",
            LabelType::Return => "return",
            LabelType::Product => "product",
        }
    }

    /// Field names the extraction service is asked for.
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            LabelType::Shipping => &[
                "tracking_number",
                "order_id",
                "sender_address",
                "recipient_address",
                "delivery_date",
            ],
            LabelType::Return => &["return_id", "order_id", "return_reason", "return_date"],
            LabelType::Product => &[
                "product_name",
                "product_code",
                "manufacturer",
                "manufacture_date",
            ],
        }
    }

    /// Name of the durable broker queue for this label type.
    pub fn queue_name(&self) -> String {
        format!("{}_queue", self.as_str())
    }
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shipping" => Ok(LabelType::Shipping),
            "return" => Ok(LabelType::Return),
            "product" => Ok(LabelType::Product),
            other => Err(format!("unknown label type: {other}")),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Fields extracted.
    Done,
    /// Readable document, but no usable fields.
    Failed,
    /// Unreadable document.
    Error,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Error => "error",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Error)
    }

    /// Whether the worker lifecycle allows `self -> next`.
    ///
    /// Lease recovery (`processing -> pending`) is not a worker transition and
    /// is handled by the store's sweeper.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Processing) => true,
            (TaskStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

/// One document moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub document_path: PathBuf,
    pub label_type: LabelType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Store claim this copy was handed out under; 0 outside the task store.
    #[serde(default)]
    pub claim: u32,
}

/// Field name to value mapping produced by the extraction service.
///
/// Values are strings; absent fields carry [`NOT_FOUND`]. Keys keep the
/// order the service returned them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedFields(IndexMap<String, String>);

impl ExtractedFields {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Whether the service reported this field as present.
    pub fn is_found(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| !v.trim().eq_ignore_ascii_case(NOT_FOUND))
            .unwrap_or(false)
    }

    /// Expected fields for `label_type` that the response did not include at all.
    pub fn missing_keys(&self, label_type: LabelType) -> Vec<&'static str> {
        label_type
            .field_names()
            .iter()
            .copied()
            .filter(|name| !self.0.contains_key(*name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ExtractedFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Broker message announcing a new document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<LabelType>,
}

impl QueueMessage {
    pub fn new(file_path: impl Into<String>, label_type: LabelType) -> Self {
        Self {
            file_path: file_path.into(),
            label_type: Some(label_type),
        }
    }
}
