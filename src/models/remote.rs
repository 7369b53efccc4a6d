//! Shapes returned by the Data Director REST API.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Reference to another resource, as found in collection listings.
#[derive(Deserialize, Clone, Debug)]
pub struct Link {
    pub href: String,
}

/// A named entity (org, database group, template) returned by a lookup.
#[derive(Deserialize, Clone, Debug)]
pub struct NamedEntity {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// A database as reported by the backend.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteDatabase {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub status: DatabaseStatus,
}

/// Operational status of a backend database.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum DatabaseStatus {
    Running,
    Provisioning,
    Stopped,
    #[default]
    Unknown,
    /// Anything else the backend reports, kept verbatim.
    Other(String),
}

impl From<&str> for DatabaseStatus {
    fn from(value: &str) -> Self {
        match value {
            "RUNNING" => DatabaseStatus::Running,
            "PROVISIONING" => DatabaseStatus::Provisioning,
            "STOPPED" => DatabaseStatus::Stopped,
            "" => DatabaseStatus::Unknown,
            other => DatabaseStatus::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for DatabaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(DatabaseStatus::from).unwrap_or_default())
    }
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseStatus::Running => f.write_str("RUNNING"),
            DatabaseStatus::Provisioning => f.write_str("PROVISIONING"),
            DatabaseStatus::Stopped => f.write_str("STOPPED"),
            DatabaseStatus::Unknown => f.write_str("UNKNOWN"),
            DatabaseStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Status of a backend asynchronous task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Reverting,
    /// Stalled on an error; the backend waits for the task to be cancelled.
    ErrorWait,
    Success,
    Failed,
    Cancelled,
    Other(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl From<&str> for TaskStatus {
    fn from(value: &str) -> Self {
        match value {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "REVERTING" => TaskStatus::Reverting,
            "ERROR_WAIT" => TaskStatus::ErrorWait,
            "SUCCESS" => TaskStatus::Success,
            "FAILED" => TaskStatus::Failed,
            "CANCELLED" => TaskStatus::Cancelled,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TaskStatus::from(raw.as_str()))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Reverting => "REVERTING",
            TaskStatus::ErrorWait => "ERROR_WAIT",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// A backend task as returned by polling its location.
#[derive(Deserialize, Clone, Debug)]
pub struct Task {
    pub status: TaskStatus,
    /// Location of the resource the task produced, if any.
    #[serde(default)]
    pub location: Option<String>,
}

/// The backend reports ids as numbers in some payloads and strings in others.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
