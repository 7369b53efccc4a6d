//! Represents a backend database tracked by the broker, real or intended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle stage of a resource record.
///
/// Every record sits in exactly one bucket. The store only lets a record
/// change bucket through [`Bucket::can_move_to`]-approved transitions.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Bucket {
    /// Creation requested, backend confirmation not yet recorded.
    Creating,
    /// Created and ready to hand out.
    Pooled,
    /// Queued for backend deletion.
    Deleting,
    /// Retired after an unrecoverable error. Never retried automatically.
    Failed,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Creating,
        Bucket::Pooled,
        Bucket::Deleting,
        Bucket::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Creating => "creating",
            Bucket::Pooled => "pooled",
            Bucket::Deleting => "deleting",
            Bucket::Failed => "failed",
        }
    }

    /// Whether a record may move from `self` into `to`.
    ///
    /// Removal from the store is not a move and is always allowed.
    pub fn can_move_to(&self, to: Bucket) -> bool {
        matches!(
            (self, to),
            (Bucket::Creating, Bucket::Pooled)
                | (Bucket::Creating, Bucket::Failed)
                | (Bucket::Deleting, Bucket::Failed)
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `resources` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ResourceRecord {
    /// Store-assigned handle. Increases with insertion order.
    pub seq: i64,

    /// Database name on the backend; the key used to recover in-flight creations.
    pub name: String,

    /// Owner account created with the database.
    pub username: String,

    /// Owner password. Never serialized into API responses.
    #[serde(skip_serializing)]
    pub password: String,

    /// Backend identifier, known once creation completed.
    pub remote_id: Option<String>,

    /// Backend opaque UUID, known once creation completed.
    pub remote_uuid: Option<String>,

    pub bucket: Bucket,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} name={} id={} uuid={} bucket={}",
            self.seq,
            self.name,
            self.remote_id.as_deref().unwrap_or("-"),
            self.remote_uuid.as_deref().unwrap_or("-"),
            self.bucket
        )
    }
}

/// Values needed to insert a new record.
#[derive(Clone, Debug)]
pub struct NewResource {
    pub name: String,
    pub username: String,
    pub password: String,
    pub remote_id: Option<String>,
    pub remote_uuid: Option<String>,
}

/// Identifiers the backend assigns on creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteIds {
    pub id: String,
    pub uuid: Option<String>,
}
