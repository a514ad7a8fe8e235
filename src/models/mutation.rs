use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Kind of record a mutation applies to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Batch,
    Photo,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Batch => "batch",
            ResourceType::Photo => "photo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "batch" => Some(ResourceType::Batch),
            "photo" => Some(ResourceType::Photo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// `Pending → InProgress → {Completed | Failed}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InProgress => "in_progress",
            MutationStatus::Completed => "completed",
            MutationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MutationStatus::Pending),
            "in_progress" => Some(MutationStatus::InProgress),
            "completed" => Some(MutationStatus::Completed),
            "failed" => Some(MutationStatus::Failed),
            _ => None,
        }
    }

    pub fn all() -> &'static [MutationStatus] {
        static ALL: [MutationStatus; 4] = [
            MutationStatus::Pending,
            MutationStatus::InProgress,
            MutationStatus::Completed,
            MutationStatus::Failed,
        ];
        &ALL
    }
}

macro_rules! sql_text_enum {
    ($ty:ty, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s)
                    .ok_or_else(|| FromSqlError::Other(format!("unknown {} '{}'", $what, s).into()))
            }
        }
    };
}

pub(crate) use sql_text_enum;

sql_text_enum!(ResourceType, "resource type");
sql_text_enum!(Operation, "operation");
sql_text_enum!(MutationStatus, "mutation status");

/// A mutation waiting to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub resource_type: ResourceType,
    pub object_id: String,
    pub operation: Operation,
    pub payload: serde_json::Value,
}

impl NewMutation {
    pub fn new(
        resource_type: ResourceType,
        object_id: impl Into<String>,
        operation: Operation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            resource_type,
            object_id: object_id.into(),
            operation,
            payload,
        }
    }
}

/// A row of the mutation queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationQueueItem {
    pub id: String,
    pub resource_type: ResourceType,
    pub object_id: String,
    pub operation: Operation,
    pub payload: serde_json::Value,
    pub attempts: u32,
    /// Epoch milliseconds
    pub last_attempt_at: Option<i64>,
    pub status: MutationStatus,
    pub error: Option<String>,
    /// Cleared once a collaborator reported a permanent failure
    pub retryable: bool,
    /// Epoch milliseconds
    pub created_at: i64,
}

impl<'r> TryFrom<&Row<'r>> for MutationQueueItem {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'r>) -> Result<Self, Self::Error> {
        let payload_text: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload_text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        Ok(MutationQueueItem {
            id: row.get("id")?,
            resource_type: row.get("resource_type")?,
            object_id: row.get("object_id")?,
            operation: row.get("operation")?,
            payload,
            attempts: row.get("attempts")?,
            last_attempt_at: row.get("last_attempt_at")?,
            status: row.get("status")?,
            error: row.get("error")?,
            retryable: row.get("retryable")?,
            created_at: row.get("created_at")?,
        })
    }
}
