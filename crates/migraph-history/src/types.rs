use crate::store::{HistoryError, HistoryResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} must not be blank")]
pub struct IdError {
    pub kind: &'static str,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError { kind: $kind });
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_id!(
    /// Identity of a migration node. The only key shared by nodes, dependency
    /// sets and history records.
    NodeId,
    "node id"
);

string_id!(
    /// Identity of an execution target such as a database.
    EnvironmentId,
    "environment id"
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDirection {
    Up,
    Down,
}

impl ExecutionDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl fmt::Display for ExecutionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated field set of an [`ExecutionRecord`]; also its wire shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordParts {
    pub id: String,
    pub node_id: NodeId,
    pub environment_id: EnvironmentId,
    pub direction: ExecutionDirection,
    pub status: ExecutionStatus,
    pub executed_at_ms: u64,
    pub description: String,
    #[serde(default)]
    pub inverse_payload: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Immutable audit entry for one execution attempt.
///
/// Construction rejects a FAILURE without an error message and an inverse
/// payload on anything other than an UP success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordParts", into = "RecordParts")]
pub struct ExecutionRecord {
    parts: RecordParts,
}

impl ExecutionRecord {
    pub fn new(parts: RecordParts) -> HistoryResult<Self> {
        if parts.id.trim().is_empty() {
            return Err(HistoryError::InvalidRecord(
                "record id must not be blank".to_string(),
            ));
        }
        if parts.status == ExecutionStatus::Failure
            && parts
                .error_message
                .as_deref()
                .is_none_or(|message| message.trim().is_empty())
        {
            return Err(HistoryError::InvalidRecord(format!(
                "failure record for node '{}' requires an error message",
                parts.node_id
            )));
        }
        if parts.inverse_payload.is_some()
            && !(parts.direction == ExecutionDirection::Up
                && parts.status == ExecutionStatus::Success)
        {
            return Err(HistoryError::InvalidRecord(format!(
                "inverse payload is only allowed on UP success records (node '{}')",
                parts.node_id
            )));
        }
        Ok(Self { parts })
    }

    pub fn up_success(
        node_id: NodeId,
        environment_id: EnvironmentId,
        description: impl Into<String>,
        inverse_payload: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            parts: RecordParts {
                id: generate_record_id(),
                node_id,
                environment_id,
                direction: ExecutionDirection::Up,
                status: ExecutionStatus::Success,
                executed_at_ms: timestamp_now_ms(),
                description: description.into(),
                inverse_payload,
                duration_ms: duration_millis(duration),
                error_message: None,
            },
        }
    }

    pub fn down_success(
        node_id: NodeId,
        environment_id: EnvironmentId,
        description: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            parts: RecordParts {
                id: generate_record_id(),
                node_id,
                environment_id,
                direction: ExecutionDirection::Down,
                status: ExecutionStatus::Success,
                executed_at_ms: timestamp_now_ms(),
                description: description.into(),
                inverse_payload: None,
                duration_ms: duration_millis(duration),
                error_message: None,
            },
        }
    }

    pub fn failure(
        node_id: NodeId,
        environment_id: EnvironmentId,
        direction: ExecutionDirection,
        description: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
    ) -> HistoryResult<Self> {
        Self::new(RecordParts {
            id: generate_record_id(),
            node_id,
            environment_id,
            direction,
            status: ExecutionStatus::Failure,
            executed_at_ms: timestamp_now_ms(),
            description: description.into(),
            inverse_payload: None,
            duration_ms: duration_millis(duration),
            error_message: Some(error_message.into()),
        })
    }

    pub fn skipped(
        node_id: NodeId,
        environment_id: EnvironmentId,
        direction: ExecutionDirection,
        description: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            parts: RecordParts {
                id: generate_record_id(),
                node_id,
                environment_id,
                direction,
                status: ExecutionStatus::Skipped,
                executed_at_ms: timestamp_now_ms(),
                description: description.into(),
                inverse_payload: None,
                duration_ms: 0,
                error_message: Some(reason.into()),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.parts.id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.parts.node_id
    }

    pub fn environment_id(&self) -> &EnvironmentId {
        &self.parts.environment_id
    }

    pub fn direction(&self) -> ExecutionDirection {
        self.parts.direction
    }

    pub fn status(&self) -> ExecutionStatus {
        self.parts.status
    }

    pub fn executed_at_ms(&self) -> u64 {
        self.parts.executed_at_ms
    }

    pub fn description(&self) -> &str {
        &self.parts.description
    }

    pub fn inverse_payload(&self) -> Option<&str> {
        self.parts.inverse_payload.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.parts.duration_ms
    }

    pub fn error_message(&self) -> Option<&str> {
        self.parts.error_message.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.parts.status == ExecutionStatus::Success
    }

    pub fn is_up(&self) -> bool {
        self.parts.direction == ExecutionDirection::Up
    }

    pub fn is_down(&self) -> bool {
        self.parts.direction == ExecutionDirection::Down
    }
}

impl TryFrom<RecordParts> for ExecutionRecord {
    type Error = HistoryError;

    fn try_from(parts: RecordParts) -> Result<Self, Self::Error> {
        Self::new(parts)
    }
}

impl From<ExecutionRecord> for RecordParts {
    fn from(record: ExecutionRecord) -> Self {
        record.parts
    }
}

pub fn timestamp_now_ms() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration_millis(since_epoch)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn generate_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
