use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the conversation log.
///
/// Serialized with the field names the history entry has always used on
/// disk: `{id, text, isUser, timestamp}` with an ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(text: impl Into<String>, is_user: bool) -> Self {
        Self {
            // v7 ids sort by creation time, which keeps ties ordered
            id: Uuid::now_v7().to_string(),
            text: text.into(),
            is_user,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }
}
