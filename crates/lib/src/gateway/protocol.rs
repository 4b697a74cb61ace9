//! Wire types returned to callers.

use crate::message::MessageId;
use serde::{Deserialize, Serialize};

/// Body of every `POST /test` response: `{ "status", "id" | "reason" | "error" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// "accepted", "rejected" or "failed".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResponse {
    pub fn accepted(id: MessageId) -> Self {
        Self {
            status: "accepted".to_string(),
            id: Some(id),
            reason: None,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: "rejected".to_string(),
            id: None,
            reason: Some(reason.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            id: None,
            reason: None,
            error: Some(error.into()),
        }
    }
}

/// Optional frame sent on the stream before a message is dropped or the connection closes.
/// Wire: `{ "type": "rejected" | "closed", "reason": string }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamNotice {
    #[serde(rename = "type")]
    pub typ: String,
    pub reason: String,
}

impl StreamNotice {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            typ: "rejected".to_string(),
            reason: reason.into(),
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self {
            typ: "closed".to_string(),
            reason: reason.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}","reason":""}}"#, self.typ)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_serializes_status_and_id_only() {
        let json = serde_json::to_value(SubmitResponse::accepted(9)).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "accepted", "id": 9 }));
    }

    #[test]
    fn rejected_carries_reason() {
        let json = serde_json::to_value(SubmitResponse::rejected("daily limit reached")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "rejected", "reason": "daily limit reached" })
        );
    }

    #[test]
    fn notice_wire_shape() {
        assert_eq!(
            StreamNotice::closed("daily limit reached").to_json(),
            r#"{"type":"closed","reason":"daily limit reached"}"#
        );
    }
}
