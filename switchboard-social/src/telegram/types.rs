use crate::ids::IdValue;
use serde::Deserialize;
use serde_json::Value;

/// Envelope of every Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One `getUpdates` entry. Message bodies stay as raw JSON so they can be
/// carried through as the message's `raw` field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub channel_post: Option<Value>,
    #[serde(default)]
    pub edited_message: Option<Value>,
    #[serde(default)]
    pub edited_channel_post: Option<Value>,
}

impl Update {
    /// First message-bearing field, in the order polling accepts them.
    pub fn message_like(&self) -> Option<&Value> {
        self.message
            .as_ref()
            .or(self.channel_post.as_ref())
            .or(self.edited_message.as_ref())
            .or(self.edited_channel_post.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TgMessage {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub chat: Option<Peer>,
    #[serde(default)]
    pub from: Option<Peer>,
    #[serde(default)]
    pub sender_chat: Option<Peer>,
}

/// Chat, user or sender chat; only the id is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub id: Option<IdValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edited_messages_are_picked_up_last() {
        let u: Update = serde_json::from_value(json!({
            "update_id": 7,
            "edited_message": {"message_id": 3}
        }))
        .unwrap();
        assert_eq!(u.message_like().unwrap()["message_id"], 3);
    }

    #[test]
    fn error_envelope_decodes_without_result() {
        let r: ApiResponse<Vec<Update>> =
            serde_json::from_str(r#"{"ok":false,"description":"Unauthorized"}"#).unwrap();
        assert!(!r.ok);
        assert!(r.result.is_none());
    }
}
