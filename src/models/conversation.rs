use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::to_iso;

/// A two-party chat thread, optionally about a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Always two ids, sorted.
    pub participants: Vec<ObjectId>,
    pub item_id: Option<ObjectId>,
    /// Participants plus item; unique, so a pair has one thread per item.
    #[serde(default)]
    pub thread_key: String,
    pub last_message: Option<String>,
    pub last_message_at: DateTime,
    pub created_at: DateTime,
}

impl Conversation {
    pub const COLLECTION: &'static str = "conversations";

    pub fn participants_of(a: ObjectId, b: ObjectId) -> Vec<ObjectId> {
        let mut pair = vec![a, b];
        pair.sort();
        pair
    }

    pub fn thread_key(participants: &[ObjectId], item_id: Option<ObjectId>) -> String {
        let mut key = participants
            .iter()
            .map(|id| id.to_hex())
            .collect::<Vec<_>>()
            .join(":");
        key.push('/');
        if let Some(item_id) = item_id {
            key.push_str(&item_id.to_hex());
        }
        key
    }

    pub fn includes(&self, user_id: &ObjectId) -> bool {
        self.participants.contains(user_id)
    }

    pub fn other_participant(&self, user_id: &ObjectId) -> Option<ObjectId> {
        self.participants.iter().find(|p| *p != user_id).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub conversation_id: ObjectId,
    pub sender_id: ObjectId,
    pub text: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime,
}

impl Message {
    pub const COLLECTION: &'static str = "messages";
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartConversationDto {
    pub recipient_id: String,
    pub item_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct SendMessageDto {
    #[validate(length(min = 1, max = 4000, message = "must be 1-4000 characters"))]
    pub text: String,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct PollMessagesQuery {
    /// Unix millis of the last message already seen.
    pub since: Option<i64>,
    /// Id of that message; breaks ties between messages in the same millisecond.
    pub after: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub is_read: bool,
    pub created_at: String,
    pub created_at_ms: i64,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        MessageResponse {
            id: m.id.map(|id| id.to_hex()).unwrap_or_default(),
            conversation_id: m.conversation_id.to_hex(),
            sender_id: m.sender_id.to_hex(),
            text: m.text,
            is_read: m.is_read,
            created_at: to_iso(&m.created_at),
            created_at_ms: m.created_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ConversationResponse {
    pub id: String,
    pub participants: Vec<String>,
    pub other_participant: Option<String>,
    pub item_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: String,
    pub unread: u64,
}

impl ConversationResponse {
    pub fn new(conversation: Conversation, viewer: &ObjectId, unread: u64) -> Self {
        ConversationResponse {
            id: conversation.id.map(|id| id.to_hex()).unwrap_or_default(),
            other_participant: conversation.other_participant(viewer).map(|id| id.to_hex()),
            participants: conversation.participants.iter().map(|p| p.to_hex()).collect(),
            item_id: conversation.item_id.map(|id| id.to_hex()),
            last_message: conversation.last_message,
            last_message_at: to_iso(&conversation.last_message_at),
            unread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_order_is_canonical() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_eq!(Conversation::participants_of(a, b), Conversation::participants_of(b, a));
    }

    #[test]
    fn thread_key_ignores_order_and_separates_items() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let item = ObjectId::new();
        let ab = Conversation::participants_of(a, b);
        let ba = Conversation::participants_of(b, a);
        assert_eq!(Conversation::thread_key(&ab, None), Conversation::thread_key(&ba, None));
        assert_ne!(Conversation::thread_key(&ab, None), Conversation::thread_key(&ab, Some(item)));

        let c = ObjectId::new();
        let ac = Conversation::participants_of(a, c);
        assert_ne!(Conversation::thread_key(&ab, None), Conversation::thread_key(&ac, None));
    }

    #[test]
    fn other_participant() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let conversation = Conversation {
            id: None,
            participants: Conversation::participants_of(a, b),
            item_id: None,
            thread_key: String::new(),
            last_message: None,
            last_message_at: DateTime::now(),
            created_at: DateTime::now(),
        };
        assert!(conversation.includes(&a));
        assert_eq!(conversation.other_participant(&a), Some(b));
        assert_eq!(conversation.other_participant(&b), Some(a));
        assert!(!conversation.includes(&ObjectId::new()));
    }
}
