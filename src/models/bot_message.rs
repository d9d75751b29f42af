use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::to_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BotSender {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotMessage {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub sender: BotSender,
    pub text: String,
    pub created_at: DateTime,
}

impl BotMessage {
    pub const COLLECTION: &'static str = "bot_messages";

    pub fn new(user_id: ObjectId, sender: BotSender, text: String) -> Self {
        BotMessage {
            id: None,
            user_id,
            sender,
            text,
            created_at: DateTime::now(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct BotMessageDto {
    #[validate(length(min = 1, max = 1000, message = "must be 1-1000 characters"))]
    pub message: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BotMessageResponse {
    pub id: String,
    pub sender: BotSender,
    pub text: String,
    pub created_at: String,
}

impl From<BotMessage> for BotMessageResponse {
    fn from(m: BotMessage) -> Self {
        BotMessageResponse {
            id: m.id.map(|id| id.to_hex()).unwrap_or_default(),
            sender: m.sender,
            text: m.text,
            created_at: to_iso(&m.created_at),
        }
    }
}
