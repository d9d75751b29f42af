use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;

use crate::utils::dates::to_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Booking,
    Payment,
    Review,
    Kyc,
    Listing,
    Message,
    Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub booking_id: Option<ObjectId>,
    pub item_id: Option<ObjectId>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime,
}

impl Notification {
    pub const COLLECTION: &'static str = "notifications";

    pub fn new(user_id: ObjectId, kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Notification {
            id: None,
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            booking_id: None,
            item_id: None,
            is_read: false,
            created_at: DateTime::now(),
        }
    }

    pub fn with_booking(mut self, booking_id: Option<ObjectId>) -> Self {
        self.booking_id = booking_id;
        self
    }

    pub fn with_item(mut self, item_id: Option<ObjectId>) -> Self {
        self.item_id = item_id;
        self
    }
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct NotificationListQuery {
    pub unread: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct NotificationResponse {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub booking_id: Option<String>,
    pub item_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        NotificationResponse {
            id: n.id.map(|id| id.to_hex()).unwrap_or_default(),
            kind: n.kind,
            title: n.title,
            message: n.message,
            booking_id: n.booking_id.map(|id| id.to_hex()),
            item_id: n.item_id.map(|id| id.to_hex()),
            is_read: n.is_read,
            created_at: to_iso(&n.created_at),
        }
    }
}
