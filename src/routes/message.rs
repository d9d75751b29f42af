use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use crate::db::DbConn;
use crate::models::{
    Conversation, ConversationResponse, Message, MessageResponse, Notification, NotificationKind,
    PollMessagesQuery, Rent, SendMessageDto, StartConversationDto, User,
};
use crate::guards::AuthGuard;
use crate::services::Notifier;
use crate::utils::{parse_id, validate_dto, ApiError, ApiResponse, Page};

const PREVIEW_CHARS: usize = 120;
const POLL_LIMIT: i64 = 100;

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

/// Loads a conversation the caller takes part in.
async fn conversation_for(
    db: &DbConn,
    conversation_id: &str,
    user_id: &ObjectId,
) -> Result<Conversation, ApiError> {
    let object_id = parse_id(conversation_id, "conversation")?;
    let conversation = db
        .collection::<Conversation>(Conversation::COLLECTION)
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    if !conversation.includes(user_id) {
        return Err(ApiError::forbidden("Not a participant in this conversation"));
    }
    Ok(conversation)
}

/// Returns the existing thread between the two users about the same item,
/// creating it on first contact.
#[openapi(tag = "Message")]
#[post("/messages/conversations", data = "<dto>")]
pub async fn start_conversation(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<StartConversationDto>,
) -> Result<Json<ApiResponse<ConversationResponse>>, ApiError> {
    let recipient_id = parse_id(&dto.recipient_id, "recipient")?;
    if recipient_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot message yourself"));
    }

    let recipient_exists = db
        .collection::<User>(User::COLLECTION)
        .count_documents(doc! { "_id": recipient_id, "is_active": true }, None)
        .await
        .map_err(ApiError::database)?;
    if recipient_exists == 0 {
        return Err(ApiError::not_found("Recipient not found"));
    }

    let item_id = match dto.item_id.as_deref() {
        Some(raw) => {
            let item_id = parse_id(raw, "item")?;
            let exists = db
                .collection::<Rent>(Rent::COLLECTION)
                .count_documents(doc! { "_id": item_id }, None)
                .await
                .map_err(ApiError::database)?;
            if exists == 0 {
                return Err(ApiError::not_found("Item not found"));
            }
            Some(item_id)
        }
        None => None,
    };

    let participants = Conversation::participants_of(auth.user_id, recipient_id);
    let thread_key = Conversation::thread_key(&participants, item_id);
    let now = DateTime::now();

    // Get-or-create on the unique thread key.
    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();
    let conversation = db
        .collection::<Conversation>(Conversation::COLLECTION)
        .find_one_and_update(
            doc! { "thread_key": &thread_key },
            doc! { "$setOnInsert": {
                "participants": &participants,
                "item_id": item_id,
                "last_message": null,
                "last_message_at": now,
                "created_at": now,
            } },
            options,
        )
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::internal_error("Failed to open conversation"))?;

    let unread = match conversation.id {
        Some(id) => db
            .collection::<Message>(Message::COLLECTION)
            .count_documents(
                doc! { "conversation_id": id, "sender_id": { "$ne": auth.user_id }, "is_read": false },
                None,
            )
            .await
            .map_err(ApiError::database)?,
        None => 0,
    };

    Ok(Json(ApiResponse::success(ConversationResponse::new(
        conversation,
        &auth.user_id,
        unread,
    ))))
}

#[openapi(tag = "Message")]
#[get("/messages/conversations?<page>&<limit>")]
pub async fn list_conversations(
    db: &State<DbConn>,
    auth: AuthGuard,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(page, limit);
    let filter = doc! { "participants": auth.user_id };

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "last_message_at": -1 })
        .build();

    let conversations = db.collection::<Conversation>(Conversation::COLLECTION);
    let mut cursor = conversations
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let messages = db.collection::<Message>(Message::COLLECTION);
    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let conversation = cursor.deserialize_current().map_err(ApiError::database)?;
        let unread = messages
            .count_documents(
                doc! {
                    "conversation_id": conversation.id,
                    "sender_id": { "$ne": auth.user_id },
                    "is_read": false,
                },
                None,
            )
            .await
            .map_err(ApiError::database)?;
        items.push(ConversationResponse::new(conversation, &auth.user_id, unread));
    }

    let total = conversations
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "conversations": items,
        "pagination": page.meta(total),
    }))))
}

/// Messages after the `(since, after)` cursor in `(created_at, _id)` order.
/// Without `after`, everything in the `since` millisecond counts as seen.
fn poll_filter(conversation_id: ObjectId, since: i64, after: Option<ObjectId>) -> Document {
    let since = DateTime::from_millis(since);
    match after {
        Some(after) => doc! {
            "conversation_id": conversation_id,
            "$or": [
                { "created_at": { "$gt": since } },
                { "created_at": since, "_id": { "$gt": after } },
            ],
        },
        None => doc! {
            "conversation_id": conversation_id,
            "created_at": { "$gt": since },
        },
    }
}

/// Messages oldest first. With `since` (unix millis) and `after` (message id)
/// only newer messages are returned, which is what clients poll with.
#[openapi(tag = "Message")]
#[get("/messages/conversations/<conversation_id>?<query..>")]
pub async fn get_messages(
    db: &State<DbConn>,
    auth: AuthGuard,
    conversation_id: String,
    query: PollMessagesQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let conversation = conversation_for(db, &conversation_id, &auth.user_id).await?;
    let conversation_oid = conversation
        .id
        .ok_or_else(|| ApiError::internal_error("Conversation without id"))?;
    let limit = query.limit.unwrap_or(50).clamp(1, POLL_LIMIT);
    let after = match query.after.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(raw) => Some(parse_id(raw.trim(), "message")?),
        None => None,
    };

    let (filter, options) = match query.since {
        Some(since) => (
            poll_filter(conversation_oid, since, after),
            FindOptions::builder()
                .sort(doc! { "created_at": 1, "_id": 1 })
                .limit(limit)
                .build(),
        ),
        // Latest page, flipped back to chronological order below.
        None => (
            doc! { "conversation_id": conversation_oid },
            FindOptions::builder()
                .sort(doc! { "created_at": -1, "_id": -1 })
                .limit(limit)
                .build(),
        ),
    };

    let mut cursor = db
        .collection::<Message>(Message::COLLECTION)
        .find(filter, options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let message = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(MessageResponse::from(message));
    }
    if query.since.is_none() {
        items.reverse();
    }

    let (cursor_ms, cursor_id) = match items.last() {
        Some(last) => (last.created_at_ms, Some(last.id.clone())),
        None => (query.since.unwrap_or(0), after.map(|id| id.to_hex())),
    };

    Ok(Json(ApiResponse::success(serde_json::json!({
        "conversation": ConversationResponse::new(conversation, &auth.user_id, 0),
        "messages": items,
        "cursor": { "since": cursor_ms, "after": cursor_id },
    }))))
}

#[openapi(tag = "Message")]
#[post("/messages/conversations/<conversation_id>", data = "<dto>")]
pub async fn send_message(
    db: &State<DbConn>,
    auth: AuthGuard,
    conversation_id: String,
    dto: Json<SendMessageDto>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let text = dto.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("text: must be 1-4000 characters"));
    }

    let conversation = conversation_for(db, &conversation_id, &auth.user_id).await?;
    let conversation_oid = conversation
        .id
        .ok_or_else(|| ApiError::internal_error("Conversation without id"))?;

    let mut message = Message {
        id: None,
        conversation_id: conversation_oid,
        sender_id: auth.user_id,
        text: text.to_string(),
        is_read: false,
        created_at: DateTime::now(),
    };

    let result = db
        .collection::<Message>(Message::COLLECTION)
        .insert_one(&message, None)
        .await
        .map_err(ApiError::database)?;
    message.id = result.inserted_id.as_object_id();

    db.collection::<Conversation>(Conversation::COLLECTION)
        .update_one(
            doc! { "_id": conversation_oid },
            doc! { "$set": {
                "last_message": preview(text),
                "last_message_at": message.created_at,
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if let Some(recipient) = conversation.other_participant(&auth.user_id) {
        Notifier::notify(
            db,
            Notification::new(recipient, NotificationKind::Message, "New message", preview(text))
                .with_item(conversation.item_id),
        )
        .await;
    }

    Ok(Json(ApiResponse::success(message.into())))
}

#[openapi(tag = "Message")]
#[put("/messages/conversations/<conversation_id>/read")]
pub async fn mark_conversation_read(
    db: &State<DbConn>,
    auth: AuthGuard,
    conversation_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let conversation = conversation_for(db, &conversation_id, &auth.user_id).await?;

    let result = db
        .collection::<Message>(Message::COLLECTION)
        .update_many(
            doc! {
                "conversation_id": conversation.id,
                "sender_id": { "$ne": auth.user_id },
                "is_read": false,
            },
            doc! { "$set": { "is_read": true } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "updated": result.modified_count
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_breaks_millisecond_ties_by_id() {
        let conversation = ObjectId::new();
        let last_seen = ObjectId::new();
        let filter = poll_filter(conversation, 1_700_000_000_000, Some(last_seen));

        let branches = filter.get_array("$or").unwrap();
        assert_eq!(branches.len(), 2);
        let same_ms = branches[1].as_document().unwrap();
        assert_eq!(same_ms.get_datetime("created_at").unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(same_ms.get_document("_id").unwrap().get_object_id("$gt").unwrap(), last_seen);
    }

    #[test]
    fn poll_without_id_is_strictly_newer() {
        let filter = poll_filter(ObjectId::new(), 42, None);
        assert!(filter.get("$or").is_none());
        let created = filter.get_document("created_at").unwrap();
        assert_eq!(created.get_datetime("$gt").unwrap().timestamp_millis(), 42);
    }

    #[test]
    fn previews_are_truncated_on_char_boundaries() {
        assert_eq!(preview("hello"), "hello");
        let long = "é".repeat(PREVIEW_CHARS + 5);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
