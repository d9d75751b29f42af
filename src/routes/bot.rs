use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use crate::db::DbConn;
use crate::models::{BotMessage, BotMessageDto, BotMessageResponse, BotSender};
use crate::guards::AuthGuard;
use crate::services::Chatbot;
use crate::utils::{validate_dto, ApiError, ApiResponse};

const HISTORY_LIMIT: i64 = 200;

#[openapi(tag = "Bot")]
#[post("/botmessage", data = "<dto>")]
pub async fn ask_bot(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<BotMessageDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    validate_dto(&*dto)?;
    let text = dto.message.trim().to_string();
    let reply = Chatbot::reply(&text);

    let mut question = BotMessage::new(auth.user_id, BotSender::User, text);
    let mut answer = BotMessage::new(auth.user_id, BotSender::Bot, reply.to_string());

    let messages = db.collection::<BotMessage>(BotMessage::COLLECTION);
    let result = messages
        .insert_many([&question, &answer], None)
        .await
        .map_err(ApiError::database)?;
    question.id = result.inserted_ids.get(&0).and_then(|id| id.as_object_id());
    answer.id = result.inserted_ids.get(&1).and_then(|id| id.as_object_id());

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": BotMessageResponse::from(question),
        "reply": BotMessageResponse::from(answer),
    }))))
}

#[openapi(tag = "Bot")]
#[get("/botmessage")]
pub async fn bot_history(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<Vec<BotMessageResponse>>>, ApiError> {
    let options = FindOptions::builder()
        .sort(doc! { "created_at": 1, "_id": 1 })
        .limit(HISTORY_LIMIT)
        .build();

    let mut cursor = db
        .collection::<BotMessage>(BotMessage::COLLECTION)
        .find(doc! { "user_id": auth.user_id }, options)
        .await
        .map_err(ApiError::database)?;

    let mut history = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let message = cursor.deserialize_current().map_err(ApiError::database)?;
        history.push(BotMessageResponse::from(message));
    }

    Ok(Json(ApiResponse::success(history)))
}

#[openapi(tag = "Bot")]
#[delete("/botmessage")]
pub async fn clear_bot_history(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let result = db
        .collection::<BotMessage>(BotMessage::COLLECTION)
        .delete_many(doc! { "user_id": auth.user_id }, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": result.deleted_count
    }))))
}
