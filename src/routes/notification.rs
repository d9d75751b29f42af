use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use crate::db::DbConn;
use crate::models::{Notification, NotificationListQuery, NotificationResponse};
use crate::guards::AuthGuard;
use crate::utils::{parse_id, ApiError, ApiResponse, Page};

#[openapi(tag = "Notification")]
#[get("/notifications?<query..>")]
pub async fn list_notifications(
    db: &State<DbConn>,
    auth: AuthGuard,
    query: NotificationListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(query.page, query.limit);

    let mut filter = doc! { "user_id": auth.user_id };
    if query.unread.unwrap_or(false) {
        filter.insert("is_read", false);
    }

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let notifications = db.collection::<Notification>(Notification::COLLECTION);
    let mut cursor = notifications
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let notification = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(NotificationResponse::from(notification));
    }

    let total = notifications
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "notifications": items,
        "pagination": page.meta(total),
    }))))
}

#[openapi(tag = "Notification")]
#[get("/notifications/unread-count")]
pub async fn unread_count(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let count = db
        .collection::<Notification>(Notification::COLLECTION)
        .count_documents(doc! { "user_id": auth.user_id, "is_read": false }, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({ "count": count }))))
}

#[openapi(tag = "Notification")]
#[put("/notifications/<notification_id>/read")]
pub async fn mark_read(
    db: &State<DbConn>,
    auth: AuthGuard,
    notification_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&notification_id, "notification")?;

    let result = db
        .collection::<Notification>(Notification::COLLECTION)
        .update_one(
            doc! { "_id": object_id, "user_id": auth.user_id },
            doc! { "$set": { "is_read": true } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Notification marked as read"
    }))))
}

#[openapi(tag = "Notification")]
#[put("/notifications/read-all")]
pub async fn mark_all_read(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let result = db
        .collection::<Notification>(Notification::COLLECTION)
        .update_many(
            doc! { "user_id": auth.user_id, "is_read": false },
            doc! { "$set": { "is_read": true } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "updated": result.modified_count
    }))))
}

#[openapi(tag = "Notification")]
#[delete("/notifications/<notification_id>")]
pub async fn delete_notification(
    db: &State<DbConn>,
    auth: AuthGuard,
    notification_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&notification_id, "notification")?;

    let result = db
        .collection::<Notification>(Notification::COLLECTION)
        .delete_one(doc! { "_id": object_id, "user_id": auth.user_id }, None)
        .await
        .map_err(ApiError::database)?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Notification deleted"
    }))))
}
