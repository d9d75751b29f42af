use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use log::warn;
use crate::db::DbConn;
use crate::models::{User, UserResponse};
use crate::services::JwtService;
use crate::utils::{rate_limit, validate_email, ApiResponse, ApiError};

const TOKEN_LIMIT: i32 = 10;
const TOKEN_WINDOW_MS: i64 = 60 * 1000;

#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct IssueTokenDto {
    pub email: String,
}

/// --------------------
/// Issue access token
/// --------------------
#[openapi(tag = "Auth")]
#[post("/jwt", data = "<dto>")]
pub async fn issue_token(
    db: &State<DbConn>,
    dto: Json<IssueTokenDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let email = dto.email.trim().to_lowercase();
    if !validate_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    rate_limit(db, &format!("jwt:{}", email), TOKEN_LIMIT, TOKEN_WINDOW_MS).await?;

    let user = db
        .collection::<User>(User::COLLECTION)
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::unauthorized("No account for this email"))?;

    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let user_id = user
        .id
        .ok_or_else(|| ApiError::internal_error("User record has no id"))?;

    let token = JwtService::generate_access_token(&user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if let Err(e) = db
        .collection::<User>(User::COLLECTION)
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "last_login_at": DateTime::now() } },
            None,
        )
        .await
    {
        warn!("Failed to record login for {}: {}", user_id, e);
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "token": token,
        "user": UserResponse::from(user),
    }))))
}
