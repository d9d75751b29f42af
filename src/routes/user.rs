use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use log::info;
use crate::db::DbConn;
use crate::models::{
    CreateUserDto, PublicUserResponse, Role, UpdateProfileDto, UpdateRoleDto, User, UserListQuery,
    UserResponse, VerifyOtpDto,
};
use crate::guards::{AdminGuard, AuthGuard};
use crate::services::SmsService;
use crate::utils::{
    generate_otp, parse_id, rate_limit, search_pattern, validate_dto, validate_phone, ApiError,
    ApiResponse, Page,
};

const OTP_TTL_MS: i64 = 10 * 60 * 1000;
const OTP_MAX_ATTEMPTS: i32 = 5;
const OTP_SEND_LIMIT: i32 = 3;
const OTP_SEND_WINDOW_MS: i64 = 10 * 60 * 1000;

async fn find_user(db: &DbConn, filter: mongodb::bson::Document) -> Result<User, ApiError> {
    db.collection::<User>(User::COLLECTION)
        .find_one(filter, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Update document for a profile edit. A new phone number starts
/// unverified and drops any code issued for the previous one.
fn profile_update(dto: &UpdateProfileDto) -> Result<Document, ApiError> {
    let mut set = doc! {
        "updated_at": DateTime::now()
    };
    let mut update = Document::new();

    if let Some(ref name) = dto.name {
        set.insert("name", name.trim());
    }
    if let Some(ref photo_url) = dto.photo_url {
        set.insert("photo_url", photo_url);
    }
    if let Some(ref phone) = dto.phone {
        if !validate_phone(phone) {
            return Err(ApiError::bad_request("Invalid phone number"));
        }
        set.insert("phone", phone);
        set.insert("phone_verified", false);
        set.insert("otp_attempts", 0);
        update.insert("$unset", doc! { "otp_hash": "", "otp_expires_at": "" });
    }

    update.insert("$set", set);
    Ok(update)
}

/// Matches only while a code is pending and attempts remain; paired with
/// `$inc` it spends one attempt before the code is checked.
fn attempt_filter(user_id: ObjectId) -> Document {
    doc! {
        "_id": user_id,
        "otp_hash": { "$type": "string" },
        "otp_attempts": { "$lt": OTP_MAX_ATTEMPTS },
    }
}

/// Why no attempt could be spent.
fn attempt_refused(user: &User) -> ApiError {
    if user.otp_hash.is_none() {
        ApiError::bad_request("Request an OTP first")
    } else {
        ApiError::too_many_requests("Too many attempts. Request a new OTP.")
    }
}

/// Signup. Calling it again with a known email returns the existing account.
#[openapi(tag = "User")]
#[post("/users", data = "<dto>")]
pub async fn create_user(
    db: &State<DbConn>,
    dto: Json<CreateUserDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    validate_dto(&*dto)?;
    let email = dto.email.trim().to_lowercase();

    if let Some(phone) = &dto.phone {
        if !validate_phone(phone) {
            return Err(ApiError::bad_request("Invalid phone number"));
        }
    }

    let users = db.collection::<User>(User::COLLECTION);

    if let Some(existing) = users
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(ApiError::database)?
    {
        return Ok(Json(ApiResponse::success_with_message(
            "User already exists",
            serde_json::json!({ "created": false, "user": UserResponse::from(existing) }),
        )));
    }

    let mut user = User::new(
        dto.name.trim().to_string(),
        email,
        dto.photo_url.clone(),
        dto.phone.clone(),
    );

    let result = users
        .insert_one(&user, None)
        .await
        .map_err(ApiError::database)?;
    user.id = result.inserted_id.as_object_id();

    info!("New user registered: {}", user.email);

    Ok(Json(ApiResponse::success_with_message(
        "User created",
        serde_json::json!({ "created": true, "user": UserResponse::from(user) }),
    )))
}

#[openapi(tag = "User")]
#[get("/users/me")]
pub async fn get_me(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let user = find_user(db, doc! { "_id": auth.user_id }).await?;
    Ok(Json(ApiResponse::success(user.into())))
}

#[openapi(tag = "User")]
#[put("/users/me", data = "<dto>")]
pub async fn update_me(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<UpdateProfileDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let update = profile_update(&dto)?;

    db.collection::<User>(User::COLLECTION)
        .update_one(doc! { "_id": auth.user_id }, update, None)
        .await
        .map_err(ApiError::database)?;

    let user = find_user(db, doc! { "_id": auth.user_id }).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Profile updated successfully",
        user.into(),
    )))
}

#[openapi(tag = "User")]
#[post("/users/me/otp/send")]
pub async fn send_phone_otp(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let user = find_user(db, doc! { "_id": auth.user_id }).await?;
    let phone = user
        .phone
        .ok_or_else(|| ApiError::bad_request("Add a phone number to your profile first"))?;

    if user.phone_verified {
        return Err(ApiError::bad_request("Phone number already verified"));
    }

    rate_limit(
        db,
        &format!("send_otp:{}", auth.user_id.to_hex()),
        OTP_SEND_LIMIT,
        OTP_SEND_WINDOW_MS,
    )
    .await?;

    let otp = generate_otp();
    let otp_hash = bcrypt::hash(&otp, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let expires_at = DateTime::from_millis(DateTime::now().timestamp_millis() + OTP_TTL_MS);

    db.collection::<User>(User::COLLECTION)
        .update_one(
            doc! { "_id": auth.user_id },
            doc! { "$set": {
                "otp_hash": otp_hash,
                "otp_expires_at": expires_at,
                "otp_attempts": 0,
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    SmsService::send_otp(&phone, &otp)
        .await
        .map_err(|e| {
            log::error!("Failed to send OTP: {}", e);
            ApiError::internal_error("Failed to send OTP")
        })?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "OTP sent successfully",
        "expires_in_seconds": OTP_TTL_MS / 1000,
    }))))
}

#[openapi(tag = "User")]
#[post("/users/me/otp/verify", data = "<dto>")]
pub async fn verify_phone_otp(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<VerifyOtpDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let users = db.collection::<User>(User::COLLECTION);
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let user = match users
        .find_one_and_update(
            attempt_filter(auth.user_id),
            doc! { "$inc": { "otp_attempts": 1 } },
            options,
        )
        .await
        .map_err(ApiError::database)?
    {
        Some(user) => user,
        None => {
            let user = find_user(db, doc! { "_id": auth.user_id }).await?;
            return Err(attempt_refused(&user));
        }
    };

    let (Some(hash), Some(expires_at)) = (user.otp_hash.clone(), user.otp_expires_at) else {
        return Err(ApiError::bad_request("Request an OTP first"));
    };
    if expires_at < DateTime::now() {
        return Err(ApiError::bad_request("OTP expired"));
    }
    if !bcrypt::verify(dto.otp.trim(), &hash).unwrap_or(false) {
        return Err(ApiError::unauthorized("Invalid OTP"));
    }

    // Only the code that was checked may verify; a phone change or a new code
    // in the meantime replaced it.
    let result = users
        .update_one(
            doc! { "_id": auth.user_id, "otp_hash": hash.as_str() },
            doc! {
                "$set": { "phone_verified": true, "otp_attempts": 0, "updated_at": DateTime::now() },
                "$unset": { "otp_hash": "", "otp_expires_at": "" },
            },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.matched_count == 0 {
        return Err(ApiError::conflict("OTP is no longer valid. Request a new one."));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Phone number verified"
    }))))
}

#[openapi(tag = "User")]
#[get("/users/<user_id>", rank = 2)]
pub async fn get_public_profile(
    db: &State<DbConn>,
    user_id: String,
) -> Result<Json<ApiResponse<PublicUserResponse>>, ApiError> {
    let object_id = parse_id(&user_id, "user")?;
    let user = find_user(db, doc! { "_id": object_id, "is_active": true }).await?;
    Ok(Json(ApiResponse::success(user.into())))
}

// ==================== ADMIN ====================

#[openapi(tag = "Admin - Users")]
#[get("/users?<query..>")]
pub async fn list_users(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: UserListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(query.page, query.limit);

    let mut filter = doc! {};
    if let Some(role) = query.role.as_deref() {
        filter.insert("role", role);
    }
    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = search_pattern(q);
        filter.insert("$or", vec![
            doc! { "name": { "$regex": &pattern, "$options": "i" } },
            doc! { "email": { "$regex": &pattern, "$options": "i" } },
        ]);
    }

    let find_options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let users = db.collection::<User>(User::COLLECTION);
    let mut cursor = users
        .find(filter.clone(), find_options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let user = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(UserResponse::from(user));
    }

    let total = users
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "users": items,
        "pagination": page.meta(total),
    }))))
}

#[openapi(tag = "Admin - Users")]
#[put("/users/<user_id>/role", data = "<dto>")]
pub async fn update_user_role(
    db: &State<DbConn>,
    admin: AdminGuard,
    user_id: String,
    dto: Json<UpdateRoleDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&user_id, "user")?;

    if object_id == admin.auth.user_id && dto.role != Role::Admin {
        return Err(ApiError::bad_request("You cannot demote yourself"));
    }

    let result = db
        .collection::<User>(User::COLLECTION)
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": { "role": dto.role.as_str(), "updated_at": DateTime::now() } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!("User {} role set to {} by {}", object_id, dto.role.as_str(), admin.auth.user_id);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": format!("Role updated to {}", dto.role.as_str())
    }))))
}

#[openapi(tag = "Admin - Users")]
#[put("/users/<user_id>/deactivate")]
pub async fn deactivate_user(
    db: &State<DbConn>,
    admin: AdminGuard,
    user_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&user_id, "user")?;

    if object_id == admin.auth.user_id {
        return Err(ApiError::bad_request("You cannot deactivate yourself"));
    }

    let result = db
        .collection::<User>(User::COLLECTION)
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": { "is_active": false, "updated_at": DateTime::now() } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Account deactivated successfully"
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(phone: Option<&str>) -> UpdateProfileDto {
        UpdateProfileDto {
            name: Some("  Sita  ".into()),
            photo_url: None,
            phone: phone.map(String::from),
        }
    }

    #[test]
    fn phone_change_discards_pending_code() {
        let update = profile_update(&profile(Some("+9779812345678"))).unwrap();

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("phone").unwrap(), "+9779812345678");
        assert_eq!(set.get_bool("phone_verified").unwrap(), false);
        assert_eq!(set.get_i32("otp_attempts").unwrap(), 0);

        let unset = update.get_document("$unset").unwrap();
        assert!(unset.contains_key("otp_hash"));
        assert!(unset.contains_key("otp_expires_at"));
    }

    #[test]
    fn name_only_edit_keeps_verification() {
        let update = profile_update(&profile(None)).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("name").unwrap(), "Sita");
        assert!(!set.contains_key("phone_verified"));
        assert!(update.get("$unset").is_none());
    }

    #[test]
    fn bad_phone_is_rejected() {
        let err = profile_update(&profile(Some("12ab"))).unwrap_err();
        assert_eq!(err.message, "Invalid phone number");
    }

    #[test]
    fn attempts_are_spent_only_while_a_code_is_live() {
        let id = ObjectId::new();
        let filter = attempt_filter(id);
        assert_eq!(filter.get_object_id("_id").unwrap(), id);
        assert_eq!(
            filter.get_document("otp_attempts").unwrap().get_i32("$lt").unwrap(),
            OTP_MAX_ATTEMPTS
        );
        assert!(filter.contains_key("otp_hash"));
    }

    #[test]
    fn refusal_explains_itself() {
        let mut user = User::new("Sita".into(), "sita@example.com".into(), None, None);
        assert_eq!(attempt_refused(&user).message, "Request an OTP first");

        user.otp_hash = Some("$2b$12$hash".into());
        user.otp_attempts = OTP_MAX_ATTEMPTS;
        let err = attempt_refused(&user);
        assert_eq!(err.status, rocket::http::Status::TooManyRequests);
    }
}
