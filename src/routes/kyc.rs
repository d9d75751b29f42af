use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use log::info;
use crate::db::DbConn;
use crate::models::{
    Kyc, KycListQuery, KycResponse, KycStatus, Notification, NotificationKind, SubmitKycDto,
    UpdateKycStatusDto, User,
};
use crate::guards::{AdminGuard, AuthGuard};
use crate::services::Notifier;
use crate::utils::dates::{parse_day, today};
use crate::utils::{parse_id, validate_dto, ApiError, ApiResponse, Page};

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

fn date_of_birth(value: &str) -> Result<DateTime, ApiError> {
    let dob = parse_day(value)
        .ok_or_else(|| ApiError::bad_request("date_of_birth must be YYYY-MM-DD"))?;
    if dob >= today() {
        return Err(ApiError::bad_request("date_of_birth must be in the past"));
    }
    Ok(dob)
}

/// The user's KYC flag given their record's status; `None` once deleted.
fn kyc_flag_update(status: Option<KycStatus>) -> Document {
    doc! { "$set": {
        "kyc_verified": status == Some(KycStatus::Approved),
        "updated_at": DateTime::now(),
    } }
}

async fn set_kyc_verified(db: &DbConn, user_id: ObjectId, status: Option<KycStatus>) -> Result<(), ApiError> {
    db.collection::<User>(User::COLLECTION)
        .update_one(doc! { "_id": user_id }, kyc_flag_update(status), None)
        .await
        .map_err(ApiError::database)?;
    Ok(())
}

async fn find_kyc(db: &DbConn, filter: Document) -> Result<Kyc, ApiError> {
    db.collection::<Kyc>(Kyc::COLLECTION)
        .find_one(filter, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("KYC submission not found"))
}

#[openapi(tag = "KYC")]
#[post("/kyc", data = "<dto>")]
pub async fn submit_kyc(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<SubmitKycDto>,
) -> Result<Json<ApiResponse<KycResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let dob = date_of_birth(&dto.date_of_birth)?;

    let kycs = db.collection::<Kyc>(Kyc::COLLECTION);
    if kycs
        .find_one(doc! { "user_id": auth.user_id }, None)
        .await
        .map_err(ApiError::database)?
        .is_some()
    {
        return Err(ApiError::conflict("KYC already submitted"));
    }

    let now = DateTime::now();
    let mut kyc = Kyc {
        id: None,
        user_id: auth.user_id,
        full_name: dto.full_name.trim().to_string(),
        date_of_birth: dob,
        address: dto.address.trim().to_string(),
        document_type: dto.document_type,
        document_number: dto.document_number.trim().to_string(),
        document_front_image: dto.document_front_image.clone(),
        document_back_image: dto.document_back_image.clone(),
        selfie_image: dto.selfie_image.clone(),
        status: KycStatus::Pending,
        admin_note: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: now,
        updated_at: now,
    };

    let result = kycs.insert_one(&kyc, None).await.map_err(|e| {
        if is_duplicate_key(&e) {
            ApiError::conflict("KYC already submitted")
        } else {
            ApiError::database(e)
        }
    })?;
    kyc.id = result.inserted_id.as_object_id();

    info!("KYC submitted by {}", auth.user_id);

    Ok(Json(ApiResponse::success_with_message(
        "KYC submitted successfully",
        kyc.into(),
    )))
}

#[openapi(tag = "KYC")]
#[get("/kyc/me")]
pub async fn get_my_kyc(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<KycResponse>>, ApiError> {
    let kyc = find_kyc(db, doc! { "user_id": auth.user_id }).await?;
    Ok(Json(ApiResponse::success(kyc.into())))
}

/// Resubmits a record sent back for correction.
#[openapi(tag = "KYC")]
#[put("/kyc/me", data = "<dto>")]
pub async fn update_my_kyc(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<SubmitKycDto>,
) -> Result<Json<ApiResponse<KycResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let dob = date_of_birth(&dto.date_of_birth)?;
    let kyc = find_kyc(db, doc! { "user_id": auth.user_id }).await?;

    if !kyc.status.is_editable() {
        return Err(ApiError::bad_request(format!(
            "KYC cannot be edited while {}",
            kyc.status.as_str()
        )));
    }

    let document_type = mongodb::bson::to_bson(&dto.document_type).map_err(ApiError::database)?;

    let result = db
        .collection::<Kyc>(Kyc::COLLECTION)
        .update_one(
            doc! { "_id": kyc.id, "status": KycStatus::NeedsCorrection.as_str() },
            doc! { "$set": {
                "full_name": dto.full_name.trim(),
                "date_of_birth": dob,
                "address": dto.address.trim(),
                "document_type": document_type,
                "document_number": dto.document_number.trim(),
                "document_front_image": &dto.document_front_image,
                "document_back_image": dto.document_back_image.as_deref(),
                "selfie_image": &dto.selfie_image,
                "status": KycStatus::Pending.as_str(),
                "updated_at": DateTime::now(),
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.modified_count == 0 {
        return Err(ApiError::conflict("KYC was reviewed in the meantime, reload and try again"));
    }

    let kyc = find_kyc(db, doc! { "user_id": auth.user_id }).await?;

    Ok(Json(ApiResponse::success_with_message(
        "KYC resubmitted for review",
        kyc.into(),
    )))
}

#[openapi(tag = "KYC")]
#[delete("/kyc/<kyc_id>")]
pub async fn delete_kyc(
    db: &State<DbConn>,
    auth: AuthGuard,
    kyc_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let kyc_id = parse_id(&kyc_id, "KYC")?;
    let kyc = find_kyc(db, doc! { "_id": kyc_id }).await?;

    if kyc.user_id != auth.user_id && !auth.is_admin() {
        return Err(ApiError::forbidden("Not authorized to delete this KYC submission"));
    }

    db.collection::<Kyc>(Kyc::COLLECTION)
        .delete_one(doc! { "_id": kyc_id }, None)
        .await
        .map_err(ApiError::database)?;

    set_kyc_verified(db, kyc.user_id, None).await?;

    info!("KYC {} of user {} deleted by {}", kyc_id, kyc.user_id, auth.user_id);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "KYC submission deleted"
    }))))
}

// ==================== ADMIN ====================

#[openapi(tag = "Admin - KYC")]
#[get("/kyc?<query..>")]
pub async fn list_kyc(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: KycListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(query.page, query.limit);

    let mut filter = doc! {};
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status = KycStatus::parse(status.trim())
            .ok_or_else(|| ApiError::bad_request(format!("Invalid KYC status '{}'", status)))?;
        filter.insert("status", status.as_str());
    }

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": 1 })
        .build();

    let kycs = db.collection::<Kyc>(Kyc::COLLECTION);
    let mut cursor = kycs
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let mut submissions = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let kyc = cursor.deserialize_current().map_err(ApiError::database)?;
        submissions.push(KycResponse::from(kyc));
    }

    let total = kycs
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "submissions": submissions,
        "pagination": page.meta(total),
    }))))
}

#[openapi(tag = "Admin - KYC")]
#[get("/kyc/<kyc_id>", rank = 2)]
pub async fn get_kyc(
    db: &State<DbConn>,
    _admin: AdminGuard,
    kyc_id: String,
) -> Result<Json<ApiResponse<KycResponse>>, ApiError> {
    let kyc_id = parse_id(&kyc_id, "KYC")?;
    let kyc = find_kyc(db, doc! { "_id": kyc_id }).await?;
    Ok(Json(ApiResponse::success(kyc.into())))
}

#[openapi(tag = "Admin - KYC")]
#[put("/kyc/<kyc_id>/status", data = "<dto>")]
pub async fn review_kyc(
    db: &State<DbConn>,
    admin: AdminGuard,
    kyc_id: String,
    dto: Json<UpdateKycStatusDto>,
) -> Result<Json<ApiResponse<KycResponse>>, ApiError> {
    let kyc_id = parse_id(&kyc_id, "KYC")?;
    let kyc = find_kyc(db, doc! { "_id": kyc_id }).await?;

    if dto.status == KycStatus::Pending {
        return Err(ApiError::bad_request("Choose APPROVED, REJECTED or NEEDS_CORRECTION"));
    }

    let note = dto
        .admin_note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if dto.status.requires_note() && note.is_none() {
        return Err(ApiError::bad_request(format!(
            "An admin note is required for {}",
            dto.status.as_str()
        )));
    }

    let now = DateTime::now();
    db.collection::<Kyc>(Kyc::COLLECTION)
        .update_one(
            doc! { "_id": kyc_id },
            doc! { "$set": {
                "status": dto.status.as_str(),
                "admin_note": note,
                "reviewed_by": admin.auth.user_id,
                "reviewed_at": now,
                "updated_at": now,
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    set_kyc_verified(db, kyc.user_id, Some(dto.status)).await?;

    let message = match (dto.status, note) {
        (KycStatus::Approved, _) => "Your identity has been verified. You can now list items and book.".to_string(),
        (KycStatus::NeedsCorrection, Some(note)) => format!("Your KYC needs changes: {}", note),
        (_, Some(note)) => format!("Your KYC was rejected: {}", note),
        (_, None) => "Your KYC was rejected.".to_string(),
    };
    Notifier::notify(
        db,
        Notification::new(kyc.user_id, NotificationKind::Kyc, "KYC update", message),
    )
    .await;

    info!("KYC {} set to {} by {}", kyc_id, dto.status.as_str(), admin.auth.user_id);

    let kyc = find_kyc(db, doc! { "_id": kyc_id }).await?;
    Ok(Json(ApiResponse::success(kyc.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(update: &Document) -> bool {
        update.get_document("$set").unwrap().get_bool("kyc_verified").unwrap()
    }

    #[test]
    fn deleting_kyc_clears_the_user_flag() {
        assert!(!flag(&kyc_flag_update(None)));
    }

    #[test]
    fn only_approval_sets_the_user_flag() {
        assert!(flag(&kyc_flag_update(Some(KycStatus::Approved))));
        assert!(!flag(&kyc_flag_update(Some(KycStatus::Rejected))));
        assert!(!flag(&kyc_flag_update(Some(KycStatus::NeedsCorrection))));
        assert!(!flag(&kyc_flag_update(Some(KycStatus::Pending))));
    }

    #[test]
    fn date_of_birth_must_be_past() {
        assert!(date_of_birth("1990-05-17").is_ok());
        assert_eq!(
            date_of_birth("17/05/1990").unwrap_err().message,
            "date_of_birth must be YYYY-MM-DD"
        );
        assert_eq!(
            date_of_birth("2999-01-01").unwrap_err().message,
            "date_of_birth must be in the past"
        );
    }
}
