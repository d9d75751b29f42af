use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use log::info;
use crate::db::DbConn;
use crate::models::{
    Booking, CreateReportDto, Notification, NotificationKind, Report, ReportListQuery,
    ReportResponse, ReportStatus, UpdateReportStatusDto,
};
use crate::guards::{AdminGuard, AuthGuard};
use crate::services::Notifier;
use crate::utils::{parse_id, validate_dto, ApiError, ApiResponse, Page};

fn parse_optional_id(value: Option<&str>, what: &str) -> Result<Option<ObjectId>, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_id(v, what))
        .transpose()
}

fn parse_report_status(value: &str) -> Result<ReportStatus, ApiError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| ApiError::bad_request(format!("Invalid report status '{}'", value)))
}

async fn list_reports(
    db: &DbConn,
    mut filter: Document,
    query: &ReportListQuery,
) -> Result<serde_json::Value, ApiError> {
    let page = Page::new(query.page, query.limit);
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        filter.insert("status", parse_report_status(status)?.as_str());
    }

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let reports = db.collection::<Report>(Report::COLLECTION);
    let mut cursor = reports
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let report = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(ReportResponse::from(report));
    }

    let total = reports
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(serde_json::json!({
        "reports": items,
        "pagination": page.meta(total),
    }))
}

#[openapi(tag = "Report")]
#[post("/report", data = "<dto>")]
pub async fn create_report(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<CreateReportDto>,
) -> Result<Json<ApiResponse<ReportResponse>>, ApiError> {
    validate_dto(&*dto)?;

    let booking_id = parse_optional_id(dto.booking_id.as_deref(), "booking")?;
    let mut item_id = parse_optional_id(dto.item_id.as_deref(), "item")?;
    let mut reported_user_id = parse_optional_id(dto.reported_user_id.as_deref(), "user")?;

    // A booking report must come from one of its parties; it fills in the
    // item and the other party when they were left out.
    if let Some(booking_id) = booking_id {
        let booking = db
            .collection::<Booking>(Booking::COLLECTION)
            .find_one(doc! { "_id": booking_id }, None)
            .await
            .map_err(ApiError::database)?
            .ok_or_else(|| ApiError::not_found("Booking not found"))?;

        if booking.party_of(&auth.user_id).is_none() {
            return Err(ApiError::forbidden("You can only report your own bookings"));
        }
        item_id.get_or_insert(booking.item_id);
        reported_user_id.get_or_insert(booking.counterpart(&auth.user_id));
    }

    if reported_user_id == Some(auth.user_id) {
        return Err(ApiError::bad_request("You cannot report yourself"));
    }

    let now = DateTime::now();
    let mut report = Report {
        id: None,
        reporter_id: auth.user_id,
        booking_id,
        item_id,
        reported_user_id,
        subject: dto.subject.trim().to_string(),
        description: dto.description.trim().to_string(),
        status: ReportStatus::Open,
        admin_note: None,
        resolved_by: None,
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<Report>(Report::COLLECTION)
        .insert_one(&report, None)
        .await
        .map_err(ApiError::database)?;
    report.id = result.inserted_id.as_object_id();

    info!("Report {:?} filed by {}", report.id, auth.user_id);

    Ok(Json(ApiResponse::success_with_message(
        "Report submitted. Our team will review it shortly.",
        report.into(),
    )))
}

#[openapi(tag = "Report")]
#[get("/report/mine?<query..>")]
pub async fn my_reports(
    db: &State<DbConn>,
    auth: AuthGuard,
    query: ReportListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_reports(db, doc! { "reporter_id": auth.user_id }, &query).await?;
    Ok(Json(ApiResponse::success(data)))
}

// ==================== ADMIN ====================

#[openapi(tag = "Admin - Report")]
#[get("/report?<query..>")]
pub async fn all_reports(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: ReportListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_reports(db, doc! {}, &query).await?;
    Ok(Json(ApiResponse::success(data)))
}

#[openapi(tag = "Admin - Report")]
#[put("/report/<report_id>/status", data = "<dto>")]
pub async fn update_report_status(
    db: &State<DbConn>,
    admin: AdminGuard,
    report_id: String,
    dto: Json<UpdateReportStatusDto>,
) -> Result<Json<ApiResponse<ReportResponse>>, ApiError> {
    let report_id = parse_id(&report_id, "report")?;
    let reports = db.collection::<Report>(Report::COLLECTION);

    let report = reports
        .find_one(doc! { "_id": report_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Report not found"))?;

    let mut set = doc! {
        "status": dto.status.as_str(),
        "updated_at": DateTime::now(),
    };
    if let Some(note) = dto.admin_note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        set.insert("admin_note", note);
    }
    if dto.status.is_closed() {
        set.insert("resolved_by", admin.auth.user_id);
    }

    reports
        .update_one(doc! { "_id": report_id }, doc! { "$set": set }, None)
        .await
        .map_err(ApiError::database)?;

    if report.status != dto.status {
        Notifier::notify(
            db,
            Notification::new(
                report.reporter_id,
                NotificationKind::Report,
                "Report update",
                format!("Your report \"{}\" is now {}.", report.subject, dto.status.as_str().replace('_', " ")),
            )
            .with_booking(report.booking_id)
            .with_item(report.item_id),
        )
        .await;
    }

    info!("Report {} set to {} by {}", report_id, dto.status.as_str(), admin.auth.user_id);

    let report = reports
        .find_one(doc! { "_id": report_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Report not found"))?;

    Ok(Json(ApiResponse::success(report.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_ids() {
        assert_eq!(parse_optional_id(None, "item").unwrap(), None);
        assert_eq!(parse_optional_id(Some("  "), "item").unwrap(), None);
        let id = ObjectId::new();
        assert_eq!(parse_optional_id(Some(&id.to_hex()), "item").unwrap(), Some(id));
        assert_eq!(parse_optional_id(Some("nope"), "item").unwrap_err().message, "Invalid item ID");
    }

    #[test]
    fn report_status_filter() {
        assert_eq!(parse_report_status("IN_REVIEW").unwrap(), ReportStatus::InReview);
        assert!(parse_report_status("closed").is_err());
    }
}
