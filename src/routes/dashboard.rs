use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, Document};
use serde_json::{Map, Value};
use crate::db::DbConn;
use crate::models::{Booking, BookingStatus, Kyc, KycStatus, Rent, Report, ReportStatus, User};
use crate::guards::AdminGuard;
use crate::utils::{ApiError, ApiResponse};

async fn count<T: Send + Sync>(db: &DbConn, collection: &str, filter: Document) -> Result<u64, ApiError> {
    db.collection::<T>(collection)
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)
}

/// Every status appears in the map, zero when no booking has it.
fn status_counts(groups: &[(String, i64)]) -> Map<String, Value> {
    let mut counts = Map::new();
    for status in [
        BookingStatus::Pending,
        BookingStatus::PaymentPending,
        BookingStatus::Confirmed,
        BookingStatus::Active,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rejected,
    ] {
        let n = groups
            .iter()
            .find(|(name, _)| name == status.as_str())
            .map(|(_, n)| *n)
            .unwrap_or(0);
        counts.insert(status.as_str().to_string(), Value::from(n));
    }
    counts
}

#[openapi(tag = "Admin - Dashboard")]
#[get("/dashboard/stats")]
pub async fn dashboard_stats(
    db: &State<DbConn>,
    _admin: AdminGuard,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let users = count::<User>(db, User::COLLECTION, doc! {}).await?;
    let active_users = count::<User>(db, User::COLLECTION, doc! { "is_active": true }).await?;
    let kyc_verified_users = count::<User>(db, User::COLLECTION, doc! { "kyc_verified": true }).await?;

    let listings = count::<Rent>(db, Rent::COLLECTION, doc! {}).await?;
    let pending_listings = count::<Rent>(db, Rent::COLLECTION, doc! { "admin_verified": false }).await?;

    let bookings = count::<Booking>(db, Booking::COLLECTION, doc! {}).await?;
    let pending_kyc = count::<Kyc>(db, Kyc::COLLECTION, doc! { "status": KycStatus::Pending.as_str() }).await?;
    let open_reports = count::<Report>(
        db,
        Report::COLLECTION,
        doc! { "status": { "$in": [ReportStatus::Open.as_str(), ReportStatus::InReview.as_str()] } },
    )
    .await?;

    let collection = db.collection::<Booking>(Booking::COLLECTION);

    let mut cursor = collection
        .aggregate(
            vec![doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } }],
            None,
        )
        .await
        .map_err(ApiError::database)?;
    let mut groups = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let group = cursor.deserialize_current().map_err(ApiError::database)?;
        if let Ok(status) = group.get_str("_id") {
            let n = group
                .get_i32("count")
                .map(i64::from)
                .or_else(|_| group.get_i64("count"))
                .unwrap_or(0);
            groups.push((status.to_string(), n));
        }
    }

    let mut cursor = collection
        .aggregate(
            vec![
                doc! { "$match": { "status": BookingStatus::Completed.as_str() } },
                doc! { "$group": { "_id": null, "revenue": { "$sum": "$total_price" } } },
            ],
            None,
        )
        .await
        .map_err(ApiError::database)?;
    let revenue = if cursor.advance().await.map_err(ApiError::database)? {
        let total = cursor.deserialize_current().map_err(ApiError::database)?;
        total.get_f64("revenue").unwrap_or(0.0)
    } else {
        0.0
    };

    Ok(Json(ApiResponse::success(serde_json::json!({
        "users": {
            "total": users,
            "active": active_users,
            "kyc_verified": kyc_verified_users,
        },
        "listings": {
            "total": listings,
            "pending_approval": pending_listings,
        },
        "bookings": {
            "total": bookings,
            "by_status": status_counts(&groups),
        },
        "kyc_pending": pending_kyc,
        "reports_open": open_reports,
        "revenue": (revenue * 100.0).round() / 100.0,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_statuses_count_as_zero() {
        let counts = status_counts(&[("completed".into(), 4), ("pending".into(), 2)]);
        assert_eq!(counts.len(), 7);
        assert_eq!(counts["completed"], 4);
        assert_eq!(counts["pending"], 2);
        assert_eq!(counts["rejected"], 0);
    }
}
