use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime, Document};
use mongodb::options::FindOptions;
use log::{info, warn};
use crate::db::DbConn;
use crate::models::{
    party_may_set, total_price, AvailabilityQuery, Booking, BookingListQuery, BookingResponse,
    BookingReview, BookingStatus, CreateBookingDto, CreateReviewDto, Notification,
    NotificationKind, Rent, StatusChange, UpdateBookingStatusDto, User,
};
use crate::guards::{AdminGuard, AuthGuard, KycGuard};
use crate::services::availability::{is_available, overlap_filter};
use crate::services::{BookingLocks, EmailService, Notifier};
use crate::utils::dates::{days_between, parse_day, to_day, today};
use crate::utils::{parse_id, validate_dto, ApiError, ApiResponse, Page};

pub(crate) async fn find_booking(db: &DbConn, booking_id: ObjectId) -> Result<Booking, ApiError> {
    db.collection::<Booking>(Booking::COLLECTION)
        .find_one(doc! { "_id": booking_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Booking not found"))
}

async fn item_title(db: &DbConn, item_id: ObjectId) -> String {
    match db
        .collection::<Rent>(Rent::COLLECTION)
        .find_one(doc! { "_id": item_id }, None)
        .await
    {
        Ok(Some(rent)) => rent.title,
        _ => "your item".to_string(),
    }
}

fn parse_status(value: &str) -> Result<BookingStatus, ApiError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| ApiError::bad_request(format!("Invalid booking status '{}'", value)))
}

/// Parses `[start, end)` calendar days and checks they form a bookable range.
fn booking_range(start: &str, end: &str) -> Result<(DateTime, DateTime), ApiError> {
    let start = parse_day(start)
        .ok_or_else(|| ApiError::bad_request("start_date must be YYYY-MM-DD"))?;
    let end = parse_day(end)
        .ok_or_else(|| ApiError::bad_request("end_date must be YYYY-MM-DD"))?;

    if start < today() {
        return Err(ApiError::bad_request("start_date cannot be in the past"));
    }
    if end <= start {
        return Err(ApiError::bad_request("end_date must be after start_date"));
    }
    Ok((start, end))
}

pub(crate) fn history_entry(change: &StatusChange) -> Result<mongodb::bson::Bson, ApiError> {
    to_bson(change).map_err(ApiError::database)
}

/// Tells both parties about a status change and emails the renter.
pub(crate) async fn announce_status(
    db: &DbConn,
    booking: &Booking,
    status: BookingStatus,
    reason: Option<&str>,
) {
    let title = item_title(db, booking.item_id).await;
    let mut message = format!("Booking for \"{}\" is now {}.", title, status);
    if let Some(reason) = reason {
        message.push_str(&format!(" Reason: {}", reason));
    }

    let notifications = [booking.lender_id, booking.renter_id]
        .into_iter()
        .map(|user_id| {
            Notification::new(user_id, NotificationKind::Booking, "Booking updated", message.clone())
                .with_booking(booking.id)
                .with_item(Some(booking.item_id))
        })
        .collect();
    Notifier::notify_all(db, notifications).await;

    match db
        .collection::<User>(User::COLLECTION)
        .find_one(doc! { "_id": booking.renter_id }, None)
        .await
    {
        Ok(Some(renter)) => {
            EmailService::send_booking_status_email(&renter.email, &renter.name, &title, status, reason).await;
        }
        Ok(None) => warn!("Renter {} missing for booking email", booking.renter_id),
        Err(e) => warn!("Failed to load renter for booking email: {}", e),
    }
}

async fn list_bookings(
    db: &DbConn,
    mut filter: Document,
    query: &BookingListQuery,
) -> Result<serde_json::Value, ApiError> {
    let page = Page::new(query.page, query.limit);
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        filter.insert("status", parse_status(status)?.as_str());
    }

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let bookings = db.collection::<Booking>(Booking::COLLECTION);
    let mut cursor = bookings
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let booking = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(BookingResponse::from(booking));
    }

    let total = bookings
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(serde_json::json!({
        "bookings": items,
        "pagination": page.meta(total),
    }))
}

#[openapi(tag = "Booking")]
#[post("/bookings", data = "<dto>")]
pub async fn create_booking(
    db: &State<DbConn>,
    locks: &State<BookingLocks>,
    kyc: KycGuard,
    dto: Json<CreateBookingDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let renter_id = kyc.auth.user_id;
    let item_id = parse_id(&dto.item_id, "item")?;
    let (start, end) = booking_range(&dto.start_date, &dto.end_date)?;

    let rent = db
        .collection::<Rent>(Rent::COLLECTION)
        .find_one(doc! { "_id": item_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;

    if rent.owner_id == renter_id {
        return Err(ApiError::bad_request("You cannot book your own item"));
    }
    if !rent.is_visible() {
        return Err(ApiError::bad_request("Item is not available for booking"));
    }

    let now = DateTime::now();
    let mut booking = Booking {
        id: None,
        item_id,
        lender_id: rent.owner_id,
        renter_id,
        start_date: start,
        end_date: end,
        status: BookingStatus::Pending,
        total_price: total_price(days_between(start, end), rent.price_per_day),
        deposit_amount: rent.deposit,
        message: dto.message.as_deref().map(str::trim).filter(|m| !m.is_empty()).map(String::from),
        status_reason: None,
        payment: None,
        review: None,
        history: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    {
        let _lock = locks.lock(item_id).await;

        if !is_available(db, item_id, start, end)
            .await
            .map_err(ApiError::database)?
        {
            return Err(ApiError::conflict("Item is already booked for the selected dates"));
        }

        let result = db
            .collection::<Booking>(Booking::COLLECTION)
            .insert_one(&booking, None)
            .await
            .map_err(ApiError::database)?;
        booking.id = result.inserted_id.as_object_id();
    }

    info!(
        "Booking {:?} requested by {} for item {} ({} to {})",
        booking.id, renter_id, item_id, to_day(&start), to_day(&end)
    );

    Notifier::notify_all(db, vec![
        Notification::new(
            booking.lender_id,
            NotificationKind::Booking,
            "New booking request",
            format!("New request for \"{}\" from {} to {}.", rent.title, to_day(&start), to_day(&end)),
        )
        .with_booking(booking.id)
        .with_item(Some(item_id)),
        Notification::new(
            renter_id,
            NotificationKind::Booking,
            "Booking requested",
            format!("Your request for \"{}\" was sent to the owner.", rent.title),
        )
        .with_booking(booking.id)
        .with_item(Some(item_id)),
    ])
    .await;

    Ok(Json(ApiResponse::success_with_message(
        "Booking request sent",
        booking.into(),
    )))
}

/// Whether `[start_date, end_date)` is free, with a price quote and the
/// bookings already holding dates in that window.
#[openapi(tag = "Booking")]
#[get("/bookings/availability/<item_id>?<query..>")]
pub async fn check_availability(
    db: &State<DbConn>,
    item_id: String,
    query: AvailabilityQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let item_id = parse_id(&item_id, "item")?;
    let (start, end) = booking_range(&query.start_date, &query.end_date)?;

    let rent = db
        .collection::<Rent>(Rent::COLLECTION)
        .find_one(doc! { "_id": item_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;

    let options = FindOptions::builder().sort(doc! { "start_date": 1 }).build();
    let mut cursor = db
        .collection::<Booking>(Booking::COLLECTION)
        .find(overlap_filter(item_id, start, end), options)
        .await
        .map_err(ApiError::database)?;

    let mut booked = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let booking = cursor.deserialize_current().map_err(ApiError::database)?;
        booked.push(serde_json::json!({
            "start_date": to_day(&booking.start_date),
            "end_date": to_day(&booking.end_date),
        }));
    }

    let days = days_between(start, end);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "available": booked.is_empty() && rent.is_visible(),
        "days": days,
        "total_price": total_price(days, rent.price_per_day),
        "deposit_amount": rent.deposit,
        "booked": booked,
    }))))
}

#[openapi(tag = "Booking")]
#[get("/bookings/renter?<query..>")]
pub async fn renter_bookings(
    db: &State<DbConn>,
    auth: AuthGuard,
    query: BookingListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_bookings(db, doc! { "renter_id": auth.user_id }, &query).await?;
    Ok(Json(ApiResponse::success(data)))
}

#[openapi(tag = "Booking")]
#[get("/bookings/lender?<query..>")]
pub async fn lender_bookings(
    db: &State<DbConn>,
    auth: AuthGuard,
    query: BookingListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_bookings(db, doc! { "lender_id": auth.user_id }, &query).await?;
    Ok(Json(ApiResponse::success(data)))
}

#[openapi(tag = "Booking")]
#[get("/bookings/<booking_id>", rank = 2)]
pub async fn get_booking(
    db: &State<DbConn>,
    auth: AuthGuard,
    booking_id: String,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = find_booking(db, booking_id).await?;

    if booking.party_of(&auth.user_id).is_none() && !auth.is_admin() {
        return Err(ApiError::forbidden("Not authorized to view this booking"));
    }

    Ok(Json(ApiResponse::success(booking.into())))
}

#[openapi(tag = "Booking")]
#[put("/bookings/<booking_id>/status", data = "<dto>")]
pub async fn update_booking_status(
    db: &State<DbConn>,
    auth: AuthGuard,
    booking_id: String,
    dto: Json<UpdateBookingStatusDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = find_booking(db, booking_id).await?;
    let next = dto.status;

    match booking.party_of(&auth.user_id) {
        Some(party) if party_may_set(party, next) => {}
        Some(_) if auth.is_admin() => {}
        None if auth.is_admin() => {}
        Some(_) => {
            return Err(ApiError::forbidden(format!(
                "You are not allowed to mark this booking {}",
                next
            )))
        }
        None => return Err(ApiError::forbidden("Not authorized to update this booking")),
    }

    if booking.status.is_terminal() {
        return Err(ApiError::bad_request(format!("Booking is already {}", booking.status)));
    }
    if !booking.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot change booking from {} to {}",
            booking.status, next
        )));
    }

    let reason = dto
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from);
    if next.requires_reason() && reason.is_none() {
        return Err(ApiError::bad_request(format!("A reason is required to mark a booking {}", next)));
    }

    let change = StatusChange::new(booking.status, next, auth.user_id, reason.clone());
    let mut set = doc! {
        "status": next.as_str(),
        "updated_at": DateTime::now(),
    };
    if let Some(ref reason) = reason {
        set.insert("status_reason", reason);
    }

    let entry = history_entry(&change)?;

    // Matching on the current status makes concurrent updates lose cleanly.
    let result = db
        .collection::<Booking>(Booking::COLLECTION)
        .update_one(
            doc! { "_id": booking_id, "status": booking.status.as_str() },
            doc! { "$set": set, "$push": { "history": entry } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.modified_count == 0 {
        return Err(ApiError::conflict("Booking was updated by someone else, reload and try again"));
    }

    info!("Booking {} {} -> {} by {}", booking_id, booking.status, next, auth.user_id);

    let updated = find_booking(db, booking_id).await?;
    announce_status(db, &updated, next, reason.as_deref()).await;

    Ok(Json(ApiResponse::success_with_message(
        format!("Booking marked {}", next),
        updated.into(),
    )))
}

#[openapi(tag = "Booking")]
#[post("/bookings/<booking_id>/review", data = "<dto>")]
pub async fn review_booking(
    db: &State<DbConn>,
    auth: AuthGuard,
    booking_id: String,
    dto: Json<CreateReviewDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = find_booking(db, booking_id).await?;

    let party = booking
        .party_of(&auth.user_id)
        .ok_or_else(|| ApiError::forbidden("Only the lender or renter can review this booking"))?;

    if booking.status != BookingStatus::Completed {
        return Err(ApiError::bad_request("Only completed bookings can be reviewed"));
    }
    if booking.review.is_some() {
        return Err(ApiError::conflict("This booking has already been reviewed"));
    }

    let review = BookingReview {
        rating: dto.rating,
        comment: dto.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(String::from),
        role: party,
        author_id: auth.user_id,
        created_at: DateTime::now(),
    };

    let review_doc = to_bson(&review).map_err(ApiError::database)?;

    let bookings = db.collection::<Booking>(Booking::COLLECTION);
    let result = bookings
        .update_one(
            doc! { "_id": booking_id, "review": null },
            doc! { "$set": {
                "review": review_doc,
                "updated_at": DateTime::now(),
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.modified_count == 0 {
        return Err(ApiError::conflict("This booking has already been reviewed"));
    }

    // Recompute the listing aggregate from every reviewed booking.
    let pipeline = vec![
        doc! { "$match": { "item_id": booking.item_id, "review": { "$type": "object" } } },
        doc! { "$group": {
            "_id": null,
            "rating": { "$avg": "$review.rating" },
            "count": { "$sum": 1 },
        } },
    ];
    let mut cursor = bookings
        .aggregate(pipeline, None)
        .await
        .map_err(ApiError::database)?;

    if cursor.advance().await.map_err(ApiError::database)? {
        let stats = cursor.deserialize_current().map_err(ApiError::database)?;
        let rating = stats.get_f64("rating").unwrap_or(0.0);
        let count = stats.get_i32("count").unwrap_or(0);

        db.collection::<Rent>(Rent::COLLECTION)
            .update_one(
                doc! { "_id": booking.item_id },
                doc! { "$set": {
                    "rating": (rating * 10.0).round() / 10.0,
                    "review_count": count,
                    "updated_at": DateTime::now(),
                } },
                None,
            )
            .await
            .map_err(ApiError::database)?;
    }

    Notifier::notify(
        db,
        Notification::new(
            booking.counterpart(&auth.user_id),
            NotificationKind::Review,
            "New review",
            format!("You received a {}-star review.", dto.rating),
        )
        .with_booking(Some(booking_id))
        .with_item(Some(booking.item_id)),
    )
    .await;

    let updated = find_booking(db, booking_id).await?;
    Ok(Json(ApiResponse::success_with_message(
        "Review submitted",
        updated.into(),
    )))
}

// ==================== ADMIN ====================

#[openapi(tag = "Admin - Booking")]
#[get("/bookings?<query..>")]
pub async fn all_bookings(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: BookingListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_bookings(db, doc! {}, &query).await?;
    Ok(Json(ApiResponse::success(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dates::DAY_MS;

    fn day_offset(days: i64) -> String {
        to_day(&DateTime::from_millis(today().timestamp_millis() + days * DAY_MS))
    }

    #[test]
    fn range_must_start_today_or_later() {
        assert!(booking_range(&day_offset(0), &day_offset(1)).is_ok());
        let err = booking_range(&day_offset(-1), &day_offset(2)).unwrap_err();
        assert_eq!(err.message, "start_date cannot be in the past");
    }

    #[test]
    fn range_end_must_follow_start() {
        let err = booking_range(&day_offset(3), &day_offset(3)).unwrap_err();
        assert_eq!(err.message, "end_date must be after start_date");
        assert!(booking_range(&day_offset(3), &day_offset(2)).is_err());
    }

    #[test]
    fn range_rejects_garbage_dates() {
        let err = booking_range("tomorrow", &day_offset(2)).unwrap_err();
        assert_eq!(err.message, "start_date must be YYYY-MM-DD");
    }

    #[test]
    fn status_filter_parsing() {
        assert_eq!(parse_status("Payment_Pending").unwrap(), BookingStatus::PaymentPending);
        assert!(parse_status("archived").is_err());
    }
}
