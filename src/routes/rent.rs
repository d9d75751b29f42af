use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use log::info;
use crate::db::DbConn;
use crate::models::{
    Booking, BookingStatus, CreateRentDto, GeoLocation, NearbyRentQuery, Notification,
    NotificationKind, Rent, RentResponse, ReviewResponse, SearchRentQuery, UpdateRentDto,
    VerifyRentDto,
};
use crate::guards::{AdminGuard, AuthGuard, KycGuard};
use crate::services::Notifier;
use crate::utils::{
    parse_id, search_pattern, validate_coordinates, validate_dto, ApiError, ApiResponse, Page,
};

const DEFAULT_RADIUS_M: f64 = 10_000.0;
const MAX_RADIUS_M: f64 = 100_000.0;
const NEARBY_LIMIT: i64 = 50;

fn radius(requested: Option<f64>) -> f64 {
    requested
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(DEFAULT_RADIUS_M)
        .min(MAX_RADIUS_M)
}

fn visible_filter() -> Document {
    doc! { "admin_verified": true, "is_available": true }
}

/// `$set` for an owner edit. Every edit, availability toggles included,
/// sends the listing back to moderation.
fn rent_update(dto: &UpdateRentDto) -> Result<Document, ApiError> {
    let mut set = Document::new();

    if let Some(ref title) = dto.title {
        set.insert("title", title.trim());
    }
    if let Some(ref description) = dto.description {
        set.insert("description", description.trim());
    }
    if let Some(ref category) = dto.category {
        set.insert("category", category.trim().to_lowercase());
    }
    if let Some(price) = dto.price_per_day {
        set.insert("price_per_day", price);
    }
    if let Some(deposit) = dto.deposit {
        set.insert("deposit", deposit);
    }
    if let Some(ref images) = dto.images {
        set.insert("images", images.clone());
    }
    if let Some(ref address) = dto.address {
        set.insert("address", address.trim());
    }
    match (dto.longitude, dto.latitude) {
        (Some(lng), Some(lat)) => {
            if !validate_coordinates(lng, lat) {
                return Err(ApiError::bad_request("Invalid coordinates"));
            }
            let location = mongodb::bson::to_bson(&GeoLocation::point(lng, lat))
                .map_err(ApiError::database)?;
            set.insert("location", location);
        }
        (None, None) => {}
        _ => return Err(ApiError::bad_request("Longitude and latitude must be sent together")),
    }
    if let Some(available) = dto.is_available {
        set.insert("is_available", available);
    }

    if set.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    set.insert("admin_verified", false);
    set.insert("updated_at", DateTime::now());
    Ok(set)
}

/// Bookings that still expect the item to exist.
fn open_bookings_filter(item_id: ObjectId) -> Document {
    doc! {
        "item_id": item_id,
        "status": { "$nin": [
            BookingStatus::Cancelled.as_str(),
            BookingStatus::Rejected.as_str(),
            BookingStatus::Completed.as_str(),
        ] },
    }
}

async fn find_rent(db: &DbConn, rent_id: ObjectId) -> Result<Rent, ApiError> {
    db.collection::<Rent>(Rent::COLLECTION)
        .find_one(doc! { "_id": rent_id }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("Item not found"))
}

async fn collect_rents(
    db: &DbConn,
    filter: Document,
    options: FindOptions,
) -> Result<Vec<RentResponse>, ApiError> {
    let mut cursor = db
        .collection::<Rent>(Rent::COLLECTION)
        .find(filter, options)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let rent = cursor.deserialize_current().map_err(ApiError::database)?;
        items.push(RentResponse::from(rent));
    }
    Ok(items)
}

#[openapi(tag = "Rent")]
#[post("/rent", data = "<dto>")]
pub async fn create_rent(
    db: &State<DbConn>,
    kyc: KycGuard,
    dto: Json<CreateRentDto>,
) -> Result<Json<ApiResponse<RentResponse>>, ApiError> {
    validate_dto(&*dto)?;

    if !validate_coordinates(dto.longitude, dto.latitude) {
        return Err(ApiError::bad_request("Invalid coordinates"));
    }

    let now = DateTime::now();
    let mut rent = Rent {
        id: None,
        owner_id: kyc.auth.user_id,
        title: dto.title.trim().to_string(),
        description: dto.description.trim().to_string(),
        category: dto.category.trim().to_lowercase(),
        price_per_day: dto.price_per_day,
        deposit: dto.deposit.unwrap_or(0.0),
        images: dto.images.clone(),
        address: dto.address.trim().to_string(),
        location: GeoLocation::point(dto.longitude, dto.latitude),
        admin_verified: false,
        is_available: true,
        rating: 0.0,
        review_count: 0,
        created_at: now,
        updated_at: now,
        distance: None,
    };

    let result = db
        .collection::<Rent>(Rent::COLLECTION)
        .insert_one(&rent, None)
        .await
        .map_err(ApiError::database)?;
    rent.id = result.inserted_id.as_object_id();

    info!("Listing created by {}: {}", kyc.auth.user_id, rent.title);

    Ok(Json(ApiResponse::success_with_message(
        "Listing submitted for review",
        rent.into(),
    )))
}

/// Public browse and search over approved listings.
#[openapi(tag = "Rent")]
#[get("/rent?<query..>")]
pub async fn search_rents(
    db: &State<DbConn>,
    query: SearchRentQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(query.page, query.limit);
    let mut filter = visible_filter();

    if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
        filter.insert("category", category.trim().to_lowercase());
    }

    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = search_pattern(q);
        filter.insert("$or", vec![
            doc! { "title": { "$regex": &pattern, "$options": "i" } },
            doc! { "description": { "$regex": &pattern, "$options": "i" } },
            doc! { "address": { "$regex": &pattern, "$options": "i" } },
        ]);
    }

    let mut price = Document::new();
    if let Some(min) = query.min_price {
        price.insert("$gte", min);
    }
    if let Some(max) = query.max_price {
        price.insert("$lte", max);
    }
    if !price.is_empty() {
        filter.insert("price_per_day", price);
    }

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let items = collect_rents(db, filter.clone(), options).await?;
    let total = db
        .collection::<Rent>(Rent::COLLECTION)
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "items": items,
        "pagination": page.meta(total),
    }))))
}

/// Approved listings within `max_distance` metres, nearest first.
#[openapi(tag = "Rent")]
#[get("/rent/nearby?<query..>")]
pub async fn nearby_rents(
    db: &State<DbConn>,
    query: NearbyRentQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if !validate_coordinates(query.longitude, query.latitude) {
        return Err(ApiError::bad_request("Invalid coordinates"));
    }

    let max_distance = radius(query.max_distance);
    let limit = query.limit.unwrap_or(20).clamp(1, NEARBY_LIMIT);

    let mut match_filter = visible_filter();
    if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
        match_filter.insert("category", category.trim().to_lowercase());
    }

    // $geoNear must open the pipeline and already sorts by distance.
    let pipeline = vec![
        doc! {
            "$geoNear": {
                "near": {
                    "type": "Point",
                    "coordinates": [query.longitude, query.latitude]
                },
                "distanceField": "distance",
                "maxDistance": max_distance,
                "spherical": true,
                "key": "location",
                "query": match_filter,
            }
        },
        doc! { "$limit": limit },
    ];

    let mut cursor = db
        .collection::<Rent>(Rent::COLLECTION)
        .aggregate(pipeline, None)
        .await
        .map_err(ApiError::database)?;

    let mut items = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let document = cursor.deserialize_current().map_err(ApiError::database)?;
        let rent: Rent = mongodb::bson::from_document(document).map_err(ApiError::database)?;
        items.push(RentResponse::from(rent));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "items": items,
        "center": { "latitude": query.latitude, "longitude": query.longitude },
        "max_distance_meters": max_distance,
    }))))
}

#[openapi(tag = "Rent")]
#[get("/rent/mine?<page>&<limit>")]
pub async fn my_rents(
    db: &State<DbConn>,
    auth: AuthGuard,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(page, limit);
    let filter = doc! { "owner_id": auth.user_id };

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let items = collect_rents(db, filter.clone(), options).await?;
    let total = db
        .collection::<Rent>(Rent::COLLECTION)
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "items": items,
        "pagination": page.meta(total),
    }))))
}

/// Unapproved listings are only shown to their owner and to admins.
#[openapi(tag = "Rent")]
#[get("/rent/<rent_id>", rank = 2)]
pub async fn get_rent(
    db: &State<DbConn>,
    auth: Option<AuthGuard>,
    rent_id: String,
) -> Result<Json<ApiResponse<RentResponse>>, ApiError> {
    let object_id = parse_id(&rent_id, "item")?;
    let rent = find_rent(db, object_id).await?;

    if !rent.admin_verified {
        let allowed = auth
            .as_ref()
            .map(|a| a.user_id == rent.owner_id || a.is_admin())
            .unwrap_or(false);
        if !allowed {
            return Err(ApiError::not_found("Item not found"));
        }
    }

    Ok(Json(ApiResponse::success(rent.into())))
}

#[openapi(tag = "Rent")]
#[put("/rent/<rent_id>", data = "<dto>", rank = 2)]
pub async fn update_rent(
    db: &State<DbConn>,
    auth: AuthGuard,
    rent_id: String,
    dto: Json<UpdateRentDto>,
) -> Result<Json<ApiResponse<RentResponse>>, ApiError> {
    validate_dto(&*dto)?;
    let object_id = parse_id(&rent_id, "item")?;
    let rent = find_rent(db, object_id).await?;

    if rent.owner_id != auth.user_id {
        return Err(ApiError::forbidden("You can only edit your own listings"));
    }

    let update_doc = rent_update(&dto)?;

    db.collection::<Rent>(Rent::COLLECTION)
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_doc }, None)
        .await
        .map_err(ApiError::database)?;

    let rent = find_rent(db, object_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Listing updated and resubmitted for review",
        rent.into(),
    )))
}

#[openapi(tag = "Rent")]
#[delete("/rent/<rent_id>", rank = 2)]
pub async fn delete_rent(
    db: &State<DbConn>,
    auth: AuthGuard,
    rent_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&rent_id, "item")?;
    let rent = find_rent(db, object_id).await?;

    if rent.owner_id != auth.user_id && !auth.is_admin() {
        return Err(ApiError::forbidden("You can only delete your own listings"));
    }

    let open = db
        .collection::<Booking>(Booking::COLLECTION)
        .count_documents(open_bookings_filter(object_id), None)
        .await
        .map_err(ApiError::database)?;

    if open > 0 {
        return Err(ApiError::conflict(
            "Item has open bookings; reject, cancel or complete them first",
        ));
    }

    db.collection::<Rent>(Rent::COLLECTION)
        .delete_one(doc! { "_id": object_id }, None)
        .await
        .map_err(ApiError::database)?;

    info!("Listing {} deleted by {}", object_id, auth.user_id);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Listing deleted successfully"
    }))))
}

#[openapi(tag = "Rent")]
#[get("/rent/<rent_id>/reviews?<page>&<limit>")]
pub async fn rent_reviews(
    db: &State<DbConn>,
    rent_id: String,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = parse_id(&rent_id, "item")?;
    let rent = find_rent(db, object_id).await?;
    let page = Page::new(page, limit);

    let filter = doc! { "item_id": object_id, "review": { "$type": "object" } };
    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "review.created_at": -1 })
        .build();

    let bookings = db.collection::<Booking>(Booking::COLLECTION);
    let mut cursor = bookings
        .find(filter.clone(), options)
        .await
        .map_err(ApiError::database)?;

    let mut reviews = Vec::new();
    while cursor.advance().await.map_err(ApiError::database)? {
        let booking = cursor.deserialize_current().map_err(ApiError::database)?;
        if let Some(review) = booking.review {
            reviews.push(ReviewResponse::from(review));
        }
    }

    let total = bookings
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "rating": rent.rating,
        "review_count": rent.review_count,
        "reviews": reviews,
        "pagination": page.meta(total),
    }))))
}

// ==================== ADMIN ====================

#[openapi(tag = "Admin - Rent")]
#[get("/rent/admin/pending?<page>&<limit>")]
pub async fn pending_rents(
    db: &State<DbConn>,
    _admin: AdminGuard,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = Page::new(page, limit);
    let filter = doc! { "admin_verified": false };

    let options = FindOptions::builder()
        .skip(page.skip())
        .limit(page.limit)
        .sort(doc! { "created_at": 1 })
        .build();

    let items = collect_rents(db, filter.clone(), options).await?;
    let total = db
        .collection::<Rent>(Rent::COLLECTION)
        .count_documents(filter, None)
        .await
        .map_err(ApiError::database)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "items": items,
        "pagination": page.meta(total),
    }))))
}

#[openapi(tag = "Admin - Rent")]
#[put("/rent/<rent_id>/verify", data = "<dto>")]
pub async fn verify_rent(
    db: &State<DbConn>,
    admin: AdminGuard,
    rent_id: String,
    dto: Json<VerifyRentDto>,
) -> Result<Json<ApiResponse<RentResponse>>, ApiError> {
    let object_id = parse_id(&rent_id, "item")?;
    let rent = find_rent(db, object_id).await?;

    db.collection::<Rent>(Rent::COLLECTION)
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": {
                "admin_verified": dto.admin_verified,
                "updated_at": DateTime::now(),
            } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    let (title, mut message) = if dto.admin_verified {
        ("Listing approved", format!("Your listing \"{}\" is now live.", rent.title))
    } else {
        ("Listing not approved", format!("Your listing \"{}\" was not approved.", rent.title))
    };
    if let Some(note) = dto.note.as_deref().filter(|n| !n.trim().is_empty()) {
        message.push_str(&format!(" Note: {}", note.trim()));
    }

    Notifier::notify(
        db,
        Notification::new(rent.owner_id, NotificationKind::Listing, title, message)
            .with_item(Some(object_id)),
    )
    .await;

    info!(
        "Listing {} verification set to {} by {}",
        object_id, dto.admin_verified, admin.auth.user_id
    );

    let rent = find_rent(db, object_id).await?;
    Ok(Json(ApiResponse::success(rent.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_defaults_and_caps() {
        assert_eq!(radius(None), DEFAULT_RADIUS_M);
        assert_eq!(radius(Some(2_500.0)), 2_500.0);
        assert_eq!(radius(Some(1_000_000.0)), MAX_RADIUS_M);
        assert_eq!(radius(Some(-1.0)), DEFAULT_RADIUS_M);
        assert_eq!(radius(Some(f64::NAN)), DEFAULT_RADIUS_M);
    }

    fn no_changes() -> UpdateRentDto {
        UpdateRentDto {
            title: None,
            description: None,
            category: None,
            price_per_day: None,
            deposit: None,
            images: None,
            address: None,
            longitude: None,
            latitude: None,
            is_available: None,
        }
    }

    #[test]
    fn content_edit_resets_approval() {
        let dto = UpdateRentDto {
            title: Some(" Mountain bike ".into()),
            category: Some("Bikes".into()),
            ..no_changes()
        };
        let set = rent_update(&dto).unwrap();
        assert_eq!(set.get_str("title").unwrap(), "Mountain bike");
        assert_eq!(set.get_str("category").unwrap(), "bikes");
        assert_eq!(set.get_bool("admin_verified").unwrap(), false);
    }

    #[test]
    fn availability_toggle_also_resets_approval() {
        let dto = UpdateRentDto { is_available: Some(false), ..no_changes() };
        let set = rent_update(&dto).unwrap();
        assert_eq!(set.get_bool("is_available").unwrap(), false);
        assert_eq!(set.get_bool("admin_verified").unwrap(), false);
    }

    #[test]
    fn location_needs_both_coordinates() {
        let dto = UpdateRentDto { longitude: Some(85.3), ..no_changes() };
        assert!(rent_update(&dto).is_err());

        let dto = UpdateRentDto { longitude: Some(85.3), latitude: Some(27.7), ..no_changes() };
        let set = rent_update(&dto).unwrap();
        let coordinates = set.get_document("location").unwrap().get_array("coordinates").unwrap();
        assert_eq!(coordinates.len(), 2);
    }

    #[test]
    fn empty_edit_is_rejected() {
        assert_eq!(rent_update(&no_changes()).unwrap_err().message, "Nothing to update");
    }

    #[test]
    fn pending_bookings_block_deletion() {
        let item = ObjectId::new();
        let filter = open_bookings_filter(item);
        let excluded = filter.get_document("status").unwrap().get_array("$nin").unwrap();
        let excluded: Vec<&str> = excluded.iter().filter_map(|s| s.as_str()).collect();
        assert_eq!(excluded, vec!["cancelled", "rejected", "completed"]);
        for live in [BookingStatus::Pending, BookingStatus::PaymentPending, BookingStatus::Confirmed, BookingStatus::Active] {
            assert!(!excluded.contains(&live.as_str()));
        }
    }

    #[test]
    fn public_filter_requires_approval_and_availability() {
        let filter = visible_filter();
        assert_eq!(filter.get_bool("admin_verified").unwrap(), true);
        assert_eq!(filter.get_bool("is_available").unwrap(), true);
    }
}
