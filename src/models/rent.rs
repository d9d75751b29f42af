use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::to_iso;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeoLocation {
    #[serde(rename = "type")]
    pub geo_type: String, // "Point"
    pub coordinates: [f64; 2], // [longitude, latitude]
}

impl GeoLocation {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        GeoLocation {
            geo_type: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }
}

/// A listed item.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Rent {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub owner_id: ObjectId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price_per_day: f64,
    #[serde(default)]
    pub deposit: f64,
    pub images: Vec<String>,
    pub address: String,
    pub location: GeoLocation,
    pub admin_verified: bool,
    pub is_available: bool,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    /// Filled by `$geoNear`.
    #[serde(default, skip_serializing)]
    pub distance: Option<f64>,
}

impl Rent {
    pub const COLLECTION: &'static str = "rents";

    /// Shoppers only ever see approved, available listings.
    pub fn is_visible(&self) -> bool {
        self.admin_verified && self.is_available
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateRentDto {
    #[validate(length(min = 3, max = 120, message = "must be 3-120 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 5000, message = "is required"))]
    pub description: String,
    #[validate(length(min = 1, max = 60, message = "is required"))]
    pub category: String,
    #[validate(range(min = 0.01, message = "must be positive"))]
    pub price_per_day: f64,
    #[validate(range(min = 0.0, message = "cannot be negative"))]
    pub deposit: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
    #[validate(length(min = 1, message = "is required"))]
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateRentDto {
    #[validate(length(min = 3, max = 120, message = "must be 3-120 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "cannot be empty"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 60, message = "cannot be empty"))]
    pub category: Option<String>,
    #[validate(range(min = 0.01, message = "must be positive"))]
    pub price_per_day: Option<f64>,
    #[validate(range(min = 0.0, message = "cannot be negative"))]
    pub deposit: Option<f64>,
    pub images: Option<Vec<String>>,
    pub address: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyRentDto {
    pub admin_verified: bool,
    pub note: Option<String>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct SearchRentQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct NearbyRentQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres.
    pub max_distance: Option<f64>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RentResponse {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price_per_day: f64,
    pub deposit: f64,
    pub images: Vec<String>,
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
    pub admin_verified: bool,
    pub is_available: bool,
    pub rating: f64,
    pub review_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Rent> for RentResponse {
    fn from(rent: Rent) -> Self {
        RentResponse {
            id: rent.id.map(|id| id.to_hex()).unwrap_or_default(),
            owner_id: rent.owner_id.to_hex(),
            title: rent.title,
            description: rent.description,
            category: rent.category,
            price_per_day: rent.price_per_day,
            deposit: rent.deposit,
            images: rent.images,
            address: rent.address,
            longitude: rent.location.coordinates[0],
            latitude: rent.location.coordinates[1],
            admin_verified: rent.admin_verified,
            is_available: rent.is_available,
            rating: rent.rating,
            review_count: rent.review_count,
            distance_meters: rent.distance,
            created_at: to_iso(&rent.created_at),
            updated_at: to_iso(&rent.updated_at),
        }
    }
}
