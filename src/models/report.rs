use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::to_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    InReview,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Open => "open",
            ReportStatus::InReview => "in_review",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Dismissed)
    }
}

/// A dispute or issue ticket raised by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub reporter_id: ObjectId,
    pub booking_id: Option<ObjectId>,
    pub item_id: Option<ObjectId>,
    pub reported_user_id: Option<ObjectId>,
    pub subject: String,
    pub description: String,
    pub status: ReportStatus,
    pub admin_note: Option<String>,
    pub resolved_by: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Report {
    pub const COLLECTION: &'static str = "reports";
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateReportDto {
    pub booking_id: Option<String>,
    pub item_id: Option<String>,
    pub reported_user_id: Option<String>,
    #[validate(length(min = 3, max = 150, message = "must be 3-150 characters"))]
    pub subject: String,
    #[validate(length(min = 10, max = 5000, message = "must be 10-5000 characters"))]
    pub description: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateReportStatusDto {
    pub status: ReportStatus,
    pub admin_note: Option<String>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct ReportListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReportResponse {
    pub id: String,
    pub reporter_id: String,
    pub booking_id: Option<String>,
    pub item_id: Option<String>,
    pub reported_user_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub status: ReportStatus,
    pub admin_note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Report> for ReportResponse {
    fn from(r: Report) -> Self {
        ReportResponse {
            id: r.id.map(|id| id.to_hex()).unwrap_or_default(),
            reporter_id: r.reporter_id.to_hex(),
            booking_id: r.booking_id.map(|id| id.to_hex()),
            item_id: r.item_id.map(|id| id.to_hex()),
            reported_user_id: r.reported_user_id.map(|id| id.to_hex()),
            subject: r.subject,
            description: r.description,
            status: r.status,
            admin_note: r.admin_note,
            created_at: to_iso(&r.created_at),
            updated_at: to_iso(&r.updated_at),
        }
    }
}
