use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::{to_day, to_iso};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Citizenship,
    Passport,
    NationalId,
    DrivingLicense,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
    NeedsCorrection,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "PENDING",
            KycStatus::Approved => "APPROVED",
            KycStatus::Rejected => "REJECTED",
            KycStatus::NeedsCorrection => "NEEDS_CORRECTION",
        }
    }

    /// Only submissions sent back for correction may be edited by the owner.
    pub fn is_editable(&self) -> bool {
        matches!(self, KycStatus::NeedsCorrection)
    }

    /// Admin decisions other than approval must carry a note for the user.
    pub fn requires_note(&self) -> bool {
        matches!(self, KycStatus::Rejected | KycStatus::NeedsCorrection)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Some(KycStatus::Pending),
            "APPROVED" => Some(KycStatus::Approved),
            "REJECTED" => Some(KycStatus::Rejected),
            "NEEDS_CORRECTION" => Some(KycStatus::NeedsCorrection),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Kyc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub full_name: String,
    pub date_of_birth: DateTime,
    pub address: String,
    pub document_type: DocumentType,
    pub document_number: String,
    pub document_front_image: String,
    pub document_back_image: Option<String>,
    pub selfie_image: String,
    pub status: KycStatus,
    pub admin_note: Option<String>,
    pub reviewed_by: Option<ObjectId>,
    pub reviewed_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Kyc {
    pub const COLLECTION: &'static str = "kycs";
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct SubmitKycDto {
    #[validate(length(min = 1, max = 120, message = "is required"))]
    pub full_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    #[validate(length(min = 1, message = "is required"))]
    pub address: String,
    pub document_type: DocumentType,
    #[validate(length(min = 3, max = 40, message = "must be 3-40 characters"))]
    pub document_number: String,
    #[validate(length(min = 1, message = "is required"))]
    pub document_front_image: String,
    pub document_back_image: Option<String>,
    #[validate(length(min = 1, message = "is required"))]
    pub selfie_image: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateKycStatusDto {
    pub status: KycStatus,
    pub admin_note: Option<String>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct KycListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct KycResponse {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub date_of_birth: String,
    pub address: String,
    pub document_type: DocumentType,
    pub document_number: String,
    pub document_front_image: String,
    pub document_back_image: Option<String>,
    pub selfie_image: String,
    pub status: KycStatus,
    pub admin_note: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Kyc> for KycResponse {
    fn from(kyc: Kyc) -> Self {
        KycResponse {
            id: kyc.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: kyc.user_id.to_hex(),
            full_name: kyc.full_name,
            date_of_birth: to_day(&kyc.date_of_birth),
            address: kyc.address,
            document_type: kyc.document_type,
            document_number: kyc.document_number,
            document_front_image: kyc.document_front_image,
            document_back_image: kyc.document_back_image,
            selfie_image: kyc.selfie_image,
            status: kyc.status,
            admin_note: kyc.admin_note,
            reviewed_at: kyc.reviewed_at.as_ref().map(to_iso),
            created_at: to_iso(&kyc.created_at),
            updated_at: to_iso(&kyc.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_needs_correction_is_editable() {
        assert!(KycStatus::NeedsCorrection.is_editable());
        assert!(!KycStatus::Pending.is_editable());
        assert!(!KycStatus::Approved.is_editable());
        assert!(!KycStatus::Rejected.is_editable());
    }

    #[test]
    fn wire_format_is_screaming_snake() {
        let json = serde_json::to_value(KycStatus::NeedsCorrection).unwrap();
        assert_eq!(json, "NEEDS_CORRECTION");
        assert_eq!(KycStatus::parse("needs_correction"), Some(KycStatus::NeedsCorrection));
        assert_eq!(KycStatus::parse("done"), None);
    }

    #[test]
    fn notes_required_for_negative_decisions() {
        assert!(KycStatus::Rejected.requires_note());
        assert!(KycStatus::NeedsCorrection.requires_note());
        assert!(!KycStatus::Approved.requires_note());
    }
}
