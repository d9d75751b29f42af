use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::dates::to_iso;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub kyc_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<DateTime>,
    #[serde(default)]
    pub otp_attempts: i32,
    pub is_active: bool,
    pub last_login_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub const COLLECTION: &'static str = "users";

    pub fn new(name: String, email: String, photo_url: Option<String>, phone: Option<String>) -> Self {
        let now = DateTime::now();
        User {
            id: None,
            name,
            email,
            photo_url,
            phone,
            role: Role::User,
            kyc_verified: false,
            phone_verified: false,
            otp_hash: None,
            otp_expires_at: None,
            otp_attempts: 0,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateUserDto {
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    pub photo_url: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateProfileDto {
    #[validate(length(min = 1, max = 100, message = "cannot be empty"))]
    pub name: Option<String>,
    pub photo_url: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyOtpDto {
    pub otp: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateRoleDto {
    pub role: Role,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct UserListQuery {
    pub q: Option<String>,
    pub role: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub phone: Option<String>,
    pub role: String,
    pub kyc_verified: bool,
    pub phone_verified: bool,
    pub is_active: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
            photo_url: user.photo_url,
            phone: user.phone,
            role: user.role.as_str().to_string(),
            kyc_verified: user.kyc_verified,
            phone_verified: user.phone_verified,
            is_active: user.is_active,
            created_at: to_iso(&user.created_at),
        }
    }
}

/// What other users get to see.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PublicUserResponse {
    pub id: String,
    pub name: String,
    pub photo_url: Option<String>,
    pub kyc_verified: bool,
    pub member_since: String,
}

impl From<User> for PublicUserResponse {
    fn from(user: User) -> Self {
        PublicUserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            photo_url: user.photo_url,
            kyc_verified: user.kyc_verified,
            member_since: to_iso(&user.created_at),
        }
    }
}
