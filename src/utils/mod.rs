pub mod dates;
pub mod pagination;
pub mod rate_limit;
pub mod response;
pub mod validation;

pub use pagination::Page;
pub use rate_limit::rate_limit;
pub use response::{ApiError, ApiResponse};
pub use validation::*;

use mongodb::bson::oid::ObjectId;

/// Parses a path id, naming the resource in the error.
pub fn parse_id(value: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value).map_err(|_| ApiError::bad_request(format!("Invalid {} ID", what)))
}

pub fn validate_dto<T: validator::Validate>(dto: &T) -> Result<(), ApiError> {
    dto.validate().map_err(ApiError::from)
}
