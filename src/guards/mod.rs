pub mod admin;
pub mod auth;
pub mod kyc;

pub use admin::AdminGuard;
pub use auth::AuthGuard;
pub use kyc::KycGuard;

use mongodb::bson::{doc, oid::ObjectId};

use crate::db::DbConn;
use crate::models::User;

pub(crate) async fn current_user(
    db: &DbConn,
    user_id: &ObjectId,
) -> Result<Option<User>, mongodb::error::Error> {
    db.collection::<User>(User::COLLECTION)
        .find_one(doc! { "_id": user_id }, None)
        .await
}
