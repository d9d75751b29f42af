use rocket::request::{self, FromRequest, Request, Outcome};
use rocket::http::Status;
use rocket::State;
use mongodb::bson::oid::ObjectId;
use log::warn;

use crate::db::DbConn;
use crate::guards::current_user;
use crate::models::{Role, User};

// === OpenAPI (compatible with rocket_okapi 0.8.0 / 0.8.1) ===
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

/// Bearer JWT resolved against the stored user. Role, activity and KYC state
/// come from the database, so demotions and deactivations apply immediately.
pub struct AuthGuard {
    pub user_id: ObjectId,
    pub email: String,
    pub role: Role,
    pub kyc_verified: bool,
}

impl AuthGuard {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub(crate) fn bearer_token<'a>(req: &'a Request<'_>) -> Option<&'a str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Subject of a valid token.
fn token_subject(token: &str) -> Option<ObjectId> {
    let claims = crate::services::JwtService::verify_token(token).ok()?;
    ObjectId::parse_str(&claims.sub).ok()
}

/// Unknown users fail authentication; deactivated ones are forbidden.
fn identity(user_id: ObjectId, user: Option<User>) -> Result<AuthGuard, Status> {
    match user {
        Some(user) if user.is_active => Ok(AuthGuard {
            user_id,
            email: user.email,
            role: user.role,
            kyc_verified: user.kyc_verified,
        }),
        Some(_) => Err(Status::Forbidden),
        None => Err(Status::Unauthorized),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(user_id) = bearer_token(req).and_then(token_subject) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let Outcome::Success(db) = req.guard::<&State<DbConn>>().await else {
            return Outcome::Error((Status::InternalServerError, ()));
        };

        let user = match current_user(db, &user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!("Auth lookup failed for {}: {}", user_id, e);
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match identity(user_id, user) {
            Ok(auth) => Outcome::Success(auth),
            Err(status) => {
                warn!("Rejected token for user {} ({})", user_id, status.code);
                Outcome::Error((status, ()))
            }
        }
    }
}

/// The guard doesn't contribute any special header/parameter for docs
impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::JwtService;
    use rocket::http::Header;
    use rocket::local::blocking::Client;

    #[get("/whoami")]
    fn whoami(auth: AuthGuard) -> String {
        format!("{}:{}", auth.email, auth.role.as_str())
    }

    fn client() -> Client {
        let rocket = rocket::build().mount("/", routes![whoami]);
        Client::tracked(rocket).expect("valid rocket instance")
    }

    fn member(role: Role, active: bool) -> User {
        let mut user = User::new("Sita".into(), "sita@example.com".into(), None, None);
        user.role = role;
        user.is_active = active;
        user
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let client = client();
        let response = client.get("/whoami").dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[test]
    fn garbage_token_is_unauthorized() {
        let client = client();
        let response = client
            .get("/whoami")
            .header(Header::new("Authorization", "Bearer not-a-jwt"))
            .dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[test]
    fn token_subject_is_the_user_id() {
        let id = ObjectId::new();
        let token = JwtService::generate_access_token(&id, "sita@example.com", Role::User)
            .expect("token");
        assert_eq!(token_subject(&token), Some(id));
        assert_eq!(token_subject("not-a-jwt"), None);
    }

    #[test]
    fn stored_role_wins_over_token_claim() {
        // Token was issued while the user was an admin; they have since been demoted.
        let id = ObjectId::new();
        let auth = identity(id, Some(member(Role::User, true))).expect("active user");
        assert!(!auth.is_admin());
        assert_eq!(auth.user_id, id);

        let admin = identity(id, Some(member(Role::Admin, true))).expect("active admin");
        assert!(admin.is_admin());
    }

    #[test]
    fn deactivated_or_missing_users_are_rejected() {
        let id = ObjectId::new();
        assert_eq!(identity(id, Some(member(Role::Admin, false))).err(), Some(Status::Forbidden));
        assert_eq!(identity(id, None).err(), Some(Status::Unauthorized));
    }
}
