#[macro_use]
extern crate rocket;

mod config;
mod db;
mod guards;
mod models;
mod routes;
mod services;
mod utils;

use dotenvy::dotenv;
use log::info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::fs::FileServer;
use rocket::http::{Header, Status};
use rocket::serde::json::{json, Value};
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use crate::config::Config;
use crate::services::BookingLocks;

/* ----------------------------- CORS ----------------------------- */

/// Echoes the request origin unless a frontend origin is configured.
pub struct Cors {
    allowed_origin: Option<String>,
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let origin = match (&self.allowed_origin, request.headers().get_one("Origin")) {
            (Some(allowed), _) => Some(allowed.clone()),
            (None, Some(origin)) => Some(origin.to_string()),
            (None, None) => None,
        };
        if let Some(origin) = origin {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

fn error_body(message: &str) -> Value {
    json!({
        "success": false,
        "message": message
    })
}

#[catch(400)]
fn bad_request() -> Value {
    error_body("Malformed request")
}

#[catch(401)]
fn unauthorized() -> Value {
    error_body("Authentication required")
}

#[catch(403)]
fn forbidden() -> Value {
    error_body("You do not have permission to perform this action")
}

#[catch(404)]
fn not_found() -> Value {
    error_body("Resource not found (check /api/v1 prefix)")
}

#[catch(413)]
fn payload_too_large() -> Value {
    error_body("Request body too large")
}

#[catch(422)]
fn unprocessable(req: &Request) -> Value {
    info!("Rejected body for {} {}", req.method(), req.uri());
    error_body("Request body is invalid or missing required fields")
}

#[catch(default)]
fn internal_error(status: Status, _req: &Request) -> Value {
    if status.code >= 500 {
        error_body("Internal server error")
    } else {
        error_body(status.reason().unwrap_or("Request failed"))
    }
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/api/v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- LAUNCH ----------------------------- */

fn build() -> Rocket<Build> {
    rocket::build()
        .attach(db::init())
        .attach(Cors {
            allowed_origin: Config::frontend_origin(),
        })
        .manage(BookingLocks::new())
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Auth
                routes::auth::issue_token,
                // Users
                routes::user::create_user,
                routes::user::get_me,
                routes::user::update_me,
                routes::user::send_phone_otp,
                routes::user::verify_phone_otp,
                routes::user::get_public_profile,
                routes::user::list_users,
                routes::user::update_user_role,
                routes::user::deactivate_user,
                // KYC
                routes::kyc::submit_kyc,
                routes::kyc::get_my_kyc,
                routes::kyc::update_my_kyc,
                routes::kyc::delete_kyc,
                routes::kyc::list_kyc,
                routes::kyc::get_kyc,
                routes::kyc::review_kyc,
                // Listings
                routes::rent::create_rent,
                routes::rent::search_rents,
                routes::rent::nearby_rents,
                routes::rent::my_rents,
                routes::rent::get_rent,
                routes::rent::update_rent,
                routes::rent::delete_rent,
                routes::rent::rent_reviews,
                routes::rent::pending_rents,
                routes::rent::verify_rent,
                // Bookings
                routes::booking::create_booking,
                routes::booking::check_availability,
                routes::booking::renter_bookings,
                routes::booking::lender_bookings,
                routes::booking::get_booking,
                routes::booking::update_booking_status,
                routes::booking::review_booking,
                routes::booking::all_bookings,
                // Payments
                routes::payment::initiate_payment,
                routes::payment::verify_payment,
                // Notifications
                routes::notification::list_notifications,
                routes::notification::unread_count,
                routes::notification::mark_read,
                routes::notification::mark_all_read,
                routes::notification::delete_notification,
                // Messages
                routes::message::start_conversation,
                routes::message::list_conversations,
                routes::message::get_messages,
                routes::message::send_message,
                routes::message::mark_conversation_read,
                // Reports
                routes::report::create_report,
                routes::report::my_reports,
                routes::report::all_reports,
                routes::report::update_report_status,
                // Bot
                routes::bot::ask_bot,
                routes::bot::bot_history,
                routes::bot::clear_bot_history,
                // Uploads
                routes::file_upload::upload_image,
                routes::file_upload::upload_document,
                // Admin dashboard
                routes::dashboard::dashboard_stats,
            ],
        )
        .mount("/uploads", FileServer::from("uploads"))
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                forbidden,
                not_found,
                payload_too_large,
                unprocessable,
                internal_error
            ],
        )
}

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();
    info!("RentShare API starting, Swagger UI at /api/docs");
    build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::ContentType;
    use rocket::local::blocking::Client;

    fn client() -> Client {
        let rocket = rocket::build()
            .mount("/", routes![options_handler])
            .register(
                "/",
                catchers![unauthorized, not_found, unprocessable, internal_error],
            )
            .attach(Cors {
                allowed_origin: None,
            });
        Client::tracked(rocket).expect("valid rocket instance")
    }

    #[test]
    fn unknown_routes_use_the_error_envelope() {
        let client = client();
        let response = client.get("/nope").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        assert_eq!(response.content_type(), Some(ContentType::JSON));
        let body: Value = response.into_json().expect("json body");
        assert_eq!(body["success"], false);
    }

    #[test]
    fn preflight_echoes_origin() {
        let client = client();
        let response = client
            .options("/api/v1/rent")
            .header(Header::new("Origin", "http://localhost:5173"))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("http://localhost:5173")
        );
    }
}
