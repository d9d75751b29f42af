use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use std::env;

pub struct Config;

impl Config {
    fn figment() -> Figment {
        // Get the current profile
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            .merge(Env::prefixed("ROCKET_"))
    }

    pub fn jwt_secret() -> String {
        Self::figment()
            .extract_inner("jwt_secret")
            .unwrap_or_else(|_| "default-secret".to_string())
    }

    /// Access token lifetime in seconds.
    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(7 * 24 * 60 * 60)
    }

    pub fn mongodb_uri() -> String {
        Self::figment()
            .extract_inner("mongodb_uri")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    pub fn mongodb_database() -> String {
        Self::figment()
            .extract_inner("mongodb_database")
            .unwrap_or_else(|_| "rentshare".to_string())
    }

    pub fn frontend_origin() -> Option<String> {
        Self::figment()
            .extract_inner("frontend_origin")
            .ok()
    }

    pub fn mail_host() -> String {
        Self::figment()
            .extract_inner("mail_host")
            .unwrap_or_else(|_| "smtp.gmail.com".to_string())
    }

    pub fn mail_user() -> String {
        Self::figment()
            .extract_inner("mail_user")
            .unwrap_or_default()
    }

    pub fn mail_password() -> String {
        Self::figment()
            .extract_inner("mail_password")
            .unwrap_or_default()
    }

    pub fn mail_from() -> String {
        Self::figment()
            .extract_inner("mail_from")
            .unwrap_or_else(|_| "RentShare <noreply@rentshare.app>".to_string())
    }

    pub fn is_mail_enabled() -> bool {
        !Self::mail_user().is_empty() && !Self::mail_password().is_empty()
    }

    pub fn is_development() -> bool {
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());
        profile == "development"
    }

    pub fn msg91_auth_key() -> Option<String> {
        Self::figment()
            .extract_inner("msg91_auth_key")
            .ok()
    }

    pub fn msg91_template_id() -> Option<String> {
        Self::figment()
            .extract_inner("msg91_template_id")
            .ok()
    }

    pub fn is_msg91_enabled() -> bool {
        Self::msg91_auth_key().is_some()
            && Self::msg91_template_id().is_some()
    }

    /// HMAC key shared with the payment gateway. Never has a default.
    pub fn payment_secret() -> Option<String> {
        Self::figment()
            .extract_inner("payment_secret")
            .ok()
    }

    pub fn payment_product_code() -> String {
        Self::figment()
            .extract_inner("payment_product_code")
            .unwrap_or_else(|_| "EPAYTEST".to_string())
    }

    pub fn payment_form_url() -> String {
        Self::figment()
            .extract_inner("payment_form_url")
            .unwrap_or_else(|_| "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string())
    }

    pub fn payment_success_url() -> String {
        Self::figment()
            .extract_inner("payment_success_url")
            .unwrap_or_else(|_| "http://localhost:5173/payment/success".to_string())
    }

    pub fn payment_failure_url() -> String {
        Self::figment()
            .extract_inner("payment_failure_url")
            .unwrap_or_else(|_| "http://localhost:5173/payment/failure".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_without_rocket_toml() {
        assert_eq!(Config::payment_product_code(), "EPAYTEST");
        assert!(Config::jwt_expiry() > 0);
        assert!(!Config::mongodb_database().is_empty());
    }
}
