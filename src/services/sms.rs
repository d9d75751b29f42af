use log::info;
use reqwest::Client;
use serde_json::json;

use crate::config::Config;

const MSG91_OTP_URL: &str = "https://control.msg91.com/api/v5/otp";

/// Delivers phone-verification codes through MSG91.
pub struct SmsService;

impl SmsService {
    fn auth_key() -> Result<String, String> {
        Config::msg91_auth_key()
            .ok_or_else(|| "MSG91_AUTH_KEY not configured".to_string())
    }

    fn template_id() -> Result<String, String> {
        Config::msg91_template_id()
            .ok_or_else(|| "MSG91_TEMPLATE_ID not configured".to_string())
    }

    /// Sends a code we generated ourselves; verification happens locally.
    pub async fn send_otp(phone: &str, otp: &str) -> Result<(), String> {
        if !Config::is_msg91_enabled() {
            if Config::is_development() {
                info!("[dev] OTP for {}: {}", phone, otp);
                return Ok(());
            }
            return Err("SMS delivery is not configured".to_string());
        }

        let body = json!({
            "template_id": Self::template_id()?,
            "mobile": phone.trim_start_matches('+'),
            "authkey": Self::auth_key()?,
            "otp": otp,
        });

        let res = Client::new()
            .post(MSG91_OTP_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("MSG91 request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "MSG91 error".to_string()));
        }

        Ok(())
    }
}
