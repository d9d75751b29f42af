use data_encoding::BASE64;
use log::error;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::config::Config;
use crate::utils::ApiError;

pub const SIGNED_FIELD_NAMES: &str = "total_amount,transaction_uuid,product_code";

/// Callback fields that must be covered by the gateway's signature.
const REQUIRED_CALLBACK_FIELDS: [&str; 4] = ["total_amount", "transaction_uuid", "product_code", "status"];

/// Form fields the browser posts to the gateway.
#[derive(Debug, Serialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PaymentForm {
    pub form_url: String,
    pub amount: String,
    pub tax_amount: String,
    pub product_service_charge: String,
    pub product_delivery_charge: String,
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub success_url: String,
    pub failure_url: String,
    pub signed_field_names: String,
    pub signature: String,
}

/// Decoded gateway callback payload.
#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub transaction_code: Option<String>,
    pub status: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub signed_field_names: String,
    pub signature: String,
    #[serde(skip)]
    raw: Value,
}

impl PaymentCallback {
    /// A callback field rendered the way it was signed.
    pub fn field(&self, name: &str) -> Option<String> {
        match self.raw.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn total_amount(&self) -> Option<f64> {
        self.field("total_amount")
            .and_then(|value| PaymentService::parse_amount(&value))
    }
}

#[derive(Debug, PartialEq)]
pub enum PaymentError {
    NotConfigured,
    Malformed(String),
    BadSignature,
    NotComplete(String),
    WrongProduct(String),
    InvalidKey,
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::NotConfigured => write!(f, "Payments are not configured"),
            PaymentError::Malformed(why) => write!(f, "Malformed payment payload: {}", why),
            PaymentError::BadSignature => write!(f, "Invalid payment signature"),
            PaymentError::NotComplete(status) => write!(f, "Payment not complete (status {})", status),
            PaymentError::WrongProduct(code) => write!(f, "Payment is for another merchant ({})", code),
            PaymentError::InvalidKey => write!(f, "Invalid payment signing key"),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotConfigured | PaymentError::InvalidKey => {
                error!("Payment gateway misconfigured: {}", e);
                ApiError::internal_error("Payments are currently unavailable")
            }
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

pub struct PaymentService;

impl PaymentService {
    fn secret() -> Result<String, PaymentError> {
        Config::payment_secret().ok_or(PaymentError::NotConfigured)
    }

    /// Gateway amounts are strings; keep whole numbers without a fraction.
    pub fn format_amount(amount: f64) -> String {
        if amount.fract() == 0.0 {
            format!("{}", amount as i64)
        } else {
            format!("{:.2}", amount)
        }
    }

    /// base64(HMAC-SHA256(secret, message))
    pub fn sign(secret: &str, message: &str) -> Result<String, PaymentError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| PaymentError::InvalidKey)?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(&mac.finalize().into_bytes()))
    }

    pub fn signing_message(total_amount: &str, transaction_uuid: &str, product_code: &str) -> String {
        format!(
            "total_amount={},transaction_uuid={},product_code={}",
            total_amount, transaction_uuid, product_code
        )
    }

    pub fn build_form(amount: f64, transaction_uuid: &str) -> Result<PaymentForm, PaymentError> {
        let secret = Self::secret()?;
        let total = Self::format_amount(amount);
        let product_code = Config::payment_product_code();
        let signature = Self::sign(&secret, &Self::signing_message(&total, transaction_uuid, &product_code))?;

        Ok(PaymentForm {
            form_url: Config::payment_form_url(),
            amount: total.clone(),
            tax_amount: "0".to_string(),
            product_service_charge: "0".to_string(),
            product_delivery_charge: "0".to_string(),
            total_amount: total,
            transaction_uuid: transaction_uuid.to_string(),
            product_code,
            success_url: Config::payment_success_url(),
            failure_url: Config::payment_failure_url(),
            signed_field_names: SIGNED_FIELD_NAMES.to_string(),
            signature,
        })
    }

    /// Decodes the base64 `data` the gateway appends to the success URL.
    pub fn decode_callback(data: &str) -> Result<PaymentCallback, PaymentError> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let mut callback: PaymentCallback =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        callback.raw = raw;
        Ok(callback)
    }

    /// Recomputes the signature over `signed_field_names`, in that order. The
    /// list must cover amount, transaction, product and status, and the
    /// product code must be ours.
    pub fn verify_callback_with(
        secret: &str,
        product_code: &str,
        callback: &PaymentCallback,
    ) -> Result<(), PaymentError> {
        let signed: Vec<&str> = callback.signed_field_names.split(',').map(str::trim).collect();
        if let Some(missing) = REQUIRED_CALLBACK_FIELDS.iter().find(|f| !signed.contains(f)) {
            return Err(PaymentError::Malformed(format!("{} is not signed", missing)));
        }

        let mut parts = Vec::new();
        for field in signed {
            let value = callback
                .field(field)
                .ok_or_else(|| PaymentError::Malformed(format!("missing signed field {}", field)))?;
            parts.push(format!("{}={}", field, value));
        }

        if Self::sign(secret, &parts.join(","))? != callback.signature {
            return Err(PaymentError::BadSignature);
        }
        if callback.product_code != product_code {
            return Err(PaymentError::WrongProduct(callback.product_code.clone()));
        }
        if callback.status != "COMPLETE" {
            return Err(PaymentError::NotComplete(callback.status.clone()));
        }
        Ok(())
    }

    pub fn verify_callback(callback: &PaymentCallback) -> Result<(), PaymentError> {
        Self::verify_callback_with(&Self::secret()?, &Config::payment_product_code(), callback)
    }

    /// Gateway totals may carry thousands separators ("1,000.0").
    pub fn parse_amount(value: &str) -> Option<f64> {
        value.replace(',', "").trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;
    use serde_json::json;

    const SECRET: &str = "test-secret";
    const PRODUCT: &str = "EPAYTEST";
    const ALL_FIELDS: &str = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";

    fn signed_callback(status: &str, total: &str, product: &str, field_names: &str) -> String {
        let mut payload = json!({
            "transaction_code": "000AWEO",
            "status": status,
            "total_amount": total,
            "transaction_uuid": "abc-123",
            "product_code": product,
            "signed_field_names": field_names,
        });
        let message = field_names
            .split(',')
            .map(|name| {
                let value = payload[name].as_str().unwrap().to_string();
                format!("{}={}", name, value)
            })
            .collect::<Vec<_>>()
            .join(",");
        payload["signature"] = json!(PaymentService::sign(SECRET, &message).unwrap());
        BASE64.encode(payload.to_string().as_bytes())
    }

    fn callback(status: &str, total: &str) -> String {
        signed_callback(status, total, PRODUCT, ALL_FIELDS)
    }

    #[test]
    fn form_signature_covers_signed_fields() {
        let message = PaymentService::signing_message("100", "11-201-13", "EPAYTEST");
        assert_eq!(message, "total_amount=100,transaction_uuid=11-201-13,product_code=EPAYTEST");
        let a = PaymentService::sign(SECRET, &message).unwrap();
        let b = PaymentService::sign(SECRET, &message.replace("100", "101")).unwrap();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(a.as_bytes()).unwrap().len(), 32);
    }

    #[test]
    fn accepts_genuine_callback() {
        let cb = PaymentService::decode_callback(&callback("COMPLETE", "1,000.0")).unwrap();
        assert_eq!(PaymentService::verify_callback_with(SECRET, PRODUCT, &cb), Ok(()));
        assert_eq!(cb.total_amount(), Some(1000.0));
        assert_eq!(cb.transaction_code.as_deref(), Some("000AWEO"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let cb = PaymentService::decode_callback(&callback("COMPLETE", "100")).unwrap();
        assert_eq!(PaymentService::verify_callback_with("other", PRODUCT, &cb), Err(PaymentError::BadSignature));
    }

    #[test]
    fn rejects_tampered_amount() {
        let raw = String::from_utf8(BASE64.decode(callback("COMPLETE", "100").as_bytes()).unwrap()).unwrap();
        let tampered = raw.replace("\"total_amount\":\"100\"", "\"total_amount\":\"1\"");
        let cb = PaymentService::decode_callback(&BASE64.encode(tampered.as_bytes())).unwrap();
        assert_eq!(PaymentService::verify_callback_with(SECRET, PRODUCT, &cb), Err(PaymentError::BadSignature));
    }

    #[test]
    fn rejects_incomplete_payment() {
        let cb = PaymentService::decode_callback(&callback("PENDING", "100")).unwrap();
        assert_eq!(
            PaymentService::verify_callback_with(SECRET, PRODUCT, &cb),
            Err(PaymentError::NotComplete("PENDING".into()))
        );
    }

    #[test]
    fn signature_must_cover_status_and_amount() {
        // Validly signed, but the status is not part of what was signed.
        let data = signed_callback("COMPLETE", "100", PRODUCT, "total_amount,transaction_uuid,product_code");
        let cb = PaymentService::decode_callback(&data).unwrap();
        assert_eq!(
            PaymentService::verify_callback_with(SECRET, PRODUCT, &cb),
            Err(PaymentError::Malformed("status is not signed".into()))
        );

        let data = signed_callback("COMPLETE", "100", PRODUCT, "status,transaction_uuid,product_code");
        let cb = PaymentService::decode_callback(&data).unwrap();
        assert_eq!(
            PaymentService::verify_callback_with(SECRET, PRODUCT, &cb),
            Err(PaymentError::Malformed("total_amount is not signed".into()))
        );
    }

    #[test]
    fn rejects_other_merchants_product() {
        let data = signed_callback("COMPLETE", "100", "OTHERSHOP", ALL_FIELDS);
        let cb = PaymentService::decode_callback(&data).unwrap();
        assert_eq!(
            PaymentService::verify_callback_with(SECRET, PRODUCT, &cb),
            Err(PaymentError::WrongProduct("OTHERSHOP".into()))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(PaymentService::decode_callback("%%%"), Err(PaymentError::Malformed(_))));
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(PaymentService::format_amount(150.0), "150");
        assert_eq!(PaymentService::format_amount(12.5), "12.50");
    }

    #[test]
    fn configuration_errors_are_internal() {
        let err: ApiError = PaymentError::NotConfigured.into();
        assert_eq!(err.status, Status::InternalServerError);
        assert_eq!(err.message, "Payments are currently unavailable");
    }

    #[test]
    fn callback_errors_are_client_errors() {
        let err: ApiError = PaymentError::BadSignature.into();
        assert_eq!(err.status, Status::BadRequest);
        assert_eq!(err.message, "Invalid payment signature");
    }
}
