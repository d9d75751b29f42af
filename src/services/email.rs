use lettre::{
    Message, SmtpTransport, Transport,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
};
use log::{info, error, warn};

use crate::config::Config;
use crate::models::BookingStatus;

pub struct EmailService;

impl EmailService {
    /// Best-effort: failures are logged and reported as `false`.
    pub async fn send_booking_status_email(
        email: &str,
        name: &str,
        item_title: &str,
        status: BookingStatus,
        reason: Option<&str>,
    ) -> bool {
        if !Config::is_mail_enabled() {
            warn!("Email credentials not configured. Skipping booking email to {}", email);
            return false;
        }

        let subject = format!("Your booking for {} is now {}", item_title, status_label(status));
        let body = booking_status_body(name, item_title, status, reason);
        let to = email.to_string();

        let sent = tokio::task::spawn_blocking(move || Self::try_send(&to, &subject, body)).await;
        match sent {
            Ok(Ok(())) => {
                info!("Booking status email sent to {}", email);
                true
            }
            Ok(Err(e)) => {
                error!("Failed to send booking email to {}: {}", email, e);
                false
            }
            Err(e) => {
                error!("Email task failed: {}", e);
                false
            }
        }
    }

    fn try_send(to: &str, subject: &str, html: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let from_mailbox: Mailbox = Config::mail_from().parse()?;
        let to_mailbox: Mailbox = to.parse()?;

        let email_message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)?;

        let creds = Credentials::new(Config::mail_user(), Config::mail_password());
        let mailer = SmtpTransport::relay(&Config::mail_host())?
            .credentials(creds)
            .build();

        mailer.send(&email_message)?;
        Ok(())
    }
}

fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pending",
        BookingStatus::PaymentPending => "awaiting payment",
        BookingStatus::Confirmed => "confirmed",
        BookingStatus::Active => "active",
        BookingStatus::Completed => "completed",
        BookingStatus::Cancelled => "cancelled",
        BookingStatus::Rejected => "rejected",
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn booking_status_body(name: &str, item_title: &str, status: BookingStatus, reason: Option<&str>) -> String {
    let display_name = if name.trim().is_empty() { "there" } else { name };
    let next_step = match status {
        BookingStatus::PaymentPending => "The lender accepted your request. Pay the deposit to confirm the booking.",
        BookingStatus::Confirmed => "Your dates are locked in. Coordinate pickup with the lender through chat.",
        BookingStatus::Active => "Enjoy the rental and return the item on time.",
        BookingStatus::Completed => "Thanks for renting! You can now leave a review.",
        _ => "",
    };
    let reason_html = reason
        .filter(|r| !r.trim().is_empty())
        .map(|r| format!("<p><strong>Reason:</strong> {}</p>", escape_html(r)))
        .unwrap_or_default();

    format!(
        r#"
        <!DOCTYPE html>
        <html>
        <body style="font-family: Arial, sans-serif; color: #333;">
            <h2>Booking update</h2>
            <p>Hi {},</p>
            <p>Your booking for <strong>{}</strong> is now <strong>{}</strong>.</p>
            {}
            <p>{}</p>
            <p>The RentShare team</p>
        </body>
        </html>
        "#,
        escape_html(display_name),
        escape_html(item_title),
        status_label(status),
        reason_html,
        next_step
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_mentions_reason_and_escapes() {
        let body = booking_status_body("Gita", "<Tent>", BookingStatus::Rejected, Some("Dates clash"));
        assert!(body.contains("&lt;Tent&gt;"));
        assert!(body.contains("Dates clash"));
        assert!(body.contains("rejected"));
    }

    #[test]
    fn blank_name_falls_back() {
        let body = booking_status_body(" ", "Drill", BookingStatus::Completed, None);
        assert!(body.contains("Hi there"));
        assert!(!body.contains("Reason"));
    }
}
