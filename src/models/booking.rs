use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use std::fmt;
use validator::Validate;

use crate::utils::dates::{to_day, to_iso};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PaymentPending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    /// Statuses a booking may move to from `self`.
    pub fn allowed_transitions(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Pending => &[PaymentPending, Confirmed, Rejected, Cancelled],
            PaymentPending => &[Confirmed, Cancelled],
            Confirmed => &[Active, Cancelled],
            Active => &[Completed, Cancelled],
            Completed | Cancelled | Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Cancelling or rejecting has to say why.
    pub fn requires_reason(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }

    /// Statuses that release their dates; used in availability queries.
    pub fn releasing() -> [&'static str; 2] {
        [BookingStatus::Cancelled.as_str(), BookingStatus::Rejected.as_str()]
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a booking a user is on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Lender,
    Renter,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Initiated,
    Paid,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    pub transaction_uuid: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub transaction_code: Option<String>,
    pub paid_at: Option<DateTime>,
    pub initiated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingReview {
    pub rating: i32,
    pub comment: Option<String>,
    pub role: Party,
    pub author_id: ObjectId,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusChange {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub by: ObjectId,
    pub reason: Option<String>,
    pub at: DateTime,
}

impl StatusChange {
    pub fn new(from: BookingStatus, to: BookingStatus, by: ObjectId, reason: Option<String>) -> Self {
        StatusChange { from, to, by, reason, at: DateTime::now() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Booking {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub item_id: ObjectId,
    pub lender_id: ObjectId,
    pub renter_id: ObjectId,
    pub start_date: DateTime,
    pub end_date: DateTime,
    pub status: BookingStatus,
    pub total_price: f64,
    #[serde(default)]
    pub deposit_amount: f64,
    pub message: Option<String>,
    pub status_reason: Option<String>,
    pub payment: Option<Payment>,
    pub review: Option<BookingReview>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Booking {
    pub const COLLECTION: &'static str = "bookings";

    pub fn party_of(&self, user_id: &ObjectId) -> Option<Party> {
        if &self.lender_id == user_id {
            Some(Party::Lender)
        } else if &self.renter_id == user_id {
            Some(Party::Renter)
        } else {
            None
        }
    }

    /// The other side of the booking, from `user_id`'s point of view.
    pub fn counterpart(&self, user_id: &ObjectId) -> ObjectId {
        if &self.lender_id == user_id {
            self.renter_id
        } else {
            self.lender_id
        }
    }

    /// Amount due through the gateway: the deposit, or the full price when
    /// the listing asks for none.
    pub fn amount_due(&self) -> f64 {
        if self.deposit_amount > 0.0 {
            self.deposit_amount
        } else {
            self.total_price
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(&self.payment, Some(p) if p.status == PaymentStatus::Paid)
    }
}

/// Whether `actor` may move a booking into `next`.
pub fn party_may_set(actor: Party, next: BookingStatus) -> bool {
    use BookingStatus::*;
    match actor {
        Party::Lender => matches!(next, PaymentPending | Confirmed | Rejected | Active | Completed | Cancelled),
        Party::Renter => matches!(next, Cancelled),
    }
}

pub fn total_price(days: i64, price_per_day: f64) -> f64 {
    ((days as f64) * price_per_day * 100.0).round() / 100.0
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateBookingDto {
    pub item_id: String,
    /// `YYYY-MM-DD`, inclusive.
    pub start_date: String,
    /// `YYYY-MM-DD`, exclusive.
    pub end_date: String,
    #[validate(length(max = 1000, message = "is too long"))]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateBookingStatusDto {
    pub status: BookingStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateReviewDto {
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 2000, message = "is too long"))]
    pub comment: Option<String>,
}

/// Base64 `data` the gateway appended to the success redirect.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyPaymentDto {
    pub data: String,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct AvailabilityQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct BookingListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReviewResponse {
    pub rating: i32,
    pub comment: Option<String>,
    pub role: Party,
    pub author_id: String,
    pub created_at: String,
}

impl From<BookingReview> for ReviewResponse {
    fn from(review: BookingReview) -> Self {
        ReviewResponse {
            rating: review.rating,
            comment: review.comment,
            role: review.role,
            author_id: review.author_id.to_hex(),
            created_at: to_iso(&review.created_at),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BookingResponse {
    pub id: String,
    pub item_id: String,
    pub lender_id: String,
    pub renter_id: String,
    pub start_date: String,
    pub end_date: String,
    pub status: BookingStatus,
    pub total_price: f64,
    pub deposit_amount: f64,
    pub message: Option<String>,
    pub status_reason: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub review: Option<ReviewResponse>,
    pub allowed_transitions: Vec<BookingStatus>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        BookingResponse {
            id: booking.id.map(|id| id.to_hex()).unwrap_or_default(),
            item_id: booking.item_id.to_hex(),
            lender_id: booking.lender_id.to_hex(),
            renter_id: booking.renter_id.to_hex(),
            start_date: to_day(&booking.start_date),
            end_date: to_day(&booking.end_date),
            status: booking.status,
            total_price: booking.total_price,
            deposit_amount: booking.deposit_amount,
            message: booking.message,
            status_reason: booking.status_reason,
            payment_status: booking.payment.as_ref().map(|p| p.status),
            review: booking.review.map(ReviewResponse::from),
            allowed_transitions: booking.status.allowed_transitions().to_vec(),
            created_at: to_iso(&booking.created_at),
            updated_at: to_iso(&booking.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const ALL: [BookingStatus; 7] = [Pending, PaymentPending, Confirmed, Active, Completed, Cancelled, Rejected];

    #[test]
    fn transition_table() {
        assert!(Pending.can_transition_to(PaymentPending));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(PaymentPending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Active));
        assert!(!PaymentPending.can_transition_to(Rejected));
        assert!(!Confirmed.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Pending));
    }

    #[test]
    fn every_live_status_can_be_cancelled() {
        for status in [Pending, PaymentPending, Confirmed, Active] {
            assert!(status.can_transition_to(Cancelled), "{} should be cancellable", status);
        }
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for status in [Completed, Cancelled, Rejected] {
            assert!(status.is_terminal());
            for next in ALL {
                assert!(!status.can_transition_to(next));
            }
        }
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn no_self_transitions() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn only_cancel_and_reject_need_a_reason() {
        let needing: Vec<_> = ALL.iter().filter(|s| s.requires_reason()).collect();
        assert_eq!(needing, vec![&Cancelled, &Rejected]);
    }

    #[test]
    fn status_wire_names_match_serde() {
        for status in ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
        }
        let parsed: BookingStatus = serde_json::from_str("\"payment_pending\"").unwrap();
        assert_eq!(parsed, PaymentPending);
    }

    #[test]
    fn renters_can_only_cancel() {
        for next in ALL {
            assert_eq!(party_may_set(Party::Renter, next), next == Cancelled);
        }
        assert!(party_may_set(Party::Lender, Confirmed));
        assert!(!party_may_set(Party::Lender, Pending));
    }

    #[test]
    fn pricing_rounds_to_cents() {
        assert_eq!(total_price(3, 12.5), 37.5);
        assert_eq!(total_price(3, 0.333), 1.0);
    }

    fn booking(deposit: f64) -> Booking {
        let now = DateTime::now();
        Booking {
            id: Some(ObjectId::new()),
            item_id: ObjectId::new(),
            lender_id: ObjectId::new(),
            renter_id: ObjectId::new(),
            start_date: now,
            end_date: now,
            status: Pending,
            total_price: 90.0,
            deposit_amount: deposit,
            message: None,
            status_reason: None,
            payment: None,
            review: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parties_and_amount_due() {
        let b = booking(25.0);
        assert_eq!(b.party_of(&b.lender_id), Some(Party::Lender));
        assert_eq!(b.party_of(&b.renter_id), Some(Party::Renter));
        assert_eq!(b.party_of(&ObjectId::new()), None);
        assert_eq!(b.counterpart(&b.renter_id), b.lender_id);
        assert_eq!(b.amount_due(), 25.0);
        assert_eq!(booking(0.0).amount_due(), 90.0);
        assert!(!b.is_paid());
    }
}
