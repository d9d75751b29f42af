use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, to_bson, DateTime};
use log::{info, warn};
use uuid::Uuid;
use crate::db::DbConn;
use crate::models::{
    Booking, BookingResponse, BookingStatus, Notification, NotificationKind, Payment,
    PaymentStatus, StatusChange, VerifyPaymentDto,
};
use crate::guards::AuthGuard;
use crate::routes::booking::{announce_status, find_booking, history_entry};
use crate::services::payment::PaymentForm;
use crate::services::{Notifier, PaymentService};
use crate::utils::{parse_id, ApiError, ApiResponse};

/// Amounts agree to the cent.
fn same_amount(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.005
}

/// Signed gateway form for the renter to post. Re-initiating replaces the
/// previous unpaid transaction.
#[openapi(tag = "Payment")]
#[post("/bookings/<booking_id>/payment")]
pub async fn initiate_payment(
    db: &State<DbConn>,
    auth: AuthGuard,
    booking_id: String,
) -> Result<Json<ApiResponse<PaymentForm>>, ApiError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = find_booking(db, booking_id).await?;

    if booking.renter_id != auth.user_id {
        return Err(ApiError::forbidden("Only the renter can pay for this booking"));
    }
    if booking.is_paid() {
        return Err(ApiError::conflict("This booking has already been paid"));
    }
    if booking.status != BookingStatus::PaymentPending {
        return Err(ApiError::bad_request("Booking is not awaiting payment"));
    }

    let amount = booking.amount_due();
    let transaction_uuid = Uuid::new_v4().to_string();
    let form = PaymentService::build_form(amount, &transaction_uuid)?;

    let payment = Payment {
        transaction_uuid: transaction_uuid.clone(),
        amount,
        status: PaymentStatus::Initiated,
        transaction_code: None,
        paid_at: None,
        initiated_at: DateTime::now(),
    };
    let payment_doc = to_bson(&payment).map_err(ApiError::database)?;

    let result = db
        .collection::<Booking>(Booking::COLLECTION)
        .update_one(
            doc! {
                "_id": booking_id,
                "status": BookingStatus::PaymentPending.as_str(),
                "payment.status": { "$ne": "paid" },
            },
            doc! { "$set": { "payment": payment_doc, "updated_at": DateTime::now() } },
            None,
        )
        .await
        .map_err(ApiError::database)?;

    if result.matched_count == 0 {
        return Err(ApiError::conflict("Booking changed while starting payment, reload and try again"));
    }

    info!("Payment {} initiated for booking {} ({})", transaction_uuid, booking_id, amount);

    Ok(Json(ApiResponse::success(form)))
}

/// Checks the gateway's signed callback and confirms the booking.
#[openapi(tag = "Payment")]
#[post("/bookings/payment/verify", data = "<dto>")]
pub async fn verify_payment(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<VerifyPaymentDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    let callback = PaymentService::decode_callback(&dto.data)?;
    PaymentService::verify_callback(&callback)?;

    let bookings = db.collection::<Booking>(Booking::COLLECTION);
    let booking = bookings
        .find_one(doc! { "payment.transaction_uuid": &callback.transaction_uuid }, None)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::not_found("No booking for this transaction"))?;

    if booking.party_of(&auth.user_id).is_none() && !auth.is_admin() {
        return Err(ApiError::forbidden("Not authorized to verify this payment"));
    }

    let booking_id = booking
        .id
        .ok_or_else(|| ApiError::internal_error("Booking without id"))?;

    if booking.is_paid() {
        return Ok(Json(ApiResponse::success_with_message(
            "Payment already verified",
            booking.into(),
        )));
    }

    let expected = booking.payment.as_ref().map(|p| p.amount).unwrap_or_default();
    match callback.total_amount() {
        Some(paid) if same_amount(paid, expected) => {}
        Some(paid) => {
            warn!(
                "Payment {} amount mismatch: paid {}, expected {}",
                callback.transaction_uuid, paid, expected
            );
            return Err(ApiError::bad_request("Paid amount does not match the booking"));
        }
        None => return Err(ApiError::bad_request("Payment amount missing")),
    }

    let now = DateTime::now();
    let mut set = doc! {
        "payment.status": "paid",
        "payment.paid_at": now,
        "updated_at": now,
    };
    if let Some(code) = callback.transaction_code.as_deref() {
        set.insert("payment.transaction_code", code);
    }

    let confirms = booking.status == BookingStatus::PaymentPending;
    let mut update = doc! {};
    if confirms {
        set.insert("status", BookingStatus::Confirmed.as_str());
        let change = StatusChange::new(
            BookingStatus::PaymentPending,
            BookingStatus::Confirmed,
            auth.user_id,
            Some("Payment received".to_string()),
        );
        let entry = history_entry(&change)?;
        update.insert("$push", doc! { "history": entry });
    } else {
        warn!("Payment {} received for booking {} in status {}", callback.transaction_uuid, booking_id, booking.status);
    }
    update.insert("$set", set);

    let result = bookings
        .update_one(
            doc! {
                "_id": booking_id,
                "payment.transaction_uuid": &callback.transaction_uuid,
                "payment.status": "initiated",
                "status": booking.status.as_str(),
            },
            update,
            None,
        )
        .await
        .map_err(ApiError::database)?;

    let updated = find_booking(db, booking_id).await?;

    if result.modified_count == 0 {
        // Another verify of the same callback got there first.
        if updated.is_paid() {
            return Ok(Json(ApiResponse::success_with_message(
                "Payment already verified",
                updated.into(),
            )));
        }
        return Err(ApiError::conflict("Booking changed while verifying payment, reload and try again"));
    }

    info!("Payment {} verified for booking {}", callback.transaction_uuid, booking_id);

    Notifier::notify(
        db,
        Notification::new(
            updated.lender_id,
            NotificationKind::Payment,
            "Payment received",
            format!("The renter paid {} for booking {}.", PaymentService::format_amount(expected), booking_id),
        )
        .with_booking(Some(booking_id))
        .with_item(Some(updated.item_id)),
    )
    .await;

    if confirms {
        announce_status(db, &updated, BookingStatus::Confirmed, None).await;
    }

    Ok(Json(ApiResponse::success_with_message(
        "Payment verified",
        updated.into(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_compare_to_the_cent() {
        assert!(same_amount(1000.0, 1000.001));
        assert!(!same_amount(1000.0, 999.0));
    }
}
