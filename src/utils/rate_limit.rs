use log::warn;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};

use crate::db::DbConn;
use crate::utils::ApiError;

pub const RATE_LIMITS: &str = "rate_limits";

/// Pipeline update that counts one hit in the live window, or opens a new
/// window when the stored one has lapsed (or none exists yet). Both fields are
/// computed from the pre-update document, so one round trip decides.
fn hit(now: DateTime, window_ends: DateTime) -> Vec<Document> {
    let live = doc! { "$gt": ["$expires_at", now] };
    vec![doc! { "$set": {
        "count": { "$cond": [live.clone(), { "$add": [{ "$ifNull": ["$count", 0] }, 1] }, 1] },
        "expires_at": { "$cond": [live.clone(), "$expires_at", window_ends] },
    } }]
}

fn hits(counter: &Document) -> i64 {
    match counter.get("count") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) => *n as i64,
        _ => 0,
    }
}

/// Fixed-window limiter over the `rate_limits` collection; `key` is unique
/// there and stale counters are swept by a TTL index.
pub async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = DateTime::now();
    let window_ends = DateTime::from_millis(now.timestamp_millis() + window_ms);

    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();

    let counter = db
        .collection::<Document>(RATE_LIMITS)
        .find_one_and_update(doc! { "key": key }, hit(now, window_ends), options)
        .await
        .map_err(ApiError::database)?
        .ok_or_else(|| ApiError::internal_error("Rate limiter unavailable"))?;

    if hits(&counter) > i64::from(limit) {
        warn!("Rate limit hit for {}", key);
        return Err(ApiError::too_many_requests(
            "Too many requests. Please try later.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_update_keeps_or_restarts() {
        let now = DateTime::from_millis(1_000);
        let ends = DateTime::from_millis(61_000);
        let stages = hit(now, ends);
        assert_eq!(stages.len(), 1);

        let set = stages[0].get_document("$set").unwrap();
        let count = set.get_document("count").unwrap().get_array("$cond").unwrap();
        // Lapsed or missing window starts over at one hit.
        assert_eq!(count[2], Bson::Int32(1));

        let expires = set.get_document("expires_at").unwrap().get_array("$cond").unwrap();
        assert_eq!(expires[1], Bson::String("$expires_at".into()));
        assert_eq!(expires[2], Bson::DateTime(ends));
    }

    #[test]
    fn counter_reads_any_numeric_width() {
        assert_eq!(hits(&doc! { "count": 3 }), 3);
        assert_eq!(hits(&doc! { "count": 4_i64 }), 4);
        assert_eq!(hits(&doc! {}), 0);
    }
}
