use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::DbConn;
use crate::models::{Booking, BookingStatus};

/// Filter for bookings of `item_id` that still hold dates overlapping
/// `[start, end)`.
pub fn overlap_filter(item_id: ObjectId, start: DateTime, end: DateTime) -> Document {
    doc! {
        "item_id": item_id,
        "status": { "$nin": BookingStatus::releasing().to_vec() },
        "start_date": { "$lt": end },
        "end_date": { "$gt": start },
    }
}

pub async fn conflicting_bookings(
    db: &DbConn,
    item_id: ObjectId,
    start: DateTime,
    end: DateTime,
) -> Result<u64, mongodb::error::Error> {
    db.collection::<Booking>(Booking::COLLECTION)
        .count_documents(overlap_filter(item_id, start, end), None)
        .await
}

pub async fn is_available(
    db: &DbConn,
    item_id: ObjectId,
    start: DateTime,
    end: DateTime,
) -> Result<bool, mongodb::error::Error> {
    Ok(conflicting_bookings(db, item_id, start, end).await? == 0)
}

/// Serializes "check availability then insert" per item so two requests for
/// the same item cannot both pass the check. Held in Rocket state.
#[derive(Default)]
pub struct BookingLocks {
    items: Mutex<HashMap<ObjectId, Arc<AsyncMutex<()>>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, item_id: ObjectId) -> ItemLock<'_> {
        let slot = {
            let mut items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            items.entry(item_id).or_default().clone()
        };
        ItemLock {
            guard: Some(slot.lock_owned().await),
            item_id,
            locks: self,
        }
    }

    /// Number of items with a live lock slot.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    fn release(&self, item_id: &ObjectId) {
        let mut items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map itself still references the slot: nobody holds or waits on it.
        if items.get(item_id).map(|slot| Arc::strong_count(slot) == 1).unwrap_or(false) {
            items.remove(item_id);
        }
    }
}

pub struct ItemLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    item_id: ObjectId,
    locks: &'a BookingLocks,
}

impl Drop for ItemLock<'_> {
    fn drop(&mut self) {
        // Drop the guard first so its Arc no longer counts.
        self.guard.take();
        self.locks.release(&self.item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn overlap_filter_excludes_released_bookings() {
        let item = ObjectId::new();
        let start = DateTime::from_millis(1_000);
        let end = DateTime::from_millis(5_000);
        let filter = overlap_filter(item, start, end);

        assert_eq!(filter.get_object_id("item_id").unwrap(), item);
        let status = filter.get_document("status").unwrap();
        let excluded: Vec<&str> = status
            .get_array("$nin")
            .unwrap()
            .iter()
            .filter_map(|s| s.as_str())
            .collect();
        assert_eq!(excluded, vec!["cancelled", "rejected"]);
        // existing.start < candidate.end AND existing.end > candidate.start
        assert_eq!(filter.get_document("start_date").unwrap().get_datetime("$lt").unwrap(), &end);
        assert_eq!(filter.get_document("end_date").unwrap().get_datetime("$gt").unwrap(), &start);
    }

    #[tokio::test]
    async fn same_item_is_serialized() {
        let locks = Arc::new(BookingLocks::new());
        let item = ObjectId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _lock = locks.lock(item).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn different_items_do_not_block() {
        let locks = BookingLocks::new();
        let _a = locks.lock(ObjectId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(ObjectId::new())).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
