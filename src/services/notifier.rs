use log::warn;

use crate::db::DbConn;
use crate::models::Notification;

/// Fire-and-forget notification writes. A failed insert never fails the
/// request that triggered it.
pub struct Notifier;

impl Notifier {
    pub async fn notify(db: &DbConn, notification: Notification) {
        let user_id = notification.user_id;
        if let Err(e) = db
            .collection::<Notification>(Notification::COLLECTION)
            .insert_one(&notification, None)
            .await
        {
            warn!("Failed to store notification for {}: {}", user_id, e);
        }
    }

    pub async fn notify_all(db: &DbConn, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        if let Err(e) = db
            .collection::<Notification>(Notification::COLLECTION)
            .insert_many(&notifications, None)
            .await
        {
            warn!("Failed to store {} notifications: {}", notifications.len(), e);
        }
    }
}
