use log::{error, info, warn};
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;
use std::time::Duration;

use crate::models::{Booking, Conversation, Kyc, Message, Notification, Rent, User};
use crate::utils::rate_limit::RATE_LIMITS;

pub fn init() -> AdHoc {
    AdHoc::on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(database) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&database).await {
                    warn!("Failed to create indexes: {}", e);
                }
                rocket.manage(database)
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                rocket
            }
        }
    })
}

async fn connect() -> Result<Database, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;

    Ok(client.database(&crate::config::Config::mongodb_database()))
}

fn index(keys: Document, options: Option<IndexOptions>) -> IndexModel {
    IndexModel::builder().keys(keys).options(options).build()
}

fn unique() -> Option<IndexOptions> {
    Some(IndexOptions::builder().unique(true).build())
}

async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<User>(User::COLLECTION)
        .create_index(index(doc! { "email": 1 }, unique()), None)
        .await?;

    db.collection::<Kyc>(Kyc::COLLECTION)
        .create_index(index(doc! { "user_id": 1 }, unique()), None)
        .await?;

    let rents = db.collection::<Rent>(Rent::COLLECTION);
    rents
        .create_index(index(doc! { "location": "2dsphere" }, None), None)
        .await?;
    rents
        .create_index(index(doc! { "admin_verified": 1, "created_at": -1 }, None), None)
        .await?;

    let bookings = db.collection::<Booking>(Booking::COLLECTION);
    bookings
        .create_index(
            index(doc! { "item_id": 1, "start_date": 1, "end_date": 1 }, None),
            None,
        )
        .await?;
    bookings
        .create_index(index(doc! { "payment.transaction_uuid": 1 }, None), None)
        .await?;

    db.collection::<Notification>(Notification::COLLECTION)
        .create_index(index(doc! { "user_id": 1, "created_at": -1 }, None), None)
        .await?;

    let conversations = db.collection::<Conversation>(Conversation::COLLECTION);
    conversations
        .create_index(index(doc! { "thread_key": 1 }, unique()), None)
        .await?;
    conversations
        .create_index(index(doc! { "participants": 1, "last_message_at": -1 }, None), None)
        .await?;

    db.collection::<Message>(Message::COLLECTION)
        .create_index(index(doc! { "conversation_id": 1, "created_at": 1 }, None), None)
        .await?;

    // One counter per key; lapsed windows expire on their own.
    let rate_limits = db.collection::<Document>(RATE_LIMITS);
    rate_limits
        .create_index(index(doc! { "key": 1 }, unique()), None)
        .await?;
    rate_limits
        .create_index(
            index(
                doc! { "expires_at": 1 },
                Some(IndexOptions::builder().expire_after(Duration::from_secs(0)).build()),
            ),
            None,
        )
        .await?;

    info!("✓ MongoDB indexes ensured");
    Ok(())
}

pub type DbConn = Database;
