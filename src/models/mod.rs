pub mod user;
pub mod rent;
pub mod booking;
pub mod kyc;
pub mod notification;
pub mod conversation;
pub mod report;
pub mod bot_message;

pub use user::*;
pub use rent::*;
pub use booking::*;
pub use kyc::*;
pub use notification::*;
pub use conversation::*;
pub use report::*;
pub use bot_message::*;
