pub mod availability;
pub mod chatbot;
pub mod email;
pub mod jwt;
pub mod notifier;
pub mod payment;
pub mod sms;

pub use availability::BookingLocks;
pub use chatbot::Chatbot;
pub use email::EmailService;
pub use jwt::JwtService;
pub use notifier::Notifier;
pub use payment::PaymentService;
pub use sms::SmsService;
