pub mod auth;
pub mod booking;
pub mod bot;
pub mod dashboard;
pub mod file_upload;
pub mod kyc;
pub mod message;
pub mod notification;
pub mod payment;
pub mod rent;
pub mod report;
pub mod user;
