//! certman daemon library
//!
//! Certificate lifecycle orchestration for registered directory members:
//! - CA batch submission, status tracking and bundle download
//! - `SQLite` storage for requests, registrants, certificates and secrets
//! - Email notifications, one-time password links and certificate webhooks
//! - Reminders and automated reissuance ahead of certificate expiry

pub mod ca;
pub mod certman;
pub mod courier;
pub mod models;
pub mod notify;
pub mod profile;
pub mod secrets;
pub mod storage;
pub mod whisper;
