//! `SQLite` storage for the certificate manager.
//!
//! Persists certificate requests, registrants, certificates and the
//! versioned secrets scoped to each request.

mod db;
mod queries_certs;
mod queries_registrants;
mod queries_requests;
mod queries_secrets;
mod store;

#[cfg(test)]
mod tests;

pub use db::{Database, DatabaseError};
pub use store::{Collection, Cursor, Document, RawRecord, Store};
