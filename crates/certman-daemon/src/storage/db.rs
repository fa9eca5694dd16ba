//! Database connection and initialization.

pub use certman_core::db::DatabaseError;

certman_core::define_database!(Database, "Certman database migrations complete");
