//! certman crypto library
//!
//! Cryptographic helpers for the certificate lifecycle:
//!
//! - **Bundles**: PEM leaf, chain and key sealed with Argon2id + ChaCha20-Poly1305
//! - **Details**: leaf certificate fields extracted with x509-parser
//! - **Tokens**: random bundle passwords
//! - **Certs** (`certs` feature): CA and end-entity issuance with rcgen

pub mod bundle;
#[cfg(any(test, feature = "certs"))]
pub mod certs;
pub mod details;
pub mod error;
pub mod token;

pub use details::{CertificateDetails, Name};
pub use error::CryptoError;
