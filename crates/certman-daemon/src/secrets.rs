//! Versioned secrets scoped by certificate request.
//!
//! Each request owns at most one secret per [`SecretKind`]; every write adds
//! a new version and readers always take the latest one.

use async_trait::async_trait;

use crate::storage::DatabaseError;

/// Secrets kept for a certificate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// Password protecting the downloaded bundle.
    Password,
    /// The downloaded bundle itself.
    Cert,
}

impl SecretKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Cert => "cert",
        }
    }
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret storage error: {0}")]
    Storage(String),

    #[error("Secret is not valid UTF-8: {0}")]
    Encoding(String),
}

impl SecretError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<DatabaseError> for SecretError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create the secret container. Creating an existing secret is a no-op.
    async fn create_secret(&self, request_id: &str, kind: SecretKind) -> Result<(), SecretError>;

    /// Store `payload` as the next version and return its version number.
    async fn add_secret_version(
        &self,
        request_id: &str,
        kind: SecretKind,
        payload: &[u8],
    ) -> Result<i64, SecretError>;

    /// Payload of the most recent version.
    async fn latest_version(
        &self,
        request_id: &str,
        kind: SecretKind,
    ) -> Result<Vec<u8>, SecretError>;
}

/// Secrets of a single certificate request.
pub struct SecretScope<'a> {
    store: &'a dyn SecretStore,
    request_id: &'a str,
}

impl<'a> SecretScope<'a> {
    pub fn new(store: &'a dyn SecretStore, request_id: &'a str) -> Self {
        Self { store, request_id }
    }

    pub async fn create(&self, kind: SecretKind) -> Result<(), SecretError> {
        self.store.create_secret(self.request_id, kind).await
    }

    pub async fn add_version(&self, kind: SecretKind, payload: &[u8]) -> Result<i64, SecretError> {
        self.store
            .add_secret_version(self.request_id, kind, payload)
            .await
    }

    /// Create the secret if needed and store `payload` as a new version.
    pub async fn put(&self, kind: SecretKind, payload: &[u8]) -> Result<i64, SecretError> {
        self.create(kind).await?;
        self.add_version(kind, payload).await
    }

    pub async fn latest(&self, kind: SecretKind) -> Result<Vec<u8>, SecretError> {
        self.store.latest_version(self.request_id, kind).await
    }

    pub async fn latest_string(&self, kind: SecretKind) -> Result<String, SecretError> {
        let payload = self.latest(kind).await?;
        String::from_utf8(payload).map_err(|e| SecretError::Encoding(e.to_string()))
    }
}
