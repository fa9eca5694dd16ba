//! Record store seam used by the certificate manager.
//!
//! The manager only needs keyed reads and upserts plus a way to walk every
//! request or registrant. Walking is done with [`Cursor`], which pages with
//! keyset pagination so no connection is held between items.

use std::collections::VecDeque;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::db::{Database, DatabaseError};
use crate::models::{Certificate, CertificateRequest, Registrant};

/// Records fetched per cursor page.
pub const PAGE_SIZE: u32 = 100;

/// Collections that can be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    CertificateRequests,
    Registrants,
}

impl Collection {
    pub const fn table(&self) -> &'static str {
        match self {
            Self::CertificateRequests => "certificate_requests",
            Self::Registrants => "registrants",
        }
    }
}

/// An undecoded stored document.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: String,
    pub data: String,
}

/// Persistence operations the manager relies on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Up to `limit` records with ids strictly greater than `after`, by id.
    async fn scan(
        &self,
        collection: Collection,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RawRecord>, DatabaseError>;

    async fn retrieve_request(&self, id: &str) -> Result<CertificateRequest, DatabaseError>;
    async fn update_request(&self, request: &CertificateRequest) -> Result<(), DatabaseError>;

    async fn retrieve_registrant(&self, id: &str) -> Result<Registrant, DatabaseError>;
    async fn update_registrant(&self, registrant: &Registrant) -> Result<(), DatabaseError>;

    async fn retrieve_certificate(&self, id: &str) -> Result<Certificate, DatabaseError>;
    async fn update_certificate(&self, certificate: &Certificate) -> Result<(), DatabaseError>;
}

/// A record type stored in a scannable collection.
pub trait Document: DeserializeOwned + Send {
    const COLLECTION: Collection;
}

impl Document for CertificateRequest {
    const COLLECTION: Collection = Collection::CertificateRequests;
}

impl Document for Registrant {
    const COLLECTION: Collection = Collection::Registrants;
}

/// Walks every record of one collection in id order.
///
/// A record that fails to decode is yielded as an error and the walk goes
/// on; a failed page fetch is yielded as an error and ends the walk.
pub struct Cursor<'a, T> {
    store: &'a dyn Store,
    after: Option<String>,
    page: VecDeque<RawRecord>,
    exhausted: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Document> Cursor<'a, T> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            after: None,
            page: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }
    }

    /// Next record, or `None` once the collection is exhausted.
    pub async fn next(&mut self) -> Option<Result<T, DatabaseError>> {
        if self.page.is_empty()
            && !self.exhausted
            && let Err(e) = self.fetch().await
        {
            self.exhausted = true;
            return Some(Err(e));
        }

        let record = self.page.pop_front()?;
        Some(serde_json::from_str(&record.data).map_err(|e| {
            DatabaseError::Serialization(format!(
                "{} {}: {e}",
                T::COLLECTION.table(),
                record.id
            ))
        }))
    }

    async fn fetch(&mut self) -> Result<(), DatabaseError> {
        let records = self
            .store
            .scan(T::COLLECTION, self.after.as_deref(), PAGE_SIZE)
            .await?;
        if records.len() < PAGE_SIZE as usize {
            self.exhausted = true;
        }
        if let Some(last) = records.last() {
            self.after = Some(last.id.clone());
        }
        self.page.extend(records);
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn scan(
        &self,
        collection: Collection,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RawRecord>, DatabaseError> {
        let query = format!(
            "SELECT id, data FROM {} WHERE id > ? ORDER BY id LIMIT ?",
            collection.table()
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .bind(after.unwrap_or(""))
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, data)| RawRecord { id, data })
            .collect())
    }

    async fn retrieve_request(&self, id: &str) -> Result<CertificateRequest, DatabaseError> {
        self.get_certificate_request(id).await
    }

    async fn update_request(&self, request: &CertificateRequest) -> Result<(), DatabaseError> {
        self.upsert_certificate_request(request).await
    }

    async fn retrieve_registrant(&self, id: &str) -> Result<Registrant, DatabaseError> {
        self.get_registrant(id).await
    }

    async fn update_registrant(&self, registrant: &Registrant) -> Result<(), DatabaseError> {
        self.upsert_registrant(registrant).await
    }

    async fn retrieve_certificate(&self, id: &str) -> Result<Certificate, DatabaseError> {
        self.get_certificate(id).await
    }

    async fn update_certificate(&self, certificate: &Certificate) -> Result<(), DatabaseError> {
        self.upsert_certificate(certificate).await
    }
}
