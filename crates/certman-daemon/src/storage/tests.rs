//! Storage layer tests for the certificate manager.

use super::db::Database;
use super::store::{Cursor, PAGE_SIZE, Store};
use crate::models::{
    Certificate, CertificateRequest, Registrant, RequestState, VerificationState,
};
use certman_crypto::CertificateDetails;

async fn test_db() -> Database {
    Database::open_in_memory().await.unwrap()
}

// === Registrant tests ===

#[tokio::test]
async fn registrant_round_trips_through_store() {
    let db = test_db().await;
    let mut registrant = Registrant::new("alice.example.com");
    registrant.set_verification(VerificationState::Reviewed, "reviewed", "admin");
    db.update_registrant(&registrant).await.unwrap();

    let loaded = db.retrieve_registrant(&registrant.id).await.unwrap();
    assert_eq!(loaded, registrant);
    assert!(db.retrieve_registrant("missing").await.unwrap_err().is_not_found());
}

// === Certificate tests ===

#[tokio::test]
async fn certificate_round_trips_through_store() {
    let db = test_db().await;
    let registrant = Registrant::new("alice.example.com");
    let request = CertificateRequest::new(&registrant);
    let details = CertificateDetails {
        serial_number: vec![0x0A, 0xBC],
        not_after: "2030-01-01T00:00:00Z".into(),
        ..CertificateDetails::default()
    };
    let cert = Certificate::issued(&request, details);
    assert_eq!(cert.id, "0ABC");

    db.update_certificate(&cert).await.unwrap();
    let loaded = db.retrieve_certificate("0ABC").await.unwrap();
    assert_eq!(loaded, cert);
}

// === Cursor tests ===

#[tokio::test]
async fn cursor_walks_every_page() {
    let db = test_db().await;
    let total = PAGE_SIZE as usize * 2 + 7;
    for i in 0..total {
        let registrant = Registrant::new(&format!("host{i}.example.com"));
        db.update_registrant(&registrant).await.unwrap();
    }

    let mut cursor = Cursor::<Registrant>::new(&db);
    let mut seen = Vec::new();
    while let Some(item) = cursor.next().await {
        seen.push(item.unwrap().id);
    }

    assert_eq!(seen.len(), total);
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, seen);
}

#[tokio::test]
async fn cursor_on_empty_collection_ends_immediately() {
    let db = test_db().await;
    let mut cursor = Cursor::<CertificateRequest>::new(&db);
    assert!(cursor.next().await.is_none());
}

#[tokio::test]
async fn cursor_reports_bad_record_and_continues() {
    let db = test_db().await;
    let registrant = Registrant::new("alice.example.com");
    let mut good = CertificateRequest::new(&registrant);
    good.id = "b-good".into();
    db.update_request(&good).await.unwrap();

    let mut bad = good.clone();
    bad.id = "a-bad".into();
    let data = serde_json::to_string(&bad)
        .unwrap()
        .replace("\"INITIALIZED\"", "\"SHIPPED\"");
    sqlx::query(
        "INSERT INTO certificate_requests (id, registrant_id, status, data, updated_at) VALUES (?, ?, ?, ?, 0)",
    )
    .bind(&bad.id)
    .bind(&bad.registrant_id)
    .bind("SHIPPED")
    .bind(data)
    .execute(db.pool())
    .await
    .unwrap();

    let mut cursor = Cursor::<CertificateRequest>::new(&db);
    let first = cursor.next().await.unwrap();
    assert!(first.is_err());
    let second = cursor.next().await.unwrap().unwrap();
    assert_eq!(second.id, "b-good");
    assert_eq!(second.status, RequestState::Initialized);
    assert!(cursor.next().await.is_none());
}
