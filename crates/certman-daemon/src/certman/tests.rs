//! Certificate manager tests against the simulated CA and an in-memory database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::watch;

use super::*;
use crate::ca::{Authority, CaCall, Outcome, SimulatedAuthority};
use crate::courier::recording::{Delivery, RecordingCourier};
use crate::models::{
    AUTOMATED, Contact, EmailLogEntry, EmailReason, Registrant, VerificationState,
};
use crate::notify::mailer::recording::RecordingMailer;
use crate::notify::{EmailManager, Mailbox, templates};
use crate::secrets::{SecretKind, SecretScope};
use crate::storage::Database;
use crate::whisper::fixed::StaticLinker;
use certman_crypto::CertificateDetails;

const PASSWORD: &str = "Xq2mP9vLr4Tn8WzK";

struct Harness {
    db: Database,
    ca: Arc<SimulatedAuthority>,
    mailer: Arc<RecordingMailer>,
    linker: Arc<StaticLinker>,
    courier: Arc<RecordingCourier>,
    manager: CertManager,
    storage: tempfile::TempDir,
}

async fn harness() -> Harness {
    let db = Database::open_in_memory().await.unwrap();
    let ca = Arc::new(SimulatedAuthority::new(Profile::CipherTraceEe).unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let linker = Arc::new(StaticLinker::default());
    let courier = Arc::new(RecordingCourier::default());
    let storage = tempfile::tempdir().unwrap();

    let settings = Settings {
        request_interval: StdDuration::from_millis(20),
        reissuance_interval: StdDuration::from_secs(3600),
        storage: Some(storage.path().to_path_buf()),
        directory_id: "certman".into(),
        profile: Profile::CipherTraceEe,
        delivery: DeliveryBackoff {
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(4),
            multiplier: 2.0,
            max_retries: 2,
        },
    };
    let notifier = EmailManager::new(mailer.clone(), Mailbox::new("Ops", "ops@example.com"));
    let manager = CertManager::new(
        settings,
        Collaborators {
            store: Arc::new(db.clone()),
            secrets: Arc::new(db.clone()),
            ca: ca.clone(),
            notifier: Arc::new(notifier),
            linker: linker.clone(),
            courier: courier.clone(),
        },
    )
    .unwrap();

    Harness {
        db,
        ca,
        mailer,
        linker,
        courier,
        manager,
        storage,
    }
}

impl Harness {
    async fn registrant(&self, state: VerificationState) -> Registrant {
        let mut registrant = Registrant::new("alice.example.com");
        registrant.dns_names = vec!["www.alice.example.com".into()];
        registrant.contacts.technical = Some(Contact {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            email_log: Vec::new(),
        });
        registrant.set_verification(state, "test setup", "tests");
        self.db.update_registrant(&registrant).await.unwrap();
        registrant
    }

    /// A verified registrant whose identity certificate expires in `days`
    /// days and one hour.
    async fn expiring_registrant(&self, days: i64) -> Registrant {
        let mut registrant = self.registrant(VerificationState::Verified).await;
        let not_after = Utc::now() + Duration::days(days) + Duration::hours(1);
        registrant.identity_certificate = Some(CertificateDetails {
            serial_number: vec![0x01],
            not_after: not_after.to_rfc3339(),
            ..CertificateDetails::default()
        });
        self.db.update_registrant(&registrant).await.unwrap();
        registrant
    }

    async fn ready_request(&self, registrant: &mut Registrant) -> CertificateRequest {
        let request = self.request_without_password(registrant).await;
        SecretScope::new(&self.db, &request.id)
            .put(SecretKind::Password, PASSWORD.as_bytes())
            .await
            .unwrap();
        request
    }

    async fn request_without_password(&self, registrant: &mut Registrant) -> CertificateRequest {
        let mut request = CertificateRequest::new(registrant);
        request
            .transition(RequestState::ReadyToSubmit, "queued", "tests")
            .unwrap();
        self.db.update_request(&request).await.unwrap();
        registrant.link_certificate_request(&request.id);
        self.db.update_registrant(registrant).await.unwrap();
        request
    }

    async fn request(&self, id: &str) -> CertificateRequest {
        self.db.retrieve_request(id).await.unwrap()
    }

    async fn reload(&self, registrant: &Registrant) -> Registrant {
        self.db.retrieve_registrant(&registrant.id).await.unwrap()
    }

    fn storage_is_empty(&self) -> bool {
        std::fs::read_dir(self.storage.path()).unwrap().next().is_none()
    }
}

fn assert_audit_chain(request: &CertificateRequest) {
    let mut state = RequestState::Initialized;
    for entry in &request.audit_log {
        assert_eq!(entry.previous, state, "audit chain broken at {entry:?}");
        state = entry.current;
    }
    assert_eq!(state, request.status);
}

fn last_description(request: &CertificateRequest) -> &str {
    &request.audit_log.last().unwrap().description
}

// === Request pipeline ===

#[tokio::test]
async fn full_pipeline_issues_and_delivers() {
    let h = harness().await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.submitted, 1);
    assert_eq!(report.failed, 0);

    let submitted = h.request(&request.id).await;
    assert_eq!(submitted.status, RequestState::Processing);
    assert_eq!(submitted.batch_id, 1);
    assert_eq!(submitted.authority_id, 1);
    assert_eq!(submitted.batch_name, format!("certman-certreq-{}", request.id));
    assert!(!submitted.params.contains_key("pkcs12Password"));
    assert_eq!(
        h.reload(&registrant).await.verification_status,
        VerificationState::IssuingCertificate
    );

    let params = h.ca.submitted_params(1).await.unwrap();
    assert_eq!(params["commonName"], "alice.example.com");
    assert_eq!(params["dNSName"], "alice.example.com\nwww.alice.example.com");
    assert_eq!(params["pkcs12Password"], PASSWORD);

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.downloading, 1);
    let reports = h.manager.wait_for_downloads().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_ok(), "{:?}", reports[0].result);

    let done = h.request(&request.id).await;
    assert_eq!(done.status, RequestState::Completed);
    assert_audit_chain(&done);
    let states: Vec<_> = done.audit_log.iter().map(|e| e.current).collect();
    assert_eq!(
        states,
        vec![
            RequestState::ReadyToSubmit,
            RequestState::Processing,
            RequestState::Downloading,
            RequestState::Downloaded,
            RequestState::Completed,
        ]
    );

    let certificate_id = done.certificate_id.clone().unwrap();
    let certificate = h.db.retrieve_certificate(&certificate_id).await.unwrap();
    assert_eq!(certificate.id, certificate.details.serial_hex());
    assert_eq!(certificate.id, certificate.id.to_uppercase());
    assert_eq!(certificate.details.subject.common_name, "alice.example.com");
    assert!(!certificate.details.chain.contains("PRIVATE KEY"));

    let registrant = h.reload(&registrant).await;
    assert_eq!(registrant.verification_status, VerificationState::Verified);
    assert_eq!(registrant.certificates, vec![certificate_id]);
    assert_eq!(registrant.identity_certificate, Some(certificate.details));
    let log = &registrant.contacts.technical.as_ref().unwrap().email_log;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reason, EmailReason::DeliverCertificates.as_str());

    assert_eq!(h.mailer.subjects().await, vec![templates::DELIVER_CERTS_SUBJECT]);
    assert!(
        !SecretScope::new(&h.db, &request.id)
            .latest(SecretKind::Cert)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(h.storage_is_empty());
}

#[tokio::test]
async fn submission_happens_once_across_ticks() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Pending).await;
    let mut registrant = h.registrant(VerificationState::Verified).await;
    let request = h.ready_request(&mut registrant).await;

    let first = h.manager.handle_certificate_requests().await;
    let second = h.manager.handle_certificate_requests().await;
    assert_eq!((first.submitted, first.checked), (1, 0));
    assert_eq!((second.submitted, second.checked), (0, 1));
    assert_eq!(h.ca.batch_count().await, 1);

    let pending = h.request(&request.id).await;
    assert_eq!(pending.status, RequestState::Processing);
    assert_eq!(last_description(&pending), "awaiting batch processing");
    assert_audit_chain(&pending);
}

#[tokio::test]
async fn ineligible_registrants_are_rejected_without_contacting_ca() {
    for state in [VerificationState::PendingReview, VerificationState::Rejected] {
        let h = harness().await;
        let mut registrant = h.registrant(state).await;
        let request = h.ready_request(&mut registrant).await;

        let report = h.manager.handle_certificate_requests().await;
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 0);

        let rejected = h.request(&request.id).await;
        assert_eq!(rejected.status, RequestState::CrRejected);
        assert_eq!(last_description(&rejected), "certificate request rejected");
        assert!(h.ca.calls().await.is_empty());
        assert_eq!(h.reload(&registrant).await.verification_status, state);
    }
}

#[tokio::test]
async fn rejected_batch_ends_rejected() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Reject("organization mismatch".into()))
        .await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let mut rejections = 0;
    for _ in 0..3 {
        rejections += h.manager.handle_certificate_requests().await.rejected;
    }
    assert_eq!(rejections, 1);

    let rejected = h.request(&request.id).await;
    assert_eq!(rejected.status, RequestState::CrRejected);
    assert_eq!(rejected.reject_reason, "organization mismatch");
    assert_audit_chain(&rejected);
    assert!(!h.ca.calls().await.contains(&CaCall::Download));
    assert!(h.manager.wait_for_downloads().await.is_empty());
}

#[tokio::test]
async fn failed_batch_without_reason_ends_errored() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Error).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;

    let errored = h.request(&request.id).await;
    assert_eq!(errored.status, RequestState::CrErrored);
    assert_eq!(last_description(&errored), "certificate request errored");
}

#[tokio::test]
async fn first_authority_with_balance_is_used() {
    let h = harness().await;
    h.ca.set_authorities(vec![
        Authority { id: 1, balance: 0 },
        Authority { id: 2, balance: 0 },
    ])
    .await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.request(&request.id).await.status, RequestState::ReadyToSubmit);
    assert_eq!(h.ca.batch_count().await, 0);

    h.ca.set_authorities(vec![
        Authority { id: 1, balance: 0 },
        Authority { id: 2, balance: 5 },
        Authority { id: 3, balance: 5 },
    ])
    .await;
    h.manager.handle_certificate_requests().await;
    let submitted = h.request(&request.id).await;
    assert_eq!(submitted.status, RequestState::Processing);
    assert_eq!(submitted.authority_id, 2);
}

#[tokio::test]
async fn unreadable_authority_balance_falls_through_to_next_authority() {
    let h = harness().await;
    h.ca.set_authorities(vec![
        Authority { id: 1, balance: 5 },
        Authority { id: 2, balance: 5 },
    ])
    .await;
    h.ca.fail_next(CaCall::AuthorityBalance, "balance service down")
        .await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.failed, 0);
    let submitted = h.request(&request.id).await;
    assert_eq!(submitted.status, RequestState::Processing);
    assert_eq!(submitted.authority_id, 2);
}

#[tokio::test]
async fn missing_password_leaves_request_ready() {
    let h = harness().await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.request_without_password(&mut registrant).await;

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.request(&request.id).await.status, RequestState::ReadyToSubmit);
    assert!(!h.ca.calls().await.contains(&CaCall::CreateBatch));
}

#[tokio::test]
async fn ca_outage_is_retried_next_tick() {
    let h = harness().await;
    h.ca.fail_next(CaCall::CreateBatch, "maintenance").await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.failed, 1);
    let unchanged = h.request(&request.id).await;
    assert_eq!(unchanged.status, RequestState::ReadyToSubmit);
    assert_eq!(unchanged.audit_log.len(), 1);

    h.manager.handle_certificate_requests().await;
    assert_eq!(h.request(&request.id).await.status, RequestState::Processing);
}

#[tokio::test]
async fn registrant_change_during_issuance_rejects_request() {
    let h = harness().await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;
    h.manager.handle_certificate_requests().await;

    let mut changed = h.reload(&registrant).await;
    changed.set_verification(VerificationState::Rejected, "fraud", "admin");
    h.db.update_registrant(&changed).await.unwrap();

    h.manager.handle_certificate_requests().await;
    let rejected = h.request(&request.id).await;
    assert_eq!(rejected.status, RequestState::CrRejected);
    assert_audit_chain(&rejected);
    assert!(!h.ca.calls().await.contains(&CaCall::Download));
    assert!(h.manager.wait_for_downloads().await.is_empty());
}

#[tokio::test]
async fn delivery_failure_leaves_request_downloaded() {
    let h = harness().await;
    h.mailer.set_failing(true);
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;
    let reports = h.manager.wait_for_downloads().await;
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].result, Err(CertManError::Notify(_))));

    let stuck = h.request(&request.id).await;
    assert_eq!(stuck.status, RequestState::Downloaded);
    let certificate_id = stuck.certificate_id.clone().unwrap();
    h.db.retrieve_certificate(&certificate_id).await.unwrap();
    assert_eq!(
        h.reload(&registrant).await.verification_status,
        VerificationState::Verified
    );
    assert!(h.storage_is_empty());

    // Downloaded requests are not picked up again.
    let report = h.manager.handle_certificate_requests().await;
    assert_eq!((report.submitted, report.checked), (0, 0));
}

#[tokio::test]
async fn collected_batch_status_is_reread() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Collected).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;
    h.manager.wait_for_downloads().await;

    assert!(h.ca.calls().await.contains(&CaCall::BatchStatus));
    let done = h.request(&request.id).await;
    assert_eq!(done.status, RequestState::Completed);
    assert_eq!(done.batch_status, crate::ca::batch_status::READY_FOR_DOWNLOAD);
}

#[tokio::test]
async fn partial_failure_still_downloads() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::PartialFailure).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;
    h.manager.wait_for_downloads().await;
    assert_eq!(h.request(&request.id).await.status, RequestState::Completed);
}

#[tokio::test]
async fn stalled_batch_is_an_unhandled_state() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Stalled).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;

    let stalled = h.request(&request.id).await;
    assert_eq!(stalled.status, RequestState::Processing);
    assert_eq!(last_description(&stalled), "unhandled CA state");
    assert!(!h.ca.calls().await.contains(&CaCall::Download));

    h.ca.set_batch_outcome(stalled.batch_id, Outcome::Issue)
        .await
        .unwrap();
    h.manager.handle_certificate_requests().await;
    h.manager.wait_for_downloads().await;
    assert_eq!(h.request(&request.id).await.status, RequestState::Completed);
}

#[tokio::test]
async fn processing_request_without_batch_fails_check() {
    let h = harness().await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let mut request = h.ready_request(&mut registrant).await;
    request
        .transition(RequestState::Processing, "forced", "tests")
        .unwrap();
    h.db.update_request(&request).await.unwrap();

    let report = h.manager.handle_certificate_requests().await;
    assert_eq!((report.checked, report.failed), (1, 1));
    assert!(h.ca.calls().await.is_empty());
}

#[tokio::test]
async fn resubmission_requeues_failed_requests_only() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Error).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;
    h.manager.handle_certificate_requests().await;
    h.manager.handle_certificate_requests().await;

    h.manager.resubmit_request(&request.id, "operator").await.unwrap();
    let requeued = h.request(&request.id).await;
    assert_eq!(requeued.status, RequestState::ReadyToSubmit);
    assert_eq!(requeued.batch_id, 0);
    assert_eq!(requeued.audit_log.last().unwrap().source, "operator");

    let err = h
        .manager
        .resubmit_request(&request.id, "operator")
        .await
        .unwrap_err();
    assert!(matches!(err, CertManError::Transition(_)));

    h.ca.set_outcome(Outcome::Issue).await;
    h.manager.handle_certificate_requests().await;
    assert_eq!(h.request(&request.id).await.batch_id, 2);
}

// === Reissuance ===

fn action_for(actions: &[(String, ReissuanceAction)], id: &str) -> ReissuanceAction {
    actions
        .iter()
        .find(|(registrant_id, _)| registrant_id == id)
        .map(|(_, action)| *action)
        .unwrap()
}

#[tokio::test]
async fn reissuance_at_eight_days_queues_one_request() {
    let h = harness().await;
    let registrant = h.expiring_registrant(8).await;

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &registrant.id), ReissuanceAction::Reissued);

    let reissued = h.reload(&registrant).await;
    assert_eq!(reissued.certificate_requests.len(), 1);
    let request = h.request(&reissued.certificate_requests[0]).await;
    assert_eq!(request.status, RequestState::ReadyToSubmit);
    assert_eq!(last_description(&request), "automated certificate reissuance");
    assert_eq!(request.audit_log[0].source, AUTOMATED);
    assert_eq!(request.common_name, "alice.example.com");
    assert_eq!(request.dns_names, vec!["www.alice.example.com".to_string()]);

    let password = SecretScope::new(&h.db, &request.id)
        .latest_string(SecretKind::Password)
        .await
        .unwrap();
    assert_eq!(password.len(), 16);

    let links = h.linker.secrets().await;
    assert_eq!(links.len(), 1);
    assert!(links[0].0.contains(&password));
    assert_eq!(links[0].1, 3);
    assert!(links[0].2 > Utc::now() + Duration::days(6));

    let sent = h.mailer.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, templates::REISSUANCE_STARTED_SUBJECT);
    assert_eq!(sent[0].to.email, "alice@example.com");
    assert!(sent[0].text.contains("https://whisper.test/secret/1"));
    assert!(!sent[0].text.contains(&password));
    assert_eq!(sent[1].subject, templates::REISSUANCE_ADMIN_SUBJECT);
    assert_eq!(sent[1].to.email, "ops@example.com");
    assert_eq!(reissued.admin_email_log.len(), 1);
    assert_eq!(
        reissued.admin_email_log[0].reason,
        EmailReason::ReissuanceStarted.as_str()
    );

    let again = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&again, &registrant.id), ReissuanceAction::InProgress);
    assert_eq!(h.reload(&registrant).await.certificate_requests.len(), 1);
    assert_eq!(h.linker.secrets().await.len(), 1);
    assert_eq!(h.mailer.sent().await.len(), 2);

    // The queued request goes through the normal pipeline.
    let report = h.manager.handle_certificate_requests().await;
    assert_eq!(report.submitted, 1);
    assert_eq!(h.request(&request.id).await.status, RequestState::Processing);
}

#[tokio::test]
async fn reissuance_reminder_at_six_days() {
    let h = harness().await;
    let registrant = h.expiring_registrant(6).await;

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(
        action_for(&actions, &registrant.id),
        ReissuanceAction::SevenDayReminder
    );
    assert_eq!(
        h.mailer.subjects().await,
        vec![templates::REISSUANCE_REMINDER_SUBJECT]
    );
    let reminded = h.reload(&registrant).await;
    assert!(reminded.certificate_requests.is_empty());
    assert!(reminded.admin_email_log.is_empty());

    h.manager.handle_certificate_reissuance().await;
    assert_eq!(h.mailer.sent().await.len(), 1);
}

#[tokio::test]
async fn seven_day_reminder_follows_recent_thirty_day_reminder() {
    let h = harness().await;
    let mut registrant = h.expiring_registrant(6).await;
    if let Some(contact) = registrant.contacts.technical.as_mut() {
        contact.email_log.push(EmailLogEntry {
            timestamp: Utc::now() - Duration::days(3),
            reason: EmailReason::FirstReissuanceReminder.as_str().to_string(),
            subject: templates::REISSUANCE_REMINDER_SUBJECT.to_string(),
            recipient: contact.email.clone(),
        });
    }
    h.db.update_registrant(&registrant).await.unwrap();

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(
        action_for(&actions, &registrant.id),
        ReissuanceAction::SevenDayReminder
    );
    assert_eq!(h.mailer.sent().await.len(), 1);
}

#[tokio::test]
async fn reissuance_notice_at_twenty_nine_days() {
    let h = harness().await;
    let registrant = h.expiring_registrant(29).await;

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(
        action_for(&actions, &registrant.id),
        ReissuanceAction::ThirtyDayReminder
    );
    assert_eq!(
        h.mailer.subjects().await,
        vec![
            templates::REISSUANCE_REMINDER_SUBJECT,
            templates::EXPIRES_ADMIN_SUBJECT,
        ]
    );
    let noticed = h.reload(&registrant).await;
    assert_eq!(
        noticed.admin_email_log[0].reason,
        EmailReason::ReissuanceReminder.as_str()
    );

    h.manager.handle_certificate_reissuance().await;
    assert_eq!(h.mailer.sent().await.len(), 2);
}

#[tokio::test]
async fn expired_and_distant_certificates_send_nothing() {
    let h = harness().await;
    let expired = h.expiring_registrant(-2).await;
    let distant = h.expiring_registrant(45).await;

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &expired.id), ReissuanceAction::Expired);
    assert_eq!(action_for(&actions, &distant.id), ReissuanceAction::NoAction);
    assert!(h.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn reissuance_skips_unverified_and_invalid_registrants() {
    let h = harness().await;
    let reviewed = h.registrant(VerificationState::Reviewed).await;
    let bare = h.registrant(VerificationState::Verified).await;
    let mut broken = h.expiring_registrant(8).await;
    if let Some(certificate) = broken.identity_certificate.as_mut() {
        certificate.not_after = "not a date".into();
    }
    h.db.update_registrant(&broken).await.unwrap();

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &reviewed.id), ReissuanceAction::Skipped);
    assert_eq!(action_for(&actions, &bare.id), ReissuanceAction::Invalid);
    assert_eq!(action_for(&actions, &broken.id), ReissuanceAction::Invalid);
    assert!(h.mailer.sent().await.is_empty());
    assert!(h.linker.secrets().await.is_empty());
}

#[tokio::test]
async fn issued_request_stuck_downloaded_does_not_block_reissuance() {
    let h = harness().await;
    let mut registrant = h.expiring_registrant(8).await;
    let mut previous = h.request_without_password(&mut registrant).await;
    previous
        .transition(RequestState::Downloaded, "certificate downloaded", AUTOMATED)
        .unwrap();
    previous.certificate_id = Some("0A1B".into());
    h.db.update_request(&previous).await.unwrap();

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &registrant.id), ReissuanceAction::Reissued);
    let reissued = h.reload(&registrant).await;
    assert_eq!(reissued.certificate_requests.len(), 2);
    assert_eq!(h.request(&previous.id).await.status, RequestState::Downloaded);
}

#[tokio::test]
async fn reissuance_mail_failure_keeps_queued_request() {
    let h = harness().await;
    h.mailer.set_failing(true);
    let registrant = h.expiring_registrant(8).await;

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &registrant.id), ReissuanceAction::Failed);

    // The request is stored before mail goes out, so the next pass sees it.
    let reloaded = h.reload(&registrant).await;
    assert_eq!(reloaded.certificate_requests.len(), 1);
    h.mailer.set_failing(false);
    let again = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&again, &registrant.id), ReissuanceAction::InProgress);
}

// === Webhook delivery ===

const WEBHOOK: &str = "https://hooks.alice.example.com";

impl Harness {
    async fn webhook_registrant(&self, state: VerificationState, no_email: bool) -> Registrant {
        let mut registrant = self.registrant(state).await;
        registrant.certificate_webhook = Some(WEBHOOK.into());
        registrant.no_email_delivery = no_email;
        self.db.update_registrant(&registrant).await.unwrap();
        registrant
    }

    async fn issue(&self, registrant: &mut Registrant) -> CertificateRequest {
        let request = self.ready_request(registrant).await;
        self.manager.handle_certificate_requests().await;
        self.manager.handle_certificate_requests().await;
        let reports = self.manager.wait_for_downloads().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].result.is_ok(), "{:?}", reports[0].result);
        self.request(&request.id).await
    }
}

#[tokio::test]
async fn webhook_only_delivery_skips_email() {
    let h = harness().await;
    let mut registrant = h
        .webhook_registrant(VerificationState::Reviewed, true)
        .await;
    let done = h.issue(&mut registrant).await;

    assert_eq!(done.status, RequestState::Completed);
    let sealed = SecretScope::new(&h.db, &done.id)
        .latest(SecretKind::Cert)
        .await
        .unwrap();
    assert_eq!(
        h.courier.deliveries().await,
        vec![Delivery::Certificate {
            webhook: WEBHOOK.into(),
            request_id: done.id.clone(),
            payload: sealed,
        }]
    );
    assert!(h.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn webhook_delivery_keeps_email_unless_opted_out() {
    let h = harness().await;
    let mut registrant = h
        .webhook_registrant(VerificationState::Reviewed, false)
        .await;
    let done = h.issue(&mut registrant).await;

    assert_eq!(done.status, RequestState::Completed);
    assert_eq!(h.courier.deliveries().await.len(), 1);
    assert_eq!(
        h.mailer.subjects().await,
        vec![templates::DELIVER_CERTS_SUBJECT]
    );
}

#[tokio::test]
async fn failed_webhook_falls_back_to_email() {
    let h = harness().await;
    h.courier.fail_times(10);
    let mut registrant = h
        .webhook_registrant(VerificationState::Reviewed, true)
        .await;
    let done = h.issue(&mut registrant).await;

    assert_eq!(done.status, RequestState::Completed);
    assert_eq!(h.courier.attempts(), 3);
    assert!(h.courier.deliveries().await.is_empty());
    assert_eq!(
        h.mailer.subjects().await,
        vec![templates::DELIVER_CERTS_SUBJECT]
    );
}

#[tokio::test]
async fn webhook_retry_delivers_without_email() {
    let h = harness().await;
    h.courier.fail_times(1);
    let mut registrant = h
        .webhook_registrant(VerificationState::Reviewed, true)
        .await;
    let done = h.issue(&mut registrant).await;

    assert_eq!(done.status, RequestState::Completed);
    assert_eq!(h.courier.attempts(), 2);
    assert_eq!(h.courier.deliveries().await.len(), 1);
    assert!(h.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn reissuance_password_goes_to_webhook() {
    let h = harness().await;
    let mut registrant = h
        .webhook_registrant(VerificationState::Verified, true)
        .await;
    registrant.identity_certificate = Some(CertificateDetails {
        serial_number: vec![0x01],
        not_after: (Utc::now() + Duration::days(8) + Duration::hours(1)).to_rfc3339(),
        ..CertificateDetails::default()
    });
    h.db.update_registrant(&registrant).await.unwrap();

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &registrant.id), ReissuanceAction::Reissued);

    let reissued = h.reload(&registrant).await;
    let request = h.request(&reissued.certificate_requests[0]).await;
    assert_eq!(request.webhook.as_deref(), Some(WEBHOOK));
    let password = SecretScope::new(&h.db, &request.id)
        .latest_string(SecretKind::Password)
        .await
        .unwrap();
    assert_eq!(
        h.courier.deliveries().await,
        vec![Delivery::Password {
            webhook: WEBHOOK.into(),
            request_id: request.id.clone(),
            password,
        }]
    );
    assert!(h.linker.secrets().await.is_empty());
    assert_eq!(
        h.mailer.subjects().await,
        vec![templates::REISSUANCE_ADMIN_SUBJECT]
    );
}

#[tokio::test]
async fn reissuance_password_falls_back_to_link_when_webhook_fails() {
    let h = harness().await;
    h.courier.fail_times(10);
    let mut registrant = h
        .webhook_registrant(VerificationState::Verified, true)
        .await;
    registrant.identity_certificate = Some(CertificateDetails {
        serial_number: vec![0x01],
        not_after: (Utc::now() + Duration::days(8) + Duration::hours(1)).to_rfc3339(),
        ..CertificateDetails::default()
    });
    h.db.update_registrant(&registrant).await.unwrap();

    let actions = h.manager.handle_certificate_reissuance().await;
    assert_eq!(action_for(&actions, &registrant.id), ReissuanceAction::Reissued);
    assert_eq!(h.linker.secrets().await.len(), 1);
    assert_eq!(
        h.mailer.subjects().await,
        vec![
            templates::REISSUANCE_STARTED_SUBJECT,
            templates::REISSUANCE_ADMIN_SUBJECT,
        ]
    );
}

// === Scheduler ===

#[tokio::test]
async fn scheduler_runs_ticks_until_shutdown() {
    let h = harness().await;
    h.ca.set_outcome(Outcome::Pending).await;
    let mut registrant = h.registrant(VerificationState::Reviewed).await;
    let request = h.ready_request(&mut registrant).await;

    let (tx, rx) = watch::channel(false);
    let handle = h.manager.spawn(rx.clone()).unwrap();
    assert!(h.manager.is_running());
    assert!(matches!(
        h.manager.spawn(rx),
        Err(CertManError::AlreadyRunning)
    ));

    let mut status = RequestState::ReadyToSubmit;
    for _ in 0..200 {
        status = h.request(&request.id).await.status;
        if status == RequestState::Processing {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(status, RequestState::Processing);

    tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(!h.manager.is_running());

    let (tx, rx) = watch::channel(false);
    let handle = h.manager.spawn(rx).unwrap();
    tx.send(true).unwrap();
    handle.await.unwrap();
}

// === Settings and storage ===

#[test]
fn settings_follow_config() {
    let mut config = certman_core::config::CertManConfig {
        profile: "85".into(),
        request_interval_secs: 30,
        ..Default::default()
    };
    let settings = Settings::from_config(&config).unwrap();
    assert_eq!(settings.profile, Profile::CipherTraceEndEntity);
    assert_eq!(settings.request_interval, StdDuration::from_secs(30));
    assert_eq!(settings.directory_id, "certman");
    assert_eq!(settings.delivery.max_retries, 5);
    assert_eq!(settings.delivery.initial_delay, StdDuration::from_secs(1));

    config.profile = "Unknown Profile".into();
    assert!(matches!(
        Settings::from_config(&config),
        Err(CertManError::Profile(_))
    ));
}

#[test]
fn cert_storage_directories() {
    let dir = tempfile::tempdir().unwrap();

    let nested = dir.path().join("certs").join("issued");
    let storage = CertStorage::open(Some(&nested)).unwrap();
    assert!(storage.path().is_dir());

    let file = dir.path().join("occupied");
    std::fs::write(&file, b"").unwrap();
    assert!(matches!(
        CertStorage::open(Some(&file)),
        Err(CertManError::CertStorage(_))
    ));

    let temp = CertStorage::open(None).unwrap();
    let temp_path = temp.path().to_path_buf();
    assert!(temp_path.is_dir());
    drop(temp);
    assert!(!temp_path.exists());
}
