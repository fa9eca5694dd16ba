//! Records read and written by the certificate manager.

mod certificate;
mod email;
mod registrant;
mod request;

pub use certificate::{Certificate, CertificateState};
pub use email::{EmailLogEntry, EmailReason, append_email_log, count_sent_emails};
pub use registrant::{Address, Contact, Contacts, Registrant, VerificationEntry, VerificationState};
pub use request::{AUTOMATED, AuditEntry, CertificateRequest, RequestState, TransitionError};
