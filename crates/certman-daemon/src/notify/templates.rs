//! Plain text message bodies.

use chrono::{DateTime, Utc};

use crate::models::Registrant;

pub const DELIVER_CERTS_SUBJECT: &str = "Your identity certificates are ready";
pub const REISSUANCE_REMINDER_SUBJECT: &str = "Your identity certificates will be reissued soon";
pub const REISSUANCE_STARTED_SUBJECT: &str = "Your identity certificates are being reissued";
pub const REISSUANCE_ADMIN_SUBJECT: &str = "Identity certificate reissuance started";
pub const EXPIRES_ADMIN_SUBJECT: &str = "Identity certificate expiring soon";

/// Shown when a certificate has no parseable expiration.
pub const UNKNOWN_DATE: &str = "unknown date";

/// Long form date, e.g. `Monday, July 25, 2022`.
pub fn long_date(date: DateTime<Utc>) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn expiration(registrant: &Registrant) -> String {
    registrant
        .identity_certificate
        .as_ref()
        .and_then(|c| c.expires_at().ok())
        .map_or_else(|| UNKNOWN_DATE.to_string(), long_date)
}

fn serial(registrant: &Registrant) -> String {
    registrant
        .identity_certificate
        .as_ref()
        .map(certman_crypto::CertificateDetails::serial_hex)
        .unwrap_or_default()
}

pub fn deliver_certs(name: &str, registrant: &Registrant) -> String {
    format!(
        "Hello {name},\n\n\
         The identity certificates for {cn} have been issued (serial number {serial}).\n\
         They are attached to this message, encrypted with the password you were given\n\
         when you registered.\n\n\
         Registration ID: {id}\n",
        cn = registrant.common_name,
        serial = serial(registrant),
        id = registrant.id,
    )
}

pub fn reissuance_reminder(
    name: &str,
    registrant: &Registrant,
    reissuance: DateTime<Utc>,
) -> String {
    format!(
        "Hello {name},\n\n\
         The identity certificates for {cn} expire on {expires}.\n\
         New certificates will be issued automatically on {reissue}; you will\n\
         receive a link to the new certificate password when that happens.\n\n\
         Registration ID: {id}\n",
        cn = registrant.common_name,
        expires = expiration(registrant),
        reissue = long_date(reissuance),
        id = registrant.id,
    )
}

pub fn reissuance_started(name: &str, registrant: &Registrant, secret_link: &str) -> String {
    format!(
        "Hello {name},\n\n\
         New identity certificates for {cn} have been requested.\n\
         The password protecting them can be retrieved once from the link below,\n\
         which expires in seven days:\n\n\
         {secret_link}\n\n\
         The certificates will be sent in a separate message once issued.\n\n\
         Registration ID: {id}\n",
        cn = registrant.common_name,
        id = registrant.id,
    )
}

pub fn reissuance_admin(registrant: &Registrant, reissuance: DateTime<Utc>) -> String {
    format!(
        "Certificate reissuance started for {cn} on {reissue}.\n\n\
         Registration ID: {id}\n\
         Serial number: {serial}\n\
         Expires: {expires}\n",
        cn = registrant.common_name,
        reissue = long_date(reissuance),
        id = registrant.id,
        serial = serial(registrant),
        expires = expiration(registrant),
    )
}

pub fn expires_admin(registrant: &Registrant, reissuance: DateTime<Utc>) -> String {
    format!(
        "The identity certificate for {cn} expires on {expires}.\n\
         Automatic reissuance is scheduled for {reissue}.\n\n\
         Registration ID: {id}\n\
         Serial number: {serial}\n",
        cn = registrant.common_name,
        expires = expiration(registrant),
        reissue = long_date(reissuance),
        id = registrant.id,
        serial = serial(registrant),
    )
}
