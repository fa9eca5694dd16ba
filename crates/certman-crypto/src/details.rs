//! Leaf certificate extraction.
//!
//! Turns the PEM document inside an opened bundle into the certificate
//! details persisted on registrant and certificate records.

use chrono::{DateTime, SecondsFormat, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::{AttributeTypeAndValue, X509Certificate, X509Name};

use crate::error::CryptoError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Distinguished name fields of a certificate subject or issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub common_name: String,
    #[serde(default)]
    pub organization: Vec<String>,
    #[serde(default)]
    pub organizational_unit: Vec<String>,
    #[serde(default)]
    pub locality: Vec<String>,
    #[serde(default)]
    pub province: Vec<String>,
    #[serde(default)]
    pub country: Vec<String>,
}

/// Parsed leaf certificate with its public chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub version: u32,
    /// Big-endian serial number without sign padding.
    pub serial_number: Vec<u8>,
    pub signature: Vec<u8>,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub subject: Name,
    pub issuer: Name,
    /// RFC 3339 timestamps.
    pub not_before: String,
    pub not_after: String,
    #[serde(default)]
    pub revoked: bool,
    /// PEM encoded leaf certificate.
    pub data: String,
    /// PEM encoded issuing chain, leaf first. Never contains private keys.
    pub chain: String,
}

impl CertificateDetails {
    /// Uppercase hex serial number, used as the certificate record id.
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }

    /// Parse the `not_after` timestamp.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, CryptoError> {
        DateTime::parse_from_rfc3339(&self.not_after)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CryptoError::Certificate(format!("invalid not_after: {e}")))
    }
}

/// Extract the leaf certificate details from a PEM bundle.
///
/// The first certificate block is the leaf. Private key blocks are dropped
/// and every certificate block is re-encoded into the public chain.
pub fn extract(pem_bundle: &str) -> Result<CertificateDetails, CryptoError> {
    let blocks = pem::parse_many(pem_bundle.as_bytes())
        .map_err(|e| CryptoError::InvalidBundle(e.to_string()))?;
    let certs: Vec<Pem> = blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .collect();

    let leaf_block = certs
        .first()
        .ok_or_else(|| CryptoError::InvalidBundle("no certificates in bundle".into()))?;
    let (_, leaf) = x509_parser::parse_x509_certificate(leaf_block.contents())
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;

    let lf = EncodeConfig::new().set_line_ending(LineEnding::LF);
    let mut details = describe(&leaf)?;
    details.data = pem::encode_config(leaf_block, lf);
    details.chain = pem::encode_many_config(&certs, lf);
    Ok(details)
}

fn describe(cert: &X509Certificate<'_>) -> Result<CertificateDetails, CryptoError> {
    let validity = cert.validity();
    Ok(CertificateDetails {
        version: cert.version().0 + 1,
        serial_number: strip_sign_padding(cert.raw_serial()),
        signature: cert.signature_value.data.to_vec(),
        signature_algorithm: signature_algorithm_name(
            &cert.signature_algorithm.algorithm.to_id_string(),
        ),
        public_key_algorithm: public_key_algorithm_name(
            &cert.public_key().algorithm.algorithm.to_id_string(),
        ),
        subject: name_fields(cert.subject()),
        issuer: name_fields(cert.issuer()),
        not_before: rfc3339(validity.not_before.timestamp())?,
        not_after: rfc3339(validity.not_after.timestamp())?,
        revoked: false,
        data: String::new(),
        chain: String::new(),
    })
}

fn strip_sign_padding(raw: &[u8]) -> Vec<u8> {
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len().saturating_sub(1));
    raw[start..].to_vec()
}

fn rfc3339(timestamp: i64) -> Result<String, CryptoError> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| CryptoError::Certificate(format!("timestamp out of range: {timestamp}")))
}

fn name_fields(name: &X509Name<'_>) -> Name {
    fn collect<'s, 'a: 's>(
        values: impl Iterator<Item = &'s AttributeTypeAndValue<'a>>,
    ) -> Vec<String> {
        values
            .filter_map(|attr| attr.as_str().ok())
            .map(ToString::to_string)
            .collect()
    }

    Name {
        common_name: collect(name.iter_common_name())
            .into_iter()
            .next()
            .unwrap_or_default(),
        organization: collect(name.iter_organization()),
        organizational_unit: collect(name.iter_organizational_unit()),
        locality: collect(name.iter_locality()),
        province: collect(name.iter_state_or_province()),
        country: collect(name.iter_country()),
    }
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "SHA1-RSA",
        "1.2.840.113549.1.1.11" => "SHA256-RSA",
        "1.2.840.113549.1.1.12" => "SHA384-RSA",
        "1.2.840.113549.1.1.13" => "SHA512-RSA",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        other => other,
    }
    .to_string()
}

fn public_key_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.1" => "RSA",
        "1.2.840.10045.2.1" => "ECDSA",
        "1.3.101.112" => "Ed25519",
        other => other,
    }
    .to_string()
}
