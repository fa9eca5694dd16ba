//! Certificate issuance for the in-process authority.
//!
//! Generates a self-signed issuing CA and signs end-entity certificates
//! with the subject fields a CA profile asks for.
//!
//! Requires the `certs` feature to be enabled.

use chrono::{Datelike, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SerialNumber,
};

use crate::error::CryptoError;

/// Issuing CA material.
pub struct CaBundle {
    /// CA certificate parameters (needed for signing).
    pub params: CertificateParams,
    /// CA key pair.
    pub key_pair: KeyPair,
    /// PEM-encoded CA certificate.
    pub ca_cert_pem: String,
}

/// Subject and validity of an end-entity certificate to sign.
#[derive(Debug, Clone, Default)]
pub struct LeafRequest {
    pub common_name: String,
    /// Subject alternative names. The common name is always included.
    pub dns_names: Vec<String>,
    pub organization: Option<String>,
    pub locality: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
    /// Big-endian serial number; must not be empty.
    pub serial: Vec<u8>,
    pub validity_days: i64,
}

/// A freshly signed certificate with its key and issuing chain.
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: String,
}

impl IssuedCertificate {
    /// Concatenate leaf, chain and private key into one PEM document.
    pub fn to_pem_bundle(&self) -> String {
        format!("{}{}{}", self.cert_pem, self.chain_pem, self.key_pem)
    }
}

fn generation_error(e: rcgen::Error) -> CryptoError {
    CryptoError::Generation(e.to_string())
}

/// Generate a self-signed issuing CA.
pub fn generate_ca(org_name: &str) -> Result<CaBundle, CryptoError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{org_name} Issuing CA"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, org_name);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);

    let key_pair = KeyPair::generate().map_err(generation_error)?;
    let ca_cert = params.self_signed(&key_pair).map_err(generation_error)?;

    Ok(CaBundle {
        ca_cert_pem: ca_cert.pem(),
        params,
        key_pair,
    })
}

/// Sign an end-entity certificate for `request` with the given CA.
pub fn issue_leaf(ca: &CaBundle, request: &LeafRequest) -> Result<IssuedCertificate, CryptoError> {
    if request.serial.is_empty() {
        return Err(CryptoError::Generation("empty serial number".into()));
    }

    let mut sans = vec![request.common_name.clone()];
    sans.extend(
        request
            .dns_names
            .iter()
            .filter(|name| **name != request.common_name)
            .cloned(),
    );

    let mut params = CertificateParams::new(sans).map_err(generation_error)?;
    params
        .distinguished_name
        .push(DnType::CommonName, request.common_name.as_str());
    let optional = [
        (DnType::OrganizationName, &request.organization),
        (DnType::LocalityName, &request.locality),
        (DnType::StateOrProvinceName, &request.province),
        (DnType::CountryName, &request.country),
    ];
    for (kind, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            params.distinguished_name.push(kind, value);
        }
    }

    params.serial_number = Some(SerialNumber::from_slice(&request.serial));
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ServerAuth);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ClientAuth);

    // rcgen validity is day granular when built from a calendar date.
    let now = Utc::now();
    let expires = now + Duration::days(request.validity_days);
    let (year, month, day) = calendar_date(&(now - Duration::days(1)));
    params.not_before = rcgen::date_time_ymd(year, month, day);
    let (year, month, day) = calendar_date(&expires);
    params.not_after = rcgen::date_time_ymd(year, month, day);

    let issuer = Issuer::from_params(&ca.params, &ca.key_pair);
    let key = KeyPair::generate().map_err(generation_error)?;
    let cert = params.signed_by(&key, &issuer).map_err(generation_error)?;

    Ok(IssuedCertificate {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        chain_pem: ca.ca_cert_pem.clone(),
    })
}

#[allow(clippy::cast_possible_truncation)]
fn calendar_date(at: &chrono::DateTime<Utc>) -> (i32, u8, u8) {
    (at.year(), at.month() as u8, at.day() as u8)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::needless_pass_by_value
)]
mod tests {
    use super::*;

    fn leaf_request() -> LeafRequest {
        LeafRequest {
            common_name: "vasp.example.com".into(),
            dns_names: vec!["vasp.example.com".into(), "api.vasp.example.com".into()],
            organization: Some("Example VASP".into()),
            serial: vec![0x0A, 0xBC, 0x01],
            validity_days: 365,
            ..LeafRequest::default()
        }
    }

    #[test]
    fn generate_ca_produces_valid_pem() {
        let ca = generate_ca("certman Test").unwrap();
        assert!(ca.ca_cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_cert_pem.contains("END CERTIFICATE"));
    }

    #[test]
    fn issue_leaf_includes_key_and_chain() {
        let ca = generate_ca("certman Test").unwrap();
        let issued = issue_leaf(&ca, &leaf_request()).unwrap();

        assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(issued.key_pem.contains("BEGIN PRIVATE KEY"));
        assert_eq!(issued.chain_pem, ca.ca_cert_pem);

        let bundle = issued.to_pem_bundle();
        assert_eq!(bundle.matches("BEGIN CERTIFICATE").count(), 2);
        assert_eq!(bundle.matches("BEGIN PRIVATE KEY").count(), 1);
    }

    #[test]
    fn issue_leaf_requires_serial() {
        let ca = generate_ca("certman Test").unwrap();
        let mut request = leaf_request();
        request.serial.clear();
        assert!(matches!(
            issue_leaf(&ca, &request),
            Err(CryptoError::Generation(_))
        ));
    }
}
