//! CA issuance profiles and the parameters each one requires.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::CertificateRequest;

/// Shown in logs in place of secret parameter values.
pub const MASK: &str = "********";

/// Parameter names understood by the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    CommonName,
    DnsName,
    Pkcs12Password,
    OrganizationName,
    LocalityName,
    StateOrProvinceName,
    CountryName,
}

impl ParamKey {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CommonName => "commonName",
            Self::DnsName => "dNSName",
            Self::Pkcs12Password => "pkcs12Password",
            Self::OrganizationName => "organizationName",
            Self::LocalityName => "localityName",
            Self::StateOrProvinceName => "stateOrProvinceName",
            Self::CountryName => "countryName",
        }
    }

    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Pkcs12Password)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Unknown CA profile: {0}")]
    Unknown(String),

    #[error("Certificate request is missing parameter {0}")]
    MissingParam(&'static str),
}

/// Issuance template configured at the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Domain validated end entity certificate.
    CipherTraceEe,
    /// Organization validated end entity certificate.
    CipherTraceEndEntity,
}

const EE_PARAMS: &[ParamKey] = &[
    ParamKey::CommonName,
    ParamKey::DnsName,
    ParamKey::Pkcs12Password,
];

const END_ENTITY_PARAMS: &[ParamKey] = &[
    ParamKey::CommonName,
    ParamKey::DnsName,
    ParamKey::Pkcs12Password,
    ParamKey::OrganizationName,
    ParamKey::LocalityName,
    ParamKey::StateOrProvinceName,
    ParamKey::CountryName,
];

impl Profile {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CipherTraceEe => "CipherTrace EE",
            Self::CipherTraceEndEntity => "CipherTrace End Entity Certificate",
        }
    }

    /// Numeric template id at the CA.
    pub const fn id(&self) -> i64 {
        match self {
            Self::CipherTraceEe => 17,
            Self::CipherTraceEndEntity => 85,
        }
    }

    pub const fn required_params(&self) -> &'static [ParamKey] {
        match self {
            Self::CipherTraceEe => EE_PARAMS,
            Self::CipherTraceEndEntity => END_ENTITY_PARAMS,
        }
    }

    /// Build the CA submission parameters for `request`.
    ///
    /// The common name and DNS names come from the request itself, the
    /// password from the caller; every other required key must already be
    /// in the request's params.
    pub fn build_params(
        &self,
        request: &CertificateRequest,
        password: &str,
    ) -> Result<BTreeMap<String, String>, ProfileError> {
        let mut params = BTreeMap::new();
        for key in self.required_params() {
            let value = match key {
                ParamKey::CommonName => request.common_name.clone(),
                ParamKey::DnsName => dns_name_param(request),
                ParamKey::Pkcs12Password => password.to_string(),
                other => request
                    .params
                    .get(other.as_str())
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .ok_or(ProfileError::MissingParam(other.as_str()))?,
            };
            if value.is_empty() {
                return Err(ProfileError::MissingParam(key.as_str()));
            }
            params.insert(key.as_str().to_string(), value);
        }
        Ok(params)
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Profile {
    type Err = ProfileError;

    /// Accepts the profile name or its numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::CipherTraceEe, Self::CipherTraceEndEntity]
            .into_iter()
            .find(|p| p.name() == s || p.id().to_string() == s)
            .ok_or_else(|| ProfileError::Unknown(s.to_string()))
    }
}

/// Common name first, then the remaining DNS names, one per line.
fn dns_name_param(request: &CertificateRequest) -> String {
    let mut names = vec![request.common_name.as_str()];
    names.extend(
        request
            .dns_names
            .iter()
            .map(String::as_str)
            .filter(|name| !name.is_empty() && *name != request.common_name),
    );
    names.join("\n")
}

fn is_secret_param(name: &str) -> bool {
    END_ENTITY_PARAMS
        .iter()
        .any(|key| key.is_secret() && key.as_str() == name)
}

/// Copy of `params` safe to log.
pub fn masked(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(k, v)| {
            if is_secret_param(k) {
                (k.clone(), MASK.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
