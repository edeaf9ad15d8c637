//! Key material generation.
//!
//! [`CertificateGenerator`] produces a certificate and private key shaped by
//! [`CertificateParameters`], either self-signed or signed by a stored CA.
//! [`RcgenGenerator`] uses `rcgen` with ECDSA keys. Passwords and usernames
//! come from the OS CSPRNG.

use std::net::IpAddr;

use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use uuid::Uuid;

use crate::error::CertificateError;
use crate::parameters::{
    CertificateParameters, ExtendedKeyUsage, KeyUsage, PasswordParameters, SubjectName,
};

/// Issuer material used to sign a new certificate.
#[derive(Debug, Clone, Copy)]
pub struct SigningAuthority<'a> {
    pub certificate: &'a str,
    pub private_key: &'a str,
}

/// Freshly generated certificate material.
#[derive(Clone)]
pub struct GeneratedCertificate {
    pub certificate: String,
    pub private_key: String,
    /// Signer PEM; the certificate itself when self-signed.
    pub ca: String,
}

impl std::fmt::Debug for GeneratedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedCertificate")
            .field("certificate", &self.certificate)
            .field("private_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Produces certificates.
pub trait CertificateGenerator: Send + Sync {
    /// Generate a certificate for `params`. `signer` is required unless the
    /// request is self-signed. `default_duration_days` applies when the
    /// request names no duration.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] when the request cannot be encoded, the
    /// signer material is malformed, or signing fails.
    fn generate(
        &self,
        params: &CertificateParameters,
        signer: Option<&SigningAuthority<'_>>,
        default_duration_days: u32,
    ) -> Result<GeneratedCertificate, CertificateError>;

    /// Whether `private_key` (PKCS#8 PEM) belongs to `certificate`.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] when either input cannot be parsed.
    fn private_key_matches(
        &self,
        certificate: &str,
        private_key: &str,
    ) -> Result<bool, CertificateError>;
}

/// `rcgen`-backed [`CertificateGenerator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenGenerator;

fn generation_err(e: impl std::fmt::Display) -> CertificateError {
    CertificateError::Generation {
        reason: e.to_string(),
    }
}

fn key_pair_for(bits: u32) -> Result<KeyPair, CertificateError> {
    let alg = match bits {
        256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        other => return Err(CertificateError::InvalidKeyLength { bits: other }),
    };
    KeyPair::generate_for(alg).map_err(generation_err)
}

fn distinguished_name(subject: &SubjectName) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    let fields = [
        (DnType::CommonName, &subject.common_name),
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
        (DnType::LocalityName, &subject.locality),
        (DnType::StateOrProvinceName, &subject.state),
        (DnType::CountryName, &subject.country),
    ];
    for (ty, value) in fields {
        if let Some(value) = value {
            dn.push(ty, value.clone());
        }
    }
    dn
}

fn san(value: &str) -> Result<SanType, CertificateError> {
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let ia5 = Ia5String::try_from(value).map_err(|_| CertificateError::InvalidAlternativeName {
        value: value.to_owned(),
    })?;
    Ok(if value.contains("://") {
        SanType::URI(ia5)
    } else if value.contains('@') {
        SanType::Rfc822Name(ia5)
    } else {
        SanType::DnsName(ia5)
    })
}

fn key_usage(usage: KeyUsage) -> KeyUsagePurpose {
    match usage {
        KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
        KeyUsage::NonRepudiation => KeyUsagePurpose::ContentCommitment,
        KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
        KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
        KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
        KeyUsage::KeyCertSign => KeyUsagePurpose::KeyCertSign,
        KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
        KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
    }
}

fn extended_key_usage(usage: ExtendedKeyUsage) -> ExtendedKeyUsagePurpose {
    match usage {
        ExtendedKeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsage::CodeSigning => ExtendedKeyUsagePurpose::CodeSigning,
        ExtendedKeyUsage::EmailProtection => ExtendedKeyUsagePurpose::EmailProtection,
        ExtendedKeyUsage::TimeStamping => ExtendedKeyUsagePurpose::TimeStamping,
        ExtendedKeyUsage::OcspSigning => ExtendedKeyUsagePurpose::OcspSigning,
    }
}

fn build_params(
    params: &CertificateParameters,
    default_duration_days: u32,
) -> Result<CertificateParams, CertificateError> {
    let mut cert = CertificateParams::new(Vec::<String>::new()).map_err(generation_err)?;
    cert.distinguished_name = distinguished_name(&params.subject);
    cert.subject_alt_names = params
        .alternative_names
        .iter()
        .map(|name| san(name))
        .collect::<Result<_, _>>()?;
    cert.is_ca = if params.is_ca {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::NoCa
    };
    cert.key_usages = params.key_usage.iter().copied().map(key_usage).collect();
    cert.extended_key_usages = params
        .extended_key_usage
        .iter()
        .copied()
        .map(extended_key_usage)
        .collect();

    let days = params.effective_duration(default_duration_days);
    let now = time::OffsetDateTime::now_utc();
    cert.not_before = now;
    cert.not_after = now + time::Duration::days(i64::from(days));
    let mut serial = Uuid::new_v4().as_bytes().to_vec();
    // positive INTEGER
    serial[0] &= 0x7f;
    cert.serial_number = Some(SerialNumber::from(serial));
    Ok(cert)
}

impl CertificateGenerator for RcgenGenerator {
    fn generate(
        &self,
        params: &CertificateParameters,
        signer: Option<&SigningAuthority<'_>>,
        default_duration_days: u32,
    ) -> Result<GeneratedCertificate, CertificateError> {
        let key = key_pair_for(params.key_length)?;
        let mut cert_params = build_params(params, default_duration_days)?;

        if params.self_sign {
            let cert = cert_params.self_signed(&key).map_err(generation_err)?;
            let pem = cert.pem();
            return Ok(GeneratedCertificate {
                ca: pem.clone(),
                certificate: pem,
                private_key: key.serialize_pem(),
            });
        }

        let signer = signer.ok_or_else(|| {
            generation_err("a CA-signed certificate needs signing material")
        })?;
        let issuer_key = KeyPair::from_pem(signer.private_key).map_err(|e| {
            CertificateError::PrivateKey {
                reason: e.to_string(),
            }
        })?;
        let issuer = CertificateParams::from_ca_cert_pem(signer.certificate)
            .map_err(|e| CertificateError::Parse {
                reason: e.to_string(),
            })?
            .self_signed(&issuer_key)
            .map_err(generation_err)?;

        cert_params.use_authority_key_identifier_extension = true;
        let cert = cert_params
            .signed_by(&key, &issuer, &issuer_key)
            .map_err(generation_err)?;

        Ok(GeneratedCertificate {
            certificate: cert.pem(),
            private_key: key.serialize_pem(),
            ca: signer.certificate.to_owned(),
        })
    }

    fn private_key_matches(
        &self,
        certificate: &str,
        private_key: &str,
    ) -> Result<bool, CertificateError> {
        let key = KeyPair::from_pem(private_key).map_err(|e| CertificateError::PrivateKey {
            reason: e.to_string(),
        })?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(certificate.as_bytes()).map_err(|e| {
            CertificateError::Parse {
                reason: e.to_string(),
            }
        })?;
        let cert = pem.parse_x509().map_err(|e| CertificateError::Parse {
            reason: e.to_string(),
        })?;
        Ok(cert.public_key().subject_public_key.data.as_ref() == key.public_key_raw())
    }
}

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!\"#$%&'()*,-./:;<=>?@[\\]^_`{|}~";

/// Shortest password the generator produces.
pub const MIN_PASSWORD_LENGTH: usize = 4;
/// Longest password the generator produces.
pub const MAX_PASSWORD_LENGTH: usize = 200;

/// Generate a password shaped by `params`. Every enabled character class
/// appears at least once.
///
/// # Errors
///
/// Returns a reason string when every class is excluded or the length is
/// outside the supported range.
pub fn generate_password(params: &PasswordParameters) -> Result<String, String> {
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&params.length) {
        return Err(format!(
            "password length must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH}"
        ));
    }
    let classes: Vec<&[u8]> = [
        (!params.exclude_upper, UPPER),
        (!params.exclude_lower, LOWER),
        (!params.exclude_number, DIGITS),
        (params.include_special, SPECIAL),
    ]
    .into_iter()
    .filter_map(|(enabled, class)| enabled.then_some(class))
    .collect();
    if classes.is_empty() {
        return Err("a password needs at least one character class".to_owned());
    }

    let mut rng = OsRng;
    let alphabet: Vec<u8> = classes.concat();
    let mut chars: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(&mut rng).copied())
        .collect();
    while chars.len() < params.length {
        chars.push(alphabet[rng.gen_range(0..alphabet.len())]);
    }
    chars.shuffle(&mut rng);
    Ok(chars.into_iter().map(char::from).collect())
}

/// A random lowercase username of 20 characters.
#[must_use]
pub fn generate_username() -> String {
    let mut rng = OsRng;
    (0..20)
        .map(|_| char::from(LOWER[rng.gen_range(0..LOWER.len())]))
        .collect()
}
