//! X.509 certificate reading.
//!
//! [`CertificateReader`] turns PEM into the attributes regeneration needs
//! (subject, alternative names, usages, key length, validity, CA and
//! self-signed flags) and checks signer relationships. [`X509Reader`] is the
//! `x509-parser` implementation. Only the first certificate of a PEM bundle
//! is considered.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::{Pem, parse_x509_pem};
use x509_parser::x509::AttributeTypeAndValue;

use crate::error::CertificateError;
use crate::parameters::{ExtendedKeyUsage, KeyUsage, SubjectName};

/// Attributes of a parsed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub subject: SubjectName,
    pub alternative_names: Vec<String>,
    pub key_usage: BTreeSet<KeyUsage>,
    pub extended_key_usage: BTreeSet<ExtendedKeyUsage>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Public key size in bits (curve size for EC keys).
    pub key_length: u32,
    pub is_ca: bool,
    pub is_self_signed: bool,
}

impl ParsedCertificate {
    /// Validity period in whole days, at least 1.
    #[must_use]
    pub fn duration_days(&self) -> u32 {
        let days = (self.not_after - self.not_before).num_days();
        u32::try_from(days).unwrap_or(u32::MAX).max(1)
    }
}

/// Parses certificates and checks signatures.
pub trait CertificateReader: Send + Sync {
    /// Parse the first certificate in `pem`.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Parse`] on malformed PEM or DER.
    fn parse(&self, pem: &str) -> Result<ParsedCertificate, CertificateError>;

    /// Whether `certificate` was issued by `ca`: issuer name matches the
    /// CA's subject and the signature verifies with the CA's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Parse`] if either PEM is malformed.
    fn is_signed_by_ca(&self, certificate: &str, ca: &str) -> Result<bool, CertificateError>;
}

/// [`CertificateReader`] backed by `x509-parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X509Reader;

fn parse_err(e: impl std::fmt::Display) -> CertificateError {
    CertificateError::Parse {
        reason: e.to_string(),
    }
}

fn decode_pem(pem: &str) -> Result<Pem, CertificateError> {
    let (_, pem) = parse_x509_pem(pem.as_bytes()).map_err(parse_err)?;
    if pem.label != "CERTIFICATE" {
        return Err(parse_err(format!("expected a CERTIFICATE block, found '{}'", pem.label)));
    }
    Ok(pem)
}

fn first_value<'a, 'b>(mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> Option<String>
where
    'b: 'a,
{
    attrs.find_map(|attr| attr.as_str().ok()).map(str::to_owned)
}

fn subject_of(cert: &X509Certificate<'_>) -> SubjectName {
    let subject = cert.subject();
    SubjectName {
        common_name: first_value(subject.iter_common_name()),
        organization: first_value(subject.iter_organization()),
        organizational_unit: first_value(subject.iter_organizational_unit()),
        locality: first_value(subject.iter_locality()),
        state: first_value(subject.iter_state_or_province()),
        country: first_value(subject.iter_country()),
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        16 => <[u8; 16]>::try_from(bytes).ok().map(|b| IpAddr::V6(Ipv6Addr::from(b))),
        _ => None,
    }
}

fn alternative_names_of(cert: &X509Certificate<'_>) -> Result<Vec<String>, CertificateError> {
    let Some(san) = cert.subject_alternative_name().map_err(parse_err)? else {
        return Ok(Vec::new());
    };
    let mut names = Vec::new();
    for name in &san.value.general_names {
        match name {
            GeneralName::DNSName(dns) => names.push((*dns).to_owned()),
            GeneralName::RFC822Name(email) => names.push((*email).to_owned()),
            GeneralName::URI(uri) => names.push((*uri).to_owned()),
            GeneralName::IPAddress(bytes) => {
                if let Some(ip) = ip_from_bytes(bytes) {
                    names.push(ip.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

fn key_usage_of(cert: &X509Certificate<'_>) -> Result<BTreeSet<KeyUsage>, CertificateError> {
    let mut usages = BTreeSet::new();
    let Some(ext) = cert.key_usage().map_err(parse_err)? else {
        return Ok(usages);
    };
    let ku = ext.value;
    let flags = [
        (ku.digital_signature(), KeyUsage::DigitalSignature),
        (ku.non_repudiation(), KeyUsage::NonRepudiation),
        (ku.key_encipherment(), KeyUsage::KeyEncipherment),
        (ku.data_encipherment(), KeyUsage::DataEncipherment),
        (ku.key_agreement(), KeyUsage::KeyAgreement),
        (ku.key_cert_sign(), KeyUsage::KeyCertSign),
        (ku.crl_sign(), KeyUsage::CrlSign),
        (ku.encipher_only(), KeyUsage::EncipherOnly),
        (ku.decipher_only(), KeyUsage::DecipherOnly),
    ];
    usages.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, usage)| usage));
    Ok(usages)
}

fn extended_key_usage_of(
    cert: &X509Certificate<'_>,
) -> Result<BTreeSet<ExtendedKeyUsage>, CertificateError> {
    let mut usages = BTreeSet::new();
    let Some(ext) = cert.extended_key_usage().map_err(parse_err)? else {
        return Ok(usages);
    };
    let eku = ext.value;
    let flags = [
        (eku.server_auth, ExtendedKeyUsage::ServerAuth),
        (eku.client_auth, ExtendedKeyUsage::ClientAuth),
        (eku.code_signing, ExtendedKeyUsage::CodeSigning),
        (eku.email_protection, ExtendedKeyUsage::EmailProtection),
        (eku.time_stamping, ExtendedKeyUsage::TimeStamping),
        (eku.ocsp_signing, ExtendedKeyUsage::OcspSigning),
    ];
    usages.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, usage)| usage));
    Ok(usages)
}

fn timestamp(ts: i64, field: &str) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| parse_err(format!("{field} out of range")))
}

impl CertificateReader for X509Reader {
    fn parse(&self, pem: &str) -> Result<ParsedCertificate, CertificateError> {
        let pem = decode_pem(pem)?;
        let cert = pem.parse_x509().map_err(parse_err)?;

        let is_ca = cert
            .basic_constraints()
            .map_err(parse_err)?
            .is_some_and(|bc| bc.value.ca);
        let key_length = cert
            .public_key()
            .parsed()
            .map(|key| u32::try_from(key.key_size()).unwrap_or(0))
            .unwrap_or(0);
        let is_self_signed = cert.subject().as_raw() == cert.issuer().as_raw()
            && cert.verify_signature(None).is_ok();
        let validity = cert.validity();

        Ok(ParsedCertificate {
            subject: subject_of(&cert),
            alternative_names: alternative_names_of(&cert)?,
            key_usage: key_usage_of(&cert)?,
            extended_key_usage: extended_key_usage_of(&cert)?,
            not_before: timestamp(validity.not_before.timestamp(), "notBefore")?,
            not_after: timestamp(validity.not_after.timestamp(), "notAfter")?,
            key_length,
            is_ca,
            is_self_signed,
        })
    }

    fn is_signed_by_ca(&self, certificate: &str, ca: &str) -> Result<bool, CertificateError> {
        let cert_pem = decode_pem(certificate)?;
        let cert = cert_pem.parse_x509().map_err(parse_err)?;
        let ca_pem = decode_pem(ca)?;
        let ca = ca_pem.parse_x509().map_err(parse_err)?;

        Ok(cert.issuer().as_raw() == ca.subject().as_raw()
            && cert.verify_signature(Some(ca.public_key())).is_ok())
    }
}
