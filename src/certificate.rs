// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! X.509 certificate helpers used to label and vet certificates.
//!
//! - Common name extraction from a parsed certificate or a string DN
//! - Distinguished name formatting and comparison
//! - Temporal validity checks and expiry status for display
//! - Key usage summaries

use crate::error::KeystoreError;
use crate::keystore::KeystoreManager;
use const_oid::db::rfc4519::{C, CN, L, O, OU, ST};
use const_oid::db::rfc5280::ID_CE_KEY_USAGE;
use der::{Decode, Tag, Tagged};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use x509_cert::ext::pkix::KeyUsage;
use x509_cert::name::Name;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// Issuer of the Spanish national ID card (DNIe) authentication certificates.
pub const DNIE_ISSUER: &str = "CN=AC DNIE 001, OU=DNIE, O=DIRECCION GENERAL DE LA POLICIA, C=ES";

/// Default window before expiry in which a certificate is flagged.
pub const DEFAULT_EXPIRY_WARNING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Why a certificate is outside its validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidityError {
    /// `notBefore` is still in the future.
    #[error("certificate is not yet valid")]
    NotYetValid,
    /// `notAfter` has passed.
    #[error("certificate has expired")]
    Expired,
}

/// Convert an X.509 time to [`SystemTime`].
pub fn to_system_time(time: &Time) -> SystemTime {
    let since_epoch = match time {
        Time::UtcTime(utc) => utc.to_unix_duration(),
        Time::GeneralTime(general) => general.to_unix_duration(),
    };
    SystemTime::UNIX_EPOCH + since_epoch
}

/// `notBefore` of `cert`.
pub fn not_before(cert: &Certificate) -> SystemTime {
    to_system_time(&cert.tbs_certificate.validity.not_before)
}

/// `notAfter` of `cert`.
pub fn not_after(cert: &Certificate) -> SystemTime {
    to_system_time(&cert.tbs_certificate.validity.not_after)
}

/// Check that `now` falls inside the validity window of `cert`.
pub fn check_validity(cert: &Certificate, now: SystemTime) -> Result<(), ValidityError> {
    if now < not_before(cert) {
        return Err(ValidityError::NotYetValid);
    }
    if now > not_after(cert) {
        return Err(ValidityError::Expired);
    }
    Ok(())
}

/// Expiry state of a certificate, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    /// Expired or not yet valid.
    Invalid,
    /// Valid, but expires within the warning window.
    ExpiringSoon,
    /// Valid.
    Valid,
}

impl ExpiryStatus {
    /// Classify `cert` at `now` with the given warning window.
    pub fn of(cert: &Certificate, now: SystemTime, warning: Duration) -> Self {
        let not_after = not_after(cert);
        if now >= not_after || now <= not_before(cert) {
            return Self::Invalid;
        }
        match not_after.duration_since(now) {
            Ok(remaining) if remaining < warning => Self::ExpiringSoon,
            _ => Self::Valid,
        }
    }
}

impl fmt::Display for ExpiryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::ExpiringSoon => write!(f, "expiring soon"),
            Self::Valid => write!(f, "valid"),
        }
    }
}

/// Decode a directory string attribute value.
fn attribute_text(value: &der::Any) -> Option<String> {
    match value.tag() {
        Tag::BmpString => {
            let bytes = value.value();
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
        _ => std::str::from_utf8(value.value()).ok().map(str::to_string),
    }
}

/// Short name of a DN attribute type, if it is one we display.
fn attribute_name(oid: &der::asn1::ObjectIdentifier) -> Option<&'static str> {
    [(CN, "CN"), (OU, "OU"), (O, "O"), (L, "L"), (ST, "ST"), (C, "C")]
        .iter()
        .find(|(known, _)| known == oid)
        .map(|(_, name)| *name)
}

/// First value of the attribute `oid` in `name`.
fn first_attribute(name: &Name, oid: der::asn1::ObjectIdentifier) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|atv| atv.oid == oid)
        .find_map(|atv| attribute_text(&atv.value))
}

/// (type, value) pairs of `name`, most specific first.
fn dn_attributes(name: &Name) -> Vec<(String, String)> {
    let mut attrs: Vec<_> = name
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter_map(|atv| {
            let key = attribute_name(&atv.oid)
                .map(str::to_string)
                .unwrap_or_else(|| atv.oid.to_string());
            attribute_text(&atv.value).map(|v| (key, v))
        })
        .collect();
    attrs.reverse();
    attrs
}

/// Format a distinguished name as `CN=..., O=..., C=...`.
pub fn format_dn(name: &Name) -> String {
    dn_attributes(name)
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Subject common name of `cert`.
pub fn common_name(cert: &Certificate) -> Option<String> {
    first_attribute(&cert.tbs_certificate.subject, CN).filter(|cn| !cn.trim().is_empty())
}

/// Issuer common name of `cert`.
pub fn issuer_common_name(cert: &Certificate) -> Option<String> {
    first_attribute(&cert.tbs_certificate.issuer, CN).filter(|cn| !cn.trim().is_empty())
}

/// Split a string DN into (type, value) pairs.
///
/// Accepts `,`, `;` and `+` separators, double-quoted values and
/// backslash escapes. Returns `None` if any component lacks a `=`.
pub fn parse_dn(dn: &str) -> Option<Vec<(String, String)>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = dn.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push('\\');
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' | ';' | '+' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    parts.push(current);

    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unescape_value(value.trim())))
        })
        .collect()
}

fn unescape_value(value: &str) -> String {
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Common name in a string DN such as `CN=Jane Doe, O=Example, C=US`.
///
/// Returns `None` when the value does not parse as a DN or has no non-empty
/// `CN` component.
pub fn common_name_from_dn(dn: &str) -> Option<String> {
    parse_dn(dn)?
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("cn") || k == "2.5.4.3")
        .map(|(_, v)| v)
        .filter(|v| !v.trim().is_empty())
}

/// Compare a parsed name with a string DN, ignoring attribute order and case.
pub fn dn_matches(name: &Name, dn: &str) -> bool {
    let Some(expected) = parse_dn(dn) else {
        return false;
    };
    let normalize = |pairs: Vec<(String, String)>| {
        let mut v: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v.trim().to_uppercase()))
            .collect();
        v.sort();
        v
    };
    normalize(dn_attributes(name)) == normalize(expected)
}

/// Returns true if any certificate in `keystore` was issued by `issuer_dn`.
///
/// Aliases whose certificate cannot be read are ignored; a failure to list
/// aliases is returned.
pub fn contains_issuer<K>(keystore: &K, issuer_dn: &str) -> Result<bool, KeystoreError>
where
    K: KeystoreManager + ?Sized,
{
    for alias in keystore.aliases()? {
        if let Ok(Some(cert)) = keystore.certificate(&alias) {
            if dn_matches(&cert.tbs_certificate.issuer, issuer_dn) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Format an X.509 time as `dd/mm/yyyy`.
pub fn format_date(time: &Time) -> String {
    let dt = time.to_date_time();
    format!("{:02}/{:02}/{:04}", dt.day(), dt.month(), dt.year())
}

/// Key usage extension of `cert`, if present and well-formed.
pub fn key_usage(cert: &Certificate) -> Option<KeyUsage> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == ID_CE_KEY_USAGE)
        .and_then(|ext| KeyUsage::from_der(ext.extn_value.as_bytes()).ok())
}

/// Human-readable key usage summary, e.g. `digital signature, key encipherment`.
pub fn key_usage_summary(cert: &Certificate) -> String {
    let Some(usage) = key_usage(cert) else {
        return "unrestricted".to_string();
    };
    let mut names = Vec::new();
    if usage.digital_signature() {
        names.push("digital signature");
    }
    if usage.non_repudiation() {
        names.push("non-repudiation");
    }
    if usage.key_encipherment() {
        names.push("key encipherment");
    }
    if usage.data_encipherment() {
        names.push("data encipherment");
    }
    if usage.key_agreement() {
        names.push("key agreement");
    }
    if usage.key_cert_sign() {
        names.push("certificate signing");
    }
    if usage.crl_sign() {
        names.push("CRL signing");
    }
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_name_from_dn() {
        assert_eq!(
            common_name_from_dn("CN=Jane Doe, O=Example, C=US").as_deref(),
            Some("Jane Doe")
        );
        assert_eq!(
            common_name_from_dn("o=Example, cn=lower case").as_deref(),
            Some("lower case")
        );
        assert_eq!(
            common_name_from_dn(r#"CN="Doe, Jane", O=Example"#).as_deref(),
            Some("Doe, Jane")
        );
        assert_eq!(
            common_name_from_dn(r"CN=Doe\, Jane, O=Example").as_deref(),
            Some("Doe, Jane")
        );
    }

    #[test]
    fn test_common_name_from_dn_missing() {
        assert_eq!(common_name_from_dn("O=Example, C=US"), None);
        assert_eq!(common_name_from_dn("just an alias"), None);
        assert_eq!(common_name_from_dn("CN=  , O=Example"), None);
        assert_eq!(common_name_from_dn(r#"CN="unterminated"#), None);
    }

    #[test]
    fn test_parse_dn_multi_valued_rdn() {
        let parts = parse_dn("CN=A+SERIALNUMBER=123, C=ES").unwrap();
        assert_eq!(
            parts,
            vec![
                ("CN".to_string(), "A".to_string()),
                ("SERIALNUMBER".to_string(), "123".to_string()),
                ("C".to_string(), "ES".to_string()),
            ]
        );
    }

    #[test]
    fn test_expiry_status_display() {
        assert_eq!(ExpiryStatus::Invalid.to_string(), "invalid");
        assert_eq!(ExpiryStatus::ExpiringSoon.to_string(), "expiring soon");
        assert_eq!(ExpiryStatus::Valid.to_string(), "valid");
    }
}
