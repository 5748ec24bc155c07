// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Certificate filters.
//!
//! A filter looks at the candidate aliases that survived validity and
//! usability checks and returns the ones it accepts. When several filters are
//! supplied to the resolver, an alias survives if ANY of them accepts it.

use crate::certificate::{common_name, issuer_common_name, key_usage};
use crate::keystore::KeystoreManager;
use std::fmt;

/// Named predicate over a set of keystore aliases.
pub trait CertificateFilter {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Subset of `aliases` accepted by this filter.
    fn matches(&self, aliases: &[String], keystore: &dyn KeystoreManager) -> Vec<String>;
}

impl fmt::Debug for dyn CertificateFilter + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateFilter({})", self.name())
    }
}

/// Keep aliases whose certificate satisfies a per-certificate test.
fn retain_by_certificate<F>(
    aliases: &[String],
    keystore: &dyn KeystoreManager,
    mut accept: F,
) -> Vec<String>
where
    F: FnMut(&x509_cert::Certificate) -> bool,
{
    aliases
        .iter()
        .filter(|alias| match keystore.certificate(alias) {
            Ok(Some(cert)) => accept(&cert),
            _ => false,
        })
        .cloned()
        .collect()
}

/// Accepts certificates whose subject CN contains a fragment (case-insensitive).
#[derive(Debug, Clone)]
pub struct SubjectCnFilter {
    fragment: String,
}

impl SubjectCnFilter {
    /// Create a filter matching `fragment` in the subject CN.
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into().to_lowercase(),
        }
    }
}

impl CertificateFilter for SubjectCnFilter {
    fn name(&self) -> &str {
        "subject-cn"
    }

    fn matches(&self, aliases: &[String], keystore: &dyn KeystoreManager) -> Vec<String> {
        retain_by_certificate(aliases, keystore, |cert| {
            common_name(cert)
                .map(|cn| cn.to_lowercase().contains(&self.fragment))
                .unwrap_or(false)
        })
    }
}

/// Accepts certificates whose issuer CN equals a value (case-insensitive).
#[derive(Debug, Clone)]
pub struct IssuerCnFilter {
    issuer_cn: String,
}

impl IssuerCnFilter {
    /// Create a filter matching the issuer CN exactly.
    pub fn new(issuer_cn: impl Into<String>) -> Self {
        Self {
            issuer_cn: issuer_cn.into(),
        }
    }
}

impl CertificateFilter for IssuerCnFilter {
    fn name(&self) -> &str {
        "issuer-cn"
    }

    fn matches(&self, aliases: &[String], keystore: &dyn KeystoreManager) -> Vec<String> {
        retain_by_certificate(aliases, keystore, |cert| {
            issuer_common_name(cert)
                .map(|cn| cn.trim().eq_ignore_ascii_case(self.issuer_cn.trim()))
                .unwrap_or(false)
        })
    }
}

/// Key usage a [`KeyUsageFilter`] looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredUsage {
    /// Authentication signatures (`digitalSignature`).
    Authentication,
    /// Document signatures (`nonRepudiation` / `contentCommitment`).
    Signing,
}

/// Accepts certificates whose key usage allows the requested purpose.
///
/// Certificates without a key usage extension are unrestricted and accepted.
#[derive(Debug, Clone, Copy)]
pub struct KeyUsageFilter {
    usage: RequiredUsage,
}

impl KeyUsageFilter {
    /// Create a key usage filter.
    pub fn new(usage: RequiredUsage) -> Self {
        Self { usage }
    }
}

impl CertificateFilter for KeyUsageFilter {
    fn name(&self) -> &str {
        match self.usage {
            RequiredUsage::Authentication => "key-usage-authentication",
            RequiredUsage::Signing => "key-usage-signing",
        }
    }

    fn matches(&self, aliases: &[String], keystore: &dyn KeystoreManager) -> Vec<String> {
        retain_by_certificate(aliases, keystore, |cert| match key_usage(cert) {
            None => true,
            Some(ku) => match self.usage {
                RequiredUsage::Authentication => ku.digital_signature(),
                RequiredUsage::Signing => ku.non_repudiation(),
            },
        })
    }
}

/// Filter built from a closure.
pub struct FnFilter<F> {
    name: String,
    predicate: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&[String], &dyn KeystoreManager) -> Vec<String>,
{
    /// Create a named filter from `predicate`.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> CertificateFilter for FnFilter<F>
where
    F: Fn(&[String], &dyn KeystoreManager) -> Vec<String>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, aliases: &[String], keystore: &dyn KeystoreManager) -> Vec<String> {
        (self.predicate)(aliases, keystore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{MemoryEntry, MemoryKeystore};

    #[test]
    fn test_fn_filter() {
        let store = MemoryKeystore::new()
            .with_entry(MemoryEntry::without_certificate("keep-me"))
            .with_entry(MemoryEntry::without_certificate("drop-me"));
        let filter = FnFilter::new("prefix", |aliases: &[String], _: &dyn KeystoreManager| {
            aliases
                .iter()
                .filter(|a| a.starts_with("keep"))
                .cloned()
                .collect()
        });
        let aliases = vec!["keep-me".to_string(), "drop-me".to_string()];
        assert_eq!(filter.name(), "prefix");
        assert_eq!(filter.matches(&aliases, &store), vec!["keep-me".to_string()]);
    }

    #[test]
    fn test_certificate_filters_skip_unreadable_entries() {
        let store = MemoryKeystore::new().with_entry(MemoryEntry::without_certificate("x"));
        let aliases = vec!["x".to_string()];
        assert!(SubjectCnFilter::new("x").matches(&aliases, &store).is_empty());
        assert!(IssuerCnFilter::new("x").matches(&aliases, &store).is_empty());
        assert!(KeyUsageFilter::new(RequiredUsage::Signing)
            .matches(&aliases, &store)
            .is_empty());
    }

    #[test]
    fn test_key_usage_filter_names() {
        assert_eq!(
            KeyUsageFilter::new(RequiredUsage::Authentication).name(),
            "key-usage-authentication"
        );
        assert_eq!(
            KeyUsageFilter::new(RequiredUsage::Signing).name(),
            "key-usage-signing"
        );
    }
}
