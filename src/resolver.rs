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

//! Alias resolution: from raw keystore aliases to friendly display names.
//!
//! # Pipeline
//!
//! With a keystore, each alias goes through these checks in order, one alias
//! at a time:
//!
//! 1. Fetch the certificate. Authentication, lock and cancellation failures
//!    abort the whole resolution; any other failure drops the alias.
//! 2. Drop the alias if the store exposes no certificate for it.
//! 3. Unless expired certificates are shown, drop certificates outside their
//!    validity window.
//! 4. When private keys are required, probe the private key entry with an
//!    empty credential. `Unsupported` (or no entry at all) drops the alias.
//!    Any other failure, such as a rejected PIN, proves a key is there and
//!    the alias is kept.
//!
//! Filters then run over the surviving aliases. Their results are combined
//! by union and replace the candidate set. Finally each alias is labelled
//! with its subject common name, or its trimmed alias.
//!
//! Without a keystore the values are labelled only: long values are reduced
//! to their CN or truncated, short ones trimmed.

use crate::certificate::{check_validity, common_name, common_name_from_dn};
use crate::error::KeystoreError;
use crate::filter::CertificateFilter;
use crate::keystore::{Credential, KeystoreManager};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Longest friendly name shown without truncation.
pub const ALIAS_MAX_LENGTH: usize = 120;

/// Marker appended to truncated names.
pub const ELLIPSIS: &str = "...";

/// Alias to friendly name mapping, in insertion order.
///
/// Inserting an existing alias replaces its name in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendlyNames {
    entries: Vec<(String, String)>,
}

impl FriendlyNames {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the name for `alias`.
    pub fn insert(&mut self, alias: impl Into<String>, name: impl Into<String>) {
        let alias = alias.into();
        let name = name.into();
        match self.entries.iter_mut().find(|(a, _)| *a == alias) {
            Some(entry) => entry.1 = name,
            None => self.entries.push((alias, name)),
        }
    }

    /// Friendly name of `alias`.
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, n)| n.as_str())
    }

    /// Returns true if `alias` is present.
    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_some()
    }

    /// Number of aliases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no alias survived.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aliases in insertion order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(a, _)| a.as_str())
    }

    /// (alias, name) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, n)| (a.as_str(), n.as_str()))
    }
}

impl IntoIterator for FriendlyNames {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Truncate `value` to [`ALIAS_MAX_LENGTH`] characters, ending in [`ELLIPSIS`].
pub fn truncate_with_ellipsis(value: &str) -> String {
    if value.chars().count() <= ALIAS_MAX_LENGTH {
        return value.to_string();
    }
    let keep = ALIAS_MAX_LENGTH - ELLIPSIS.len();
    let mut out: String = value.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Friendly name of a value that is not backed by a certificate.
///
/// Values longer than [`ALIAS_MAX_LENGTH`] are usually full X.500 principals:
/// show their CN, or a truncated form if they have none.
pub fn plain_friendly_name(value: &str) -> String {
    if value.chars().count() > ALIAS_MAX_LENGTH {
        common_name_from_dn(value).unwrap_or_else(|| truncate_with_ellipsis(value))
    } else {
        trimmed_or_raw(value)
    }
}

/// Friendly name of a certificate-backed alias: subject CN, else the trimmed alias.
///
/// Some card stores append `\r` to their aliases, hence the trim.
pub fn certificate_friendly_name(alias: &str, cert: Option<&x509_cert::Certificate>) -> String {
    cert.and_then(common_name)
        .unwrap_or_else(|| trimmed_or_raw(alias))
}

/// Trimmed value, or the value as given when it is only whitespace.
fn trimmed_or_raw(value: &str) -> String {
    match value.trim() {
        "" => truncate_with_ellipsis(value),
        trimmed => trimmed.to_string(),
    }
}

/// Options for [`AliasResolver::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveOptions {
    /// Drop aliases without a usable private key.
    pub check_private_keys: bool,
    /// Keep certificates outside their validity window.
    pub show_expired: bool,
}

/// Derives friendly names for keystore aliases and filters out unusable ones.
///
/// The resolver holds no state between calls; every call re-reads the store.
pub struct AliasResolver<'a> {
    keystore: Option<&'a dyn KeystoreManager>,
    filters: &'a [Box<dyn CertificateFilter + 'a>],
    options: ResolveOptions,
    now: Option<SystemTime>,
}

impl<'a> AliasResolver<'a> {
    /// Create a resolver over `keystore` (or over plain values when `None`).
    pub fn new(keystore: Option<&'a dyn KeystoreManager>) -> Self {
        Self {
            keystore,
            filters: &[],
            options: ResolveOptions::default(),
            now: None,
        }
    }

    /// Set resolution options.
    pub fn options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Drop aliases without a usable private key.
    pub fn check_private_keys(mut self, check: bool) -> Self {
        self.options.check_private_keys = check;
        self
    }

    /// Keep certificates outside their validity window.
    pub fn show_expired(mut self, show: bool) -> Self {
        self.options.show_expired = show;
        self
    }

    /// Filters combined by union. An empty slice means no filtering.
    pub fn filters(mut self, filters: &'a [Box<dyn CertificateFilter + 'a>]) -> Self {
        self.filters = filters;
        self
    }

    /// Evaluate validity at a fixed instant instead of the system clock.
    pub fn at(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    /// Resolve `aliases` to friendly names.
    ///
    /// # Errors
    ///
    /// Only keystore failures for which
    /// [`KeystoreError::aborts_resolution`] holds are returned; everything
    /// else drops the offending alias.
    pub fn resolve(&self, aliases: &[String]) -> Result<FriendlyNames, KeystoreError> {
        match self.keystore {
            None => Ok(Self::resolve_plain(aliases)),
            Some(keystore) => self.resolve_with_keystore(aliases, keystore),
        }
    }

    fn resolve_plain(values: &[String]) -> FriendlyNames {
        let mut names = FriendlyNames::new();
        for value in values {
            names.insert(value.clone(), plain_friendly_name(value));
        }
        names
    }

    fn resolve_with_keystore(
        &self,
        aliases: &[String],
        keystore: &dyn KeystoreManager,
    ) -> Result<FriendlyNames, KeystoreError> {
        let now = self.now.unwrap_or_else(SystemTime::now);

        let mut candidates: Vec<String> = Vec::with_capacity(aliases.len());
        let mut certificates: Vec<x509_cert::Certificate> = Vec::with_capacity(aliases.len());
        for alias in aliases {
            if candidates.contains(alias) {
                continue;
            }
            if let Some(cert) = self.usable_certificate(alias, keystore, now)? {
                candidates.push(alias.clone());
                certificates.push(cert);
            }
        }

        let accepted = if self.filters.is_empty() {
            candidates.clone()
        } else {
            self.apply_filters(&candidates, keystore)
        };

        let mut names = FriendlyNames::new();
        for (alias, cert) in candidates.into_iter().zip(certificates) {
            if accepted.contains(&alias) {
                let name = certificate_friendly_name(&alias, Some(&cert));
                names.insert(alias, name);
            }
        }
        debug!("Resolved {} of {} aliases", names.len(), aliases.len());
        Ok(names)
    }

    /// Validity and usability checks for one alias. Returns the certificate
    /// when the alias is kept.
    fn usable_certificate(
        &self,
        alias: &str,
        keystore: &dyn KeystoreManager,
        now: SystemTime,
    ) -> Result<Option<x509_cert::Certificate>, KeystoreError> {
        let cert = match keystore.certificate(alias) {
            Ok(cert) => cert,
            Err(e) if e.aborts_resolution() => {
                warn!("Keystore unusable while reading '{}': {}", alias, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Could not read certificate for alias '{}': {}", alias, e);
                return Ok(None);
            }
        };

        let Some(cert) = cert else {
            warn!("Keystore does not expose a certificate for alias '{}'", alias);
            return Ok(None);
        };

        if !self.options.show_expired {
            if let Err(e) = check_validity(&cert, now) {
                info!("Hiding certificate '{}': {}", alias, e);
                return Ok(None);
            }
        }

        if self.options.check_private_keys {
            match keystore.private_key_entry(alias, &Credential::empty()) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("Hiding certificate '{}': no private key entry", alias);
                    return Ok(None);
                }
                Err(KeystoreError::Unsupported) => {
                    info!(
                        "Hiding certificate '{}': private key operations not supported",
                        alias
                    );
                    return Ok(None);
                }
                Err(e) => {
                    // A refused unlock still means a private key is there.
                    debug!("Private key probe for '{}' failed, keeping it: {}", alias, e);
                }
            }
        }

        Ok(Some(cert))
    }

    /// Union of every filter's output, restricted to `candidates`, in
    /// candidate order.
    fn apply_filters(&self, candidates: &[String], keystore: &dyn KeystoreManager) -> Vec<String> {
        let mut accepted: Vec<&String> = Vec::new();
        for filter in self.filters {
            let matched = filter.matches(candidates, keystore);
            debug!("Filter '{}' accepted {} aliases", filter.name(), matched.len());
            for alias in matched {
                if let Some(candidate) = candidates.iter().find(|c| **c == alias) {
                    if !accepted.contains(&candidate) {
                        accepted.push(candidate);
                    }
                }
            }
        }
        candidates
            .iter()
            .filter(|c| accepted.contains(c))
            .cloned()
            .collect()
    }
}

/// Resolve `aliases` against an optional keystore in one call.
pub fn resolve_aliases(
    aliases: &[String],
    keystore: Option<&dyn KeystoreManager>,
    check_private_keys: bool,
    show_expired: bool,
    filters: &[Box<dyn CertificateFilter + '_>],
) -> Result<FriendlyNames, KeystoreError> {
    AliasResolver::new(keystore)
        .check_private_keys(check_private_keys)
        .show_expired(show_expired)
        .filters(filters)
        .resolve(aliases)
}
