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

//! Software keystore held in memory.
//!
//! Entries are kept in insertion order. Each entry may carry a certificate
//! and, optionally, a private key protected by a PIN. Entries can also be
//! scripted to fail, which is how token behaviour (locked cards, rejected
//! PINs) is reproduced without hardware.

use super::{Credential, KeystoreManager, PrivateKeyEntry};
use crate::error::{KeystoreError, Result, SelectorError};
use der::{Decode, DecodePem};
use std::cell::Cell;
use std::path::Path;
use tracing::debug;
use x509_cert::Certificate;

/// Private key state of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyState {
    /// Trusted certificate only.
    None,
    /// Private key present, unlocked by the given PIN (empty for none).
    Present(Credential),
    /// Private key present but the token answers every attempt with an error.
    Failing(KeystoreError),
}

/// One entry of a [`MemoryKeystore`].
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    alias: String,
    certificate: Option<Certificate>,
    certificate_error: Option<KeystoreError>,
    key: KeyState,
}

impl MemoryEntry {
    /// Entry with a certificate and no private key.
    pub fn trusted(alias: impl Into<String>, certificate: Certificate) -> Self {
        Self {
            alias: alias.into(),
            certificate: Some(certificate),
            certificate_error: None,
            key: KeyState::None,
        }
    }

    /// Entry with a certificate and a private key unlocked by `pin`.
    pub fn with_private_key(
        alias: impl Into<String>,
        certificate: Certificate,
        pin: impl Into<String>,
    ) -> Self {
        Self {
            key: KeyState::Present(Credential::from(pin.into())),
            ..Self::trusted(alias, certificate)
        }
    }

    /// Entry whose certificate cannot be extracted.
    pub fn without_certificate(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            certificate: None,
            certificate_error: None,
            key: KeyState::None,
        }
    }

    /// Make certificate retrieval fail with `error`.
    pub fn failing_certificate(mut self, error: KeystoreError) -> Self {
        self.certificate_error = Some(error);
        self
    }

    /// Make private key retrieval fail with `error`.
    pub fn failing_private_key(mut self, error: KeystoreError) -> Self {
        self.key = KeyState::Failing(error);
        self
    }

    /// Alias of this entry.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// In-memory keystore.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    entries: Vec<MemoryEntry>,
    certificate_calls: Cell<usize>,
    private_key_calls: Cell<usize>,
}

impl MemoryKeystore {
    /// Create an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any entry with the same alias.
    pub fn insert(&mut self, entry: MemoryEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.alias == entry.alias) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Builder-style [`MemoryKeystore::insert`].
    pub fn with_entry(mut self, entry: MemoryEntry) -> Self {
        self.insert(entry);
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of certificate lookups served so far.
    pub fn certificate_calls(&self) -> usize {
        self.certificate_calls.get()
    }

    /// Number of private key attempts served so far.
    pub fn private_key_calls(&self) -> usize {
        self.private_key_calls.get()
    }

    /// Load every certificate from a PEM or DER file.
    ///
    /// Aliases are the file stem, suffixed with `#n` for the n-th certificate
    /// after the first. When a sibling file with the `key` extension exists,
    /// the first certificate is marked as having a private key with an empty
    /// PIN.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let certificates = if bytes.starts_with(b"-----BEGIN") {
            Certificate::load_pem_chain(&bytes)?
        } else {
            vec![Certificate::from_der(&bytes)?]
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| SelectorError::config(format!("no file name in {}", path.display())))?;
        let has_key = path.with_extension("key").is_file();

        let count = certificates.len();
        for (i, certificate) in certificates.into_iter().enumerate() {
            let alias = if i == 0 {
                stem.clone()
            } else {
                format!("{stem}#{i}")
            };
            let entry = if i == 0 && has_key {
                MemoryEntry::with_private_key(alias, certificate, "")
            } else {
                MemoryEntry::trusted(alias, certificate)
            };
            self.insert(entry);
        }
        debug!("Loaded {} certificate(s) from {}", count, path.display());
        Ok(count)
    }

    /// Load every `.pem`, `.crt`, `.cer` and `.der` file in `dir`, in file
    /// name order.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "pem" | "crt" | "cer" | "der"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut total = 0;
        for path in paths {
            total += self.load_file(&path)?;
        }
        Ok(total)
    }

    /// Parse a single PEM certificate.
    pub fn parse_pem(pem: &str) -> Result<Certificate> {
        Ok(Certificate::from_pem(pem.as_bytes())?)
    }

    fn entry(&self, alias: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

impl KeystoreManager for MemoryKeystore {
    fn aliases(&self) -> std::result::Result<Vec<String>, KeystoreError> {
        Ok(self.entries.iter().map(|e| e.alias.clone()).collect())
    }

    fn certificate(&self, alias: &str) -> std::result::Result<Option<Certificate>, KeystoreError> {
        self.certificate_calls.set(self.certificate_calls.get() + 1);
        let entry = self
            .entry(alias)
            .ok_or_else(|| KeystoreError::other(format!("no entry for alias '{alias}'")))?;
        if let Some(err) = &entry.certificate_error {
            return Err(err.clone());
        }
        Ok(entry.certificate.clone())
    }

    fn private_key_entry(
        &self,
        alias: &str,
        credential: &Credential,
    ) -> std::result::Result<Option<PrivateKeyEntry>, KeystoreError> {
        self.private_key_calls.set(self.private_key_calls.get() + 1);
        let entry = self
            .entry(alias)
            .ok_or_else(|| KeystoreError::other(format!("no entry for alias '{alias}'")))?;
        match &entry.key {
            KeyState::None => Err(KeystoreError::Unsupported),
            KeyState::Failing(err) => Err(err.clone()),
            KeyState::Present(pin) if pin == credential => {
                Ok(Some(PrivateKeyEntry::new(alias, alias.as_bytes().to_vec())))
            }
            KeyState::Present(_) => Err(KeystoreError::AuthFailure),
        }
    }
}
