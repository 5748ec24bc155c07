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

//! Keystore abstraction consumed by the selection pipeline.
//!
//! A [`KeystoreManager`] is anything that can enumerate aliases, hand out the
//! certificate behind an alias and attempt to open the private key entry.
//! Implementations wrap smart card middleware, PKCS#11 tokens or software
//! stores.
//!
//! # Side Effects
//!
//! Calls on a keystore are not assumed to be free: a token may raise a PIN
//! prompt, block on card I/O or count a failed login towards a lockout. The
//! selection pipeline therefore calls each operation at most once per alias
//! per phase and never retries. Callers must not share one handle between
//! concurrent selections.

mod memory;

pub use memory::{MemoryEntry, MemoryKeystore};

use crate::error::KeystoreError;
use std::fmt;
use x509_cert::Certificate;
use zeroize::Zeroizing;

/// Secret used to unlock a private key entry.
///
/// The buffer is wiped when the credential is dropped.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Create a credential from a PIN or password.
    pub fn new(secret: impl AsRef<str>) -> Self {
        Self(Zeroizing::new(secret.as_ref().to_owned()))
    }

    /// Empty credential, used to probe for the presence of a private key.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if the credential holds no characters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the secret.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self(Zeroizing::new(secret))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Handle to an unlocked private key entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyEntry {
    /// Alias the entry belongs to.
    pub alias: String,
    /// Provider-specific key identifier (for example the PKCS#11 `CKA_ID`).
    pub key_id: Vec<u8>,
}

impl PrivateKeyEntry {
    /// Create a private key entry handle.
    pub fn new(alias: impl Into<String>, key_id: Vec<u8>) -> Self {
        Self {
            alias: alias.into(),
            key_id,
        }
    }
}

/// Keystore operations used by alias resolution and selection.
pub trait KeystoreManager {
    /// Aliases of all entries in the store.
    fn aliases(&self) -> Result<Vec<String>, KeystoreError>;

    /// Certificate stored under `alias`.
    ///
    /// `Ok(None)` means the store does not expose a certificate for this
    /// alias. Errors carry a tag deciding whether the whole store is unusable.
    fn certificate(&self, alias: &str) -> Result<Option<Certificate>, KeystoreError>;

    /// Open the private key entry for `alias` with `credential`.
    ///
    /// Must return [`KeystoreError::Unsupported`] when the entry has no
    /// private key capability, and an authentication tag when the credential
    /// is rejected.
    fn private_key_entry(
        &self,
        alias: &str,
        credential: &Credential,
    ) -> Result<Option<PrivateKeyEntry>, KeystoreError>;
}

impl<K: KeystoreManager + ?Sized> KeystoreManager for &K {
    fn aliases(&self) -> Result<Vec<String>, KeystoreError> {
        (**self).aliases()
    }

    fn certificate(&self, alias: &str) -> Result<Option<Certificate>, KeystoreError> {
        (**self).certificate(alias)
    }

    fn private_key_entry(
        &self,
        alias: &str,
        credential: &Credential,
    ) -> Result<Option<PrivateKeyEntry>, KeystoreError> {
        (**self).private_key_entry(alias, credential)
    }
}

impl<K: KeystoreManager + ?Sized> KeystoreManager for Box<K> {
    fn aliases(&self) -> Result<Vec<String>, KeystoreError> {
        (**self).aliases()
    }

    fn certificate(&self, alias: &str) -> Result<Option<Certificate>, KeystoreError> {
        (**self).certificate(alias)
    }

    fn private_key_entry(
        &self,
        alias: &str,
        credential: &Credential,
    ) -> Result<Option<PrivateKeyEntry>, KeystoreError> {
        (**self).private_key_entry(alias, credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_hides_secret() {
        let pin = Credential::new("123456");
        assert_eq!(format!("{pin:?}"), "Credential(***)");
        assert_eq!(pin.expose(), "123456");
    }

    #[test]
    fn test_empty_credential() {
        assert!(Credential::empty().is_empty());
        assert!(!Credential::new("0").is_empty());
        assert_eq!(Credential::default(), Credential::empty());
    }

    #[test]
    fn test_credential_borrows_secret() {
        let pin = Credential::from("2468".to_string());
        let copy = pin.clone();
        let exposed: &str = pin.expose();
        assert_eq!(exposed, "2468");
        assert_eq!(copy, pin);
        assert_ne!(Credential::new("1357"), pin);
    }
}
