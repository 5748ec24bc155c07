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

//! Keystore backed by a PKCS#11 token.
//!
//! Certificates are read from the token on every call; nothing is cached, so
//! a card pulled out between two calls is noticed. Aliases are the
//! certificate `CKA_LABEL`, or the hex encoded `CKA_ID` when the label is
//! missing.
//!
//! Private key probes never send an empty PIN to the token. When the token
//! requires a login and no PIN is given, the probe answers
//! [`KeystoreError::AuthFailure`] without touching the retry counter.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "pkcs11")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use usg_cert_selector::keystore::KeystoreManager;
//! use usg_cert_selector::pkcs11::token::Pkcs11Keystore;
//!
//! let store = Pkcs11Keystore::open("/usr/lib/opensc-pkcs11.so", None)?;
//! for alias in store.aliases()? {
//!     println!("{alias}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{KeystoreError, Result, SelectorError};
use crate::keystore::{Credential, KeystoreManager, PrivateKeyEntry};
use cryptoki::context::{CInitializeArgs, CInitializeFlags, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::object::{Attribute, AttributeType, ObjectClass};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use der::Decode;
use std::cell::Cell;
use std::path::Path;
use tracing::{debug, info, warn};
use x509_cert::Certificate;

/// Map a PKCS#11 failure to a keystore error tag.
pub fn map_cryptoki_error(err: CryptokiError) -> KeystoreError {
    match err {
        CryptokiError::Pkcs11(rv, function) => match rv {
            RvError::PinIncorrect | RvError::PinInvalid | RvError::PinLenRange => {
                KeystoreError::AuthFailure
            }
            RvError::PinLocked => KeystoreError::Locked,
            RvError::FunctionCanceled => KeystoreError::Cancelled,
            RvError::FunctionNotSupported => KeystoreError::Unsupported,
            RvError::CryptokiNotInitialized => KeystoreError::NotInitialized,
            other => KeystoreError::other(format!("{function:?} failed: {other:?}")),
        },
        CryptokiError::NotSupported => KeystoreError::Unsupported,
        other => KeystoreError::other(other.to_string()),
    }
}

/// Certificate object found on the token.
struct TokenCertificate {
    alias: String,
    id: Vec<u8>,
    der: Vec<u8>,
}

/// Keystore over one slot of a PKCS#11 module.
pub struct Pkcs11Keystore {
    session: Session,
    // Declared after the session so the module outlives it.
    _pkcs11: Pkcs11,
    slot: Slot,
    login_required: bool,
    logged_in: Cell<bool>,
}

impl Pkcs11Keystore {
    /// Load `library` and open a read-only session on `slot`, or on the first
    /// slot holding a token.
    pub fn open(library: impl AsRef<Path>, slot: Option<u64>) -> Result<Self> {
        let library = library.as_ref();
        let pkcs11 = Pkcs11::new(library).map_err(|e| {
            SelectorError::pkcs11(format!(
                "Failed to load PKCS#11 library at {}: {}",
                library.display(),
                e
            ))
        })?;

        match pkcs11.initialize(CInitializeArgs::new(CInitializeFlags::empty())) {
            Ok(()) => {}
            Err(CryptokiError::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) => {
                debug!("PKCS#11 library already initialised");
            }
            Err(e) => {
                return Err(SelectorError::pkcs11(format!(
                    "Failed to initialize PKCS#11: {}",
                    e
                )))
            }
        }

        let slots = pkcs11
            .get_slots_with_token()
            .map_err(|e| SelectorError::pkcs11(format!("Failed to get PKCS#11 slots: {}", e)))?;

        let slot = match slot {
            Some(id) => slots
                .into_iter()
                .find(|s| s.id() == id)
                .ok_or_else(|| SelectorError::pkcs11(format!("Slot {id} not found or has no token")))?,
            None => slots
                .into_iter()
                .next()
                .ok_or_else(|| SelectorError::pkcs11("No PKCS#11 slots with tokens found"))?,
        };

        let token = pkcs11
            .get_token_info(slot)
            .map_err(|e| SelectorError::pkcs11(format!("Failed to get token info: {}", e)))?;

        let session = pkcs11
            .open_ro_session(slot)
            .map_err(|e| SelectorError::pkcs11(format!("Failed to open session: {}", e)))?;

        info!(
            "Opened PKCS#11 token '{}' in slot {}",
            token.label().trim(),
            slot.id()
        );

        Ok(Self {
            session,
            _pkcs11: pkcs11,
            slot,
            login_required: token.login_required(),
            logged_in: Cell::new(false),
        })
    }

    /// Slot the session is bound to.
    pub fn slot_id(&self) -> u64 {
        self.slot.id()
    }

    fn certificates(&self) -> std::result::Result<Vec<TokenCertificate>, KeystoreError> {
        let template = vec![Attribute::Class(ObjectClass::CERTIFICATE)];
        let objects = self
            .session
            .find_objects(&template)
            .map_err(map_cryptoki_error)?;

        let mut found = Vec::with_capacity(objects.len());
        for obj in objects {
            let attrs = match self.session.get_attributes(
                obj,
                &[AttributeType::Value, AttributeType::Id, AttributeType::Label],
            ) {
                Ok(a) => a,
                Err(e) => {
                    warn!("Skipping unreadable certificate object: {}", e);
                    continue;
                }
            };

            let mut der = None;
            let mut id = Vec::new();
            let mut label = None;
            for attr in attrs {
                match attr {
                    Attribute::Value(v) => der = Some(v),
                    Attribute::Id(v) => id = v,
                    Attribute::Label(v) => label = Some(String::from_utf8_lossy(&v).into_owned()),
                    _ => {}
                }
            }

            let Some(der) = der else { continue };
            let alias = label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| hex::encode(&id));
            found.push(TokenCertificate { alias, id, der });
        }
        Ok(found)
    }

    fn find_certificate(&self, alias: &str) -> std::result::Result<TokenCertificate, KeystoreError> {
        self.certificates()?
            .into_iter()
            .find(|c| c.alias == alias)
            .ok_or_else(|| KeystoreError::other(format!("no certificate with alias '{alias}'")))
    }

    fn find_private_key(&self, id: &[u8]) -> std::result::Result<bool, KeystoreError> {
        let template = vec![
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(id.to_vec()),
        ];
        self.session
            .find_objects(&template)
            .map(|handles| !handles.is_empty())
            .map_err(map_cryptoki_error)
    }

    fn login(&self, credential: &Credential) -> std::result::Result<(), KeystoreError> {
        let pin = AuthPin::new(credential.expose().into());
        match self.session.login(UserType::User, Some(&pin)) {
            Ok(()) => {}
            Err(CryptokiError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {}
            Err(e) => return Err(map_cryptoki_error(e)),
        }
        self.logged_in.set(true);
        Ok(())
    }
}

impl KeystoreManager for Pkcs11Keystore {
    fn aliases(&self) -> std::result::Result<Vec<String>, KeystoreError> {
        let aliases: Vec<String> = self.certificates()?.into_iter().map(|c| c.alias).collect();
        debug!("Token in slot {} holds {} certificates", self.slot.id(), aliases.len());
        Ok(aliases)
    }

    fn certificate(&self, alias: &str) -> std::result::Result<Option<Certificate>, KeystoreError> {
        let found = self.find_certificate(alias)?;
        match Certificate::from_der(&found.der) {
            Ok(cert) => Ok(Some(cert)),
            Err(e) => {
                warn!("Certificate '{}' on token is not valid DER: {}", alias, e);
                Ok(None)
            }
        }
    }

    fn private_key_entry(
        &self,
        alias: &str,
        credential: &Credential,
    ) -> std::result::Result<Option<PrivateKeyEntry>, KeystoreError> {
        let found = self.find_certificate(alias)?;

        if self.find_private_key(&found.id)? {
            return Ok(Some(PrivateKeyEntry::new(alias, found.id)));
        }

        if self.login_required && !self.logged_in.get() {
            if credential.is_empty() {
                return Err(KeystoreError::AuthFailure);
            }
            self.login(credential)?;
        }

        if self.find_private_key(&found.id)? {
            Ok(Some(PrivateKeyEntry::new(alias, found.id)))
        } else {
            Ok(None)
        }
    }
}

impl Drop for Pkcs11Keystore {
    fn drop(&mut self) {
        if self.logged_in.get() {
            let _ = self.session.logout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptoki::context::Function;

    #[test]
    fn test_error_tags() {
        let cases = [
            (RvError::PinIncorrect, KeystoreError::AuthFailure),
            (RvError::PinLocked, KeystoreError::Locked),
            (RvError::FunctionCanceled, KeystoreError::Cancelled),
            (RvError::FunctionNotSupported, KeystoreError::Unsupported),
            (RvError::CryptokiNotInitialized, KeystoreError::NotInitialized),
        ];
        for (rv, expected) in cases {
            assert_eq!(
                map_cryptoki_error(CryptokiError::Pkcs11(rv, Function::Login)),
                expected
            );
        }
    }

    #[test]
    fn test_other_return_values_do_not_abort() {
        let err = map_cryptoki_error(CryptokiError::Pkcs11(
            RvError::DeviceError,
            Function::FindObjects,
        ));
        assert!(matches!(err, KeystoreError::Other(_)));
        assert!(!err.aborts_resolution());
    }
}
