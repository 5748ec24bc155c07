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

//! Error types for certificate selection.
//!
//! Two layers of errors live here:
//!
//! - [`KeystoreError`] is what a keystore adapter reports for a single call.
//!   The adapter wrapping the real token driver decides the tag; the resolver
//!   only looks at the tag, never at driver-specific messages.
//! - [`SelectorError`] is what callers of the selection pipeline see.

use thiserror::Error;

/// Result type alias using [`SelectorError`].
pub type Result<T> = std::result::Result<T, SelectorError>;

/// Failure reported by a keystore adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeystoreError {
    /// The entry does not support the requested operation (for example a
    /// trusted certificate with no private key behind it).
    #[error("operation not supported by keystore entry")]
    Unsupported,

    /// The credential was rejected.
    #[error("keystore authentication failed")]
    AuthFailure,

    /// The token or authentication mode is locked.
    #[error("keystore is locked")]
    Locked,

    /// The user dismissed a credential prompt raised by the keystore.
    #[error("keystore operation cancelled by user")]
    Cancelled,

    /// The keystore has not been initialised (card removed, driver not loaded).
    #[error("keystore not initialized")]
    NotInitialized,

    /// Any other keystore failure.
    #[error("keystore error: {0}")]
    Other(String),
}

impl KeystoreError {
    /// Create a generic keystore error with the given message.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true if this failure means the whole store is unusable and
    /// alias resolution must stop instead of skipping one entry.
    pub fn aborts_resolution(&self) -> bool {
        matches!(self, Self::AuthFailure | Self::Locked | Self::Cancelled)
    }
}

/// Errors returned by the selection pipeline.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// No aliases and no keystore were supplied, or the alias list was empty.
    #[error("keystore contains no entries")]
    NoEntries,

    /// Every alias was excluded by validity, usability or filter rules.
    #[error("keystore contains no valid entries")]
    NoValidEntries,

    /// The keystore signalled an authentication or lock failure.
    #[error("keystore unusable: {0}")]
    StoreUnusable(#[source] KeystoreError),

    /// No PKCS#11 driver module was found on this platform.
    #[error("no PKCS#11 driver installed on {platform}")]
    DriverNotFound {
        /// Platform that was searched.
        platform: String,
    },

    /// The user cancelled the selection or refused an invalid certificate.
    #[error("operation cancelled: {0}")]
    CancelledOperation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// PKCS#11 module error.
    #[error("PKCS#11 error: {0}")]
    Pkcs11(String),

    /// DER/PEM decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SelectorError {
    /// Create a cancelled-operation error with the given message.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::CancelledOperation(msg.into())
    }

    /// Create a driver-not-found error for the given platform.
    pub fn driver_not_found(platform: impl Into<String>) -> Self {
        Self::DriverNotFound {
            platform: platform.into(),
        }
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PKCS#11 error with the given message.
    pub fn pkcs11(msg: impl Into<String>) -> Self {
        Self::Pkcs11(msg.into())
    }

    /// Returns true if the user cancelled the operation.
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, Self::CancelledOperation(_))
    }

    /// Returns true if no certificate was available to choose from.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoEntries | Self::NoValidEntries)
    }
}

impl From<KeystoreError> for SelectorError {
    fn from(err: KeystoreError) -> Self {
        Self::StoreUnusable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SelectorError::driver_not_found("Linux");
        assert_eq!(err.to_string(), "no PKCS#11 driver installed on Linux");

        let err = SelectorError::StoreUnusable(KeystoreError::Locked);
        assert_eq!(err.to_string(), "keystore unusable: keystore is locked");
    }

    #[test]
    fn test_aborts_resolution() {
        assert!(KeystoreError::AuthFailure.aborts_resolution());
        assert!(KeystoreError::Locked.aborts_resolution());
        assert!(KeystoreError::Cancelled.aborts_resolution());
        assert!(!KeystoreError::Unsupported.aborts_resolution());
        assert!(!KeystoreError::NotInitialized.aborts_resolution());
        assert!(!KeystoreError::other("boom").aborts_resolution());
    }

    #[test]
    fn test_classification() {
        assert!(SelectorError::cancelled("no").is_user_cancellation());
        assert!(SelectorError::NoEntries.is_not_found());
        assert!(SelectorError::NoValidEntries.is_not_found());
        assert!(!SelectorError::config("bad").is_not_found());
    }
}
