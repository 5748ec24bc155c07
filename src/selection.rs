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

//! Certificate selection.
//!
//! [`select_alias`] drives one selection end to end: it resolves the
//! candidate aliases, short-circuits the unambiguous mandatory case, sorts
//! what is left by friendly name and hands the list to a
//! [`CertificatePresenter`]. When requested, the chosen certificate is checked
//! for temporal validity and the presenter decides whether an invalid one may
//! still be used.
//!
//! # Example
//!
//! ```no_run
//! use usg_cert_selector::keystore::MemoryKeystore;
//! use usg_cert_selector::selection::{select_alias, CertificateChoice, CertificatePresenter, SelectionRequest};
//! use usg_cert_selector::keystore::KeystoreManager;
//!
//! struct First;
//!
//! impl CertificatePresenter for First {
//!     fn choose(
//!         &mut self,
//!         choices: &[CertificateChoice],
//!         _keystore: Option<&dyn KeystoreManager>,
//!     ) -> Option<String> {
//!         choices.first().map(|c| c.alias.clone())
//!     }
//!
//!     fn confirm(&mut self, _message: &str, _title: &str) -> bool {
//!         false
//!     }
//! }
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = MemoryKeystore::new();
//! store.load_dir("/etc/ssl/mine")?;
//!
//! let alias = select_alias(&SelectionRequest::new(), Some(&store), &mut First)?;
//! println!("Selected {alias}");
//! # Ok(())
//! # }
//! ```

use crate::certificate::{check_validity, issuer_common_name, ExpiryStatus, ValidityError};
use crate::config::SelectorConfig;
use crate::error::{Result, SelectorError};
use crate::filter::CertificateFilter;
use crate::keystore::KeystoreManager;
use crate::resolver::AliasResolver;
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use x509_cert::Certificate;

/// Title of the confirmation raised for an invalid certificate.
pub const INVALID_CERTIFICATE_TITLE: &str = "Invalid certificate";

/// One entry of the list shown to the user.
#[derive(Debug, Clone)]
pub struct CertificateChoice {
    /// Keystore alias.
    pub alias: String,
    /// Friendly display name.
    pub name: String,
    /// Certificate behind the alias, when a keystore is available.
    pub certificate: Option<Certificate>,
}

impl CertificateChoice {
    /// Expiry state of the certificate at `now`. Entries without a
    /// certificate are reported as valid.
    pub fn expiry_status(&self, now: SystemTime, warning: Duration) -> ExpiryStatus {
        self.certificate
            .as_ref()
            .map(|cert| ExpiryStatus::of(cert, now, warning))
            .unwrap_or(ExpiryStatus::Valid)
    }

    /// Issuer common name, for display next to the friendly name.
    pub fn issuer_name(&self) -> Option<String> {
        self.certificate.as_ref().and_then(issuer_common_name)
    }
}

/// Presentation collaborator: shows the choice and confirmation dialogs.
pub trait CertificatePresenter {
    /// Let the user pick one of `choices`. `None` means the user cancelled.
    fn choose(
        &mut self,
        choices: &[CertificateChoice],
        keystore: Option<&dyn KeystoreManager>,
    ) -> Option<String>;

    /// Ask a yes/no question. Returns true if the user accepts.
    fn confirm(&mut self, message: &str, title: &str) -> bool;
}

impl<P: CertificatePresenter + ?Sized> CertificatePresenter for &mut P {
    fn choose(
        &mut self,
        choices: &[CertificateChoice],
        keystore: Option<&dyn KeystoreManager>,
    ) -> Option<String> {
        (**self).choose(choices, keystore)
    }

    fn confirm(&mut self, message: &str, title: &str) -> bool {
        (**self).confirm(message, title)
    }
}

/// Parameters of one selection.
pub struct SelectionRequest {
    aliases: Option<Vec<String>>,
    check_private_keys: bool,
    check_validity: bool,
    show_expired: bool,
    mandatory: bool,
    filters: Vec<Box<dyn CertificateFilter>>,
    now: Option<SystemTime>,
}

impl Default for SelectionRequest {
    fn default() -> Self {
        Self {
            aliases: None,
            check_private_keys: true,
            check_validity: true,
            show_expired: false,
            mandatory: false,
            filters: Vec::new(),
            now: None,
        }
    }
}

impl fmt::Debug for SelectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionRequest")
            .field("aliases", &self.aliases)
            .field("check_private_keys", &self.check_private_keys)
            .field("check_validity", &self.check_validity)
            .field("show_expired", &self.show_expired)
            .field("mandatory", &self.mandatory)
            .field(
                "filters",
                &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SelectionRequest {
    /// Request with default flags: private keys and validity checked,
    /// expired certificates hidden, no mandatory short-circuit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request with the flags from `config`.
    pub fn from_config(config: &SelectorConfig) -> Self {
        let selection = &config.selection;
        Self::new()
            .check_private_keys(selection.check_private_keys)
            .check_validity(selection.check_validity)
            .show_expired(selection.show_expired)
            .mandatory(selection.mandatory)
    }

    /// Choose among these aliases instead of every alias in the keystore.
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = Some(aliases.into_iter().map(Into::into).collect());
        self
    }

    /// Drop aliases without a usable private key.
    pub fn check_private_keys(mut self, check: bool) -> Self {
        self.check_private_keys = check;
        self
    }

    /// Check the chosen certificate's validity and ask before using an invalid one.
    pub fn check_validity(mut self, check: bool) -> Self {
        self.check_validity = check;
        self
    }

    /// List certificates outside their validity window.
    pub fn show_expired(mut self, show: bool) -> Self {
        self.show_expired = show;
        self
    }

    /// Return the only remaining certificate without asking.
    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    /// Add a filter. Filters are combined by union.
    pub fn filter(mut self, filter: impl CertificateFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Add a boxed filter.
    pub fn boxed_filter(mut self, filter: Box<dyn CertificateFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Evaluate validity at a fixed instant instead of the system clock.
    pub fn at(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    /// Returns true if the only remaining certificate is returned without asking.
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

/// Result of a selection, for callers that do not treat cancellation or an
/// empty store as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The user (or the mandatory short-circuit) chose this alias.
    Selected(String),
    /// The user cancelled or refused an invalid certificate.
    Cancelled,
    /// No certificate was available to choose from.
    NotFound,
}

impl SelectionOutcome {
    /// Classify a selection result. Other errors are passed through.
    pub fn from_result(result: Result<String>) -> Result<Self> {
        match result {
            Ok(alias) => Ok(Self::Selected(alias)),
            Err(e) if e.is_user_cancellation() => Ok(Self::Cancelled),
            Err(e) if e.is_not_found() => Ok(Self::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Selected alias, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::Selected(alias) => Some(alias),
            _ => None,
        }
    }
}

/// Case-insensitive ordering of friendly names. Empty names sort last.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Sort choices by friendly name. Equal names keep their relative order.
pub fn sort_choices(choices: &mut [CertificateChoice]) {
    choices.sort_by(|a, b| compare_names(&a.name, &b.name));
}

/// Run one selection.
///
/// # Errors
///
/// - [`SelectorError::NoEntries`] when no aliases and no keystore are given,
///   or the alias list is empty.
/// - [`SelectorError::StoreUnusable`] when the keystore cannot be enumerated
///   or reports an authentication or lock failure.
/// - [`SelectorError::NoValidEntries`] when every alias is excluded.
/// - [`SelectorError::CancelledOperation`] when the user cancels or refuses
///   an invalid certificate.
pub fn select_alias<P>(
    request: &SelectionRequest,
    keystore: Option<&dyn KeystoreManager>,
    presenter: &mut P,
) -> Result<String>
where
    P: CertificatePresenter + ?Sized,
{
    let enumerated;
    let aliases: &[String] = match (&request.aliases, keystore) {
        (Some(list), _) if list.is_empty() => return Err(SelectorError::NoEntries),
        (Some(list), _) => list,
        (None, Some(store)) => {
            enumerated = store.aliases()?;
            &enumerated
        }
        (None, None) => return Err(SelectorError::NoEntries),
    };

    let now = request.now.unwrap_or_else(SystemTime::now);
    let names = AliasResolver::new(keystore)
        .check_private_keys(request.check_private_keys)
        .show_expired(request.show_expired)
        .filters(&request.filters)
        .at(now)
        .resolve(aliases)?;

    if names.is_empty() {
        info!("No valid certificate among {} aliases", aliases.len());
        return Err(SelectorError::NoValidEntries);
    }

    if request.mandatory && names.len() == 1 {
        if let Some(alias) = names.aliases().next() {
            debug!("Selecting the only matching certificate '{}'", alias);
            return Ok(alias.to_string());
        }
    }

    let mut choices: Vec<CertificateChoice> = names
        .into_iter()
        .map(|(alias, name)| {
            let certificate = keystore.and_then(|store| store.certificate(&alias).ok().flatten());
            CertificateChoice {
                alias,
                name,
                certificate,
            }
        })
        .collect();
    sort_choices(&mut choices);

    let Some(selected) = presenter.choose(&choices, keystore) else {
        return Err(SelectorError::cancelled("certificate selection cancelled"));
    };

    if request.check_validity {
        if let Some(store) = keystore {
            if let Some(problem) = validity_problem(store, &selected, now) {
                warn!("Selected certificate '{}' failed validation: {}", selected, problem);
                if presenter.confirm(&problem, INVALID_CERTIFICATE_TITLE) {
                    return Ok(selected);
                }
                return Err(SelectorError::cancelled(
                    "refused a certificate that is probably not valid",
                ));
            }
        }
    }

    Ok(selected)
}

/// Message describing why the certificate behind `alias` is not usable at
/// `now`, or `None` if it is valid.
fn validity_problem(store: &dyn KeystoreManager, alias: &str, now: SystemTime) -> Option<String> {
    let cert = match store.certificate(alias) {
        Ok(Some(cert)) => cert,
        Ok(None) => return Some(unverifiable_message()),
        Err(e) => {
            debug!("Could not read '{}' for validation: {}", alias, e);
            return Some(unverifiable_message());
        }
    };
    match check_validity(&cert, now) {
        Ok(()) => None,
        Err(ValidityError::Expired) => Some(
            "The selected certificate has expired. Do you want to use it anyway?".to_string(),
        ),
        Err(ValidityError::NotYetValid) => Some(
            "The selected certificate is not valid yet. Do you want to use it anyway?".to_string(),
        ),
    }
}

fn unverifiable_message() -> String {
    "The validity of the selected certificate could not be verified. Do you want to use it anyway?"
        .to_string()
}
