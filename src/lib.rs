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

//! # usg-cert-selector
//!
//! Certificate selection across smart cards, PKCS#11 tokens and software
//! keystores.
//!
//! Given a keystore, the library works out which certificates a user can
//! actually sign or authenticate with, labels them with readable names and
//! hands a sorted list to whatever user interface the application provides.
//! Rendering the list is left to the caller through the
//! [`selection::CertificatePresenter`] trait.
//!
//! ## Features
//!
//! - **Alias resolution**: friendly names, validity and private key checks,
//!   user-supplied filters combined by union
//! - **Selection**: deterministic ordering, mandatory short-circuit, validity
//!   confirmation for the chosen certificate
//! - **PKCS#11 drivers**: per-platform driver discovery and provider
//!   configuration text with the workarounds known drivers need
//! - **Tagged keystore failures**: locked or PIN-rejecting tokens stop
//!   resolution instead of silently emptying the list
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_cert_selector::keystore::{KeystoreManager, MemoryKeystore};
//! use usg_cert_selector::resolver::AliasResolver;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = MemoryKeystore::new();
//! store.load_dir("/home/user/certs")?;
//!
//! let aliases = store.aliases()?;
//! let names = AliasResolver::new(Some(&store))
//!     .check_private_keys(true)
//!     .resolve(&aliases)?;
//!
//! for (alias, name) in names.iter() {
//!     println!("{alias}: {name}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## PKCS#11 Provider Configuration
//!
//! ```no_run
//! use usg_cert_selector::pkcs11::{DriverLocator, ProviderConfig};
//! use usg_cert_selector::Platform;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = DriverLocator::new().locate(Platform::current())?;
//! let config = ProviderConfig::builder(driver.to_string_lossy()).build();
//! print!("{}", config.render());
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo Features
//!
//! - `pkcs11`: keystore over a real PKCS#11 module using `cryptoki`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod certificate;
pub mod config;
pub mod error;
pub mod filter;
pub mod keystore;
pub mod logging;
pub mod pkcs11;
pub mod platform;
pub mod resolver;
pub mod selection;

// Re-export main types at crate root for convenience
pub use config::SelectorConfig;
pub use error::{KeystoreError, Result, SelectorError};
pub use filter::CertificateFilter;
pub use keystore::{Credential, KeystoreManager};
pub use platform::Platform;
pub use resolver::{resolve_aliases, AliasResolver, FriendlyNames};
pub use selection::{
    select_alias, CertificateChoice, CertificatePresenter, SelectionOutcome, SelectionRequest,
};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
