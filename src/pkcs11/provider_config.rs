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

//! PKCS#11 provider configuration synthesis.
//!
//! Cryptographic providers that bridge a PKCS#11 module into an application
//! read a small line-oriented `key=value` configuration. This module builds
//! that text for a given driver, applying the workarounds known drivers need:
//!
//! - Paths containing parentheses (`C:\Program Files (x86)\...`) break the
//!   provider's parser, so the platform short path is used when available.
//! - `showInfo=false` is always emitted; some token drivers fail otherwise.
//! - Legacy national ID card drivers do not implement `CKM_SHA1_RSA_PKCS`;
//!   the mechanism is disabled so the provider emulates it.
//! - Lines are always terminated with CRLF.
//!
//! # Example
//!
//! ```
//! use usg_cert_selector::pkcs11::ProviderConfig;
//!
//! let config = ProviderConfig::builder("/usr/lib/opensc-pkcs11.so")
//!     .slot(1)
//!     .build();
//!
//! assert_eq!(
//!     config.render(),
//!     "library=/usr/lib/opensc-pkcs11.so\r\nname=AFIRMA-PKCS11\r\nshowInfo=false\r\nslot=1\r\n"
//! );
//! ```

use std::fmt;
use tracing::info;

/// Provider name used when the caller does not supply one.
pub const DEFAULT_PROVIDER_NAME: &str = "AFIRMA-PKCS11";

/// Mechanism missing from the legacy drivers in [`LEGACY_DRIVERS_WITHOUT_SHA1`].
pub const SHA1_RSA_MECHANISM: &str = "CKM_SHA1_RSA_PKCS";

/// Driver file names that lack a native SHA1-with-RSA signature mechanism.
pub const LEGACY_DRIVERS_WITHOUT_SHA1: &[&str] = &[
    "DNIe_P11_priv.dll",
    "DNIe_P11_pub.dll",
    "FNMT_P11.dll",
    "UsrPkcs11.dll",
    "UsrPubPkcs11.dll",
];

const CRLF: &str = "\r\n";

/// Resolves a path to its platform short (8.3) form.
pub trait ShortPathResolver {
    /// Short form of `path`, or `None` when it cannot be resolved.
    fn short_path(&self, path: &str) -> Option<String>;
}

/// Resolver for platforms without short paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShortPath;

impl ShortPathResolver for NoShortPath {
    fn short_path(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Short path resolution through `GetShortPathNameW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShortPath;

impl ShortPathResolver for SystemShortPath {
    #[cfg(windows)]
    fn short_path(&self, path: &str) -> Option<String> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use tracing::warn;
        use windows::core::PCWSTR;
        use windows::Win32::Storage::FileSystem::GetShortPathNameW;

        if !std::path::Path::new(path).exists() {
            return None;
        }

        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // First call reports the required buffer size including the terminator.
        let needed = unsafe { GetShortPathNameW(PCWSTR(wide.as_ptr()), None) };
        if needed == 0 {
            warn!("Could not get short path of {}", path);
            return None;
        }

        let mut buffer = vec![0u16; needed as usize];
        let written = unsafe { GetShortPathNameW(PCWSTR(wide.as_ptr()), Some(&mut buffer)) };
        if written == 0 || written as usize >= buffer.len() {
            warn!("Could not get short path of {}", path);
            return None;
        }

        Some(String::from_utf16_lossy(&buffer[..written as usize]))
    }

    #[cfg(not(windows))]
    fn short_path(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Configuration for a PKCS#11 cryptographic provider.
///
/// Immutable once built; render it with [`ProviderConfig::render`] or
/// `to_string()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    library: String,
    name: String,
    slot: Option<u64>,
    disabled_mechanisms: Vec<String>,
}

impl ProviderConfig {
    /// Start building a configuration for the driver at `library`.
    pub fn builder(library: impl Into<String>) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(library)
    }

    /// Library path as written to the configuration.
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token slot, if one was requested.
    pub fn slot(&self) -> Option<u64> {
        self.slot
    }

    /// Mechanisms the provider must emulate instead of calling the driver.
    pub fn disabled_mechanisms(&self) -> &[String] {
        &self.disabled_mechanisms
    }

    /// Render the configuration text with CRLF line terminators.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("library=");
        out.push_str(&self.library);
        out.push_str(CRLF);
        out.push_str("name=");
        out.push_str(&self.name);
        out.push_str(CRLF);
        out.push_str("showInfo=false");
        out.push_str(CRLF);
        if let Some(slot) = self.slot {
            out.push_str(&format!("slot={slot}"));
            out.push_str(CRLF);
        }
        if !self.disabled_mechanisms.is_empty() {
            out.push_str(&format!(
                "disabledMechanisms={{ {} }}",
                self.disabled_mechanisms.join(" ")
            ));
            out.push_str(CRLF);
        }
        out
    }
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Builder for [`ProviderConfig`].
pub struct ProviderConfigBuilder {
    library: String,
    name: Option<String>,
    slot: Option<u64>,
    resolver: Box<dyn ShortPathResolver>,
}

impl ProviderConfigBuilder {
    /// Create a builder for the driver at `library`.
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            name: None,
            slot: None,
            resolver: Box::new(SystemShortPath),
        }
    }

    /// Set the provider name. Defaults to [`DEFAULT_PROVIDER_NAME`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an optional provider name.
    pub fn maybe_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Restrict the provider to one token slot.
    pub fn slot(mut self, slot: u64) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Set an optional token slot.
    pub fn maybe_slot(mut self, slot: Option<u64>) -> Self {
        self.slot = slot;
        self
    }

    /// Replace the short path resolver.
    pub fn short_path_resolver(mut self, resolver: impl ShortPathResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProviderConfig {
        let library = if self.library.contains(['(', ')']) {
            self.resolver
                .short_path(&self.library)
                .unwrap_or_else(|| self.library.clone())
        } else {
            self.library.clone()
        };

        let disabled_mechanisms = if is_legacy_driver_without_sha1(&self.library) {
            vec![SHA1_RSA_MECHANISM.to_string()]
        } else {
            Vec::new()
        };

        let config = ProviderConfig {
            library,
            name: self
                .name
                .unwrap_or_else(|| DEFAULT_PROVIDER_NAME.to_string()),
            slot: self.slot,
            disabled_mechanisms,
        };

        info!("Created PKCS#11 provider configuration:\n{}", config.render());
        config
    }

    /// Build the configuration and render it as text.
    pub fn build_text(self) -> String {
        self.build().render()
    }
}

/// Base name of a path, splitting on both `/` and `\` regardless of host.
fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Returns true if the driver at `library` is a known legacy driver that
/// lacks `CKM_SHA1_RSA_PKCS`.
pub fn is_legacy_driver_without_sha1(library: &str) -> bool {
    let name = base_name(library);
    LEGACY_DRIVERS_WITHOUT_SHA1
        .iter()
        .any(|legacy| legacy.eq_ignore_ascii_case(name))
}

/// Build the configuration text for `library` in one call.
pub fn build_provider_config(library: &str, name: Option<&str>, slot: Option<u64>) -> String {
    ProviderConfig::builder(library)
        .maybe_name(name.map(str::to_string))
        .maybe_slot(slot)
        .build_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedShortPath(&'static str);

    impl ShortPathResolver for FixedShortPath {
        fn short_path(&self, _path: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_basic_config() {
        let text = ProviderConfig::builder("/usr/lib/opensc-pkcs11.so")
            .short_path_resolver(NoShortPath)
            .build()
            .render();
        assert_eq!(
            text,
            "library=/usr/lib/opensc-pkcs11.so\r\nname=AFIRMA-PKCS11\r\nshowInfo=false\r\n"
        );
    }

    #[test]
    fn test_name_and_slot() {
        let config = ProviderConfig::builder("/usr/lib/opensc-pkcs11.so")
            .name("CAC")
            .slot(3)
            .build();
        assert_eq!(config.name(), "CAC");
        assert_eq!(config.slot(), Some(3));
        assert!(config.render().contains("name=CAC\r\n"));
        assert!(config.render().ends_with("slot=3\r\n"));
    }

    #[test]
    fn test_legacy_driver_disables_sha1() {
        let text = build_provider_config(r"C:\Windows\System32\DNIe_P11_priv.dll", None, None);
        assert!(text.contains("disabledMechanisms={ CKM_SHA1_RSA_PKCS }\r\n"));
    }

    #[test]
    fn test_legacy_driver_match_is_case_insensitive_and_exact() {
        assert!(is_legacy_driver_without_sha1("/tmp/usrpkcs11.DLL"));
        assert!(is_legacy_driver_without_sha1("FNMT_P11.dll"));
        assert!(!is_legacy_driver_without_sha1("/tmp/UsrPkcs11.dll.bak"));
        assert!(!is_legacy_driver_without_sha1("/usr/lib/opensc-pkcs11.so"));
    }

    #[test]
    fn test_parenthesis_path_without_resolver_is_kept() {
        let lib = r"C:\Program Files (x86)\OpenSC\opensc-pkcs11.dll";
        let config = ProviderConfig::builder(lib)
            .short_path_resolver(NoShortPath)
            .build();
        assert_eq!(config.library(), lib);
        assert!(config.render().starts_with(&format!("library={lib}\r\n")));
    }

    #[test]
    fn test_parenthesis_path_uses_short_form() {
        let config = ProviderConfig::builder(r"C:\Program Files (x86)\OpenSC\opensc-pkcs11.dll")
            .short_path_resolver(FixedShortPath(r"C:\PROGRA~2\OpenSC\OPENSC~1.DLL"))
            .build();
        assert_eq!(config.library(), r"C:\PROGRA~2\OpenSC\OPENSC~1.DLL");
    }

    #[test]
    fn test_resolver_ignored_without_parenthesis() {
        let config = ProviderConfig::builder("/usr/lib/opensc-pkcs11.so")
            .short_path_resolver(FixedShortPath("SHOULD-NOT-BE-USED"))
            .build();
        assert_eq!(config.library(), "/usr/lib/opensc-pkcs11.so");
    }

    #[test]
    fn test_every_line_is_crlf_terminated() {
        let text = build_provider_config("UsrPkcs11.dll", Some("X"), Some(0));
        assert!(text.ends_with("\r\n"));
        for line in text.split_terminator("\r\n") {
            assert!(!line.contains('\n'));
            assert!(line.contains('='));
        }
        assert_eq!(text.matches("\r\n").count(), 5);
    }
}
