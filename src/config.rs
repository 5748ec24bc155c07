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

//! Selection defaults loaded from TOML.
//!
//! Every key is optional; missing keys take the defaults shown below.
//!
//! ```toml
//! [selection]
//! check_private_keys = true
//! check_validity = true
//! show_expired = false
//! mandatory = false
//!
//! [pkcs11]
//! provider_name = "AFIRMA-PKCS11"
//! slot = 0
//! library = "/usr/lib/opensc-pkcs11.so"
//! extra_driver_paths = ["/opt/vendor/lib/pkcs11.so"]
//!
//! [display]
//! expiry_warning_days = 7
//! ```
//!
//! The configuration is only ever read; nothing in this crate writes it back
//! to disk.

use crate::error::{Result, SelectorError};
use crate::pkcs11::{DriverLocator, ProviderConfig};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound for `display.expiry_warning_days`.
const MAX_EXPIRY_WARNING_DAYS: u32 = 3650;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SelectorConfig {
    /// Selection flags.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// PKCS#11 driver and provider settings.
    #[serde(default)]
    pub pkcs11: Pkcs11Config,

    /// Presentation settings.
    #[serde(default)]
    pub display: DisplayConfig,
}

impl SelectorConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| SelectorError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SelectorError::config(format!("TOML serialize: {e}")))
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SelectorError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check value ranges and collect every problem into one error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(name) = &self.pkcs11.provider_name {
            if name.trim().is_empty() {
                errors.push("pkcs11.provider_name must not be empty".to_string());
            } else if has_line_break(name) {
                errors.push("pkcs11.provider_name must be a single line".to_string());
            }
        }

        if let Some(library) = &self.pkcs11.library {
            if library.trim().is_empty() {
                errors.push("pkcs11.library must not be empty".to_string());
            } else if has_line_break(library) {
                errors.push("pkcs11.library must be a single line".to_string());
            }
        }

        if self
            .pkcs11
            .extra_driver_paths
            .iter()
            .any(|p| p.as_os_str().is_empty())
        {
            errors.push("pkcs11.extra_driver_paths must not contain empty paths".to_string());
        }

        if self.display.expiry_warning_days == 0 {
            errors.push("display.expiry_warning_days must be > 0".to_string());
        } else if self.display.expiry_warning_days > MAX_EXPIRY_WARNING_DAYS {
            errors.push(format!(
                "display.expiry_warning_days must be <= {MAX_EXPIRY_WARNING_DAYS}"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SelectorError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// Flags applied to every selection request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    /// Hide certificates without a private key.
    #[serde(default = "default_true")]
    pub check_private_keys: bool,

    /// Ask before using a chosen certificate that is not valid.
    #[serde(default = "default_true")]
    pub check_validity: bool,

    /// List certificates outside their validity window.
    #[serde(default)]
    pub show_expired: bool,

    /// Pick the only matching certificate without asking.
    #[serde(default)]
    pub mandatory: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            check_private_keys: true,
            check_validity: true,
            show_expired: false,
            mandatory: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// PKCS#11 settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Pkcs11Config {
    /// Provider name. Defaults to `AFIRMA-PKCS11`.
    #[serde(default)]
    pub provider_name: Option<String>,

    /// Token slot.
    #[serde(default)]
    pub slot: Option<u64>,

    /// Driver path. When unset the driver is searched for.
    #[serde(default)]
    pub library: Option<String>,

    /// Paths tried after the built-in search list.
    #[serde(default)]
    pub extra_driver_paths: Vec<PathBuf>,
}

impl Pkcs11Config {
    /// Driver locator with the configured extra paths.
    pub fn driver_locator(&self) -> DriverLocator {
        DriverLocator::new().with_extra_paths(self.extra_driver_paths.iter().cloned())
    }

    /// Configured driver, or the first one found on `platform`.
    pub fn resolve_library(&self, platform: Platform) -> Result<String> {
        match &self.library {
            Some(library) => Ok(library.clone()),
            None => self
                .driver_locator()
                .locate(platform)
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Provider configuration for `library` with the configured name and slot.
    pub fn provider_config(&self, library: &str) -> ProviderConfig {
        ProviderConfig::builder(library)
            .maybe_name(self.provider_name.clone())
            .maybe_slot(self.slot)
            .build()
    }
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Certificates expiring within this many days are flagged.
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: default_expiry_warning_days(),
        }
    }
}

impl DisplayConfig {
    /// Expiry warning window.
    pub fn expiry_warning(&self) -> Duration {
        Duration::from_secs(u64::from(self.expiry_warning_days) * 24 * 60 * 60)
    }
}

fn default_expiry_warning_days() -> u32 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::DEFAULT_EXPIRY_WARNING;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SelectorConfig::from_toml("").unwrap();
        assert_eq!(config, SelectorConfig::default());
        assert!(config.selection.check_private_keys);
        assert!(config.selection.check_validity);
        assert!(!config.selection.show_expired);
        assert!(!config.selection.mandatory);
        assert_eq!(config.display.expiry_warning(), DEFAULT_EXPIRY_WARNING);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config_parsing() {
        let toml = r#"
[selection]
check_private_keys = false
show_expired = true
mandatory = true

[pkcs11]
provider_name = "CARD"
slot = 2
library = "/usr/lib/opensc-pkcs11.so"
extra_driver_paths = ["/opt/card/lib/p11.so"]

[display]
expiry_warning_days = 30
"#;
        let config = SelectorConfig::from_toml(toml).unwrap();
        assert!(!config.selection.check_private_keys);
        assert!(config.selection.check_validity);
        assert!(config.selection.show_expired);
        assert!(config.selection.mandatory);
        assert_eq!(config.pkcs11.slot, Some(2));
        assert_eq!(
            config.pkcs11.extra_driver_paths,
            vec![PathBuf::from("/opt/card/lib/p11.so")]
        );
        assert_eq!(config.display.expiry_warning_days, 30);
        config.validate().unwrap();

        let rendered = config
            .pkcs11
            .provider_config("/usr/lib/opensc-pkcs11.so")
            .render();
        assert!(rendered.contains("name=CARD\r\n"));
        assert!(rendered.contains("slot=2\r\n"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = SelectorConfig::from_toml("[selection]\nautoselect = true\n").unwrap_err();
        assert!(matches!(err, SelectorError::Config(_)));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = SelectorConfig::default();
        config.pkcs11.provider_name = Some("  ".to_string());
        config.pkcs11.library = Some("a\nb".to_string());
        config.display.expiry_warning_days = 0;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("pkcs11.provider_name"));
        assert!(message.contains("pkcs11.library"));
        assert!(message.contains("display.expiry_warning_days"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = SelectorConfig::default();
        config.pkcs11.slot = Some(1);
        let parsed = SelectorConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[display]\nexpiry_warning_days = 14").unwrap();
        let config = SelectorConfig::load(file.path()).unwrap();
        assert_eq!(config.display.expiry_warning_days, 14);

        let missing = SelectorConfig::load("/nonexistent/selector.toml").unwrap_err();
        assert!(missing.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_configured_library_wins() {
        let config = SelectorConfig::from_toml("[pkcs11]\nlibrary = \"/x/p11.so\"\n").unwrap();
        assert_eq!(
            config.pkcs11.resolve_library(Platform::Posix).unwrap(),
            "/x/p11.so"
        );
    }
}
