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

//! PKCS#11 support: finding the token driver and describing the provider
//! that loads it.
//!
//! The token keystore itself lives in [`token`] and needs the `pkcs11`
//! feature.

pub mod locator;
pub mod provider_config;

#[cfg(feature = "pkcs11")]
pub mod token;

pub use locator::{DriverLocator, FileProbe, FsProbe};
pub use provider_config::{
    build_provider_config, is_legacy_driver_without_sha1, NoShortPath, ProviderConfig,
    ProviderConfigBuilder, ShortPathResolver, SystemShortPath, DEFAULT_PROVIDER_NAME,
};
