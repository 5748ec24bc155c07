// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! PKCS#11 driver discovery.
//!
//! Each platform has a fixed, ordered list of places where smart card
//! middleware installs its PKCS#11 module. The first candidate that exists
//! wins; nothing on disk is modified.
//!
//! # Example
//!
//! ```no_run
//! use usg_cert_selector::pkcs11::DriverLocator;
//! use usg_cert_selector::Platform;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = DriverLocator::new().locate(Platform::current())?;
//! println!("Using PKCS#11 driver {}", driver.display());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SelectorError};
use crate::platform::{windows_system_lib_dir, Platform};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Location of one driver candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// File name inside the Windows system library directory.
    SystemLib(&'static str),
    /// Absolute path.
    Absolute(&'static str),
}

/// Windows: national ID card driver, then the CERES driver, then OpenSC.
const WINDOWS_CANDIDATES: &[Candidate] = &[
    Candidate::SystemLib("DNIe_P11_priv.dll"),
    Candidate::SystemLib("UsrPkcs11.dll"),
    Candidate::SystemLib("opensc-pkcs11.dll"),
];

const MACOS_CANDIDATES: &[Candidate] = &[
    Candidate::Absolute("/Library/OpenSC/lib/libopensc-dnie.dylib"),
    Candidate::Absolute("/Library/OpenSC/lib/opensc-pkcs11.so"),
    Candidate::Absolute("/Library/OpenSC/lib/libopensc-dnie.1.0.3.dylib"),
    Candidate::Absolute("/usr/lib/opensc-pkcs11.so"),
];

const POSIX_CANDIDATES: &[Candidate] = &[
    Candidate::Absolute("/usr/local/lib/libopensc-dnie.so"),
    Candidate::Absolute("/usr/lib/libopensc-dnie.so"),
    Candidate::Absolute("/lib/libopensc-dnie.so"),
    Candidate::Absolute("/usr/lib/opensc-pkcs11.so"),
    Candidate::Absolute("/lib/opensc-pkcs11.so"),
    Candidate::Absolute("/usr/local/lib/opensc-pkcs11.so"),
];

fn candidate_table(platform: Platform) -> &'static [Candidate] {
    match platform {
        Platform::Windows => WINDOWS_CANDIDATES,
        Platform::MacOs => MACOS_CANDIDATES,
        Platform::Posix => POSIX_CANDIDATES,
    }
}

/// Filesystem existence check.
pub trait FileProbe {
    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

impl<F> FileProbe for F
where
    F: Fn(&Path) -> bool,
{
    fn exists(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Finds the installed PKCS#11 driver for smart card tokens.
pub struct DriverLocator<P: FileProbe = FsProbe> {
    probe: P,
    system_lib_dir: PathBuf,
    extra_paths: Vec<PathBuf>,
}

impl DriverLocator<FsProbe> {
    /// Create a locator probing the real filesystem.
    pub fn new() -> Self {
        Self::with_probe(FsProbe)
    }
}

impl Default for DriverLocator<FsProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: FileProbe> DriverLocator<P> {
    /// Create a locator using a custom existence probe.
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            system_lib_dir: windows_system_lib_dir(),
            extra_paths: Vec::new(),
        }
    }

    /// Override the Windows system library directory.
    pub fn with_system_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_lib_dir = dir.into();
        self
    }

    /// Append site-specific driver paths, tried after the built-in table.
    pub fn with_extra_paths<I, T>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<PathBuf>,
    {
        self.extra_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Ordered list of paths probed for `platform`.
    pub fn candidates(&self, platform: Platform) -> Vec<PathBuf> {
        candidate_table(platform)
            .iter()
            .map(|c| match c {
                Candidate::SystemLib(name) => self.system_lib_dir.join(name),
                Candidate::Absolute(path) => PathBuf::from(path),
            })
            .chain(self.extra_paths.iter().cloned())
            .collect()
    }

    /// Return the first candidate driver that exists for `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::DriverNotFound`] when no candidate exists.
    pub fn locate(&self, platform: Platform) -> Result<PathBuf> {
        for path in self.candidates(platform) {
            if self.probe.exists(&path) {
                debug!("Found PKCS#11 driver at {}", path.display());
                return Ok(path);
            }
            debug!("No PKCS#11 driver at {}", path.display());
        }
        Err(SelectorError::driver_not_found(platform.name()))
    }
}
