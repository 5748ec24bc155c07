//! Shared helpers for the integration tests.
//!
//! Certificates are minted with rcgen and parsed back with x509-cert, so the
//! pipeline runs against real DER rather than hand-built structures.

#![allow(dead_code)]

use der::Decode;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, KeyUsagePurpose};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use usg_cert_selector::keystore::KeystoreManager;
use usg_cert_selector::selection::{CertificateChoice, CertificatePresenter};
use x509_cert::Certificate;

/// Fixed evaluation instant: 2025-06-01T00:00:00Z.
pub fn now() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_748_736_000)
}

/// Certificate validity window as (year, month, day) pairs.
pub type Window = ((i32, u8, u8), (i32, u8, u8));

/// Valid at [`now`].
pub const VALID: Window = ((2024, 1, 1), (2026, 1, 1));
/// Expired before [`now`].
pub const EXPIRED: Window = ((2020, 1, 1), (2021, 1, 1));
/// Not yet valid at [`now`].
pub const FUTURE: Window = ((2030, 1, 1), (2031, 1, 1));
/// Valid at [`now`], expiring three days later.
pub const EXPIRING: Window = ((2024, 1, 1), (2025, 6, 4));

fn params(cn: Option<&str>, window: Window, usages: &[KeyUsagePurpose]) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    if let Some(cn) = cn {
        dn.push(DnType::CommonName, cn);
    }
    dn.push(DnType::OrganizationName, "Selector Test Organization");
    dn.push(DnType::CountryName, "US");
    params.distinguished_name = dn;

    let ((fy, fm, fd), (ty, tm, td)) = window;
    params.not_before = rcgen::date_time_ymd(fy, fm, fd);
    params.not_after = rcgen::date_time_ymd(ty, tm, td);
    params.key_usages = usages.to_vec();
    params
}

fn parse(cert: &rcgen::Certificate) -> Certificate {
    Certificate::from_der(cert.der()).expect("rcgen produced invalid DER")
}

/// Self-signed certificate with subject `CN=cn` and the given window.
pub fn cert(cn: &str, window: Window) -> Certificate {
    let key = KeyPair::generate().expect("key generation");
    let cert = params(Some(cn), window, &[])
        .self_signed(&key)
        .expect("self-signed certificate");
    parse(&cert)
}

/// Valid self-signed certificate.
pub fn valid(cn: &str) -> Certificate {
    cert(cn, VALID)
}

/// Valid self-signed certificate whose subject has no CN.
pub fn without_cn() -> Certificate {
    let key = KeyPair::generate().expect("key generation");
    let cert = params(None, VALID, &[])
        .self_signed(&key)
        .expect("self-signed certificate");
    parse(&cert)
}

/// Valid certificate issued by a CA named `issuer_cn`, with key usages.
pub fn issued(cn: &str, issuer_cn: &str, usages: &[KeyUsagePurpose]) -> Certificate {
    let ca_key = KeyPair::generate().expect("key generation");
    let mut ca_params = params(Some(issuer_cn), VALID, &[]);
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key).expect("CA certificate");

    let key = KeyPair::generate().expect("key generation");
    let cert = params(Some(cn), VALID, usages)
        .signed_by(&key, &ca, &ca_key)
        .expect("issued certificate");
    parse(&cert)
}

/// PEM of a valid self-signed certificate, with its private key PEM.
pub fn pem_with_key(cn: &str) -> (String, String) {
    let key = KeyPair::generate().expect("key generation");
    let cert = params(Some(cn), VALID, &[])
        .self_signed(&key)
        .expect("self-signed certificate");
    (cert.pem(), key.serialize_pem())
}

/// Presenter that records what it was shown and answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedPresenter {
    /// Alias returned from `choose`; `None` cancels.
    pub choice: Option<String>,
    /// Answer to `confirm`.
    pub accept_invalid: bool,
    /// Friendly names of every list shown, in order.
    pub shown: Vec<Vec<String>>,
    /// Every confirmation message.
    pub confirmations: Vec<String>,
}

impl ScriptedPresenter {
    /// Presenter choosing `alias`.
    pub fn choosing(alias: &str) -> Self {
        Self {
            choice: Some(alias.to_string()),
            ..Self::default()
        }
    }

    /// Presenter that cancels.
    pub fn cancelling() -> Self {
        Self::default()
    }

    /// Accept invalid certificates when asked.
    pub fn accepting_invalid(mut self) -> Self {
        self.accept_invalid = true;
        self
    }
}

impl CertificatePresenter for ScriptedPresenter {
    fn choose(
        &mut self,
        choices: &[CertificateChoice],
        _keystore: Option<&dyn KeystoreManager>,
    ) -> Option<String> {
        self.shown
            .push(choices.iter().map(|c| c.name.clone()).collect());
        self.choice.clone()
    }

    fn confirm(&mut self, message: &str, _title: &str) -> bool {
        self.confirmations.push(message.to_string());
        self.accept_invalid
    }
}

/// Owned alias list.
pub fn aliases(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
