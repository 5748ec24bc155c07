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

//! Certificate Selection Command-Line Tool
//!
//! # Usage
//!
//! ```text
//! cert-select [OPTIONS] <COMMAND>
//!
//! Commands:
//!   locate-driver    Find the installed PKCS#11 token driver
//!   provider-config  Print the PKCS#11 provider configuration
//!   list             List usable certificates
//!   select           Choose a certificate interactively
//!   config           Configuration management
//!
//! Options:
//!   -c, --config <PATH>   Path to configuration file
//!   -v, --verbose         Enable verbose output
//!   -q, --quiet           Suppress non-error output
//!       --json-logs       Emit logs as JSON
//!   -h, --help            Print help
//!   -V, --version         Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Show the PKCS#11 configuration for the detected driver
//! cert-select provider-config --slot 0
//!
//! # List certificates with a private key from a directory of PEM files
//! cert-select list --store ~/certs --keys
//!
//! # Pick a signing certificate
//! cert-select select --store ~/certs --subject "jane"
//! ```

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use usg_cert_selector::certificate::{format_date, issuer_common_name, key_usage_summary, ExpiryStatus};
use usg_cert_selector::config::SelectorConfig;
use usg_cert_selector::filter::{IssuerCnFilter, SubjectCnFilter};
use usg_cert_selector::keystore::{KeystoreManager, MemoryKeystore};
use usg_cert_selector::logging::{self, LogLevel};
use usg_cert_selector::resolver::AliasResolver;
use usg_cert_selector::selection::{
    select_alias, CertificateChoice, CertificatePresenter, SelectionOutcome, SelectionRequest,
};
use usg_cert_selector::{Platform, Result, SelectorError};

/// Certificate Selection Command-Line Tool
#[derive(Parser)]
#[command(name = "cert-select")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Select certificates from smart cards, tokens and software stores", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where certificates are read from.
#[derive(clap::Args)]
struct StoreArgs {
    /// Certificate file or directory (PEM or DER); repeatable
    #[arg(long, value_name = "PATH")]
    store: Vec<PathBuf>,

    /// Read certificates from the PKCS#11 token instead (needs the `pkcs11` feature)
    #[arg(long)]
    token: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the installed PKCS#11 token driver
    LocateDriver {
        /// Platform to search for (windows, macos, linux)
        #[arg(long)]
        platform: Option<String>,

        /// Print every candidate path instead of the first existing one
        #[arg(long)]
        candidates: bool,
    },

    /// Print the PKCS#11 provider configuration
    ProviderConfig {
        /// Driver path (default: configured or detected driver)
        #[arg(long, value_name = "PATH")]
        library: Option<String>,

        /// Provider name
        #[arg(long)]
        name: Option<String>,

        /// Token slot
        #[arg(long)]
        slot: Option<u64>,
    },

    /// List usable certificates
    List {
        #[command(flatten)]
        source: StoreArgs,

        /// Include expired and not yet valid certificates
        #[arg(long)]
        all: bool,

        /// Only certificates with a private key
        #[arg(long)]
        keys: bool,
    },

    /// Choose a certificate interactively
    Select {
        #[command(flatten)]
        source: StoreArgs,

        /// Accept certificates whose subject CN contains this text; repeatable
        #[arg(long, value_name = "TEXT")]
        subject: Vec<String>,

        /// Accept certificates issued by this CN; repeatable
        #[arg(long, value_name = "CN")]
        issuer: Vec<String>,

        /// Pick the only match without asking
        #[arg(long)]
        mandatory: bool,

        /// Include expired and not yet valid certificates
        #[arg(long)]
        all: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate configuration file
    Validate,

    /// Display effective configuration
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LogLevel::Error
    } else if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    if let Err(e) = logging::init(level, cli.json_logs) {
        eprintln!("Warning: {}", e);
    }

    match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => SelectorConfig::load(path)?,
        None => SelectorConfig::default(),
    };

    match cli.command {
        Commands::LocateDriver {
            platform,
            candidates,
        } => cmd_locate_driver(&config, platform.as_deref(), candidates),
        Commands::ProviderConfig {
            library,
            name,
            slot,
        } => cmd_provider_config(&config, library, name, slot),
        Commands::List { source, all, keys } => cmd_list(&config, &source, all, keys),
        Commands::Select {
            source,
            subject,
            issuer,
            mandatory,
            all,
        } => cmd_select(&config, &source, subject, issuer, mandatory, all),
        Commands::Config { action } => cmd_config(&cli.config, &config, action),
    }
}

fn parse_platform(platform: Option<&str>) -> Result<Platform> {
    match platform {
        None => Ok(Platform::current()),
        Some(name) => Platform::parse(name)
            .ok_or_else(|| SelectorError::config(format!("unknown platform '{name}'"))),
    }
}

fn cmd_locate_driver(
    config: &SelectorConfig,
    platform: Option<&str>,
    candidates: bool,
) -> Result<ExitCode> {
    let platform = parse_platform(platform)?;
    let locator = config.pkcs11.driver_locator();

    if candidates {
        for path in locator.candidates(platform) {
            println!("{}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let driver = locator.locate(platform)?;
    println!("{}", driver.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_provider_config(
    config: &SelectorConfig,
    library: Option<String>,
    name: Option<String>,
    slot: Option<u64>,
) -> Result<ExitCode> {
    let mut pkcs11 = config.pkcs11.clone();
    if name.is_some() {
        pkcs11.provider_name = name;
    }
    if slot.is_some() {
        pkcs11.slot = slot;
    }

    let library = match library {
        Some(library) => library,
        None => pkcs11.resolve_library(Platform::current())?,
    };

    print!("{}", pkcs11.provider_config(&library).render());
    Ok(ExitCode::SUCCESS)
}

#[cfg(feature = "pkcs11")]
fn open_token(
    config: &SelectorConfig,
    source: &StoreArgs,
) -> Result<Option<Box<dyn KeystoreManager>>> {
    use usg_cert_selector::pkcs11::token::Pkcs11Keystore;

    if !source.token {
        return Ok(None);
    }
    let library = config.pkcs11.resolve_library(Platform::current())?;
    let store = Pkcs11Keystore::open(&library, config.pkcs11.slot)?;
    Ok(Some(Box::new(store)))
}

#[cfg(not(feature = "pkcs11"))]
fn open_token(
    _config: &SelectorConfig,
    source: &StoreArgs,
) -> Result<Option<Box<dyn KeystoreManager>>> {
    if source.token {
        return Err(SelectorError::config(
            "--token needs cert-select built with the pkcs11 feature",
        ));
    }
    Ok(None)
}

fn open_store(config: &SelectorConfig, source: &StoreArgs) -> Result<Box<dyn KeystoreManager>> {
    if let Some(token) = open_token(config, source)? {
        return Ok(token);
    }

    if source.store.is_empty() {
        return Err(SelectorError::config("no certificate store given (use --store)"));
    }

    let mut store = MemoryKeystore::new();
    for path in &source.store {
        if path.is_dir() {
            store.load_dir(path)?;
        } else {
            store.load_file(path)?;
        }
    }
    Ok(Box::new(store))
}

fn cmd_list(
    config: &SelectorConfig,
    source: &StoreArgs,
    all: bool,
    keys: bool,
) -> Result<ExitCode> {
    let store = open_store(config, source)?;
    let aliases = store.aliases()?;
    let names = AliasResolver::new(Some(store.as_ref()))
        .check_private_keys(keys)
        .show_expired(all || config.selection.show_expired)
        .resolve(&aliases)?;

    let now = SystemTime::now();
    let warning = config.display.expiry_warning();
    for (alias, name) in names.iter() {
        let Ok(Some(cert)) = store.certificate(alias) else {
            continue;
        };
        let validity = &cert.tbs_certificate.validity;
        println!("{name}");
        println!("  Alias:     {alias}");
        if let Some(issuer) = issuer_common_name(&cert) {
            println!("  Issuer:    {issuer}");
        }
        println!(
            "  Valid:     {} - {} ({})",
            format_date(&validity.not_before),
            format_date(&validity.not_after),
            ExpiryStatus::of(&cert, now, warning)
        );
        println!("  Key usage: {}", key_usage_summary(&cert));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_select(
    config: &SelectorConfig,
    source: &StoreArgs,
    subject: Vec<String>,
    issuer: Vec<String>,
    mandatory: bool,
    all: bool,
) -> Result<ExitCode> {
    let store = open_store(config, source)?;

    let mut request = SelectionRequest::from_config(config);
    if mandatory {
        request = request.mandatory(true);
    }
    if all {
        request = request.show_expired(true);
    }
    for fragment in subject {
        request = request.filter(SubjectCnFilter::new(fragment));
    }
    for cn in issuer {
        request = request.filter(IssuerCnFilter::new(cn));
    }

    let mut presenter = TerminalPresenter::new(config.display.expiry_warning());
    let outcome = SelectionOutcome::from_result(select_alias(
        &request,
        Some(store.as_ref()),
        &mut presenter,
    ))?;

    match outcome {
        SelectionOutcome::Selected(alias) => {
            println!("{alias}");
            Ok(ExitCode::SUCCESS)
        }
        SelectionOutcome::Cancelled => {
            eprintln!("Selection cancelled");
            Ok(ExitCode::from(2))
        }
        SelectionOutcome::NotFound => {
            eprintln!("No usable certificate found");
            Ok(ExitCode::from(3))
        }
    }
}

fn cmd_config(
    path: &Option<PathBuf>,
    config: &SelectorConfig,
    action: ConfigAction,
) -> Result<ExitCode> {
    match action {
        ConfigAction::Validate => {
            config.validate()?;
            match path {
                Some(path) => println!("{}: OK", path.display()),
                None => println!("defaults: OK"),
            }
        }
        ConfigAction::Show => print!("{}", config.to_toml()?),
    }
    Ok(ExitCode::SUCCESS)
}

/// Numbered list on stderr, answers read from stdin.
struct TerminalPresenter {
    warning: std::time::Duration,
}

impl TerminalPresenter {
    fn new(warning: std::time::Duration) -> Self {
        Self { warning }
    }

    fn read_line() -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl CertificatePresenter for TerminalPresenter {
    fn choose(
        &mut self,
        choices: &[CertificateChoice],
        _keystore: Option<&dyn KeystoreManager>,
    ) -> Option<String> {
        let now = SystemTime::now();
        let mut err = io::stderr().lock();
        for (i, choice) in choices.iter().enumerate() {
            let marker = match choice.expiry_status(now, self.warning) {
                ExpiryStatus::Invalid => " [invalid]",
                ExpiryStatus::ExpiringSoon => " [expires soon]",
                ExpiryStatus::Valid => "",
            };
            let issuer = choice
                .issuer_name()
                .map(|i| format!(" (issued by {i})"))
                .unwrap_or_default();
            let _ = writeln!(err, "{:>3}) {}{}{}", i + 1, choice.name, issuer, marker);
        }

        loop {
            let _ = write!(err, "Select a certificate [1-{}, q to cancel]: ", choices.len());
            let _ = err.flush();
            let answer = Self::read_line()?;
            if answer.eq_ignore_ascii_case("q") || answer.is_empty() {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => {
                    return Some(choices[n - 1].alias.clone());
                }
                _ => {
                    let _ = writeln!(err, "Please enter a number between 1 and {}", choices.len());
                }
            }
        }
    }

    fn confirm(&mut self, message: &str, title: &str) -> bool {
        let mut err = io::stderr().lock();
        let _ = write!(err, "{title}: {message} [y/N] ");
        let _ = err.flush();
        matches!(
            Self::read_line().as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y") | Some("yes")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_select() {
        let cli = Cli::try_parse_from([
            "cert-select",
            "select",
            "--store",
            "/tmp/certs",
            "--subject",
            "jane",
            "--mandatory",
        ])
        .unwrap();
        match cli.command {
            Commands::Select {
                source,
                subject,
                mandatory,
                ..
            } => {
                assert_eq!(source.store, vec![PathBuf::from("/tmp/certs")]);
                assert!(!source.token);
                assert_eq!(subject, vec!["jane".to_string()]);
                assert!(mandatory);
            }
            _ => panic!("expected select command"),
        }
    }

    #[test]
    fn test_missing_store_is_reported() {
        let source = StoreArgs {
            store: Vec::new(),
            token: false,
        };
        let Err(err) = open_store(&SelectorConfig::default(), &source) else {
            panic!("store opened without a source");
        };
        assert!(err.to_string().contains("--store"));
    }

    #[cfg(not(feature = "pkcs11"))]
    #[test]
    fn test_token_without_feature_is_rejected() {
        let cli = Cli::try_parse_from(["cert-select", "list", "--token"]).unwrap();
        let Commands::List { source, .. } = cli.command else {
            panic!("expected list command");
        };
        let Err(err) = open_store(&SelectorConfig::default(), &source) else {
            panic!("token opened without the pkcs11 feature");
        };
        assert!(matches!(err, SelectorError::Config(_)));
        assert!(err.to_string().contains("pkcs11 feature"));
    }
}
