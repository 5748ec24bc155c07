//! End-to-end certificate selection.

mod common;

use common::{aliases, now, ScriptedPresenter};
use usg_cert_selector::config::SelectorConfig;
use usg_cert_selector::error::{KeystoreError, SelectorError};
use usg_cert_selector::filter::SubjectCnFilter;
use usg_cert_selector::keystore::{MemoryEntry, MemoryKeystore};
use usg_cert_selector::selection::{select_alias, SelectionOutcome, SelectionRequest};

fn request() -> SelectionRequest {
    SelectionRequest::new().check_private_keys(false).at(now())
}

fn store_with(names: &[(&str, &str)]) -> MemoryKeystore {
    let mut store = MemoryKeystore::new();
    for (alias, cn) in names {
        store.insert(MemoryEntry::trusted(*alias, common::valid(cn)));
    }
    store
}

#[test]
fn test_choices_are_sorted_case_insensitively() {
    let store = store_with(&[("z", "Zeta"), ("a", "alpha"), ("b", "Beta")]);
    let mut presenter = ScriptedPresenter::choosing("b");

    let selected = select_alias(&request(), Some(&store), &mut presenter).unwrap();

    assert_eq!(selected, "b");
    assert_eq!(presenter.shown, vec![vec!["alpha", "Beta", "Zeta"]]);
}

#[test]
fn test_mandatory_with_single_filtered_match_skips_presenter() {
    let store = store_with(&[("a1", "Alice"), ("a2", "Bob")]);
    let mut presenter = ScriptedPresenter::cancelling();

    let request = request()
        .mandatory(true)
        .filter(SubjectCnFilter::new("bob"));
    let selected = select_alias(&request, Some(&store), &mut presenter).unwrap();

    assert_eq!(selected, "a2");
    assert!(presenter.shown.is_empty());
}

#[test]
fn test_mandatory_does_not_fail_on_ambiguity() {
    let store = store_with(&[("a1", "Alice"), ("a2", "Bob")]);
    let mut presenter = ScriptedPresenter::choosing("a1");

    let selected = select_alias(&request().mandatory(true), Some(&store), &mut presenter).unwrap();

    assert_eq!(selected, "a1");
    assert_eq!(presenter.shown.len(), 1);
}

#[test]
fn test_empty_alias_list_is_no_entries() {
    let store = store_with(&[("a1", "Alice")]);
    let mut presenter = ScriptedPresenter::cancelling();

    let request = request().aliases(Vec::<String>::new());
    let err = select_alias(&request, Some(&store), &mut presenter).unwrap_err();

    assert!(matches!(err, SelectorError::NoEntries));
    assert!(err.is_not_found());
}

#[test]
fn test_everything_filtered_is_no_valid_entries() {
    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("a1", common::cert("Old", common::EXPIRED)));
    let mut presenter = ScriptedPresenter::cancelling();

    let result = select_alias(&request(), Some(&store), &mut presenter);

    assert!(matches!(result, Err(SelectorError::NoValidEntries)));
    assert_eq!(
        SelectionOutcome::from_result(result).unwrap(),
        SelectionOutcome::NotFound
    );
}

#[test]
fn test_explicit_aliases_restrict_the_store() {
    let store = store_with(&[("a1", "Alice"), ("a2", "Bob"), ("a3", "Carol")]);
    let mut presenter = ScriptedPresenter::choosing("a3");

    let request = request().aliases(aliases(&["a3", "a1"]));
    select_alias(&request, Some(&store), &mut presenter).unwrap();

    assert_eq!(presenter.shown, vec![vec!["Alice", "Carol"]]);
}

#[test]
fn test_cancel_propagates() {
    let store = store_with(&[("a1", "Alice"), ("a2", "Bob")]);
    let mut presenter = ScriptedPresenter::cancelling();

    let err = select_alias(&request(), Some(&store), &mut presenter).unwrap_err();
    assert!(err.is_user_cancellation());
}

#[test]
fn test_locked_store_is_store_unusable() {
    let store = MemoryKeystore::new().with_entry(
        MemoryEntry::trusted("card", common::valid("Card")).failing_certificate(KeystoreError::Locked),
    );
    let mut presenter = ScriptedPresenter::choosing("card");

    let err = select_alias(&request(), Some(&store), &mut presenter).unwrap_err();

    assert!(matches!(
        err,
        SelectorError::StoreUnusable(KeystoreError::Locked)
    ));
    assert!(presenter.shown.is_empty());
}

#[test]
fn test_invalid_choice_requires_confirmation() {
    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("old", common::cert("Old", common::EXPIRED)))
        .with_entry(MemoryEntry::trusted("new", common::valid("New")));
    let request = request().show_expired(true);

    let mut refusing = ScriptedPresenter::choosing("old");
    let err = select_alias(&request, Some(&store), &mut refusing).unwrap_err();
    assert!(err.is_user_cancellation());
    assert_eq!(refusing.confirmations.len(), 1);
    assert!(refusing.confirmations[0].contains("expired"));

    let mut accepting = ScriptedPresenter::choosing("old").accepting_invalid();
    assert_eq!(
        select_alias(&request, Some(&store), &mut accepting).unwrap(),
        "old"
    );

    let mut valid = ScriptedPresenter::choosing("new");
    assert_eq!(select_alias(&request, Some(&store), &mut valid).unwrap(), "new");
    assert!(valid.confirmations.is_empty());
}

#[test]
fn test_not_yet_valid_choice_message() {
    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("later", common::cert("Later", common::FUTURE)))
        .with_entry(MemoryEntry::trusted("now", common::valid("Now")));
    let mut presenter = ScriptedPresenter::choosing("later");

    let request = request().show_expired(true);
    let _ = select_alias(&request, Some(&store), &mut presenter);

    assert_eq!(presenter.confirmations.len(), 1);
    assert!(presenter.confirmations[0].contains("not valid yet"));
}

#[test]
fn test_validity_not_checked_when_disabled() {
    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("old", common::cert("Old", common::EXPIRED)))
        .with_entry(MemoryEntry::trusted("new", common::valid("New")));
    let mut presenter = ScriptedPresenter::choosing("old");

    let request = request().show_expired(true).check_validity(false);
    assert_eq!(
        select_alias(&request, Some(&store), &mut presenter).unwrap(),
        "old"
    );
    assert!(presenter.confirmations.is_empty());
}

#[test]
fn test_private_key_check_from_config() {
    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("ca", common::valid("Root CA")))
        .with_entry(MemoryEntry::with_private_key(
            "mine",
            common::valid("My Identity"),
            "0000",
        ));
    let mut presenter = ScriptedPresenter::cancelling();

    let config = SelectorConfig::from_toml("[selection]\nmandatory = true\n").unwrap();
    let request = SelectionRequest::from_config(&config).at(now());

    assert!(request.is_mandatory());
    assert_eq!(
        select_alias(&request, Some(&store), &mut presenter).unwrap(),
        "mine"
    );
}

#[test]
fn test_choices_carry_certificates() {
    use usg_cert_selector::certificate::ExpiryStatus;
    use usg_cert_selector::keystore::KeystoreManager;
    use usg_cert_selector::selection::{CertificateChoice, CertificatePresenter};

    struct Inspecting(Vec<(String, ExpiryStatus, Option<String>)>);

    impl CertificatePresenter for Inspecting {
        fn choose(
            &mut self,
            choices: &[CertificateChoice],
            _keystore: Option<&dyn KeystoreManager>,
        ) -> Option<String> {
            for choice in choices {
                self.0.push((
                    choice.alias.clone(),
                    choice.expiry_status(now(), std::time::Duration::from_secs(7 * 86_400)),
                    choice.issuer_name(),
                ));
            }
            None
        }

        fn confirm(&mut self, _message: &str, _title: &str) -> bool {
            false
        }
    }

    let store = MemoryKeystore::new()
        .with_entry(MemoryEntry::trusted("soon", common::cert("Soon", common::EXPIRING)))
        .with_entry(MemoryEntry::trusted("fine", common::valid("Fine")));
    let mut presenter = Inspecting(Vec::new());

    let _ = select_alias(&request(), Some(&store), &mut presenter);

    assert_eq!(
        presenter.0,
        vec![
            ("fine".to_string(), ExpiryStatus::Valid, Some("Fine".to_string())),
            (
                "soon".to_string(),
                ExpiryStatus::ExpiringSoon,
                Some("Soon".to_string())
            ),
        ]
    );
}
