//! Integration tests for the mapping engine
//!
//! Each test runs against a fresh in-memory database through the public
//! `Services` container, the way a transport layer would.

use std::sync::Arc;

use identity_mapping::services::ChildMappingSet;
use identity_mapping::{
    BookingSequence, Config, EntityKind, IdPair, Mapping, MappingDb, MappingError, MappingMeta, Services,
};
use identity_mapping::CreateOutcome;

/// Helper to build services over an in-memory database
fn services() -> Services {
    let db = Arc::new(MappingDb::open_in_memory().unwrap());
    Services::new(db, &Config::default()).unwrap()
}

fn note(local: i64, remote: &str, owner: &str) -> Mapping<i64> {
    Mapping::new(EntityKind::CaseNote, local, remote, MappingMeta::legacy_created()).with_owner(owner)
}

fn report(local: i64, remote: &str, owner: &str) -> Mapping<i64> {
    Mapping::new(EntityKind::CaseReport, local, remote, MappingMeta::migrated("run-1")).with_owner(owner)
}

fn remotes<K>(mappings: &[Mapping<K>]) -> Vec<String> {
    let mut remotes: Vec<String> = mappings.iter().map(|m| m.remote_key.clone()).collect();
    remotes.sort();
    remotes
}

#[test]
fn test_benign_replay_keeps_one_row() {
    let services = services();
    let mapping = note(12345, "uuid-A", "A1234BC");

    assert_eq!(services.case_notes.create(mapping.clone()).unwrap(), CreateOutcome::Created);
    assert_eq!(
        services.case_notes.create(mapping.clone()).unwrap(),
        CreateOutcome::AlreadyExists
    );

    assert_eq!(services.case_notes.find_by_owner("A1234BC").unwrap().len(), 1);
    let stored = services.case_notes.get_by_local_key(&12345).unwrap();
    assert_eq!(stored.remote_key, "uuid-A");
    assert!(stored.created_at.is_some());
}

#[test]
fn test_genuine_duplicate_reports_both_sides() {
    let services = services();
    services.case_notes.create(note(12345, "uuid-A", "A1234BC")).unwrap();

    let err = services
        .case_notes
        .create(note(12345, "uuid-B", "A1234BC"))
        .unwrap_err();
    assert_eq!(err.http_status(), 409);
    match err {
        MappingError::DuplicateMapping { incoming, existing } => {
            assert_eq!(existing.remote_key, "uuid-A");
            assert_eq!(incoming.remote_key, "uuid-B");
            assert_eq!(existing.local_key, "12345");
        }
        other => panic!("expected duplicate, got {:?}", other),
    }

    // Nothing was written by the rejected call
    assert!(services.case_notes.get_by_remote_key("uuid-B").is_err());
}

#[test]
fn test_shared_remote_key_with_different_local_key_conflicts() {
    let services = services();
    services.case_notes.create(note(1, "uuid-A", "A1")).unwrap();

    let err = services.case_notes.create(note(2, "uuid-A", "A1")).unwrap_err();
    match err {
        MappingError::DuplicateMapping { incoming, existing } => {
            assert_eq!(existing.local_key, "1");
            assert_eq!(incoming.local_key, "2");
        }
        other => panic!("expected duplicate, got {:?}", other),
    }
}

#[test]
fn test_kinds_are_independent_tables() {
    let services = services();
    services.case_notes.create(note(7, "shared-uuid", "A1")).unwrap();

    let outcome = services
        .locations
        .create(Mapping::new(EntityKind::Location, 7, "shared-uuid", MappingMeta::legacy_created()))
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Created);
}

#[test]
fn test_composite_keys() {
    let services = services();
    let alert = |seq, remote: &str| {
        Mapping::new(EntityKind::Alert, BookingSequence::new(500, seq), remote, MappingMeta::modern_created())
            .with_owner("A1")
    };

    services.alerts.create(alert(1, "alert-1")).unwrap();
    services.alerts.create(alert(2, "alert-2")).unwrap();
    assert_eq!(
        services.alerts.create(alert(1, "alert-1")).unwrap(),
        CreateOutcome::AlreadyExists
    );
    assert!(services.alerts.create(alert(1, "alert-9")).unwrap_err().is_duplicate());

    let found = services.alerts.get_by_local_key(&BookingSequence::new(500, 2)).unwrap();
    assert_eq!(found.remote_key, "alert-2");
}

#[test]
fn test_hierarchical_partial_failure_keeps_earlier_members() {
    let services = services();

    // Another report already owns factor 2
    services
        .case_reports
        .create_with_children(
            report(10, "report-other", "A1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(2, "factor-other")],
            }],
        )
        .unwrap();

    let err = services
        .case_reports
        .create_with_children(
            report(11, "report-P1", "A1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(1, "factor-C1"), IdPair::new(2, "factor-C2")],
            }],
        )
        .unwrap_err();

    match err {
        MappingError::DuplicateMapping { incoming, existing } => {
            assert_eq!(incoming.kind, EntityKind::CaseReportFactor);
            assert_eq!(incoming.remote_key, "factor-C2");
            assert_eq!(existing.remote_key, "factor-other");
        }
        other => panic!("expected duplicate, got {:?}", other),
    }

    assert!(services.case_reports.get_by_remote_key("report-P1").is_ok());
    let children = services.case_reports.find_children("report-P1").unwrap();
    assert_eq!(remotes(&children), vec!["factor-C1".to_string()]);
}

#[test]
fn test_hierarchy_replay_completes_tree() {
    let services = services();
    let sets = || {
        vec![
            ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(1, "factor-1")],
            },
            ChildMappingSet {
                kind: EntityKind::CaseReportPlan,
                ids: vec![IdPair::new(1, "plan-1"), IdPair::new(2, "plan-2")],
            },
        ]
    };

    let first = services
        .case_reports
        .create_with_children(report(1, "report-1", "A1"), sets())
        .unwrap();
    assert_eq!(first.parent, CreateOutcome::Created);
    assert_eq!(first.children_created, 3);

    let replay = services
        .case_reports
        .create_with_children(report(1, "report-1", "A1"), sets())
        .unwrap();
    assert_eq!(replay.parent, CreateOutcome::AlreadyExists);
    assert_eq!(replay.children_replayed, 3);

    let children = services.case_reports.find_children("report-1").unwrap();
    assert!(children.iter().all(|c| c.owner_key.as_deref() == Some("A1")));
}

#[test]
fn test_hierarchy_replay_under_another_owner_is_rejected() {
    let services = services();
    services.case_reports.create(report(1, "report-1", "A1")).unwrap();

    let err = services
        .case_reports
        .create_with_children(
            report(1, "report-1", "B2"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(1, "factor-1")],
            }],
        )
        .unwrap_err();
    assert!(matches!(err, MappingError::Validation(_)));
    assert!(services.case_report_factors.get_by_remote_key("factor-1").is_err());

    // The tree stays whole under one owner after a reassignment
    services
        .case_reports
        .create_with_children(
            report(1, "report-1", "A1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(1, "factor-1")],
            }],
        )
        .unwrap();
    services.case_reports.reassign_owner("A1", "C3").unwrap();
    let factor = services.case_report_factors.get_by_remote_key("factor-1").unwrap();
    assert_eq!(factor.owner_key.as_deref(), Some("C3"));
}

#[test]
fn test_parent_conflict_writes_no_children() {
    let services = services();
    services.case_reports.create(report(1, "report-1", "A1")).unwrap();

    let err = services
        .case_reports
        .create_with_children(
            report(1, "report-X", "A1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportInterview,
                ids: vec![IdPair::new(5, "interview-5")],
            }],
        )
        .unwrap_err();
    assert!(err.is_duplicate());

    assert!(services
        .case_report_interviews
        .get_by_remote_key("interview-5")
        .is_err());
}

#[test]
fn test_deleting_parent_cascades_to_children() {
    let services = services();
    services
        .case_reports
        .create_with_children(
            report(1, "report-1", "A1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportFactor,
                ids: vec![IdPair::new(1, "factor-1"), IdPair::new(2, "factor-2")],
            }],
        )
        .unwrap();

    assert_eq!(services.case_reports.delete_by_local_key(&1).unwrap(), 3);
    assert!(services.case_reports.find_children("report-1").unwrap().is_empty());
}

#[test]
fn test_replace_all_leaves_exactly_the_new_set() {
    let services = services();
    for (local, remote) in [(1, "n-1"), (2, "n-2"), (3, "n-3")] {
        services.case_notes.create(note(local, remote, "A1")).unwrap();
    }
    services.case_notes.create(note(9, "n-9", "B2")).unwrap();

    let outcome = services
        .case_notes
        .replace_all(
            "A1",
            vec![IdPair::new(2, "n-2"), IdPair::new(4, "n-4")],
            MappingMeta::migrated("run-2"),
        )
        .unwrap();
    assert_eq!(outcome.removed, 3);
    assert_eq!(outcome.inserted, 2);

    let owned = services.case_notes.find_by_owner("A1").unwrap();
    assert_eq!(remotes(&owned), vec!["n-2".to_string(), "n-4".to_string()]);
    assert!(owned.iter().all(|m| m.meta.batch_label.as_deref() == Some("run-2")));
    assert_eq!(services.case_notes.find_by_owner("B2").unwrap().len(), 1);
}

#[test]
fn test_replace_conflict_rolls_back_delete() {
    let services = services();
    services.case_notes.create(note(1, "n-1", "A1")).unwrap();
    services.case_notes.create(note(9, "n-9", "B2")).unwrap();

    // local 9 belongs to B2, so the replacement set collides
    let err = services
        .case_notes
        .replace_all("A1", vec![IdPair::new(9, "n-new")], MappingMeta::migrated("run-2"))
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(remotes(&services.case_notes.find_by_owner("A1").unwrap()), vec!["n-1".to_string()]);
}

#[test]
fn test_replace_after_merge_removes_the_merged_owner() {
    let services = services();
    services.case_notes.create(note(1, "n-1", "A1")).unwrap();
    services.case_notes.create(note(2, "n-2", "B2")).unwrap();
    services.case_notes.create(note(3, "n-3", "B2")).unwrap();

    services
        .case_notes
        .replace_after_merge(
            "A1",
            "B2",
            vec![IdPair::new(1, "n-1"), IdPair::new(2, "n-2"), IdPair::new(3, "n-3")],
            MappingMeta::migrated("merge-1"),
        )
        .unwrap();

    assert!(services.case_notes.find_by_owner("B2").unwrap().is_empty());
    let owned = services.case_notes.find_by_owner("A1").unwrap();
    assert_eq!(
        remotes(&owned),
        vec!["n-1".to_string(), "n-2".to_string(), "n-3".to_string()]
    );
}

#[test]
fn test_merge_into_itself_is_rejected() {
    let services = services();
    let err = services
        .case_notes
        .replace_after_merge("A1", "A1", vec![], MappingMeta::migrated("merge-1"))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[test]
fn test_reassign_owner_moves_every_row() {
    let services = services();
    for (local, remote) in [(1, "n-1"), (2, "n-2"), (3, "n-3")] {
        services.case_notes.create(note(local, remote, "O1")).unwrap();
    }

    assert_eq!(services.case_notes.reassign_owner("O1", "O2").unwrap(), 3);
    assert_eq!(services.case_notes.find_by_owner("O2").unwrap().len(), 3);
    assert!(services.case_notes.find_by_owner("O1").unwrap().is_empty());
}

#[test]
fn test_reassign_owner_carries_children() {
    let services = services();
    services
        .case_reports
        .create_with_children(
            report(1, "report-1", "O1"),
            vec![ChildMappingSet {
                kind: EntityKind::CaseReportPlan,
                ids: vec![IdPair::new(1, "plan-1")],
            }],
        )
        .unwrap();

    services.case_reports.reassign_owner("O1", "O2").unwrap();

    let children = services.case_reports.find_children("report-1").unwrap();
    assert_eq!(children[0].owner_key.as_deref(), Some("O2"));
    assert_eq!(services.case_reports.delete_by_owner("O2").unwrap(), 2);
}

#[test]
fn test_reset_is_guarded() {
    let db = Arc::new(MappingDb::open_in_memory().unwrap());
    let guarded = Services::new(db.clone(), &Config::default()).unwrap();
    guarded.case_notes.create(note(1, "n-1", "A1")).unwrap();
    assert!(matches!(guarded.reset_all(), Err(MappingError::Validation(_))));

    let config = Config {
        allow_reset: true,
        ..Default::default()
    };
    let open = Services::new(db, &config).unwrap();
    assert_eq!(open.reset_all().unwrap(), 1);
    assert_eq!(open.db.stats().unwrap().total_mappings, 0);
}
