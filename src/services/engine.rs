//! Idempotent create shared by every mapping family
//!
//! A uniqueness failure is never interpreted on its own. The colliding row is
//! re-read and compared with the incoming one:
//!
//! - same local and remote key: a replayed request, reported as
//!   [`CreateOutcome::AlreadyExists`] with nothing written
//! - anything else: [`MappingError::DuplicateMapping`] carrying both rows
//! - no row found: logged and re-raised as the storage error

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::conflict::ConflictResolver;
use super::events::{EventBus, MappingEvent};
use crate::error::MappingError;
use crate::mapping::{LocalKey, MappingRecord};
use crate::store::MappingStore;

/// Result of a successful create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateOutcome {
    Created,
    /// An identical row was already stored
    AlreadyExists,
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created)
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CreateOutcome::Created => 201,
            CreateOutcome::AlreadyExists => 200,
        }
    }
}

/// Insert `record` through `store`, resolving any uniqueness failure.
pub fn create_in<S: MappingStore>(
    store: &S,
    conn: &mut SqliteConnection,
    record: &S::Record,
) -> Result<CreateOutcome, MappingError> {
    let violation = match store.insert(conn, record) {
        Ok(()) => {
            debug!(
                kind = %store.kind(),
                local = %record.local_key().encode(),
                remote = %record.remote_key(),
                "Mapping created"
            );
            return Ok(CreateOutcome::Created);
        }
        Err(MappingError::UniqueViolation(message)) => message,
        Err(e) => return Err(e),
    };

    match ConflictResolver::find_colliding(store, conn, record)? {
        Some(existing) if existing.same_identity(record) => {
            debug!(
                kind = %store.kind(),
                local = %record.local_key().encode(),
                remote = %record.remote_key(),
                "Replayed create, mapping already stored"
            );
            Ok(CreateOutcome::AlreadyExists)
        }
        Some(existing) => {
            let incoming = record.snapshot();
            let existing = existing.snapshot();
            warn!(incoming = %incoming, existing = %existing, "Duplicate mapping rejected");
            Err(MappingError::duplicate(incoming, existing))
        }
        None => {
            error!(
                kind = %store.kind(),
                local = %record.local_key().encode(),
                remote = %record.remote_key(),
                violation = %violation,
                "Unique violation but no colliding mapping found"
            );
            Err(MappingError::UniqueViolation(violation))
        }
    }
}

/// Publish the event matching a create result
pub(crate) fn publish_create<R: MappingRecord>(
    events: &EventBus,
    record: &R,
    result: &Result<CreateOutcome, MappingError>,
) {
    let event = match result {
        Ok(CreateOutcome::Created) => MappingEvent::Created {
            kind: record.kind(),
            local_key: record.local_key().encode(),
            remote_key: record.remote_key().to_string(),
        },
        Ok(CreateOutcome::AlreadyExists) => MappingEvent::Replayed {
            kind: record.kind(),
            local_key: record.local_key().encode(),
            remote_key: record.remote_key().to_string(),
        },
        Err(MappingError::DuplicateMapping { incoming, existing }) => MappingEvent::DuplicateRejected {
            incoming: (**incoming).clone(),
            existing: (**existing).clone(),
        },
        Err(_) => return,
    };
    events.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MappingDb;
    use crate::mapping::{BookingSequence, EntityKind, Mapping, MappingMeta, Provenance};
    use crate::store::FamilyStore;

    /// Rejects every insert yet never finds the row it clashed with,
    /// like a colliding row deleted between the insert and the re-read
    struct VanishingClashStore;

    const VIOLATION: &str = "UNIQUE constraint failed: identity_mappings.remote_key";

    impl MappingStore for VanishingClashStore {
        type Record = Mapping<i64>;

        fn kind(&self) -> EntityKind {
            EntityKind::CaseNote
        }

        fn insert(&self, _conn: &mut SqliteConnection, _record: &Mapping<i64>) -> Result<(), MappingError> {
            Err(MappingError::UniqueViolation(VIOLATION.to_string()))
        }

        fn find_by_local_key(&self, _conn: &mut SqliteConnection, _local_key: &i64) -> Result<Option<Mapping<i64>>, MappingError> {
            Ok(None)
        }

        fn find_by_remote_key(&self, _conn: &mut SqliteConnection, _remote_key: &str) -> Result<Option<Mapping<i64>>, MappingError> {
            Ok(None)
        }

        fn delete_by_local_key(&self, _conn: &mut SqliteConnection, _local_key: &i64) -> Result<usize, MappingError> {
            Ok(0)
        }

        fn delete_by_remote_key(&self, _conn: &mut SqliteConnection, _remote_key: &str) -> Result<usize, MappingError> {
            Ok(0)
        }

        fn find_page_by_batch_label(
            &self,
            _conn: &mut SqliteConnection,
            _batch_label: &str,
            _offset: i64,
            _limit: i64,
        ) -> Result<Vec<Mapping<i64>>, MappingError> {
            Ok(Vec::new())
        }

        fn count_by_batch_label_and_provenance(
            &self,
            _conn: &mut SqliteConnection,
            _batch_label: &str,
            _provenance: Provenance,
        ) -> Result<i64, MappingError> {
            Ok(0)
        }

        fn find_latest_migrated(&self, _conn: &mut SqliteConnection) -> Result<Option<Mapping<i64>>, MappingError> {
            Ok(None)
        }
    }

    fn note(local: i64, remote: &str) -> Mapping<i64> {
        Mapping::new(EntityKind::CaseNote, local, remote, MappingMeta::legacy_created()).with_owner("A1234BC")
    }

    #[test]
    fn test_replay_is_benign() {
        let db = MappingDb::open_in_memory().unwrap();
        let store = FamilyStore::<i64>::new(EntityKind::CaseNote).unwrap();

        db.with_conn(|conn| {
            assert_eq!(create_in(&store, conn, &note(12345, "uuid-A"))?, CreateOutcome::Created);
            assert_eq!(create_in(&store, conn, &note(12345, "uuid-A"))?, CreateOutcome::AlreadyExists);
            assert_eq!(store.find_by_owner_key(conn, "A1234BC")?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_replay_with_different_metadata_is_still_benign() {
        let db = MappingDb::open_in_memory().unwrap();
        let store = FamilyStore::<i64>::new(EntityKind::CaseNote).unwrap();

        db.with_conn(|conn| {
            create_in(&store, conn, &note(1, "uuid-1"))?;
            let mut replay = note(1, "uuid-1");
            replay.meta = MappingMeta::migrated("2024-05-01T09:00:00");
            assert_eq!(create_in(&store, conn, &replay)?, CreateOutcome::AlreadyExists);

            let stored = store.find_by_remote_key(conn, "uuid-1")?.unwrap();
            assert_eq!(stored.meta, MappingMeta::legacy_created());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_genuine_duplicate_carries_both_sides() {
        let db = MappingDb::open_in_memory().unwrap();
        let store = FamilyStore::<i64>::new(EntityKind::CaseNote).unwrap();

        let err = db
            .with_conn(|conn| {
                create_in(&store, conn, &note(12345, "uuid-A"))?;
                create_in(&store, conn, &note(12345, "uuid-B"))
            })
            .unwrap_err();

        match err {
            MappingError::DuplicateMapping { incoming, existing } => {
                assert_eq!(existing.remote_key, "uuid-A");
                assert_eq!(incoming.remote_key, "uuid-B");
                assert!(existing.created_at.is_some());
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[test]
    fn test_composite_key_compares_every_field() {
        let db = MappingDb::open_in_memory().unwrap();
        let store = FamilyStore::<BookingSequence>::new(EntityKind::Alert).unwrap();
        let alert = |seq: i32, remote: &str| {
            Mapping::new(EntityKind::Alert, BookingSequence::new(100, seq), remote, MappingMeta::modern_created())
                .with_owner("A1234BC")
        };

        db.with_conn(|conn| {
            create_in(&store, conn, &alert(1, "alert-1"))?;
            assert_eq!(create_in(&store, conn, &alert(1, "alert-1"))?, CreateOutcome::AlreadyExists);
            assert_eq!(create_in(&store, conn, &alert(2, "alert-2"))?, CreateOutcome::Created);

            let err = create_in(&store, conn, &alert(3, "alert-1")).unwrap_err();
            assert!(err.is_duplicate());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unresolved_violation_is_reraised() {
        let db = MappingDb::open_in_memory().unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let record = note(12345, "uuid-A");

        let result = db.with_conn(|conn| Ok(create_in(&VanishingClashStore, conn, &record))).unwrap();
        publish_create(&events, &record, &result);

        match result {
            Err(MappingError::UniqueViolation(message)) => assert_eq!(message, VIOLATION),
            other => panic!("expected unique violation, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
