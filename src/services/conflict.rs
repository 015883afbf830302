//! Conflict resolution for rejected inserts

use diesel::SqliteConnection;
use tracing::trace;

use crate::error::MappingError;
use crate::mapping::{LocalKey, MappingRecord};
use crate::store::MappingStore;

/// Finds the stored row behind a uniqueness failure
pub struct ConflictResolver;

impl ConflictResolver {
    /// Locate the row `candidate` collided with.
    ///
    /// Either key's constraint may have fired, so the legacy key is tried
    /// first and the modern key second. `None` means the collision could
    /// not be reproduced, e.g. the row was deleted since the insert failed.
    pub fn find_colliding<S: MappingStore>(
        store: &S,
        conn: &mut SqliteConnection,
        candidate: &S::Record,
    ) -> Result<Option<S::Record>, MappingError> {
        if let Some(existing) = store.find_by_local_key(conn, candidate.local_key())? {
            trace!(kind = %store.kind(), remote = %existing.remote_key(), "Collision found by local key");
            return Ok(Some(existing));
        }

        let existing = store.find_by_remote_key(conn, candidate.remote_key())?;
        if let Some(existing) = &existing {
            trace!(kind = %store.kind(), local = %existing.local_key().encode(), "Collision found by remote key");
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MappingDb;
    use crate::mapping::{EntityKind, Mapping, MappingMeta};
    use crate::store::FamilyStore;

    #[test]
    fn test_resolves_by_either_key() {
        let db = MappingDb::open_in_memory().unwrap();
        let store = FamilyStore::<i64>::new(EntityKind::Location).unwrap();
        let stored = Mapping::new(EntityKind::Location, 7_i64, "loc-7", MappingMeta::legacy_created());

        db.with_conn(|conn| {
            store.insert(conn, &stored)?;

            let same_local = Mapping::new(EntityKind::Location, 7_i64, "loc-x", MappingMeta::legacy_created());
            let found = ConflictResolver::find_colliding(&store, conn, &same_local)?.unwrap();
            assert_eq!(found.remote_key, "loc-7");

            let same_remote = Mapping::new(EntityKind::Location, 8_i64, "loc-7", MappingMeta::legacy_created());
            let found = ConflictResolver::find_colliding(&store, conn, &same_remote)?.unwrap();
            assert_eq!(found.local_key, 7);

            let unrelated = Mapping::new(EntityKind::Location, 9_i64, "loc-9", MappingMeta::legacy_created());
            assert!(ConflictResolver::find_colliding(&store, conn, &unrelated)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
