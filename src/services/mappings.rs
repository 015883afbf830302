//! Mapping service - the identity mapping engine for one entity family
//!
//! Wraps a [`FamilyStore`] with validation, idempotent creates, hierarchical
//! creates, owner-wide replacement and owner reassignment.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::engine::{create_in, publish_create, CreateOutcome};
use super::events::{EventBus, MappingEvent};
use crate::db::MappingDb;
use crate::error::MappingError;
use crate::mapping::{EntityKind, IdPair, LocalKey, Mapping, MappingMeta};
use crate::store::{FamilyStore, MappingStore};

/// Children of one kind to attach under a parent mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildMappingSet {
    pub kind: EntityKind,
    pub ids: Vec<IdPair<i64>>,
}

/// Result of a hierarchical create that wrote every member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyOutcome {
    pub parent: CreateOutcome,
    pub children_created: usize,
    pub children_replayed: usize,
}

/// Result of a batch create for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub created: usize,
    pub replayed: usize,
}

impl BatchOutcome {
    fn record(&mut self, outcome: CreateOutcome) {
        match outcome {
            CreateOutcome::Created => self.created += 1,
            CreateOutcome::AlreadyExists => self.replayed += 1,
        }
    }
}

/// Result of replacing an owner's mapping set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceOutcome {
    pub removed: usize,
    pub inserted: usize,
}

/// Engine for one mapping family
pub struct MappingService<K: LocalKey> {
    db: Arc<MappingDb>,
    store: FamilyStore<K>,
    events: Arc<EventBus>,
}

impl<K: LocalKey> MappingService<K> {
    pub fn new(db: Arc<MappingDb>, kind: EntityKind, events: Arc<EventBus>) -> Result<Self, MappingError> {
        Ok(Self {
            db,
            store: FamilyStore::new(kind)?,
            events,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.store.kind()
    }

    pub fn store(&self) -> &FamilyStore<K> {
        &self.store
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_by_local_key(&self, local_key: &K) -> Result<Mapping<K>, MappingError> {
        self.db
            .with_conn(|conn| self.store.find_by_local_key(conn, local_key))?
            .ok_or_else(|| MappingError::not_found(format!("{} local key {}", self.kind(), local_key.encode())))
    }

    pub fn get_by_remote_key(&self, remote_key: &str) -> Result<Mapping<K>, MappingError> {
        self.db
            .with_conn(|conn| self.store.find_by_remote_key(conn, remote_key))?
            .ok_or_else(|| MappingError::not_found(format!("{} remote key {}", self.kind(), remote_key)))
    }

    pub fn find_by_owner(&self, owner_key: &str) -> Result<Vec<Mapping<K>>, MappingError> {
        self.db.with_conn(|conn| self.store.find_by_owner_key(conn, owner_key))
    }

    /// Children of every kind attached to one parent
    pub fn find_children(&self, parent_remote_key: &str) -> Result<Vec<Mapping<i64>>, MappingError> {
        self.require_parent_kind()?;
        self.db.with_conn(|conn| self.store.find_children(conn, parent_remote_key))
    }

    // =========================================================================
    // Create Operations
    // =========================================================================

    /// Create one mapping; a replay of a stored row is not an error.
    pub fn create(&self, mapping: Mapping<K>) -> Result<CreateOutcome, MappingError> {
        self.validate(&mapping)?;

        let result = self.db.with_conn(|conn| {
            if let Some(parent_kind) = self.kind().parent() {
                self.require_parent(conn, parent_kind, &mapping)?;
            }
            create_in(&self.store, conn, &mapping)
        });
        publish_create(&self.events, &mapping, &result);
        result
    }

    /// Create a parent and then each child under it.
    ///
    /// Members are written one by one. A conflict on the parent writes no
    /// children; a conflict on a child keeps the parent and earlier
    /// siblings and reports that child. Re-driving the same call completes
    /// the tree, since stored members replay as `AlreadyExists`. A replayed
    /// parent stored under another owner is rejected before any child.
    pub fn create_with_children(
        &self,
        parent: Mapping<K>,
        child_sets: Vec<ChildMappingSet>,
    ) -> Result<HierarchyOutcome, MappingError> {
        self.require_parent_kind()?;
        self.validate(&parent)?;
        for set in &child_sets {
            if set.kind.parent() != Some(self.kind()) {
                return Err(MappingError::validation(format!(
                    "{} is not a child kind of {}",
                    set.kind,
                    self.kind()
                )));
            }
        }

        let parent_outcome = self.create(parent.clone())?;

        // Children hang off the stored parent; a replay may carry another owner
        let stored_parent = self.get_by_remote_key(&parent.remote_key)?;
        if stored_parent.owner_key != parent.owner_key {
            return Err(MappingError::validation(format!(
                "{} {} is stored under owner {}, not {}",
                self.kind(),
                parent.remote_key,
                stored_parent.owner_key.as_deref().unwrap_or_default(),
                parent.owner_key.as_deref().unwrap_or_default()
            )));
        }

        let mut outcome = HierarchyOutcome {
            parent: parent_outcome,
            children_created: 0,
            children_replayed: 0,
        };

        for set in child_sets {
            let child_store = FamilyStore::<i64>::new(set.kind)?;
            for pair in set.ids {
                let child = set.kind.child_mapping(&stored_parent, pair, &parent.meta)?;
                let result = self.db.with_conn(|conn| create_in(&child_store, conn, &child));
                publish_create(&self.events, &child, &result);
                match result? {
                    CreateOutcome::Created => outcome.children_created += 1,
                    CreateOutcome::AlreadyExists => outcome.children_replayed += 1,
                }
            }
        }

        debug!(
            kind = %self.kind(),
            parent = %parent.remote_key,
            created = outcome.children_created,
            replayed = outcome.children_replayed,
            "Hierarchy created"
        );
        Ok(outcome)
    }

    /// Create every pair for one owner in a single transaction.
    ///
    /// Pairs are tried in list order. The first genuine conflict rolls the
    /// whole batch back and is the one reported.
    pub fn create_all_for_owner(
        &self,
        owner_key: &str,
        pairs: Vec<IdPair<K>>,
        meta: MappingMeta,
    ) -> Result<BatchOutcome, MappingError> {
        self.require_owned_kind()?;
        require_key("owner_key", owner_key)?;
        let mappings = self.owned_mappings(owner_key, pairs, &meta)?;

        let outcomes = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                mappings
                    .iter()
                    .map(|mapping| self.create_or_report(conn, mapping))
                    .collect::<Result<Vec<_>, MappingError>>()
            })
        })?;

        let mut outcome = BatchOutcome::default();
        for (mapping, created) in mappings.iter().zip(outcomes) {
            outcome.record(created);
            publish_create(&self.events, mapping, &Ok(created));
        }
        info!(
            kind = %self.kind(),
            owner = %owner_key,
            created = outcome.created,
            replayed = outcome.replayed,
            "Batch created for owner"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Replace / Reassign Operations
    // =========================================================================

    /// Replace everything `owner_key` holds in this family with `pairs`.
    ///
    /// Delete and insert run in one transaction. Concurrent replaces for the
    /// same owner are not serialised beyond what SQLite itself does.
    pub fn replace_all(
        &self,
        owner_key: &str,
        pairs: Vec<IdPair<K>>,
        meta: MappingMeta,
    ) -> Result<ReplaceOutcome, MappingError> {
        self.require_owned_kind()?;
        require_key("owner_key", owner_key)?;
        let mappings = self.owned_mappings(owner_key, pairs, &meta)?;

        let outcome = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let removed = self.store.delete_by_owner_key(conn, owner_key)?;
                let inserted = self.insert_set(conn, &mappings)?;
                Ok(ReplaceOutcome { removed, inserted })
            })
        })?;

        info!(
            kind = %self.kind(),
            owner = %owner_key,
            removed = outcome.removed,
            inserted = outcome.inserted,
            "Replaced owner mappings"
        );
        self.events.emit(MappingEvent::Replaced {
            kind: self.kind(),
            owner_key: owner_key.to_string(),
            removed: outcome.removed,
            inserted: outcome.inserted,
        });
        Ok(outcome)
    }

    /// Replace after two owners were merged into `retained_owner_key`.
    ///
    /// Every mapping of `removed_owner_key` goes too, then the retained
    /// owner's set is replaced, all in one transaction.
    pub fn replace_after_merge(
        &self,
        retained_owner_key: &str,
        removed_owner_key: &str,
        pairs: Vec<IdPair<K>>,
        meta: MappingMeta,
    ) -> Result<ReplaceOutcome, MappingError> {
        self.require_owned_kind()?;
        require_key("retained_owner_key", retained_owner_key)?;
        require_key("removed_owner_key", removed_owner_key)?;
        if retained_owner_key == removed_owner_key {
            return Err(MappingError::validation(format!(
                "cannot merge owner {} into itself",
                retained_owner_key
            )));
        }
        let mappings = self.owned_mappings(retained_owner_key, pairs, &meta)?;

        let outcome = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let mut removed = self.store.delete_by_owner_key(conn, removed_owner_key)?;
                removed += self.store.delete_by_owner_key(conn, retained_owner_key)?;
                let inserted = self.insert_set(conn, &mappings)?;
                Ok(ReplaceOutcome { removed, inserted })
            })
        })?;

        info!(
            kind = %self.kind(),
            retained = %retained_owner_key,
            removed_owner = %removed_owner_key,
            removed = outcome.removed,
            inserted = outcome.inserted,
            "Replaced mappings after merge"
        );
        self.events.emit(MappingEvent::Replaced {
            kind: self.kind(),
            owner_key: retained_owner_key.to_string(),
            removed: outcome.removed,
            inserted: outcome.inserted,
        });
        Ok(outcome)
    }

    /// Point every mapping of `old_owner_key` at `new_owner_key`
    pub fn reassign_owner(&self, old_owner_key: &str, new_owner_key: &str) -> Result<usize, MappingError> {
        self.require_owned_kind()?;
        require_key("old_owner_key", old_owner_key)?;
        require_key("new_owner_key", new_owner_key)?;
        if old_owner_key == new_owner_key {
            return Err(MappingError::validation(format!(
                "owner {} cannot be reassigned to itself",
                old_owner_key
            )));
        }

        let count = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| self.store.update_owner_key(conn, old_owner_key, new_owner_key))
        })?;

        info!(kind = %self.kind(), old = %old_owner_key, new = %new_owner_key, count, "Owner reassigned");
        self.events.emit(MappingEvent::OwnerReassigned {
            kind: self.kind(),
            old_owner_key: old_owner_key.to_string(),
            new_owner_key: new_owner_key.to_string(),
            count,
        });
        Ok(count)
    }

    // =========================================================================
    // Delete Operations
    // =========================================================================

    pub fn delete_by_local_key(&self, local_key: &K) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| self.store.delete_by_local_key(conn, local_key))
        })?;
        self.emit_deleted(count);
        Ok(count)
    }

    pub fn delete_by_remote_key(&self, remote_key: &str) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| self.store.delete_by_remote_key(conn, remote_key))
        })?;
        self.emit_deleted(count);
        Ok(count)
    }

    pub fn delete_by_owner(&self, owner_key: &str) -> Result<usize, MappingError> {
        self.require_owned_kind()?;
        let count = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| self.store.delete_by_owner_key(conn, owner_key))
        })?;
        self.emit_deleted(count);
        Ok(count)
    }

    /// Delete the whole family, children included
    pub fn delete_all(&self) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| self.store.delete_all(conn))?;
        info!(kind = %self.kind(), count, "Deleted every mapping of kind");
        self.emit_deleted(count);
        Ok(count)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn emit_deleted(&self, count: usize) {
        if count > 0 {
            self.events.emit(MappingEvent::Deleted {
                kind: self.kind(),
                count,
            });
        }
    }

    fn create_or_report(&self, conn: &mut SqliteConnection, mapping: &Mapping<K>) -> Result<CreateOutcome, MappingError> {
        let result = create_in(&self.store, conn, mapping);
        if result.is_err() {
            publish_create(&self.events, mapping, &result);
        }
        result
    }

    fn insert_set(&self, conn: &mut SqliteConnection, mappings: &[Mapping<K>]) -> Result<usize, MappingError> {
        let mut inserted = 0;
        for mapping in mappings {
            if self.create_or_report(conn, mapping)?.is_created() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn owned_mappings(
        &self,
        owner_key: &str,
        pairs: Vec<IdPair<K>>,
        meta: &MappingMeta,
    ) -> Result<Vec<Mapping<K>>, MappingError> {
        meta.validate()?;
        let mappings = pairs
            .into_iter()
            .map(|pair| Mapping::new(self.kind(), pair.local_key, pair.remote_key, meta.clone()).with_owner(owner_key))
            .collect::<Vec<_>>();
        for mapping in &mappings {
            require_key("remote_key", &mapping.remote_key)?;
        }
        Ok(mappings)
    }

    fn validate(&self, mapping: &Mapping<K>) -> Result<(), MappingError> {
        if mapping.kind != self.kind() {
            return Err(MappingError::validation(format!(
                "{} mapping submitted to the {} family",
                mapping.kind,
                self.kind()
            )));
        }
        require_key("remote_key", &mapping.remote_key)?;
        mapping.meta.validate()?;

        let kind = self.kind();
        match mapping.owner_key.as_deref() {
            Some(owner) if kind.requires_owner() || kind.parent().is_some() => require_key("owner_key", owner)?,
            None if kind.requires_owner() => {
                return Err(MappingError::validation(format!("{} mappings require an owner_key", kind)))
            }
            Some(_) if kind.parent().is_none() => {
                return Err(MappingError::validation(format!("{} mappings have no owner", kind)))
            }
            _ => {}
        }

        match (kind.parent(), mapping.parent_remote_key.as_deref()) {
            (Some(_), None) => Err(MappingError::validation(format!(
                "{} mappings require a parent_remote_key",
                kind
            ))),
            (None, Some(_)) => Err(MappingError::validation(format!(
                "{} mappings cannot have a parent",
                kind
            ))),
            _ => Ok(()),
        }
    }

    /// A child needs its parent stored and shares the parent's owner
    fn require_parent(
        &self,
        conn: &mut SqliteConnection,
        parent_kind: EntityKind,
        child: &Mapping<K>,
    ) -> Result<(), MappingError> {
        let parent_remote_key = child.parent_remote_key.as_deref().unwrap_or_default();
        let parent = FamilyStore::<i64>::new(parent_kind)?
            .find_by_remote_key(conn, parent_remote_key)?
            .ok_or_else(|| {
                MappingError::validation(format!("parent {} {} does not exist", parent_kind, parent_remote_key))
            })?;
        if parent.owner_key != child.owner_key {
            return Err(MappingError::validation(format!(
                "{} owner must match parent {} owner",
                child.kind, parent_remote_key
            )));
        }
        Ok(())
    }

    fn require_parent_kind(&self) -> Result<(), MappingError> {
        if self.kind().children().is_empty() {
            return Err(MappingError::validation(format!("{} has no child kinds", self.kind())));
        }
        Ok(())
    }

    fn require_owned_kind(&self) -> Result<(), MappingError> {
        if !self.kind().requires_owner() {
            return Err(MappingError::validation(format!(
                "{} mappings are not grouped by owner",
                self.kind()
            )));
        }
        Ok(())
    }
}

fn require_key(field: &str, value: &str) -> Result<(), MappingError> {
    if value.trim().is_empty() {
        return Err(MappingError::validation(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BookingSequence;

    fn service<K: LocalKey>(kind: EntityKind) -> (MappingService<K>, Arc<EventBus>) {
        let db = Arc::new(MappingDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        (MappingService::new(db, kind, events.clone()).unwrap(), events)
    }

    #[test]
    fn test_owner_is_required_for_owned_kinds() {
        let (notes, _) = service::<i64>(EntityKind::CaseNote);
        let err = notes
            .create(Mapping::new(EntityKind::CaseNote, 1, "n-1", MappingMeta::legacy_created()))
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let (notes, _) = service::<i64>(EntityKind::CaseNote);
        let err = notes
            .create(Mapping::new(EntityKind::CaseReport, 1, "r-1", MappingMeta::legacy_created()).with_owner("A1"))
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[test]
    fn test_location_has_no_owner_operations() {
        let (locations, _) = service::<i64>(EntityKind::Location);
        assert!(locations
            .create(Mapping::new(EntityKind::Location, 5, "loc-5", MappingMeta::migrated("run-1")))
            .is_ok());
        assert!(matches!(
            locations.reassign_owner("A1", "B2"),
            Err(MappingError::Validation(_))
        ));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (alerts, _) = service::<BookingSequence>(EntityKind::Alert);
        let err = alerts.get_by_local_key(&BookingSequence::new(1, 1)).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_create_all_for_owner_rolls_back_on_conflict() {
        let (notes, _) = service::<i64>(EntityKind::CaseNote);
        notes
            .create(Mapping::new(EntityKind::CaseNote, 3, "n-3", MappingMeta::legacy_created()).with_owner("B2"))
            .unwrap();

        let err = notes
            .create_all_for_owner(
                "A1",
                vec![IdPair::new(1, "n-1"), IdPair::new(2, "n-2"), IdPair::new(3, "n-other")],
                MappingMeta::migrated("run-1"),
            )
            .unwrap_err();
        match err {
            MappingError::DuplicateMapping { incoming, existing } => {
                assert_eq!(incoming.local_key, "3");
                assert_eq!(existing.remote_key, "n-3");
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert!(notes.find_by_owner("A1").unwrap().is_empty());
    }

    #[test]
    fn test_child_requires_existing_parent() {
        let (factors, _) = service::<i64>(EntityKind::CaseReportFactor);
        let orphan = Mapping::new(EntityKind::CaseReportFactor, 1, "f-1", MappingMeta::legacy_created())
            .with_owner("A1")
            .with_parent("missing-report");
        assert!(matches!(factors.create(orphan), Err(MappingError::Validation(_))));
    }

    #[test]
    fn test_events_follow_create_outcomes() {
        let (notes, events) = service::<i64>(EntityKind::CaseNote);
        let mut rx = events.subscribe();
        let note = Mapping::new(EntityKind::CaseNote, 1, "n-1", MappingMeta::legacy_created()).with_owner("A1");

        notes.create(note.clone()).unwrap();
        notes.create(note).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), MappingEvent::Created { .. }));
        assert!(matches!(rx.try_recv().unwrap(), MappingEvent::Replayed { .. }));
    }
}
