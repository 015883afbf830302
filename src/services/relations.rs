//! Relation service - mappings for owner-to-owner relations
//!
//! Relations are keyed by a slot of two owners plus a variant number. The
//! interesting part is reassignment: moving one party to a new owner must
//! not produce a self-relation or land on a slot another relation already
//! holds, in either party order.

use std::sync::Arc;

use diesel::SqliteConnection;
use tracing::{debug, info, warn};

use super::engine::{create_in, publish_create, CreateOutcome};
use super::events::{EventBus, MappingEvent};
use crate::db::MappingDb;
use crate::error::MappingError;
use crate::mapping::{EntityKind, MappingRecord, RelationMapping, RelationSlot};
use crate::store::{MappingStore, RelationStore};

/// Relation mapping service
pub struct RelationService {
    db: Arc<MappingDb>,
    store: RelationStore,
    events: Arc<EventBus>,
}

impl RelationService {
    pub fn new(db: Arc<MappingDb>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            store: RelationStore,
            events,
        }
    }

    pub fn store(&self) -> &RelationStore {
        &self.store
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_by_remote_key(&self, remote_key: &str) -> Result<RelationMapping, MappingError> {
        self.db
            .with_conn(|conn| self.store.find_by_remote_key(conn, remote_key))?
            .ok_or_else(|| MappingError::not_found(format!("relation {}", remote_key)))
    }

    pub fn get_by_slot(&self, slot: &RelationSlot) -> Result<RelationMapping, MappingError> {
        self.db
            .with_conn(|conn| self.store.find_by_local_key(conn, slot))?
            .ok_or_else(|| MappingError::not_found(format!("relation slot {}", slot)))
    }

    /// Relations where `owner_key` is either party
    pub fn find_for_owner(&self, owner_key: &str) -> Result<Vec<RelationMapping>, MappingError> {
        self.db.with_conn(|conn| self.store.find_touching(conn, owner_key))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create one relation mapping.
    ///
    /// A slot is one relation whichever party comes first, so the reversed
    /// slot is checked before the insert.
    pub fn create(&self, relation: RelationMapping) -> Result<CreateOutcome, MappingError> {
        if relation.remote_key.trim().is_empty() {
            return Err(MappingError::validation("remote_key is required"));
        }
        if relation.slot.first_owner_key.is_empty() || relation.slot.second_owner_key.is_empty() {
            return Err(MappingError::validation("both owner keys are required"));
        }
        if relation.slot.first_owner_key.contains(':') || relation.slot.second_owner_key.contains(':') {
            return Err(MappingError::validation("owner keys must not contain ':'"));
        }
        if relation.slot.is_self_relation() {
            return Err(MappingError::validation(format!(
                "owner {} cannot be related to itself",
                relation.slot.first_owner_key
            )));
        }
        relation.meta.validate()?;

        let result = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| match self.find_reversed(conn, &relation.slot)? {
                Some(existing) => resolve_reversed(&relation, existing),
                None => create_in(&self.store, conn, &relation),
            })
        });
        publish_create(&self.events, &relation, &result);
        result
    }

    pub fn delete_by_remote_key(&self, remote_key: &str) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| self.store.delete_by_remote_key(conn, remote_key))?;
        self.emit_deleted(count);
        Ok(count)
    }

    pub fn delete_by_slot(&self, slot: &RelationSlot) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| self.store.delete_by_local_key(conn, slot))?;
        self.emit_deleted(count);
        Ok(count)
    }

    pub fn delete_all(&self) -> Result<usize, MappingError> {
        let count = self.db.with_conn(|conn| self.store.delete_all(conn))?;
        info!(count, "Deleted every relation mapping");
        self.emit_deleted(count);
        Ok(count)
    }

    // =========================================================================
    // Reassignment
    // =========================================================================

    /// Move every relation of `old_owner_key` onto `new_owner_key`.
    ///
    /// Rows are checked then written one at a time. The first clash aborts
    /// the call; rows rewritten before it stay rewritten.
    pub fn reassign_owner(&self, old_owner_key: &str, new_owner_key: &str) -> Result<usize, MappingError> {
        validate_reassignment(old_owner_key, new_owner_key)?;

        let count = self.db.with_conn(|conn| {
            let touching = self.store.find_touching(conn, old_owner_key)?;
            self.rewrite_each(conn, &touching, old_owner_key, new_owner_key)
        })?;
        self.finish_reassignment(old_owner_key, new_owner_key, count);
        Ok(count)
    }

    /// Reassign only the relations whose partner is in `partners`.
    ///
    /// A list naming either owner is malformed and rejected before any
    /// row is read.
    pub fn reassign_owner_against_list(
        &self,
        old_owner_key: &str,
        new_owner_key: &str,
        partners: &[String],
    ) -> Result<usize, MappingError> {
        validate_reassignment(old_owner_key, new_owner_key)?;
        if let Some(bad) = partners.iter().find(|p| *p == old_owner_key || *p == new_owner_key) {
            return Err(MappingError::validation(format!(
                "partner list must not contain the reassigned owner {}",
                bad
            )));
        }

        let count = self.db.with_conn(|conn| {
            let touching = self
                .store
                .find_touching_with_partners(conn, old_owner_key, partners)?;
            self.rewrite_each(conn, &touching, old_owner_key, new_owner_key)
        })?;
        self.finish_reassignment(old_owner_key, new_owner_key, count);
        Ok(count)
    }

    fn rewrite_each(
        &self,
        conn: &mut SqliteConnection,
        relations: &[RelationMapping],
        old_owner_key: &str,
        new_owner_key: &str,
    ) -> Result<usize, MappingError> {
        let mut rewritten = 0;
        for relation in relations {
            let target = relation.slot.reassigned(old_owner_key, new_owner_key);
            self.check_clash(conn, relation, &target)?;
            rewritten += self.store.update_slot(conn, &relation.remote_key, &target)?;
        }
        Ok(rewritten)
    }

    fn check_clash(
        &self,
        conn: &mut SqliteConnection,
        relation: &RelationMapping,
        target: &RelationSlot,
    ) -> Result<(), MappingError> {
        let reason = if target.is_self_relation() {
            Some(format!(
                "relation {} ({}) would relate {} to itself",
                relation.remote_key, relation.slot, target.first_owner_key
            ))
        } else {
            self.store
                .find_pair_either_order(
                    conn,
                    &target.first_owner_key,
                    &target.second_owner_key,
                    target.variant_sequence,
                )?
                .into_iter()
                .find(|other| other.remote_key != relation.remote_key)
                .map(|other| {
                    format!(
                        "relation {} ({}) would clash with relation {} ({})",
                        relation.remote_key, relation.slot, other.remote_key, other.slot
                    )
                })
        };

        match reason {
            Some(reason) => {
                warn!(remote = %relation.remote_key, reason = %reason, "Relation reassignment clash");
                self.events.emit(MappingEvent::RelationClash {
                    remote_key: relation.remote_key.clone(),
                    reason: reason.clone(),
                });
                Err(MappingError::Validation(reason))
            }
            None => Ok(()),
        }
    }

    fn find_reversed(
        &self,
        conn: &mut SqliteConnection,
        slot: &RelationSlot,
    ) -> Result<Option<RelationMapping>, MappingError> {
        Ok(self
            .store
            .find_pair_either_order(conn, &slot.first_owner_key, &slot.second_owner_key, slot.variant_sequence)?
            .into_iter()
            .find(|other| other.slot != *slot))
    }

    fn finish_reassignment(&self, old_owner_key: &str, new_owner_key: &str, count: usize) {
        info!(old = %old_owner_key, new = %new_owner_key, count, "Relations reassigned");
        self.events.emit(MappingEvent::OwnerReassigned {
            kind: EntityKind::PersonRelation,
            old_owner_key: old_owner_key.to_string(),
            new_owner_key: new_owner_key.to_string(),
            count,
        });
    }

    fn emit_deleted(&self, count: usize) {
        if count > 0 {
            self.events.emit(MappingEvent::Deleted {
                kind: EntityKind::PersonRelation,
                count,
            });
        }
    }
}

/// Same remote key on the reversed slot is a replay, anything else a duplicate
fn resolve_reversed(relation: &RelationMapping, existing: RelationMapping) -> Result<CreateOutcome, MappingError> {
    if existing.remote_key == relation.remote_key {
        debug!(remote = %relation.remote_key, slot = %existing.slot, "Replayed relation in reversed order");
        return Ok(CreateOutcome::AlreadyExists);
    }
    let incoming = relation.snapshot();
    let existing = existing.snapshot();
    warn!(incoming = %incoming, existing = %existing, "Duplicate relation rejected");
    Err(MappingError::duplicate(incoming, existing))
}

fn validate_reassignment(old_owner_key: &str, new_owner_key: &str) -> Result<(), MappingError> {
    if old_owner_key.trim().is_empty() || new_owner_key.trim().is_empty() {
        return Err(MappingError::validation("old and new owner keys are required"));
    }
    if old_owner_key == new_owner_key {
        return Err(MappingError::validation(format!(
            "owner {} cannot be reassigned to itself",
            old_owner_key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingMeta;

    fn service() -> RelationService {
        let db = Arc::new(MappingDb::open_in_memory().unwrap());
        RelationService::new(db, Arc::new(EventBus::new()))
    }

    fn relation(a: &str, b: &str, variant: i32, remote: &str) -> RelationMapping {
        RelationMapping::new(RelationSlot::new(a, b, variant), remote, MappingMeta::legacy_created())
    }

    #[test]
    fn test_self_relation_cannot_be_created() {
        let relations = service();
        let err = relations.create(relation("X1", "X1", 1, "rel-1")).unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[test]
    fn test_owner_key_with_separator_is_rejected() {
        let relations = service();
        let err = relations.create(relation("X:1", "Y1", 1, "rel-1")).unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[test]
    fn test_reversed_slot_replay_is_benign() {
        let relations = service();
        relations.create(relation("X1", "Y1", 1, "rel-1")).unwrap();
        assert_eq!(
            relations.create(relation("Y1", "X1", 1, "rel-1")).unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(relations.find_for_owner("X1").unwrap().len(), 1);
    }

    #[test]
    fn test_reassign_onto_partner_is_a_clash() {
        let relations = service();
        relations.create(relation("X1", "Y1", 1, "rel-1")).unwrap();

        let err = relations.reassign_owner("X1", "Y1").unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));

        let unchanged = relations.get_by_remote_key("rel-1").unwrap();
        assert_eq!(unchanged.slot, RelationSlot::new("X1", "Y1", 1));
    }

    #[test]
    fn test_reassign_into_reversed_existing_slot_is_a_clash() {
        let relations = service();
        relations.create(relation("X1", "P1", 1, "rel-1")).unwrap();
        relations.create(relation("P1", "N1", 1, "rel-2")).unwrap();

        // (X1, P1) would become (N1, P1), the reverse of rel-2
        let err = relations.reassign_owner("X1", "N1").unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
        assert_eq!(
            relations.get_by_remote_key("rel-1").unwrap().slot,
            RelationSlot::new("X1", "P1", 1)
        );
    }

    #[test]
    fn test_partner_list_naming_an_owner_is_rejected() {
        let relations = service();
        relations.create(relation("X1", "P1", 1, "rel-1")).unwrap();

        let err = relations
            .reassign_owner_against_list("X1", "N1", &["P1".to_string(), "N1".to_string()])
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
        assert_eq!(relations.find_for_owner("X1").unwrap().len(), 1);
    }

    #[test]
    fn test_list_reassignment_touches_only_listed_partners() {
        let relations = service();
        relations.create(relation("X1", "P1", 1, "rel-1")).unwrap();
        relations.create(relation("Q1", "X1", 1, "rel-2")).unwrap();

        let count = relations
            .reassign_owner_against_list("X1", "N1", &["Q1".to_string()])
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(relations.get_by_remote_key("rel-2").unwrap().slot, RelationSlot::new("Q1", "N1", 1));
        assert_eq!(relations.get_by_remote_key("rel-1").unwrap().slot, RelationSlot::new("X1", "P1", 1));
    }
}
