//! Store for `relation_mappings`

use diesel::SqliteConnection;

use super::MappingStore;
use crate::db::{relations, NewRelationRow, RelationRow};
use crate::error::MappingError;
use crate::mapping::{EntityKind, MappingMeta, Provenance, RelationMapping, RelationSlot};

#[derive(Debug, Clone, Copy, Default)]
pub struct RelationStore;

impl RelationStore {
    pub fn find_touching(&self, conn: &mut SqliteConnection, owner_key: &str) -> Result<Vec<RelationMapping>, MappingError> {
        relations::find_touching(conn, owner_key)?
            .into_iter()
            .map(row_to_relation)
            .collect()
    }

    pub fn find_touching_with_partners(
        &self,
        conn: &mut SqliteConnection,
        owner_key: &str,
        partners: &[String],
    ) -> Result<Vec<RelationMapping>, MappingError> {
        relations::find_touching_with_partners(conn, owner_key, partners)?
            .into_iter()
            .map(row_to_relation)
            .collect()
    }

    /// Relations occupying the slot `(a, b, variant)` in either order
    pub fn find_pair_either_order(
        &self,
        conn: &mut SqliteConnection,
        a: &str,
        b: &str,
        variant_sequence: i32,
    ) -> Result<Vec<RelationMapping>, MappingError> {
        relations::find_by_pair_either_order(conn, a, b, variant_sequence)?
            .into_iter()
            .map(row_to_relation)
            .collect()
    }

    pub fn update_slot(
        &self,
        conn: &mut SqliteConnection,
        remote_key: &str,
        slot: &RelationSlot,
    ) -> Result<usize, MappingError> {
        relations::update_parties(conn, remote_key, &slot.first_owner_key, &slot.second_owner_key)
    }

    pub fn delete_all(&self, conn: &mut SqliteConnection) -> Result<usize, MappingError> {
        relations::delete_everything(conn)
    }
}

impl MappingStore for RelationStore {
    type Record = RelationMapping;

    fn kind(&self) -> EntityKind {
        EntityKind::PersonRelation
    }

    fn insert(&self, conn: &mut SqliteConnection, record: &RelationMapping) -> Result<(), MappingError> {
        relations::insert_relation(
            conn,
            &NewRelationRow {
                remote_key: &record.remote_key,
                first_owner_key: &record.slot.first_owner_key,
                second_owner_key: &record.slot.second_owner_key,
                variant_sequence: record.slot.variant_sequence,
                batch_label: record.meta.batch_label.as_deref(),
                provenance: record.meta.provenance.as_str(),
            },
        )
    }

    fn find_by_local_key(
        &self,
        conn: &mut SqliteConnection,
        slot: &RelationSlot,
    ) -> Result<Option<RelationMapping>, MappingError> {
        relations::find_by_slot(conn, &slot.first_owner_key, &slot.second_owner_key, slot.variant_sequence)?
            .map(row_to_relation)
            .transpose()
    }

    fn find_by_remote_key(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<Option<RelationMapping>, MappingError> {
        relations::find_by_remote_key(conn, remote_key)?
            .map(row_to_relation)
            .transpose()
    }

    fn delete_by_local_key(&self, conn: &mut SqliteConnection, slot: &RelationSlot) -> Result<usize, MappingError> {
        relations::delete_by_slot(conn, &slot.first_owner_key, &slot.second_owner_key, slot.variant_sequence)
    }

    fn delete_by_remote_key(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<usize, MappingError> {
        relations::delete_by_remote_key(conn, remote_key)
    }

    fn find_page_by_batch_label(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RelationMapping>, MappingError> {
        relations::find_page_by_batch_label(conn, batch_label, Provenance::Migrated.as_str(), offset, limit)?
            .into_iter()
            .map(row_to_relation)
            .collect()
    }

    fn count_by_batch_label_and_provenance(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        provenance: Provenance,
    ) -> Result<i64, MappingError> {
        relations::count_by_batch_label_and_provenance(conn, batch_label, provenance.as_str())
    }

    fn find_latest_migrated(&self, conn: &mut SqliteConnection) -> Result<Option<RelationMapping>, MappingError> {
        relations::find_latest_by_provenance(conn, Provenance::Migrated.as_str())?
            .map(row_to_relation)
            .transpose()
    }
}

pub fn row_to_relation(row: RelationRow) -> Result<RelationMapping, MappingError> {
    Ok(RelationMapping {
        slot: RelationSlot::new(row.first_owner_key, row.second_owner_key, row.variant_sequence),
        remote_key: row.remote_key,
        meta: MappingMeta {
            batch_label: row.batch_label,
            provenance: row.provenance.parse()?,
        },
        created_at: Some(row.created_at),
    })
}
