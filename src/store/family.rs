//! Store for one entity kind inside `identity_mappings`

use std::marker::PhantomData;

use diesel::SqliteConnection;

use super::MappingStore;
use crate::db::{mappings, MappingRow, NewMappingRow};
use crate::error::MappingError;
use crate::mapping::{EntityKind, LocalKey, Mapping, MappingMeta, Provenance};

/// Logical table for one entity kind, typed by its local key
#[derive(Debug, Clone)]
pub struct FamilyStore<K> {
    kind: EntityKind,
    _key: PhantomData<fn() -> K>,
}

impl<K: LocalKey> FamilyStore<K> {
    /// Bind `kind` to the local-key type `K`; the shapes must agree.
    pub fn new(kind: EntityKind) -> Result<Self, MappingError> {
        if !kind.is_family_kind() {
            return Err(MappingError::validation(format!(
                "{} is stored as a relation, not an identity mapping",
                kind
            )));
        }
        if kind.key_shape() != K::SHAPE {
            return Err(MappingError::validation(format!(
                "{} keys are {:?}, not {:?}",
                kind,
                kind.key_shape(),
                K::SHAPE
            )));
        }
        Ok(Self {
            kind,
            _key: PhantomData,
        })
    }

    pub fn find_by_owner_key(
        &self,
        conn: &mut SqliteConnection,
        owner_key: &str,
    ) -> Result<Vec<Mapping<K>>, MappingError> {
        mappings::find_by_owner_key(conn, self.kind.as_str(), owner_key)?
            .into_iter()
            .map(row_to_mapping)
            .collect()
    }

    /// Delete one owner's rows and, for parent kinds, their children
    pub fn delete_by_owner_key(&self, conn: &mut SqliteConnection, owner_key: &str) -> Result<usize, MappingError> {
        let children = self.kind.child_names();
        let mut deleted = 0;
        if !children.is_empty() {
            let parents: Vec<String> = mappings::find_by_owner_key(conn, self.kind.as_str(), owner_key)?
                .into_iter()
                .map(|row| row.remote_key)
                .collect();
            deleted += mappings::delete_children_of(conn, &children, &parents)?;
        }
        deleted += mappings::delete_by_owner_key(conn, self.kind.as_str(), owner_key)?;
        Ok(deleted)
    }

    /// Delete one parent row by remote key together with its children
    pub fn delete_tree(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<usize, MappingError> {
        let children = mappings::delete_children_of(conn, &self.kind.child_names(), &[remote_key.to_string()])?;
        Ok(children + mappings::delete_by_remote_key(conn, self.kind.as_str(), remote_key)?)
    }

    pub fn update_owner_key(
        &self,
        conn: &mut SqliteConnection,
        old_owner_key: &str,
        new_owner_key: &str,
    ) -> Result<usize, MappingError> {
        let mut updated = mappings::update_owner_key(conn, self.kind.as_str(), old_owner_key, new_owner_key)?;
        for child in self.kind.children() {
            updated += mappings::update_owner_key(conn, child.as_str(), old_owner_key, new_owner_key)?;
        }
        Ok(updated)
    }

    pub fn find_children(
        &self,
        conn: &mut SqliteConnection,
        parent_remote_key: &str,
    ) -> Result<Vec<Mapping<i64>>, MappingError> {
        mappings::find_children(conn, &self.kind.child_names(), parent_remote_key)?
            .into_iter()
            .map(row_to_mapping)
            .collect()
    }

    /// Delete every row of this kind and of its child kinds
    pub fn delete_all(&self, conn: &mut SqliteConnection) -> Result<usize, MappingError> {
        let mut kinds = self.kind.child_names();
        kinds.push(self.kind.as_str());
        mappings::delete_all_of_kinds(conn, &kinds)
    }
}

impl<K: LocalKey> MappingStore for FamilyStore<K> {
    type Record = Mapping<K>;

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn insert(&self, conn: &mut SqliteConnection, record: &Mapping<K>) -> Result<(), MappingError> {
        let local_key = record.local_key.encode();
        mappings::insert_mapping(
            conn,
            &NewMappingRow {
                entity_kind: self.kind.as_str(),
                remote_key: &record.remote_key,
                local_key: &local_key,
                owner_key: record.owner_key.as_deref(),
                parent_remote_key: record.parent_remote_key.as_deref(),
                batch_label: record.meta.batch_label.as_deref(),
                provenance: record.meta.provenance.as_str(),
            },
        )
    }

    fn find_by_local_key(&self, conn: &mut SqliteConnection, local_key: &K) -> Result<Option<Mapping<K>>, MappingError> {
        mappings::find_by_local_key(conn, self.kind.as_str(), &local_key.encode())?
            .map(row_to_mapping)
            .transpose()
    }

    fn find_by_remote_key(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<Option<Mapping<K>>, MappingError> {
        mappings::find_by_remote_key(conn, self.kind.as_str(), remote_key)?
            .map(row_to_mapping)
            .transpose()
    }

    fn delete_by_local_key(&self, conn: &mut SqliteConnection, local_key: &K) -> Result<usize, MappingError> {
        if self.kind.children().is_empty() {
            return mappings::delete_by_local_key(conn, self.kind.as_str(), &local_key.encode());
        }
        match mappings::find_by_local_key(conn, self.kind.as_str(), &local_key.encode())? {
            Some(row) => self.delete_tree(conn, &row.remote_key),
            None => Ok(0),
        }
    }

    fn delete_by_remote_key(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<usize, MappingError> {
        self.delete_tree(conn, remote_key)
    }

    fn find_page_by_batch_label(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Mapping<K>>, MappingError> {
        mappings::find_page_by_batch_label(
            conn,
            self.kind.as_str(),
            batch_label,
            Provenance::Migrated.as_str(),
            offset,
            limit,
        )?
        .into_iter()
        .map(row_to_mapping)
        .collect()
    }

    fn count_by_batch_label_and_provenance(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        provenance: Provenance,
    ) -> Result<i64, MappingError> {
        mappings::count_by_batch_label_and_provenance(conn, self.kind.as_str(), batch_label, provenance.as_str())
    }

    fn find_latest_migrated(&self, conn: &mut SqliteConnection) -> Result<Option<Mapping<K>>, MappingError> {
        mappings::find_latest_by_provenance(conn, self.kind.as_str(), Provenance::Migrated.as_str())?
            .map(row_to_mapping)
            .transpose()
    }
}

/// Decode a stored row into a typed mapping
pub fn row_to_mapping<K: LocalKey>(row: MappingRow) -> Result<Mapping<K>, MappingError> {
    Ok(Mapping {
        kind: row.entity_kind.parse()?,
        local_key: K::decode(&row.local_key)?,
        remote_key: row.remote_key,
        owner_key: row.owner_key,
        parent_remote_key: row.parent_remote_key,
        meta: MappingMeta {
            batch_label: row.batch_label,
            provenance: row.provenance.parse()?,
        },
        created_at: Some(row.created_at),
    })
}
