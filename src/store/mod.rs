//! The mapping store seam
//!
//! The engine only talks to storage through [`MappingStore`]. A store is a
//! cheap, stateless descriptor of one logical table; every call borrows a
//! connection from the caller so several calls can share one transaction.

pub mod family;
pub mod relation;

pub use family::FamilyStore;
pub use relation::RelationStore;

use diesel::SqliteConnection;

use crate::error::MappingError;
use crate::mapping::{EntityKind, MappingRecord};

/// Point reads, inserts, deletes and batch scans over one mapping table
pub trait MappingStore: Send + Sync {
    type Record: MappingRecord;

    fn kind(&self) -> EntityKind;

    /// Insert a new row. A clash on either key is `MappingError::UniqueViolation`.
    fn insert(&self, conn: &mut SqliteConnection, record: &Self::Record) -> Result<(), MappingError>;

    fn find_by_local_key(
        &self,
        conn: &mut SqliteConnection,
        local_key: &<Self::Record as MappingRecord>::Local,
    ) -> Result<Option<Self::Record>, MappingError>;

    fn find_by_remote_key(
        &self,
        conn: &mut SqliteConnection,
        remote_key: &str,
    ) -> Result<Option<Self::Record>, MappingError>;

    fn delete_by_local_key(
        &self,
        conn: &mut SqliteConnection,
        local_key: &<Self::Record as MappingRecord>::Local,
    ) -> Result<usize, MappingError>;

    fn delete_by_remote_key(&self, conn: &mut SqliteConnection, remote_key: &str) -> Result<usize, MappingError>;

    /// Migrated rows of one batch, ordered by label descending then remote key
    fn find_page_by_batch_label(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Self::Record>, MappingError>;

    fn count_by_batch_label_and_provenance(
        &self,
        conn: &mut SqliteConnection,
        batch_label: &str,
        provenance: crate::mapping::Provenance,
    ) -> Result<i64, MappingError>;

    /// Newest migrated row by batch label
    fn find_latest_migrated(&self, conn: &mut SqliteConnection) -> Result<Option<Self::Record>, MappingError>;
}
