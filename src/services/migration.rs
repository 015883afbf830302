//! Migration batch reader
//!
//! Paged access to the rows one migration run created. Totals are counted
//! separately from the page so any page can be served without a rescan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::{mappings, MappingDb, OwnerBatchCount};
use crate::error::MappingError;
use crate::mapping::{EntityKind, Provenance};
use crate::store::MappingStore;

/// Settings injected into the reader at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReaderConfig {
    /// Divisor for [`MigrationBatchReader::approximate_owner_count`]
    pub average_rows_per_owner: u32,
    pub max_page_size: i64,
}

impl Default for BatchReaderConfig {
    fn default() -> Self {
        Self {
            average_rows_per_owner: 4,
            max_page_size: 1000,
        }
    }
}

impl From<&Config> for BatchReaderConfig {
    fn from(config: &Config) -> Self {
        Self {
            average_rows_per_owner: config.average_rows_per_owner,
            max_page_size: config.max_page_size,
        }
    }
}

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Self {
        Self { page, size }
    }

    /// Row offset of this page, `None` when it does not fit in an `i64`
    pub fn offset(&self) -> Option<i64> {
        self.page.checked_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page plus the independently counted total
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: i64,
    pub page: i64,
    pub size: i64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        if self.size == 0 {
            return 0;
        }
        (self.total_elements + self.size - 1) / self.size
    }
}

pub struct MigrationBatchReader {
    db: Arc<MappingDb>,
    config: BatchReaderConfig,
}

impl MigrationBatchReader {
    pub fn new(db: Arc<MappingDb>, config: BatchReaderConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> BatchReaderConfig {
        self.config
    }

    /// Migrated rows of `batch_label`, newest label first
    pub fn page_by_batch<S: MappingStore>(
        &self,
        store: &S,
        batch_label: &str,
        request: PageRequest,
    ) -> Result<Page<S::Record>, MappingError> {
        let offset = self.validate_request(batch_label, &request)?;

        self.db.with_conn(|conn| {
            let total_elements = store.count_by_batch_label_and_provenance(conn, batch_label, Provenance::Migrated)?;
            let content = store.find_page_by_batch_label(conn, batch_label, offset, request.size)?;
            Ok(Page {
                content,
                total_elements,
                page: request.page,
                size: request.size,
            })
        })
    }

    pub fn count_by_batch<S: MappingStore>(&self, store: &S, batch_label: &str) -> Result<i64, MappingError> {
        self.db
            .with_conn(|conn| store.count_by_batch_label_and_provenance(conn, batch_label, Provenance::Migrated))
    }

    /// Exact per-owner counts for one batch
    pub fn owner_summary(
        &self,
        kind: EntityKind,
        batch_label: &str,
        request: PageRequest,
    ) -> Result<Page<OwnerBatchCount>, MappingError> {
        if !kind.requires_owner() {
            return Err(MappingError::validation(format!("{} mappings are not grouped by owner", kind)));
        }
        let offset = self.validate_request(batch_label, &request)?;

        let provenance = Provenance::Migrated.as_str();
        self.db.with_conn(|conn| {
            let total_elements = mappings::count_owners_by_batch_label(conn, kind.as_str(), batch_label, provenance)?;
            let content = mappings::owner_counts_by_batch_label(
                conn,
                kind.as_str(),
                batch_label,
                provenance,
                offset,
                request.size,
            )?;
            Ok(Page {
                content,
                total_elements,
                page: request.page,
                size: request.size,
            })
        })
    }

    /// Owners in a batch estimated as rows divided by the configured average.
    ///
    /// An estimate only; use [`Self::owner_summary`] for exact figures.
    pub fn approximate_owner_count<S: MappingStore>(&self, store: &S, batch_label: &str) -> Result<i64, MappingError> {
        let rows = self.count_by_batch(store, batch_label)?;
        Ok(rows / i64::from(self.config.average_rows_per_owner.max(1)))
    }

    /// Most recent migrated row, by batch label
    pub fn latest_migrated<S: MappingStore>(&self, store: &S) -> Result<Option<S::Record>, MappingError> {
        self.db.with_conn(|conn| store.find_latest_migrated(conn))
    }

    /// Check a page request and return its row offset
    fn validate_request(&self, batch_label: &str, request: &PageRequest) -> Result<i64, MappingError> {
        if batch_label.is_empty() {
            return Err(MappingError::validation("batch_label is required"));
        }
        if request.page < 0 {
            return Err(MappingError::validation("page must not be negative"));
        }
        if request.size < 1 || request.size > self.config.max_page_size {
            return Err(MappingError::validation(format!(
                "page size must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        request
            .offset()
            .ok_or_else(|| MappingError::validation(format!("page {} is out of range", request.page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Mapping, MappingMeta};
    use crate::store::FamilyStore;

    fn seeded() -> (MigrationBatchReader, FamilyStore<i64>) {
        let db = Arc::new(MappingDb::open_in_memory().unwrap());
        let store = FamilyStore::<i64>::new(EntityKind::CaseNote).unwrap();
        db.with_conn(|conn| {
            for (local, owner) in [(1, "A1"), (2, "A1"), (3, "A1"), (4, "B2"), (5, "B2")] {
                let mapping = Mapping::new(EntityKind::CaseNote, local, format!("n-{}", local), MappingMeta::migrated("run-1"))
                    .with_owner(owner);
                store.insert(conn, &mapping)?;
            }
            let live = Mapping::new(EntityKind::CaseNote, 6, "n-6", MappingMeta::legacy_created()).with_owner("A1");
            store.insert(conn, &live)
        })
        .unwrap();

        let reader = MigrationBatchReader::new(
            db,
            BatchReaderConfig {
                average_rows_per_owner: 2,
                max_page_size: 10,
            },
        );
        (reader, store)
    }

    #[test]
    fn test_page_total_is_independent_of_page() {
        let (reader, store) = seeded();

        let page = reader.page_by_batch(&store, "run-1", PageRequest::new(1, 2)).unwrap();
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages(), 3);
        let remotes: Vec<_> = page.content.iter().map(|m| m.remote_key.as_str()).collect();
        assert_eq!(remotes, vec!["n-3", "n-4"]);
    }

    #[test]
    fn test_exact_and_approximate_owner_counts() {
        let (reader, store) = seeded();

        let summary = reader
            .owner_summary(EntityKind::CaseNote, "run-1", PageRequest::new(0, 10))
            .unwrap();
        assert_eq!(summary.total_elements, 2);
        assert_eq!(summary.content[0].owner_key, "A1");
        assert_eq!(summary.content[0].count, 3);

        // 5 rows / 2 per owner, truncated
        assert_eq!(reader.approximate_owner_count(&store, "run-1").unwrap(), 2);
    }

    #[test]
    fn test_oversized_page_is_rejected() {
        let (reader, store) = seeded();
        let err = reader
            .page_by_batch(&store, "run-1", PageRequest::new(0, 11))
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[test]
    fn test_page_beyond_offset_range_is_rejected() {
        let (reader, store) = seeded();
        let request = PageRequest::new(i64::MAX / 2, 10);
        assert_eq!(request.offset(), None);

        let err = reader.page_by_batch(&store, "run-1", request).unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
        let err = reader
            .owner_summary(EntityKind::CaseNote, "run-1", request)
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }
}
