//! Identity Mapping - bidirectional key correspondences between a legacy and a modern system
//!
//! Both systems assign their own identifiers to the same real-world records.
//! This crate stores each correspondence once, answers lookups from either
//! side and refuses any write that would let two correspondences collide.
//!
//! ## Architecture
//!
//! - **mapping**: entity kinds, local keys, `Mapping<K>` and `RelationMapping`
//! - **db**: Diesel/SQLite repository functions over a pooled connection
//! - **store**: the `MappingStore` seam, one logical table per entity kind
//! - **services**: the engine (idempotent, hierarchical and batch creates,
//!   replace, merge, reassign), conflict resolution, the migration batch
//!   reader and an event bus
//!
//! ## Write sources
//!
//! | Source | Provenance | Batch label |
//! |--------|-----------|-------------|
//! | Bulk migration | `MIGRATED` | required |
//! | Live sync from legacy | `LEGACY_CREATED` | none |
//! | Live sync from modern | `MODERN_CREATED` | none |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/identity-mapping/
//! ├── mappings.db      # SQLite database (WAL mode)
//! └── config.toml      # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod mapping;
pub mod services;
pub mod store;

// Re-exports
pub use config::Config;
pub use db::MappingDb;
pub use error::MappingError;
pub use mapping::{
    BookingSequence, EntityKind, IdPair, LocalKey, Mapping, MappingMeta, MappingRecord, MappingSnapshot,
    Provenance, RelationMapping, RelationSlot,
};
pub use services::{
    ChildMappingSet, CreateOutcome, EventBus, MappingEvent, MappingService, MigrationBatchReader, PageRequest,
    RelationService, Services,
};
pub use store::{FamilyStore, MappingStore, RelationStore};
