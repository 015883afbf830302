//! Service layer for identity-mapping
//!
//! Services sit between a transport layer and the stores. Each service wraps
//! store calls with:
//! - Input validation
//! - Idempotent create and conflict resolution
//! - Event emission for audit/notifications
//! - Transaction boundaries
//!
//! ## Architecture
//!
//! ```text
//! Transport (external)
//!     ↓
//! Service Layer (engine, relations, batch reader)
//!     ↓
//! Store Layer (store/*.rs)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod conflict;
pub mod engine;
pub mod events;
pub mod mappings;
pub mod migration;
pub mod relations;

// Re-exports
pub use conflict::ConflictResolver;
pub use engine::{create_in, CreateOutcome};
pub use events::{spawn_logging_listener, EventBus, EventListener, LoggingEventListener, MappingEvent};
pub use mappings::{BatchOutcome, ChildMappingSet, HierarchyOutcome, MappingService, ReplaceOutcome};
pub use migration::{BatchReaderConfig, MigrationBatchReader, Page, PageRequest};
pub use relations::RelationService;

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::db::{mappings as mapping_rows, relations as relation_rows, MappingDb};
use crate::error::MappingError;
use crate::mapping::{BookingSequence, EntityKind};

/// Service container for dependency injection
///
/// Holds one engine per mapping family plus relations and the batch
/// reader, all sharing one database and event bus. Child families are
/// written through their parent's `create_with_children` or directly.
pub struct Services {
    pub db: Arc<MappingDb>,
    pub case_notes: Arc<MappingService<i64>>,
    pub alerts: Arc<MappingService<BookingSequence>>,
    pub case_reports: Arc<MappingService<i64>>,
    pub case_report_factors: Arc<MappingService<i64>>,
    pub case_report_interviews: Arc<MappingService<i64>>,
    pub case_report_plans: Arc<MappingService<i64>>,
    pub locations: Arc<MappingService<i64>>,
    pub relations: Arc<RelationService>,
    pub migration: Arc<MigrationBatchReader>,
    pub events: Arc<EventBus>,
    allow_reset: bool,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<MappingDb>, config: &Config) -> Result<Self, MappingError> {
        let events = Arc::new(EventBus::new());

        Ok(Self {
            case_notes: Arc::new(MappingService::new(db.clone(), EntityKind::CaseNote, events.clone())?),
            alerts: Arc::new(MappingService::new(db.clone(), EntityKind::Alert, events.clone())?),
            case_reports: Arc::new(MappingService::new(db.clone(), EntityKind::CaseReport, events.clone())?),
            case_report_factors: Arc::new(MappingService::new(
                db.clone(),
                EntityKind::CaseReportFactor,
                events.clone(),
            )?),
            case_report_interviews: Arc::new(MappingService::new(
                db.clone(),
                EntityKind::CaseReportInterview,
                events.clone(),
            )?),
            case_report_plans: Arc::new(MappingService::new(
                db.clone(),
                EntityKind::CaseReportPlan,
                events.clone(),
            )?),
            locations: Arc::new(MappingService::new(db.clone(), EntityKind::Location, events.clone())?),
            relations: Arc::new(RelationService::new(db.clone(), events.clone())),
            migration: Arc::new(MigrationBatchReader::new(db.clone(), BatchReaderConfig::from(config))),
            events,
            allow_reset: config.allow_reset,
            db,
        })
    }

    /// Wipe every mapping table. Refused unless `allow_reset` is configured.
    pub fn reset_all(&self) -> Result<usize, MappingError> {
        if !self.allow_reset {
            return Err(MappingError::validation(
                "reset is disabled; set allow_reset = true outside production",
            ));
        }

        let count = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                Ok(mapping_rows::delete_everything(conn)? + relation_rows::delete_everything(conn)?)
            })
        })?;
        warn!(count, "Reset deleted every mapping");
        Ok(count)
    }
}
