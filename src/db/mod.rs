//! SQLite database module for identity mappings
//!
//! ## Architecture
//!
//! - Diesel over SQLite, connections pooled with r2d2
//! - One `identity_mappings` table partitioned by entity kind; each kind
//!   keeps its own primary key (remote key) and unique local key
//! - A separate `relation_mappings` table for owner-to-owner relations
//!
//! ## Tables
//!
//! - `identity_mappings` - local key <-> remote key per entity kind
//! - `relation_mappings` - (first owner, second owner, variant) <-> remote key
//! - `schema_version` - bootstrap bookkeeping

pub mod diesel_schema;
pub mod mappings;
pub mod models;
pub mod relations;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::MappingError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    enable_wal: bool,
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        (|| -> QueryResult<()> {
            if self.enable_wal {
                conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            conn.batch_execute(&format!(
                "PRAGMA busy_timeout = {};",
                self.busy_timeout.as_millis()
            ))?;
            Ok(())
        })()
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database holding every mapping table
pub struct MappingDb {
    pool: DbPool,
}

impl MappingDb {
    /// Open or create the mapping database described by `config`
    pub fn open(config: &Config) -> Result<Self, MappingError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let db_path = config.database_path();
        info!("Opening SQLite database at {:?}", db_path);

        Self::open_path(&db_path, config.pool_size, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open a file database with an explicit pool size
    pub fn open_path(path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self, MappingError> {
        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: true,
                busy_timeout,
            }))
            .build(manager)
            .map_err(|e| MappingError::Connection(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every `:memory:` connection is its own database, so the pool holds
    /// exactly one connection.
    pub fn open_in_memory() -> Result<Self, MappingError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: false,
                busy_timeout: Duration::from_millis(0),
            }))
            .build(manager)
            .map_err(|e| MappingError::Connection(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), MappingError> {
        self.with_conn(schema::init_schema)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, MappingError> {
        self.pool
            .get()
            .map_err(|e| MappingError::Connection(format!("Failed to get connection: {}", e)))
    }

    /// Run `f` against one pooled connection.
    ///
    /// Callers must not re-enter `with_conn` from inside `f`; the in-memory
    /// pool only has one connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MappingError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, MappingError>,
    {
        let mut conn = self.conn()?;
        f(&mut *conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, MappingError> {
        self.with_conn(|conn| {
            let mappings_by_kind = mappings::count_by_kind(conn)?;
            let relation_count = relations::count_all(conn)?;
            Ok(DbStats {
                total_mappings: mappings_by_kind.iter().map(|(_, c)| *c as u64).sum(),
                mappings_by_kind,
                relation_count: relation_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub total_mappings: u64,
    pub mappings_by_kind: Vec<(String, i64)>,
    pub relation_count: u64,
}

// Re-exports
pub use models::{MappingRow, NewMappingRow, NewRelationRow, OwnerBatchCount, RelationRow};
