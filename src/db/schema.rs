//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::MappingError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), MappingError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.batch_execute(MAPPINGS_SCHEMA)
            .map_err(|e| MappingError::Internal(format!("Failed to create mapping tables: {}", e)))?;
        conn.batch_execute(RELATIONS_SCHEMA)
            .map_err(|e| MappingError::Internal(format!("Failed to create relation tables: {}", e)))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(MappingError::Config(format!(
            "database schema v{} is newer than this binary (v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, MappingError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| MappingError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), MappingError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

const MAPPINGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identity_mappings (
    entity_kind TEXT NOT NULL,
    remote_key TEXT NOT NULL,
    local_key TEXT NOT NULL,
    owner_key TEXT,
    parent_remote_key TEXT,
    batch_label TEXT,
    provenance TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (entity_kind, remote_key)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_mappings_local
    ON identity_mappings(entity_kind, local_key);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_owner
    ON identity_mappings(entity_kind, owner_key);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_parent
    ON identity_mappings(parent_remote_key);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_batch
    ON identity_mappings(entity_kind, batch_label, provenance);
"#;

const RELATIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS relation_mappings (
    remote_key TEXT PRIMARY KEY NOT NULL,
    first_owner_key TEXT NOT NULL,
    second_owner_key TEXT NOT NULL,
    variant_sequence INTEGER NOT NULL,
    batch_label TEXT,
    provenance TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_relation_mappings_slot
    ON relation_mappings(first_owner_key, second_owner_key, variant_sequence);
CREATE INDEX IF NOT EXISTS idx_relation_mappings_second
    ON relation_mappings(second_owner_key);
CREATE INDEX IF NOT EXISTS idx_relation_mappings_batch
    ON relation_mappings(batch_label, provenance);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
