//! Identity mapping queries using Diesel, scoped by entity kind
//!
//! Every function takes the kind's stored name so each family behaves as
//! its own table: keys are only unique within a kind.

use diesel::prelude::*;

use super::diesel_schema::identity_mappings;
use super::models::{MappingRow, NewMappingRow, OwnerBatchCount};
use crate::error::MappingError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn find_by_local_key(
    conn: &mut SqliteConnection,
    kind: &str,
    local_key: &str,
) -> Result<Option<MappingRow>, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::local_key.eq(local_key))
        .select(MappingRow::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_by_remote_key(
    conn: &mut SqliteConnection,
    kind: &str,
    remote_key: &str,
) -> Result<Option<MappingRow>, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::remote_key.eq(remote_key))
        .select(MappingRow::as_select())
        .first(conn)
        .optional()?)
}

/// All mappings of one owner, oldest first
pub fn find_by_owner_key(
    conn: &mut SqliteConnection,
    kind: &str,
    owner_key: &str,
) -> Result<Vec<MappingRow>, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::owner_key.eq(owner_key))
        .order((identity_mappings::created_at.asc(), identity_mappings::remote_key.asc()))
        .select(MappingRow::as_select())
        .load(conn)?)
}

/// Children of the given parents across the given child kinds
pub fn find_children(
    conn: &mut SqliteConnection,
    child_kinds: &[&str],
    parent_remote_key: &str,
) -> Result<Vec<MappingRow>, MappingError> {
    if child_kinds.is_empty() {
        return Ok(Vec::new());
    }

    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq_any(child_kinds.to_vec()))
        .filter(identity_mappings::parent_remote_key.eq(parent_remote_key))
        .order((identity_mappings::entity_kind.asc(), identity_mappings::local_key.asc()))
        .select(MappingRow::as_select())
        .load(conn)?)
}

/// Migrated rows of one batch, label descending then remote key
pub fn find_page_by_batch_label(
    conn: &mut SqliteConnection,
    kind: &str,
    batch_label: &str,
    provenance: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<MappingRow>, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::batch_label.eq(batch_label))
        .filter(identity_mappings::provenance.eq(provenance))
        .order((identity_mappings::batch_label.desc(), identity_mappings::remote_key.asc()))
        .limit(limit)
        .offset(offset)
        .select(MappingRow::as_select())
        .load(conn)?)
}

pub fn count_by_batch_label_and_provenance(
    conn: &mut SqliteConnection,
    kind: &str,
    batch_label: &str,
    provenance: &str,
) -> Result<i64, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::batch_label.eq(batch_label))
        .filter(identity_mappings::provenance.eq(provenance))
        .count()
        .get_result(conn)?)
}

/// Exact per-owner counts for one batch, ordered by owner
pub fn owner_counts_by_batch_label(
    conn: &mut SqliteConnection,
    kind: &str,
    batch_label: &str,
    provenance: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<OwnerBatchCount>, MappingError> {
    let rows: Vec<(Option<String>, i64)> = identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::batch_label.eq(batch_label))
        .filter(identity_mappings::provenance.eq(provenance))
        .filter(identity_mappings::owner_key.is_not_null())
        .group_by(identity_mappings::owner_key)
        .select((identity_mappings::owner_key, diesel::dsl::count_star()))
        .order(identity_mappings::owner_key.asc())
        .limit(limit)
        .offset(offset)
        .load(conn)?;

    Ok(rows
        .into_iter()
        .filter_map(|(owner, count)| owner.map(|owner_key| OwnerBatchCount { owner_key, count }))
        .collect())
}

pub fn count_owners_by_batch_label(
    conn: &mut SqliteConnection,
    kind: &str,
    batch_label: &str,
    provenance: &str,
) -> Result<i64, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::batch_label.eq(batch_label))
        .filter(identity_mappings::provenance.eq(provenance))
        .select(diesel::dsl::count_distinct(identity_mappings::owner_key))
        .get_result(conn)?)
}

/// Most recent row with the given provenance, by batch label
pub fn find_latest_by_provenance(
    conn: &mut SqliteConnection,
    kind: &str,
    provenance: &str,
) -> Result<Option<MappingRow>, MappingError> {
    Ok(identity_mappings::table
        .filter(identity_mappings::entity_kind.eq(kind))
        .filter(identity_mappings::provenance.eq(provenance))
        .order((
            identity_mappings::batch_label.desc(),
            identity_mappings::created_at.desc(),
        ))
        .select(MappingRow::as_select())
        .first(conn)
        .optional()?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Plain insert; a clash on either key surfaces as `MappingError::UniqueViolation`
pub fn insert_mapping(conn: &mut SqliteConnection, row: &NewMappingRow<'_>) -> Result<(), MappingError> {
    diesel::insert_into(identity_mappings::table)
        .values(row)
        .execute(conn)?;
    Ok(())
}

pub fn update_owner_key(
    conn: &mut SqliteConnection,
    kind: &str,
    old_owner_key: &str,
    new_owner_key: &str,
) -> Result<usize, MappingError> {
    Ok(diesel::update(
        identity_mappings::table
            .filter(identity_mappings::entity_kind.eq(kind))
            .filter(identity_mappings::owner_key.eq(old_owner_key)),
    )
    .set(identity_mappings::owner_key.eq(Some(new_owner_key)))
    .execute(conn)?)
}

pub fn delete_by_local_key(
    conn: &mut SqliteConnection,
    kind: &str,
    local_key: &str,
) -> Result<usize, MappingError> {
    Ok(diesel::delete(
        identity_mappings::table
            .filter(identity_mappings::entity_kind.eq(kind))
            .filter(identity_mappings::local_key.eq(local_key)),
    )
    .execute(conn)?)
}

pub fn delete_by_remote_key(
    conn: &mut SqliteConnection,
    kind: &str,
    remote_key: &str,
) -> Result<usize, MappingError> {
    Ok(diesel::delete(
        identity_mappings::table
            .filter(identity_mappings::entity_kind.eq(kind))
            .filter(identity_mappings::remote_key.eq(remote_key)),
    )
    .execute(conn)?)
}

pub fn delete_by_owner_key(
    conn: &mut SqliteConnection,
    kind: &str,
    owner_key: &str,
) -> Result<usize, MappingError> {
    Ok(diesel::delete(
        identity_mappings::table
            .filter(identity_mappings::entity_kind.eq(kind))
            .filter(identity_mappings::owner_key.eq(owner_key)),
    )
    .execute(conn)?)
}

/// Delete every child row hanging off any of `parent_remote_keys`
pub fn delete_children_of(
    conn: &mut SqliteConnection,
    child_kinds: &[&str],
    parent_remote_keys: &[String],
) -> Result<usize, MappingError> {
    if child_kinds.is_empty() || parent_remote_keys.is_empty() {
        return Ok(0);
    }

    Ok(diesel::delete(
        identity_mappings::table
            .filter(identity_mappings::entity_kind.eq_any(child_kinds.to_vec()))
            .filter(identity_mappings::parent_remote_key.eq_any(parent_remote_keys)),
    )
    .execute(conn)?)
}

pub fn delete_all_of_kinds(conn: &mut SqliteConnection, kinds: &[&str]) -> Result<usize, MappingError> {
    Ok(diesel::delete(identity_mappings::table.filter(identity_mappings::entity_kind.eq_any(kinds.to_vec())))
        .execute(conn)?)
}

pub fn delete_everything(conn: &mut SqliteConnection) -> Result<usize, MappingError> {
    Ok(diesel::delete(identity_mappings::table).execute(conn)?)
}

// ============================================================================
// Stats
// ============================================================================

pub fn count_by_kind(conn: &mut SqliteConnection) -> Result<Vec<(String, i64)>, MappingError> {
    Ok(identity_mappings::table
        .group_by(identity_mappings::entity_kind)
        .select((identity_mappings::entity_kind, diesel::dsl::count_star()))
        .order(identity_mappings::entity_kind.asc())
        .load(conn)?)
}
