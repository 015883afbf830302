//! Relation mapping queries using Diesel
//!
//! A relation row names two owners directly. Lookups by party check both
//! columns; slot lookups can optionally ignore the order of the pair.

use diesel::prelude::*;

use super::diesel_schema::relation_mappings;
use super::models::{NewRelationRow, RelationRow};
use crate::error::MappingError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn find_by_remote_key(
    conn: &mut SqliteConnection,
    remote_key: &str,
) -> Result<Option<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::remote_key.eq(remote_key))
        .select(RelationRow::as_select())
        .first(conn)
        .optional()?)
}

/// Exact `(first, second, variant)` lookup
pub fn find_by_slot(
    conn: &mut SqliteConnection,
    first_owner_key: &str,
    second_owner_key: &str,
    variant_sequence: i32,
) -> Result<Option<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::first_owner_key.eq(first_owner_key))
        .filter(relation_mappings::second_owner_key.eq(second_owner_key))
        .filter(relation_mappings::variant_sequence.eq(variant_sequence))
        .select(RelationRow::as_select())
        .first(conn)
        .optional()?)
}

/// Slot lookup treating `(a, b)` and `(b, a)` as the same pair
pub fn find_by_pair_either_order(
    conn: &mut SqliteConnection,
    a: &str,
    b: &str,
    variant_sequence: i32,
) -> Result<Vec<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::variant_sequence.eq(variant_sequence))
        .filter(
            relation_mappings::first_owner_key
                .eq(a)
                .and(relation_mappings::second_owner_key.eq(b))
                .or(relation_mappings::first_owner_key
                    .eq(b)
                    .and(relation_mappings::second_owner_key.eq(a))),
        )
        .order(relation_mappings::remote_key.asc())
        .select(RelationRow::as_select())
        .load(conn)?)
}

/// Every relation where `owner_key` is either party
pub fn find_touching(conn: &mut SqliteConnection, owner_key: &str) -> Result<Vec<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(
            relation_mappings::first_owner_key
                .eq(owner_key)
                .or(relation_mappings::second_owner_key.eq(owner_key)),
        )
        .order(relation_mappings::remote_key.asc())
        .select(RelationRow::as_select())
        .load(conn)?)
}

/// Relations between `owner_key` and any of `partners`
pub fn find_touching_with_partners(
    conn: &mut SqliteConnection,
    owner_key: &str,
    partners: &[String],
) -> Result<Vec<RelationRow>, MappingError> {
    if partners.is_empty() {
        return Ok(Vec::new());
    }

    Ok(relation_mappings::table
        .filter(
            relation_mappings::first_owner_key
                .eq(owner_key)
                .and(relation_mappings::second_owner_key.eq_any(partners))
                .or(relation_mappings::second_owner_key
                    .eq(owner_key)
                    .and(relation_mappings::first_owner_key.eq_any(partners))),
        )
        .order(relation_mappings::remote_key.asc())
        .select(RelationRow::as_select())
        .load(conn)?)
}

pub fn find_page_by_batch_label(
    conn: &mut SqliteConnection,
    batch_label: &str,
    provenance: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::batch_label.eq(batch_label))
        .filter(relation_mappings::provenance.eq(provenance))
        .order((relation_mappings::batch_label.desc(), relation_mappings::remote_key.asc()))
        .limit(limit)
        .offset(offset)
        .select(RelationRow::as_select())
        .load(conn)?)
}

pub fn count_by_batch_label_and_provenance(
    conn: &mut SqliteConnection,
    batch_label: &str,
    provenance: &str,
) -> Result<i64, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::batch_label.eq(batch_label))
        .filter(relation_mappings::provenance.eq(provenance))
        .count()
        .get_result(conn)?)
}

pub fn find_latest_by_provenance(
    conn: &mut SqliteConnection,
    provenance: &str,
) -> Result<Option<RelationRow>, MappingError> {
    Ok(relation_mappings::table
        .filter(relation_mappings::provenance.eq(provenance))
        .order((
            relation_mappings::batch_label.desc(),
            relation_mappings::created_at.desc(),
        ))
        .select(RelationRow::as_select())
        .first(conn)
        .optional()?)
}

pub fn count_all(conn: &mut SqliteConnection) -> Result<i64, MappingError> {
    Ok(relation_mappings::table.count().get_result(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_relation(conn: &mut SqliteConnection, row: &NewRelationRow<'_>) -> Result<(), MappingError> {
    diesel::insert_into(relation_mappings::table)
        .values(row)
        .execute(conn)?;
    Ok(())
}

/// Rewrite both parties of one relation
pub fn update_parties(
    conn: &mut SqliteConnection,
    remote_key: &str,
    first_owner_key: &str,
    second_owner_key: &str,
) -> Result<usize, MappingError> {
    Ok(diesel::update(relation_mappings::table.filter(relation_mappings::remote_key.eq(remote_key)))
        .set((
            relation_mappings::first_owner_key.eq(first_owner_key),
            relation_mappings::second_owner_key.eq(second_owner_key),
        ))
        .execute(conn)?)
}

pub fn delete_by_remote_key(conn: &mut SqliteConnection, remote_key: &str) -> Result<usize, MappingError> {
    Ok(diesel::delete(relation_mappings::table.filter(relation_mappings::remote_key.eq(remote_key)))
        .execute(conn)?)
}

pub fn delete_by_slot(
    conn: &mut SqliteConnection,
    first_owner_key: &str,
    second_owner_key: &str,
    variant_sequence: i32,
) -> Result<usize, MappingError> {
    Ok(diesel::delete(
        relation_mappings::table
            .filter(relation_mappings::first_owner_key.eq(first_owner_key))
            .filter(relation_mappings::second_owner_key.eq(second_owner_key))
            .filter(relation_mappings::variant_sequence.eq(variant_sequence)),
    )
    .execute(conn)?)
}

pub fn delete_everything(conn: &mut SqliteConnection) -> Result<usize, MappingError> {
    Ok(diesel::delete(relation_mappings::table).execute(conn)?)
}
