//! Diesel model definitions for the mapping tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Insertables never carry `created_at`; the column DEFAULT stamps it.

use diesel::prelude::*;
use serde::Serialize;

use super::diesel_schema::*;

// ============================================================================
// Identity Mapping Models
// ============================================================================

/// Row from `identity_mappings`
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = identity_mappings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MappingRow {
    pub entity_kind: String,
    pub remote_key: String,
    pub local_key: String,
    pub owner_key: Option<String>,
    pub parent_remote_key: Option<String>,
    pub batch_label: Option<String>,
    pub provenance: String,
    pub created_at: String,
}

/// New identity mapping for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = identity_mappings)]
pub struct NewMappingRow<'a> {
    pub entity_kind: &'a str,
    pub remote_key: &'a str,
    pub local_key: &'a str,
    pub owner_key: Option<&'a str>,
    pub parent_remote_key: Option<&'a str>,
    pub batch_label: Option<&'a str>,
    pub provenance: &'a str,
}

// ============================================================================
// Relation Mapping Models
// ============================================================================

/// Row from `relation_mappings`
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = relation_mappings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RelationRow {
    pub remote_key: String,
    pub first_owner_key: String,
    pub second_owner_key: String,
    pub variant_sequence: i32,
    pub batch_label: Option<String>,
    pub provenance: String,
    pub created_at: String,
}

/// New relation mapping for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = relation_mappings)]
pub struct NewRelationRow<'a> {
    pub remote_key: &'a str,
    pub first_owner_key: &'a str,
    pub second_owner_key: &'a str,
    pub variant_sequence: i32,
    pub batch_label: Option<&'a str>,
    pub provenance: &'a str,
}

// ============================================================================
// Aggregates
// ============================================================================

/// Per-owner row count inside one migration batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerBatchCount {
    pub owner_key: String,
    pub count: i64,
}
