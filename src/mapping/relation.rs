//! Relation mappings: a correspondence whose legacy key is a pair of owners

use std::fmt;

use serde::{Deserialize, Serialize};

use super::keys::{KeyShape, LocalKey};
use super::kind::EntityKind;
use super::record::{MappingMeta, MappingRecord};
use crate::error::MappingError;

/// `(first, second, variant)` slot identifying a relation in the legacy system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSlot {
    pub first_owner_key: String,
    pub second_owner_key: String,
    pub variant_sequence: i32,
}

impl RelationSlot {
    pub fn new(first: impl Into<String>, second: impl Into<String>, variant_sequence: i32) -> Self {
        Self {
            first_owner_key: first.into(),
            second_owner_key: second.into(),
            variant_sequence,
        }
    }

    pub fn involves(&self, owner: &str) -> bool {
        self.first_owner_key == owner || self.second_owner_key == owner
    }

    /// The other party when `owner` is one side of this slot
    pub fn partner_of(&self, owner: &str) -> Option<&str> {
        if self.first_owner_key == owner {
            Some(&self.second_owner_key)
        } else if self.second_owner_key == owner {
            Some(&self.first_owner_key)
        } else {
            None
        }
    }

    /// The slot with every occurrence of `old` replaced by `new`
    pub fn reassigned(&self, old: &str, new: &str) -> RelationSlot {
        let swap = |side: &String| if side == old { new.to_string() } else { side.clone() };
        RelationSlot {
            first_owner_key: swap(&self.first_owner_key),
            second_owner_key: swap(&self.second_owner_key),
            variant_sequence: self.variant_sequence,
        }
    }

    pub fn is_self_relation(&self) -> bool {
        self.first_owner_key == self.second_owner_key
    }
}

impl fmt::Display for RelationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.first_owner_key, self.second_owner_key, self.variant_sequence
        )
    }
}

impl LocalKey for RelationSlot {
    const SHAPE: KeyShape = KeyShape::RelationSlot;

    fn encode(&self) -> String {
        self.to_string()
    }

    /// Owner keys never contain `:`; the variant is the last segment.
    fn decode(raw: &str) -> Result<Self, MappingError> {
        let corrupt = || MappingError::Internal(format!("corrupt relation slot '{}'", raw));
        let (owners, variant) = raw.rsplit_once(':').ok_or_else(corrupt)?;
        let (first, second) = owners.split_once(':').ok_or_else(corrupt)?;
        if first.is_empty() || second.is_empty() || second.contains(':') {
            return Err(corrupt());
        }
        Ok(RelationSlot::new(
            first,
            second,
            variant.parse().map_err(|_| corrupt())?,
        ))
    }
}

/// Correspondence between a legacy relation slot and a modern relation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMapping {
    #[serde(flatten)]
    pub slot: RelationSlot,
    pub remote_key: String,
    #[serde(flatten)]
    pub meta: MappingMeta,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl RelationMapping {
    pub fn new(slot: RelationSlot, remote_key: impl Into<String>, meta: MappingMeta) -> Self {
        Self {
            slot,
            remote_key: remote_key.into(),
            meta,
            created_at: None,
        }
    }
}

impl MappingRecord for RelationMapping {
    type Local = RelationSlot;

    fn kind(&self) -> EntityKind {
        EntityKind::PersonRelation
    }

    fn local_key(&self) -> &RelationSlot {
        &self.slot
    }

    fn remote_key(&self) -> &str {
        &self.remote_key
    }

    fn owner_key(&self) -> Option<&str> {
        Some(&self.slot.first_owner_key)
    }

    fn meta(&self) -> &MappingMeta {
        &self.meta
    }

    fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }
}
