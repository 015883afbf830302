//! The mapping record capability and the generic per-family mapping

use std::fmt;

use serde::{Deserialize, Serialize};

use super::keys::LocalKey;
use super::kind::{EntityKind, Provenance};
use crate::error::MappingError;

/// Batch label and provenance shared by every mapping row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingMeta {
    #[serde(default)]
    pub batch_label: Option<String>,
    pub provenance: Provenance,
}

impl MappingMeta {
    pub fn migrated(batch_label: impl Into<String>) -> Self {
        Self {
            batch_label: Some(batch_label.into()),
            provenance: Provenance::Migrated,
        }
    }

    /// Migrated, labelled with the current UTC time as migration runs are
    pub fn migrated_now() -> Self {
        Self::migrated(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    pub fn legacy_created() -> Self {
        Self {
            batch_label: None,
            provenance: Provenance::LegacyCreated,
        }
    }

    pub fn modern_created() -> Self {
        Self {
            batch_label: None,
            provenance: Provenance::ModernCreated,
        }
    }

    /// Migrated rows carry a batch label; live-synchronised rows never do.
    pub fn validate(&self) -> Result<(), MappingError> {
        match (self.provenance, self.batch_label.as_deref()) {
            (Provenance::Migrated, None) | (Provenance::Migrated, Some("")) => Err(
                MappingError::validation("migrated mappings require a batch label"),
            ),
            (Provenance::Migrated, Some(_)) | (_, None) => Ok(()),
            (provenance, Some(label)) => Err(MappingError::validation(format!(
                "{} mappings cannot carry batch label '{}'",
                provenance, label
            ))),
        }
    }
}

/// Capability every stored correspondence exposes to the engine
pub trait MappingRecord: Clone + fmt::Debug + Send + Sync + 'static {
    type Local: LocalKey;

    fn kind(&self) -> EntityKind;

    fn local_key(&self) -> &Self::Local;

    fn remote_key(&self) -> &str;

    fn owner_key(&self) -> Option<&str>;

    fn meta(&self) -> &MappingMeta;

    fn created_at(&self) -> Option<&str>;

    /// Same correspondence on both sides; composite keys compare field by field.
    fn same_identity(&self, other: &Self) -> bool {
        self.local_key() == other.local_key() && self.remote_key() == other.remote_key()
    }

    fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            kind: self.kind(),
            local_key: self.local_key().encode(),
            remote_key: self.remote_key().to_string(),
            owner_key: self.owner_key().map(str::to_string),
            batch_label: self.meta().batch_label.clone(),
            provenance: self.meta().provenance,
            created_at: self.created_at().map(str::to_string),
        }
    }
}

/// A correspondence in one of the `identity_mappings` families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping<K> {
    pub kind: EntityKind,
    pub local_key: K,
    pub remote_key: String,
    #[serde(default)]
    pub owner_key: Option<String>,
    #[serde(default)]
    pub parent_remote_key: Option<String>,
    #[serde(flatten)]
    pub meta: MappingMeta,
    /// Stamped by the store on insert
    #[serde(default)]
    pub created_at: Option<String>,
}

impl<K> Mapping<K> {
    pub fn new(kind: EntityKind, local_key: K, remote_key: impl Into<String>, meta: MappingMeta) -> Self {
        Self {
            kind,
            local_key,
            remote_key: remote_key.into(),
            owner_key: None,
            parent_remote_key: None,
            meta,
            created_at: None,
        }
    }

    pub fn with_owner(mut self, owner_key: impl Into<String>) -> Self {
        self.owner_key = Some(owner_key.into());
        self
    }

    pub fn with_parent(mut self, parent_remote_key: impl Into<String>) -> Self {
        self.parent_remote_key = Some(parent_remote_key.into());
        self
    }
}

impl<K: LocalKey> MappingRecord for Mapping<K> {
    type Local = K;

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn local_key(&self) -> &K {
        &self.local_key
    }

    fn remote_key(&self) -> &str {
        &self.remote_key
    }

    fn owner_key(&self) -> Option<&str> {
        self.owner_key.as_deref()
    }

    fn meta(&self) -> &MappingMeta {
        &self.meta
    }

    fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }
}

/// Kind-erased copy of a mapping, carried in duplicate-conflict errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSnapshot {
    pub kind: EntityKind,
    pub local_key: String,
    pub remote_key: String,
    pub owner_key: Option<String>,
    pub batch_label: Option<String>,
    pub provenance: Provenance,
    pub created_at: Option<String>,
}

impl fmt::Display for MappingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} <-> {}]", self.kind, self.local_key, self.remote_key)
    }
}
