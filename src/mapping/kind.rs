//! Entity kinds and provenance
//!
//! Each kind is a logically independent mapping table. Kinds are stored as
//! SCREAMING_SNAKE_CASE strings; parsing also accepts kebab-case so the CLI
//! can take `case-note` as well as `CASE_NOTE`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::keys::{IdPair, KeyShape};
use super::record::{Mapping, MappingMeta};
use crate::error::MappingError;

/// Mapping family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    CaseNote,
    Alert,
    CaseReport,
    CaseReportFactor,
    CaseReportInterview,
    CaseReportPlan,
    Location,
    PersonRelation,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::CaseNote,
        EntityKind::Alert,
        EntityKind::CaseReport,
        EntityKind::CaseReportFactor,
        EntityKind::CaseReportInterview,
        EntityKind::CaseReportPlan,
        EntityKind::Location,
        EntityKind::PersonRelation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::CaseNote => "CASE_NOTE",
            EntityKind::Alert => "ALERT",
            EntityKind::CaseReport => "CASE_REPORT",
            EntityKind::CaseReportFactor => "CASE_REPORT_FACTOR",
            EntityKind::CaseReportInterview => "CASE_REPORT_INTERVIEW",
            EntityKind::CaseReportPlan => "CASE_REPORT_PLAN",
            EntityKind::Location => "LOCATION",
            EntityKind::PersonRelation => "PERSON_RELATION",
        }
    }

    /// Shape of the legacy-side key for this kind
    pub fn key_shape(&self) -> KeyShape {
        match self {
            EntityKind::Alert => KeyShape::BookingSequence,
            EntityKind::PersonRelation => KeyShape::RelationSlot,
            _ => KeyShape::Simple,
        }
    }

    /// Whether every mapping of this kind must name its owner
    pub fn requires_owner(&self) -> bool {
        matches!(
            self,
            EntityKind::CaseNote | EntityKind::Alert | EntityKind::CaseReport
        )
    }

    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            EntityKind::CaseReportFactor
            | EntityKind::CaseReportInterview
            | EntityKind::CaseReportPlan => Some(EntityKind::CaseReport),
            _ => None,
        }
    }

    pub fn children(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::CaseReport => &[
                EntityKind::CaseReportFactor,
                EntityKind::CaseReportInterview,
                EntityKind::CaseReportPlan,
            ],
            _ => &[],
        }
    }

    /// Child kinds as stored strings, for cascade queries
    pub fn child_names(&self) -> Vec<&'static str> {
        self.children().iter().map(|k| k.as_str()).collect()
    }

    /// Kinds stored in the `identity_mappings` table
    pub fn is_family_kind(&self) -> bool {
        !matches!(self, EntityKind::PersonRelation)
    }

    /// Build a child row of this kind under `parent`.
    ///
    /// Children inherit the parent's owner so owner-wide deletes and
    /// reassignments see the whole tree.
    pub fn child_mapping<K>(
        self,
        parent: &Mapping<K>,
        pair: IdPair<i64>,
        meta: &MappingMeta,
    ) -> Result<Mapping<i64>, MappingError> {
        match self {
            EntityKind::CaseReportFactor
            | EntityKind::CaseReportInterview
            | EntityKind::CaseReportPlan
                if self.parent() == Some(parent.kind) =>
            {
                Ok(Mapping {
                    kind: self,
                    local_key: pair.local_key,
                    remote_key: pair.remote_key,
                    owner_key: parent.owner_key.clone(),
                    parent_remote_key: Some(parent.remote_key.clone()),
                    meta: meta.clone(),
                    created_at: None,
                })
            }
            _ => Err(MappingError::validation(format!(
                "{} is not a child kind of {}",
                self, parent.kind
            ))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| MappingError::validation(format!("unknown entity kind '{}'", s)))
    }
}

/// Which system or process originated a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    Migrated,
    LegacyCreated,
    ModernCreated,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Migrated => "MIGRATED",
            Provenance::LegacyCreated => "LEGACY_CREATED",
            Provenance::ModernCreated => "MODERN_CREATED",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MIGRATED" => Ok(Provenance::Migrated),
            "LEGACY_CREATED" => Ok(Provenance::LegacyCreated),
            "MODERN_CREATED" => Ok(Provenance::ModernCreated),
            other => Err(MappingError::Internal(format!("unknown provenance '{}'", other))),
        }
    }
}
