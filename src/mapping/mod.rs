//! Domain types shared by the store and the engine
//!
//! - [`EntityKind`] names a mapping family; [`Provenance`] says who created a row
//! - [`LocalKey`] gives legacy keys (plain or composite) a canonical text form
//! - [`MappingRecord`] is the capability the generic engine works against,
//!   implemented by [`Mapping`] and [`RelationMapping`]

pub mod keys;
pub mod kind;
pub mod record;
pub mod relation;

pub use keys::{BookingSequence, IdPair, KeyShape, LocalKey};
pub use kind::{EntityKind, Provenance};
pub use record::{Mapping, MappingMeta, MappingRecord, MappingSnapshot};
pub use relation::{RelationMapping, RelationSlot};
