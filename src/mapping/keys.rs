//! Legacy-side keys
//!
//! The legacy system identifies records by plain integers or by composites
//! of integers. Keys are stored as canonical text, composite parts joined
//! with `:`, so one table layout serves every family.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MappingError;

/// Structural shape of a kind's local key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    Simple,
    BookingSequence,
    RelationSlot,
}

/// A legacy-system identifier with a canonical text form
pub trait LocalKey: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    const SHAPE: KeyShape;

    fn encode(&self) -> String;

    fn decode(raw: &str) -> Result<Self, MappingError>;
}

impl LocalKey for i64 {
    const SHAPE: KeyShape = KeyShape::Simple;

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Result<Self, MappingError> {
        raw.parse()
            .map_err(|e| MappingError::Internal(format!("corrupt local key '{}': {}", raw, e)))
    }
}

/// Booking id plus per-booking sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSequence {
    pub booking_id: i64,
    pub sequence: i32,
}

impl BookingSequence {
    pub fn new(booking_id: i64, sequence: i32) -> Self {
        Self { booking_id, sequence }
    }
}

impl fmt::Display for BookingSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.booking_id, self.sequence)
    }
}

impl LocalKey for BookingSequence {
    const SHAPE: KeyShape = KeyShape::BookingSequence;

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Result<Self, MappingError> {
        let corrupt = || MappingError::Internal(format!("corrupt booking sequence key '{}'", raw));
        let (booking, sequence) = raw.split_once(':').ok_or_else(corrupt)?;
        Ok(Self {
            booking_id: booking.parse().map_err(|_| corrupt())?,
            sequence: sequence.parse().map_err(|_| corrupt())?,
        })
    }
}

/// A `(local, remote)` identifier pair without metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPair<K> {
    pub local_key: K,
    pub remote_key: String,
}

impl<K> IdPair<K> {
    pub fn new(local_key: K, remote_key: impl Into<String>) -> Self {
        Self {
            local_key,
            remote_key: remote_key.into(),
        }
    }
}
