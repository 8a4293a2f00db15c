//! Human-readable sequential identifiers.
//!
//! Every entity namespace owns a counter in the backing store. The counter
//! value is rendered either as `PREFIX-000123` or, for serial namespaces,
//! as the bare number.

use crate::error::{CoreError, Result};

/// How a namespace counter value is turned into an entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// `PREFIX-` followed by the counter zero-padded to `width` digits.
    Prefixed {
        prefix: &'static str,
        sequence: &'static str,
        width: usize,
    },
    /// The counter rendered as a plain integer.
    Serial { sequence: &'static str },
}

impl IdScheme {
    /// Name of the backing-store counter for this namespace.
    pub fn sequence(&self) -> &'static str {
        match self {
            IdScheme::Prefixed { sequence, .. } | IdScheme::Serial { sequence } => sequence,
        }
    }

    /// Render a counter value as an id.
    pub fn format(&self, value: i64) -> String {
        match self {
            IdScheme::Prefixed { prefix, width, .. } => format_sequential_id(prefix, value, *width),
            IdScheme::Serial { .. } => value.to_string(),
        }
    }

    /// Recover the counter value from an id issued by this scheme.
    pub fn parse(&self, entity: &'static str, id: &str) -> Result<i64> {
        let digits = match self {
            IdScheme::Prefixed { prefix, .. } => id
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('-'))
                .ok_or_else(|| CoreError::invalid_id(entity, id))?,
            IdScheme::Serial { .. } => id,
        };
        digits
            .parse::<i64>()
            .map_err(|_| CoreError::invalid_id(entity, id))
    }
}

/// `format_sequential_id("DP", 1, 6)` yields `DP-000001`.
pub fn format_sequential_id(prefix: &str, value: i64, width: usize) -> String {
    format!("{prefix}-{value:0width$}")
}
