// src/id.rs

//! Stable identifiers for staged records.
//!
//! Converters need identifiers that stay the same across runs so that a
//! record staged today can be matched against the same record staged
//! tomorrow. [`hash`] digests an arbitrary source value; [`build`] joins
//! several already-stable parts into a composite key.

use std::fmt::Display;

use blake3::Hasher;

use crate::errors::{ConvoyError, Result};

/// Separator used between the parts of a composite identifier.
pub const SEPARATOR: &str = "-";

/// Deterministic, collision-resistant identifier for `value`.
///
/// Returns the lowercase hex encoding of the blake3 digest.
pub fn hash(value: impl AsRef<[u8]>) -> String {
    let mut hasher = Hasher::new();
    hasher.update(value.as_ref());
    hasher.finalize().to_hex().to_string()
}

/// Join at least two identifier parts with [`SEPARATOR`].
pub fn build<I, P>(parts: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: Display,
{
    let parts: Vec<String> = parts.into_iter().map(|p| p.to_string()).collect();
    if parts.len() < 2 {
        return Err(ConvoyError::Other(anyhow::anyhow!(
            "composite identifier needs at least two parts (got {})",
            parts.len()
        )));
    }
    Ok(parts.join(SEPARATOR))
}
