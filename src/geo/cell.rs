//! Spatial cell encoding.
//!
//! A spatial cell is an 8-character geohash naming a geographic rectangle of
//! roughly 38m x 19m. Cells double as topic suffixes on the message bus and
//! as the hysteresis band for movement detection: the cell boundary is the
//! only threshold, there is no additional distance filter.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Geohash base-32 alphabet: digits and letters excluding `a`, `i`, `l`, `o`.
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Fixed cell precision in characters.
pub const CELL_PRECISION: usize = 8;

/// An 8-character spatial cell identifier.
///
/// Only constructible through [`encode`] or [`SpatialCell::parse`], so a held
/// value is always well-formed. Equality is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpatialCell(String);

impl SpatialCell {
    /// Validate an externally supplied cell string.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if is_valid_cell(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CoreError::InvalidCell(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpatialCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a position into its spatial cell.
///
/// Pure and deterministic: the same coordinates always produce the same cell,
/// which movement detection and the tests rely on.
pub fn encode(latitude: f64, longitude: f64) -> SpatialCell {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);

    let mut out = String::with_capacity(CELL_PRECISION);
    let mut bits = 0usize;
    let mut index = 0usize;
    let mut bisect_longitude = true;

    while out.len() < CELL_PRECISION {
        if bisect_longitude {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if longitude >= mid {
                index = (index << 1) | 1;
                lon_range.0 = mid;
            } else {
                index <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if latitude >= mid {
                index = (index << 1) | 1;
                lat_range.0 = mid;
            } else {
                index <<= 1;
                lat_range.1 = mid;
            }
        }
        bisect_longitude = !bisect_longitude;

        bits += 1;
        if bits == 5 {
            out.push(BASE32[index] as char);
            bits = 0;
            index = 0;
        }
    }

    SpatialCell(out)
}

/// Whether a string is exactly one well-formed cell.
///
/// Used to reject malformed topic names before subscribing and to guard
/// against bad externally supplied cell strings.
pub fn is_valid_cell(raw: &str) -> bool {
    raw.len() == CELL_PRECISION && raw.bytes().all(|b| BASE32.contains(&b))
}

/// True iff `current` crosses a cell boundary relative to `previous`.
pub fn is_significant_move(previous: Option<&SpatialCell>, current: &SpatialCell) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => true,
    }
}
