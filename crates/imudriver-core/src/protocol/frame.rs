//! Sensor frame decoding
//!
//! The device answers every command with an ASCII line of comma separated
//! decimal numbers. Three of those fields hold the Euler angles in radians;
//! they are normalized to fractions of π on the way in.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

use crate::vector::Vector3;

/// Field delimiter of inbound lines
pub const FIELD_DELIMITER: char = ',';

/// Raw device units are divided by this constant
pub const NORMALIZATION: f64 = PI;

/// A decoded (x, y, z) reading, normalized to fractions of π
pub type SensorFrame = Vector3;

/// Where the three angle fields sit in a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    /// Angles are the first three fields
    #[default]
    Plain,
    /// A three-field response header precedes the angles (fields 3..6)
    Headed,
}

impl FrameLayout {
    /// Index of the first angle field
    pub fn offset(&self) -> usize {
        match self {
            FrameLayout::Plain => 0,
            FrameLayout::Headed => 3,
        }
    }
}

/// Why a line could not be turned into a frame.
///
/// Decode failures are routine on a noisy link; the worker retries the read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("expected at least {expected} fields, got {found}")]
    MissingFields { expected: usize, found: usize },

    #[error("field {field} is not a number: {value:?}")]
    InvalidNumber { field: usize, value: String },

    #[error("field {field} is not finite")]
    NonFinite { field: usize },
}

/// Decode one inbound line
pub fn decode_frame(line: &str, layout: FrameLayout) -> Result<SensorFrame, DecodeError> {
    let fields: Vec<&str> = line.trim().split(FIELD_DELIMITER).collect();
    let offset = layout.offset();
    let expected = offset + 3;
    if fields.len() < expected {
        return Err(DecodeError::MissingFields {
            expected,
            found: fields.len(),
        });
    }

    let mut angles = [0.0f64; 3];
    for (i, angle) in angles.iter_mut().enumerate() {
        let field = offset + i;
        let raw = fields[field].trim();
        let value: f64 = raw.parse().map_err(|_| DecodeError::InvalidNumber {
            field,
            value: raw.to_string(),
        })?;
        if !value.is_finite() {
            return Err(DecodeError::NonFinite { field });
        }
        *angle = value / NORMALIZATION;
    }

    Ok(SensorFrame::new(angles[0], angles[1], angles[2]))
}

/// Component-wise difference `current - reference`
pub fn orientation_delta(current: SensorFrame, reference: SensorFrame) -> SensorFrame {
    current - reference
}
