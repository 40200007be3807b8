use std::time::SystemTime;
use log::warn;

use crate::error::DecodeError;
use crate::scale::constants::{DEFAULT_HEIGHT_M, WEIGHT_SCALE};
use crate::scale::types::{Composition, ScaleReading};

const SHORT_FORM_MIN_LEN: usize = 10;
const WEIGHT_MIN_LEN: usize = 13;
const COMPOSITION_MIN_LEN: usize = 20;

const SHORT_FORM_WEIGHT_OFFSET: usize = 1;
const WEIGHT_OFFSET: usize = 11;
const MUSCLE_MASS_OFFSET: usize = 13;
const VISCERAL_FAT_OFFSET: usize = 15;
const BONE_MASS_OFFSET: usize = 16;
const BODY_FAT_OFFSET: usize = 17;
const WATER_OFFSET: usize = 19;
const METABOLIC_AGE_OFFSET: usize = 21;

/// Decodes weight-measurement notifications for a fixed user height.
#[derive(Debug, Clone, Copy)]
pub struct PayloadDecoder {
    height_m: f64,
}

impl PayloadDecoder {
    pub fn new(height_m: f64) -> Self {
        PayloadDecoder { height_m: usable_height(height_m) }
    }

    pub fn from_height_cm(height_cm: f64) -> Self {
        Self::new(height_cm / 100.0)
    }

    pub fn height_m(&self) -> f64 {
        self.height_m
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ScaleReading, DecodeError> {
        decode(bytes, self.height_m, SystemTime::now())
    }
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        PayloadDecoder::new(DEFAULT_HEIGHT_M)
    }
}

/// Decodes the raw value of a weight-measurement notification.
///
/// Buffers of 13 bytes or more carry the weight at offset 11, buffers of 10 to 12 bytes use the
/// short form with the weight at offset 1. Buffers of 20 bytes or more also carry body
/// composition; when its tail does not fit in the buffer only the weight is kept.
pub fn decode(bytes: &[u8], height_m: f64, captured_at: SystemTime) -> Result<ScaleReading, DecodeError> {
    let len = bytes.len();

    if len < SHORT_FORM_MIN_LEN {
        return Err(DecodeError::TooShort { len });
    }

    let weight_offset = if len < WEIGHT_MIN_LEN { SHORT_FORM_WEIGHT_OFFSET } else { WEIGHT_OFFSET };
    let weight_kg = round_to(u16_le(bytes, weight_offset)? as f64 / WEIGHT_SCALE, 2);

    let composition = if len >= COMPOSITION_MIN_LEN {
        match decode_composition(bytes) {
            Ok(composition) => composition,
            Err(err) => {
                warn!("Keeping weight {} kg without body composition: {}", weight_kg, err);
                Composition::default()
            },
        }
    } else {
        Composition::default()
    };

    Ok(ScaleReading::new(weight_kg, bmi(weight_kg, height_m), composition, captured_at))
}

fn decode_composition(bytes: &[u8]) -> Result<Composition, DecodeError> {
    Ok(Composition {
        body_fat_percent: round_to(u16_le(bytes, BODY_FAT_OFFSET)? as f64 / 100.0, 1),
        muscle_mass_kg: round_to(u16_le(bytes, MUSCLE_MASS_OFFSET)? as f64 / WEIGHT_SCALE, 1),
        water_percent: round_to(u16_le(bytes, WATER_OFFSET)? as f64 / 100.0, 1),
        bone_mass_kg: round_to(byte(bytes, BONE_MASS_OFFSET)? as f64 / 10.0, 1),
        visceral_fat_index: byte(bytes, VISCERAL_FAT_OFFSET)?,
        metabolic_age_years: byte(bytes, METABOLIC_AGE_OFFSET)?,
    })
}

/// Reads the battery level characteristic: a single percentage byte.
pub fn decode_battery(bytes: &[u8]) -> Option<u8> {
    bytes.first().map(|level| (*level).min(100))
}

pub fn bmi(weight_kg: f64, height_m: f64) -> f64 {
    if weight_kg <= 0.0 {
        return 0.0;
    }

    let height_m = usable_height(height_m);
    round_to(weight_kg / (height_m * height_m), 1)
}

fn usable_height(height_m: f64) -> f64 {
    if height_m.is_finite() && height_m > 0.0 { height_m } else { DEFAULT_HEIGHT_M }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

fn byte(bytes: &[u8], offset: usize) -> Result<u8, DecodeError> {
    bytes.get(offset).copied().ok_or(DecodeError::Truncated { needed: offset + 1, len: bytes.len() })
}

fn u16_le(bytes: &[u8], offset: usize) -> Result<u16, DecodeError> {
    match bytes.get(offset..offset + 2) {
        Some(pair) => Ok(u16::from_le_bytes([pair[0], pair[1]])),
        None => Err(DecodeError::Truncated { needed: offset + 2, len: bytes.len() }),
    }
}
