use std::time::SystemTime;

use crate::error::ManualEntryError;
use crate::scale::constants::{
    MANUAL_GIRTH_RANGE_CM, MANUAL_WEIGHT_RANGE_KG, PLACEHOLDER_BODY_FAT_PERCENT, PLACEHOLDER_BONE_MASS_KG,
    PLACEHOLDER_METABOLIC_AGE_YEARS, PLACEHOLDER_MUSCLE_MASS_KG, PLACEHOLDER_VISCERAL_FAT_INDEX, PLACEHOLDER_WATER_PERCENT,
};
use crate::scale::decoder::{bmi, round_to};
use crate::scale::types::{Composition, ScaleReading};

/// Builds readings from values the user typed in, for when the scale can not be used.
#[derive(Debug, Clone, Copy)]
pub struct ManualEntryPath {
    height_cm: f64,
}

impl ManualEntryPath {
    pub fn new(height_cm: f64) -> Self {
        ManualEntryPath { height_cm }
    }

    /// `girth_cm` is only validated here; it travels next to the reading, not inside it.
    pub fn build_reading(&self, weight_kg: f64, girth_cm: Option<f64>) -> Result<ScaleReading, ManualEntryError> {
        self.build_reading_at(weight_kg, girth_cm, SystemTime::now())
    }

    pub fn build_reading_at(&self, weight_kg: f64, girth_cm: Option<f64>, captured_at: SystemTime) -> Result<ScaleReading, ManualEntryError> {
        let (min, max) = MANUAL_WEIGHT_RANGE_KG;
        if !(min..=max).contains(&weight_kg) {
            return Err(ManualEntryError::WeightOutOfRange { weight_kg, min, max });
        }

        check_girth(girth_cm)?;

        if !self.height_cm.is_finite() || self.height_cm <= 0.0 {
            return Err(ManualEntryError::InvalidHeight { height_cm: self.height_cm });
        }

        let weight_kg = round_to(weight_kg, 2);
        let composition = Composition {
            body_fat_percent: PLACEHOLDER_BODY_FAT_PERCENT,
            muscle_mass_kg: PLACEHOLDER_MUSCLE_MASS_KG,
            water_percent: PLACEHOLDER_WATER_PERCENT,
            bone_mass_kg: PLACEHOLDER_BONE_MASS_KG,
            visceral_fat_index: PLACEHOLDER_VISCERAL_FAT_INDEX,
            metabolic_age_years: PLACEHOLDER_METABOLIC_AGE_YEARS,
        };

        Ok(ScaleReading::new(weight_kg, bmi(weight_kg, self.height_cm / 100.0), composition, captured_at))
    }
}

/// Validates an optional abdominal girth against the plausible input range.
pub fn check_girth(girth_cm: Option<f64>) -> Result<(), ManualEntryError> {
    if let Some(girth_cm) = girth_cm {
        let (min, max) = MANUAL_GIRTH_RANGE_CM;
        if !(min..=max).contains(&girth_cm) {
            return Err(ManualEntryError::GirthOutOfRange { girth_cm, min, max });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_reading_with_placeholders() {
        let reading = ManualEntryPath::new(180.0).build_reading(81.0, Some(92.0)).unwrap();

        assert_eq!(reading.weight_kg(), 81.0);
        assert_eq!(reading.bmi(), 25.0);
        assert_eq!(reading.body_fat_percent(), PLACEHOLDER_BODY_FAT_PERCENT);
        assert_eq!(reading.muscle_mass_kg(), PLACEHOLDER_MUSCLE_MASS_KG);
        assert_eq!(reading.water_percent(), PLACEHOLDER_WATER_PERCENT);
        assert_eq!(reading.bone_mass_kg(), PLACEHOLDER_BONE_MASS_KG);
        assert_eq!(reading.visceral_fat_index(), PLACEHOLDER_VISCERAL_FAT_INDEX);
        assert_eq!(reading.metabolic_age_years(), PLACEHOLDER_METABOLIC_AGE_YEARS);
    }

    #[test]
    fn test_rejects_implausible_weight() {
        let path = ManualEntryPath::new(170.0);

        assert!(matches!(path.build_reading(0.0, None), Err(ManualEntryError::WeightOutOfRange { .. })));
        assert!(matches!(path.build_reading(-70.0, None), Err(ManualEntryError::WeightOutOfRange { .. })));
        assert!(matches!(path.build_reading(301.0, None), Err(ManualEntryError::WeightOutOfRange { .. })));
        assert!(matches!(path.build_reading(f64::NAN, None), Err(ManualEntryError::WeightOutOfRange { .. })));
        assert!(path.build_reading(30.0, None).is_ok());
        assert!(path.build_reading(300.0, None).is_ok());
    }

    #[test]
    fn test_rejects_implausible_girth() {
        let path = ManualEntryPath::new(170.0);

        assert!(matches!(path.build_reading(70.0, Some(49.9)), Err(ManualEntryError::GirthOutOfRange { .. })));
        assert!(matches!(path.build_reading(70.0, Some(151.0)), Err(ManualEntryError::GirthOutOfRange { .. })));
        assert!(path.build_reading(70.0, Some(50.0)).is_ok());
    }

    #[test]
    fn test_rejects_unusable_height() {
        let err = ManualEntryPath::new(0.0).build_reading(70.0, None).unwrap_err();
        assert_eq!(err, ManualEntryError::InvalidHeight { height_cm: 0.0 });
    }
}
