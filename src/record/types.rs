use std::fmt;
use serde::Serialize;

use crate::scale::types::ScaleReading;

/// Metabolic risk category derived from BMI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetabolicRisk {
    Underweight,
    Normal,
    Overweight,
    Obesity,
}

impl MetabolicRisk {
    pub fn from_bmi(bmi: f64) -> Self {
        if bmi < 18.5 {
            MetabolicRisk::Underweight
        } else if bmi < 25.0 {
            MetabolicRisk::Normal
        } else if bmi < 30.0 {
            MetabolicRisk::Overweight
        } else {
            MetabolicRisk::Obesity
        }
    }
}

impl fmt::Display for MetabolicRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            MetabolicRisk::Underweight => "Underweight",
            MetabolicRisk::Normal => "Normal",
            MetabolicRisk::Overweight => "Overweight",
            MetabolicRisk::Obesity => "Obesity",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    pub reading: ScaleReading,
    pub girth_cm: Option<f64>,
    pub risk: MetabolicRisk,
}

impl MeasurementRecord {
    pub fn new(reading: ScaleReading, girth_cm: Option<f64>) -> Self {
        let risk = MetabolicRisk::from_bmi(reading.bmi());
        MeasurementRecord { reading, girth_cm, risk }
    }
}
