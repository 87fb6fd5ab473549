//! Feature derivation shared by every artifact that expects pre-derived columns.
//!
//! The transform is pure: given the same reference year it always maps a
//! [`RawVehicleRecord`] to the same [`DerivedFeatureRecord`]. Output column
//! names and order must match the schema the paired artifact was trained on;
//! the two schemas are not interchangeable.

use crate::types::{DerivedFeatureRecord, RawVehicleRecord, SchemaFeature};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Brands flagged by the luxury schema, title-cased as in the training data.
pub const LUXURY_BRANDS: [&str; 5] = ["BMW", "Audi", "Mercedes", "Lexus", "Porsche"];

/// Which trailing column the derived record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSchema {
    /// `is_luxury_brand` (0/1)
    LuxuryFlag,
    /// `kilometer_log` = ln(1 + kilometer)
    LogMileage,
}

impl FeatureSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureSchema::LuxuryFlag => "luxury_flag",
            FeatureSchema::LogMileage => "log_mileage",
        }
    }

    /// Column names produced under this schema, in order.
    pub fn column_names(&self) -> [&'static str; 7] {
        let last = match self {
            FeatureSchema::LuxuryFlag => "is_luxury_brand",
            FeatureSchema::LogMileage => "kilometer_log",
        };
        ["make", "model", "fuel_type", "transmission", "age", "mileage_per_year", last]
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "luxury_flag" | "luxury" | "a" => Ok(FeatureSchema::LuxuryFlag),
            "log_mileage" | "kilometer_log" | "b" => Ok(FeatureSchema::LogMileage),
            other => Err(format!("unknown feature schema '{other}'")),
        }
    }
}

/// How `make` is compared against [`LUXURY_BRANDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LuxuryMatch {
    #[default]
    Exact,
    CaseInsensitive,
}

impl FromStr for LuxuryMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(LuxuryMatch::Exact),
            "case_insensitive" | "insensitive" => Ok(LuxuryMatch::CaseInsensitive),
            other => Err(format!("unknown luxury match mode '{other}'")),
        }
    }
}

/// Current calendar year from the local clock.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDeriver {
    reference_year: i32,
    schema: FeatureSchema,
    luxury_match: LuxuryMatch,
}

impl FeatureDeriver {
    /// Deriver whose reference year is the current calendar year.
    pub fn new(schema: FeatureSchema) -> Self {
        Self::with_reference_year(schema, current_year())
    }

    pub fn with_reference_year(schema: FeatureSchema, reference_year: i32) -> Self {
        Self {
            reference_year,
            schema,
            luxury_match: LuxuryMatch::default(),
        }
    }

    pub fn luxury_match(mut self, mode: LuxuryMatch) -> Self {
        self.luxury_match = mode;
        self
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    pub fn derive(&self, record: &RawVehicleRecord) -> DerivedFeatureRecord {
        // no floor: a future year gives a negative age, and a negative rate below
        let age = self.reference_year.saturating_sub(record.year);
        let divisor = if age == 0 { 1 } else { age };
        let mileage_per_year = record.kilometer / f64::from(divisor);

        let extra = match self.schema {
            FeatureSchema::LuxuryFlag => SchemaFeature::IsLuxuryBrand(u8::from(self.is_luxury(&record.make))),
            // unguarded: NaN below -1
            FeatureSchema::LogMileage => SchemaFeature::KilometerLog(record.kilometer.ln_1p()),
        };

        DerivedFeatureRecord {
            make: record.make.clone(),
            model: record.model.clone(),
            fuel_type: record.fuel_type.clone(),
            transmission: record.transmission.clone(),
            age,
            mileage_per_year,
            extra,
        }
    }

    pub fn derive_batch(&self, records: &[RawVehicleRecord]) -> Vec<DerivedFeatureRecord> {
        records.iter().map(|r| self.derive(r)).collect()
    }

    fn is_luxury(&self, make: &str) -> bool {
        match self.luxury_match {
            LuxuryMatch::Exact => LUXURY_BRANDS.contains(&make),
            LuxuryMatch::CaseInsensitive => LUXURY_BRANDS.iter().any(|b| b.eq_ignore_ascii_case(make)),
        }
    }
}
