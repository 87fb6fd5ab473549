use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One vehicle as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawVehicleRecord {
    pub make: String,
    pub model: String,
    pub fuel_type: String,
    pub transmission: String,
    // numeric fields never fail to decode; junk becomes 0
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: i32,
    #[serde(default, alias = "Kilometer", deserialize_with = "lenient_kilometer")]
    pub kilometer: f64, // odometer reading, km
}

impl RawVehicleRecord {
    pub fn new(
        make: impl Into<String>,
        model: impl Into<String>,
        fuel_type: impl Into<String>,
        transmission: impl Into<String>,
        year: i32,
        kilometer: f64,
    ) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            fuel_type: fuel_type.into(),
            transmission: transmission.into(),
            year,
            kilometer,
        }
    }

    /// Named columns in the order an artifact with an embedded transform sees them.
    pub fn columns(&self) -> Vec<(&'static str, FeatureValue<'_>)> {
        vec![
            ("make", FeatureValue::Text(&self.make)),
            ("model", FeatureValue::Text(&self.model)),
            ("fuel_type", FeatureValue::Text(&self.fuel_type)),
            ("transmission", FeatureValue::Text(&self.transmission)),
            ("year", FeatureValue::Number(f64::from(self.year))),
            ("kilometer", FeatureValue::Number(self.kilometer)),
        ]
    }
}

/// A single cell handed to an artifact encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    Text(&'a str),
    Number(f64),
}

/// Schema-specific trailing column of a derived record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFeature {
    IsLuxuryBrand(u8),
    KilometerLog(f64),
}

impl SchemaFeature {
    pub fn column_name(&self) -> &'static str {
        match self {
            SchemaFeature::IsLuxuryBrand(_) => "is_luxury_brand",
            SchemaFeature::KilometerLog(_) => "kilometer_log",
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            SchemaFeature::IsLuxuryBrand(flag) => f64::from(flag),
            SchemaFeature::KilometerLog(v) => v,
        }
    }
}

/// Feature row the trained pipeline consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatureRecord {
    pub make: String,
    pub model: String,
    pub fuel_type: String,
    pub transmission: String,
    pub age: i32,
    pub mileage_per_year: f64,
    #[serde(flatten)]
    pub extra: SchemaFeature,
}

impl DerivedFeatureRecord {
    /// Named columns in training order: categoricals, age, mileage_per_year, schema column.
    pub fn columns(&self) -> Vec<(&'static str, FeatureValue<'_>)> {
        vec![
            ("make", FeatureValue::Text(&self.make)),
            ("model", FeatureValue::Text(&self.model)),
            ("fuel_type", FeatureValue::Text(&self.fuel_type)),
            ("transmission", FeatureValue::Text(&self.transmission)),
            ("age", FeatureValue::Number(f64::from(self.age))),
            ("mileage_per_year", FeatureValue::Number(self.mileage_per_year)),
            (self.extra.column_name(), FeatureValue::Number(self.extra.value())),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    pub predicted_price: f64,
}

/// Coerce a loosely typed JSON value to a year. Non-numeric input yields 0.
pub fn coerce_year(value: &Value) -> i32 {
    // `as` saturates, so absurd magnitudes clamp instead of wrapping
    coerce_number(value).map(|v| v.trunc() as i32).unwrap_or(0)
}

/// Coerce a loosely typed JSON value to an odometer reading. Non-numeric input yields 0.
pub fn coerce_kilometer(value: &Value) -> f64 {
    coerce_number(value).unwrap_or(0.0)
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn lenient_year<'de, D: Deserializer<'de>>(de: D) -> Result<i32, D::Error> {
    let v = Option::<Value>::deserialize(de)?;
    Ok(v.as_ref().map(coerce_year).unwrap_or(0))
}

fn lenient_kilometer<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    let v = Option::<Value>::deserialize(de)?;
    Ok(v.as_ref().map(coerce_kilometer).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_kilometer_alias() {
        let r: RawVehicleRecord = serde_json::from_value(json!({
            "make": "Toyota", "model": "Corolla", "fuel_type": "Petrol",
            "transmission": "Automatic", "year": 2018, "Kilometer": 60000
        }))
        .unwrap();
        assert_eq!(r.year, 2018);
        assert_eq!(r.kilometer, 60000.0);
    }

    #[test]
    fn junk_numbers_become_zero() {
        let r: RawVehicleRecord = serde_json::from_value(json!({
            "make": "Toyota", "model": "Corolla", "fuel_type": "Petrol",
            "transmission": "Automatic", "year": "not a year"
        }))
        .unwrap();
        assert_eq!(r.year, 0);
        assert_eq!(r.kilometer, 0.0);

        assert_eq!(coerce_year(&json!(null)), 0);
        assert_eq!(coerce_year(&json!(" 2019 ")), 2019);
        assert_eq!(coerce_year(&json!(2018.9)), 2018);
        assert_eq!(coerce_kilometer(&json!("12.5")), 12.5);
        assert_eq!(coerce_kilometer(&json!("NaN")), 0.0);
        assert_eq!(coerce_kilometer(&json!([1, 2])), 0.0);
    }

    #[test]
    fn derived_record_serializes_schema_column_flat() {
        let d = DerivedFeatureRecord {
            make: "BMW".into(),
            model: "X5".into(),
            fuel_type: "Diesel".into(),
            transmission: "Automatic".into(),
            age: 5,
            mileage_per_year: 1000.0,
            extra: SchemaFeature::IsLuxuryBrand(1),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["is_luxury_brand"], 1);
        assert!(v.get("extra").is_none());

        let names: Vec<_> = d.columns().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            ["make", "model", "fuel_type", "transmission", "age", "mileage_per_year", "is_luxury_brand"]
        );
    }
}
