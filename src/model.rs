use crate::error::{ArtifactError, PredictionError};
use crate::features::FeatureSchema;
use crate::types::{DerivedFeatureRecord, FeatureValue, RawVehicleRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// What an artifact was trained to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactContract {
    /// Artifact embeds its own feature transform and takes raw fields.
    Raw,
    /// Artifact expects columns already derived under the given schema.
    Derived(FeatureSchema),
}

impl ArtifactContract {
    pub fn column_names(&self) -> Vec<&'static str> {
        match self {
            ArtifactContract::Raw => vec!["make", "model", "fuel_type", "transmission", "year", "kilometer"],
            ArtifactContract::Derived(schema) => schema.column_names().to_vec(),
        }
    }

    /// Map an artifact's column name onto the column this contract produces.
    /// Exact names win; otherwise the training-data spellings (`Kilometer`,
    /// `Kilometer_log`) are accepted.
    pub fn resolve(&self, name: &str) -> Option<&'static str> {
        let known = self.column_names();
        if let Some(&n) = known.iter().find(|&&n| n == name) {
            return Some(n);
        }
        let alias = COLUMN_ALIASES
            .iter()
            .find(|(from, _)| *from == name)
            .map(|(_, to)| *to)?;
        known.into_iter().find(|&n| n == alias)
    }
}

const COLUMN_ALIASES: &[(&str, &str)] = &[("Kilometer", "kilometer"), ("Kilometer_log", "kilometer_log")];

#[derive(Debug, Clone, Copy)]
pub enum ModelInput<'a> {
    Raw(&'a RawVehicleRecord),
    Derived(&'a DerivedFeatureRecord),
}

impl<'a> ModelInput<'a> {
    pub fn columns(&self) -> Vec<(&'static str, FeatureValue<'a>)> {
        match *self {
            ModelInput::Raw(r) => r.columns(),
            ModelInput::Derived(d) => d.columns(),
        }
    }
}

/// Capability every trained artifact offers: one row in, one log-scale price out.
pub trait PriceModel: Send + Sync {
    fn contract(&self) -> ArtifactContract;

    fn predict_log_price(&self, input: ModelInput<'_>) -> Result<f64, PredictionError>;
}

// ---------- Artifact metadata ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Raw,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    #[default]
    Error,
    Ignore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Feature column to read, when it differs from `name`.
    #[serde(default)]
    pub source: Option<String>,
    pub kind: ColumnKind,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSpec {
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_lowercase")]
    pub lowercase: bool,
    #[serde(default)]
    pub handle_unknown: UnknownPolicy,
}

fn default_lowercase() -> bool {
    true
}

/// Sidecar description shipped with every artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactMeta {
    pub input: InputKind,
    #[serde(default)]
    pub schema: Option<FeatureSchema>,
    pub encoder: EncoderSpec,
}

impl ArtifactMeta {
    pub fn contract(&self) -> Result<ArtifactContract, ArtifactError> {
        match (self.input, self.schema) {
            (InputKind::Raw, _) => Ok(ArtifactContract::Raw),
            (InputKind::Derived, Some(schema)) => Ok(ArtifactContract::Derived(schema)),
            (InputKind::Derived, None) => Err(ArtifactError::Contract(
                "derived input requires a feature schema".into(),
            )),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let txt = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
        Ok(serde_json::from_str(&txt)?)
    }
}

// ---------- Column encoder ----------

#[derive(Debug, Clone)]
enum EncodedColumn {
    Numeric,
    OneHot(HashMap<String, usize>),
}

/// Turns named columns into the flat numeric row an artifact consumes.
///
/// Numeric columns contribute one value, categorical columns a one-hot block
/// in vocabulary order. Case folding, when enabled, belongs to the artifact
/// and happens here rather than in feature derivation.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    // (artifact column name, feature column it reads, encoding)
    columns: Vec<(String, &'static str, EncodedColumn)>,
    lowercase: bool,
    handle_unknown: UnknownPolicy,
    width: usize,
}

impl FeatureEncoder {
    pub fn new(spec: &EncoderSpec, contract: ArtifactContract) -> Result<Self, ArtifactError> {
        let mut columns = Vec::with_capacity(spec.columns.len());
        let mut width = 0;

        for col in &spec.columns {
            let wanted = col.source.as_deref().unwrap_or(&col.name);
            let source = contract.resolve(wanted).ok_or_else(|| {
                ArtifactError::Contract(format!(
                    "column '{}' is not produced for {:?} input",
                    wanted, contract
                ))
            })?;
            let encoded = match col.kind {
                ColumnKind::Numeric => {
                    width += 1;
                    EncodedColumn::Numeric
                }
                ColumnKind::Categorical => {
                    if col.categories.is_empty() {
                        return Err(ArtifactError::Contract(format!(
                            "categorical column '{}' has no categories",
                            col.name
                        )));
                    }
                    let mut vocab = HashMap::with_capacity(col.categories.len());
                    for (i, c) in col.categories.iter().enumerate() {
                        let key = if spec.lowercase { c.to_lowercase() } else { c.clone() };
                        if vocab.insert(key, i).is_some() {
                            return Err(ArtifactError::Contract(format!(
                                "duplicate category '{}' in column '{}'",
                                c, col.name
                            )));
                        }
                    }
                    width += col.categories.len();
                    EncodedColumn::OneHot(vocab)
                }
            };
            columns.push((col.name.clone(), source, encoded));
        }

        Ok(Self {
            columns,
            lowercase: spec.lowercase,
            handle_unknown: spec.handle_unknown,
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn encode(&self, input: &[(&str, FeatureValue<'_>)]) -> Result<Vec<f64>, PredictionError> {
        let mut out = vec![0.0; self.width];
        let mut offset = 0;

        for (name, source, encoded) in &self.columns {
            let value = input
                .iter()
                .find(|(n, _)| n == source)
                .map(|(_, v)| *v)
                .ok_or_else(|| PredictionError::SchemaMismatch(format!("missing column '{name}'")))?;

            match (encoded, value) {
                (EncodedColumn::Numeric, FeatureValue::Number(x)) => {
                    out[offset] = x;
                    offset += 1;
                }
                (EncodedColumn::OneHot(vocab), FeatureValue::Text(s)) => {
                    let key = if self.lowercase { s.to_lowercase() } else { s.to_string() };
                    match vocab.get(&key) {
                        Some(&i) => out[offset + i] = 1.0,
                        None if self.handle_unknown == UnknownPolicy::Ignore => {}
                        None => {
                            return Err(PredictionError::UnknownCategory {
                                column: name.clone(),
                                value: s.to_string(),
                            })
                        }
                    }
                    offset += vocab.len();
                }
                (EncodedColumn::Numeric, FeatureValue::Text(_)) => {
                    return Err(PredictionError::SchemaMismatch(format!(
                        "column '{name}' is numeric but got text"
                    )))
                }
                (EncodedColumn::OneHot(_), FeatureValue::Number(_)) => {
                    return Err(PredictionError::SchemaMismatch(format!(
                        "column '{name}' is categorical but got a number"
                    )))
                }
            }
        }

        Ok(out)
    }
}

// ---------- Linear export ----------

/// A regression exported as plain coefficients over the encoded row.
#[derive(Debug, Deserialize)]
struct LinearArtifact {
    #[serde(flatten)]
    meta: ArtifactMeta,
    coefficients: Vec<f64>,
    intercept: f64,
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    contract: ArtifactContract,
    encoder: FeatureEncoder,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn from_json(txt: &str) -> Result<Self, ArtifactError> {
        let art: LinearArtifact = serde_json::from_str(txt)?;
        let contract = art.meta.contract()?;
        let encoder = FeatureEncoder::new(&art.meta.encoder, contract)?;
        if art.coefficients.len() != encoder.width() {
            return Err(ArtifactError::Contract(format!(
                "{} coefficients for an encoded width of {}",
                art.coefficients.len(),
                encoder.width()
            )));
        }
        if !art.intercept.is_finite() || art.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ArtifactError::Contract("non-finite coefficient".into()));
        }
        Ok(Self {
            contract,
            encoder,
            coefficients: art.coefficients,
            intercept: art.intercept,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let txt = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
        Self::from_json(&txt)
    }
}

impl PriceModel for LinearModel {
    fn contract(&self) -> ArtifactContract {
        self.contract
    }

    fn predict_log_price(&self, input: ModelInput<'_>) -> Result<f64, PredictionError> {
        let x = self.encoder.encode(&input.columns())?;
        Ok(self.intercept + x.iter().zip(&self.coefficients).map(|(a, b)| a * b).sum::<f64>())
    }
}

// ---------- TorchScript ----------

#[cfg(feature = "torch")]
pub use torch::TorchModel;

#[cfg(feature = "torch")]
mod torch {
    use super::*;
    use tch::{kind::Kind, CModule, Device, Tensor};

    pub struct TorchModel {
        model: CModule,
        device: Device,
        contract: ArtifactContract,
        encoder: FeatureEncoder,
    }

    impl TorchModel {
        pub fn new(model_path: &Path, meta_path: &Path) -> Result<Self, ArtifactError> {
            let device = Device::Cpu;

            let meta = ArtifactMeta::load(meta_path)?;
            let contract = meta.contract()?;
            let encoder = FeatureEncoder::new(&meta.encoder, contract)?;

            let model = CModule::load_on_device(model_path, device).map_err(|e| {
                ArtifactError::Backend(format!("failed to load TorchScript {}: {e}", model_path.display()))
            })?;

            let this = Self {
                model,
                device,
                contract,
                encoder,
            };

            // Probe with a zero row: the output must collapse to a single value
            this.forward(&vec![0.0; this.encoder.width()])
                .map_err(|e| ArtifactError::Backend(format!("warmup forward failed: {e}")))?;

            Ok(this)
        }

        fn forward(&self, x: &[f64]) -> Result<f64, PredictionError> {
            let width = self.encoder.width();
            if x.len() != width {
                return Err(PredictionError::SchemaMismatch(format!(
                    "feature length mismatch: got {}, expected {}",
                    x.len(),
                    width
                )));
            }

            let row: Vec<f32> = x.iter().map(|v| *v as f32).collect();
            let input = Tensor::from_slice(&row)
                .reshape([1, width as i64])
                .to_device(self.device);

            let t = self
                .model
                .forward_ts(&[input])
                .map_err(|e| PredictionError::Backend(e.to_string()))?;
            if t.numel() != 1 {
                return Err(PredictionError::Backend(format!(
                    "unexpected model output size: {:?}",
                    t.size()
                )));
            }
            t.to_kind(Kind::Double)
                .reshape([1])
                .f_double_value(&[0])
                .map_err(|e| PredictionError::Backend(e.to_string()))
        }
    }

    impl PriceModel for TorchModel {
        fn contract(&self) -> ArtifactContract {
            self.contract
        }

        fn predict_log_price(&self, input: ModelInput<'_>) -> Result<f64, PredictionError> {
            let x = self.encoder.encode(&input.columns())?;
            self.forward(&x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaFeature;
    use serde_json::json;

    fn linear_json(handle_unknown: &str) -> String {
        json!({
            "input": "derived",
            "schema": "log_mileage",
            "encoder": {
                "columns": [
                    {"name": "make", "kind": "categorical", "categories": ["Toyota", "BMW"]},
                    {"name": "age", "kind": "numeric"},
                    {"name": "kilometer_log", "kind": "numeric"}
                ],
                "handle_unknown": handle_unknown
            },
            "coefficients": [0.5, 1.5, -0.1, 0.2],
            "intercept": 9.0
        })
        .to_string()
    }

    fn derived(make: &str) -> DerivedFeatureRecord {
        DerivedFeatureRecord {
            make: make.into(),
            model: "Corolla".into(),
            fuel_type: "Petrol".into(),
            transmission: "Automatic".into(),
            age: 7,
            mileage_per_year: 8571.0,
            extra: SchemaFeature::KilometerLog(10.0),
        }
    }

    #[test]
    fn encoder_lays_out_one_hot_blocks() {
        let m = LinearModel::from_json(&linear_json("error")).unwrap();
        assert_eq!(m.encoder.width(), 4);
        let d = derived("bmw");
        let x = m.encoder.encode(&d.columns()).unwrap();
        assert_eq!(x, vec![0.0, 1.0, 7.0, 10.0]);
    }

    #[test]
    fn linear_prediction() {
        let m = LinearModel::from_json(&linear_json("error")).unwrap();
        assert_eq!(m.contract(), ArtifactContract::Derived(FeatureSchema::LogMileage));
        let d = derived("Toyota");
        let y = m.predict_log_price(ModelInput::Derived(&d)).unwrap();
        // 9.0 + 0.5 - 0.7 + 2.0
        assert!((y - 10.8).abs() < 1e-12);
    }

    #[test]
    fn unknown_category_errors_or_zeroes() {
        let strict = LinearModel::from_json(&linear_json("error")).unwrap();
        let d = derived("Skoda");
        let err = strict.predict_log_price(ModelInput::Derived(&d)).unwrap_err();
        assert!(matches!(err, PredictionError::UnknownCategory { ref column, .. } if column == "make"));

        let lenient = LinearModel::from_json(&linear_json("ignore")).unwrap();
        let y = lenient.predict_log_price(ModelInput::Derived(&d)).unwrap();
        assert!((y - 10.3).abs() < 1e-12);
    }

    #[test]
    fn derived_input_with_wrong_schema_column_is_a_mismatch() {
        let m = LinearModel::from_json(&linear_json("error")).unwrap();
        let mut d = derived("Toyota");
        d.extra = SchemaFeature::IsLuxuryBrand(0);
        let err = m.predict_log_price(ModelInput::Derived(&d)).unwrap_err();
        assert!(matches!(err, PredictionError::SchemaMismatch(_)));
    }

    #[test]
    fn rejects_bad_contracts() {
        let wrong_width = json!({
            "input": "raw",
            "encoder": {"columns": [{"name": "year", "kind": "numeric"}]},
            "coefficients": [1.0, 2.0],
            "intercept": 0.0
        });
        assert!(matches!(
            LinearModel::from_json(&wrong_width.to_string()),
            Err(ArtifactError::Contract(_))
        ));

        let no_schema = json!({
            "input": "derived",
            "encoder": {"columns": []},
            "coefficients": [],
            "intercept": 0.0
        });
        assert!(matches!(
            LinearModel::from_json(&no_schema.to_string()),
            Err(ArtifactError::Contract(_))
        ));

        let foreign_column = json!({
            "input": "raw",
            "encoder": {"columns": [{"name": "age", "kind": "numeric"}]},
            "coefficients": [1.0],
            "intercept": 0.0
        });
        assert!(matches!(
            LinearModel::from_json(&foreign_column.to_string()),
            Err(ArtifactError::Contract(_))
        ));
    }

    #[test]
    fn training_column_names_resolve() {
        // column names as they appear in the training data
        let derived_art = json!({
            "input": "derived",
            "schema": "log_mileage",
            "encoder": {
                "columns": [
                    {"name": "brand", "source": "make", "kind": "categorical", "categories": ["Toyota", "BMW"]},
                    {"name": "age", "kind": "numeric"},
                    {"name": "Kilometer_log", "kind": "numeric"}
                ]
            },
            "coefficients": [0.5, 1.5, -0.1, 0.2],
            "intercept": 9.0
        });
        let m = LinearModel::from_json(&derived_art.to_string()).unwrap();
        let y = m.predict_log_price(ModelInput::Derived(&derived("Toyota"))).unwrap();
        assert!((y - 10.8).abs() < 1e-12);
        let err = m.predict_log_price(ModelInput::Derived(&derived("Lada"))).unwrap_err();
        assert!(matches!(err, PredictionError::UnknownCategory { ref column, .. } if column == "brand"));

        let raw_art = json!({
            "input": "raw",
            "encoder": {"columns": [{"name": "Kilometer", "kind": "numeric"}]},
            "coefficients": [0.001],
            "intercept": 1.0
        });
        let m = LinearModel::from_json(&raw_art.to_string()).unwrap();
        let r = RawVehicleRecord::new("Toyota", "Corolla", "Petrol", "Manual", 2000, 10_000.0);
        assert!((m.predict_log_price(ModelInput::Raw(&r)).unwrap() - 11.0).abs() < 1e-9);

        // an alias still has to name a column the contract produces
        assert_eq!(ArtifactContract::Raw.resolve("Kilometer_log"), None);
        assert_eq!(
            ArtifactContract::Derived(FeatureSchema::LuxuryFlag).resolve("Kilometer_log"),
            None
        );
    }

    #[test]
    fn raw_contract_reads_raw_columns() {
        let art = json!({
            "input": "raw",
            "encoder": {
                "lowercase": false,
                "columns": [
                    {"name": "fuel_type", "kind": "categorical", "categories": ["Petrol", "Diesel"]},
                    {"name": "year", "kind": "numeric"},
                    {"name": "kilometer", "kind": "numeric"}
                ]
            },
            "coefficients": [0.0, 1.0, 0.001, 0.0001],
            "intercept": -2.0
        });
        let m = LinearModel::from_json(&art.to_string()).unwrap();
        let r = RawVehicleRecord::new("Toyota", "Corolla", "Diesel", "Manual", 2000, 10_000.0);
        let y = m.predict_log_price(ModelInput::Raw(&r)).unwrap();
        assert!((y - (-2.0 + 1.0 + 2.0 + 1.0)).abs() < 1e-9);

        // lowercase disabled: case matters
        let r = RawVehicleRecord::new("Toyota", "Corolla", "diesel", "Manual", 2000, 10_000.0);
        assert!(m.predict_log_price(ModelInput::Raw(&r)).is_err());
    }
}
