use crate::error::{ArtifactError, PredictionError};
use crate::features::FeatureDeriver;
use crate::model::{ArtifactContract, ModelInput, PriceModel};
use crate::types::{PredictionResult, RawVehicleRecord};
use std::sync::Arc;

/// Undo the log1p applied to prices at training time.
pub fn inverse_log_price(log_price: f64) -> f64 {
    log_price.exp_m1()
}

/// Round to cents. Values too large to scale have no fractional part left.
pub fn round2(x: f64) -> f64 {
    let scaled = x * 100.0;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / 100.0
}

/// Owns one loaded artifact for the lifetime of the process.
pub struct PredictionService {
    model: Arc<dyn PriceModel>,
    deriver: FeatureDeriver,
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("contract", &self.model.contract())
            .field("deriver", &self.deriver)
            .finish()
    }
}

impl PredictionService {
    /// Binds an artifact to a deriver. The deriver's schema must be the one the
    /// artifact was trained on, if it consumes derived columns at all.
    pub fn new(model: Arc<dyn PriceModel>, deriver: FeatureDeriver) -> Result<Self, ArtifactError> {
        if let ArtifactContract::Derived(artifact) = model.contract() {
            if artifact != deriver.schema() {
                return Err(ArtifactError::SchemaMismatch {
                    configured: deriver.schema(),
                    artifact,
                });
            }
        }
        Ok(Self { model, deriver })
    }

    pub fn deriver(&self) -> &FeatureDeriver {
        &self.deriver
    }

    pub fn contract(&self) -> ArtifactContract {
        self.model.contract()
    }

    pub fn predict(&self, record: &RawVehicleRecord) -> Result<PredictionResult, PredictionError> {
        let log_price = match self.model.contract() {
            ArtifactContract::Raw => self.model.predict_log_price(ModelInput::Raw(record))?,
            ArtifactContract::Derived(_) => {
                let derived = self.deriver.derive(record);
                self.model.predict_log_price(ModelInput::Derived(&derived))?
            }
        };

        let price = inverse_log_price(log_price);
        if !price.is_finite() {
            return Err(PredictionError::NonFiniteOutput(log_price));
        }
        Ok(PredictionResult {
            predicted_price: round2(price),
        })
    }
}
