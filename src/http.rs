use crate::artifact::ServiceHandle;
use crate::features::current_year;
use crate::types::{DerivedFeatureRecord, PredictionResult, RawVehicleRecord};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const MIN_YEAR: i32 = 1970;
pub const MAX_KILOMETER: f64 = 500_000.0;

type ApiError = (StatusCode, Json<Value>);

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ServiceHandle>,
    pub validate_inputs: bool,
    pub log_predictions: bool,
}

impl AppState {
    pub fn new(service: Arc<ServiceHandle>) -> Self {
        Self {
            service,
            validate_inputs: true,
            log_predictions: false,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/features", post(features))
        .route("/health", get(health))
        .with_state(state)
}

// ---------- Validation ----------

/// Caller-side checks that run before the core sees a record.
pub fn validate(record: &RawVehicleRecord, max_year: i32) -> Vec<String> {
    let mut errs = Vec::new();
    if !(MIN_YEAR..=max_year).contains(&record.year) {
        errs.push("Year out of range.".to_string());
    }
    if record.kilometer < 0.0 {
        errs.push("Mileage must be >= 0.".to_string());
    } else if record.kilometer > MAX_KILOMETER {
        errs.push("Mileage must be <= 500000.".to_string());
    }
    errs
}

// ---------- Handlers ----------

async fn predict(
    State(state): State<AppState>,
    Json(record): Json<RawVehicleRecord>,
) -> Result<Json<PredictionResult>, ApiError> {
    if state.validate_inputs {
        let errs = validate(&record, current_year());
        if !errs.is_empty() {
            return Err((StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "errors": errs }))));
        }
    }

    let service = state.service.get().await.map_err(|e| {
        tracing::error!("model unavailable: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("model unavailable: {e}") })),
        )
    })?;

    let out = service.predict(&record).map_err(|e| {
        tracing::warn!("prediction failed for make={} model={}: {}", record.make, record.model, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("prediction error: {e}") })),
        )
    })?;

    if state.log_predictions {
        let d = service.deriver().derive(&record);
        tracing::info!(
            "recv make={} model={} fuel={} trans={} year={} km={} age={} mpy={:.1} {}={:.3} price={:.2}",
            record.make,
            record.model,
            record.fuel_type,
            record.transmission,
            record.year,
            record.kilometer,
            d.age,
            d.mileage_per_year,
            d.extra.column_name(),
            d.extra.value(),
            out.predicted_price
        );
    }

    Ok(Json(out))
}

async fn features(
    State(state): State<AppState>,
    Json(record): Json<RawVehicleRecord>,
) -> Json<DerivedFeatureRecord> {
    Json(state.service.deriver().derive(&record))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let deriver = state.service.deriver();
    Json(json!({
        "status": "ok",
        "model_loaded": state.service.is_loaded(),
        "feature_schema": deriver.schema().as_str(),
        "reference_year": deriver.reference_year(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(year: i32, km: f64) -> RawVehicleRecord {
        RawVehicleRecord::new("Toyota", "Corolla", "Petrol", "Automatic", year, km)
    }

    #[test]
    fn validation_rules() {
        assert!(validate(&car(2020, 40_000.0), 2025).is_empty());
        assert!(validate(&car(1970, 0.0), 2025).is_empty());
        assert!(validate(&car(2025, 0.0), 2025).is_empty());
        assert_eq!(validate(&car(1969, 0.0), 2025), ["Year out of range."]);
        assert_eq!(validate(&car(2026, 0.0), 2025), ["Year out of range."]);
        assert!(validate(&car(2020, 500_000.0), 2025).is_empty());
        assert_eq!(validate(&car(2020, 500_000.5), 2025), ["Mileage must be <= 500000."]);
        assert_eq!(validate(&car(2020, 1e9), 2025), ["Mileage must be <= 500000."]);
        assert_eq!(
            validate(&car(0, -1.0), 2025),
            ["Year out of range.", "Mileage must be >= 0."]
        );
    }
}
