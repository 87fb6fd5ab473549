//! Used-car price estimation served over HTTP.
//!
//! A trained regression artifact predicts log-scale prices from vehicle
//! attributes. This crate derives the features that artifact expects, calls
//! it behind the [`PriceModel`] capability, and turns the output back into a
//! price.

pub mod artifact;
pub mod config;
pub mod error;
pub mod features;
pub mod http;
pub mod model;
pub mod service;
pub mod types;

pub use artifact::ServiceHandle;
pub use config::AppConfig;
pub use error::{ArtifactError, PredictionError};
pub use features::{FeatureDeriver, FeatureSchema, LuxuryMatch};
pub use model::{ArtifactContract, LinearModel, ModelInput, PriceModel};
pub use service::PredictionService;
pub use types::{DerivedFeatureRecord, PredictionResult, RawVehicleRecord, SchemaFeature};
