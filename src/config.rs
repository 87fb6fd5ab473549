use crate::features::{FeatureDeriver, FeatureSchema, LuxuryMatch};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Artifact file size floor; anything smaller is treated as a broken download.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1_000_000;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Single JSON file with metadata, coefficients and intercept.
    Linear,
    /// TorchScript module plus a metadata sidecar. Needs the `torch` feature.
    Torchscript,
}

/// Where the process runs. Only `Cloud` may fetch the artifact remotely.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Local,
    Cloud,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ArtifactConfig {
    pub path: PathBuf,
    pub meta_path: Option<PathBuf>,
    pub format: ArtifactFormat,
    pub remote_url: Option<String>,
    pub mode: RunMode,
    pub min_bytes: u64,
    pub download_timeout_secs: u64,
    /// Load at startup and exit on failure, instead of on first request.
    pub eager: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("car_price_stacked_pipeline.json"),
            meta_path: None,
            format: ArtifactFormat::Linear,
            remote_url: None,
            mode: RunMode::Local,
            min_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            download_timeout_secs: 120,
            eager: true,
        }
    }
}

impl ArtifactConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Year vehicle age is measured against; current calendar year when unset.
    pub reference_year: Option<i32>,
    pub feature_schema: FeatureSchema,
    pub luxury_match: LuxuryMatch,
    pub validate_inputs: bool,
    pub log_predictions: bool,
    pub artifact: ArtifactConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            reference_year: None,
            feature_schema: FeatureSchema::LogMileage,
            luxury_match: LuxuryMatch::Exact,
            validate_inputs: true,
            log_predictions: false,
            artifact: ArtifactConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// File named by `CONFIG_PATH` (if any), then process environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG_PATH") {
            Ok(p) => Self::load(Path::new(&p))?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = var("BIND_ADDR") {
            self.bind_addr = addr;
        } else if let Some(port) = var("PORT") {
            let port: u16 = port.parse().with_context(|| format!("invalid PORT '{port}'"))?;
            self.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(p) = var("MODEL_PATH") {
            self.artifact.path = PathBuf::from(p);
        }
        if let Some(p) = var("META_PATH") {
            self.artifact.meta_path = Some(PathBuf::from(p));
        }
        if let Some(f) = var("MODEL_FORMAT") {
            self.artifact.format = match f.trim().to_ascii_lowercase().as_str() {
                "linear" => ArtifactFormat::Linear,
                "torchscript" => ArtifactFormat::Torchscript,
                other => bail!("unknown MODEL_FORMAT '{other}'"),
            };
        }
        if let Some(url) = var("MODEL_URL") {
            self.artifact.remote_url = Some(url);
        }
        if let Some(mode) = var("RUN_MODE") {
            self.artifact.mode = match mode.trim().to_ascii_lowercase().as_str() {
                "cloud" => RunMode::Cloud,
                "local" => RunMode::Local,
                other => bail!("unknown RUN_MODE '{other}'"),
            };
        }
        if let Some(y) = var("REFERENCE_YEAR") {
            self.reference_year = Some(y.parse().with_context(|| format!("invalid REFERENCE_YEAR '{y}'"))?);
        }
        if let Some(s) = var("FEATURE_SCHEMA") {
            self.feature_schema = s.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(m) = var("LUXURY_MATCH") {
            self.luxury_match = m.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = var("LOG_PRED") {
            self.log_predictions = v == "1";
        }
        if let Some(v) = var("VALIDATE_INPUTS") {
            self.validate_inputs = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => bail!("invalid VALIDATE_INPUTS '{other}'"),
            };
        }
        Ok(())
    }

    pub fn deriver(&self) -> FeatureDeriver {
        let deriver = match self.reference_year {
            Some(year) => FeatureDeriver::with_reference_year(self.feature_schema, year),
            None => FeatureDeriver::new(self.feature_schema),
        };
        deriver.luxury_match(self.luxury_match)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"feature_schema": "luxury_flag", "artifact": {"path": "m.json", "min_bytes": 10}}"#,
        )
        .unwrap();
        assert_eq!(cfg.feature_schema, FeatureSchema::LuxuryFlag);
        assert_eq!(cfg.artifact.path, PathBuf::from("m.json"));
        assert_eq!(cfg.artifact.min_bytes, 10);
        assert_eq!(cfg.artifact.mode, RunMode::Local);
        assert!(cfg.artifact.eager);
        assert!(cfg.validate_inputs);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn env_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[
            ("PORT", "9000"),
            ("MODEL_PATH", "/models/car.pt"),
            ("META_PATH", "/models/meta.json"),
            ("MODEL_FORMAT", "torchscript"),
            ("RUN_MODE", "cloud"),
            ("MODEL_URL", "https://example.com/car.pt"),
            ("REFERENCE_YEAR", "2025"),
            ("FEATURE_SCHEMA", "luxury_flag"),
            ("LUXURY_MATCH", "case_insensitive"),
            ("LOG_PRED", "1"),
            ("VALIDATE_INPUTS", "0"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.artifact.path, PathBuf::from("/models/car.pt"));
        assert_eq!(cfg.artifact.meta_path, Some(PathBuf::from("/models/meta.json")));
        assert_eq!(cfg.artifact.format, ArtifactFormat::Torchscript);
        assert_eq!(cfg.artifact.mode, RunMode::Cloud);
        assert_eq!(cfg.reference_year, Some(2025));
        assert!(cfg.log_predictions);
        assert!(!cfg.validate_inputs);

        let d = cfg.deriver();
        assert_eq!(d.reference_year(), 2025);
        assert_eq!(d.schema(), FeatureSchema::LuxuryFlag);
    }

    #[test]
    fn bind_addr_wins_over_port() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[("BIND_ADDR", "127.0.0.1:1234"), ("PORT", "9000")])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:1234");
    }

    #[test]
    fn bad_env_values_are_errors() {
        assert!(AppConfig::default().apply_env(env(&[("PORT", "eighty")])).is_err());
        assert!(AppConfig::default().apply_env(env(&[("RUN_MODE", "mars")])).is_err());
        assert!(AppConfig::default().apply_env(env(&[("FEATURE_SCHEMA", "c")])).is_err());
        assert!(AppConfig::default().apply_env(env(&[("VALIDATE_INPUTS", "maybe")])).is_err());
    }

    #[test]
    fn validation_can_be_switched_back_on() {
        let mut cfg: AppConfig = serde_json::from_str(r#"{"validate_inputs": false}"#).unwrap();
        cfg.apply_env(env(&[("VALIDATE_INPUTS", "true")])).unwrap();
        assert!(cfg.validate_inputs);
    }
}
