//! CR-013: Features, standardization, and the one-class boundary model.
//!
//! The default model is a robust-enough elliptic envelope over the two
//! features: a Gaussian fit whose decision threshold is the `(1 - nu)`
//! quantile of the training Mahalanobis distances. Any other model plugs in
//! through `OneClassModel`.

use crate::align::AlignmentRecord;
use crate::core::table::write_atomic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Floor applied to zero E-values before the log transform.
pub const E_VALUE_FLOOR: f64 = 1e-256;

/// Added to every determinant-like quantity that would otherwise be zero.
const RIDGE: f64 = 1e-9;

/// `-log10(E')` where `E' = floor(E) + 1e-256`; always finite for E >= 0.
pub fn transform_e_value(e: f64) -> f64 {
    let e = if e == 0.0 { E_VALUE_FLOOR } else { e };
    -(e + E_VALUE_FLOOR).log10()
}

/// (query alignment length, transformed E-value)
pub type Features = [f64; 2];

pub fn features(records: &[AlignmentRecord]) -> Vec<Features> {
    records
        .iter()
        .map(|r| [r.q_aln_len as f64, transform_e_value(r.e_value)])
        .collect()
}

// ============================================================================
// Scaler
// ============================================================================

/// Per-feature mean / population standard deviation scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Features,
    pub scale: Features,
}

impl StandardScaler {
    pub fn fit(data: &[Features]) -> Result<Self, String> {
        if data.is_empty() {
            return Err("cannot fit scaler on an empty dataset".to_string());
        }
        let n = data.len() as f64;
        let mut mean = [0.0; 2];
        let mut scale = [0.0; 2];
        for j in 0..2 {
            mean[j] = data.iter().map(|x| x[j]).sum::<f64>() / n;
            let var = data.iter().map(|x| (x[j] - mean[j]).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            scale[j] = if std == 0.0 || !std.is_finite() { 1.0 } else { std };
        }
        Ok(Self { mean, scale })
    }

    pub fn transform_one(&self, x: &Features) -> Features {
        [
            (x[0] - self.mean[0]) / self.scale[0],
            (x[1] - self.mean[1]) / self.scale[1],
        ]
    }

    pub fn transform(&self, data: &[Features]) -> Vec<Features> {
        data.iter().map(|x| self.transform_one(x)).collect()
    }
}

// ============================================================================
// Model contract
// ============================================================================

/// A one-class boundary model. Label 1 means inside the boundary.
pub trait OneClassModel: Send {
    fn fit(&mut self, data: &[Features]) -> Result<(), String>;

    /// Signed distance to the boundary; non-negative means inside.
    fn decision_function(&self, x: &Features) -> f64;

    fn is_fitted(&self) -> bool;

    fn predict(&self, x: &Features) -> i8 {
        if self.decision_function(x) >= 0.0 {
            1
        } else {
            -1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    location: Features,
    precision: [[f64; 2]; 2],
    threshold: f64,
}

impl Envelope {
    fn mahalanobis(&self, x: &Features) -> f64 {
        let d = [x[0] - self.location[0], x[1] - self.location[1]];
        let p = &self.precision;
        d[0] * (p[0][0] * d[0] + p[0][1] * d[1]) + d[1] * (p[1][0] * d[0] + p[1][1] * d[1])
    }
}

/// Gaussian elliptic envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipticEnvelope {
    pub nu: f64,
    fitted: Option<Envelope>,
}

impl EllipticEnvelope {
    pub fn new(nu: f64) -> Self {
        Self { nu, fitted: None }
    }
}

impl OneClassModel for EllipticEnvelope {
    fn fit(&mut self, data: &[Features]) -> Result<(), String> {
        if data.is_empty() {
            return Err("cannot fit model on an empty dataset".to_string());
        }
        if !(self.nu > 0.0 && self.nu < 1.0) {
            return Err(format!("nu must be in (0, 1), got {}", self.nu));
        }
        let n = data.len() as f64;
        let location = [
            data.iter().map(|x| x[0]).sum::<f64>() / n,
            data.iter().map(|x| x[1]).sum::<f64>() / n,
        ];
        let mut cov = [[0.0; 2]; 2];
        for x in data {
            let d = [x[0] - location[0], x[1] - location[1]];
            for (i, row) in cov.iter_mut().enumerate() {
                for (j, c) in row.iter_mut().enumerate() {
                    *c += d[i] * d[j] / n;
                }
            }
        }
        let mut det = cov[0][0] * cov[1][1] - cov[0][1] * cov[1][0];
        if det.abs() < RIDGE {
            cov[0][0] += RIDGE.sqrt();
            cov[1][1] += RIDGE.sqrt();
            det = cov[0][0] * cov[1][1] - cov[0][1] * cov[1][0];
        }
        let precision = [
            [cov[1][1] / det, -cov[0][1] / det],
            [-cov[1][0] / det, cov[0][0] / det],
        ];
        let mut env = Envelope {
            location,
            precision,
            threshold: 0.0,
        };
        let mut dist: Vec<f64> = data.iter().map(|x| env.mahalanobis(x)).collect();
        dist.sort_by(f64::total_cmp);
        env.threshold = quantile_sorted(&dist, 1.0 - self.nu);
        debug!(
            "fitted envelope on {} rows: location={:?} threshold={:.4}",
            data.len(),
            env.location,
            env.threshold
        );
        self.fitted = Some(env);
        Ok(())
    }

    fn decision_function(&self, x: &Features) -> f64 {
        match &self.fitted {
            Some(env) => env.threshold - env.mahalanobis(x),
            None => f64::NEG_INFINITY,
        }
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ============================================================================
// Persistence
// ============================================================================

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| format!("cannot serialize {}: {}", path.display(), e))?;
    write_atomic(path, &json)
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid {}: {}", path.display(), e))
}

// ============================================================================
// Classifier
// ============================================================================

/// Model plus scaler, trained in-process or loaded from their artifacts.
#[derive(Debug, Clone)]
pub struct Classifier<M> {
    prototype: M,
    model: Option<M>,
    scaler: Option<StandardScaler>,
    trained: bool,
    model_path: PathBuf,
    scaler_path: PathBuf,
}

/// Handle shared by the fit and predict task actions.
pub type SharedClassifier<M> = Arc<parking_lot::Mutex<Classifier<M>>>;

impl<M> Classifier<M>
where
    M: OneClassModel + Clone + Serialize + DeserializeOwned,
{
    pub fn new(prototype: M, model_path: impl Into<PathBuf>, scaler_path: impl Into<PathBuf>) -> Self {
        Self {
            prototype,
            model: None,
            scaler: None,
            trained: false,
            model_path: model_path.into(),
            scaler_path: scaler_path.into(),
        }
    }

    pub fn shared(self) -> SharedClassifier<M> {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn scaler_path(&self) -> &Path {
        &self.scaler_path
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fit scaler and model on raw features, then persist both.
    pub fn train(&mut self, data: &[Features]) -> Result<(), String> {
        if data.is_empty() {
            return Err("training set is empty".to_string());
        }
        let scaler = StandardScaler::fit(data)?;
        let mut model = self.prototype.clone();
        model.fit(&scaler.transform(data))?;
        save_json(&self.model_path, &model)?;
        save_json(&self.scaler_path, &scaler)?;
        info!(
            "trained classifier on {} rows → {}",
            data.len(),
            self.model_path.display()
        );
        self.model = Some(model);
        self.scaler = Some(scaler);
        self.trained = true;
        Ok(())
    }

    /// Load persisted artifacts unless a model is already in memory.
    pub fn ensure_loaded(&mut self) -> Result<(), String> {
        if self.model.is_some() && self.scaler.is_some() {
            return Ok(());
        }
        let model: M = load_json(&self.model_path)?;
        if !model.is_fitted() {
            return Err(format!("{} holds an unfitted model", self.model_path.display()));
        }
        let scaler: StandardScaler = load_json(&self.scaler_path)?;
        debug!("loaded classifier from {}", self.model_path.display());
        self.model = Some(model);
        self.scaler = Some(scaler);
        Ok(())
    }

    /// Decision values for raw features. Requires a trained or loaded model.
    pub fn decision(&self, data: &[Features]) -> Result<Vec<f64>, String> {
        let (Some(model), Some(scaler)) = (&self.model, &self.scaler) else {
            return Err("classifier is neither trained nor loaded".to_string());
        };
        Ok(data
            .iter()
            .map(|x| model.decision_function(&scaler.transform_one(x)))
            .collect())
    }

    /// In-model mask (label 1) for raw features, loading artifacts on demand.
    pub fn predict(&mut self, data: &[Features]) -> Result<Vec<bool>, String> {
        self.ensure_loaded()?;
        Ok(self.decision(data)?.into_iter().map(|d| d >= 0.0).collect())
    }

    /// Forget the in-memory model; artifacts on disk are untouched.
    pub fn reset(&mut self) {
        self.model = None;
        self.scaler = None;
        self.trained = false;
    }
}
