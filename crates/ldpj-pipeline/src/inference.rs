//! Inference adapter: loads a trained classifier + feature scaler and maps
//! a feature vector to `{label, probability, confidence}`.
//!
//! Model training is out of scope for this crate (an offline batch
//! process, see the top-level spec). What lives here is the `InferenceModel`
//! trait boundary and a concrete linear/logistic scorer that deserializes
//! its weights, bias, and per-feature scaler from a JSON artifact -- this
//! keeps the adapter's dependency footprint aligned with the rest of the
//! workspace (no gradient-boosting runtime) while preserving the exact
//! `{label, probability, confidence}` contract callers rely on. A future
//! model backend can be swapped in behind the same trait.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Classification outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceResult {
    /// `0` leak, `1` ok, `-1` unavailable (no model loaded, or inference
    /// failed and the caller chose to degrade rather than propagate).
    pub label: i32,
    /// Model probability, rounded to 6 decimals.
    pub probability: f64,
    /// Derived confidence; see [`InferenceResult::new`] for the relationship.
    pub confidence: f64,
}

impl InferenceResult {
    /// Build a result honoring the `label`/`confidence` relationship: for
    /// `label == 1`, confidence equals probability; for `label == 0`,
    /// confidence is `1 - probability`.
    #[must_use]
    pub fn new(label: i32, probability: f64) -> Self {
        let probability = round6(probability);
        let confidence = if label == 1 {
            probability
        } else {
            round6(1.0 - probability)
        };
        Self {
            label,
            probability,
            confidence,
        }
    }

    /// The canonical "no model available" result.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            label: -1,
            probability: 0.0,
            confidence: 0.0,
        }
    }
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

/// Errors from loading or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The classifier or scaler artifact could not be read or parsed.
    #[error("failed to load model artifact {path}: {source}")]
    Load {
        /// Path to the artifact that failed to load.
        path: String,
        /// Underlying I/O or JSON error.
        #[source]
        source: LoadSource,
    },

    /// `predict` was called with a vector of the wrong dimensionality.
    #[error("feature vector has {got} dims, model expects {expected}")]
    DimensionMismatch {
        /// Dimensions the model was trained with.
        expected: usize,
        /// Dimensions actually supplied.
        got: usize,
    },

    /// `predict` was called before a model was loaded.
    #[error("no model loaded")]
    NotLoaded,
}

/// Underlying cause of a [`ModelError::Load`].
#[derive(Debug, Error)]
pub enum LoadSource {
    /// The artifact file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The artifact's JSON could not be parsed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Trait boundary over the concrete scoring method. The processing loop
/// only ever sees `{label, probability, confidence}`; how that number is
/// produced is an implementation detail behind this trait.
pub trait InferenceModel: Send + Sync {
    /// Score a scaled feature vector, returning a probability in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DimensionMismatch`] if `scaled` does not match
    /// the model's expected input size.
    fn score(&self, scaled: &[f64]) -> Result<f64, ModelError>;

    /// Scale a raw feature vector using this model's fitted scaler.
    fn scale(&self, raw: &[f64]) -> Vec<f64>;

    /// Artifact metadata version string.
    fn version(&self) -> &str;

    /// Expected input dimensionality.
    fn input_dim(&self) -> usize;
}

/// JSON shape of the classifier artifact: a linear/logistic scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassifierArtifact {
    weights: Vec<f64>,
    bias: f64,
    version: String,
}

/// JSON shape of the feature scaler artifact: a `StandardScaler`
/// equivalent, one `(mean, std)` pair per feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerArtifact {
    mean: Vec<f64>,
    std: Vec<f64>,
}

/// Linear/logistic classifier: `p = sigmoid(w . scale(x) + b)`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    classifier: ClassifierArtifact,
    scaler: ScalerArtifact,
}

impl LinearModel {
    /// Load the classifier and scaler artifacts from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Load`] if either file is missing or cannot be
    /// deserialized.
    pub fn load(classifier_path: &Path, scaler_path: &Path) -> Result<Self, ModelError> {
        let classifier = load_json::<ClassifierArtifact>(classifier_path)?;
        let scaler = load_json::<ScalerArtifact>(scaler_path)?;
        Ok(Self { classifier, scaler })
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ModelError> {
    let bytes = std::fs::read(path).map_err(|e| ModelError::Load {
        path: path.display().to_string(),
        source: LoadSource::Io(e),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ModelError::Load {
        path: path.display().to_string(),
        source: LoadSource::Json(e),
    })
}

impl InferenceModel for LinearModel {
    fn score(&self, scaled: &[f64]) -> Result<f64, ModelError> {
        if scaled.len() != self.classifier.weights.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.classifier.weights.len(),
                got: scaled.len(),
            });
        }
        let z: f64 = self
            .classifier
            .weights
            .iter()
            .zip(scaled)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.classifier.bias;
        Ok(sigmoid(z))
    }

    fn scale(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(i, x)| {
                let mean = self.scaler.mean.get(i).copied().unwrap_or(0.0);
                let std = self.scaler.std.get(i).copied().unwrap_or(1.0);
                if std == 0.0 {
                    0.0
                } else {
                    (x - mean) / std
                }
            })
            .collect()
    }

    fn version(&self) -> &str {
        &self.classifier.version
    }

    fn input_dim(&self) -> usize {
        self.classifier.weights.len()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Opaque handle over a trained classifier + scaler pair.
///
/// Carries a `version` string and a `loaded` flag; `predict` fails with
/// [`ModelError::NotLoaded`] until [`InferenceAdapter::load`] succeeds.
#[derive(Default)]
pub struct InferenceAdapter {
    model: Option<Box<dyn InferenceModel>>,
}

impl InferenceAdapter {
    /// Construct an adapter with no model loaded.
    #[must_use]
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Load the classifier + scaler artifacts. On failure the adapter is
    /// left in the "not loaded" state it started in (or keeps whatever was
    /// previously loaded, if this is a reload attempt that failed).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Load`] if either artifact is missing or
    /// malformed.
    pub fn load(&mut self, classifier_path: &Path, scaler_path: &Path) -> Result<(), ModelError> {
        let model = LinearModel::load(classifier_path, scaler_path)?;
        self.model = Some(Box::new(model));
        Ok(())
    }

    /// Whether a model is currently loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// The loaded model's version string, or empty if none is loaded.
    #[must_use]
    pub fn version(&self) -> &str {
        self.model.as_deref().map_or("", InferenceModel::version)
    }

    /// Classify a feature vector.
    ///
    /// `label = 1` if the scored probability meets `threshold`, else `0`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotLoaded`] if no model is loaded, or
    /// [`ModelError::DimensionMismatch`] if `vector` doesn't match the
    /// model's expected input size.
    pub fn predict(&self, vector: &[f64], threshold: f64) -> Result<InferenceResult, ModelError> {
        let model = self.model.as_deref().ok_or(ModelError::NotLoaded)?;
        let scaled = model.scale(vector);
        let p = model.score(&scaled)?;
        let label = i32::from(p >= threshold);
        Ok(InferenceResult::new(label, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_artifact(dir: &std::path::Path, name: &str, json: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_unavailable_result_is_zeroed() {
        let r = InferenceResult::unavailable();
        assert_eq!(r.label, -1);
        assert_eq!(r.probability, 0.0);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_confidence_relationship_for_pass_and_leak() {
        let ok = InferenceResult::new(1, 0.82);
        assert_eq!(ok.confidence, ok.probability);

        let leak = InferenceResult::new(0, 0.18);
        assert_eq!(leak.confidence, 1.0 - leak.probability);
    }

    #[test]
    fn test_adapter_not_loaded_errors() {
        let adapter = InferenceAdapter::new();
        assert!(!adapter.is_loaded());
        assert!(matches!(
            adapter.predict(&[1.0, 2.0], 0.3),
            Err(ModelError::NotLoaded)
        ));
    }

    #[test]
    fn test_adapter_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = InferenceAdapter::new();
        let err = adapter
            .load(&dir.path().join("missing.json"), &dir.path().join("missing2.json"))
            .unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
        assert!(!adapter.is_loaded());
    }

    #[test]
    fn test_adapter_predict_threshold_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let classifier_path = write_artifact(
            dir.path(),
            "classifier.json",
            r#"{"weights": [1.0, 1.0], "bias": 0.0, "version": "test-v1"}"#,
        );
        let scaler_path = write_artifact(
            dir.path(),
            "scaler.json",
            r#"{"mean": [0.0, 0.0], "std": [1.0, 1.0]}"#,
        );

        let mut adapter = InferenceAdapter::new();
        adapter.load(&classifier_path, &scaler_path).unwrap();
        assert!(adapter.is_loaded());
        assert_eq!(adapter.version(), "test-v1");

        let high = adapter.predict(&[5.0, 5.0], 0.3).unwrap();
        assert_eq!(high.label, 1);

        let low = adapter.predict(&[-5.0, -5.0], 0.3).unwrap();
        assert_eq!(low.label, 0);
    }

    #[test]
    fn test_dimension_mismatch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let classifier_path = write_artifact(
            dir.path(),
            "classifier.json",
            r#"{"weights": [1.0, 1.0, 1.0], "bias": 0.0, "version": "v1"}"#,
        );
        let scaler_path = write_artifact(
            dir.path(),
            "scaler.json",
            r#"{"mean": [0.0, 0.0, 0.0], "std": [1.0, 1.0, 1.0]}"#,
        );
        let mut adapter = InferenceAdapter::new();
        adapter.load(&classifier_path, &scaler_path).unwrap();
        let err = adapter.predict(&[1.0, 2.0], 0.3).unwrap_err();
        assert!(matches!(err, ModelError::DimensionMismatch { .. }));
    }
}
