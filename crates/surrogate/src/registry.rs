use crate::errors::{Result, SurrogateError};
use crate::metrics::{RegressionMetrics, UncertaintyMetrics};
use crate::model::{SurrogateConfig, SurrogateKind, SurrogateModel};
use crate::utils::train_test_split;

use log::{debug, info};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use web_time::{SystemTime, UNIX_EPOCH};

/// Minimum number of samples to train a model
pub const MIN_TRAINING_SAMPLES: usize = 5;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// A registered model with its training history
#[derive(Serialize, Deserialize)]
struct ModelEntry {
    id: String,
    kind: SurrogateKind,
    config: SurrogateConfig,
    model: Box<dyn SurrogateModel>,
    x_history: Array2<f64>,
    y_history: Array1<f64>,
    accuracy: RegressionMetrics,
    created_at: f64,
    updated_at: f64,
}

impl ModelEntry {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            id: self.id.clone(),
            kind: self.kind,
            n_samples: self.y_history.len(),
            n_features: self.x_history.ncols(),
            accuracy: self.accuracy,
            created_at: self.created_at,
            updated_at: self.updated_at,
            description: self.model.to_string(),
        }
    }
}

type Slot = Arc<RwLock<Option<ModelEntry>>>;

/// Summary of a registered model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub kind: SurrogateKind,
    /// Number of samples seen so far
    pub n_samples: usize,
    pub n_features: usize,
    /// Accuracy measured at the last training or update
    pub accuracy: RegressionMetrics,
    /// Seconds since UNIX epoch
    pub created_at: f64,
    pub updated_at: f64,
    pub description: String,
}

/// Outcome of [SurrogateRegistry::train]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub id: String,
    pub kind: SurrogateKind,
    /// r2 on held-out samples, in-sample when nothing is held out
    pub test_r2: f64,
    pub test_rmse: f64,
    pub test_mae: f64,
    pub n_train: usize,
    pub n_test: usize,
    pub initial_training_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<Vec<f64>>,
}

/// Outcome of [SurrogateRegistry::update]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub id: String,
    pub new_samples: usize,
    pub total_samples: usize,
    /// In-sample accuracy over every sample after update
    pub accuracy: RegressionMetrics,
}

/// Outcome of [SurrogateRegistry::evaluate]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: String,
    pub kind: SurrogateKind,
    pub n_test: usize,
    #[serde(flatten)]
    pub metrics: RegressionMetrics,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<UncertaintyMetrics>,
}

/// Registry of surrogate models keyed by id.
///
/// The registry is shared by handle (`Arc<SurrogateRegistry>`). The outer map lock is only
/// held to look up or insert an entry; each entry has its own lock so that training or
/// updating a model excludes other writers and readers of that model only, while
/// predictions on stable models run concurrently.
/// A failing (re)training leaves the previously registered model untouched.
#[derive(Default)]
pub struct SurrogateRegistry {
    models: RwLock<HashMap<String, Slot>>,
}

impl SurrogateRegistry {
    /// Constructor of an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Result<Slot> {
        read(&self.models)
            .get(id)
            .cloned()
            .ok_or_else(|| SurrogateError::UnknownModelError(id.to_string()))
    }

    fn slot_or_insert(&self, id: &str) -> Slot {
        Arc::clone(write(&self.models).entry(id.to_string()).or_default())
    }

    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&ModelEntry) -> Result<T>) -> Result<T> {
        let slot = self.slot(id)?;
        let guard = read(&slot);
        match guard.as_ref() {
            Some(entry) => f(entry),
            None => Err(SurrogateError::UnknownModelError(id.to_string())),
        }
    }

    /// Drops the slot of `id` when it is still registered and holds no model.
    /// A slot locked by a writer is kept, it is about to receive one.
    fn remove_if_empty(&self, id: &str, slot: &Slot) {
        let mut models = write(&self.models);
        let empty = matches!(slot.try_read(), Ok(guard) if guard.is_none());
        if empty && models.get(id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            models.remove(id);
        }
    }

    /// Makes `slot` the one registered under `id`, the caller holding its write lock.
    /// A model deleted or replaced while it was trained is registered again.
    fn register_slot(&self, id: &str, slot: &Slot) {
        let mut models = write(&self.models);
        if !models.get(id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            debug!("Surrogate '{id}' was removed while training, registered again");
            models.insert(id.to_string(), Arc::clone(slot));
        }
    }

    /// Trains a model of the given kind on (x, y) and registers it under `id`,
    /// replacing any previous model of that id.
    ///
    /// Samples are shuffled and `config.test_fraction` of them are held out to measure
    /// accuracy. Fails with [SurrogateError::InsufficientDataError] below
    /// [MIN_TRAINING_SAMPLES] samples.
    pub fn train(
        &self,
        id: &str,
        kind: SurrogateKind,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        config: &SurrogateConfig,
    ) -> Result<TrainingReport> {
        check_samples(x, y)?;
        if x.nrows() < MIN_TRAINING_SAMPLES {
            return Err(SurrogateError::InsufficientDataError {
                required: MIN_TRAINING_SAMPLES,
                actual: x.nrows(),
            });
        }
        config.validate()?;

        let slot = self.slot_or_insert(id);
        let mut guard = write(&slot);
        let split = train_test_split(x, y, config.test_fraction, config.seed);
        let (xm, ym) = if split.x_test.nrows() > 0 {
            (&split.x_test, &split.y_test)
        } else {
            (&split.x_train, &split.y_train)
        };
        let fitted = config
            .fit(kind, &split.x_train.view(), &split.y_train.view())
            .and_then(|model| {
                let predicted = model.predict(&xm.view())?;
                Ok((model, predicted))
            });
        let (model, predicted) = match fitted {
            Ok(fitted) => fitted,
            Err(err) => {
                drop(guard);
                self.remove_if_empty(id, &slot);
                return Err(err);
            }
        };
        let accuracy = RegressionMetrics::compute(ym, &predicted);
        let report = TrainingReport {
            id: id.to_string(),
            kind,
            test_r2: accuracy.r2,
            test_rmse: accuracy.rmse,
            test_mae: accuracy.mae,
            n_train: split.x_train.nrows(),
            n_test: split.x_test.nrows(),
            initial_training_samples: x.nrows(),
            feature_importance: model.feature_importances().map(|v| v.to_vec()),
        };
        info!(
            "Surrogate '{id}' ({kind}) trained on {} samples, r2={:.4}",
            report.n_train, accuracy.r2
        );
        let timestamp = now();
        self.register_slot(id, &slot);
        *guard = Some(ModelEntry {
            id: id.to_string(),
            kind,
            config: config.clone(),
            model,
            x_history: x.to_owned(),
            y_history: y.to_owned(),
            accuracy,
            created_at: timestamp,
            updated_at: timestamp,
        });
        Ok(report)
    }

    /// Predicts outputs at the rows of `x`
    pub fn predict(&self, id: &str, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        self.with_entry(id, |entry| entry.model.predict(x))
    }

    /// Predicts mean and standard deviation at the rows of `x`, gaussian process only
    pub fn predict_with_uncertainty(
        &self,
        id: &str,
        x: &ArrayView2<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        self.with_entry(id, |entry| {
            let (mean, var) = entry.model.predict_valvar(x)?;
            Ok((mean, var.mapv(f64::sqrt)))
        })
    }

    /// Adds samples to the model `id`: gaussian process and tree ensemble are retrained
    /// on all samples, a network continues training on the new samples only.
    pub fn update(
        &self,
        id: &str,
        x_new: &ArrayView2<f64>,
        y_new: &ArrayView1<f64>,
    ) -> Result<UpdateReport> {
        check_samples(x_new, y_new)?;
        let slot = self.slot(id)?;
        let mut guard = write(&slot);
        let entry = guard
            .as_mut()
            .ok_or_else(|| SurrogateError::UnknownModelError(id.to_string()))?;
        if x_new.ncols() != entry.x_history.ncols() {
            return Err(SurrogateError::InvalidValueError(format!(
                "expected inputs with {} components, got {}",
                entry.x_history.ncols(),
                x_new.ncols()
            )));
        }
        let x_all = concatenate(Axis(0), &[entry.x_history.view(), x_new.view()])
            .map_err(|e| SurrogateError::InvalidValueError(e.to_string()))?;
        let y_all = concatenate(Axis(0), &[entry.y_history.view(), y_new.view()])
            .map_err(|e| SurrogateError::InvalidValueError(e.to_string()))?;
        let model =
            entry
                .model
                .updated(&x_all.view(), &y_all.view(), x_new, y_new, &entry.config)?;
        let accuracy = RegressionMetrics::compute(&y_all, &model.predict(&x_all.view())?);
        debug!(
            "Surrogate '{id}' updated with {} samples, r2={:.4}",
            y_new.len(),
            accuracy.r2
        );
        entry.model = model;
        entry.x_history = x_all;
        entry.y_history = y_all;
        entry.accuracy = accuracy;
        entry.updated_at = now();
        Ok(UpdateReport {
            id: id.to_string(),
            new_samples: y_new.len(),
            total_samples: entry.y_history.len(),
            accuracy,
        })
    }

    /// Accuracy of model `id` on the given test set,
    /// with uncertainty calibration for gaussian process models
    pub fn evaluate(
        &self,
        id: &str,
        x_test: &ArrayView2<f64>,
        y_test: &ArrayView1<f64>,
    ) -> Result<EvaluationReport> {
        check_samples(x_test, y_test)?;
        self.with_entry(id, |entry| {
            let (pred, uncertainty) = if entry.kind == SurrogateKind::GaussianProcess {
                let (mean, var) = entry.model.predict_valvar(x_test)?;
                let std = var.mapv(f64::sqrt);
                let calibration = UncertaintyMetrics::compute(y_test, &mean, &std);
                (mean, Some(calibration))
            } else {
                (entry.model.predict(x_test)?, None)
            };
            Ok(EvaluationReport {
                id: id.to_string(),
                kind: entry.kind,
                n_test: y_test.len(),
                metrics: RegressionMetrics::compute(y_test, &pred),
                uncertainty,
            })
        })
    }

    /// Saves model `id` with its history and configuration as json
    pub fn persist(&self, id: &str, path: impl AsRef<Path>) -> Result<()> {
        self.with_entry(id, |entry| {
            let file = File::create(path.as_ref())?;
            serde_json::to_writer(BufWriter::new(file), entry)?;
            info!("Surrogate '{id}' saved to {}", path.as_ref().display());
            Ok(())
        })
    }

    /// Loads a model saved by [SurrogateRegistry::persist] and registers it under its id,
    /// which is returned
    pub fn load(&self, path: impl AsRef<Path>) -> Result<String> {
        let file = File::open(path.as_ref())?;
        let entry: ModelEntry = serde_json::from_reader(BufReader::new(file))?;
        let id = entry.id.clone();
        let slot = self.slot_or_insert(&id);
        *write(&slot) = Some(entry);
        info!("Surrogate '{id}' loaded from {}", path.as_ref().display());
        Ok(id)
    }

    /// Summary of model `id`
    pub fn info(&self, id: &str) -> Result<ModelInfo> {
        self.with_entry(id, |entry| Ok(entry.info()))
    }

    /// Summaries of every registered model sorted by id
    pub fn list(&self) -> Vec<ModelInfo> {
        let slots: Vec<Slot> = read(&self.models).values().cloned().collect();
        let mut infos: Vec<ModelInfo> = slots
            .iter()
            .filter_map(|slot| read(slot).as_ref().map(ModelEntry::info))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Whether a model is registered under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.info(id).is_ok()
    }

    /// Removes model `id`
    pub fn delete(&self, id: &str) -> Result<()> {
        match write(&self.models).remove(id) {
            Some(_) => Ok(()),
            None => Err(SurrogateError::UnknownModelError(id.to_string())),
        }
    }
}

fn check_samples(x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(SurrogateError::InvalidValueError(format!(
            "expected as many outputs as inputs, got {} outputs for {} inputs",
            y.len(),
            x.nrows()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(SurrogateError::InvalidValueError(
            "samples should be finite values".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;
    use crate::network::MlpParams;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use serial_test::serial;

    fn smooth_samples(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array::linspace(0., 10., n).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v: f64| v.sin() + 0.1 * v);
        (x, y)
    }

    fn fast_config() -> SurrogateConfig {
        SurrogateConfig::default()
            .ensemble_tree(ForestParams::new().n_estimators(10))
            .neural_network(MlpParams::new().hidden_layers(vec![8]).max_iter(20))
    }

    #[test]
    fn test_gp_held_out_accuracy() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(50);
        let report = registry
            .train("gp", SurrogateKind::GaussianProcess, &x.view(), &y.view(), &fast_config())
            .unwrap();
        assert_eq!(report.n_train, 40);
        assert_eq!(report.n_test, 10);
        assert_eq!(report.initial_training_samples, 50);
        assert!(report.test_r2 > 0.9, "r2 = {}", report.test_r2);
        assert!(report.feature_importance.is_none());

        let (mean, std) = registry
            .predict_with_uncertainty("gp", &array![[2.5], [7.5]].view())
            .unwrap();
        assert_eq!(mean.len(), 2);
        assert!(std.iter().all(|s| *s >= 0.));
    }

    #[test]
    fn test_insufficient_data() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(4);
        match registry.train("m", SurrogateKind::EnsembleTree, &x.view(), &y.view(), &fast_config()) {
            Err(SurrogateError::InsufficientDataError { required, actual }) => {
                assert_eq!((required, actual), (5, 4))
            }
            _ => panic!("expected insufficient data error"),
        }
        assert!(!registry.contains("m"));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_predict_is_idempotent() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(20);
        for (id, kind) in [
            ("gp", SurrogateKind::GaussianProcess),
            ("rf", SurrogateKind::EnsembleTree),
            ("nn", SurrogateKind::NeuralNetwork),
        ] {
            registry
                .train(id, kind, &x.view(), &y.view(), &fast_config())
                .unwrap();
            let xt = array![[1.25], [3.3], [9.9]];
            let first = registry.predict(id, &xt.view()).unwrap();
            let second = registry.predict(id, &xt.view()).unwrap();
            assert_eq!(first, second);
        }
        let ids: Vec<String> = registry.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["gp", "nn", "rf"]);
    }

    #[test]
    fn test_uncertainty_only_for_gp() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(20);
        registry
            .train("rf", SurrogateKind::EnsembleTree, &x.view(), &y.view(), &fast_config())
            .unwrap();
        assert!(matches!(
            registry.predict_with_uncertainty("rf", &x.view()),
            Err(SurrogateError::UnsupportedOperationError(_))
        ));
        assert!(matches!(
            registry.predict("unknown", &x.view()),
            Err(SurrogateError::UnknownModelError(_))
        ));
    }

    #[test]
    fn test_update_and_evaluate() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(20);
        let config = fast_config().test_fraction(0.);
        let report = registry
            .train("gp", SurrogateKind::GaussianProcess, &x.view(), &y.view(), &config)
            .unwrap();
        assert_eq!(report.n_test, 0);

        let xnew = array![[0.25], [4.75]];
        let ynew = xnew.column(0).mapv(|v: f64| v.sin() + 0.1 * v);
        let update = registry.update("gp", &xnew.view(), &ynew.view()).unwrap();
        assert_eq!(update.new_samples, 2);
        assert_eq!(update.total_samples, 22);
        assert_eq!(registry.info("gp").unwrap().n_samples, 22);
        // updated gaussian process interpolates the new samples
        let pred = registry.predict("gp", &xnew.view()).unwrap();
        assert_abs_diff_eq!(pred, ynew, epsilon = 1e-2);

        let (xt, yt) = smooth_samples(13);
        let eval = registry.evaluate("gp", &xt.view(), &yt.view()).unwrap();
        assert_eq!(eval.n_test, 13);
        assert!(eval.metrics.r2 > 0.9);
        let calibration = eval.uncertainty.unwrap();
        assert!((0.0..=1.0).contains(&calibration.coverage_2std));

        assert!(registry
            .update("gp", &array![[1., 2.]].view(), &array![1.].view())
            .is_err());
        assert_eq!(registry.info("gp").unwrap().n_samples, 22);
    }

    #[test]
    fn test_network_update_warm_starts() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(20);
        registry
            .train("nn", SurrogateKind::NeuralNetwork, &x.view(), &y.view(), &fast_config())
            .unwrap();
        let update = registry
            .update("nn", &array![[5.0]].view(), &array![0.].view())
            .unwrap();
        assert_eq!(update.total_samples, 21);
    }

    #[test]
    #[serial]
    fn test_persist_load_delete() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(15);
        registry
            .train("rf", SurrogateKind::EnsembleTree, &x.view(), &y.view(), &fast_config())
            .unwrap();
        let path = std::env::temp_dir().join("tunebox_registry_rf.json");
        registry.persist("rf", &path).unwrap();
        let xt = array![[2.2], [8.8]];
        let before = registry.predict("rf", &xt.view()).unwrap();
        registry.delete("rf").unwrap();
        assert!(registry.delete("rf").is_err());
        assert!(registry.predict("rf", &xt.view()).is_err());

        let other = SurrogateRegistry::new();
        assert_eq!(other.load(&path).unwrap(), "rf");
        let after = other.predict("rf", &xt.view()).unwrap();
        assert_abs_diff_eq!(before, after, epsilon = 1e-9);
        assert_eq!(other.info("rf").unwrap().n_samples, 15);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_concurrent_predictions() {
        let registry = Arc::new(SurrogateRegistry::new());
        let (x, y) = smooth_samples(12);
        registry
            .train("rf", SurrogateKind::EnsembleTree, &x.view(), &y.view(), &fast_config())
            .unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let xt = array![[i as f64]];
                    registry.predict("rf", &xt.view()).unwrap()[0]
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_finite());
        }
    }

    #[test]
    fn test_delete_while_training_keeps_trained_model() {
        let registry = Arc::new(SurrogateRegistry::new());
        let (x, y) = smooth_samples(60);
        let config = SurrogateConfig::default()
            .neural_network(MlpParams::new().hidden_layers(vec![32, 32]).max_iter(3000));
        let trainer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.train("nn", SurrogateKind::NeuralNetwork, &x.view(), &y.view(), &config)
            })
        };
        // wait for the trainer to hold the slot of "nn"
        let mut deleted = false;
        while !trainer.is_finished() {
            let slot = read(&registry.models).get("nn").cloned();
            if let Some(slot) = slot {
                if slot.try_read().is_err() {
                    registry.delete("nn").unwrap();
                    deleted = true;
                    break;
                }
            }
            std::thread::yield_now();
        }
        let report = trainer.join().unwrap().unwrap();
        assert_eq!(report.id, "nn");
        if deleted {
            assert!(registry.contains("nn"));
            let xt = array![[2.5]];
            assert!(registry.predict("nn", &xt.view()).unwrap()[0].is_finite());
        }
    }

    #[test]
    fn test_empty_slot_removal() {
        let registry = SurrogateRegistry::new();
        let (x, y) = smooth_samples(10);
        let slot = registry.slot_or_insert("m");
        registry.remove_if_empty("m", &slot);
        assert!(read(&registry.models).get("m").is_none());

        // a writer holding the slot keeps it registered
        let slot = registry.slot_or_insert("m");
        let guard = write(&slot);
        registry.remove_if_empty("m", &slot);
        assert!(read(&registry.models).get("m").is_some());
        drop(guard);

        registry
            .train("m", SurrogateKind::EnsembleTree, &x.view(), &y.view(), &fast_config())
            .unwrap();
        assert!(registry.contains("m"));
        assert_eq!(read(&registry.models).len(), 1);
    }
}
