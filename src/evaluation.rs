use crate::cinfo;
use crate::data::{LabelVector, PredictionSet};
use crate::diversity::{compute_disagreement, disagreement_matrix, partition_by_label};
use crate::diversity::{DisagreementEntry, DisagreementMatrix, DiversityPartitions};
use crate::ensemble::WholeEnsembleMetrics;
use crate::error::{EvalError, Result};
use crate::evaluator::{aggregate_results, AggregateRow, CombinatorialEvaluator, EnsembleResultRow};
use crate::metrics::{pr_curve, roc_curve, ClassificationMetrics, ClassificationReport, PrCurvePoint, RocCurvePoint};
use crate::param::Param;
use crate::report::PredictionSummary;
use crate::utils::{colored_rate, join_models, strip_ansi_if_needed};
use chrono::Local;
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;

//-----------------------------------------------------------------------------
// Evaluation structures
//-----------------------------------------------------------------------------

/// Metrics of one individual model
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelMetrics {
    pub name: String,
    pub metrics: ClassificationMetrics,
    pub report: Option<ClassificationReport>,
    pub summary: PredictionSummary,
    /// `None` when curves are disabled or undefined on these labels
    pub roc_curve: Option<Vec<RocCurvePoint>>,
    pub pr_curve: Option<Vec<PrCurvePoint>>,
}

/// Everything computed by one evaluation run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Evaluation {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    pub execution_time: f64,
    pub parameters: Param,

    pub sample_count: usize,
    pub positive_count: usize,

    pub per_model_metrics: Vec<ModelMetrics>,
    /// `None` when the prediction set holds no model
    pub whole_ensemble: Option<WholeEnsembleMetrics>,
    pub detailed_rows: Vec<EnsembleResultRow>,
    pub aggregate_rows: Vec<AggregateRow>,
    pub disagreement: Vec<DisagreementEntry>,
    pub disagreement_matrix: Option<DisagreementMatrix>,
    pub diversity_partitions: Option<DiversityPartitions>,
}

pub fn version() -> String {
    format!(
        "{}#{}",
        env!("CARGO_PKG_VERSION"),
        option_env!("FRAUDVOTE_GIT_SHA").unwrap_or("unknown")
    )
}

//-----------------------------------------------------------------------------
// Evaluation entry points
//-----------------------------------------------------------------------------

/// Evaluates a prediction set with default parameters
///
/// # Examples
///
/// ```
/// use fraudvote::data::{LabelVector, ModelPrediction, PredictionSet};
/// use fraudvote::evaluation::evaluate;
///
/// let set = PredictionSet::from_models(vec![
///     ModelPrediction::new("m1", vec![1, 0, 1, 0], vec![0.9, 0.2, 0.7, 0.1]).unwrap(),
///     ModelPrediction::new("m2", vec![1, 1, 0, 0], vec![0.8, 0.6, 0.4, 0.3]).unwrap(),
///     ModelPrediction::new("m3", vec![0, 1, 1, 0], vec![0.4, 0.7, 0.9, 0.2]).unwrap(),
/// ]).unwrap();
/// let labels = LabelVector::new(vec![1, 1, 1, 0]).unwrap();
///
/// let evaluation = evaluate(&set, &labels).unwrap();
/// assert_eq!(evaluation.detailed_rows.len(), 12);
/// ```
pub fn evaluate(predictions: &PredictionSet, labels: &LabelVector) -> Result<Evaluation> {
    evaluate_with_param(predictions, labels, &Param::default())
}

/// Runs every phase: per-model metrics, whole-ensemble votes, the subset
/// sweep with its aggregation, and the diversity analysis.
///
/// # Errors
///
/// Structural errors abort the run, nothing partial is returned:
/// `DimensionMismatch` when a model is not aligned with the labels and
/// `TooManyModels` when the subset sweep exceeds `evaluation.max_models`.
pub fn evaluate_with_param(predictions: &PredictionSet, labels: &LabelVector, param: &Param) -> Result<Evaluation> {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let colorful = param.general.display_colorful;

    predictions.validate_against(labels)?;
    if !labels.has_both_classes() {
        warn!(
            "Labels hold a single class ({} {} / {} {}): ROC-AUC will be undefined",
            labels.positive_count(),
            param.data.positive_class_name,
            labels.negative_count(),
            param.data.negative_class_name
        );
    }

    cinfo!(colorful, "\x1b[1;93mEvaluating {} models on {} samples\x1b[0m", predictions.len(), labels.len());

    let per_model_metrics = compute_model_metrics(predictions, labels, param)?;

    let whole_ensemble = if predictions.is_empty() {
        warn!("Whole-ensemble voting skipped: no model available");
        None
    } else {
        let whole = WholeEnsembleMetrics::compute(predictions, labels)?;
        cinfo!(colorful, "Majority vote | {}", whole.majority_vote);
        cinfo!(colorful, "Soft vote | {}", whole.soft_vote);
        Some(whole)
    };

    let detailed_rows = if param.evaluation.combinations {
        CombinatorialEvaluator::new_from_param(predictions, labels, param)?.evaluate()?
    } else {
        info!("Subset evaluation ignored (disabled in parameters)");
        Vec::new()
    };
    let aggregate_rows = aggregate_results(&detailed_rows);

    let (disagreement, matrix, partitions) = if param.evaluation.diversity {
        (
            compute_disagreement(predictions)?,
            Some(disagreement_matrix(predictions)?),
            Some(partition_by_label(predictions, labels)?),
        )
    } else {
        info!("Diversity analysis ignored (disabled in parameters)");
        (Vec::new(), None, None)
    };

    let prefix = Path::new(&param.general.save_exp)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("fraudvote");

    let execution_time = start.elapsed().as_secs_f64();
    debug!("Evaluation completed in {:.3}s", execution_time);

    Ok(Evaluation {
        id: format!("{}_{}", prefix, timestamp),
        version: version(),
        timestamp,
        execution_time,
        parameters: param.clone(),
        sample_count: labels.len(),
        positive_count: labels.positive_count(),
        per_model_metrics,
        whole_ensemble,
        detailed_rows,
        aggregate_rows,
        disagreement,
        disagreement_matrix: matrix,
        diversity_partitions: partitions,
    })
}

/// Full metric set of every model, computed on a rayon pool (model order kept)
fn compute_model_metrics(predictions: &PredictionSet, labels: &LabelVector, param: &Param) -> Result<Vec<ModelMetrics>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(param.general.thread_number)
        .build()
        .map_err(|e| EvalError::InvalidParam(format!("cannot build thread pool: {}", e)))?;

    let with_report = param.report.classification_reports;
    let with_curves = param.report.curves;
    let per_model: Vec<ModelMetrics> = pool.install(|| {
        predictions
            .models()
            .par_iter()
            .map(|model| {
                let metrics = ClassificationMetrics::compute(model.predictions(), model.probabilities(), labels.as_slice())?;
                let report = if with_report {
                    Some(ClassificationReport::compute(model.predictions(), labels.as_slice())?)
                } else {
                    None
                };
                let (roc, pr) = if with_curves {
                    (
                        defined(roc_curve(model.probabilities(), labels.as_slice()))?,
                        defined(pr_curve(model.probabilities(), labels.as_slice()))?,
                    )
                } else {
                    (None, None)
                };
                Ok(ModelMetrics {
                    name: model.name().to_string(),
                    metrics,
                    report,
                    summary: PredictionSummary::compute(model.predictions(), model.probabilities()),
                    roc_curve: roc,
                    pr_curve: pr,
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;

    for model in &per_model {
        cinfo!(param.general.display_colorful, "{} | {}", model.name, model.metrics);
        if model.metrics.roc_auc.is_none() {
            warn!("ROC-AUC of {} is undefined: labels hold a single class", model.name);
        }
    }
    Ok(per_model)
}

/// Undefined metrics become `None`, other errors still propagate
fn defined<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EvalError::UndefinedMetric { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

//-----------------------------------------------------------------------------
// Display and persistence
//-----------------------------------------------------------------------------

impl Evaluation {
    /// Text summary of the run, colored unless `display_colorful` is off
    pub fn display_results(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("\n=============== Evaluation {} ===============\n\n", self.id));
        text.push_str(&format!("fraudvote version: v{}\n", self.version));
        text.push_str(&format!("Timestamp: {}\n", self.timestamp));
        text.push_str(&format!("Execution time: {:.2}s\n", self.execution_time));
        text.push_str(&format!(
            "Samples: {} ({} {} / {} {})\n\n",
            self.sample_count,
            self.positive_count,
            self.parameters.data.positive_class_name,
            self.sample_count - self.positive_count,
            self.parameters.data.negative_class_name
        ));

        text.push_str("\x1b[1;93mIndividual models\x1b[0m\n");
        for model in &self.per_model_metrics {
            text.push_str(&format!("  {:<20} {}\n", model.name, model.metrics));
        }

        if let Some(whole) = &self.whole_ensemble {
            text.push_str("\n\x1b[1;93mWhole ensemble\x1b[0m\n");
            text.push_str(&format!("  {:<20} {}\n", "majority_vote", whole.majority_vote));
            text.push_str(&format!("  {:<20} {}\n", "soft_vote", whole.soft_vote));
        }

        if !self.aggregate_rows.is_empty() {
            text.push_str("\n\x1b[1;93mMean rates by subset size and rule\x1b[0m\n");
            text.push_str(&format!("  {:>3} {:<10} {:>11} {:>11}\n", "n", "rule", "sensitivity", "specificity"));
            for row in &self.aggregate_rows {
                text.push_str(&format!(
                    "  {:>3} {:<10} {:>11} {:>11}\n",
                    row.n,
                    row.rule.name(),
                    colored_rate(row.sensitivity),
                    colored_rate(row.specificity)
                ));
            }
        }

        if !self.detailed_rows.is_empty() {
            let shown = self.detailed_rows.len().min(20);
            text.push_str(&format!(
                "\n\x1b[1;93mSubset evaluations ({} of {})\x1b[0m\n",
                shown,
                self.detailed_rows.len()
            ));
            for row in self.detailed_rows.iter().take(shown) {
                text.push_str(&format!(
                    "  {:<30} {:<10} sens={} spec={}\n",
                    join_models(&row.models),
                    row.rule.name(),
                    colored_rate(row.sensitivity),
                    colored_rate(row.specificity)
                ));
            }
            if self.detailed_rows.len() > shown {
                text.push_str(&format!("  ... {} more rows\n", self.detailed_rows.len() - shown));
            }
        }

        if !self.disagreement.is_empty() {
            text.push_str("\n\x1b[1;93mPairwise disagreement\x1b[0m\n");
            for entry in &self.disagreement {
                text.push_str(&format!("  {} vs {}: {:.3}\n", entry.model_a, entry.model_b, entry.disagreement));
            }
        }

        strip_ansi_if_needed(&text, self.parameters.general.display_colorful)
    }

    /// Saves the evaluation in a format chosen by file extension.
    ///
    /// `.json` is written as pretty JSON, `.bin`/`.bincode` as bincode. Any
    /// other extension falls back to JSON next to the requested path.
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match extension_of(path).as_str() {
            "json" => self.save_json(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving evaluation in json.");
                self.save_json(path.with_extension("json"))
            }
        }
    }

    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads an evaluation, detecting the format from the file extension
    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<Evaluation> {
        let path = path.as_ref();
        match extension_of(path).as_str() {
            "json" => Self::load_json(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_with_fallback(path),
        }
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Evaluation> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Evaluation> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Tries bincode, then JSON
    fn load_with_fallback(path: &Path) -> Result<Evaluation> {
        if let Ok(evaluation) = Self::load_bincode(path) {
            return Ok(evaluation);
        }
        Self::load_json(path)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
