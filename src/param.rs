use crate::error::{EvalError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub evaluation: Evaluation,
    #[serde(default)]
    pub report: Report,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "empty_string")]
    pub save_exp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    #[serde(default = "empty_string")]
    pub predictions: String,
    #[serde(default = "label_column_default")]
    pub label_column: String,
    #[serde(default = "prediction_suffix_default")]
    pub prediction_suffix: String,
    #[serde(default = "probability_suffix_default")]
    pub probability_suffix: String,
    #[serde(default = "positive_class_name_default")]
    pub positive_class_name: String,
    #[serde(default = "negative_class_name_default")]
    pub negative_class_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Evaluation {
    #[serde(default = "max_models_default")]
    pub max_models: usize,
    #[serde(default = "warn_above_combinations_default")]
    pub warn_above_combinations: u64,
    #[serde(default = "false_default")]
    pub parallel: bool,
    #[serde(default = "true_default")]
    pub combinations: bool,
    #[serde(default = "true_default")]
    pub diversity: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Report {
    #[serde(default = "empty_string")]
    pub output_dir: String,
    #[serde(default = "true_default")]
    pub classification_reports: bool,
    #[serde(default = "true_default")]
    pub roc_points: bool,
    /// Per-model ROC and precision-recall curve points
    #[serde(default = "true_default")]
    pub curves: bool,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Evaluation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Report {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Loads and validates a YAML parameter file
pub fn get(param_file: &str) -> Result<Param> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<()> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    if param.general.thread_number == 0 {
        return Err(EvalError::InvalidParam("thread_number must be at least 1".to_string()));
    }

    if param.evaluation.max_models < 2 {
        return Err(EvalError::InvalidParam(format!(
            "Invalid max_models={}. Subset evaluation needs at least 2 models.",
            param.evaluation.max_models
        )));
    }

    if param.evaluation.max_models > 20 {
        warn!(
            "max_models={} allows up to {} subset evaluations per run.",
            param.evaluation.max_models,
            crate::combination::combination_count(param.evaluation.max_models).saturating_mul(3)
        );
    }

    if param.evaluation.parallel && param.general.thread_number == 1 {
        warn!("parallel evaluation requested with a single thread: combinations will be evaluated sequentially on a one-thread pool.");
    }

    validate_columns(param)?;
    validate_save_exp(param)?;
    Ok(())
}

fn validate_columns(param: &Param) -> Result<()> {
    let data = &param.data;
    if data.prediction_suffix.is_empty() || data.probability_suffix.is_empty() {
        return Err(EvalError::InvalidParam(
            "prediction_suffix and probability_suffix cannot be empty".to_string(),
        ));
    }
    if data.prediction_suffix == data.probability_suffix {
        return Err(EvalError::InvalidParam(format!(
            "prediction_suffix and probability_suffix are both '{}'",
            data.prediction_suffix
        )));
    }
    if data.label_column.is_empty() {
        return Err(EvalError::InvalidParam("label_column cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_save_exp(param: &Param) -> Result<()> {
    if param.general.save_exp.is_empty() {
        return Ok(());
    }
    let ext = std::path::Path::new(&param.general.save_exp)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "json" | "bin" | "bincode" => Ok(()),
        _ => Err(EvalError::InvalidParam(format!(
            "Invalid save_exp='{}'. Supported extensions are .json, .bin and .bincode.",
            param.general.save_exp
        ))),
    }
}

// Default value definitions

fn empty_string() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn label_column_default() -> String {
    "label".to_string()
}
fn prediction_suffix_default() -> String {
    "_pred".to_string()
}
fn probability_suffix_default() -> String {
    "_proba".to_string()
}
fn positive_class_name_default() -> String {
    "fraud".to_string()
}
fn negative_class_name_default() -> String {
    "legit".to_string()
}
fn max_models_default() -> usize {
    12
}
fn warn_above_combinations_default() -> u64 {
    10_000
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
fn one_default() -> usize {
    1
}
