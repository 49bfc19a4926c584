use crate::error::{EvalError, Result};
use crate::param::Param;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Binary ground truth, one value per sample (0 = legit, 1 = fraud)
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct LabelVector {
    values: Vec<u8>,
}

impl LabelVector {
    /// Builds a label vector, rejecting anything that is not 0 or 1
    pub fn new(values: Vec<u8>) -> Result<LabelVector> {
        check_binary(&values, "labels")?;
        Ok(LabelVector { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.values
    }

    pub fn positive_count(&self) -> usize {
        self.values.iter().filter(|&&y| y == 1).count()
    }

    pub fn negative_count(&self) -> usize {
        self.values.len() - self.positive_count()
    }

    /// Whether both classes are represented, which ROC-AUC requires
    pub fn has_both_classes(&self) -> bool {
        let positives = self.positive_count();
        positives > 0 && positives < self.values.len()
    }
}

/// Output of one trained classifier on the shared samples
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct ModelPrediction {
    name: String,
    predictions: Vec<u8>,
    probabilities: Vec<f64>,
}

impl ModelPrediction {
    /// Creates a model prediction
    ///
    /// # Errors
    ///
    /// * `InvalidModelName` if the name cannot be used as a file stem
    /// * `DimensionMismatch` if both vectors do not have the same length
    /// * `NonBinaryValue` if a prediction is not 0 or 1
    /// * `InvalidProbability` if a probability is not a finite value in [0, 1]
    pub fn new(name: impl Into<String>, predictions: Vec<u8>, probabilities: Vec<f64>) -> Result<ModelPrediction> {
        let name = name.into();
        check_model_name(&name)?;
        if predictions.len() != probabilities.len() {
            return Err(EvalError::mismatch(
                format!("probabilities of model {}", name),
                predictions.len(),
                probabilities.len(),
            ));
        }
        check_binary(&predictions, &format!("predictions of model {}", name))?;
        if let Some((index, &value)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite() || **p < 0.0 || **p > 1.0)
        {
            return Err(EvalError::InvalidProbability { model: name, index, value });
        }

        Ok(ModelPrediction { name, predictions, probabilities })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn predictions(&self) -> &[u8] {
        &self.predictions
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Ordered collection of model predictions.
///
/// Insertion order is the canonical order used to enumerate model subsets, so
/// it is kept as a `Vec` rather than a map. All models share the same length.
#[derive(Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PredictionSet {
    models: Vec<ModelPrediction>,
}

impl PredictionSet {
    pub fn new() -> PredictionSet {
        PredictionSet { models: Vec::new() }
    }

    /// Builds a set from models given in canonical order
    pub fn from_models<I: IntoIterator<Item = ModelPrediction>>(models: I) -> Result<PredictionSet> {
        let mut set = PredictionSet::new();
        for model in models {
            set.push(model)?;
        }
        Ok(set)
    }

    /// Appends a model, keeping names unique and lengths aligned
    pub fn push(&mut self, model: ModelPrediction) -> Result<()> {
        if self.models.iter().any(|m| m.name == model.name) {
            return Err(EvalError::DuplicateModel { name: model.name });
        }
        if let Some(expected) = self.sample_len() {
            if model.len() != expected {
                return Err(EvalError::mismatch(
                    format!("predictions of model {}", model.name),
                    expected,
                    model.len(),
                ));
            }
        }
        self.models.push(model);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Number of samples, `None` while the set is empty
    pub fn sample_len(&self) -> Option<usize> {
        self.models.first().map(|m| m.len())
    }

    pub fn models(&self) -> &[ModelPrediction] {
        &self.models
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelPrediction> {
        self.models.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModelPrediction> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Checks that every model is index-aligned with the labels
    pub fn validate_against(&self, labels: &LabelVector) -> Result<()> {
        for model in &self.models {
            if model.len() != labels.len() {
                return Err(EvalError::mismatch(
                    format!("predictions of model {}", model.name),
                    labels.len(),
                    model.len(),
                ));
            }
        }
        Ok(())
    }

    /// Loads predictions and labels from a single CSV file.
    ///
    /// The header holds the label column plus, for each model, a prediction
    /// column `<name><prediction_suffix>` and a probability column
    /// `<name><probability_suffix>`. Models keep the order of their prediction
    /// columns in the header.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, the label column is missing, a model has
    /// no probability column, or a value is not a valid class or probability.
    pub fn load_csv<P: AsRef<Path>>(path: P, param: &Param) -> Result<(PredictionSet, LabelVector)> {
        let path = path.as_ref();
        info!("Loading predictions from {}...", path.display());

        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let headers = reader.headers()?.clone();

        let label_idx = headers
            .iter()
            .position(|h| h == param.data.label_column)
            .ok_or_else(|| {
                EvalError::InvalidParam(format!(
                    "label column '{}' not found in {}",
                    param.data.label_column,
                    path.display()
                ))
            })?;

        // (model name, prediction column, probability column)
        let mut columns: Vec<(String, usize, Option<usize>)> = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            if let Some(name) = header.strip_suffix(param.data.prediction_suffix.as_str()) {
                if name.is_empty() {
                    continue;
                }
                let proba_header = format!("{}{}", name, param.data.probability_suffix);
                let proba_idx = headers.iter().position(|h| h == proba_header);
                columns.push((name.to_string(), idx, proba_idx));
            }
        }
        debug!("Prediction columns found: {:?}", columns.iter().map(|c| &c.0).collect::<Vec<_>>());

        for (idx, header) in headers.iter().enumerate() {
            if header.ends_with(param.data.probability_suffix.as_str())
                && !columns.iter().any(|(_, _, proba_idx)| *proba_idx == Some(idx))
            {
                warn!(
                    "Column {} has no matching {} prediction column and is ignored",
                    header, param.data.prediction_suffix
                );
            }
        }

        let mut labels: Vec<u8> = Vec::new();
        let mut predictions: Vec<Vec<u8>> = vec![Vec::new(); columns.len()];
        let mut probabilities: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            labels.push(parse_binary(record.get(label_idx).unwrap_or(""), "labels", row)?);
            for (m, (name, pred_idx, proba_idx)) in columns.iter().enumerate() {
                let context = format!("predictions of model {}", name);
                predictions[m].push(parse_binary(record.get(*pred_idx).unwrap_or(""), &context, row)?);
                if let Some(proba_idx) = proba_idx {
                    probabilities[m].push(parse_probability(record.get(*proba_idx).unwrap_or(""), name, row)?);
                }
            }
        }

        let labels = LabelVector::new(labels)?;
        let mut set = PredictionSet::new();
        for ((name, _, _), (preds, probas)) in columns.into_iter().zip(predictions.into_iter().zip(probabilities)) {
            set.push(ModelPrediction::new(name, preds, probas)?)?;
        }
        set.validate_against(&labels)?;

        info!(
            "Loaded {} models on {} samples ({} {} / {} {})",
            set.len(),
            labels.len(),
            labels.positive_count(),
            param.data.positive_class_name,
            labels.negative_count(),
            param.data.negative_class_name
        );

        Ok((set, labels))
    }
}

/// Report files are named after the model, so a name must stay a single
/// plain path component inside the output directory.
pub fn check_model_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(['/', '\\']) {
        "contains a path separator"
    } else if name == "." || name == ".." {
        "is a relative directory"
    } else if name.contains('\0') {
        "contains a NUL character"
    } else {
        return Ok(());
    };
    Err(EvalError::InvalidModelName { name: name.to_string(), reason: reason.to_string() })
}

fn check_binary(values: &[u8], context: &str) -> Result<()> {
    match values.iter().position(|&v| v > 1) {
        Some(index) => Err(EvalError::NonBinaryValue {
            context: context.to_string(),
            index,
            value: values[index].to_string(),
        }),
        None => Ok(()),
    }
}

fn parse_binary(field: &str, context: &str, index: usize) -> Result<u8> {
    match field.parse::<f64>() {
        Ok(v) if v == 0.0 => Ok(0),
        Ok(v) if v == 1.0 => Ok(1),
        _ => Err(EvalError::NonBinaryValue {
            context: context.to_string(),
            index,
            value: field.to_string(),
        }),
    }
}

fn parse_probability(field: &str, model: &str, index: usize) -> Result<f64> {
    match field.parse::<f64>() {
        Ok(p) if p.is_finite() && (0.0..=1.0).contains(&p) => Ok(p),
        Ok(p) => Err(EvalError::InvalidProbability { model: model.to_string(), index, value: p }),
        Err(_) => Err(EvalError::InvalidProbability { model: model.to_string(), index, value: f64::NAN }),
    }
}

impl fmt::Display for PredictionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Models: {}   Samples: {}", self.len(), self.sample_len().unwrap_or(0))?;
        // Limit to the first 20 samples
        for model in &self.models {
            let row_display: String = model
                .predictions
                .iter()
                .take(20)
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{:<20} {}", model.name, row_display)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PredictionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    impl PredictionSet {
        /// Three models over four samples, shared by most unit tests
        pub fn test() -> PredictionSet {
            PredictionSet::from_models(vec![
                ModelPrediction::new("m1", vec![1, 0, 1, 0], vec![0.9, 0.2, 0.7, 0.1]).unwrap(),
                ModelPrediction::new("m2", vec![1, 1, 0, 0], vec![0.8, 0.6, 0.4, 0.3]).unwrap(),
                ModelPrediction::new("m3", vec![0, 1, 1, 0], vec![0.4, 0.7, 0.9, 0.2]).unwrap(),
            ])
            .unwrap()
        }
    }

    impl LabelVector {
        pub fn test() -> LabelVector {
            LabelVector::new(vec![1, 1, 1, 0]).unwrap()
        }
    }

    pub(crate) fn write_temp_csv(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("fraudvote_{}_{}.csv", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_label_vector_rejects_non_binary_values() {
        let err = LabelVector::new(vec![0, 1, 2]).unwrap_err();
        assert!(matches!(err, EvalError::NonBinaryValue { index: 2, .. }));
    }

    #[test]
    fn test_label_vector_class_counts() {
        let labels = LabelVector::test();
        assert_eq!(labels.positive_count(), 3);
        assert_eq!(labels.negative_count(), 1);
        assert!(labels.has_both_classes());
        assert!(!LabelVector::new(vec![1, 1]).unwrap().has_both_classes());
        assert!(!LabelVector::new(vec![]).unwrap().has_both_classes());
    }

    #[test]
    fn test_model_prediction_requires_aligned_probabilities() {
        let err = ModelPrediction::new("rf", vec![0, 1], vec![0.1]).unwrap_err();
        match err {
            EvalError::DimensionMismatch { context, expected, found } => {
                assert!(context.contains("rf"));
                assert_eq!((expected, found), (2, 1));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_model_prediction_rejects_out_of_range_probability() {
        let err = ModelPrediction::new("rf", vec![0, 1], vec![0.1, 1.2]).unwrap_err();
        assert!(matches!(err, EvalError::InvalidProbability { index: 1, .. }));
        let err = ModelPrediction::new("rf", vec![0, 1], vec![f64::NAN, 0.2]).unwrap_err();
        assert!(matches!(err, EvalError::InvalidProbability { index: 0, .. }));
    }

    #[test]
    fn test_model_prediction_rejects_names_that_leave_the_output_dir() {
        for name in ["fraud/v1", "../escaped", "..\\escaped", "..", ".", ""] {
            let err = ModelPrediction::new(name, vec![1, 0], vec![0.9, 0.1]).unwrap_err();
            assert!(matches!(err, EvalError::InvalidModelName { .. }), "{:?} accepted", name);
        }
        for name in ["fraud.v1", "rf..2", "xgb-tuned"] {
            assert!(ModelPrediction::new(name, vec![1, 0], vec![0.9, 0.1]).is_ok(), "{:?} refused", name);
        }
    }

    #[test]
    fn test_push_keeps_insertion_order_and_rejects_duplicates() {
        let mut set = PredictionSet::test();
        assert_eq!(set.names(), vec!["m1", "m2", "m3"]);
        let err = set
            .push(ModelPrediction::new("m2", vec![0, 0, 0, 0], vec![0.0; 4]).unwrap())
            .unwrap_err();
        assert!(matches!(err, EvalError::DuplicateModel { .. }));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_push_rejects_misaligned_model() {
        let mut set = PredictionSet::test();
        let err = set
            .push(ModelPrediction::new("m4", vec![0, 1], vec![0.1, 0.9]).unwrap())
            .unwrap_err();
        assert!(matches!(err, EvalError::DimensionMismatch { expected: 4, found: 2, .. }));
    }

    #[test]
    fn test_validate_against_labels_of_other_length() {
        let set = PredictionSet::test();
        let labels = LabelVector::new(vec![1, 0, 1]).unwrap();
        assert!(set.validate_against(&LabelVector::test()).is_ok());
        assert!(matches!(
            set.validate_against(&labels),
            Err(EvalError::DimensionMismatch { expected: 3, found: 4, .. })
        ));
    }

    #[test]
    fn test_load_csv_reads_models_in_header_order() {
        let path = write_temp_csv(
            "load_order",
            "xgb_proba,label,xgb_pred,lr_pred,lr_proba\n\
             0.9,1,1,0,0.3\n\
             0.2,0,0,1.0,0.8\n\
             0.7,1,1,1,0.6\n",
        );
        let (set, labels) = PredictionSet::load_csv(&path, &Param::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(set.names(), vec!["xgb", "lr"]);
        assert_eq!(labels.as_slice(), &[1, 0, 1]);
        assert_eq!(set.get("lr").unwrap().predictions(), &[0, 1, 1]);
        assert_eq!(set.get("xgb").unwrap().probabilities(), &[0.9, 0.2, 0.7]);
    }

    #[test]
    fn test_load_csv_requires_probability_column() {
        let path = write_temp_csv("missing_proba", "label,rf_pred\n1,1\n0,0\n");
        let err = PredictionSet::load_csv(&path, &Param::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EvalError::DimensionMismatch { expected: 2, found: 0, .. }));
    }

    #[test]
    fn test_load_csv_rejects_non_binary_prediction() {
        let path = write_temp_csv("non_binary", "label,rf_pred,rf_proba\n1,0.5,0.5\n");
        let err = PredictionSet::load_csv(&path, &Param::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EvalError::NonBinaryValue { index: 0, .. }));
    }

    #[test]
    fn test_load_csv_rejects_path_like_model_names() {
        let path = write_temp_csv(
            "slash_name",
            "label,fraud/v1_pred,fraud/v1_proba,rf_pred,rf_proba\n1,1,0.9,1,0.8\n0,0,0.1,0,0.2\n",
        );
        let err = PredictionSet::load_csv(&path, &Param::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(err.is_structural());
        assert!(matches!(err, EvalError::InvalidModelName { ref name, .. } if name == "fraud/v1"));

        let path = write_temp_csv(
            "parent_name",
            "label,../escaped_pred,../escaped_proba,rf_pred,rf_proba\n1,1,0.9,1,0.8\n0,0,0.1,0,0.2\n",
        );
        let err = PredictionSet::load_csv(&path, &Param::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EvalError::InvalidModelName { ref name, .. } if name == "../escaped"));
    }

    #[test]
    fn test_load_csv_ignores_orphan_probability_column() {
        let path = write_temp_csv("orphan_proba", "label,rf_pred,rf_proba,gb_proba\n1,1,0.8,0.7\n0,0,0.2,0.4\n");
        let (set, _) = PredictionSet::load_csv(&path, &Param::default()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(set.names(), vec!["rf"]);
    }

    #[test]
    fn test_load_csv_missing_label_column() {
        let path = write_temp_csv("no_label", "target,rf_pred,rf_proba\n1,1,0.5\n");
        let err = PredictionSet::load_csv(&path, &Param::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EvalError::InvalidParam(_)));
    }
}
