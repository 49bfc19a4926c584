use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

//-----------------------------------------------------------------------------
// Confusion matrix and rates
//-----------------------------------------------------------------------------

/// Confusion counts of a binary prediction against the ground truth
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    /// Fraud cases flagged
    pub tp: usize,
    /// Legit cases cleared
    pub tn: usize,
    /// Legit cases flagged (false alarms)
    pub fp: usize,
    /// Fraud cases missed
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Counts outcomes by exact comparison of predictions against labels
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if both slices do not have the same length
    pub fn from_predictions(predictions: &[u8], labels: &[u8]) -> Result<ConfusionMatrix> {
        if predictions.len() != labels.len() {
            return Err(EvalError::mismatch("predictions against labels", labels.len(), predictions.len()));
        }

        let mut matrix = ConfusionMatrix::default();
        for (&pred, &truth) in predictions.iter().zip(labels.iter()) {
            match (pred == 1, truth == 1) {
                (true, true) => matrix.tp += 1,
                (false, false) => matrix.tn += 1,
                (true, false) => matrix.fp += 1,
                (false, true) => matrix.fn_ += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// TP / (TP + FN), or 0 without any positive label
    pub fn sensitivity(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// TN / (TN + FP), or 0 without any negative label
    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.tn + self.fp)
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// TP / (TP + FP), or 0 when nothing is flagged
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        self.sensitivity()
    }

    /// TN / (TN + FN), or 0 when nothing is cleared
    pub fn npv(&self) -> f64 {
        ratio(self.tn, self.tn + self.fn_)
    }

    pub fn f1_score(&self) -> f64 {
        harmonic_mean(self.precision(), self.recall())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b > 0.0 {
        2.0 * a * b / (a + b)
    } else {
        0.0
    }
}

/// Computes (sensitivity, specificity) of a binary prediction
///
/// # Examples
///
/// ```
/// # use fraudvote::metrics::compute_rates;
/// let (sensitivity, specificity) = compute_rates(&[1, 0, 0, 0], &[1, 1, 0, 0]).unwrap();
/// assert_eq!((sensitivity, specificity), (0.5, 1.0));
/// ```
pub fn compute_rates(predictions: &[u8], labels: &[u8]) -> Result<(f64, f64)> {
    let matrix = ConfusionMatrix::from_predictions(predictions, labels)?;
    Ok((matrix.sensitivity(), matrix.specificity()))
}

//-----------------------------------------------------------------------------
// ROC-AUC
//-----------------------------------------------------------------------------

/// Area under the ROC curve of `scores` against binary `labels`.
///
/// Computed as the Mann-Whitney statistic with tied scores sharing their
/// average rank, which matches the trapezoidal ROC integration.
///
/// # Errors
///
/// * `DimensionMismatch` if both slices do not have the same length
/// * `UndefinedMetric` if the labels do not contain both classes
pub fn compute_auc_from_value(scores: &[f64], labels: &[u8]) -> Result<f64> {
    if scores.len() != labels.len() {
        return Err(EvalError::mismatch("scores against labels", labels.len(), scores.len()));
    }

    let positives = labels.iter().filter(|&&y| y == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EvalError::UndefinedMetric {
            metric: "roc_auc".to_string(),
            reason: format!("labels contain {} positive and {} negative samples", positives, negatives),
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let start = i;
        while i + 1 < order.len() && scores[order[i + 1]] == scores[order[start]] {
            i += 1;
        }
        // 1-based ranks start+1 ..= i+1 share their mean
        let rank = (start + i + 2) as f64 / 2.0;
        for &idx in &order[start..=i] {
            if labels[idx] == 1 {
                positive_rank_sum += rank;
            }
        }
        i += 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

//-----------------------------------------------------------------------------
// ROC and precision-recall curves
//-----------------------------------------------------------------------------

/// One operating point of a ROC curve.
///
/// `threshold` is the lowest score flagged at this point. The first point of a
/// curve flags nothing and carries no threshold.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RocCurvePoint {
    pub fpr: f64,
    pub tpr: f64,
    pub threshold: Option<f64>,
}

/// One operating point of a precision-recall curve
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PrCurvePoint {
    pub precision: f64,
    pub recall: f64,
    pub threshold: Option<f64>,
}

/// (threshold, true positives, false positives) when every score >= threshold
/// is flagged, one entry per distinct score from the highest to the lowest
fn cumulative_counts(scores: &[f64], labels: &[u8]) -> Vec<(f64, usize, usize)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut counts = Vec::new();
    let (mut tp, mut fp) = (0, 0);
    for (i, &idx) in order.iter().enumerate() {
        if labels[idx] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let closes_group = order.get(i + 1).map_or(true, |&next| scores[next] != scores[idx]);
        if closes_group {
            counts.push((scores[idx], tp, fp));
        }
    }
    counts
}

fn class_counts(scores: &[f64], labels: &[u8]) -> Result<(usize, usize)> {
    if scores.len() != labels.len() {
        return Err(EvalError::mismatch("scores against labels", labels.len(), scores.len()));
    }
    let positives = labels.iter().filter(|&&y| y == 1).count();
    Ok((positives, labels.len() - positives))
}

/// ROC curve of `scores` against binary `labels`, from (0, 0) to (1, 1).
///
/// There is one point per distinct score, so tied scores move the curve
/// diagonally. The trapezoidal area under these points is
/// [`compute_auc_from_value`].
///
/// # Errors
///
/// * `DimensionMismatch` if both slices do not have the same length
/// * `UndefinedMetric` if the labels do not contain both classes
pub fn roc_curve(scores: &[f64], labels: &[u8]) -> Result<Vec<RocCurvePoint>> {
    let (positives, negatives) = class_counts(scores, labels)?;
    if positives == 0 || negatives == 0 {
        return Err(EvalError::UndefinedMetric {
            metric: "roc_curve".to_string(),
            reason: format!("labels contain {} positive and {} negative samples", positives, negatives),
        });
    }

    let (p, n) = (positives as f64, negatives as f64);
    let mut curve = vec![RocCurvePoint { fpr: 0.0, tpr: 0.0, threshold: None }];
    curve.extend(
        cumulative_counts(scores, labels)
            .into_iter()
            .map(|(threshold, tp, fp)| RocCurvePoint {
                fpr: fp as f64 / n,
                tpr: tp as f64 / p,
                threshold: Some(threshold),
            }),
    );
    Ok(curve)
}

/// Precision-recall curve of `scores` against binary `labels`.
///
/// Points go from the strictest threshold to the loosest. The first point
/// flags nothing and is set to precision 1, recall 0.
///
/// # Errors
///
/// * `DimensionMismatch` if both slices do not have the same length
/// * `UndefinedMetric` if the labels contain no positive sample
pub fn pr_curve(scores: &[f64], labels: &[u8]) -> Result<Vec<PrCurvePoint>> {
    let (positives, _) = class_counts(scores, labels)?;
    if positives == 0 {
        return Err(EvalError::UndefinedMetric {
            metric: "pr_curve".to_string(),
            reason: "labels contain no positive sample".to_string(),
        });
    }

    let p = positives as f64;
    let mut curve = vec![PrCurvePoint { precision: 1.0, recall: 0.0, threshold: None }];
    curve.extend(
        cumulative_counts(scores, labels)
            .into_iter()
            .map(|(threshold, tp, fp)| PrCurvePoint {
                precision: tp as f64 / (tp + fp) as f64,
                recall: tp as f64 / p,
                threshold: Some(threshold),
            }),
    );
    Ok(curve)
}

//-----------------------------------------------------------------------------
// Full metric set
//-----------------------------------------------------------------------------

/// Full metric set of one binary classifier (or ensemble)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// `None` when the labels hold a single class and AUC is not computable
    pub roc_auc: Option<f64>,
    pub sensitivity: f64,
    pub specificity: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationMetrics {
    /// Computes every metric; `scores` only feed the ROC-AUC
    pub fn compute(predictions: &[u8], scores: &[f64], labels: &[u8]) -> Result<ClassificationMetrics> {
        let confusion = ConfusionMatrix::from_predictions(predictions, labels)?;
        let roc_auc = match compute_auc_from_value(scores, labels) {
            Ok(auc) => Some(auc),
            Err(EvalError::UndefinedMetric { .. }) => None,
            Err(e) => return Err(e),
        };

        Ok(ClassificationMetrics {
            accuracy: confusion.accuracy(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1_score(),
            roc_auc,
            sensitivity: confusion.sensitivity(),
            specificity: confusion.specificity(),
            confusion,
        })
    }

    /// AUC formatted with 3 decimals, or `undefined`
    pub fn auc_display(&self) -> String {
        match self.roc_auc {
            Some(auc) => format!("{:.3}", auc),
            None => "undefined".to_string(),
        }
    }
}

impl fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Acc={:.3} Prec={:.3} Rec={:.3} F1={:.3} AUC={}",
            self.accuracy,
            self.precision,
            self.recall,
            self.f1,
            self.auc_display()
        )
    }
}

//-----------------------------------------------------------------------------
// Per-class report
//-----------------------------------------------------------------------------

/// Precision, recall, F1 and support of one class
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class report, each class being scored as if it were the positive one
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub negative: ClassScores,
    pub positive: ClassScores,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    pub fn compute(predictions: &[u8], labels: &[u8]) -> Result<ClassificationReport> {
        let cm = ConfusionMatrix::from_predictions(predictions, labels)?;
        let positive = ClassScores {
            precision: cm.precision(),
            recall: cm.recall(),
            f1: cm.f1_score(),
            support: cm.tp + cm.fn_,
        };
        let negative_recall = cm.specificity();
        let negative = ClassScores {
            precision: cm.npv(),
            recall: negative_recall,
            f1: harmonic_mean(cm.npv(), negative_recall),
            support: cm.tn + cm.fp,
        };

        let total = cm.total();
        let macro_avg = ClassScores {
            precision: (negative.precision + positive.precision) / 2.0,
            recall: (negative.recall + positive.recall) / 2.0,
            f1: (negative.f1 + positive.f1) / 2.0,
            support: total,
        };
        let weight = |neg: f64, pos: f64| {
            if total > 0 {
                (neg * negative.support as f64 + pos * positive.support as f64) / total as f64
            } else {
                0.0
            }
        };
        let weighted_avg = ClassScores {
            precision: weight(negative.precision, positive.precision),
            recall: weight(negative.recall, positive.recall),
            f1: weight(negative.f1, positive.f1),
            support: total,
        };

        Ok(ClassificationReport {
            negative,
            positive,
            accuracy: cm.accuracy(),
            macro_avg,
            weighted_avg,
        })
    }

    /// Renders the report as an aligned text table
    pub fn display(&self, negative_name: &str, positive_name: &str) -> String {
        let mut text = format!("{:>14} {:>10} {:>10} {:>10} {:>10}\n\n", "", "precision", "recall", "f1-score", "support");
        for (name, scores) in [(negative_name, &self.negative), (positive_name, &self.positive)] {
            text.push_str(&format!(
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
                name, scores.precision, scores.recall, scores.f1, scores.support
            ));
        }
        text.push_str(&format!(
            "\n{:>14} {:>10} {:>10} {:>10.2} {:>10}\n",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        ));
        for (name, scores) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            text.push_str(&format!(
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
                name, scores.precision, scores.recall, scores.f1, scores.support
            ));
        }
        text
    }
}
