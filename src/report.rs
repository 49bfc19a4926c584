use crate::data::check_model_name;
use crate::diversity::PredictionMatrix;
use crate::error::Result;
use crate::evaluation::Evaluation;
use crate::metrics::{ClassificationMetrics, PrCurvePoint, RocCurvePoint};
use crate::param::Param;
use crate::utils::{join_models, round_to};
use crate::voting::VotingRule;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fs;
use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------
// Prediction summary
//-----------------------------------------------------------------------------

/// Flag counts and probability spread of one prediction vector.
/// Rates and probabilities are rounded to 3 decimals.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionSummary {
    pub total_records: usize,
    pub flagged_cases: usize,
    pub non_flagged_cases: usize,
    pub flag_rate: f64,
    pub min_probability: f64,
    pub mean_probability: f64,
    pub max_probability: f64,
}

impl PredictionSummary {
    pub fn compute(predictions: &[u8], probabilities: &[f64]) -> PredictionSummary {
        let total_records = predictions.len();
        let flagged_cases = predictions.iter().filter(|&&p| p == 1).count();
        let flag_rate = if total_records > 0 {
            round_to(flagged_cases as f64 / total_records as f64, 3)
        } else {
            0.0
        };

        let (min_probability, mean_probability, max_probability) = if probabilities.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                round_to(Statistics::min(probabilities.iter()), 3),
                round_to(Statistics::mean(probabilities.iter()), 3),
                round_to(Statistics::max(probabilities.iter()), 3),
            )
        };

        PredictionSummary {
            total_records,
            flagged_cases,
            non_flagged_cases: total_records - flagged_cases,
            flag_rate,
            min_probability,
            mean_probability,
            max_probability,
        }
    }
}

//-----------------------------------------------------------------------------
// ROC scatter
//-----------------------------------------------------------------------------

/// One point of the sensitivity / specificity scatter
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RocPoint {
    /// Model name, or subset members joined with `+`
    pub label: String,
    /// `model` for an individual model, the subset size otherwise
    pub marker: String,
    pub specificity: f64,
    pub sensitivity: f64,
}

/// Individual models first, then every subset scored under the Majority rule
pub fn roc_scatter_points(evaluation: &Evaluation) -> Vec<RocPoint> {
    let models = evaluation.per_model_metrics.iter().map(|m| RocPoint {
        label: m.name.clone(),
        marker: "model".to_string(),
        specificity: m.metrics.specificity,
        sensitivity: m.metrics.sensitivity,
    });
    let subsets = evaluation
        .detailed_rows
        .iter()
        .filter(|row| row.rule == VotingRule::Majority)
        .map(|row| RocPoint {
            label: join_models(&row.models),
            marker: row.size().to_string(),
            specificity: row.specificity,
            sensitivity: row.sensitivity,
        });
    models.chain(subsets).collect()
}

//-----------------------------------------------------------------------------
// Report files
//-----------------------------------------------------------------------------

/// Writes every result table of `evaluation` under `report.output_dir`.
///
/// Returns the written paths; nothing is written when `output_dir` is empty.
pub fn write_reports(evaluation: &Evaluation, param: &Param) -> Result<Vec<PathBuf>> {
    if param.report.output_dir.is_empty() {
        info!("No output_dir set: report files are not written");
        return Ok(Vec::new());
    }
    let dir = Path::new(&param.report.output_dir);
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    written.push(write_metrics_summary(evaluation, &dir.join("metrics_summary.csv"))?);
    if let Some(whole) = &evaluation.whole_ensemble {
        let path = dir.join("ensemble_metrics.csv");
        write_metrics_table(
            &path,
            &[("majority_vote", &whole.majority_vote), ("soft_vote", &whole.soft_vote)],
        )?;
        written.push(path);
    }

    if !evaluation.detailed_rows.is_empty() {
        written.push(write_detailed(evaluation, &dir.join("ensemble_detailed.csv"))?);
        written.push(write_aggregates(evaluation, &dir.join("ensemble_avg.csv"))?);
    }

    if !evaluation.disagreement.is_empty() {
        written.push(write_disagreement(evaluation, &dir.join("disagreement.csv"))?);
    }
    if let Some(partitions) = &evaluation.diversity_partitions {
        let fraud = dir.join("diversity_fraud.csv");
        write_prediction_matrix(&partitions.fraud, &fraud)?;
        let legit = dir.join("diversity_legit.csv");
        write_prediction_matrix(&partitions.legit, &legit)?;
        written.push(fraud);
        written.push(legit);
    }

    if param.report.roc_points {
        written.push(write_roc_points(evaluation, &dir.join("combination_roc.csv"))?);
    }

    if param.report.classification_reports {
        for model in &evaluation.per_model_metrics {
            if let Some(report) = &model.report {
                let path = model_file(dir, &model.name, "_report.txt")?;
                let text = report.display(&param.data.negative_class_name, &param.data.positive_class_name);
                fs::write(&path, text)?;
                written.push(path);
            }
        }
    }

    if param.report.curves {
        for model in &evaluation.per_model_metrics {
            if let Some(curve) = &model.roc_curve {
                written.push(write_roc_curve(curve, &model_file(dir, &model.name, "_roc.csv")?)?);
            }
            if let Some(curve) = &model.pr_curve {
                written.push(write_pr_curve(curve, &model_file(dir, &model.name, "_pr.csv")?)?);
            }
        }
    }

    info!("{} report files written to {}", written.len(), dir.display());
    Ok(written)
}

/// `<model><suffix>` inside `dir`, refusing names that would leave it
fn model_file(dir: &Path, model: &str, suffix: &str) -> Result<PathBuf> {
    check_model_name(model)?;
    Ok(dir.join(format!("{}{}", model, suffix)))
}

fn auc_cell(metrics: &ClassificationMetrics) -> String {
    metrics.roc_auc.map(|auc| auc.to_string()).unwrap_or_default()
}

const METRIC_HEADER: [&str; 12] = [
    "accuracy", "precision", "recall", "f1", "roc_auc", "sensitivity", "specificity", "tp", "tn", "fp", "fn",
    "support",
];

fn metric_cells(metrics: &ClassificationMetrics) -> Vec<String> {
    let cm = &metrics.confusion;
    vec![
        metrics.accuracy.to_string(),
        metrics.precision.to_string(),
        metrics.recall.to_string(),
        metrics.f1.to_string(),
        auc_cell(metrics),
        metrics.sensitivity.to_string(),
        metrics.specificity.to_string(),
        cm.tp.to_string(),
        cm.tn.to_string(),
        cm.fp.to_string(),
        cm.fn_.to_string(),
        cm.total().to_string(),
    ]
}

fn write_metrics_summary(evaluation: &Evaluation, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["model"];
    header.extend(METRIC_HEADER);
    header.extend(["flagged", "flag_rate", "min_probability", "mean_probability", "max_probability"]);
    writer.write_record(&header)?;

    for model in &evaluation.per_model_metrics {
        let mut record = vec![model.name.clone()];
        record.extend(metric_cells(&model.metrics));
        let s = &model.summary;
        record.extend([
            s.flagged_cases.to_string(),
            s.flag_rate.to_string(),
            s.min_probability.to_string(),
            s.mean_probability.to_string(),
            s.max_probability.to_string(),
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    debug!("Written {}", path.display());
    Ok(path.to_path_buf())
}

fn write_metrics_table(path: &Path, rows: &[(&str, &ClassificationMetrics)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["ensemble"];
    header.extend(METRIC_HEADER);
    writer.write_record(&header)?;
    for (name, metrics) in rows {
        let mut record = vec![name.to_string()];
        record.extend(metric_cells(metrics));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_detailed(evaluation: &Evaluation, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["models", "rule", "sensitivity", "specificity"])?;
    for row in &evaluation.detailed_rows {
        writer.write_record([
            join_models(&row.models),
            row.rule.name().to_string(),
            row.sensitivity.to_string(),
            row.specificity.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_aggregates(evaluation: &Evaluation, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["n", "rule", "sensitivity", "specificity"])?;
    for row in &evaluation.aggregate_rows {
        writer.write_record([
            row.n.to_string(),
            row.rule.name().to_string(),
            row.sensitivity.to_string(),
            row.specificity.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_disagreement(evaluation: &Evaluation, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["model_a", "model_b", "disagreement"])?;
    for entry in &evaluation.disagreement {
        writer.write_record([
            entry.model_a.clone(),
            entry.model_b.clone(),
            entry.disagreement.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

/// One row per model, one column per kept sample (headed by its original index)
fn write_prediction_matrix(matrix: &PredictionMatrix, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["model".to_string()];
    header.extend(matrix.sample_indices.iter().map(|i| i.to_string()));
    writer.write_record(&header)?;
    for (model, row) in matrix.models.iter().zip(&matrix.rows) {
        let mut record = vec![model.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_roc_points(evaluation: &Evaluation, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["label", "marker", "specificity", "sensitivity"])?;
    for point in roc_scatter_points(evaluation) {
        writer.write_record([
            point.label,
            point.marker,
            point.specificity.to_string(),
            point.sensitivity.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

// The point that flags nothing has no threshold
fn threshold_cell(threshold: Option<f64>) -> String {
    threshold.map(|t| t.to_string()).unwrap_or_else(|| "inf".to_string())
}

fn write_roc_curve(curve: &[RocCurvePoint], path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["fpr", "tpr", "threshold"])?;
    for point in curve {
        writer.write_record([point.fpr.to_string(), point.tpr.to_string(), threshold_cell(point.threshold)])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_pr_curve(curve: &[PrCurvePoint], path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["precision", "recall", "threshold"])?;
    for point in curve {
        writer.write_record([
            point.precision.to_string(),
            point.recall.to_string(),
            threshold_cell(point.threshold),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LabelVector, PredictionSet};
    use crate::error::EvalError;
    use crate::evaluation::evaluate_with_param;

    fn output_param(name: &str) -> Param {
        let mut param = Param::default();
        let dir = std::env::temp_dir().join(format!("fraudvote_report_{}_{}", name, std::process::id()));
        param.report.output_dir = dir.to_string_lossy().to_string();
        param
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_prediction_summary_rounds_to_three_decimals() {
        let summary = PredictionSummary::compute(&[1, 0, 0], &[0.91234, 0.1, 0.3]);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.flagged_cases, 1);
        assert_eq!(summary.non_flagged_cases, 2);
        assert_eq!(summary.flag_rate, 0.333);
        assert_eq!(summary.min_probability, 0.1);
        assert_eq!(summary.max_probability, 0.912);
        assert_eq!(summary.mean_probability, 0.437);
    }

    #[test]
    fn test_prediction_summary_of_nothing_is_zero() {
        let summary = PredictionSummary::compute(&[], &[]);
        assert_eq!(summary.flag_rate, 0.0);
        assert_eq!(summary.mean_probability, 0.0);
    }

    #[test]
    fn test_roc_scatter_points_models_then_majority_subsets() {
        let param = Param::default();
        let evaluation = evaluate_with_param(&PredictionSet::test(), &LabelVector::test(), &param).unwrap();
        let points = roc_scatter_points(&evaluation);
        assert_eq!(points.len(), 3 + 4);
        assert_eq!(points[0].marker, "model");
        assert_eq!(points[0].label, "m1");
        assert_eq!(points[3].label, "m1+m2");
        assert_eq!(points[3].marker, "2");
        let all = &points[6];
        assert_eq!((all.label.as_str(), all.marker.as_str()), ("m1+m2+m3", "3"));
        assert_eq!((all.sensitivity, all.specificity), (1.0, 1.0));
    }

    #[test]
    fn test_write_reports_without_output_dir_writes_nothing() {
        let param = Param::default();
        let evaluation = evaluate_with_param(&PredictionSet::test(), &LabelVector::test(), &param).unwrap();
        assert!(write_reports(&evaluation, &param).unwrap().is_empty());
    }

    #[test]
    fn test_write_reports_writes_every_table() {
        let param = output_param("all");
        let evaluation = evaluate_with_param(&PredictionSet::test(), &LabelVector::test(), &param).unwrap();
        let written = write_reports(&evaluation, &param).unwrap();
        let dir = Path::new(&param.report.output_dir);

        for name in [
            "metrics_summary.csv",
            "ensemble_metrics.csv",
            "ensemble_detailed.csv",
            "ensemble_avg.csv",
            "disagreement.csv",
            "diversity_fraud.csv",
            "diversity_legit.csv",
            "combination_roc.csv",
            "m1_report.txt",
            "m1_roc.csv",
            "m3_pr.csv",
        ] {
            assert!(written.contains(&dir.join(name)), "{} not written", name);
        }

        let detailed = read_lines(&dir.join("ensemble_detailed.csv"));
        assert_eq!(detailed.len(), 13);
        assert_eq!(detailed[0], "models,rule,sensitivity,specificity");
        assert_eq!(detailed[1], "m1+m2,1ooN,1,1");
        assert_eq!(detailed[3], "m1+m2,NooN,0.3333333333333333,1");
        assert_eq!(detailed[11], "m1+m2+m3,Majority,1,1");

        let avg = read_lines(&dir.join("ensemble_avg.csv"));
        assert_eq!(avg[0], "n,rule,sensitivity,specificity");
        assert_eq!(avg.len(), 7);
        assert!(avg[6].starts_with("3,NooN,"));

        let fraud = read_lines(&dir.join("diversity_fraud.csv"));
        assert_eq!(fraud, vec!["model,0,1,2", "m1,1,0,1", "m2,1,1,0", "m3,0,1,1"]);

        let report = fs::read_to_string(dir.join("m1_report.txt")).unwrap();
        assert!(report.contains("fraud"));
        assert!(report.contains("legit"));

        // m1 scores [0.9, 0.2, 0.7, 0.1] rank every fraud above the legit sample
        let roc = read_lines(&dir.join("m1_roc.csv"));
        assert_eq!(
            roc,
            vec![
                "fpr,tpr,threshold",
                "0,0,inf",
                "0,0.3333333333333333,0.9",
                "0,0.6666666666666666,0.7",
                "0,1,0.2",
                "1,1,0.1",
            ]
        );
        let pr = read_lines(&dir.join("m1_pr.csv"));
        assert_eq!(pr[0], "precision,recall,threshold");
        assert_eq!(pr[1], "1,0,inf");
        assert_eq!(pr.last().unwrap(), "0.75,1,0.1");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_reports_without_curves() {
        let mut param = output_param("no_curves");
        param.report.curves = false;
        let evaluation = evaluate_with_param(&PredictionSet::test(), &LabelVector::test(), &param).unwrap();
        assert!(evaluation.per_model_metrics.iter().all(|m| m.roc_curve.is_none() && m.pr_curve.is_none()));
        let written = write_reports(&evaluation, &param).unwrap();
        let dir = Path::new(&param.report.output_dir);
        assert!(!written.iter().any(|p| p.to_string_lossy().ends_with("_roc.csv")));
        assert!(!dir.join("m1_pr.csv").exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_reports_refuses_model_names_outside_output_dir() {
        let base = std::env::temp_dir().join(format!("fraudvote_report_escape_{}", std::process::id()));
        let mut param = Param::default();
        param.report.output_dir = base.join("results").to_string_lossy().to_string();
        let mut evaluation = evaluate_with_param(&PredictionSet::test(), &LabelVector::test(), &param).unwrap();

        for name in ["../escaped", "fraud/v1"] {
            evaluation.per_model_metrics[0].name = name.to_string();
            let err = write_reports(&evaluation, &param).unwrap_err();
            assert!(matches!(err, EvalError::InvalidModelName { .. }), "{} accepted", name);
        }
        assert!(!base.join("escaped_report.txt").exists());
        assert!(!base.join("results").join("fraud").exists());
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_undefined_auc_is_an_empty_cell() {
        let param = output_param("single_class");
        let labels = LabelVector::new(vec![1, 1, 1, 1]).unwrap();
        let evaluation = evaluate_with_param(&PredictionSet::test(), &labels, &param).unwrap();
        write_reports(&evaluation, &param).unwrap();
        let dir = Path::new(&param.report.output_dir);

        let mut reader = csv::Reader::from_path(dir.join("metrics_summary.csv")).unwrap();
        let auc_idx = reader.headers().unwrap().iter().position(|h| h == "roc_auc").unwrap();
        for record in reader.records() {
            assert_eq!(record.unwrap().get(auc_idx), Some(""));
        }
        // no legit sample: the matrix keeps only its model column
        assert_eq!(read_lines(&dir.join("diversity_legit.csv"))[1], "m1");
        // a ROC curve needs both classes, a precision-recall curve only needs frauds
        assert!(!dir.join("m1_roc.csv").exists());
        assert!(dir.join("m1_pr.csv").exists());
        fs::remove_dir_all(dir).unwrap();
    }
}
