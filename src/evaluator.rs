use crate::combination::CombinationEnumerator;
use crate::data::{LabelVector, PredictionSet};
use crate::error::{EvalError, Result};
use crate::metrics::compute_rates;
use crate::param::Param;
use crate::voting::{count_votes, VotingRule};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

//-----------------------------------------------------------------------------
// Subset evaluation
//-----------------------------------------------------------------------------

/// Sensitivity and specificity of one model subset under one voting rule
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnsembleResultRow {
    /// Members, in prediction set order
    pub models: Vec<String>,
    pub rule: VotingRule,
    pub sensitivity: f64,
    pub specificity: f64,
}

impl EnsembleResultRow {
    pub fn size(&self) -> usize {
        self.models.len()
    }
}

/// Scores every subset of two or more models under every voting rule
pub struct CombinatorialEvaluator<'a> {
    predictions: &'a PredictionSet,
    labels: &'a LabelVector,
    max_models: usize,
    warn_above_rows: u128,
    thread_number: Option<usize>,
}

impl<'a> CombinatorialEvaluator<'a> {
    /// Creates a sequential evaluator accepting up to 12 models
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if a model is not aligned with the labels
    pub fn new(predictions: &'a PredictionSet, labels: &'a LabelVector) -> Result<Self> {
        predictions.validate_against(labels)?;
        Ok(CombinatorialEvaluator {
            predictions,
            labels,
            max_models: 12,
            warn_above_rows: 10_000,
            thread_number: None,
        })
    }

    /// Creates an evaluator configured from the `evaluation` section of `param`
    pub fn new_from_param(predictions: &'a PredictionSet, labels: &'a LabelVector, param: &Param) -> Result<Self> {
        let mut evaluator = Self::new(predictions, labels)?
            .with_max_models(param.evaluation.max_models)
            .with_warning_above(param.evaluation.warn_above_combinations as u128);
        if param.evaluation.parallel {
            evaluator = evaluator.with_threads(param.general.thread_number);
        }
        Ok(evaluator)
    }

    pub fn with_max_models(mut self, max_models: usize) -> Self {
        self.max_models = max_models;
        self
    }

    pub fn with_warning_above(mut self, rows: u128) -> Self {
        self.warn_above_rows = rows;
        self
    }

    /// Evaluates subsets on a rayon pool of `threads` threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.thread_number = Some(threads);
        self
    }

    /// Number of rows `evaluate` will produce
    pub fn row_count(&self) -> u128 {
        CombinationEnumerator::new(&self.predictions.names())
            .count()
            .saturating_mul(VotingRule::ALL.len() as u128)
    }

    /// Produces one row per (subset, rule).
    ///
    /// Subsets follow the enumeration order (size ascending, then lexicographic
    /// index order) and the rules of each subset follow `VotingRule::ALL`. The
    /// order is the same whether or not a thread pool is used.
    ///
    /// # Errors
    ///
    /// `TooManyModels` when the prediction set exceeds the configured maximum
    pub fn evaluate(&self) -> Result<Vec<EnsembleResultRow>> {
        let n = self.predictions.len();
        if n < 2 {
            warn!("Subset evaluation skipped: {} model(s) available, at least 2 are needed", n);
            return Ok(Vec::new());
        }
        if n > self.max_models {
            return Err(EvalError::TooManyModels { models: n, max_models: self.max_models });
        }

        let rows = self.row_count();
        if rows > self.warn_above_rows {
            warn!(
                "{} models produce 3 x (2^{} - {} - 1) = {} subset evaluations, this may take a while",
                n, n, n, rows
            );
        } else {
            info!("Evaluating {} subset rows over {} models", rows, n);
        }

        let start = std::time::Instant::now();
        let enumerator = CombinationEnumerator::new(&self.predictions.names());

        let results = match self.thread_number {
            Some(threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| EvalError::InvalidParam(format!("cannot build thread pool: {}", e)))?;
                let subsets: Vec<Vec<usize>> = enumerator.iter().collect();
                let per_subset: Vec<Vec<EnsembleResultRow>> = pool.install(|| {
                    subsets
                        .par_iter()
                        .map(|subset| self.evaluate_subset(subset))
                        .collect::<Result<Vec<_>>>()
                })?;
                per_subset.into_iter().flatten().collect()
            }
            None => {
                let mut results = Vec::new();
                for subset in enumerator.iter() {
                    results.extend(self.evaluate_subset(&subset)?);
                }
                results
            }
        };

        debug!("Subset evaluation computed {} rows in {:.2?}", results.len(), start.elapsed());
        Ok(results)
    }

    /// Rows of one subset, one per voting rule; votes are counted once
    fn evaluate_subset(&self, subset: &[usize]) -> Result<Vec<EnsembleResultRow>> {
        let models = self.predictions.models();
        let members: Vec<&[u8]> = subset.iter().map(|&i| models[i].predictions()).collect();
        let names: Vec<String> = subset.iter().map(|&i| models[i].name().to_string()).collect();
        let votes = count_votes(&members)?;

        VotingRule::ALL
            .iter()
            .map(|&rule| {
                let ensemble = rule.apply_to_votes(&votes, members.len());
                let (sensitivity, specificity) = compute_rates(&ensemble, self.labels.as_slice())?;
                Ok(EnsembleResultRow {
                    models: names.clone(),
                    rule,
                    sensitivity,
                    specificity,
                })
            })
            .collect()
    }
}

//-----------------------------------------------------------------------------
// Aggregation
//-----------------------------------------------------------------------------

/// Mean rates of every subset sharing one size and one rule
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AggregateRow {
    /// Subset size
    pub n: usize,
    pub rule: VotingRule,
    pub sensitivity: f64,
    pub specificity: f64,
}

/// Groups rows by (subset size, rule) and averages both rates.
///
/// Output is ordered by size, then by rule order. Only observed groups appear.
pub fn aggregate_results(rows: &[EnsembleResultRow]) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<(usize, VotingRule), (f64, f64, usize)> = BTreeMap::new();
    for row in rows {
        let entry = groups.entry((row.size(), row.rule)).or_insert((0.0, 0.0, 0));
        entry.0 += row.sensitivity;
        entry.1 += row.specificity;
        entry.2 += 1;
    }

    groups
        .into_iter()
        .map(|((n, rule), (sensitivity_sum, specificity_sum, count))| AggregateRow {
            n,
            rule,
            sensitivity: sensitivity_sum / count as f64,
            specificity: specificity_sum / count as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ModelPrediction;

    fn row(models: &[&str], rule: VotingRule, sensitivity: f64, specificity: f64) -> EnsembleResultRow {
        EnsembleResultRow {
            models: models.iter().map(|m| m.to_string()).collect(),
            rule,
            sensitivity,
            specificity,
        }
    }

    fn five_models() -> (PredictionSet, LabelVector) {
        let labels = LabelVector::new(vec![1, 1, 1, 0, 0, 0, 1, 0]).unwrap();
        let preds: [(&str, [u8; 8]); 5] = [
            ("lr", [1, 0, 1, 0, 1, 0, 1, 0]),
            ("rf", [1, 1, 0, 0, 0, 1, 1, 0]),
            ("xgb", [0, 1, 1, 1, 0, 0, 1, 0]),
            ("svm", [1, 1, 1, 1, 1, 0, 0, 0]),
            ("knn", [0, 0, 1, 0, 0, 0, 1, 1]),
        ];
        let set = PredictionSet::from_models(
            preds
                .iter()
                .map(|(name, p)| ModelPrediction::new(*name, p.to_vec(), vec![0.5; 8]).unwrap()),
        )
        .unwrap();
        (set, labels)
    }

    #[test]
    fn test_row_count_for_three_models_is_twelve() {
        let (set, labels) = (PredictionSet::test(), LabelVector::test());
        let evaluator = CombinatorialEvaluator::new(&set, &labels).unwrap();
        assert_eq!(evaluator.row_count(), 12);
        assert_eq!(evaluator.evaluate().unwrap().len(), 12);
    }

    #[test]
    fn test_rows_follow_enumeration_then_rule_order() {
        let (set, labels) = (PredictionSet::test(), LabelVector::test());
        let rows = CombinatorialEvaluator::new(&set, &labels).unwrap().evaluate().unwrap();

        let expected_models = [
            vec!["m1", "m2"],
            vec!["m1", "m3"],
            vec!["m2", "m3"],
            vec!["m1", "m2", "m3"],
        ];
        for (i, models) in expected_models.iter().enumerate() {
            for (j, rule) in VotingRule::ALL.iter().enumerate() {
                let r = &rows[i * 3 + j];
                assert_eq!(&r.models, models);
                assert_eq!(r.rule, *rule);
            }
        }
    }

    #[test]
    fn test_known_rates_on_reference_scenario() {
        let (set, labels) = (PredictionSet::test(), LabelVector::test());
        let rows = CombinatorialEvaluator::new(&set, &labels).unwrap().evaluate().unwrap();

        // {m1, m2}: votes [2,1,1,0], a 1-1 split reaches n/2 so Majority equals 1ooN
        assert_eq!((rows[0].rule, rows[1].rule), (VotingRule::AtLeastOne, VotingRule::Majority));
        assert_eq!(rows[1].models, vec!["m1", "m2"]);
        assert_eq!((rows[1].sensitivity, rows[1].specificity), (rows[0].sensitivity, rows[0].specificity));
        assert_eq!((rows[1].sensitivity, rows[1].specificity), (1.0, 1.0));

        // {m1, m3}: 1ooN flags [1,1,1,0], NooN flags [0,0,1,0]
        assert_eq!((rows[3].sensitivity, rows[3].specificity), (1.0, 1.0));
        assert_eq!((rows[5].sensitivity, rows[5].specificity), (1.0 / 3.0, 1.0));
        // all three under Majority match the labels exactly
        assert_eq!(rows[10].rule, VotingRule::Majority);
        assert_eq!((rows[10].sensitivity, rows[10].specificity), (1.0, 1.0));
        // nobody agrees on every fraud case
        assert_eq!((rows[11].sensitivity, rows[11].specificity), (0.0, 1.0));
    }

    #[test]
    fn test_rates_stay_in_unit_interval() {
        let (set, labels) = five_models();
        let rows = CombinatorialEvaluator::new(&set, &labels).unwrap().evaluate().unwrap();
        assert_eq!(rows.len(), 3 * (32 - 5 - 1));
        for r in &rows {
            assert!((0.0..=1.0).contains(&r.sensitivity));
            assert!((0.0..=1.0).contains(&r.specificity));
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let (set, labels) = five_models();
        let evaluator = CombinatorialEvaluator::new(&set, &labels).unwrap();
        let first = evaluator.evaluate().unwrap();
        let second = evaluator.evaluate().unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_parallel_evaluation_keeps_row_order() {
        let (set, labels) = five_models();
        let sequential = CombinatorialEvaluator::new(&set, &labels).unwrap().evaluate().unwrap();
        let parallel = CombinatorialEvaluator::new(&set, &labels)
            .unwrap()
            .with_threads(4)
            .evaluate()
            .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_fewer_than_two_models_yields_no_rows() {
        let labels = LabelVector::test();
        let single = PredictionSet::from_models(vec![
            ModelPrediction::new("m1", vec![1, 0, 1, 0], vec![0.9, 0.2, 0.7, 0.1]).unwrap(),
        ])
        .unwrap();
        let evaluator = CombinatorialEvaluator::new(&single, &labels).unwrap();
        assert_eq!(evaluator.row_count(), 0);
        assert!(evaluator.evaluate().unwrap().is_empty());

        let empty = PredictionSet::new();
        assert!(CombinatorialEvaluator::new(&empty, &labels).unwrap().evaluate().unwrap().is_empty());
    }

    #[test]
    fn test_too_many_models_is_rejected() {
        let (set, labels) = five_models();
        let err = CombinatorialEvaluator::new(&set, &labels)
            .unwrap()
            .with_max_models(4)
            .evaluate()
            .unwrap_err();
        assert!(matches!(err, EvalError::TooManyModels { models: 5, max_models: 4 }));
    }

    #[test]
    fn test_misaligned_labels_are_rejected_at_construction() {
        let set = PredictionSet::test();
        let labels = LabelVector::new(vec![1, 0]).unwrap();
        match CombinatorialEvaluator::new(&set, &labels) {
            Err(EvalError::DimensionMismatch { context, .. }) => assert!(context.contains("m1")),
            _ => panic!("expected a dimension mismatch"),
        }
    }

    #[test]
    fn test_aggregate_means_by_size_and_rule() {
        let rows = vec![
            row(&["a", "b"], VotingRule::Majority, 0.5, 1.0),
            row(&["a", "b", "c"], VotingRule::AtLeastOne, 1.0, 0.25),
            row(&["a", "c"], VotingRule::Majority, 1.0, 0.5),
            row(&["a", "b"], VotingRule::Unanimous, 0.0, 1.0),
            row(&["b", "c"], VotingRule::AtLeastOne, 0.75, 0.5),
        ];
        let aggregates = aggregate_results(&rows);
        let keys: Vec<(usize, VotingRule)> = aggregates.iter().map(|a| (a.n, a.rule)).collect();
        assert_eq!(
            keys,
            vec![
                (2, VotingRule::AtLeastOne),
                (2, VotingRule::Majority),
                (2, VotingRule::Unanimous),
                (3, VotingRule::AtLeastOne),
            ]
        );
        assert_eq!(aggregates[1].sensitivity, 0.75);
        assert_eq!(aggregates[1].specificity, 0.75);
        assert_eq!(aggregates[0].sensitivity, 0.75);
        assert_eq!(aggregates[3].specificity, 0.25);
    }

    #[test]
    fn test_aggregate_of_nothing_is_empty() {
        assert!(aggregate_results(&[]).is_empty());
    }

    #[test]
    fn test_aggregate_of_reference_scenario() {
        let (set, labels) = (PredictionSet::test(), LabelVector::test());
        let rows = CombinatorialEvaluator::new(&set, &labels).unwrap().evaluate().unwrap();
        let aggregates = aggregate_results(&rows);
        assert_eq!(aggregates.len(), 6);
        let pair_unanimous = &aggregates[2];
        assert_eq!((pair_unanimous.n, pair_unanimous.rule), (2, VotingRule::Unanimous));
        assert!((pair_unanimous.sensitivity - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(pair_unanimous.specificity, 1.0);
    }
}
