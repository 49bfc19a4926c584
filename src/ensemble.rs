use crate::data::{LabelVector, PredictionSet};
use crate::error::{EvalError, Result};
use crate::metrics::ClassificationMetrics;
use crate::voting::{apply_rule, VotingRule};
use serde::{Deserialize, Serialize};

/// Averaged probabilities at or above this value are flagged by the soft vote
pub const SOFT_VOTE_THRESHOLD: f64 = 0.5;

/// Majority vote over every model of the set (half-splits are flagged)
pub fn hard_vote(set: &PredictionSet) -> Result<Vec<u8>> {
    let members: Vec<&[u8]> = set.iter().map(|m| m.predictions()).collect();
    apply_rule(&members, VotingRule::Majority)
}

/// Element-wise mean of the probability vectors of every model
pub fn average_probabilities(set: &PredictionSet) -> Result<Vec<f64>> {
    let n_samples = set.sample_len().ok_or(EvalError::EmptyCombination)?;
    let mut sums = vec![0.0; n_samples];
    for model in set.iter() {
        for (sum, p) in sums.iter_mut().zip(model.probabilities()) {
            *sum += p;
        }
    }
    let n_models = set.len() as f64;
    Ok(sums.into_iter().map(|s| s / n_models).collect())
}

/// Soft vote: (predictions, averaged probabilities)
pub fn soft_vote(set: &PredictionSet) -> Result<(Vec<u8>, Vec<f64>)> {
    let averaged = average_probabilities(set)?;
    let predictions = averaged.iter().map(|&p| (p >= SOFT_VOTE_THRESHOLD) as u8).collect();
    Ok((predictions, averaged))
}

/// Full metric set of the two whole-set strategies
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WholeEnsembleMetrics {
    /// Hard majority vote; its AUC is computed on the binary decisions
    pub majority_vote: ClassificationMetrics,
    /// Probability averaging; its AUC is computed on the averaged probabilities
    pub soft_vote: ClassificationMetrics,
}

impl WholeEnsembleMetrics {
    /// # Errors
    ///
    /// * `EmptyCombination` if the set holds no model
    /// * `DimensionMismatch` if the models are not aligned with the labels
    pub fn compute(set: &PredictionSet, labels: &LabelVector) -> Result<WholeEnsembleMetrics> {
        set.validate_against(labels)?;

        let hard = hard_vote(set)?;
        let hard_scores: Vec<f64> = hard.iter().map(|&p| p as f64).collect();
        let majority_vote = ClassificationMetrics::compute(&hard, &hard_scores, labels.as_slice())?;

        let (soft, averaged) = soft_vote(set)?;
        let soft_vote = ClassificationMetrics::compute(&soft, &averaged, labels.as_slice())?;

        Ok(WholeEnsembleMetrics { majority_vote, soft_vote })
    }
}
