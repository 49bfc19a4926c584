use crate::combination::Combinations;
use crate::data::{LabelVector, PredictionSet};
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// Fraction of samples on which two models disagree
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisagreementEntry {
    pub model_a: String,
    pub model_b: String,
    pub disagreement: f64,
}

/// Mean of `p1[i] != p2[i]`; 0 for identical (or empty) predictions
pub fn pairwise_disagreement(p1: &[u8], p2: &[u8]) -> Result<f64> {
    if p1.len() != p2.len() {
        return Err(EvalError::mismatch("disagreement pair", p1.len(), p2.len()));
    }
    if p1.is_empty() {
        return Ok(0.0);
    }
    let differing = p1.iter().zip(p2.iter()).filter(|(a, b)| a != b).count();
    Ok(differing as f64 / p1.len() as f64)
}

/// Disagreement of every unordered pair of models, in enumeration order
pub fn compute_disagreement(set: &PredictionSet) -> Result<Vec<DisagreementEntry>> {
    let models = set.models();
    Combinations::new(models.len(), 2)
        .map(|pair| {
            let (a, b) = (&models[pair[0]], &models[pair[1]]);
            Ok(DisagreementEntry {
                model_a: a.name().to_string(),
                model_b: b.name().to_string(),
                disagreement: pairwise_disagreement(a.predictions(), b.predictions())?,
            })
        })
        .collect()
}

/// Symmetric model x model disagreement matrix with a zero diagonal
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisagreementMatrix {
    pub models: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

pub fn disagreement_matrix(set: &PredictionSet) -> Result<DisagreementMatrix> {
    let n = set.len();
    let mut values = vec![vec![0.0; n]; n];
    let models = set.models();
    for pair in Combinations::new(n, 2) {
        let (i, j) = (pair[0], pair[1]);
        let d = pairwise_disagreement(models[i].predictions(), models[j].predictions())?;
        values[i][j] = d;
        values[j][i] = d;
    }
    Ok(DisagreementMatrix {
        models: set.names().iter().map(|n| n.to_string()).collect(),
        values,
    })
}

/// Predictions of every model restricted to a subset of samples
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PredictionMatrix {
    pub models: Vec<String>,
    /// Original index of each kept sample
    pub sample_indices: Vec<usize>,
    /// One row per model, one column per kept sample
    pub rows: Vec<Vec<u8>>,
}

impl PredictionMatrix {
    /// Number of models flagging each kept sample
    pub fn flag_counts(&self) -> Vec<usize> {
        (0..self.sample_indices.len())
            .map(|col| self.rows.iter().filter(|row| row[col] == 1).count())
            .collect()
    }
}

/// Per-sample predictions split by true class
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct DiversityPartitions {
    /// Fraud samples: a 1 is a detection
    pub fraud: PredictionMatrix,
    /// Legit samples: a 1 is a false alarm
    pub legit: PredictionMatrix,
}

/// Splits the model x sample prediction matrix by label
pub fn partition_by_label(set: &PredictionSet, labels: &LabelVector) -> Result<DiversityPartitions> {
    set.validate_against(labels)?;
    let names: Vec<String> = set.names().iter().map(|n| n.to_string()).collect();

    let select = |class: u8| {
        let sample_indices: Vec<usize> = labels
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();
        let rows: Vec<Vec<u8>> = set
            .iter()
            .map(|m| sample_indices.iter().map(|&i| m.predictions()[i]).collect())
            .collect();
        PredictionMatrix {
            models: names.clone(),
            sample_indices,
            rows,
        }
    };

    Ok(DiversityPartitions {
        fraud: select(1),
        legit: select(0),
    })
}
