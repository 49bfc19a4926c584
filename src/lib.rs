pub mod combination;
pub mod data;
pub mod diversity;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod evaluator;
pub mod metrics;
pub mod param;
pub mod report;
pub mod utils;
pub mod voting;

pub use crate::error::{EvalError, Result};
pub use crate::evaluation::{evaluate, evaluate_with_param, Evaluation};

use crate::data::PredictionSet;
use crate::param::Param;
use crate::report::write_reports;
use log::{debug, info};

/// Loads the prediction CSV named in `param`, evaluates it, then writes the
/// report files and the saved evaluation when they are configured.
pub fn run(param: &Param) -> Result<Evaluation> {
    if param.data.predictions.is_empty() {
        return Err(EvalError::InvalidParam("data.predictions is not set".to_string()));
    }

    let (predictions, labels) = PredictionSet::load_csv(&param.data.predictions, param)?;
    cinfo!(param.general.display_colorful, "\x1b[2;97m{:?}\x1b[0m", predictions);

    let evaluation = evaluate_with_param(&predictions, &labels, param)?;

    let written = write_reports(&evaluation, param)?;
    debug!("Report files: {:?}", written);

    if !param.general.save_exp.is_empty() {
        evaluation.save_auto(&param.general.save_exp)?;
        info!("Evaluation saved to {}", param.general.save_exp);
    }

    Ok(evaluation)
}
