use thiserror::Error;

/// Errors raised while loading, validating or evaluating a prediction set.
///
/// Structural problems (misaligned vectors, empty vote, bad values) abort the
/// whole evaluation. Numeric edge cases such as an empty confusion-matrix
/// denominator are not errors and resolve to zero in `metrics`.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Two vectors that must be index-aligned have different lengths
    #[error("dimension mismatch for {context}: expected {expected} values, found {found}")]
    DimensionMismatch {
        /// Model name or vector concerned
        context: String,
        expected: usize,
        found: usize,
    },

    /// A vote was requested without any member prediction
    #[error("cannot vote with an empty combination")]
    EmptyCombination,

    /// The metric cannot be computed on these labels (e.g. AUC with a single class)
    #[error("{metric} is undefined: {reason}")]
    UndefinedMetric { metric: String, reason: String },

    /// Admission control on the exponential subset sweep
    #[error("{models} models exceed the configured maximum of {max_models} for subset evaluation")]
    TooManyModels { models: usize, max_models: usize },

    /// Model names are used as report file stems
    #[error("invalid model name '{name}': {reason}")]
    InvalidModelName { name: String, reason: String },

    #[error("model {name} is present more than once in the prediction set")]
    DuplicateModel { name: String },

    #[error("{context}: value {value} at index {index} is not a binary class (0 or 1)")]
    NonBinaryValue {
        context: String,
        index: usize,
        value: String,
    },

    #[error("model {model}: probability {value} at index {index} is outside [0, 1]")]
    InvalidProbability { model: String, index: usize, value: f64 },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub(crate) fn mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
        EvalError::DimensionMismatch {
            context: context.into(),
            expected,
            found,
        }
    }

    /// True for errors that describe the inputs rather than the environment
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EvalError::DimensionMismatch { .. }
                | EvalError::EmptyCombination
                | EvalError::DuplicateModel { .. }
                | EvalError::InvalidModelName { .. }
                | EvalError::NonBinaryValue { .. }
                | EvalError::InvalidProbability { .. }
                | EvalError::TooManyModels { .. }
        )
    }
}
