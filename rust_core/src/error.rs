use std::fmt;

use thiserror::Error;

/// Errors raised while a model is being declared. Any of these means the
/// model is malformed and construction must stop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeclarationError {
    #[error("`{name}` is already declared")]
    DuplicateDeclaration { name: String },

    /// Expressions may only reference names declared before them, so a
    /// forward reference is the only way a cycle could be written.
    #[error("`{name}` references `{reference}`, which is not declared yet")]
    CyclicDependency { name: String, reference: String },

    #[error("density target `{target}` is not a declared variable")]
    UnknownTarget { target: String },

    #[error(
        "transform `{name}` has {outputs} output(s) but {inputs} direct input(s); \
         a Jacobian correction needs a square Jacobian"
    )]
    NonSquareJacobian {
        name: String,
        outputs: usize,
        inputs: usize,
    },

    #[error("{family} expects {expected} parameter(s), got {found}")]
    DistributionArity {
        family: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("unknown distribution family `{name}`")]
    UnknownFamily { name: String },

    #[error("invalid support for `{name}`: {reason}")]
    InvalidSupport { name: String, reason: &'static str },

    #[error("transform declaration has no outputs, or outputs and expressions differ in length")]
    EmptyTransform,
}

/// Errors raised while evaluating a model at one point. Both are recoverable:
/// a sampler should treat the point as having zero density.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("`{variable}` is undefined at this point: {reason}")]
    Domain { variable: String, reason: String },

    #[error("transform `{variable}` is not locally invertible here: {reason}")]
    NonInvertible {
        variable: String,
        reason: &'static str,
    },

    #[error("expected {expected} parameter value(s), got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl EvalError {
    /// Whether the point should simply be rejected (density zero). Dimension
    /// mismatches are caller bugs and are not recoverable.
    pub fn is_zero_density(&self) -> bool {
        matches!(self, EvalError::Domain { .. } | EvalError::NonInvertible { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
    #[error("no point with finite log-density found after {attempts} attempt(s)")]
    NoFiniteInitialPoint { attempts: usize },

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Non-fatal diagnostics collected during declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelWarning {
    /// A derived variable received an explicit density statement but was
    /// declared without a Jacobian correction. Often a mistake, sometimes a
    /// deliberate non-generative prior.
    MissingCorrection { variable: String },
}

impl fmt::Display for ModelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelWarning::MissingCorrection { variable } => write!(
                f,
                "density statement on derived variable `{variable}` which has no Jacobian correction"
            ),
        }
    }
}

/// Low-level fault raised by a single graph operation. The evaluator attaches
/// the variable name before surfacing it as an [`EvalError`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpFault {
    Domain(String),
    Singular(&'static str),
}

impl OpFault {
    pub(crate) fn into_eval_error(self, variable: &str) -> EvalError {
        match self {
            OpFault::Domain(reason) => EvalError::Domain {
                variable: variable.to_string(),
                reason,
            },
            OpFault::Singular(reason) => EvalError::NonInvertible {
                variable: variable.to_string(),
                reason,
            },
        }
    }
}
