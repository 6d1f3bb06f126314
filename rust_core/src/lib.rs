pub mod accumulator;
pub mod autodiff;
pub mod corrector;
pub mod distributions;
pub mod error;
pub mod expr;
pub mod finite_diff;
pub mod graph;
pub mod model;
pub mod registry;
pub mod sampling;
pub mod support;

pub use accumulator::{Contribution, LogDensityAccumulator, Source};
pub use corrector::Corrector;
pub use distributions::Family;
pub use error::{DeclarationError, EvalError, ModelWarning, SamplingError};
pub use expr::{constant, var, Expr};
pub use model::{EvalOptions, Evaluation, Model, ModelBuilder, Space};
pub use registry::{Correction, Direction, TransformDecl};
pub use sampling::{find_initial_point, BatchConfig, InitConfig, LogDensityModel};
pub use support::Support;

// Future: block transforms currently stage a dense k×k Jacobian. Triangular
// transforms (stick-breaking, Cholesky factors) only need the diagonal and
// could skip the LU entirely.
