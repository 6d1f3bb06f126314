//! Finite-difference checks for model gradients.
//!
//! Reverse-mode gradients flow through the staged Jacobian nodes, so a wrong
//! derivative rule anywhere shows up here as a mismatch against central
//! differences of the log-density itself.

use std::cell::RefCell;

use finitediff::FiniteDiff;

use crate::error::EvalError;
use crate::model::{EvalOptions, Model, Space};

#[derive(Debug, Clone, Copy)]
pub struct FiniteDiffConfig {
    /// Largest accepted `|analytic - numeric| / max(1, |numeric|)`.
    pub tolerance: f64,
}

impl Default for FiniteDiffConfig {
    fn default() -> Self {
        Self { tolerance: 1e-5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientCheck {
    pub analytic: Vec<f64>,
    pub numeric: Vec<f64>,
    /// Worst scaled error over all coordinates.
    pub max_error: f64,
}

impl GradientCheck {
    pub fn passes(&self, config: &FiniteDiffConfig) -> bool {
        self.max_error <= config.tolerance
    }
}

/// Central-difference gradient of the log-density at `point`.
///
/// Fails with the first evaluation error hit at any sample point, so a point too
/// close to a domain boundary is reported rather than differenced.
pub fn numeric_gradient(model: &Model, point: &[f64], space: Space) -> Result<Vec<f64>, EvalError> {
    let options = EvalOptions {
        gradient: false,
        record_contributions: false,
    };
    let closure_err: RefCell<Option<EvalError>> = RefCell::new(None);
    let logp = |p: &Vec<f64>| -> f64 {
        match model.evaluate_with(p, space, options) {
            Ok(eval) => eval.log_density,
            Err(e) => {
                let mut slot = closure_err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e);
                }
                f64::NAN
            }
        }
    };
    let grad = point.to_vec().central_diff(&logp);
    match closure_err.into_inner() {
        Some(err) => Err(err),
        None => Ok(grad),
    }
}

/// Compare the reverse-mode gradient at `point` against central differences.
pub fn check_gradient(
    model: &Model,
    point: &[f64],
    space: Space,
) -> Result<GradientCheck, EvalError> {
    let eval = model.evaluate_with(
        point,
        space,
        EvalOptions {
            gradient: true,
            record_contributions: false,
        },
    )?;
    let analytic = eval.gradient.unwrap_or_default();
    let numeric = numeric_gradient(model, point, space)?;
    let max_error = analytic
        .iter()
        .zip(&numeric)
        .map(|(a, n)| (a - n).abs() / n.abs().max(1.0))
        .fold(0.0, f64::max);
    Ok(GradientCheck {
        analytic,
        numeric,
        max_error,
    })
}
