//! Change-of-variables corrections.
//!
//! For an invertible `y = f(x)`, densities on the two sides are related by
//! `p_x(x) = p_y(f(x)) · |det J_f(x)|`. Which side of that identity a model
//! is on decides the sign of the log-Jacobian it needs, and getting that sign
//! wrong is silent: the model still runs, it just samples the wrong target.
//! The two directions are therefore separate operations here and nothing
//! picks a sign on the caller's behalf.
//!
//! Invertibility is only checked locally (a nonzero derivative or
//! determinant at the evaluated point). A transform such as `sin(x)` passes
//! that check almost everywhere while being many-to-one globally.

use std::sync::Arc;

use nalgebra::DMatrix;

use crate::accumulator::{LogDensityAccumulator, Source};
use crate::error::{EvalError, OpFault};
use crate::registry::Direction;

pub struct Corrector;

impl Corrector {
    /// Push a flat density forward through the transform: adds
    /// `-log|det J|`.
    pub fn correct_forward(acc: &mut LogDensityAccumulator, label: &Arc<str>, log_abs_det: f64) {
        acc.add(Source::Jacobian(Direction::Forward), label, -log_abs_det);
    }

    /// Pull a density stated on the transformed variable back onto its
    /// inputs: adds `+log|det J|`.
    pub fn correct_backward(acc: &mut LogDensityAccumulator, label: &Arc<str>, log_abs_det: f64) {
        acc.add(Source::Jacobian(Direction::Backward), label, log_abs_det);
    }

    /// Apply the correction a transform record was declared with.
    pub fn apply(
        acc: &mut LogDensityAccumulator,
        direction: Direction,
        label: &Arc<str>,
        log_abs_det: f64,
    ) {
        match direction {
            Direction::Forward => Self::correct_forward(acc, label, log_abs_det),
            Direction::Backward => Self::correct_backward(acc, label, log_abs_det),
        }
    }

    /// Sign a correction contributes to the accumulated log-density.
    pub fn sign(direction: Direction) -> f64 {
        match direction {
            Direction::Forward => -1.0,
            Direction::Backward => 1.0,
        }
    }

    /// `log|f'(x)|` for a scalar transform.
    pub fn log_abs_derivative(variable: &str, derivative: f64) -> Result<f64, EvalError> {
        log_abs_derivative(derivative).map_err(|f| f.into_eval_error(variable))
    }

    /// `log|det J|` for a row-major `dim × dim` Jacobian.
    pub fn log_abs_det(variable: &str, jacobian: &[f64], dim: usize) -> Result<f64, EvalError> {
        log_abs_det(jacobian, dim).map_err(|f| f.into_eval_error(variable))
    }
}

pub(crate) fn log_abs_derivative(d: f64) -> Result<f64, OpFault> {
    if !d.is_finite() {
        return Err(OpFault::Domain(format!("derivative is undefined ({d})")));
    }
    if d == 0.0 {
        return Err(OpFault::Singular("derivative is zero"));
    }
    Ok(d.abs().ln())
}

pub(crate) fn log_abs_det(jacobian: &[f64], dim: usize) -> Result<f64, OpFault> {
    if let Some(bad) = jacobian.iter().find(|v| !v.is_finite()) {
        return Err(OpFault::Domain(format!("Jacobian entry is undefined ({bad})")));
    }
    if dim == 1 {
        return log_abs_derivative(jacobian[0]);
    }
    let lu = DMatrix::from_row_slice(dim, dim, jacobian).lu();
    let u = lu.u();
    let mut total = 0.0;
    for i in 0..dim {
        let pivot = u[(i, i)];
        if pivot == 0.0 {
            return Err(OpFault::Singular("Jacobian is singular"));
        }
        total += pivot.abs().ln();
    }
    Ok(total)
}

/// `J^{-T}` in row-major order, the adjoint of `log|det J|` with respect to
/// the entries of `J`.
pub(crate) fn inverse_transpose(jacobian: &[f64], dim: usize) -> Option<Vec<f64>> {
    let inv = DMatrix::from_row_slice(dim, dim, jacobian).try_inverse()?;
    // Column-major storage of J^{-1} read out as row-major is J^{-T}.
    Some(inv.as_slice().to_vec())
}
