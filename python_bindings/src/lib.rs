use std::fmt::Display;

use ndarray::Array2;
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use pushforward_core::accumulator::Source;
use pushforward_core::distributions::Family;
use pushforward_core::expr::{self as core_expr, Expr as CoreExpr};
use pushforward_core::model::{
    EvalOptions, Model as CoreModel, ModelBuilder as CoreBuilder, Space,
};
use pushforward_core::registry::{Direction, TransformDecl};
use pushforward_core::sampling::{self, BatchConfig, InitConfig, LogDensityModel};
use pushforward_core::support::Support;

fn value_error(err: impl Display) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Symbolic expression over declared variables, built with ordinary Python
/// arithmetic and lowered when the declaration is made.
#[pyclass]
#[derive(Debug, Clone)]
struct Expr {
    inner: CoreExpr,
}

impl From<CoreExpr> for Expr {
    fn from(inner: CoreExpr) -> Self {
        Self { inner }
    }
}

/// Accept an `Expr` or a plain number.
fn operand(other: &Bound<'_, PyAny>) -> PyResult<CoreExpr> {
    if let Ok(expr) = other.downcast::<Expr>() {
        Ok(expr.borrow().inner.clone())
    } else if let Ok(value) = other.extract::<f64>() {
        Ok(CoreExpr::Const(value))
    } else {
        Err(PyValueError::new_err(
            "operand must be an Expr or a number",
        ))
    }
}

#[pymethods]
impl Expr {
    fn __add__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((self.inner.clone() + operand(other)?).into())
    }

    fn __radd__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((operand(other)? + self.inner.clone()).into())
    }

    fn __sub__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((self.inner.clone() - operand(other)?).into())
    }

    fn __rsub__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((operand(other)? - self.inner.clone()).into())
    }

    fn __mul__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((self.inner.clone() * operand(other)?).into())
    }

    fn __rmul__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((operand(other)? * self.inner.clone()).into())
    }

    fn __truediv__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((self.inner.clone() / operand(other)?).into())
    }

    fn __rtruediv__(&self, other: &Bound<'_, PyAny>) -> PyResult<Expr> {
        Ok((operand(other)? / self.inner.clone()).into())
    }

    fn __neg__(&self) -> Expr {
        (-self.inner.clone()).into()
    }

    fn __pow__(&self, exponent: f64, _modulo: Option<&Bound<'_, PyAny>>) -> Expr {
        self.inner.clone().powf(exponent).into()
    }

    fn exp(&self) -> Expr {
        self.inner.clone().exp().into()
    }

    fn log(&self) -> Expr {
        self.inner.clone().ln().into()
    }

    fn sqrt(&self) -> Expr {
        self.inner.clone().sqrt().into()
    }

    fn square(&self) -> Expr {
        self.inner.clone().square().into()
    }

    fn sigmoid(&self) -> Expr {
        self.inner.clone().sigmoid().into()
    }

    fn tanh(&self) -> Expr {
        self.inner.clone().tanh().into()
    }

    fn sin(&self) -> Expr {
        self.inner.clone().sin().into()
    }

    fn cos(&self) -> Expr {
        self.inner.clone().cos().into()
    }

    fn __repr__(&self) -> String {
        format!("Expr({:?})", self.inner)
    }
}

#[pyfunction]
fn var(name: &str) -> Expr {
    core_expr::var(name).into()
}

#[pyfunction]
fn constant(value: f64) -> Expr {
    core_expr::constant(value).into()
}

#[pyfunction]
fn exp(x: &Bound<'_, PyAny>) -> PyResult<Expr> {
    Ok(operand(x)?.exp().into())
}

#[pyfunction]
fn log(x: &Bound<'_, PyAny>) -> PyResult<Expr> {
    Ok(operand(x)?.ln().into())
}

#[pyfunction]
fn sigmoid(x: &Bound<'_, PyAny>) -> PyResult<Expr> {
    Ok(operand(x)?.sigmoid().into())
}

fn parse_direction(direction: &str) -> PyResult<Direction> {
    match direction {
        "backward" => Ok(Direction::Backward),
        "forward" => Ok(Direction::Forward),
        other => Err(PyValueError::new_err(format!(
            "direction must be 'forward' or 'backward', got '{other}'"
        ))),
    }
}

fn support_from_bounds(lower: Option<f64>, upper: Option<f64>) -> Support {
    match (lower, upper) {
        (None, None) => Support::Real,
        (Some(lo), None) => Support::LowerBounded(lo),
        (None, Some(hi)) => Support::UpperBounded(hi),
        (Some(lo), Some(hi)) => Support::Interval(lo, hi),
    }
}

#[pyclass]
#[derive(Debug, Clone, Default)]
struct ModelBuilder {
    inner: CoreBuilder,
}

#[pymethods]
impl ModelBuilder {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    #[pyo3(signature = (name, lower=None, upper=None))]
    fn declare_parameter(
        &mut self,
        name: &str,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> PyResult<Expr> {
        self.inner
            .declare_parameter(name, support_from_bounds(lower, upper))
            .map_err(value_error)?;
        Ok(var(name))
    }

    #[pyo3(signature = (name, expr, auto_correct=true))]
    fn declare_derived(&mut self, name: &str, expr: &Expr, auto_correct: bool) -> PyResult<Expr> {
        self.inner
            .declare_derived(name, expr.inner.clone(), auto_correct)
            .map_err(value_error)?;
        Ok(var(name))
    }

    /// Declare several outputs together. `direction` is `"backward"`,
    /// `"forward"` or `None` for no correction.
    #[pyo3(signature = (names, exprs, wrt=None, direction=Some("backward")))]
    fn declare_transform(
        &mut self,
        names: Vec<String>,
        exprs: Vec<Expr>,
        wrt: Option<Vec<String>>,
        direction: Option<&str>,
    ) -> PyResult<Vec<Expr>> {
        let outputs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut decl = TransformDecl::block(&outputs, exprs.into_iter().map(|e| e.inner).collect());
        if let Some(inputs) = &wrt {
            let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            decl = decl.wrt(&inputs);
        }
        if let Some(direction) = direction {
            decl = decl.correct(parse_direction(direction)?);
        }
        self.inner.declare_transform(decl).map_err(value_error)?;
        Ok(names.iter().map(|n| var(n)).collect())
    }

    fn add_density(
        &mut self,
        target: &str,
        family: &str,
        params: Vec<Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        let family: Family = family.parse().map_err(value_error)?;
        let params = params
            .iter()
            .map(operand)
            .collect::<PyResult<Vec<CoreExpr>>>()?;
        self.inner
            .add_density(target, family, params)
            .map_err(value_error)?;
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        self.inner.warnings().iter().map(|w| w.to_string()).collect()
    }

    fn build(&self) -> Model {
        Model {
            inner: self.inner.clone().build(),
        }
    }
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::Explicit => "explicit",
        Source::Jacobian(Direction::Forward) => "jacobian_forward",
        Source::Jacobian(Direction::Backward) => "jacobian_backward",
    }
}

#[pyclass]
struct Model {
    inner: CoreModel,
}

#[pymethods]
impl Model {
    #[getter]
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    #[getter]
    fn param_names(&self) -> Vec<String> {
        LogDensityModel::param_names(&self.inner)
    }

    fn warnings(&self) -> Vec<String> {
        self.inner.warnings().iter().map(|w| w.to_string()).collect()
    }

    /// Full evaluation: log-density, every variable's value, the gradient and
    /// the ledger of contributions.
    #[pyo3(signature = (params, unconstrained=false))]
    fn evaluate<'py>(
        &self,
        py: Python<'py>,
        params: Vec<f64>,
        unconstrained: bool,
    ) -> PyResult<Bound<'py, PyDict>> {
        let space = if unconstrained {
            Space::Unconstrained
        } else {
            Space::Constrained
        };
        let eval = self
            .inner
            .evaluate_with(&params, space, EvalOptions::default())
            .map_err(value_error)?;

        let dict = PyDict::new(py);
        dict.set_item("log_density", eval.log_density)?;

        let values = PyDict::new(py);
        for (name, value) in &eval.values {
            values.set_item(name.as_ref(), value)?;
        }
        dict.set_item("values", values)?;

        if let Some(grad) = eval.gradient {
            dict.set_item("gradient", PyArray1::from_vec(py, grad))?;
        }

        let contributions = PyList::new(
            py,
            eval.contributions
                .iter()
                .map(|c| (source_name(c.source), c.label.to_string(), c.log_value)),
        )?;
        dict.set_item("contributions", contributions)?;
        Ok(dict)
    }

    fn log_density(&self, params: Vec<f64>) -> f64 {
        self.inner.log_density(&params)
    }

    /// `(logp, grad)` at an unconstrained position.
    fn logp_and_grad<'py>(
        &self,
        py: Python<'py>,
        position: Vec<f64>,
    ) -> (f64, Bound<'py, PyArray1<f64>>) {
        let mut grad = vec![0.0; self.inner.dim()];
        let lp = self.inner.logp_and_grad(&position, &mut grad);
        (lp, PyArray1::from_vec(py, grad))
    }

    /// Log-density of every row of a `(n, dim)` array of constrained points.
    #[pyo3(signature = (points, threads=0))]
    fn log_density_batch<'py>(
        &self,
        py: Python<'py>,
        points: PyReadonlyArray2<'py, f64>,
        threads: usize,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let view = points.as_array();
        if view.ncols() != self.inner.dim() {
            return Err(PyValueError::new_err(format!(
                "expected {} columns, got {}",
                self.inner.dim(),
                view.ncols()
            )));
        }
        let rows: Vec<Vec<f64>> = view.rows().into_iter().map(|r| r.to_vec()).collect();
        let config = BatchConfig {
            num_threads: threads,
        };
        let model = &self.inner;
        let out = py.allow_threads(|| sampling::log_density_batch(model, &rows, &config));
        Ok(PyArray1::from_vec(py, out))
    }

    /// One finite unconstrained starting point per chain, as a
    /// `(chains, dim)` array.
    #[pyo3(signature = (chains=4, seed=42, radius=2.0, max_attempts=100))]
    fn initial_points<'py>(
        &self,
        py: Python<'py>,
        chains: usize,
        seed: u64,
        radius: f64,
        max_attempts: usize,
    ) -> PyResult<Bound<'py, numpy::PyArray2<f64>>> {
        let config = InitConfig {
            radius,
            max_attempts,
            seed,
        };
        let model = &self.inner;
        let points = py
            .allow_threads(|| sampling::find_initial_points(model, chains, &config))
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        let dim = self.inner.dim();
        let arr = Array2::from_shape_fn((chains, dim), |(c, j)| points[c][j]);
        Ok(arr.into_pyarray(py))
    }

    fn __repr__(&self) -> String {
        format!(
            "pushforward Model ({} parameters: {})",
            self.inner.dim(),
            self.inner.param_names().join(", ")
        )
    }
}

#[pymodule]
fn pushforward(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Expr>()?;
    m.add_class::<ModelBuilder>()?;
    m.add_class::<Model>()?;
    m.add_function(wrap_pyfunction!(var, m)?)?;
    m.add_function(wrap_pyfunction!(constant, m)?)?;
    m.add_function(wrap_pyfunction!(exp, m)?)?;
    m.add_function(wrap_pyfunction!(log, m)?)?;
    m.add_function(wrap_pyfunction!(sigmoid, m)?)?;
    Ok(())
}
