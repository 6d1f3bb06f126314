use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::accumulator::{Contribution, LogDensityAccumulator, Source};
use crate::autodiff::{forward_range, grad_logp, stage_jacobian};
use crate::corrector::Corrector;
use crate::distributions::Family;
use crate::error::{DeclarationError, EvalError, ModelWarning};
use crate::expr::Expr;
use crate::graph::{Graph, NodeId};
use crate::registry::{
    Correction, Direction, TransformDecl, TransformRegistry, VarId, VarKind, Variable,
};
use crate::support::{Constrained, Support};

/// An explicit density statement `target ~ family(params...)`.
#[derive(Debug, Clone)]
pub struct DensityStatement {
    pub target: VarId,
    pub family: Family,
    pub params: Vec<Expr>,
    label: Arc<str>,
    nodes: Range<usize>,
    term: NodeId,
}

/// One unit of work in an evaluation pass, in declaration order.
#[derive(Debug, Clone)]
enum Step {
    Parameter {
        var: VarId,
    },
    Derive {
        record: usize,
    },
    Correct {
        record: usize,
        direction: Direction,
        nodes: Range<usize>,
        term: NodeId,
    },
    Density {
        statement: usize,
    },
}

/// Coordinates a point is given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// Parameter values as declared; values outside a support are rejected.
    Constrained,
    /// Raw reals mapped into each support; the map's log-Jacobian is added.
    Unconstrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    pub gradient: bool,
    pub record_contributions: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            gradient: true,
            record_contributions: true,
        }
    }
}

/// Result of evaluating a model at one point.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Every variable's value, in declaration order.
    pub values: Vec<(Arc<str>, f64)>,
    pub log_density: f64,
    /// Gradient with respect to the point, in the space it was given in.
    pub gradient: Option<Vec<f64>>,
    pub contributions: Vec<Contribution>,
}

impl Evaluation {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| *v)
    }

    /// Sum of all Jacobian contributions, either direction.
    pub fn jacobian_total(&self) -> f64 {
        self.contributions
            .iter()
            .filter(|c| matches!(c.source, Source::Jacobian(_)))
            .map(|c| c.log_value)
            .sum()
    }
}

/// Declaration phase of a model. Consumed by [`ModelBuilder::build`], after
/// which nothing can be declared.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    graph: Graph,
    registry: TransformRegistry,
    densities: Vec<DensityStatement>,
    steps: Vec<Step>,
    warnings: Vec<ModelWarning>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a free parameter with a flat prior over `support`.
    pub fn declare_parameter(
        &mut self,
        name: &str,
        support: Support,
    ) -> Result<VarId, DeclarationError> {
        let var = self
            .registry
            .declare_parameter(&mut self.graph, name, support)?;
        self.steps.push(Step::Parameter { var });
        Ok(var)
    }

    /// Declare `name = expression`. With `auto_correct` the variable's
    /// Jacobian is pulled back onto its single direct input, which is what a
    /// density statement on `name` needs to be generative.
    pub fn declare_derived(
        &mut self,
        name: &str,
        expression: Expr,
        auto_correct: bool,
    ) -> Result<VarId, DeclarationError> {
        let mut decl = TransformDecl::scalar(name, expression);
        decl.correction = Correction::from_auto(auto_correct);
        let outputs = self.declare_transform(decl)?;
        Ok(outputs[0])
    }

    /// Declare one or more derived variables with an explicit correction.
    pub fn declare_transform(&mut self, decl: TransformDecl) -> Result<Vec<VarId>, DeclarationError> {
        let correction = decl.correction;
        let record = self.registry.declare(&mut self.graph, decl)?;
        self.steps.push(Step::Derive { record });

        let rec = self.registry.record(record);
        let outputs = rec.outputs.clone();
        if let Some(direction) = correction.direction() {
            let out_nodes: Vec<NodeId> = outputs
                .iter()
                .map(|&v| self.registry.variable(v).node)
                .collect();
            let in_nodes: Vec<NodeId> = rec
                .inputs
                .iter()
                .map(|&v| self.registry.variable(v).node)
                .collect();
            let expr_nodes = rec.nodes.clone();

            let start = self.graph.len();
            let entries = stage_jacobian(&mut self.graph, expr_nodes, &out_nodes, &in_nodes);
            let term = match entries.as_slice() {
                [single] => self.graph.log_abs(*single),
                _ => self.graph.log_abs_det(entries, out_nodes.len()),
            };
            let nodes = start..self.graph.len();
            trace!(record, ?direction, staged = nodes.len(), "staged Jacobian correction");
            self.steps.push(Step::Correct {
                record,
                direction,
                nodes,
                term,
            });
        }
        Ok(outputs)
    }

    /// Add `target ~ family(params...)`.
    ///
    /// A statement on a derived variable declared without a correction is
    /// accepted, adds no Jacobian term, and records a
    /// [`ModelWarning::MissingCorrection`] the first time it happens for that
    /// variable.
    pub fn add_density<I, E>(
        &mut self,
        target: &str,
        family: Family,
        params: I,
    ) -> Result<usize, DeclarationError>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let params: Vec<Expr> = params.into_iter().map(Into::into).collect();
        let var = self
            .registry
            .lookup(target)
            .ok_or_else(|| DeclarationError::UnknownTarget {
                target: target.to_string(),
            })?;
        family.check_arity(params.len())?;
        for p in &params {
            for reference in p.references() {
                if self.registry.lookup(reference).is_none() {
                    return Err(DeclarationError::CyclicDependency {
                        name: target.to_string(),
                        reference: reference.to_string(),
                    });
                }
            }
        }

        let registry = &self.registry;
        let start = self.graph.len();
        let mut param_nodes = Vec::with_capacity(params.len());
        for p in &params {
            let node = self.graph.lower(p, &|name| {
                registry
                    .lookup(name)
                    .map(|id| registry.variable(id).node)
                    .ok_or_else(|| DeclarationError::CyclicDependency {
                        name: target.to_string(),
                        reference: name.to_string(),
                    })
            })?;
            param_nodes.push(node);
        }
        let x = registry.variable(var).node;
        let term = self.graph.log_density(family, x, param_nodes);
        let nodes = start..self.graph.len();

        if let Some(record) = self.registry.record_of(var) {
            let already = self.warnings.iter().any(|w| match w {
                ModelWarning::MissingCorrection { variable } => variable == target,
            });
            if record.correction == Correction::None && !already {
                warn!(
                    variable = target,
                    "density statement on a derived variable without Jacobian correction"
                );
                self.warnings.push(ModelWarning::MissingCorrection {
                    variable: target.to_string(),
                });
            }
        }

        let statement = self.densities.len();
        self.densities.push(DensityStatement {
            target: var,
            family,
            params,
            label: Arc::clone(&self.registry.variable(var).name),
            nodes,
            term,
        });
        self.steps.push(Step::Density { statement });
        trace!(target, %family, "added density statement");
        Ok(statement)
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    pub fn build(self) -> Model {
        let param_vars: Vec<VarId> = self
            .registry
            .variables()
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_parameter())
            .map(|(id, _)| id)
            .collect();
        debug!(
            parameters = param_vars.len(),
            transforms = self.registry.records().len(),
            densities = self.densities.len(),
            nodes = self.graph.len(),
            "model built"
        );
        Model {
            graph: self.graph,
            registry: self.registry,
            densities: self.densities,
            steps: self.steps,
            warnings: self.warnings,
            param_vars,
        }
    }
}

/// An immutable, fully declared model. Shareable across threads; every
/// evaluation owns its own accumulator.
#[derive(Debug, Clone)]
pub struct Model {
    graph: Graph,
    registry: TransformRegistry,
    densities: Vec<DensityStatement>,
    steps: Vec<Step>,
    warnings: Vec<ModelWarning>,
    param_vars: Vec<VarId>,
}

struct Pass {
    node_values: Vec<f64>,
    gradient: Option<Vec<f64>>,
}

impl Model {
    /// Number of free parameters.
    pub fn dim(&self) -> usize {
        self.param_vars.len()
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.param_vars
            .iter()
            .map(|&v| self.registry.variable(v).name.as_ref())
            .collect()
    }

    pub fn supports(&self) -> Vec<Support> {
        self.param_vars
            .iter()
            .map(|&v| match self.registry.variable(v).kind {
                VarKind::Parameter { support, .. } => support,
                VarKind::Derived { .. } => Support::Real,
            })
            .collect()
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn densities(&self) -> &[DensityStatement] {
        &self.densities
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    /// Map raw reals into each parameter's support.
    pub fn constrain(&self, raw: &[f64]) -> Vec<f64> {
        self.supports()
            .iter()
            .zip(raw)
            .map(|(s, &r)| s.constrain(r).value)
            .collect()
    }

    /// Inverse of [`Model::constrain`]; `None` if any value is outside its
    /// support.
    pub fn unconstrain(&self, values: &[f64]) -> Option<Vec<f64>> {
        self.supports()
            .iter()
            .zip(values)
            .map(|(s, &x)| s.unconstrain(x))
            .collect()
    }

    pub fn evaluate(&self, params: &[f64]) -> Result<Evaluation, EvalError> {
        self.evaluate_with(params, Space::Constrained, EvalOptions::default())
    }

    pub fn evaluate_unconstrained(&self, raw: &[f64]) -> Result<Evaluation, EvalError> {
        self.evaluate_with(raw, Space::Unconstrained, EvalOptions::default())
    }

    pub fn evaluate_with(
        &self,
        point: &[f64],
        space: Space,
        options: EvalOptions,
    ) -> Result<Evaluation, EvalError> {
        let mut acc = if options.record_contributions {
            LogDensityAccumulator::recording()
        } else {
            LogDensityAccumulator::new()
        };
        let pass = self.run(point, space, &mut acc, options.gradient)?;
        let values = self
            .registry
            .variables()
            .iter()
            .map(|v| (Arc::clone(&v.name), pass.node_values[v.node.0]))
            .collect();
        Ok(Evaluation {
            values,
            log_density: acc.value(),
            gradient: pass.gradient,
            contributions: acc.take_contributions(),
        })
    }

    /// Evaluate into a caller-owned accumulator. The accumulator is reset on
    /// entry, whatever state a previous (possibly failed) evaluation left it
    /// in. On error it holds exactly the contributions made before the
    /// failing step.
    pub fn evaluate_into(
        &self,
        params: &[f64],
        acc: &mut LogDensityAccumulator,
    ) -> Result<f64, EvalError> {
        self.run(params, Space::Constrained, acc, false)?;
        Ok(acc.value())
    }

    /// Log-density at a constrained point; `-inf` wherever evaluation fails.
    pub fn log_density(&self, params: &[f64]) -> f64 {
        let mut acc = LogDensityAccumulator::new();
        match self.run(params, Space::Constrained, &mut acc, false) {
            Ok(_) => acc.value(),
            Err(err) => {
                debug!(error = %err, "evaluation failed, treating point as zero density");
                f64::NEG_INFINITY
            }
        }
    }

    /// Log-density and gradient without recording contributions, for hot
    /// sampler loops. `grad` must have length [`Model::dim`].
    pub fn log_density_and_gradient(
        &self,
        point: &[f64],
        space: Space,
        grad: &mut [f64],
    ) -> Result<f64, EvalError> {
        if grad.len() != self.dim() {
            return Err(EvalError::DimensionMismatch {
                expected: self.dim(),
                found: grad.len(),
            });
        }
        let mut acc = LogDensityAccumulator::new();
        let pass = self.run(point, space, &mut acc, true)?;
        if let Some(g) = pass.gradient {
            grad.copy_from_slice(&g);
        }
        Ok(acc.value())
    }

    fn run(
        &self,
        point: &[f64],
        space: Space,
        acc: &mut LogDensityAccumulator,
        want_gradient: bool,
    ) -> Result<Pass, EvalError> {
        acc.reset();
        if point.len() != self.dim() {
            return Err(EvalError::DimensionMismatch {
                expected: self.dim(),
                found: point.len(),
            });
        }

        let supports = self.supports();
        let constrained: Option<Vec<Constrained>> = match space {
            Space::Constrained => None,
            Space::Unconstrained => Some(
                supports
                    .iter()
                    .zip(point)
                    .map(|(s, &r)| s.constrain(r))
                    .collect(),
            ),
        };
        let params: Vec<f64> = match &constrained {
            Some(c) => c.iter().map(|c| c.value).collect(),
            None => point.to_vec(),
        };

        let mut values = vec![0.0; self.graph.len()];
        let mut seeds: Vec<(NodeId, f64)> = Vec::new();

        for step in &self.steps {
            match step {
                Step::Parameter { var } => {
                    let variable = self.registry.variable(*var);
                    let (index, support) = match variable.kind {
                        VarKind::Parameter { index, support } => (index, support),
                        VarKind::Derived { .. } => continue,
                    };
                    let x = params[index];
                    // A bijection output may round onto a bound; only a
                    // constrained point is held to the open support.
                    let admissible = match space {
                        Space::Constrained => support.contains(x),
                        Space::Unconstrained => x.is_finite(),
                    };
                    if !admissible {
                        return Err(EvalError::Domain {
                            variable: variable.name.to_string(),
                            reason: format!("{x} is outside the parameter support {support:?}"),
                        });
                    }
                    values[variable.node.0] = x;
                    if let Some(c) = &constrained {
                        if support != Support::Real {
                            Corrector::correct_backward(acc, &variable.name, c[index].log_jacobian);
                        }
                    }
                }
                Step::Derive { record } => {
                    let rec = self.registry.record(*record);
                    forward_range(&self.graph, rec.nodes.clone(), &mut values, &params)
                        .map_err(|f| f.into_eval_error(&rec.label))?;
                }
                Step::Correct {
                    record,
                    direction,
                    nodes,
                    term,
                } => {
                    let rec = self.registry.record(*record);
                    forward_range(&self.graph, nodes.clone(), &mut values, &params)
                        .map_err(|f| f.into_eval_error(&rec.label))?;
                    Corrector::apply(acc, *direction, &rec.label, values[term.0]);
                    seeds.push((*term, Corrector::sign(*direction)));
                }
                Step::Density { statement } => {
                    let stmt = &self.densities[*statement];
                    forward_range(&self.graph, stmt.nodes.clone(), &mut values, &params)
                        .map_err(|f| f.into_eval_error(&stmt.label))?;
                    acc.add(Source::Explicit, &stmt.label, values[stmt.term.0]);
                    seeds.push((stmt.term, 1.0));
                }
            }
        }

        let gradient = want_gradient.then(|| {
            let mut grad = grad_logp(&self.graph, &values, &seeds);
            if let Some(c) = &constrained {
                for (g, c) in grad.iter_mut().zip(c) {
                    *g = *g * c.dvalue + c.dlog_jacobian;
                }
            }
            grad
        });

        Ok(Pass {
            node_values: values,
            gradient,
        })
    }

    /// Variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.registry.lookup(name).map(|id| self.registry.variable(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::var;
    use std::f64::consts::TAU;

    fn std_normal_logpdf(x: f64) -> f64 {
        -0.5 * x * x - 0.5 * TAU.ln()
    }

    #[test]
    fn test_identity_transform_has_zero_correction() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_derived("y", var("x"), true).unwrap();
        let model = b.build();
        for x in [-3.0, -0.1, 0.0, 2.5] {
            let eval = model.evaluate(&[x]).unwrap();
            assert_eq!(eval.jacobian_total(), 0.0);
            assert_eq!(eval.contributions.len(), 1);
        }
    }

    #[test]
    fn test_linear_transform_correction_is_constant() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_derived("y", -2.5 * var("x") + 4.0, true).unwrap();
        let model = b.build();
        for x in [-10.0, 0.0, 0.3, 7.0] {
            let eval = model.evaluate(&[x]).unwrap();
            assert!((eval.jacobian_total() - 2.5_f64.ln()).abs() < 1e-15);
        }
    }

    #[test]
    fn test_correction_is_added_right_after_the_variable() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.add_density("x", Family::Normal, [0.0, 1.0]).unwrap();
        b.declare_derived("y", var("x").exp() + var("x") / 10.0, true)
            .unwrap();
        b.add_density("y", Family::Normal, [0.0, 1.0]).unwrap();
        let model = b.build();

        let eval = model.evaluate(&[0.0]).unwrap();
        let sources: Vec<(Source, &str)> = eval
            .contributions
            .iter()
            .map(|c| (c.source, c.label.as_ref()))
            .collect();
        assert_eq!(
            sources,
            vec![
                (Source::Explicit, "x"),
                (Source::Jacobian(Direction::Backward), "y"),
                (Source::Explicit, "y"),
            ]
        );
        let expected = std_normal_logpdf(0.0) + std_normal_logpdf(1.0) + 1.1_f64.ln();
        assert!((eval.log_density - expected).abs() < 1e-12);
        assert_eq!(eval.value("y"), Some(1.0));
    }

    #[test]
    fn test_missing_correction_warns_once_and_adds_nothing() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_derived("y", var("x").exp(), false).unwrap();
        b.add_density("y", Family::LogNormal, [0.0, 1.0]).unwrap();
        assert_eq!(
            b.warnings(),
            &[ModelWarning::MissingCorrection {
                variable: "y".to_string()
            }]
        );
        b.add_density("y", Family::Exponential, [1.0]).unwrap();
        let model = b.build();
        assert_eq!(model.warnings().len(), 1);

        let eval = model.evaluate(&[0.2]).unwrap();
        assert!(eval
            .contributions
            .iter()
            .all(|c| c.source == Source::Explicit));
        assert_eq!(eval.jacobian_total(), 0.0);
    }

    #[test]
    fn test_density_on_parameter_does_not_warn() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.add_density("x", Family::Normal, [0.0, 1.0]).unwrap();
        b.declare_derived("y", var("x") * 2.0, true).unwrap();
        b.add_density("y", Family::Normal, [0.0, 1.0]).unwrap();
        assert!(b.warnings().is_empty());
    }

    #[test]
    fn test_non_invertible_point_leaves_prior_contributions() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.add_density("x", Family::Normal, [0.0, 1.0]).unwrap();
        b.declare_derived("y", var("x").square(), true).unwrap();
        b.add_density("y", Family::Normal, [0.0, 1.0]).unwrap();
        let model = b.build();

        let mut acc = LogDensityAccumulator::recording();
        let err = model.evaluate_into(&[0.0], &mut acc).unwrap_err();
        assert!(matches!(err, EvalError::NonInvertible { ref variable, .. } if variable == "y"));
        assert_eq!(acc.contributions().len(), 1);
        assert_eq!(acc.value(), std_normal_logpdf(0.0));
        assert_eq!(model.log_density(&[0.0]), f64::NEG_INFINITY);

        // The same accumulator is reset by the next evaluation.
        let lp = model.evaluate_into(&[1.0], &mut acc).unwrap();
        let expected = 2.0 * std_normal_logpdf(1.0) + 2.0_f64.ln();
        assert!((lp - expected).abs() < 1e-12);
        assert_eq!(acc.contributions().len(), 3);
    }

    #[test]
    fn test_domain_error_is_recoverable() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_derived("y", var("x").ln(), true).unwrap();
        let model = b.build();
        let err = model.evaluate(&[-1.0]).unwrap_err();
        assert!(err.is_zero_density());
        assert!(matches!(err, EvalError::Domain { .. }));
        assert_eq!(model.log_density(&[-1.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        let model = b.build();
        let err = model.evaluate(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            EvalError::DimensionMismatch {
                expected: 1,
                found: 2
            }
        );
        assert!(!err.is_zero_density());
    }

    #[test]
    fn test_forward_correction_subtracts() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_transform(
            TransformDecl::scalar("y", var("x") * 3.0).correct(Direction::Forward),
        )
        .unwrap();
        let model = b.build();
        let eval = model.evaluate(&[1.0]).unwrap();
        assert!((eval.log_density + 3.0_f64.ln()).abs() < 1e-15);
        assert_eq!(
            eval.contributions[0].source,
            Source::Jacobian(Direction::Forward)
        );
    }

    #[test]
    fn test_block_transform_uses_log_abs_det() {
        // Polar to Cartesian: |det J| = r
        let mut b = ModelBuilder::new();
        b.declare_parameter("r", Support::LowerBounded(0.0)).unwrap();
        b.declare_parameter("theta", Support::Real).unwrap();
        b.declare_transform(
            TransformDecl::block(
                &["u", "v"],
                vec![var("r") * var("theta").cos(), var("r") * var("theta").sin()],
            )
            .wrt(&["r", "theta"])
            .correct(Direction::Backward),
        )
        .unwrap();
        let model = b.build();
        let eval = model.evaluate(&[2.0, 0.6]).unwrap();
        assert!((eval.jacobian_total() - 2.0_f64.ln()).abs() < 1e-12);

        // d/dr log r = 1/r, nothing depends on theta
        let grad = eval.gradient.unwrap();
        assert!((grad[0] - 0.5).abs() < 1e-12);
        assert!(grad[1].abs() < 1e-12);
    }

    #[test]
    fn test_parameter_outside_support_is_domain_error() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("sigma", Support::LowerBounded(0.0)).unwrap();
        let model = b.build();
        assert!(matches!(
            model.evaluate(&[-0.5]),
            Err(EvalError::Domain { .. })
        ));
    }

    #[test]
    fn test_unconstrained_evaluation_adds_bijection_jacobian() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("sigma", Support::LowerBounded(0.0)).unwrap();
        b.add_density("sigma", Family::Exponential, [1.0]).unwrap();
        let model = b.build();

        let raw = 0.4_f64;
        let eval = model.evaluate_unconstrained(&[raw]).unwrap();
        let sigma = raw.exp();
        // log p(sigma) + log|d sigma / d raw|
        let expected = -sigma + raw;
        assert!((eval.log_density - expected).abs() < 1e-12);
        assert_eq!(
            eval.contributions[0].source,
            Source::Jacobian(Direction::Backward)
        );
        // d/draw (-exp(raw) + raw) = 1 - exp(raw)
        let grad = eval.gradient.unwrap();
        assert!((grad[0] - (1.0 - sigma)).abs() < 1e-12);
    }

    #[test]
    fn test_unconstrained_point_saturating_at_a_bound() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("lo", Support::LowerBounded(1.5)).unwrap();
        b.declare_parameter("p", Support::Interval(0.0, 1.0)).unwrap();
        b.add_density("p", Family::Normal, [0.5, 1.0]).unwrap();
        let model = b.build();

        // exp(-38) vanishes next to 1.5 and σ(38) rounds to 1.
        let eval = model.evaluate_unconstrained(&[-38.0, 38.0]).unwrap();
        assert_eq!(eval.value("lo"), Some(1.5));
        assert_eq!(eval.value("p"), Some(1.0));
        let expected = -38.0 + (-38.0) + std_normal_logpdf(0.5);
        assert!((eval.log_density - expected).abs() < 1e-9, "{}", eval.log_density);

        let mut grad = vec![0.0; 2];
        let lp = model
            .log_density_and_gradient(&[-38.0, 38.0], Space::Unconstrained, &mut grad)
            .unwrap();
        assert!(lp.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));

        // The same values given directly are on the boundary.
        assert!(matches!(
            model.evaluate(&[1.5, 1.0]),
            Err(EvalError::Domain { .. })
        ));
    }

    #[test]
    fn test_unknown_target_and_arity() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        assert!(matches!(
            b.add_density("nope", Family::Normal, [0.0, 1.0]),
            Err(DeclarationError::UnknownTarget { .. })
        ));
        assert!(matches!(
            b.add_density("x", Family::Normal, [0.0]),
            Err(DeclarationError::DistributionArity { .. })
        ));
        assert!(matches!(
            b.add_density("x", Family::Normal, [var("mu"), 1.0.into()]),
            Err(DeclarationError::CyclicDependency { .. })
        ));
    }
}
