use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::error::DeclarationError;
use crate::expr::Expr;
use crate::graph::{Graph, NodeId};
use crate::support::Support;

pub type VarId = usize;

/// Which way a change of variables is applied.
///
/// `Backward` pulls a density stated on `y = f(x)` back onto `x` and adds
/// `+log|det J_f(x)|`. `Forward` pushes a flat density on `x` forward onto
/// `y` and adds `-log|det J_f(x)|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// Correction attached to a transform at declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Correction {
    #[default]
    None,
    Forward,
    Backward,
}

impl Correction {
    /// `auto_correct = true` means the declared variable carries the density
    /// statements made about it, so its Jacobian is pulled back onto the
    /// inputs.
    pub fn from_auto(auto_correct: bool) -> Self {
        if auto_correct {
            Correction::Backward
        } else {
            Correction::None
        }
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            Correction::None => None,
            Correction::Forward => Some(Direction::Forward),
            Correction::Backward => Some(Direction::Backward),
        }
    }

    pub fn is_auto(self) -> bool {
        self != Correction::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Parameter { index: usize, support: Support },
    Derived { record: usize },
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Arc<str>,
    pub kind: VarKind,
    /// Node holding the variable's value.
    pub node: NodeId,
}

impl Variable {
    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, VarKind::Parameter { .. })
    }
}

/// Declaration of one or more derived variables defined together.
///
/// A scalar declaration infers its direct input from the expression; a block
/// of `k` outputs may name its `k` inputs with [`TransformDecl::wrt`] so the
/// Jacobian is square.
#[derive(Debug, Clone)]
pub struct TransformDecl {
    pub outputs: Vec<String>,
    pub expressions: Vec<Expr>,
    pub wrt: Option<Vec<String>>,
    pub correction: Correction,
}

impl TransformDecl {
    pub fn scalar(name: &str, expression: Expr) -> Self {
        Self {
            outputs: vec![name.to_string()],
            expressions: vec![expression],
            wrt: None,
            correction: Correction::None,
        }
    }

    pub fn block(outputs: &[&str], expressions: Vec<Expr>) -> Self {
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            expressions,
            wrt: None,
            correction: Correction::None,
        }
    }

    pub fn wrt(mut self, inputs: &[&str]) -> Self {
        self.wrt = Some(inputs.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn correct(mut self, direction: Direction) -> Self {
        self.correction = match direction {
            Direction::Forward => Correction::Forward,
            Direction::Backward => Correction::Backward,
        };
        self
    }

    fn label(&self) -> String {
        self.outputs.join(", ")
    }
}

/// Immutable record of a declared transform.
#[derive(Debug, Clone)]
pub struct TransformRecord {
    pub label: Arc<str>,
    pub outputs: Vec<VarId>,
    pub expressions: Vec<Expr>,
    /// Direct inputs the Jacobian is taken with respect to.
    pub inputs: Vec<VarId>,
    pub correction: Correction,
    /// Graph nodes created when the expressions were lowered.
    pub nodes: Range<usize>,
}

/// Symbol table and transform records of one model.
///
/// Names are unique across parameters and derived variables, and an
/// expression may only reference names that are already present, which keeps
/// the declaration sequence a DAG without any cycle detection.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    variables: Vec<Variable>,
    by_name: HashMap<Arc<str>, VarId>,
    records: Vec<TransformRecord>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn records(&self) -> &[TransformRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> &TransformRecord {
        &self.records[index]
    }

    /// Record of the transform defining `var`, if it is derived.
    pub fn record_of(&self, var: VarId) -> Option<&TransformRecord> {
        match self.variables[var].kind {
            VarKind::Derived { record } => Some(&self.records[record]),
            VarKind::Parameter { .. } => None,
        }
    }

    fn check_available(&self, name: &str) -> Result<(), DeclarationError> {
        if self.by_name.contains_key(name) {
            Err(DeclarationError::DuplicateDeclaration {
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn resolve(&self, declaring: &str, reference: &str) -> Result<VarId, DeclarationError> {
        self.lookup(reference)
            .ok_or_else(|| DeclarationError::CyclicDependency {
                name: declaring.to_string(),
                reference: reference.to_string(),
            })
    }

    fn push_variable(&mut self, name: &str, kind: VarKind, node: NodeId) -> VarId {
        let id = self.variables.len();
        let name: Arc<str> = Arc::from(name);
        self.by_name.insert(Arc::clone(&name), id);
        self.variables.push(Variable { name, kind, node });
        id
    }

    pub(crate) fn declare_parameter(
        &mut self,
        graph: &mut Graph,
        name: &str,
        support: Support,
    ) -> Result<VarId, DeclarationError> {
        self.check_available(name)?;
        support.validate(name)?;
        let index = graph.param_count;
        let node = graph.add_param();
        trace!(name, index, ?support, "declared parameter");
        Ok(self.push_variable(name, VarKind::Parameter { index, support }, node))
    }

    /// Validate `decl`, lower its expressions into `graph` and register its
    /// outputs. Nothing is modified when validation fails.
    pub(crate) fn declare(
        &mut self,
        graph: &mut Graph,
        decl: TransformDecl,
    ) -> Result<usize, DeclarationError> {
        if decl.outputs.is_empty() || decl.outputs.len() != decl.expressions.len() {
            return Err(DeclarationError::EmptyTransform);
        }
        let label = decl.label();
        for (i, name) in decl.outputs.iter().enumerate() {
            self.check_available(name)?;
            if decl.outputs[..i].contains(name) {
                return Err(DeclarationError::DuplicateDeclaration { name: name.clone() });
            }
        }

        let mut references: Vec<VarId> = Vec::new();
        for (name, expr) in decl.outputs.iter().zip(&decl.expressions) {
            for reference in expr.references() {
                let id = self.resolve(name, reference)?;
                if !references.contains(&id) {
                    references.push(id);
                }
            }
        }

        let inputs = match &decl.wrt {
            Some(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    let id = self.resolve(&label, name)?;
                    if ids.contains(&id) {
                        return Err(DeclarationError::DuplicateDeclaration { name: name.clone() });
                    }
                    ids.push(id);
                }
                ids
            }
            None => references,
        };

        if decl.correction.is_auto() && inputs.len() != decl.outputs.len() {
            return Err(DeclarationError::NonSquareJacobian {
                name: label,
                outputs: decl.outputs.len(),
                inputs: inputs.len(),
            });
        }

        let start = graph.len();
        let mut output_nodes = Vec::with_capacity(decl.outputs.len());
        for (name, expr) in decl.outputs.iter().zip(&decl.expressions) {
            let node = graph.lower(expr, &|reference| {
                self.resolve(name, reference).map(|id| self.variables[id].node)
            })?;
            output_nodes.push(node);
        }
        // A bare reference (`y = x`) lowers to no new node; give the output a
        // node of its own so every variable owns exactly one value slot.
        for node in output_nodes.iter_mut() {
            if node.0 < start {
                let zero = graph.add_constant(0.0);
                *node = graph.add(*node, zero);
            }
        }
        let end = graph.len();

        let record = self.records.len();
        let outputs = decl
            .outputs
            .iter()
            .zip(output_nodes)
            .map(|(name, node)| self.push_variable(name, VarKind::Derived { record }, node))
            .collect();
        trace!(transform = %label, correction = ?decl.correction, "declared transform");
        self.records.push(TransformRecord {
            label: Arc::from(label),
            outputs,
            expressions: decl.expressions,
            inputs,
            correction: decl.correction,
            nodes: start..end,
        });
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::var;

    fn registry_with_x() -> (TransformRegistry, Graph) {
        let mut reg = TransformRegistry::new();
        let mut graph = Graph::new();
        reg.declare_parameter(&mut graph, "x", Support::Real).unwrap();
        (reg, graph)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (mut reg, mut graph) = registry_with_x();
        let err = reg
            .declare(&mut graph, TransformDecl::scalar("x", var("x") * 2.0))
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::DuplicateDeclaration {
                name: "x".to_string()
            }
        );
        let err = reg
            .declare_parameter(&mut graph, "x", Support::Real)
            .unwrap_err();
        assert!(matches!(err, DeclarationError::DuplicateDeclaration { .. }));
    }

    #[test]
    fn test_forward_reference_is_cyclic() {
        let (mut reg, mut graph) = registry_with_x();
        let before = graph.len();
        let err = reg
            .declare(&mut graph, TransformDecl::scalar("y", var("x") + var("z")))
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::CyclicDependency {
                name: "y".to_string(),
                reference: "z".to_string()
            }
        );
        assert_eq!(graph.len(), before);
        assert!(reg.lookup("y").is_none());
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let (mut reg, mut graph) = registry_with_x();
        let err = reg
            .declare(&mut graph, TransformDecl::scalar("y", var("y") + var("x")))
            .unwrap_err();
        assert!(matches!(err, DeclarationError::CyclicDependency { .. }));
    }

    #[test]
    fn test_auto_correct_needs_square_jacobian() {
        let (mut reg, mut graph) = registry_with_x();
        reg.declare_parameter(&mut graph, "a", Support::Real).unwrap();
        let err = reg
            .declare(
                &mut graph,
                TransformDecl::scalar("y", var("a") * var("x")).correct(Direction::Backward),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::NonSquareJacobian {
                outputs: 1,
                inputs: 2,
                ..
            }
        ));

        // Naming the input explicitly makes it square.
        reg.declare(
            &mut graph,
            TransformDecl::scalar("y", var("a") * var("x"))
                .wrt(&["x"])
                .correct(Direction::Backward),
        )
        .unwrap();
    }

    #[test]
    fn test_constant_transform_cannot_be_corrected() {
        let (mut reg, mut graph) = registry_with_x();
        let err = reg
            .declare(
                &mut graph,
                TransformDecl::scalar("c", Expr::Const(3.0)).correct(Direction::Backward),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::NonSquareJacobian { inputs: 0, .. }
        ));
    }

    #[test]
    fn test_records_are_ordered_and_own_their_nodes() {
        let (mut reg, mut graph) = registry_with_x();
        let r0 = reg
            .declare(&mut graph, TransformDecl::scalar("y", var("x").exp()))
            .unwrap();
        let r1 = reg
            .declare(&mut graph, TransformDecl::scalar("z", var("y")))
            .unwrap();
        let (a, b) = (&reg.record(r0).nodes, &reg.record(r1).nodes);
        assert!(a.end <= b.start);
        assert!(!b.is_empty());
        let z = reg.lookup("z").unwrap();
        assert!(b.contains(&reg.variable(z).node.0));
        assert_eq!(reg.record(r1).inputs, vec![reg.lookup("y").unwrap()]);
    }
}
