use crate::distributions::Family;
use crate::error::DeclarationError;
use crate::expr::{Expr, UnaryFn};

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Operations supported in the computation graph.
#[derive(Debug, Clone)]
pub enum Op {
    /// A free parameter (index into the parameter vector).
    Param(usize),
    /// A constant scalar value baked into the graph.
    Constant(f64),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Div(NodeId, NodeId),
    Neg(NodeId),
    Exp(NodeId),
    Log(NodeId),
    Square(NodeId),
    Sqrt(NodeId),
    Powf(NodeId, f64),
    Sigmoid(NodeId),
    Tanh(NodeId),
    Sin(NodeId),
    Cos(NodeId),
    /// `log|d|` of a scalar transform derivative. Fails on `d == 0`.
    LogAbs(NodeId),
    /// `log|det J|` of a row-major `dim × dim` Jacobian.
    LogAbsDet { entries: Vec<NodeId>, dim: usize },
    /// Log-density of `x` under a distribution family.
    LogDensity {
        family: Family,
        x: NodeId,
        params: Vec<NodeId>,
    },
}

/// A single node in the computation graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
}

/// Arena of nodes in topological order: a node may only reference nodes that
/// were pushed before it, so the graph is acyclic by construction and a
/// single forward sweep evaluates it.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub param_count: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn op(&self, id: NodeId) -> &Op {
        &self.nodes[id.0].op
    }

    pub(crate) fn add_node(&mut self, op: Op) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { id, op });
        id
    }

    pub fn add_param(&mut self) -> NodeId {
        let idx = self.param_count;
        self.param_count += 1;
        self.add_node(Op::Param(idx))
    }

    pub fn add_constant(&mut self, value: f64) -> NodeId {
        self.add_node(Op::Constant(value))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Add(a, b))
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Sub(a, b))
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Mul(a, b))
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Div(a, b))
    }

    pub fn neg(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Neg(a))
    }

    pub fn exp(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Exp(a))
    }

    pub fn log(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Log(a))
    }

    pub fn square(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Square(a))
    }

    pub fn sqrt(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Sqrt(a))
    }

    pub fn powf(&mut self, a: NodeId, exponent: f64) -> NodeId {
        self.add_node(Op::Powf(a, exponent))
    }

    pub fn sigmoid(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Sigmoid(a))
    }

    pub fn tanh(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Tanh(a))
    }

    pub fn sin(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Sin(a))
    }

    pub fn cos(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Cos(a))
    }

    pub fn log_abs(&mut self, derivative: NodeId) -> NodeId {
        self.add_node(Op::LogAbs(derivative))
    }

    pub fn log_abs_det(&mut self, entries: Vec<NodeId>, dim: usize) -> NodeId {
        debug_assert_eq!(entries.len(), dim * dim);
        self.add_node(Op::LogAbsDet { entries, dim })
    }

    pub fn log_density(&mut self, family: Family, x: NodeId, params: Vec<NodeId>) -> NodeId {
        self.add_node(Op::LogDensity { family, x, params })
    }

    /// Lower an expression tree into nodes appended to the graph. Variable
    /// names are resolved through `resolve`, whose error is propagated as is.
    pub fn lower<F>(&mut self, expr: &Expr, resolve: &F) -> Result<NodeId, DeclarationError>
    where
        F: Fn(&str) -> Result<NodeId, DeclarationError>,
    {
        let id = match expr {
            Expr::Const(c) => self.add_constant(*c),
            Expr::Var(name) => resolve(name)?,
            Expr::Add(a, b) => {
                let (a, b) = (self.lower(a, resolve)?, self.lower(b, resolve)?);
                self.add(a, b)
            }
            Expr::Sub(a, b) => {
                let (a, b) = (self.lower(a, resolve)?, self.lower(b, resolve)?);
                self.sub(a, b)
            }
            Expr::Mul(a, b) => {
                let (a, b) = (self.lower(a, resolve)?, self.lower(b, resolve)?);
                self.mul(a, b)
            }
            Expr::Div(a, b) => {
                let (a, b) = (self.lower(a, resolve)?, self.lower(b, resolve)?);
                self.div(a, b)
            }
            Expr::Neg(a) => {
                let a = self.lower(a, resolve)?;
                self.neg(a)
            }
            Expr::Powf(a, p) => {
                let a = self.lower(a, resolve)?;
                self.powf(a, *p)
            }
            Expr::Unary(f, a) => {
                let a = self.lower(a, resolve)?;
                match f {
                    UnaryFn::Exp => self.exp(a),
                    UnaryFn::Ln => self.log(a),
                    UnaryFn::Square => self.square(a),
                    UnaryFn::Sqrt => self.sqrt(a),
                    UnaryFn::Sigmoid => self.sigmoid(a),
                    UnaryFn::Tanh => self.tanh(a),
                    UnaryFn::Sin => self.sin(a),
                    UnaryFn::Cos => self.cos(a),
                }
            }
        };
        Ok(id)
    }
}
