use std::ops::Range;

use crate::corrector;
use crate::error::OpFault;
use crate::graph::{Graph, NodeId, Op};

/// Evaluate a single node given the values of every earlier node.
pub(crate) fn eval_node(op: &Op, values: &[f64], params: &[f64]) -> Result<f64, OpFault> {
    let v = |id: &NodeId| values[id.0];
    let out = match op {
        Op::Param(idx) => params[*idx],
        Op::Constant(c) => *c,
        Op::Add(a, b) => v(a) + v(b),
        Op::Sub(a, b) => v(a) - v(b),
        Op::Mul(a, b) => v(a) * v(b),
        Op::Div(a, b) => {
            if v(b) == 0.0 {
                return Err(OpFault::Domain("division by zero".to_string()));
            }
            v(a) / v(b)
        }
        Op::Neg(a) => -v(a),
        Op::Exp(a) => v(a).exp(),
        Op::Log(a) => {
            if v(a) <= 0.0 {
                return Err(OpFault::Domain(format!("log of non-positive value {}", v(a))));
            }
            v(a).ln()
        }
        Op::Square(a) => v(a) * v(a),
        Op::Sqrt(a) => {
            if v(a) < 0.0 {
                return Err(OpFault::Domain(format!("sqrt of negative value {}", v(a))));
            }
            v(a).sqrt()
        }
        Op::Powf(a, p) => {
            let base = v(a);
            if base < 0.0 && p.fract() != 0.0 {
                return Err(OpFault::Domain(format!(
                    "non-integer power {p} of negative value {base}"
                )));
            }
            if base == 0.0 && *p < 0.0 {
                return Err(OpFault::Domain(format!("negative power {p} of zero")));
            }
            base.powf(*p)
        }
        Op::Sigmoid(a) => sigmoid(v(a)),
        Op::Tanh(a) => v(a).tanh(),
        Op::Sin(a) => v(a).sin(),
        Op::Cos(a) => v(a).cos(),
        Op::LogAbs(d) => corrector::log_abs_derivative(v(d))?,
        Op::LogAbsDet { entries, dim } => {
            let j: Vec<f64> = entries.iter().map(v).collect();
            corrector::log_abs_det(&j, *dim)?
        }
        Op::LogDensity { family, x, params } => {
            let p: Vec<f64> = params.iter().map(v).collect();
            family.log_pdf(v(x), &p)?
        }
    };
    if out.is_finite() {
        Ok(out)
    } else {
        Err(OpFault::Domain(format!("non-finite result ({out})")))
    }
}

/// Forward-evaluate the nodes in `range`, writing into `values`. Every node
/// before `range.start` must already hold its value.
pub(crate) fn forward_range(
    graph: &Graph,
    range: Range<usize>,
    values: &mut [f64],
    params: &[f64],
) -> Result<(), OpFault> {
    for idx in range {
        let v = eval_node(&graph.nodes[idx].op, values, params)?;
        values[idx] = v;
    }
    Ok(())
}

/// Forward-evaluate every node in the graph and return the per-node values.
#[cfg(test)]
pub(crate) fn forward(graph: &Graph, params: &[f64]) -> Result<Vec<f64>, OpFault> {
    let mut values = vec![0.0; graph.len()];
    forward_range(graph, 0..graph.len(), &mut values, params)?;
    Ok(values)
}

// ── Staged forward mode ─────────────────────────────────────────────

/// Tangent of a node with respect to one seeded input. Zero and one are
/// kept symbolic so staging does not flood the graph with trivial nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Tangent {
    Zero,
    One,
    Node(NodeId),
}

fn materialize(graph: &mut Graph, t: Tangent) -> NodeId {
    match t {
        Tangent::Zero => graph.add_constant(0.0),
        Tangent::One => graph.add_constant(1.0),
        Tangent::Node(n) => n,
    }
}

fn t_add(graph: &mut Graph, a: Tangent, b: Tangent) -> Tangent {
    match (a, b) {
        (Tangent::Zero, t) | (t, Tangent::Zero) => t,
        _ => {
            let (na, nb) = (materialize(graph, a), materialize(graph, b));
            Tangent::Node(graph.add(na, nb))
        }
    }
}

fn t_neg(graph: &mut Graph, a: Tangent) -> Tangent {
    match a {
        Tangent::Zero => Tangent::Zero,
        _ => {
            let na = materialize(graph, a);
            Tangent::Node(graph.neg(na))
        }
    }
}

fn t_sub(graph: &mut Graph, a: Tangent, b: Tangent) -> Tangent {
    match (a, b) {
        (t, Tangent::Zero) => t,
        (Tangent::Zero, t) => t_neg(graph, t),
        _ => {
            let (na, nb) = (materialize(graph, a), materialize(graph, b));
            Tangent::Node(graph.sub(na, nb))
        }
    }
}

/// `t * factor`, building the factor only when the tangent is nonzero.
fn t_scale<F>(graph: &mut Graph, t: Tangent, factor: F) -> Tangent
where
    F: FnOnce(&mut Graph) -> NodeId,
{
    match t {
        Tangent::Zero => Tangent::Zero,
        Tangent::One => Tangent::Node(factor(graph)),
        Tangent::Node(n) => {
            let f = factor(graph);
            Tangent::Node(graph.mul(n, f))
        }
    }
}

/// `t / divisor`, building the divisor only when the tangent is nonzero.
fn t_div<F>(graph: &mut Graph, t: Tangent, divisor: F) -> Tangent
where
    F: FnOnce(&mut Graph) -> NodeId,
{
    match t {
        Tangent::Zero => Tangent::Zero,
        _ => {
            let n = materialize(graph, t);
            let d = divisor(graph);
            Tangent::Node(graph.div(n, d))
        }
    }
}

/// Stage forward-mode derivatives of `outputs` with respect to `inputs`
/// as new graph nodes. `nodes` is the range the outputs' expressions were
/// lowered into; anything outside it is a leaf, so the derivative is local:
/// it treats every referenced variable other than the seeded input as fixed.
///
/// Returns the Jacobian as row-major entries `J[i][j] = d out_i / d in_j`.
pub(crate) fn stage_jacobian(
    graph: &mut Graph,
    nodes: Range<usize>,
    outputs: &[NodeId],
    inputs: &[NodeId],
) -> Vec<NodeId> {
    let k_out = outputs.len();
    let k_in = inputs.len();
    let mut entries = vec![NodeId(0); k_out * k_in];

    for (j, &input) in inputs.iter().enumerate() {
        let mut tangents = vec![Tangent::Zero; nodes.len()];
        let lookup = |tangents: &[Tangent], id: NodeId| {
            if nodes.contains(&id.0) {
                tangents[id.0 - nodes.start]
            } else if id == input {
                Tangent::One
            } else {
                Tangent::Zero
            }
        };

        for idx in nodes.clone() {
            let out = NodeId(idx);
            let op = graph.nodes[idx].op.clone();
            let t = match op {
                Op::Add(a, b) => {
                    let (ta, tb) = (lookup(&tangents, a), lookup(&tangents, b));
                    t_add(graph, ta, tb)
                }
                Op::Sub(a, b) => {
                    let (ta, tb) = (lookup(&tangents, a), lookup(&tangents, b));
                    t_sub(graph, ta, tb)
                }
                Op::Mul(a, b) => {
                    let (ta, tb) = (lookup(&tangents, a), lookup(&tangents, b));
                    let left = t_scale(graph, ta, |_| b);
                    let right = t_scale(graph, tb, |_| a);
                    t_add(graph, left, right)
                }
                Op::Div(a, b) => {
                    // d(a/b) = (da - out * db) / b
                    let (ta, tb) = (lookup(&tangents, a), lookup(&tangents, b));
                    let scaled = t_scale(graph, tb, |_| out);
                    let num = t_sub(graph, ta, scaled);
                    t_div(graph, num, |_| b)
                }
                Op::Neg(a) => {
                    let ta = lookup(&tangents, a);
                    t_neg(graph, ta)
                }
                Op::Exp(a) => t_scale(graph, lookup(&tangents, a), |_| out),
                Op::Log(a) => t_div(graph, lookup(&tangents, a), |_| a),
                Op::Square(a) => t_scale(graph, lookup(&tangents, a), |g| {
                    let two = g.add_constant(2.0);
                    g.mul(two, a)
                }),
                Op::Sqrt(a) => t_div(graph, lookup(&tangents, a), |g| {
                    let two = g.add_constant(2.0);
                    g.mul(two, out)
                }),
                Op::Powf(a, p) => t_scale(graph, lookup(&tangents, a), |g| {
                    let coeff = g.add_constant(p);
                    let lowered = g.powf(a, p - 1.0);
                    g.mul(coeff, lowered)
                }),
                // σ'(a) = σ(a)·σ(-a); `1 - σ(a)` rounds to zero for large a.
                Op::Sigmoid(a) => t_scale(graph, lookup(&tangents, a), |g| {
                    let neg = g.neg(a);
                    let rest = g.sigmoid(neg);
                    g.mul(out, rest)
                }),
                // tanh'(a) = 4·σ(2a)·σ(-2a)
                Op::Tanh(a) => t_scale(graph, lookup(&tangents, a), |g| {
                    let two = g.add_constant(2.0);
                    let twice = g.mul(two, a);
                    let neg = g.neg(twice);
                    let (s, rest) = (g.sigmoid(twice), g.sigmoid(neg));
                    let four = g.add_constant(4.0);
                    let prod = g.mul(s, rest);
                    g.mul(four, prod)
                }),
                Op::Sin(a) => t_scale(graph, lookup(&tangents, a), |g| g.cos(a)),
                Op::Cos(a) => t_scale(graph, lookup(&tangents, a), |g| {
                    let s = g.sin(a);
                    g.neg(s)
                }),
                Op::Param(_)
                | Op::Constant(_)
                | Op::LogAbs(_)
                | Op::LogAbsDet { .. }
                | Op::LogDensity { .. } => Tangent::Zero,
            };
            tangents[idx - nodes.start] = t;
        }

        for (i, &output) in outputs.iter().enumerate() {
            let t = lookup(&tangents, output);
            entries[i * k_in + j] = materialize(graph, t);
        }
    }

    entries
}

// ── Reverse mode ────────────────────────────────────────────────────

/// Reverse-mode autodiff over nodes `0..values.len()`: gradient of
/// `Σ weight · node` with respect to the parameters.
pub(crate) fn grad_logp(graph: &Graph, values: &[f64], seeds: &[(NodeId, f64)]) -> Vec<f64> {
    let n = values.len();
    let mut adj = vec![0.0f64; n];
    for &(id, weight) in seeds {
        adj[id.0] += weight;
    }

    let mut grad = vec![0.0; graph.param_count];
    let mut d_params: Vec<f64> = Vec::new();

    for node in graph.nodes[..n].iter().rev() {
        let idx = node.id.0;
        let a_s = adj[idx];
        if a_s == 0.0 {
            continue;
        }
        let out = values[idx];

        match &node.op {
            Op::Param(pidx) => grad[*pidx] += a_s,
            Op::Constant(_) => {}
            Op::Add(a, b) => {
                adj[a.0] += a_s;
                adj[b.0] += a_s;
            }
            Op::Sub(a, b) => {
                adj[a.0] += a_s;
                adj[b.0] -= a_s;
            }
            Op::Mul(a, b) => {
                let va = values[a.0];
                let vb = values[b.0];
                adj[a.0] += a_s * vb;
                adj[b.0] += a_s * va;
            }
            Op::Div(a, b) => {
                let va = values[a.0];
                let vb = values[b.0];
                adj[a.0] += a_s / vb;
                adj[b.0] -= a_s * va / (vb * vb);
            }
            Op::Neg(a) => adj[a.0] -= a_s,
            Op::Exp(a) => adj[a.0] += a_s * out,
            Op::Log(a) => adj[a.0] += a_s / values[a.0],
            Op::Square(a) => adj[a.0] += a_s * 2.0 * values[a.0],
            Op::Sqrt(a) => adj[a.0] += a_s * 0.5 / out,
            Op::Powf(a, p) => adj[a.0] += a_s * p * values[a.0].powf(p - 1.0),
            Op::Sigmoid(a) => adj[a.0] += a_s * out * sigmoid(-values[a.0]),
            Op::Tanh(a) => adj[a.0] += a_s * tanh_derivative(values[a.0]),
            Op::Sin(a) => adj[a.0] += a_s * values[a.0].cos(),
            Op::Cos(a) => adj[a.0] -= a_s * values[a.0].sin(),
            Op::LogAbs(d) => adj[d.0] += a_s / values[d.0],
            Op::LogAbsDet { entries, dim } => {
                let j: Vec<f64> = entries.iter().map(|e| values[e.0]).collect();
                if let Some(inv_t) = corrector::inverse_transpose(&j, *dim) {
                    for (e, w) in entries.iter().zip(inv_t) {
                        adj[e.0] += a_s * w;
                    }
                }
            }
            Op::LogDensity { family, x, params } => {
                let p: Vec<f64> = params.iter().map(|id| values[id.0]).collect();
                d_params.clear();
                d_params.resize(p.len(), 0.0);
                let dx = family.partials(values[x.0], &p, &mut d_params);
                adj[x.0] += a_s * dx;
                for (id, d) in params.iter().zip(&d_params) {
                    adj[id.0] += a_s * d;
                }
            }
        }
    }

    grad
}

fn tanh_derivative(x: f64) -> f64 {
    4.0 * sigmoid(2.0 * x) * sigmoid(-2.0 * x)
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
