//! Parameter supports and the bijections that map them onto the real line.
//!
//! A parameter declared with a bounded support is sampled on `(-inf, inf)`
//! as a raw value `r` and mapped back with `x = g(r)`. The log-Jacobian
//! `log|g'(r)|` of that map is what keeps a flat prior on `x` flat after the
//! change of variables:
//!
//! | support          | `x = g(r)`                      | `log|g'(r)|`                     |
//! |------------------|---------------------------------|----------------------------------|
//! | real             | `r`                             | `0`                              |
//! | `x > lower`      | `lower + exp(r)`                | `r`                              |
//! | `x < upper`      | `upper - exp(r)`                | `r`                              |
//! | `lower < x < upper` | `lower + (upper-lower)·σ(r)` | `log(upper-lower) + log σ(r) + log(1-σ(r))` |

use crate::error::DeclarationError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Support {
    #[default]
    Real,
    LowerBounded(f64),
    UpperBounded(f64),
    Interval(f64, f64),
}

/// A raw value mapped into the support, with the pieces the gradient needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constrained {
    pub value: f64,
    /// `log|dx/dr|`
    pub log_jacobian: f64,
    /// `dx/dr`
    pub dvalue: f64,
    /// `d log|dx/dr| / dr`
    pub dlog_jacobian: f64,
}

impl Support {
    pub(crate) fn validate(self, name: &str) -> Result<(), DeclarationError> {
        let invalid = |reason| DeclarationError::InvalidSupport {
            name: name.to_string(),
            reason,
        };
        match self {
            Support::Real => Ok(()),
            Support::LowerBounded(b) | Support::UpperBounded(b) if !b.is_finite() => {
                Err(invalid("bound must be finite"))
            }
            Support::Interval(lo, hi) if !(lo.is_finite() && hi.is_finite()) => {
                Err(invalid("bounds must be finite"))
            }
            Support::Interval(lo, hi) if lo >= hi => Err(invalid("lower bound must be below upper bound")),
            _ => Ok(()),
        }
    }

    /// Whether `x` lies in the support. Bounds are open: a flat prior on the
    /// boundary itself is never reached by the bijection.
    pub fn contains(self, x: f64) -> bool {
        if !x.is_finite() {
            return false;
        }
        match self {
            Support::Real => true,
            Support::LowerBounded(lo) => x > lo,
            Support::UpperBounded(hi) => x < hi,
            Support::Interval(lo, hi) => x > lo && x < hi,
        }
    }

    /// Map a raw real value into the support.
    pub fn constrain(self, raw: f64) -> Constrained {
        match self {
            Support::Real => Constrained {
                value: raw,
                log_jacobian: 0.0,
                dvalue: 1.0,
                dlog_jacobian: 0.0,
            },
            Support::LowerBounded(lo) => {
                let e = raw.exp();
                Constrained {
                    value: lo + e,
                    log_jacobian: raw,
                    dvalue: e,
                    dlog_jacobian: 1.0,
                }
            }
            Support::UpperBounded(hi) => {
                let e = raw.exp();
                Constrained {
                    value: hi - e,
                    log_jacobian: raw,
                    dvalue: -e,
                    dlog_jacobian: 1.0,
                }
            }
            Support::Interval(lo, hi) => {
                let width = hi - lo;
                // 1 - σ(r) = σ(-r), computed directly so neither side cancels.
                let (s, rest) = (sigmoid(raw), sigmoid(-raw));
                Constrained {
                    value: if raw > 0.0 {
                        hi - width * rest
                    } else {
                        lo + width * s
                    },
                    // log σ(r) + log(1-σ(r)) = -softplus(-r) - softplus(r)
                    log_jacobian: width.ln() - softplus(-raw) - softplus(raw),
                    dvalue: width * s * rest,
                    dlog_jacobian: rest - s,
                }
            }
        }
    }

    /// Inverse of [`Support::constrain`]. Returns `None` outside the support.
    pub fn unconstrain(self, x: f64) -> Option<f64> {
        if !self.contains(x) {
            return None;
        }
        let raw = match self {
            Support::Real => x,
            Support::LowerBounded(lo) => (x - lo).ln(),
            Support::UpperBounded(hi) => (hi - x).ln(),
            Support::Interval(lo, hi) => {
                let u = (x - lo) / (hi - lo);
                u.ln() - (-u).ln_1p()
            }
        };
        Some(raw)
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTS: [Support; 4] = [
        Support::Real,
        Support::LowerBounded(1.5),
        Support::UpperBounded(-2.0),
        Support::Interval(-1.0, 3.0),
    ];

    #[test]
    fn test_constrain_lands_in_support() {
        for support in SUPPORTS {
            for raw in [-30.0, -2.0, 0.0, 0.7, 15.0] {
                let c = support.constrain(raw);
                assert!(support.contains(c.value), "{support:?} raw={raw} -> {}", c.value);
            }
        }
    }

    #[test]
    fn test_unconstrain_inverts_constrain() {
        for support in SUPPORTS {
            for raw in [-3.0, -0.5, 0.0, 1.2, 4.0] {
                let x = support.constrain(raw).value;
                let back = support.unconstrain(x).unwrap();
                assert!((back - raw).abs() < 1e-9, "{support:?}: {raw} -> {x} -> {back}");
            }
        }
    }

    #[test]
    fn test_log_jacobian_matches_numeric_derivative() {
        let h = 1e-6;
        for support in SUPPORTS {
            for raw in [-1.3, 0.0, 0.8] {
                let c = support.constrain(raw);
                let fd = (support.constrain(raw + h).value - support.constrain(raw - h).value)
                    / (2.0 * h);
                assert!((c.dvalue - fd).abs() < 1e-6);
                assert!((c.log_jacobian - fd.abs().ln()).abs() < 1e-6);

                let fd_lj = (support.constrain(raw + h).log_jacobian
                    - support.constrain(raw - h).log_jacobian)
                    / (2.0 * h);
                assert!((c.dlog_jacobian - fd_lj).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_invalid_interval_rejected() {
        assert!(Support::Interval(2.0, 1.0).validate("p").is_err());
        assert!(Support::LowerBounded(f64::NAN).validate("p").is_err());
        assert!(Support::Interval(0.0, 1.0).validate("p").is_ok());
    }
}
