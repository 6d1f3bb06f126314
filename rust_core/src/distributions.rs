use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use statrs::function::gamma::{digamma, ln_gamma};

use crate::error::{DeclarationError, OpFault};

/// Distribution families usable in density statements. Each family knows its
/// log-density and the partial derivatives of that log-density with respect
/// to the variate and every distribution parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// `Normal(mu, sigma)`
    Normal,
    /// `LogNormal(mu, sigma)`, support `x > 0`.
    LogNormal,
    /// `HalfNormal(sigma)`, support `x >= 0`.
    HalfNormal,
    /// `StudentT(nu, mu, sigma)`
    StudentT,
    /// `Cauchy(location, scale)`
    Cauchy,
    /// `Exponential(rate)`, support `x >= 0`.
    Exponential,
    /// `Gamma(shape, rate)`, support `x > 0`.
    Gamma,
    /// `Beta(alpha, beta)`, support `0 < x < 1`.
    Beta,
    /// `Uniform(lower, upper)`, support `lower <= x <= upper`.
    Uniform,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Normal => "normal",
            Family::LogNormal => "lognormal",
            Family::HalfNormal => "halfnormal",
            Family::StudentT => "student_t",
            Family::Cauchy => "cauchy",
            Family::Exponential => "exponential",
            Family::Gamma => "gamma",
            Family::Beta => "beta",
            Family::Uniform => "uniform",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Family::HalfNormal | Family::Exponential => 1,
            Family::StudentT => 3,
            _ => 2,
        }
    }

    pub(crate) fn check_arity(self, found: usize) -> Result<(), DeclarationError> {
        if found == self.arity() {
            Ok(())
        } else {
            Err(DeclarationError::DistributionArity {
                family: self.name(),
                expected: self.arity(),
                found,
            })
        }
    }

    /// Log-density of `x` given parameters `p`. Invalid parameters or a
    /// variate outside the support are domain faults.
    pub(crate) fn log_pdf(self, x: f64, p: &[f64]) -> Result<f64, OpFault> {
        self.validate(x, p)?;
        let lp = match self {
            Family::Normal => {
                let z = (x - p[0]) / p[1];
                -0.5 * z * z - p[1].ln() - 0.5 * TAU.ln()
            }
            Family::LogNormal => {
                let z = (x.ln() - p[0]) / p[1];
                -0.5 * z * z - p[1].ln() - 0.5 * TAU.ln() - x.ln()
            }
            Family::HalfNormal => {
                let s = p[0];
                0.5 * (2.0 / PI).ln() - s.ln() - x * x / (2.0 * s * s)
            }
            Family::StudentT => {
                let (nu, s) = (p[0], p[2]);
                let z = (x - p[1]) / s;
                ln_gamma(0.5 * (nu + 1.0)) - ln_gamma(0.5 * nu) - 0.5 * (nu * PI).ln() - s.ln()
                    - 0.5 * (nu + 1.0) * (z * z / nu).ln_1p()
            }
            Family::Cauchy => {
                let s = p[1];
                let z = (x - p[0]) / s;
                -PI.ln() - s.ln() - (z * z).ln_1p()
            }
            Family::Exponential => p[0].ln() - p[0] * x,
            Family::Gamma => {
                let (a, b) = (p[0], p[1]);
                a * b.ln() - ln_gamma(a) + (a - 1.0) * x.ln() - b * x
            }
            Family::Beta => {
                let (a, b) = (p[0], p[1]);
                (a - 1.0) * x.ln() + (b - 1.0) * (-x).ln_1p() - ln_beta(a, b)
            }
            Family::Uniform => -(p[1] - p[0]).ln(),
        };
        Ok(lp)
    }

    /// Partial derivatives of the log-density. Writes `d/dp_i` into
    /// `d_params` and returns `d/dx`. Assumes `log_pdf` succeeded at the same
    /// arguments.
    pub(crate) fn partials(self, x: f64, p: &[f64], d_params: &mut [f64]) -> f64 {
        match self {
            Family::Normal => {
                let s = p[1];
                let z = (x - p[0]) / s;
                d_params[0] = z / s;
                d_params[1] = (z * z - 1.0) / s;
                -z / s
            }
            Family::LogNormal => {
                let s = p[1];
                let z = (x.ln() - p[0]) / s;
                d_params[0] = z / s;
                d_params[1] = (z * z - 1.0) / s;
                (-z / s - 1.0) / x
            }
            Family::HalfNormal => {
                let s = p[0];
                d_params[0] = -1.0 / s + x * x / (s * s * s);
                -x / (s * s)
            }
            Family::StudentT => {
                let (nu, s) = (p[0], p[2]);
                let z = (x - p[1]) / s;
                let z2 = z * z;
                let dz = -(nu + 1.0) * z / (nu + z2);
                d_params[0] = 0.5 * digamma(0.5 * (nu + 1.0))
                    - 0.5 * digamma(0.5 * nu)
                    - 0.5 / nu
                    - 0.5 * (z2 / nu).ln_1p()
                    + (nu + 1.0) * z2 / (2.0 * nu * (nu + z2));
                d_params[1] = -dz / s;
                d_params[2] = -1.0 / s - dz * z / s;
                dz / s
            }
            Family::Cauchy => {
                let s = p[1];
                let z = (x - p[0]) / s;
                let dz = -2.0 * z / (1.0 + z * z);
                d_params[0] = -dz / s;
                d_params[1] = -1.0 / s - dz * z / s;
                dz / s
            }
            Family::Exponential => {
                d_params[0] = 1.0 / p[0] - x;
                -p[0]
            }
            Family::Gamma => {
                let (a, b) = (p[0], p[1]);
                d_params[0] = b.ln() - digamma(a) + x.ln();
                d_params[1] = a / b - x;
                (a - 1.0) / x - b
            }
            Family::Beta => {
                let (a, b) = (p[0], p[1]);
                let dab = digamma(a + b);
                d_params[0] = x.ln() - digamma(a) + dab;
                d_params[1] = (-x).ln_1p() - digamma(b) + dab;
                (a - 1.0) / x - (b - 1.0) / (1.0 - x)
            }
            Family::Uniform => {
                let width = p[1] - p[0];
                d_params[0] = 1.0 / width;
                d_params[1] = -1.0 / width;
                0.0
            }
        }
    }

    fn validate(self, x: f64, p: &[f64]) -> Result<(), OpFault> {
        if !x.is_finite() || p.iter().any(|v| !v.is_finite()) {
            return Err(OpFault::Domain(format!(
                "{} evaluated at non-finite arguments",
                self.name()
            )));
        }
        let positive = |v: f64, what: &str| {
            if v > 0.0 {
                Ok(())
            } else {
                Err(OpFault::Domain(format!(
                    "{} {what} must be positive, got {v}",
                    self.name()
                )))
            }
        };
        let outside = || {
            OpFault::Domain(format!(
                "{x} is outside the support of {}",
                self.name()
            ))
        };
        match self {
            Family::Normal | Family::LogNormal | Family::Cauchy => positive(p[1], "scale")?,
            Family::HalfNormal => positive(p[0], "scale")?,
            Family::StudentT => {
                positive(p[0], "degrees of freedom")?;
                positive(p[2], "scale")?;
            }
            Family::Exponential => positive(p[0], "rate")?,
            Family::Gamma => {
                positive(p[0], "shape")?;
                positive(p[1], "rate")?;
            }
            Family::Beta => {
                positive(p[0], "alpha")?;
                positive(p[1], "beta")?;
            }
            Family::Uniform => {
                if p[0] >= p[1] {
                    return Err(OpFault::Domain(format!(
                        "uniform bounds must satisfy lower < upper, got [{}, {}]",
                        p[0], p[1]
                    )));
                }
            }
        }
        let in_support = match self {
            Family::LogNormal | Family::Gamma => x > 0.0,
            Family::HalfNormal | Family::Exponential => x >= 0.0,
            Family::Beta => x > 0.0 && x < 1.0,
            Family::Uniform => x >= p[0] && x <= p[1],
            _ => true,
        };
        if in_support {
            Ok(())
        } else {
            Err(outside())
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let family = match s.to_ascii_lowercase().as_str() {
            "normal" | "gaussian" => Family::Normal,
            "lognormal" => Family::LogNormal,
            "halfnormal" | "half_normal" => Family::HalfNormal,
            "student_t" | "studentt" => Family::StudentT,
            "cauchy" => Family::Cauchy,
            "exponential" => Family::Exponential,
            "gamma" => Family::Gamma,
            "beta" => Family::Beta,
            "uniform" => Family::Uniform,
            _ => {
                return Err(DeclarationError::UnknownFamily {
                    name: s.to_string(),
                })
            }
        };
        Ok(family)
    }
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Family; 9] = [
        Family::Normal,
        Family::LogNormal,
        Family::HalfNormal,
        Family::StudentT,
        Family::Cauchy,
        Family::Exponential,
        Family::Gamma,
        Family::Beta,
        Family::Uniform,
    ];

    fn sample_args(family: Family) -> (f64, Vec<f64>) {
        match family {
            Family::Normal => (0.7, vec![0.2, 1.3]),
            Family::LogNormal => (1.8, vec![0.1, 0.6]),
            Family::HalfNormal => (0.9, vec![1.4]),
            Family::StudentT => (-0.4, vec![4.5, 0.3, 1.2]),
            Family::Cauchy => (2.1, vec![0.5, 0.8]),
            Family::Exponential => (0.6, vec![2.0]),
            Family::Gamma => (1.7, vec![2.5, 1.5]),
            Family::Beta => (0.35, vec![2.0, 3.5]),
            Family::Uniform => (0.4, vec![-1.0, 2.0]),
        }
    }

    #[test]
    fn test_standard_normal_at_zero() {
        let lp = Family::Normal.log_pdf(0.0, &[0.0, 1.0]).unwrap();
        assert!((lp - (-0.5 * TAU.ln())).abs() < 1e-12);
    }

    #[test]
    fn test_gamma_matches_exponential_when_shape_is_one() {
        let g = Family::Gamma.log_pdf(1.3, &[1.0, 2.0]).unwrap();
        let e = Family::Exponential.log_pdf(1.3, &[2.0]).unwrap();
        assert!((g - e).abs() < 1e-12);
    }

    #[test]
    fn test_partials_match_central_differences() {
        let h = 1e-6;
        for family in ALL {
            let (x, p) = sample_args(family);
            let mut analytic = vec![0.0; p.len()];
            let dx = family.partials(x, &p, &mut analytic);

            let fd_x = (family.log_pdf(x + h, &p).unwrap() - family.log_pdf(x - h, &p).unwrap())
                / (2.0 * h);
            assert!((dx - fd_x).abs() < 1e-5, "{family} d/dx: {dx} vs {fd_x}");

            for i in 0..p.len() {
                let mut hi = p.clone();
                let mut lo = p.clone();
                hi[i] += h;
                lo[i] -= h;
                let fd = (family.log_pdf(x, &hi).unwrap() - family.log_pdf(x, &lo).unwrap())
                    / (2.0 * h);
                assert!(
                    (analytic[i] - fd).abs() < 1e-5,
                    "{family} d/dp{i}: {} vs {fd}",
                    analytic[i]
                );
            }
        }
    }

    #[test]
    fn test_out_of_support_is_domain_fault() {
        assert!(matches!(
            Family::Exponential.log_pdf(-0.1, &[1.0]),
            Err(OpFault::Domain(_))
        ));
        assert!(matches!(
            Family::Normal.log_pdf(0.0, &[0.0, 0.0]),
            Err(OpFault::Domain(_))
        ));
    }

    #[test]
    fn test_parse_family_names() {
        assert_eq!("Normal".parse::<Family>().unwrap(), Family::Normal);
        assert_eq!("student_t".parse::<Family>().unwrap(), Family::StudentT);
        assert!("weibull".parse::<Family>().is_err());
    }
}
