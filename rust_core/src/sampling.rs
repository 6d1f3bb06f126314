//! The surface a gradient-based sampler sees.
//!
//! Samplers work in unconstrained coordinates and only need a log-density,
//! its gradient and somewhere finite to start. Everything here is built on
//! [`Model`] and never mutates it, so one model can feed any number of
//! chains at once.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{EvalError, SamplingError};
use crate::model::{EvalOptions, Evaluation, Model, Space};

/// Log-density over unconstrained coordinates with gradient.
pub trait LogDensityModel: Send + Sync {
    fn dim(&self) -> usize;

    fn param_names(&self) -> Vec<String>;

    /// Write the gradient into `grad` and return the log-density at
    /// `position`. A point the model cannot be evaluated at has density zero:
    /// `-inf` with a zero gradient.
    fn logp_and_grad(&self, position: &[f64], grad: &mut [f64]) -> f64;

    /// Draw a starting position.
    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]);
}

impl LogDensityModel for Model {
    fn dim(&self) -> usize {
        Model::dim(self)
    }

    fn param_names(&self) -> Vec<String> {
        Model::param_names(self)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn logp_and_grad(&self, position: &[f64], grad: &mut [f64]) -> f64 {
        match self.log_density_and_gradient(position, Space::Unconstrained, grad) {
            Ok(lp) => lp,
            Err(err) => {
                debug!(error = %err, "logp evaluation failed");
                grad.iter_mut().for_each(|g| *g = 0.0);
                f64::NEG_INFINITY
            }
        }
    }

    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) {
        init_uniform(rng, InitConfig::default().radius, position);
    }
}

fn init_uniform<R: Rng + ?Sized>(rng: &mut R, radius: f64, position: &mut [f64]) {
    if !(radius.is_finite() && radius > 0.0) {
        position.iter_mut().for_each(|p| *p = 0.0);
        return;
    }
    let dist = Uniform::new(-radius, radius);
    for p in position.iter_mut() {
        *p = dist.sample(rng);
    }
}

/// Initial point search.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Raw values are drawn uniformly from `(-radius, radius)`.
    pub radius: f64,
    pub max_attempts: usize,
    pub seed: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            radius: 2.0,
            max_attempts: 100,
            seed: 42,
        }
    }
}

/// Draw unconstrained points until one has a finite log-density and
/// gradient.
pub fn find_initial_point<M: LogDensityModel>(
    model: &M,
    config: &InitConfig,
) -> Result<Vec<f64>, SamplingError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    search(model, config, &mut rng)
}

/// One initial point per chain. Chain `i` searches with seed
/// `config.seed + i` (wrapping), so the result does not depend on thread
/// scheduling.
pub fn find_initial_points<M: LogDensityModel>(
    model: &M,
    num_chains: usize,
    config: &InitConfig,
) -> Result<Vec<Vec<f64>>, SamplingError> {
    (0..num_chains)
        .into_par_iter()
        .map(|chain| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(chain as u64));
            search(model, config, &mut rng)
        })
        .collect()
}

fn search<M: LogDensityModel>(
    model: &M,
    config: &InitConfig,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<f64>, SamplingError> {
    let dim = model.dim();
    let mut position = vec![0.0; dim];
    let mut grad = vec![0.0; dim];
    for attempt in 1..=config.max_attempts {
        init_uniform(rng, config.radius, &mut position);
        let lp = model.logp_and_grad(&position, &mut grad);
        if lp.is_finite() && grad.iter().all(|g| g.is_finite()) {
            debug!(attempt, logp = lp, "found initial point");
            return Ok(position);
        }
    }
    Err(SamplingError::NoFiniteInitialPoint {
        attempts: config.max_attempts,
    })
}

// ── Batch evaluation ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
}

fn with_pool<T, F>(config: &BatchConfig, work: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    if config.num_threads == 0 {
        return work();
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()
    {
        Ok(pool) => pool.install(work),
        Err(err) => {
            warn!(error = %err, "failed to build thread pool, using the global pool");
            work()
        }
    }
}

/// Evaluate many constrained points in parallel. Results are in input order.
pub fn evaluate_batch<P>(
    model: &Model,
    points: &[P],
    options: EvalOptions,
    config: &BatchConfig,
) -> Vec<Result<Evaluation, EvalError>>
where
    P: AsRef<[f64]> + Sync,
{
    with_pool(config, || {
        points
            .par_iter()
            .map(|p| model.evaluate_with(p.as_ref(), Space::Constrained, options))
            .collect()
    })
}

/// Log-density of many constrained points in parallel; `-inf` for points
/// that fail to evaluate.
pub fn log_density_batch<P>(model: &Model, points: &[P], config: &BatchConfig) -> Vec<f64>
where
    P: AsRef<[f64]> + Sync,
{
    with_pool(config, || {
        points
            .par_iter()
            .map(|p| model.log_density(p.as_ref()))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Family;
    use crate::expr::var;
    use crate::model::ModelBuilder;
    use crate::support::Support;

    fn bounded_model() -> Model {
        let mut b = ModelBuilder::new();
        b.declare_parameter("mu", Support::Real).unwrap();
        b.declare_parameter("sigma", Support::LowerBounded(0.0))
            .unwrap();
        b.add_density("mu", Family::Normal, [0.0, 5.0]).unwrap();
        b.add_density("sigma", Family::HalfNormal, [1.0]).unwrap();
        b.build()
    }

    #[test]
    fn test_initial_point_is_finite_and_reproducible() {
        let model = bounded_model();
        let config = InitConfig::default();
        let a = find_initial_point(&model, &config).unwrap();
        let b = find_initial_point(&model, &config).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() < config.radius));
    }

    #[test]
    fn test_initial_points_per_chain_differ() {
        let model = bounded_model();
        let points = find_initial_points(&model, 4, &InitConfig::default()).unwrap();
        assert_eq!(points.len(), 4);
        assert_ne!(points[0], points[1]);
    }

    #[test]
    fn test_chain_seeds_wrap_at_u64_max() {
        let model = bounded_model();
        let config = InitConfig {
            seed: u64::MAX,
            ..InitConfig::default()
        };
        let points = find_initial_points(&model, 2, &config).unwrap();
        // Chain 1 wraps around to seed 0.
        let zero = find_initial_point(
            &model,
            &InitConfig {
                seed: 0,
                ..InitConfig::default()
            },
        )
        .unwrap();
        assert_eq!(points[1], zero);
    }

    #[test]
    fn test_no_finite_initial_point() {
        // log(mu - 100) is undefined everywhere the search looks.
        let mut b = ModelBuilder::new();
        b.declare_parameter("mu", Support::Real).unwrap();
        b.declare_derived("y", (var("mu") - 100.0).ln(), true)
            .unwrap();
        let model = b.build();
        let config = InitConfig {
            max_attempts: 5,
            ..InitConfig::default()
        };
        let err = find_initial_point(&model, &config).unwrap_err();
        assert!(matches!(
            err,
            SamplingError::NoFiniteInitialPoint { attempts: 5 }
        ));
    }

    #[test]
    fn test_logp_and_grad_zeroes_gradient_on_failure() {
        let mut b = ModelBuilder::new();
        b.declare_parameter("x", Support::Real).unwrap();
        b.declare_derived("y", var("x").square(), true).unwrap();
        let model = b.build();
        let mut grad = vec![7.0];
        let lp = model.logp_and_grad(&[0.0], &mut grad);
        assert_eq!(lp, f64::NEG_INFINITY);
        assert_eq!(grad, vec![0.0]);
    }

    #[test]
    fn test_batch_matches_sequential() {
        let model = bounded_model();
        let points: Vec<Vec<f64>> = (0..64)
            .map(|i| vec![i as f64 * 0.1 - 3.0, 0.05 + i as f64 * 0.02])
            .collect();
        let config = BatchConfig { num_threads: 2 };
        let batch = log_density_batch(&model, &points, &config);
        for (p, lp) in points.iter().zip(&batch) {
            assert_eq!(*lp, model.log_density(p));
        }

        let evals = evaluate_batch(&model, &points, EvalOptions::default(), &config);
        for (p, e) in points.iter().zip(evals) {
            assert_eq!(e.unwrap().log_density, model.log_density(p));
        }
    }

    #[test]
    fn test_batch_marks_failures_as_neg_infinity() {
        let model = bounded_model();
        let points = [[0.0, 1.0], [0.0, -1.0]];
        let batch = log_density_batch(&model, &points, &BatchConfig::default());
        assert!(batch[0].is_finite());
        assert_eq!(batch[1], f64::NEG_INFINITY);
    }
}
