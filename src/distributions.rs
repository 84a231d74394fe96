/*!
Target densities, proposal kernels and full conditionals consumed by the samplers.

States are plain `&[f64]` slices. Targets may be evaluated up to an unknown normalizing
constant, and can be written either in density or log-density form: [`Target::density`] and
[`Target::log_density`] default to each other, so implement at least one of them.

Proposal kernels and conditionals never own a random number generator. The sampler hands in
the calling chain's generator, so parallel chains never share a random stream.

# Examples

```rust
use chainmix::distributions::{Gaussian, GaussianRandomWalk, Proposal, Target};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let target = Gaussian::new(vec![0.0, 0.0], 1.0).unwrap();
assert_eq!(target.log_density(&[0.0, 0.0]), 0.0);

let kernel = GaussianRandomWalk::new(0.5).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let candidate = kernel.sample(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
assert!(kernel.is_symmetric());
```
*/

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

use crate::error::{McmcError, Result};

/// A density proportional to the distribution we want to sample from.
///
/// Values must be non-negative (log-densities must not be NaN). Zero is allowed and
/// marks states outside the support.
pub trait Target {
    /// Unnormalized density at `theta`.
    fn density(&self, theta: &[f64]) -> f64 {
        self.log_density(theta).exp()
    }

    /// Log of the unnormalized density at `theta`. Negative infinity for zero density.
    fn log_density(&self, theta: &[f64]) -> f64 {
        self.density(theta).ln()
    }

    /// Number of parameters the target is defined over, if fixed. Samplers reject
    /// configurations whose initial states disagree with it.
    fn dim(&self) -> Option<usize> {
        None
    }
}

/// Generates candidate states for Metropolis-type samplers.
pub trait Proposal {
    /// Draws a candidate from q(· | current).
    fn sample<R: Rng>(&self, current: &[f64], rng: &mut R) -> Vec<f64>;

    /// Whether q(b | a) == q(a | b) for all states. Symmetric kernels contribute nothing
    /// to the acceptance ratio.
    fn is_symmetric(&self) -> bool;

    /// Evaluates log q(to | from).
    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64;

    /// Dimension of the candidates, if the kernel fixes it rather than following the
    /// current state.
    fn dim(&self) -> Option<usize> {
        None
    }
}

/// Exact full conditionals for Gibbs sampling.
pub trait Conditional {
    /// Draws component `i` from p(x_i | x_{-i}). `given` is the full current state; the
    /// value at index `i` must be ignored.
    fn sample<R: Rng>(&self, i: usize, given: &[f64], rng: &mut R) -> f64;

    /// Number of components with a conditional, if known. When set, it must equal the
    /// state dimension.
    fn n_components(&self) -> Option<usize> {
        None
    }
}

/// Wraps a closure returning an unnormalized density.
///
/// ```rust
/// use chainmix::distributions::{DensityFn, Target};
///
/// let flat = DensityFn(|_: &[f64]| 1.0);
/// assert_eq!(flat.density(&[3.0]), 1.0);
/// ```
#[derive(Clone, Copy)]
pub struct DensityFn<F>(pub F);

impl<F> Target for DensityFn<F>
where
    F: Fn(&[f64]) -> f64,
{
    fn density(&self, theta: &[f64]) -> f64 {
        (self.0)(theta)
    }
}

/// Isotropic Gaussian target with mean `mean` and per-coordinate standard deviation `std`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    pub mean: Vec<f64>,
    pub std: f64,
}

impl Gaussian {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] if `std` is not strictly positive and finite.
    pub fn new(mean: Vec<f64>, std: f64) -> Result<Self> {
        check_scale("std", std)?;
        Ok(Self { mean, std })
    }
}

impl Target for Gaussian {
    fn log_density(&self, theta: &[f64]) -> f64 {
        -0.5 * sq_dist(theta, &self.mean) / (self.std * self.std)
    }

    fn dim(&self) -> Option<usize> {
        Some(self.mean.len())
    }
}

/// Weighted mixture of isotropic Gaussians sharing one standard deviation.
///
/// With two well-separated means this is the textbook bimodal target on which
/// random-walk chains get stuck in whichever mode they start in.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub std: f64,
}

impl GaussianMixture {
    /// Weights are normalized to sum to one.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] on empty or mismatched components, non-positive
    /// weights or a degenerate `std`.
    pub fn new(weights: Vec<f64>, means: Vec<Vec<f64>>, std: f64) -> Result<Self> {
        check_scale("std", std)?;
        if weights.is_empty() || weights.len() != means.len() {
            return Err(McmcError::config(
                "mixture needs one weight per component and at least one component",
            ));
        }
        if means.iter().any(|mu| mu.len() != means[0].len()) {
            return Err(McmcError::config("mixture means must share one dimension"));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
            return Err(McmcError::config("mixture weights must be positive"));
        }
        let total: f64 = weights.iter().sum();
        Ok(Self {
            weights: weights.into_iter().map(|w| w / total).collect(),
            means,
            std,
        })
    }
}

impl Target for GaussianMixture {
    fn log_density(&self, theta: &[f64]) -> f64 {
        let var = self.std * self.std;
        let terms: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.means)
            .map(|(w, mu)| w.ln() - 0.5 * sq_dist(theta, mu) / var)
            .collect();
        log_sum_exp(&terms)
    }

    fn dim(&self) -> Option<usize> {
        self.means.first().map(Vec::len)
    }
}

/// Constant density on the box `[low, high]`, zero outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl Uniform {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] unless `low[i] < high[i]` for every coordinate.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        if low.len() != high.len() || low.iter().zip(&high).any(|(l, h)| !(l < h)) {
            return Err(McmcError::config(
                "uniform bounds must satisfy low < high in every coordinate",
            ));
        }
        Ok(Self { low, high })
    }
}

impl Target for Uniform {
    fn density(&self, theta: &[f64]) -> f64 {
        let inside = theta
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .all(|(x, (l, h))| l <= x && x <= h);
        if inside {
            1.0
        } else {
            0.0
        }
    }

    fn dim(&self) -> Option<usize> {
        Some(self.low.len())
    }
}

/**
Symmetric random walk adding independent N(0, std²) noise to each coordinate.

# Examples

```rust
use chainmix::distributions::GaussianRandomWalk;

assert!(GaussianRandomWalk::new(1.0).is_ok());
assert!(GaussianRandomWalk::new(0.0).is_err());
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianRandomWalk {
    pub std: f64,
}

impl GaussianRandomWalk {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] for a zero, negative or non-finite `std`.
    pub fn new(std: f64) -> Result<Self> {
        check_scale("std", std)?;
        Ok(Self { std })
    }
}

impl Proposal for GaussianRandomWalk {
    fn sample<R: Rng>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        current
            .iter()
            .map(|x| x + self.std * rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let d = from.len() as f64;
        -0.5 * sq_dist(to, from) / var - 0.5 * d * (2.0 * PI * var).ln()
    }
}

/// Symmetric random walk adding independent U(-half_width, half_width) noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformRandomWalk {
    pub half_width: f64,
}

impl UniformRandomWalk {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] for a zero, negative or non-finite width.
    pub fn new(half_width: f64) -> Result<Self> {
        check_scale("half_width", half_width)?;
        Ok(Self { half_width })
    }
}

impl Proposal for UniformRandomWalk {
    fn sample<R: Rng>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        current
            .iter()
            .map(|x| x + rng.gen_range(-self.half_width..self.half_width))
            .collect()
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64 {
        let inside = from
            .iter()
            .zip(to)
            .all(|(f, t)| (t - f).abs() <= self.half_width);
        if inside {
            -(from.len() as f64) * (2.0 * self.half_width).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}

/**
Multiplicative random walk for strictly positive parameters: `x' = x * exp(std * z)` with
`z ~ N(0, 1)` per coordinate, i.e. a log-normal jump centred on log x.

The kernel is asymmetric (q(x' | x) / q(x | x') = x / x'), so the sampler applies the
Hastings correction.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalRandomWalk {
    pub std: f64,
}

impl LogNormalRandomWalk {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] for a zero, negative or non-finite `std`.
    pub fn new(std: f64) -> Result<Self> {
        check_scale("std", std)?;
        Ok(Self { std })
    }
}

impl Proposal for LogNormalRandomWalk {
    fn sample<R: Rng>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        current
            .iter()
            .map(|x| x * (self.std * rng.sample::<f64, _>(StandardNormal)).exp())
            .collect()
    }

    fn is_symmetric(&self) -> bool {
        false
    }

    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let log_norm = -0.5 * (2.0 * PI * var).ln();
        from.iter()
            .zip(to)
            .map(|(&f, &t)| {
                if f <= 0.0 || t <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                let diff = t.ln() - f.ln();
                log_norm - t.ln() - 0.5 * diff * diff / var
            })
            .sum()
    }
}

/// Independence proposal: candidates are drawn from N(mean, std²) regardless of the
/// current state.
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentGaussian {
    pub mean: Vec<f64>,
    pub std: f64,
}

impl IndependentGaussian {
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] for a zero, negative or non-finite `std`.
    pub fn new(mean: Vec<f64>, std: f64) -> Result<Self> {
        check_scale("std", std)?;
        Ok(Self { mean, std })
    }
}

impl Proposal for IndependentGaussian {
    fn sample<R: Rng>(&self, _current: &[f64], rng: &mut R) -> Vec<f64> {
        self.mean
            .iter()
            .map(|m| m + self.std * rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    fn is_symmetric(&self) -> bool {
        false
    }

    fn log_prob(&self, _from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let d = to.len() as f64;
        -0.5 * sq_dist(to, &self.mean) / var - 0.5 * d * (2.0 * PI * var).ln()
    }

    fn dim(&self) -> Option<usize> {
        Some(self.mean.len())
    }
}

type ConditionalFn = dyn Fn(&[f64], &mut dyn RngCore) -> f64 + Send + Sync;

/**
A Gibbs target assembled from one sampling closure per component.

Closure `k` receives the full current state (already-updated values for components before
`k`) and the chain's random generator, and returns a draw for component `k`.

# Examples

```rust
use chainmix::distributions::{Conditional, FullConditionals};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

let conditionals = FullConditionals::new()
    .with(|given, _rng| given[1] + 1.0)
    .with(|_given, rng| rng.gen::<f64>());

let mut rng = SmallRng::seed_from_u64(1);
assert_eq!(conditionals.sample(0, &[0.0, 2.0], &mut rng), 3.0);
assert_eq!(conditionals.len(), 2);
```
*/
#[derive(Clone, Default)]
pub struct FullConditionals {
    components: Vec<Arc<ConditionalFn>>,
}

impl FullConditionals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the conditional for the next component.
    pub fn with<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], &mut dyn RngCore) -> f64 + Send + Sync + 'static,
    {
        self.components.push(Arc::new(f));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Debug for FullConditionals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullConditionals")
            .field("components", &self.components.len())
            .finish()
    }
}

impl Conditional for FullConditionals {
    fn sample<R: Rng>(&self, i: usize, given: &[f64], rng: &mut R) -> f64 {
        (self.components[i])(given, rng)
    }

    fn n_components(&self) -> Option<usize> {
        Some(self.components.len())
    }
}

fn check_scale(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(McmcError::config(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}
