/*!
# Gibbs Sampler

Systematic-scan Gibbs sampling: every iteration visits components `0..K` in order and
replaces component `k` with a draw from its full conditional, given the current values of
all other components (components before `k` have already been refreshed in this sweep).
The resulting state is appended once per sweep. Draws come from exact conditionals, so
there is no accept/reject step.

With a single component every sweep is an independent draw from that one conditional.

```rust
use chainmix::config::SamplerConfig;
use chainmix::core::ChainRunner;
use chainmix::distributions::FullConditionals;
use chainmix::gibbs::GibbsSampler;
use rand::Rng;

// Two independent U(0, 1) components.
let conditionals = FullConditionals::new()
    .with(|_, rng| rng.gen::<f64>())
    .with(|_, rng| rng.gen::<f64>());
let config = SamplerConfig::new(2, 100).initial_state(&[0.5, 0.5]).seed(1);
let mut gibbs = GibbsSampler::new(conditionals, config).unwrap();
let chains = gibbs.run().unwrap();
assert_eq!(chains.n_draws().unwrap(), 101);
```
*/

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::SamplerConfig;
use crate::core::{HasChains, MarkovChain, StopHandle};
use crate::distributions::Conditional;
use crate::error::{McmcError, Result};

/// A single Gibbs chain.
#[derive(Debug, Clone)]
pub struct GibbsMarkovChain<D> {
    /// The distribution that provides conditional samples.
    pub target: Arc<D>,

    /// Current state of the Markov chain.
    pub current_state: Vec<f64>,

    /// Random seed for reproducibility.
    pub seed: u64,

    /// RNG for this chain.
    pub rng: SmallRng,
}

impl<D: Conditional> GibbsMarkovChain<D> {
    /// Creates a new chain with a given target distribution and initial state.
    pub fn new(target: Arc<D>, initial_state: &[f64], seed: u64) -> Self {
        Self {
            target,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl<D: Conditional> MarkovChain for GibbsMarkovChain<D> {
    /// Performs one full sweep over the components.
    fn step(&mut self) -> Result<bool> {
        if let Some(n) = self.target.n_components() {
            if n != self.current_state.len() {
                return Err(McmcError::config(format!(
                    "{n} full conditionals for a state of dimension {}",
                    self.current_state.len()
                )));
            }
        }
        let mut next = self.current_state.clone();
        for k in 0..next.len() {
            let value = self.target.sample(k, &next, &mut self.rng);
            if !value.is_finite() {
                return Err(McmcError::numerical(format!(
                    "full conditional of component {k} returned {value}"
                )));
            }
            next[k] = value;
        }
        self.current_state = next;
        Ok(true)
    }

    fn current_state(&self) -> &[f64] {
        &self.current_state
    }
}

/// Runs several independent Gibbs chains in parallel.
#[derive(Debug)]
pub struct GibbsSampler<D> {
    pub target: Arc<D>,
    pub chains: Vec<GibbsMarkovChain<D>>,
    pub config: SamplerConfig,
    stop: StopHandle,
}

impl<D: Conditional> GibbsSampler<D> {
    /// Creates one chain per configured initial state and seed.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] if `config` fails [`SamplerConfig::validate`],
    /// or if `target` has a different number of conditionals than the state has components.
    pub fn new(target: D, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        config.check_dim("full conditional set", target.n_components())?;
        let target = Arc::new(target);
        let chains = config
            .initial_states
            .iter()
            .zip(&config.seeds)
            .map(|(state, &seed)| GibbsMarkovChain::new(Arc::clone(&target), state, seed))
            .collect();
        log::debug!(
            "gibbs: {} chains x {} sweeps over {} components",
            config.n_chains,
            config.n_iterations,
            config.initial_states[0].len()
        );

        Ok(Self {
            target,
            chains,
            config,
            stop: StopHandle::new(),
        })
    }

    /// Reseeds chain `i` with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.config = self.config.seed(seed);
        for (chain, &chain_seed) in self.chains.iter_mut().zip(&self.config.seeds) {
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed);
        }
        self
    }
}

impl<D> HasChains for GibbsSampler<D>
where
    D: Conditional + Send + Sync,
{
    type Chain = GibbsMarkovChain<D>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }

    fn n_iterations(&self) -> usize {
        self.config.n_iterations
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainRunner;
    use crate::distributions::FullConditionals;
    use rand::Rng;
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::PI;

    /// A dummy conditional distribution that always returns the same constant value.
    #[derive(Clone)]
    struct ConstantConditional {
        c: f64,
    }

    impl Conditional for ConstantConditional {
        fn sample<R: Rng>(&self, _i: usize, _given: &[f64], _rng: &mut R) -> f64 {
            self.c
        }
    }

    /// Records which values each component saw, to check the scan order.
    struct Incrementing;

    impl Conditional for Incrementing {
        fn sample<R: Rng>(&self, i: usize, given: &[f64], _rng: &mut R) -> f64 {
            if i == 0 {
                given[given.len() - 1] + 1.0
            } else {
                given[i - 1] + 1.0
            }
        }
    }

    /// Two-component Gaussian mixture over `[x, z]`, where `z` labels the component.
    #[derive(Clone)]
    struct MixtureConditional {
        mu0: f64,
        sigma0: f64,
        mu1: f64,
        sigma1: f64,
        pi0: f64,
    }

    fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
        let var = sigma * sigma;
        (-((x - mu).powi(2)) / (2.0 * var)).exp() / (2.0 * PI * var).sqrt()
    }

    impl Conditional for MixtureConditional {
        fn sample<R: Rng>(&self, i: usize, given: &[f64], rng: &mut R) -> f64 {
            if i == 0 {
                let (mu, sigma) = if given[1] < 0.5 {
                    (self.mu0, self.sigma0)
                } else {
                    (self.mu1, self.sigma1)
                };
                Normal::new(mu, sigma).unwrap().sample(rng)
            } else {
                let x = given[0];
                let p0 = self.pi0 * normal_pdf(x, self.mu0, self.sigma0);
                let p1 = (1.0 - self.pi0) * normal_pdf(x, self.mu1, self.sigma1);
                let total = p0 + p1;
                let prob_z1 = if total > 0.0 { p1 / total } else { 0.5 };
                if rng.gen::<f64>() < prob_z1 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    #[test]
    fn test_gibbs_chain_step() {
        let conditional = ConstantConditional { c: 7.0 };
        let mut chain = GibbsMarkovChain::new(Arc::new(conditional), &[0.0, 0.0, 0.0], 1);
        assert!(chain.step().unwrap());
        assert_eq!(chain.current_state(), &[7.0, 7.0, 7.0]);
    }

    #[test]
    fn sweep_uses_already_updated_components() {
        let mut chain = GibbsMarkovChain::new(Arc::new(Incrementing), &[0.0, 0.0, 0.0], 1);
        chain.step().unwrap();
        // x0 = x2 + 1 = 1, x1 = x0 + 1 = 2, x2 = x1 + 1 = 3
        assert_eq!(chain.current_state(), &[1.0, 2.0, 3.0]);
        chain.step().unwrap();
        assert_eq!(chain.current_state(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn non_finite_conditional_draw_is_an_error() {
        let conditionals = FullConditionals::new().with(|_, _| f64::NAN);
        let mut chain = GibbsMarkovChain::new(Arc::new(conditionals), &[0.0], 1);
        assert!(matches!(chain.step(), Err(McmcError::NumericalError(_))));
        assert_eq!(chain.current_state(), &[0.0]);
    }

    #[test]
    fn conditional_count_must_match_dimension() {
        let one = FullConditionals::new().with(|_, rng| rng.gen::<f64>());
        let config = SamplerConfig::new(2, 10).initial_state(&[0.0, 0.0]).seed(1);
        assert!(matches!(
            GibbsSampler::new(one.clone(), config),
            Err(McmcError::InvalidConfiguration(_))
        ));

        let mut chain = GibbsMarkovChain::new(Arc::new(one), &[0.0, 0.0], 1);
        assert!(matches!(
            chain.step(),
            Err(McmcError::InvalidConfiguration(_))
        ));
        assert_eq!(chain.current_state(), &[0.0, 0.0]);
    }

    #[test]
    fn test_gibbs_sampler_run() {
        let constant = 42.0;
        let config = SamplerConfig::new(4, 10).initial_state(&[0.0, 0.0]).seed(3);
        let mut sampler = GibbsSampler::new(ConstantConditional { c: constant }, config).unwrap();
        let chains = sampler.run().unwrap();
        for chain in &chains {
            assert_eq!(chain.len(), 11);
            assert_eq!(chain.draw(0), Some(&[0.0, 0.0][..]));
            assert_eq!(chain.last(), &[constant, constant]);
            assert_eq!(chain.acceptance_rate(), 1.0);
        }
    }

    #[test]
    fn single_component_is_direct_sampling() {
        let conditionals = FullConditionals::new().with(|_, rng| rng.gen_range(10.0..11.0));
        let config = SamplerConfig::new(1, 2_000).initial_state(&[0.0]).seed(8);
        let mut sampler = GibbsSampler::new(conditionals, config).unwrap();
        let chain = sampler.run().unwrap().discard(1).unwrap();
        let draws = chain.get(0).unwrap().parameter(0);
        assert!(draws.iter().all(|x| (10.0..11.0).contains(x)));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 10.5).abs() < 0.05, "mean {mean}");
        // Consecutive draws don't depend on each other.
        assert!(draws.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_gibbs_sampler_mixture() {
        let (mu0, sigma0, mu1, sigma1, pi0) = (-2.0, 1.0, 3.0, 1.5, 0.5);
        let theo_mean = pi0 * mu0 + (1.0 - pi0) * mu1;
        let theo_var = pi0 * (sigma0 * sigma0 + (mu0 - theo_mean) * (mu0 - theo_mean))
            + (1.0 - pi0) * (sigma1 * sigma1 + (mu1 - theo_mean) * (mu1 - theo_mean));

        let conditional = MixtureConditional {
            mu0,
            sigma0,
            mu1,
            sigma1,
            pi0,
        };
        let config = SamplerConfig::new(3, 6_000).initial_state(&[0.0, 0.0]).seed(42);
        let mut sampler = GibbsSampler::new(conditional, config).unwrap();
        let chains = sampler.run().unwrap().discard(1_000).unwrap();

        let xs: Vec<f64> = chains.iter().flat_map(|c| c.parameter(0)).collect();
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert!((mean - theo_mean).abs() < 0.5, "mean {mean} vs {theo_mean}");
        assert!((var - theo_var).abs() < 1.5, "variance {var} vs {theo_var}");
    }

    #[test]
    fn reseeding_changes_streams_reproducibly() {
        let conditionals = FullConditionals::new().with(|_, rng| rng.gen::<f64>());
        let build = |seed| {
            let config = SamplerConfig::new(2, 50).initial_state(&[0.0]);
            GibbsSampler::new(conditionals.clone(), config)
                .unwrap()
                .set_seed(seed)
        };
        let a = build(1).run().unwrap();
        let b = build(1).run().unwrap();
        let c = build(2).run().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // chain 1 of seed 1 and chain 0 of seed 2 share seed 2
        assert_eq!(a.get(1).unwrap().parameter(0), c.get(0).unwrap().parameter(0));
    }
}
