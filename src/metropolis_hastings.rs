/*!
# Metropolis–Hastings Sampler

This module implements a generic Metropolis–Hastings sampler that works with any target
distribution `D` and proposal kernel `Q` implementing [`Target`] and [`Proposal`]. The sampler
runs several independent Markov chains in parallel. Each chain owns its state and its own
random stream; the target and proposal are shared read-only.

## One iteration

1. **Propose**: draw a candidate from the kernel given the current state.
2. **Evaluate**: compute the acceptance ratio
   - symmetric kernel: `r = p(candidate) / p(current)`
   - asymmetric kernel: `r = p(candidate) q(current | candidate) / (p(current) q(candidate | current))`

   If `p(current) == 0` the ratio is infinite, unless the candidate also has zero density,
   in which case the move is rejected.
3. **Accept or reject**: draw `u ~ U(0, 1)` and accept iff `u < min(r, 1)` (see [`accept`]).
   Either way the chain grows by exactly one state.

Ratios are computed in log space, so tiny densities don't underflow. A density that is NaN,
negative or infinite aborts the chain with [`McmcError::NumericalError`] rather than being
silently treated as zero.

## Example Usage

```rust
use chainmix::config::SamplerConfig;
use chainmix::core::ChainRunner;
use chainmix::distributions::{Gaussian, GaussianRandomWalk};
use chainmix::metropolis_hastings::MetropolisHastings;

let target = Gaussian::new(vec![0.0, 0.0], 1.0).unwrap();
let proposal = GaussianRandomWalk::new(1.0).unwrap();
let config = SamplerConfig::new(2, 500).initial_state(&[0.0, 0.0]).seed(42);

let mut mh = MetropolisHastings::new(target, proposal, config).unwrap();
let chains = mh.run().unwrap();
assert_eq!(chains.len(), 2);
assert_eq!(chains.n_draws().unwrap(), 501);
```
*/

use std::sync::Arc;

use rand::prelude::*;

use crate::config::SamplerConfig;
use crate::core::{HasChains, MarkovChain, StopHandle};
use crate::distributions::{Proposal, Target};
use crate::error::{McmcError, Result};

/// Log of the acceptance ratio
/// `[p(candidate) q(current | candidate)] / [p(current) q(candidate | current)]`.
///
/// Pass zeros for both `log_q` terms with a symmetric kernel. When the current state has
/// zero density the ratio is `+inf` whatever the kernel terms, or `-inf` (reject) if the
/// candidate has zero density as well.
///
/// ```rust
/// use chainmix::metropolis_hastings::log_acceptance_ratio;
///
/// assert_eq!(log_acceptance_ratio(-1.0, -3.0, 0.0, 0.0), -2.0);
/// assert_eq!(log_acceptance_ratio(f64::NEG_INFINITY, -3.0, 0.0, 0.0), f64::INFINITY);
/// assert_eq!(
///     log_acceptance_ratio(f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0, 0.0),
///     f64::NEG_INFINITY
/// );
/// ```
pub fn log_acceptance_ratio(
    log_p_current: f64,
    log_p_candidate: f64,
    log_q_forward: f64,
    log_q_backward: f64,
) -> f64 {
    if log_p_current == f64::NEG_INFINITY {
        return if log_p_candidate == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let numerator = log_p_candidate + log_q_backward;
    let denominator = log_p_current + log_q_forward;
    if denominator == f64::NEG_INFINITY {
        if numerator == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }
    } else {
        numerator - denominator
    }
}

/// `min(r, 1)`, clamped to `[0, 1]`.
pub fn acceptance_probability(ratio: f64) -> f64 {
    if ratio >= 1.0 {
        1.0
    } else if ratio > 0.0 {
        ratio
    } else {
        0.0
    }
}

/// The Metropolis decision: accept iff `uniform_draw < min(ratio, 1)`.
///
/// Kept free of any random number generation so the decision can be tested on its own.
///
/// ```rust
/// use chainmix::metropolis_hastings::accept;
///
/// assert!(accept(0.5, 0.49));
/// assert!(!accept(0.5, 0.5));
/// assert!(accept(3.0, 0.999));
/// assert!(!accept(0.0, 0.0));
/// ```
pub fn accept(ratio: f64, uniform_draw: f64) -> bool {
    uniform_draw < acceptance_probability(ratio)
}

/// What happened during one Metropolis–Hastings iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    /// The acceptance ratio `r` (may be `+inf`).
    pub ratio: f64,
    /// `min(r, 1)`.
    pub acceptance_probability: f64,
    /// The uniform draw compared against the acceptance probability.
    pub uniform_draw: f64,
    pub accepted: bool,
    /// Both current and candidate had zero density; the move was rejected.
    pub zero_density: bool,
}

/**
The Metropolis–Hastings sampler.

Holds one [`MHMarkovChain`] per configured chain. Chain `i` starts at
`config.initial_states[i]` and draws from a generator seeded with `config.seeds[i]`.

# Examples

```rust
use chainmix::config::SamplerConfig;
use chainmix::distributions::{Gaussian, GaussianRandomWalk};
use chainmix::metropolis_hastings::MetropolisHastings;

let target = Gaussian::new(vec![0.0], 1.0).unwrap();
let proposal = GaussianRandomWalk::new(0.5).unwrap();
let config = SamplerConfig::new(3, 100).initial_state(&[0.0]);
let mh = MetropolisHastings::new(target, proposal, config).unwrap().set_seed(42);
assert_eq!(mh.chains[2].seed, 44);
```
*/
#[derive(Debug)]
pub struct MetropolisHastings<D, Q> {
    /// The target distribution we want to sample from.
    pub target: Arc<D>,
    /// The proposal kernel used to generate candidate states.
    pub proposal: Arc<Q>,
    /// The independent Markov chains.
    pub chains: Vec<MHMarkovChain<D, Q>>,
    pub config: SamplerConfig,
    stop: StopHandle,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<D, Q> {
    pub target: Arc<D>,
    pub proposal: Arc<Q>,
    /// The current state of the chain.
    pub current_state: Vec<f64>,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
    current_log_density: Option<f64>,
    n_zero_density: u64,
}

impl<D, Q> MetropolisHastings<D, Q>
where
    D: Target,
    Q: Proposal,
{
    /// Builds a sampler from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] if `config` fails [`SamplerConfig::validate`],
    /// or if the target or proposal is built for a different dimension than the initial
    /// states.
    pub fn new(target: D, proposal: Q, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        config.check_dim("target", target.dim())?;
        config.check_dim("proposal", proposal.dim())?;
        let target = Arc::new(target);
        let proposal = Arc::new(proposal);
        let chains = config
            .initial_states
            .iter()
            .zip(&config.seeds)
            .map(|(state, &seed)| {
                MHMarkovChain::new(Arc::clone(&target), Arc::clone(&proposal), state, seed)
            })
            .collect();
        log::debug!(
            "metropolis-hastings: {} chains x {} iterations, dim {}, symmetric proposal: {}",
            config.n_chains,
            config.n_iterations,
            config.initial_states[0].len(),
            proposal.is_symmetric()
        );

        Ok(Self {
            target,
            proposal,
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

impl<D, Q> HasChains for MetropolisHastings<D, Q>
where
    D: Target + Send + Sync,
    Q: Proposal + Send + Sync,
{
    type Chain = MHMarkovChain<D, Q>;

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

impl<D, Q> MHMarkovChain<D, Q>
where
    D: Target,
    Q: Proposal,
{
    pub fn new(target: Arc<D>, proposal: Arc<Q>, initial_state: &[f64], seed: u64) -> Self {
        Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_log_density: None,
            n_zero_density: 0,
        }
    }

    /// Number of rejections forced by a zero-density current state and candidate.
    pub fn n_zero_density(&self) -> u64 {
        self.n_zero_density
    }

    /// Runs one propose / evaluate / accept-or-reject cycle and reports its outcome.
    ///
    /// # Errors
    ///
    /// [`McmcError::NumericalError`] if the target or proposal density is NaN, negative or
    /// infinite. The current state is left untouched.
    pub fn transition(&mut self) -> Result<Transition> {
        let candidate = self.proposal.sample(&self.current_state, &mut self.rng);
        if candidate.len() != self.current_state.len() {
            return Err(McmcError::config(format!(
                "proposal returned a candidate of dimension {} for a state of dimension {}",
                candidate.len(),
                self.current_state.len()
            )));
        }

        let log_p_current = match self.current_log_density {
            Some(lp) => lp,
            None => {
                let lp = checked_log_density(self.target.as_ref(), &self.current_state)?;
                self.current_log_density = Some(lp);
                lp
            }
        };
        let log_p_candidate = checked_log_density(self.target.as_ref(), &candidate)?;
        let (log_q_forward, log_q_backward) = if self.proposal.is_symmetric() {
            (0.0, 0.0)
        } else {
            (
                checked_log_q(self.proposal.log_prob(&self.current_state, &candidate))?,
                checked_log_q(self.proposal.log_prob(&candidate, &self.current_state))?,
            )
        };

        let zero_density =
            log_p_current == f64::NEG_INFINITY && log_p_candidate == f64::NEG_INFINITY;
        if zero_density {
            self.n_zero_density += 1;
            log::trace!("current state and candidate both have zero density; rejecting");
        }

        let ratio =
            log_acceptance_ratio(log_p_current, log_p_candidate, log_q_forward, log_q_backward)
                .exp();
        let uniform_draw: f64 = self.rng.gen();
        let accepted = accept(ratio, uniform_draw);
        if accepted {
            self.current_state = candidate;
            self.current_log_density = Some(log_p_candidate);
        }

        Ok(Transition {
            ratio,
            acceptance_probability: acceptance_probability(ratio),
            uniform_draw,
            accepted,
            zero_density,
        })
    }
}

impl<D, Q> MarkovChain for MHMarkovChain<D, Q>
where
    D: Target,
    Q: Proposal,
{
    fn step(&mut self) -> Result<bool> {
        Ok(self.transition()?.accepted)
    }

    fn current_state(&self) -> &[f64] {
        &self.current_state
    }
}

fn checked_log_density<D: Target + ?Sized>(target: &D, theta: &[f64]) -> Result<f64> {
    let lp = target.log_density(theta);
    if lp.is_nan() || lp == f64::INFINITY {
        return Err(McmcError::numerical(format!(
            "target density at {theta:?} is negative, NaN or infinite (log density {lp})"
        )));
    }
    Ok(lp)
}

fn checked_log_q(log_q: f64) -> Result<f64> {
    if log_q.is_nan() || log_q == f64::INFINITY {
        return Err(McmcError::numerical(format!(
            "proposal log density {log_q} is not a valid log probability"
        )));
    }
    Ok(log_q)
}
