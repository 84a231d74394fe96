//! Sampler configuration: how many chains, how long they run, where they start and how
//! each chain's random stream is seeded.

use std::collections::HashSet;

use rand::{thread_rng, Rng};

use crate::error::{McmcError, Result};

/// Configuration shared by [`MetropolisHastings`](crate::metropolis_hastings::MetropolisHastings)
/// and [`GibbsSampler`](crate::gibbs::GibbsSampler).
///
/// # Examples
///
/// ```rust
/// use chainmix::config::SamplerConfig;
///
/// let config = SamplerConfig::new(2, 500).initial_state(&[0.0, 1.0]).seed(42);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.seeds, vec![42, 43]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Number of independent chains.
    pub n_chains: usize,
    /// Iterations per chain. A finished chain holds `n_iterations + 1` states.
    pub n_iterations: usize,
    /// Starting state of each chain.
    pub initial_states: Vec<Vec<f64>>,
    /// Seed of each chain's random stream.
    pub seeds: Vec<u64>,
}

impl SamplerConfig {
    /// Creates a configuration with random per-chain seeds and no initial state yet.
    pub fn new(n_chains: usize, n_iterations: usize) -> Self {
        let base = thread_rng().gen::<u64>();
        Self {
            n_chains,
            n_iterations,
            initial_states: Vec::new(),
            seeds: consecutive_seeds(base, n_chains),
        }
    }

    /// Starts every chain at `state`.
    pub fn initial_state(mut self, state: &[f64]) -> Self {
        self.initial_states = vec![state.to_vec(); self.n_chains];
        self
    }

    /// Starts chain `i` at `states[i]`.
    pub fn initial_states(mut self, states: Vec<Vec<f64>>) -> Self {
        self.initial_states = states;
        self
    }

    /// Seeds chain `i` with `seed + i`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seeds = consecutive_seeds(seed, self.n_chains);
        self
    }

    /// Seeds chain `i` with `seeds[i]`.
    pub fn seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Dimension of the parameter space, if any initial state is set.
    pub fn dim(&self) -> Option<usize> {
        self.initial_states.first().map(Vec::len)
    }

    /// Checks a dimension fixed by a target, kernel or conditional set against the initial
    /// states. `None` means the component adapts to any dimension.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidConfiguration`] if both are known and differ.
    pub fn check_dim(&self, what: &str, fixed: Option<usize>) -> Result<()> {
        match (fixed, self.dim()) {
            (Some(fixed), Some(dim)) if fixed != dim => Err(McmcError::config(format!(
                "{what} has dimension {fixed}, initial states have dimension {dim}"
            ))),
            _ => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Returns [`McmcError::InvalidConfiguration`] if any count is zero, initial states or
    /// seeds don't line up with the chain count, initial states are ragged, empty or
    /// non-finite, or two chains would share a random stream.
    pub fn validate(&self) -> Result<()> {
        if self.n_chains == 0 {
            return Err(McmcError::config("n_chains must be positive"));
        }
        if self.n_iterations == 0 {
            return Err(McmcError::config("n_iterations must be positive"));
        }
        if self.initial_states.len() != self.n_chains {
            return Err(McmcError::config(format!(
                "expected {} initial states, got {}",
                self.n_chains,
                self.initial_states.len()
            )));
        }
        let dim = self.initial_states[0].len();
        if dim == 0 {
            return Err(McmcError::config("initial states must not be empty"));
        }
        for (i, state) in self.initial_states.iter().enumerate() {
            if state.len() != dim {
                return Err(McmcError::config(format!(
                    "initial state of chain {i} has dimension {}, expected {dim}",
                    state.len()
                )));
            }
            if state.iter().any(|x| !x.is_finite()) {
                return Err(McmcError::config(format!(
                    "initial state of chain {i} contains non-finite values"
                )));
            }
        }
        if self.seeds.len() != self.n_chains {
            return Err(McmcError::config(format!(
                "expected {} seeds, got {}",
                self.n_chains,
                self.seeds.len()
            )));
        }
        let distinct: HashSet<u64> = self.seeds.iter().copied().collect();
        if distinct.len() != self.seeds.len() {
            return Err(McmcError::config("chains must not share a seed"));
        }
        Ok(())
    }
}

fn consecutive_seeds(base: u64, n: usize) -> Vec<u64> {
    (0..n as u64).map(|i| base.wrapping_add(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SamplerConfig {
        SamplerConfig::new(3, 100).initial_state(&[0.0, 0.0]).seed(7)
    }

    #[test]
    fn builder_broadcasts_state_and_offsets_seeds() {
        let config = valid();
        assert_eq!(config.initial_states.len(), 3);
        assert_eq!(config.seeds, vec![7, 8, 9]);
        assert_eq!(config.dim(), Some(2));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_counts() {
        let config = SamplerConfig::new(0, 10).initial_state(&[0.0]);
        assert!(matches!(
            config.validate(),
            Err(McmcError::InvalidConfiguration(_))
        ));
        let config = SamplerConfig::new(1, 0).initial_state(&[0.0]);
        assert!(matches!(
            config.validate(),
            Err(McmcError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_missing_or_ragged_states() {
        let config = SamplerConfig::new(2, 10);
        assert!(config.validate().is_err());

        let config = valid().initial_states(vec![vec![0.0], vec![0.0, 1.0], vec![0.0]]);
        assert!(config.validate().is_err());

        let config = valid().initial_state(&[f64::NAN, 0.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shared_or_missing_seeds() {
        assert!(valid().seeds(vec![1, 1, 2]).validate().is_err());
        assert!(valid().seeds(vec![1, 2]).validate().is_err());
    }
}
