/*!
# Core MCMC Utilities.

This module provides the pieces every sampler shares:
- The [`MarkovChain`] trait, which abstracts a single chain's transition kernel.
- [`Chain`] and [`ChainCollection`], the append-only draw storage handed to diagnostics.
- [`run_chain`] and [`run_chain_progress`] for executing a single chain and recording its states.
- The [`HasChains`] trait for samplers owning several chains, and the [`ChainRunner`]
  extension trait that runs those chains in parallel with Rayon.
- [`StopHandle`], a cooperative stop-after-current-iteration switch.

Any type implementing [`HasChains`] automatically implements [`ChainRunner`] via a blanket
implementation.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;

use crate::error::{McmcError, Result};
use crate::stats::RunStats;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// A trait that abstracts a single MCMC chain.
pub trait MarkovChain {
    /// Performs one iteration of the chain. Returns whether the proposed move was accepted
    /// (always `true` for exact Gibbs sweeps).
    ///
    /// # Errors
    ///
    /// [`McmcError::NumericalError`] if the target broke its density contract. The chain
    /// must not be advanced past such an error.
    fn step(&mut self) -> Result<bool>;

    /// Returns the current state of the chain without advancing it.
    fn current_state(&self) -> &[f64];
}

/// Cooperative cancellation shared between a sampler and its caller.
///
/// Chains check the handle before starting each iteration, so a stop request takes effect
/// once the iteration in flight has finished.
///
/// ```rust
/// use chainmix::core::StopHandle;
///
/// let handle = StopHandle::new();
/// let remote = handle.clone();
/// remote.stop();
/// assert!(handle.is_stopped());
/// handle.reset();
/// assert!(!remote.is_stopped());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every chain to stop after its current iteration.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arms the handle for another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The ordered states visited by one chain, starting with its initial state.
///
/// Draws are stored row-major. A chain only ever grows by appending.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    dim: usize,
    draws: Vec<f64>,
    n_proposed: u64,
    n_accepted: u64,
}

impl Chain {
    /// Starts a chain at `initial`.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if `initial` is empty.
    pub fn new(initial: &[f64]) -> Result<Self> {
        if initial.is_empty() {
            return Err(McmcError::input("a chain state needs at least one parameter"));
        }
        Ok(Self {
            dim: initial.len(),
            draws: initial.to_vec(),
            n_proposed: 0,
            n_accepted: 0,
        })
    }

    /// Builds a chain from already-collected states, e.g. draws produced elsewhere.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if there are no states or their lengths differ.
    pub fn from_draws(draws: &[Vec<f64>]) -> Result<Self> {
        let (first, rest) = draws
            .split_first()
            .ok_or_else(|| McmcError::input("a chain needs at least one state"))?;
        let mut chain = Self::new(first)?;
        for state in rest {
            chain.push(state)?;
        }
        Ok(chain)
    }

    /// Appends a state without touching the acceptance counters.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if `state` has the wrong dimension.
    pub fn push(&mut self, state: &[f64]) -> Result<()> {
        if state.len() != self.dim {
            return Err(McmcError::input(format!(
                "state has dimension {}, chain has dimension {}",
                state.len(),
                self.dim
            )));
        }
        self.draws.extend_from_slice(state);
        Ok(())
    }

    /// Appends the outcome of one sampler iteration.
    ///
    /// A sampler whose state changes dimension is misconfigured (e.g. a proposal built for
    /// a different parameter count), so this fails instead of storing the state.
    pub(crate) fn record(&mut self, state: &[f64], accepted: bool) -> Result<()> {
        if state.len() != self.dim {
            return Err(McmcError::config(format!(
                "sampler state changed dimension from {} to {}",
                self.dim,
                state.len()
            )));
        }
        self.draws.extend_from_slice(state);
        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
        }
        Ok(())
    }

    /// Number of stored states, including the initial one.
    pub fn len(&self) -> usize {
        self.draws.len() / self.dim
    }

    /// Always `false`: a chain holds at least its initial state.
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// Number of parameters per state.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// State at iteration `i` (0 is the initial state).
    pub fn draw(&self, i: usize) -> Option<&[f64]> {
        self.draws.get(i * self.dim..(i + 1) * self.dim)
    }

    /// The most recent state.
    pub fn last(&self) -> &[f64] {
        &self.draws[self.draws.len() - self.dim..]
    }

    /// Iterates over states in chain order.
    pub fn draws(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.draws.chunks_exact(self.dim)
    }

    /// All values of parameter `j`, in chain order.
    pub fn parameter(&self, j: usize) -> Vec<f64> {
        self.draws().map(|state| state[j]).collect()
    }

    /// Number of transitions attempted by the sampler that produced this chain.
    pub fn n_proposed(&self) -> u64 {
        self.n_proposed
    }

    pub fn n_accepted(&self) -> u64 {
        self.n_accepted
    }

    /// Fraction of accepted transitions, or `0` if none were attempted.
    pub fn acceptance_rate(&self) -> f64 {
        if self.n_proposed == 0 {
            0.0
        } else {
            self.n_accepted as f64 / self.n_proposed as f64
        }
    }

    /// Copies the draws into a `[len, dim]` array.
    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.len(), self.dim), |(i, j)| self.draws[i * self.dim + j])
    }

    /// Returns a chain without its first `n` states (burn-in).
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if that would leave no state.
    pub fn discard(&self, n: usize) -> Result<Self> {
        if n >= self.len() {
            return Err(McmcError::input(format!(
                "cannot discard {n} of {} states",
                self.len()
            )));
        }
        Ok(Self {
            draws: self.draws[n * self.dim..].to_vec(),
            ..self.clone()
        })
    }

    /// Keeps every `k`-th state, starting with the first.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if `k == 0`.
    pub fn thin(&self, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(McmcError::input("thinning interval must be positive"));
        }
        Ok(Self {
            draws: self.draws().step_by(k).flatten().copied().collect(),
            ..self.clone()
        })
    }
}

/// The chains produced by one sampler run, indexed by chain number.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCollection {
    chains: Vec<Chain>,
}

impl ChainCollection {
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if `chains` is empty or the chains disagree on dimension.
    pub fn new(chains: Vec<Chain>) -> Result<Self> {
        let dim = chains
            .first()
            .ok_or_else(|| McmcError::input("a chain collection needs at least one chain"))?
            .dim();
        if chains.iter().any(|c| c.dim() != dim) {
            return Err(McmcError::input("all chains must have the same dimension"));
        }
        Ok(Self { chains })
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.chains[0].dim()
    }

    pub fn get(&self, i: usize) -> Option<&Chain> {
        self.chains.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chain> {
        self.chains.iter()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn into_chains(self) -> Vec<Chain> {
        self.chains
    }

    /// Common chain length.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if the chains have unequal lengths.
    pub fn n_draws(&self) -> Result<usize> {
        let n = self.chains[0].len();
        if let Some((i, chain)) = self.chains.iter().enumerate().find(|(_, c)| c.len() != n) {
            return Err(McmcError::input(format!(
                "chain {i} has {} draws, chain 0 has {n}",
                chain.len()
            )));
        }
        Ok(n)
    }

    /// Stacks the draws into a `[chains, draws, params]` array.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if the chains have unequal lengths.
    pub fn to_array(&self) -> Result<Array3<f64>> {
        let n = self.n_draws()?;
        let dim = self.dim();
        Ok(Array3::from_shape_fn((self.len(), n, dim), |(c, i, j)| {
            self.chains[c].draws[i * dim + j]
        }))
    }

    /// Drops the first `n` states of every chain.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if a chain would be left empty.
    pub fn discard(&self, n: usize) -> Result<Self> {
        let chains = self
            .chains
            .iter()
            .map(|c| c.discard(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains })
    }

    /// Keeps every `k`-th state of every chain.
    ///
    /// # Errors
    ///
    /// [`McmcError::InvalidInput`] if `k == 0`.
    pub fn thin(&self, k: usize) -> Result<Self> {
        let chains = self
            .chains
            .iter()
            .map(|c| c.thin(k))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains })
    }

    /// Per-parameter mean over every draw of every chain.
    pub fn parameter_means(&self) -> Array1<f64> {
        let mut sums = Array1::<f64>::zeros(self.dim());
        let mut count = 0usize;
        for state in self.chains.iter().flat_map(Chain::draws) {
            sums.iter_mut().zip(state).for_each(|(s, x)| *s += x);
            count += 1;
        }
        sums / count as f64
    }

    pub fn acceptance_rates(&self) -> Vec<f64> {
        self.chains.iter().map(Chain::acceptance_rate).collect()
    }
}

impl<'a> IntoIterator for &'a ChainCollection {
    type Item = &'a Chain;
    type IntoIter = std::slice::Iter<'a, Chain>;

    fn into_iter(self) -> Self::IntoIter {
        self.chains.iter()
    }
}

/// Runs a single chain for `n_iterations` steps, recording the starting state and every
/// subsequent state.
///
/// The returned chain has `n_iterations + 1` states unless `stop` was triggered, in which
/// case it ends after the iteration that was in flight.
///
/// # Errors
///
/// Propagates the first error raised by [`MarkovChain::step`].
pub fn run_chain<M>(chain: &mut M, n_iterations: usize, stop: &StopHandle) -> Result<Chain>
where
    M: MarkovChain + ?Sized,
{
    let mut out = Chain::new(chain.current_state())?;
    out.draws.reserve(n_iterations * out.dim);

    for i in 0..n_iterations {
        if stop.is_stopped() {
            log::warn!("chain stopped early after {i} of {n_iterations} iterations");
            break;
        }
        let accepted = chain.step()?;
        out.record(chain.current_state(), accepted)?;
    }

    Ok(out)
}

/// Like [`run_chain`], but reports progress and the running acceptance rate on `pb`.
///
/// The bar is refreshed at most every 500 ms and on the last iteration.
///
/// # Errors
///
/// Propagates the first error raised by [`MarkovChain::step`].
pub fn run_chain_progress<M>(
    chain: &mut M,
    n_iterations: usize,
    stop: &StopHandle,
    pb: &ProgressBar,
) -> Result<Chain>
where
    M: MarkovChain + ?Sized,
{
    let mut out = Chain::new(chain.current_state())?;
    out.draws.reserve(n_iterations * out.dim);
    let mut last_update = Instant::now();

    pb.set_length(n_iterations as u64);

    for i in 0..n_iterations {
        if stop.is_stopped() {
            log::warn!("chain stopped early after {i} of {n_iterations} iterations");
            pb.abandon_with_message("Stopped");
            return Ok(out);
        }
        let accepted = chain.step()?;
        out.record(chain.current_state(), accepted)?;

        if last_update.elapsed() >= UPDATE_INTERVAL || i + 1 == n_iterations {
            pb.set_position(i as u64 + 1);
            pb.set_message(format!("p(accept)≈{:.3}", out.acceptance_rate()));
            last_update = Instant::now();
        }
    }

    pb.finish_with_message(format!("Done, p(accept)≈{:.3}", out.acceptance_rate()));
    Ok(out)
}

/// A trait for types that own multiple MCMC chains.
pub trait HasChains {
    type Chain: MarkovChain + Send;

    /// Returns a mutable reference to the vector of chains.
    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;

    /// Iterations each chain runs per call to [`ChainRunner::run`].
    fn n_iterations(&self) -> usize;

    /// Handle used to stop all chains cooperatively.
    fn stop_handle(&self) -> StopHandle;
}

/// An extension trait for types that own multiple MCMC chains.
///
/// Chains are independent, so they run as parallel Rayon tasks: each task owns its chain and
/// its chain's random stream, and only reads the shared target and proposal. Results are
/// joined before they are returned.
pub trait ChainRunner: HasChains {
    /// Runs all chains in parallel for the configured number of iterations.
    ///
    /// Each chain continues from its current state, so calling `run` again extends the
    /// sampling where the previous call stopped.
    ///
    /// # Errors
    ///
    /// The first [`McmcError`] raised by any chain.
    fn run(&mut self) -> Result<ChainCollection> {
        let n_iterations = self.n_iterations();
        let stop = self.stop_handle();
        let chains: Vec<Chain> = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_iterations, &stop))
            .collect::<Result<Vec<_>>>()?;
        log_acceptance(&chains);
        ChainCollection::new(chains)
    }

    /// Runs all chains in parallel, displaying one progress bar per chain.
    ///
    /// # Errors
    ///
    /// The first [`McmcError`] raised by any chain.
    fn run_progress(&mut self) -> Result<ChainCollection> {
        let n_iterations = self.n_iterations();
        let stop = self.stop_handle();
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix:8} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let chains: Vec<Chain> = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(n_iterations as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());
                run_chain_progress(chain, n_iterations, &stop, &pb)
            })
            .collect::<Result<Vec<_>>>()?;
        log_acceptance(&chains);
        let collection = ChainCollection::new(chains)?;
        log_summary(&collection);
        Ok(collection)
    }
}

impl<R: HasChains> ChainRunner for R {}

/// R-hat above this is reported as a convergence warning.
const RHAT_WARN: f64 = 1.1;

fn log_summary(chains: &ChainCollection) {
    match RunStats::new(chains) {
        Ok(stats) => {
            log::info!("{stats}");
            if stats.max_rhat() > RHAT_WARN {
                log::warn!(
                    "chains have not mixed: max R-hat {:.3} > {RHAT_WARN}",
                    stats.max_rhat()
                );
            }
        }
        Err(e) => log::debug!("no run summary: {e}"),
    }
}

fn log_acceptance(chains: &[Chain]) {
    for (i, chain) in chains.iter().enumerate() {
        log::debug!(
            "chain {i} terminated with {} states, acceptance rate {:.3}",
            chain.len(),
            chain.acceptance_rate()
        );
    }
}
