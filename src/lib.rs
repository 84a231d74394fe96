//! # chainmix
//!
//! Markov chain Monte Carlo sampling with Metropolis-Hastings and systematic-scan Gibbs
//! samplers, parallel multi-chain execution, and split-chain convergence diagnostics.
//!
//! ```rust
//! use chainmix::{ChainRunner, GaussianRandomWalk, Gaussian, MetropolisHastings, SamplerConfig};
//! use chainmix::stats::split_rhat;
//!
//! let target = Gaussian::new(vec![0.0], 1.0).unwrap();
//! let proposal = GaussianRandomWalk::new(1.5).unwrap();
//! let config = SamplerConfig::new(4, 1_000).initial_state(&[3.0]).seed(7);
//! let mut sampler = MetropolisHastings::new(target, proposal, config).unwrap();
//!
//! let chains = sampler.run().unwrap().discard(200).unwrap();
//! let rhat = split_rhat(&chains).unwrap();
//! assert!(rhat[0].rhat < 1.1);
//! ```

pub mod config;
pub mod core;
pub mod distributions;
pub mod error;
pub mod gibbs;
pub mod metropolis_hastings;
pub mod stats;

pub use crate::config::SamplerConfig;
pub use crate::core::{Chain, ChainCollection, ChainRunner, MarkovChain, StopHandle};
pub use crate::distributions::{
    Conditional, DensityFn, FullConditionals, Gaussian, GaussianMixture, GaussianRandomWalk,
    IndependentGaussian, LogNormalRandomWalk, Proposal, Target, Uniform, UniformRandomWalk,
};
pub use crate::error::{McmcError, Result};
pub use crate::gibbs::GibbsSampler;
pub use crate::metropolis_hastings::MetropolisHastings;
pub use crate::stats::{split_ess, split_rhat, DiagnosticResult, RunStats};
