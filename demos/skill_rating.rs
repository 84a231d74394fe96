//! Skill ratings for a card game, fit with Metropolis-Hastings.
//!
//! Each player `i` has a latent skill `s_i ~ N(0, 1)`. Player `w` beats player `l` with
//! probability `sigmoid(s_w - s_l)`. Four random-walk chains sample the posterior over all
//! skills, and the run summary reports split R-hat and ESS per player.

use chainmix::config::SamplerConfig;
use chainmix::core::ChainRunner;
use chainmix::distributions::{GaussianRandomWalk, Target};
use chainmix::metropolis_hastings::MetropolisHastings;
use chainmix::stats::RunStats;
use std::error::Error;

const PLAYERS: [&str; 4] = ["Ada", "Brook", "Cyd", "Dale"];

/// (winner, loser) for every game played.
const GAMES: [(usize, usize); 14] = [
    (0, 1),
    (0, 2),
    (0, 3),
    (0, 1),
    (1, 0),
    (1, 2),
    (1, 3),
    (2, 3),
    (2, 3),
    (3, 2),
    (0, 3),
    (1, 3),
    (0, 2),
    (2, 1),
];

struct SkillRating {
    games: Vec<(usize, usize)>,
    prior_std: f64,
}

impl Target for SkillRating {
    fn log_density(&self, skills: &[f64]) -> f64 {
        let prior: f64 = skills
            .iter()
            .map(|s| -0.5 * (s / self.prior_std).powi(2))
            .sum();
        // log sigmoid(d) = -ln(1 + e^-d)
        let likelihood: f64 = self
            .games
            .iter()
            .map(|&(w, l)| -(-(skills[w] - skills[l])).exp().ln_1p())
            .sum();
        prior + likelihood
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    const ITERATIONS: usize = 20_000;
    const BURNIN: usize = 2_000;
    const N_CHAINS: usize = 4;
    const SEED: u64 = 42;

    let target = SkillRating {
        games: GAMES.to_vec(),
        prior_std: 1.0,
    };
    let proposal = GaussianRandomWalk::new(0.5)?;
    let config = SamplerConfig::new(N_CHAINS, ITERATIONS)
        .initial_state(&[0.0; PLAYERS.len()])
        .seed(SEED);

    let mut mh = MetropolisHastings::new(target, proposal, config)?;
    let chains = mh.run_progress()?.discard(BURNIN)?;

    let means = chains.parameter_means();
    let mut ranking: Vec<(&str, f64)> = PLAYERS.iter().copied().zip(means.iter().copied()).collect();
    ranking.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("Posterior mean skill:");
    for (name, skill) in &ranking {
        println!("  {name:<6} {skill:+.3}");
    }
    println!("{}", RunStats::new(&chains)?);
    Ok(())
}
