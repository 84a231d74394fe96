use chainmix::config::SamplerConfig;
use chainmix::core::{Chain, ChainCollection, ChainRunner};
use chainmix::distributions::{FullConditionals, Gaussian, GaussianRandomWalk};
use chainmix::gibbs::GibbsSampler;
use chainmix::metropolis_hastings::MetropolisHastings;
use chainmix::stats::{split_ess, split_rhat};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

fn bench_metropolis(c: &mut Criterion) {
    c.bench_function("mh 4 chains x 2000 iterations, 10d", |b| {
        b.iter(|| {
            let target = Gaussian::new(vec![0.0; 10], 1.0).unwrap();
            let proposal = GaussianRandomWalk::new(0.7).unwrap();
            let config = SamplerConfig::new(4, 2_000)
                .initial_state(&[1.0; 10])
                .seed(42);
            let mut mh = MetropolisHastings::new(target, proposal, config).unwrap();
            black_box(mh.run().unwrap())
        })
    });
}

fn bench_gibbs(c: &mut Criterion) {
    c.bench_function("gibbs 4 chains x 2000 sweeps, 2d", |b| {
        b.iter(|| {
            let conditionals = FullConditionals::new()
                .with(|given, rng| 0.5 * given[1] + rng.sample::<f64, _>(StandardNormal))
                .with(|given, rng| 0.5 * given[0] + rng.sample::<f64, _>(StandardNormal));
            let config = SamplerConfig::new(4, 2_000)
                .initial_state(&[0.0, 0.0])
                .seed(42);
            let mut gibbs = GibbsSampler::new(conditionals, config).unwrap();
            black_box(gibbs.run().unwrap())
        })
    });
}

fn bench_diagnostics(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(42);
    let chains: Vec<Chain> = (0..4)
        .map(|_| {
            let draws: Vec<Vec<f64>> = (0..10_000)
                .map(|_| (0..5).map(|_| rng.sample(StandardNormal)).collect())
                .collect();
            Chain::from_draws(&draws).unwrap()
        })
        .collect();
    let chains = ChainCollection::new(chains).unwrap();

    c.bench_function("split_rhat 4 x 10000 x 5", |b| {
        b.iter(|| black_box(split_rhat(&chains).unwrap()))
    });
    c.bench_function("split_ess 4 x 10000 x 5", |b| {
        b.iter(|| black_box(split_ess(&chains).unwrap()))
    });
}

criterion_group!(benches, bench_metropolis, bench_gibbs, bench_diagnostics);
criterion_main!(benches);
