//! Convergence diagnostics: split-chain potential scale reduction (R-hat) and effective
//! sample size, plus a run summary combining both.

use std::fmt;

use ndarray::{concatenate, prelude::*};
use ndarray_stats::QuantileExt;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::core::ChainCollection;
use crate::error::{McmcError, Result};

/// Split R-hat for one parameter, with the variance components it was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticResult {
    /// Mean of the sub-chain sample variances (W).
    pub within: f64,
    /// Between-chain variance (B), scaled by the sub-chain length.
    pub between: f64,
    /// Pooled posterior variance estimate `((n-1)/n) W + B/n`.
    pub var_hat: f64,
    /// `sqrt(var_hat / W)`. Values near 1 indicate the chains have mixed.
    pub rhat: f64,
}

/// Computes split R-hat for every parameter of `chains`.
///
/// Each chain is cut into two contiguous halves, giving `2k` sub-chains of length
/// `n = n_total / 2`; with an odd `n_total` the final draw is dropped. Within-chain
/// variances use the `n - 1` divisor.
///
/// # Errors
///
/// - [`McmcError::InvalidInput`] if the chains have unequal lengths or fewer than 4 draws.
/// - [`McmcError::NumericalError`] if a parameter has no within-chain variation (W == 0),
///   for which R-hat is undefined.
///
/// # Examples
///
/// ```rust
/// use chainmix::core::{Chain, ChainCollection};
/// use chainmix::stats::split_rhat;
///
/// let draws: Vec<Vec<f64>> = (1..=10).map(|x| vec![x as f64]).collect();
/// let chains = ChainCollection::new(vec![Chain::from_draws(&draws).unwrap()]).unwrap();
/// let result = split_rhat(&chains).unwrap();
/// assert!((result[0].within - 2.5).abs() < 1e-12);
/// assert!((result[0].between - 62.5).abs() < 1e-12);
/// ```
pub fn split_rhat(chains: &ChainCollection) -> Result<Vec<DiagnosticResult>> {
    let sample = chains.to_array()?;
    split_rhat_view(sample.view())
}

/// [`split_rhat`] on a raw `(chains, draws, parameters)` array.
///
/// # Errors
///
/// As [`split_rhat`]; additionally [`McmcError::InvalidInput`] for values not representable
/// as `f64`.
pub fn split_rhat_view<T>(sample: ArrayView3<T>) -> Result<Vec<DiagnosticResult>>
where
    T: ToPrimitive + Clone,
{
    let splitted = splitcat(sample)?;
    withinvar(splitted.view())
}

/// Split-chain effective sample size for every parameter of `chains`, following Stan's
/// estimator: FFT autocovariances of the sub-chains combined with the R-hat variance
/// components, truncated with Geyer's initial monotone sequence.
///
/// # Errors
///
/// As [`split_rhat`].
pub fn split_ess(chains: &ChainCollection) -> Result<Array1<f64>> {
    let sample = chains.to_array()?;
    let splitted = splitcat(sample.view())?;
    let diagnostics = withinvar(splitted.view())?;
    Ok(ess(splitted.view(), &diagnostics))
}

/// Takes a (chains, draws, parameters) view and returns a
/// (2 * chains, draws / 2, parameters) array by splitting each chain in half.
fn splitcat<T>(sample: ArrayView3<T>) -> Result<Array3<f64>>
where
    T: ToPrimitive + Clone,
{
    let (n_chains, n_total, n_params) = sample.dim();
    if n_chains == 0 || n_params == 0 {
        return Err(McmcError::input("need at least one chain and one parameter"));
    }
    if n_total < 4 {
        return Err(McmcError::input(format!(
            "split R-hat needs at least 4 draws per chain, got {n_total}"
        )));
    }
    if n_total % 2 == 1 {
        log::warn!("odd chain length {n_total}; dropping the final draw before splitting");
    }
    let half = n_total / 2;

    let mut converted = Array3::<f64>::zeros((n_chains, 2 * half, n_params));
    for ((c, i, j), out) in converted.indexed_iter_mut() {
        *out = sample[[c, i, j]]
            .to_f64()
            .ok_or_else(|| McmcError::input("draw is not representable as f64"))?;
    }

    let first = converted.slice(s![.., ..half, ..]);
    let second = converted.slice(s![.., half.., ..]);
    concatenate(Axis(0), &[first, second]).map_err(|e| McmcError::input(e.to_string()))
}

fn withinvar(sample: ArrayView3<f64>) -> Result<Vec<DiagnosticResult>> {
    let (m, n, p) = sample.dim();
    let (m_f, n_f) = (m as f64, n as f64);

    (0..p)
        .into_par_iter()
        .map(|param_idx| {
            let data_p = sample.index_axis(Axis(2), param_idx); // (m, n)

            let chain_means = data_p
                .mean_axis(Axis(1))
                .ok_or_else(|| McmcError::input("empty sub-chain"))?;
            let grand_mean = chain_means.sum() / m_f;
            let between =
                n_f / (m_f - 1.0) * chain_means.mapv(|x| (x - grand_mean).powi(2)).sum();
            let within = data_p.var_axis(Axis(1), 1.0).sum() / m_f;

            if within == 0.0 || !within.is_finite() {
                return Err(McmcError::numerical(format!(
                    "R-hat is undefined for parameter {param_idx}: within-chain variance is {within}"
                )));
            }

            let var_hat = (n_f - 1.0) / n_f * within + between / n_f;
            Ok(DiagnosticResult {
                within,
                between,
                var_hat,
                rhat: (var_hat / within).sqrt(),
            })
        })
        .collect()
}

/// Computes the Effective Sample Size for each parameter of a split sample.
///
/// # References
/// - Stan Reference Manual, Effective Sample Size
fn ess(sample: ArrayView3<f64>, diagnostics: &[DiagnosticResult]) -> Array1<f64> {
    let (m, n, _) = sample.dim();
    let total = (m * n) as f64;

    let ess: Vec<f64> = diagnostics
        .par_iter()
        .enumerate()
        .map(|(param_idx, diag)| {
            let data_p = sample.index_axis(Axis(2), param_idx);
            let mut mean_acov = vec![0.0; n];
            for chain in data_p.rows() {
                let series: Vec<f64> = chain.to_vec();
                for (acc, a) in mean_acov.iter_mut().zip(autocov(&series)) {
                    *acc += a / m as f64;
                }
            }

            let rho = |t: usize| 1.0 - (diag.within - mean_acov[t]) / diag.var_hat;

            let mut rho_hat = vec![0.0; n + 2];
            let mut rho_even = 1.0;
            let mut rho_odd = rho(1);
            rho_hat[0] = rho_even;
            rho_hat[1] = rho_odd;

            let mut s = 1;
            while s + 4 < n && rho_even + rho_odd > 0.0 {
                rho_even = rho(s + 1);
                rho_odd = rho(s + 2);
                if rho_even + rho_odd >= 0.0 {
                    rho_hat[s + 1] = rho_even;
                    rho_hat[s + 2] = rho_odd;
                }
                s += 2;
            }
            let max_s = s;
            if rho_even > 0.0 {
                rho_hat[max_s + 1] = rho_even;
            }

            // Initial positive sequence -> initial monotone sequence.
            let mut s = 1;
            while s + 3 <= max_s {
                if rho_hat[s + 1] + rho_hat[s + 2] > rho_hat[s - 1] + rho_hat[s] {
                    rho_hat[s + 1] = (rho_hat[s - 1] + rho_hat[s]) / 2.0;
                    rho_hat[s + 2] = rho_hat[s + 1];
                }
                s += 2;
            }

            let tau = -1.0 + 2.0 * rho_hat[..max_s].iter().sum::<f64>() + rho_hat[max_s + 1];
            total / tau.max(1.0 / total.log10())
        })
        .collect();
    Array1::from_vec(ess)
}

/// Biased (divide-by-n) autocovariance of `series` at every lag.
fn autocov(series: &[f64]) -> Vec<f64> {
    if series.len() <= 100 {
        autocov_bf(series)
    } else {
        autocov_fft(series)
    }
}

/// FFT autocovariance, zero-padded to avoid wrap-around. `rustfft` doesn't normalize, so
/// the `1 / n_padded` factor is applied explicitly.
fn autocov_fft(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    let mean = series.iter().sum::<f64>() / n as f64;
    let n_padded = (2 * n - 1).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);

    let mut x: Vec<Complex<f64>> = series
        .iter()
        .map(|xi| Complex::new(xi - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n_padded)
        .collect();
    fft.process(&mut x);
    x.iter_mut().for_each(|xi| *xi *= xi.conj());
    ffti.process(&mut x);
    x.iter()
        .take(n)
        .map(|xi| xi.re / n_padded as f64 / n as f64)
        .collect()
}

fn autocov_bf(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    let mean = series.iter().sum::<f64>() / n as f64;
    let centred: Vec<f64> = series.iter().map(|x| x - mean).collect();
    (0..n)
        .map(|lag| {
            (0..n - lag)
                .map(|t| centred[t] * centred[t + lag])
                .sum::<f64>()
                / n as f64
        })
        .collect()
}

/// Diagnostics summary for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub rhat: Vec<DiagnosticResult>,
    pub ess: Array1<f64>,
    pub acceptance_rates: Vec<f64>,
}

impl RunStats {
    /// # Errors
    ///
    /// As [`split_rhat`].
    pub fn new(chains: &ChainCollection) -> Result<Self> {
        let sample = chains.to_array()?;
        let splitted = splitcat(sample.view())?;
        let rhat = withinvar(splitted.view())?;
        let ess = ess(splitted.view(), &rhat);
        Ok(Self {
            rhat,
            ess,
            acceptance_rates: chains.acceptance_rates(),
        })
    }

    /// Largest R-hat across parameters.
    pub fn max_rhat(&self) -> f64 {
        let rhats = Array1::from_iter(self.rhat.iter().map(|d| d.rhat));
        *rhats.max_skipnan()
    }

    /// Smallest effective sample size across parameters.
    pub fn min_ess(&self) -> f64 {
        *self.ess.min_skipnan()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean_accept = self.acceptance_rates.iter().sum::<f64>()
            / self.acceptance_rates.len().max(1) as f64;
        writeln!(
            f,
            "max R-hat: {:.3}, min ESS: {:.1}, p(accept): {:.3}",
            self.max_rhat(),
            self.min_ess(),
            mean_accept
        )?;
        for (j, (d, ess)) in self.rhat.iter().zip(&self.ess).enumerate() {
            writeln!(
                f,
                "  param {j}: R-hat {:.3} (W {:.4}, B {:.4}), ESS {:.1}",
                d.rhat, d.within, d.between, ess
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Chain;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn collection<S: AsRef<[f64]>>(chains: &[S]) -> ChainCollection {
        let chains = chains
            .iter()
            .map(|values| {
                let draws: Vec<Vec<f64>> = values.as_ref().iter().map(|x| vec![*x]).collect();
                Chain::from_draws(&draws).unwrap()
            })
            .collect();
        ChainCollection::new(chains).unwrap()
    }

    fn iid_normal(rng: &mut SmallRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.sample(StandardNormal)).collect()
    }

    #[test]
    fn split_rhat_of_one_to_ten() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let result = split_rhat(&collection(&[values])).unwrap();
        // halves [1..5] and [6..10]: means 3 and 8, sample variances 2.5
        let d = result[0];
        assert_abs_diff_eq!(d.within, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d.between, 62.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d.var_hat, 14.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d.rhat, 5.8f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn split_rhat_two_chains_by_hand() {
        // sub-chains [1,3], [2,4], [5,5.5], [6,5]: n = 2, m = 4
        // means 2, 3, 5.25, 5.5; grand mean 3.9375
        // variances 2, 2, 0.125, 0.5 -> W = 1.15625
        let result = split_rhat(&collection(&[
            vec![1.0, 3.0, 2.0, 4.0],
            vec![5.0, 5.5, 6.0, 5.0],
        ]))
        .unwrap();
        let d = result[0];
        let means = [2.0, 5.25, 3.0, 5.5];
        let grand: f64 = means.iter().sum::<f64>() / 4.0;
        let between = 2.0 / 3.0 * means.iter().map(|x| (x - grand).powi(2)).sum::<f64>();
        assert_abs_diff_eq!(d.within, 1.15625, epsilon = 1e-12);
        assert_abs_diff_eq!(d.between, between, epsilon = 1e-12);
        assert_abs_diff_eq!(d.var_hat, 0.5 * 1.15625 + between / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn odd_length_drops_final_draw() {
        let even: Vec<f64> = (1..=10).map(f64::from).collect();
        let mut odd = even.clone();
        odd.push(1_000.0);
        let a = split_rhat(&collection(&[even])).unwrap();
        let b = split_rhat(&collection(&[odd])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_inputs() {
        let unequal = collection(&[vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0, 3.0, 4.0, 5.0]]);
        assert!(matches!(
            split_rhat(&unequal),
            Err(McmcError::InvalidInput(_))
        ));
        let short = collection(&[vec![1.0, 2.0, 3.0]]);
        assert!(matches!(split_rhat(&short), Err(McmcError::InvalidInput(_))));
        let constant = collection(&[vec![2.0; 8], vec![2.0; 8]]);
        assert!(matches!(
            split_rhat(&constant),
            Err(McmcError::NumericalError(_))
        ));
    }

    #[test]
    fn split_rhat_view_accepts_other_numeric_types() {
        let sample = Array3::from_shape_fn((2, 6, 1), |(c, i, _)| (c * 3 + i % 4) as i32);
        let as_int = split_rhat_view(sample.view()).unwrap();
        let as_float = split_rhat_view(sample.mapv(f64::from).view()).unwrap();
        assert_eq!(as_int, as_float);
    }

    #[test]
    fn rhat_near_one_for_iid_chains() {
        let mut rng = SmallRng::seed_from_u64(42);
        let a = iid_normal(&mut rng, 2_000);
        let b = iid_normal(&mut rng, 2_000);
        let result = split_rhat(&collection(&[a, b])).unwrap();
        assert!((result[0].rhat - 1.0).abs() < 0.02, "{:?}", result[0]);
    }

    #[test]
    fn fft_and_brute_force_autocov_agree() {
        let mut rng = SmallRng::seed_from_u64(1);
        let series = iid_normal(&mut rng, 257);
        let fft = autocov_fft(&series);
        let bf = autocov_bf(&series);
        for (x, y) in fft.iter().zip(&bf) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }
    }

    #[test]
    fn ess_close_to_draw_count_for_iid() {
        let mut rng = SmallRng::seed_from_u64(7);
        let chains: Vec<Vec<f64>> = (0..4).map(|_| iid_normal(&mut rng, 1_000)).collect();
        let ess = split_ess(&collection(&chains)).unwrap();
        assert!(ess[0] > 3_000.0 && ess[0] < 5_500.0, "ESS {}", ess[0]);
    }

    #[test]
    fn ess_reflects_autocorrelation() {
        let phi: f64 = 0.9;
        let mut rng = SmallRng::seed_from_u64(9);
        let chains: Vec<Vec<f64>> = (0..4)
            .map(|_| {
                let mut x: f64 = rng.sample::<f64, _>(StandardNormal) / (1.0 - phi * phi).sqrt();
                (0..10_000)
                    .map(|_| {
                        x = phi * x + rng.sample::<f64, _>(StandardNormal);
                        x
                    })
                    .collect()
            })
            .collect();
        let ess = split_ess(&collection(&chains)).unwrap()[0];
        let expected = 40_000.0 * (1.0 - phi) / (1.0 + phi);
        assert!(
            ess > 0.5 * expected && ess < 1.5 * expected,
            "ESS {ess}, expected about {expected}"
        );
    }

    #[test]
    fn run_stats_summary() {
        let mut rng = SmallRng::seed_from_u64(3);
        let a = iid_normal(&mut rng, 500);
        let b = iid_normal(&mut rng, 500);
        let stats = RunStats::new(&collection(&[a, b])).unwrap();
        assert_eq!(stats.rhat.len(), 1);
        assert_eq!(stats.max_rhat(), stats.rhat[0].rhat);
        assert_eq!(stats.min_ess(), stats.ess[0]);
        assert!(stats.to_string().contains("max R-hat"));
    }
}
