//! Parallel shuffle and bootstrap resampling of the CH statistic.
//!
//! Work is split across `jobs` scoped threads. Each worker owns a `StdRng`
//! seeded from a child of one root seed, so a fixed seed and job count give
//! identical results run after run. Workers share the input by reference and
//! hand back either a hit count or a vector of resampled statistics.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::ch::{ChInput, CountMatrix, row};
use crate::error::{Result, StatsError};

/// Default worker-thread cap.
pub const DEFAULT_THREADS: usize = 16;

// ---------------------------------------------------------------------------
// Plan and configuration
// ---------------------------------------------------------------------------

/// Which resampling steps to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resampling {
    #[default]
    None,
    Shuffle {
        iterations: usize,
    },
    Bootstrap {
        iterations: usize,
    },
    Both {
        shuffle: usize,
        bootstrap: usize,
    },
}

impl Resampling {
    /// Build a plan from two counts where 0 means "skip this step".
    pub fn from_counts(shuffle: usize, bootstrap: usize) -> Self {
        match (shuffle, bootstrap) {
            (0, 0) => Self::None,
            (n, 0) => Self::Shuffle { iterations: n },
            (0, n) => Self::Bootstrap { iterations: n },
            (s, b) => Self::Both {
                shuffle: s,
                bootstrap: b,
            },
        }
    }

    pub fn shuffle_iterations(&self) -> Option<usize> {
        match *self {
            Self::Shuffle { iterations } => Some(iterations),
            Self::Both { shuffle, .. } => Some(shuffle),
            _ => None,
        }
    }

    pub fn bootstrap_iterations(&self) -> Option<usize> {
        match *self {
            Self::Bootstrap { iterations } => Some(iterations),
            Self::Both { bootstrap, .. } => Some(bootstrap),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(0) = self.shuffle_iterations() {
            return Err(StatsError::InvalidIterations {
                step: "shuffle",
                got: 0,
            });
        }
        if let Some(0) = self.bootstrap_iterations() {
            return Err(StatsError::InvalidIterations {
                step: "bootstrap",
                got: 0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResampleConfig {
    pub plan: Resampling,
    /// Upper bound on worker threads; capped by available parallelism.
    pub threads: usize,
    /// Root seed; `None` draws one from OS entropy for each step.
    pub seed: Option<u64>,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            plan: Resampling::None,
            threads: DEFAULT_THREADS,
            seed: None,
        }
    }
}

impl ResampleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(StatsError::InvalidThreads(0));
        }
        self.plan.validate()
    }

    /// `max(1, min(threads, available_parallelism))`.
    pub fn jobs(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(self.threads);
        self.threads.min(cpus).max(1)
    }
}

/// Split `total` iterations into `jobs` shares: `base + (i < rem)`.
pub fn split_shares(total: usize, jobs: usize) -> Vec<usize> {
    let jobs = jobs.max(1);
    let (base, rem) = (total / jobs, total % jobs);
    (0..jobs).map(|i| base + usize::from(i < rem)).collect()
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Root seed that spawns independent child seeds by counter mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSequence {
    root: u64,
}

impl SeedSequence {
    /// Use `seed`, or draw a fresh root from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            root: seed.unwrap_or_else(rand::random),
        }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn child(&self, i: usize) -> u64 {
        splitmix64(self.root ^ splitmix64(i as u64 + 1))
    }

    pub fn spawn(&self, n: usize) -> Vec<u64> {
        (0..n).map(|i| self.child(i)).collect()
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShuffleOutcome {
    pub hits: u64,
    pub iterations: usize,
    /// `(hits + 1) / (iterations + 1)`.
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapOutcome {
    /// Resampled statistics in worker order, undefined draws left out.
    pub samples: Vec<f64>,
    /// Draws whose resampled singles sum was zero.
    pub undefined_draws: usize,
    /// 2.5th and 97.5th percentiles of `samples`; NaN if every draw was
    /// undefined.
    pub ci: (f64, f64),
}

impl BootstrapOutcome {
    pub fn draws(&self) -> usize {
        self.samples.len() + self.undefined_draws
    }
}

/// Output of the resampling driver.
///
/// Both steps draw from the same per-trial arrays as the point estimate, so
/// the shuffle p-value and the bootstrap interval are conditioned on the
/// observed data rather than independent of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResamplingResult {
    pub shuffle: Option<ShuffleOutcome>,
    pub bootstrap: Option<BootstrapOutcome>,
    pub jobs: usize,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run every step of the plan against `observed`, the point estimate.
pub fn run(input: &ChInput, observed: f64, cfg: &ResampleConfig) -> Result<ResamplingResult> {
    cfg.validate()?;
    let jobs = cfg.jobs();
    let mut result = ResamplingResult {
        jobs,
        ..Default::default()
    };
    if let Some(n) = cfg.plan.shuffle_iterations() {
        log::info!("running shuffle={n} permutations on {jobs} threads");
        result.shuffle = Some(shuffle_test(input, observed.abs(), n, jobs, cfg.seed)?);
    }
    if let Some(n) = cfg.plan.bootstrap_iterations() {
        log::info!("running bootstrap={n} samples on {jobs} threads");
        result.bootstrap = Some(bootstrap_ci(input, n, jobs, cfg.seed)?);
    }
    Ok(result)
}

/// Permutation test of Alice's settings against the observed `|S_ch|`.
pub fn shuffle_test(
    input: &ChInput,
    observed_abs: f64,
    iterations: usize,
    jobs: usize,
    seed: Option<u64>,
) -> Result<ShuffleOutcome> {
    if iterations == 0 {
        return Err(StatsError::InvalidIterations {
            step: "shuffle",
            got: 0,
        });
    }
    let seeds = SeedSequence::new(seed);
    log::debug!("shuffle root seed {}", seeds.root());
    let shares = split_shares(iterations, jobs);
    let parts = run_workers(&shares, &seeds.spawn(shares.len()), |n, s| {
        shuffle_worker(input, observed_abs, n, s)
    })?;
    let hits: u64 = parts.into_iter().sum();
    Ok(ShuffleOutcome {
        hits,
        iterations,
        p_value: (hits + 1) as f64 / (iterations + 1) as f64,
    })
}

/// Percentile bootstrap over trials drawn with replacement.
pub fn bootstrap_ci(
    input: &ChInput,
    iterations: usize,
    jobs: usize,
    seed: Option<u64>,
) -> Result<BootstrapOutcome> {
    if iterations == 0 {
        return Err(StatsError::InvalidIterations {
            step: "bootstrap",
            got: 0,
        });
    }
    if input.is_empty() {
        return Err(StatsError::EmptyInput);
    }
    let seeds = SeedSequence::new(seed);
    log::debug!("bootstrap root seed {}", seeds.root());
    let shares = split_shares(iterations, jobs);
    let parts = run_workers(&shares, &seeds.spawn(shares.len()), |n, s| {
        bootstrap_worker(input, n, s)
    })?;
    let draws: Vec<Option<f64>> = parts.into_iter().flatten().collect();
    let samples: Vec<f64> = draws.iter().flatten().copied().collect();
    let undefined_draws = draws.len() - samples.len();
    if undefined_draws > 0 {
        log::warn!(
            "bootstrap: {undefined_draws} of {iterations} draws had no singles and were dropped"
        );
    }
    let ci = (percentile(&samples, 2.5), percentile(&samples, 97.5));
    Ok(BootstrapOutcome {
        samples,
        undefined_draws,
        ci,
    })
}

/// Spawn one scoped thread per share and join them all; any panic fails the
/// whole step.
fn run_workers<T, F>(shares: &[usize], seeds: &[u64], work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, u64) -> T + Sync,
{
    let joined: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = shares
            .iter()
            .zip(seeds)
            .map(|(&n, &seed)| {
                let work = &work;
                s.spawn(move || work(n, seed))
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });
    joined
        .into_iter()
        .enumerate()
        .map(|(worker, r)| r.map_err(|_| StatsError::WorkerFailed { worker }))
        .collect()
}

fn shuffle_worker(input: &ChInput, observed_abs: f64, n: usize, seed: u64) -> u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut setting_a = input.setting_a.clone();
    let mut hits = 0;
    for _ in 0..n {
        setting_a.shuffle(&mut rng);
        let mut m = CountMatrix::default();
        for i in 0..input.len() {
            let Some(r) = row(setting_a[i], input.setting_b[i]) else {
                continue;
            };
            let (sa, sb, co) = input.flags(i);
            let cell = &mut m.cells[r];
            cell.singles_a += sa as u64;
            cell.singles_b += sb as u64;
            cell.coincidences += co as u64;
        }
        // a permutation with no singles scores 0
        if m.statistic().unwrap_or(0.0).abs() >= observed_abs {
            hits += 1;
        }
    }
    hits
}

fn bootstrap_worker(input: &ChInput, n: usize, seed: u64) -> Vec<Option<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = input.len();
    (0..n)
        .map(|_| {
            let mut m = CountMatrix::default();
            for _ in 0..len {
                m.add_trial(input, rng.random_range(0..len));
            }
            m.statistic()
        })
        .collect()
}

/// Percentile `q` (0..=100) with linear interpolation between order
/// statistics. NaN for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
