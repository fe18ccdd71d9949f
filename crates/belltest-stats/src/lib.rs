//! CH/Eberhard inference for synchronized Bell-test trials.
//!
//! Computes the normalized CH violation `S_ch` with its one-sided normal
//! p-value and no-signaling diagnostics, then optionally assesses it by a
//! permutation (shuffle) test of Alice's settings and a percentile bootstrap
//! over trials. Resampling runs on scoped worker threads with explicitly
//! seeded RNGs.

pub mod ch;
pub mod diagnostics;
pub mod error;
pub mod report;
pub mod resample;

pub use ch::{ChInput, ChResult, CountMatrix, NoSignaling, QuadrantCounts, click_pattern, compute_ch};
pub use diagnostics::{BlockCovariance, CumulativePoint, block_covariance, cumulative_ch};
pub use error::{Result, StatsError};
pub use report::{ChReport, sci};
pub use resample::{
    BootstrapOutcome, ResampleConfig, Resampling, ResamplingResult, SeedSequence, ShuffleOutcome,
    bootstrap_ci, percentile, shuffle_test, split_shares,
};
