//! Error types for belltest-stats.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    /// The CH denominator is zero: no relevant single counts.
    #[error("CH denominator is zero (no singles with a setting-1 partner); statistic undefined")]
    NoSingles,

    /// Resampling needs at least one trial to draw from.
    #[error("no trials with both settings present")]
    EmptyInput,

    /// A requested resampling step has no iterations.
    #[error("{step} iterations must be > 0, got {got}")]
    InvalidIterations { step: &'static str, got: usize },

    #[error("thread count must be >= 1, got {0}")]
    InvalidThreads(usize),

    /// Diagnostics need a positive step or block size.
    #[error("{what} must be > 0")]
    InvalidStep { what: &'static str },

    #[error("block size {block} gives {blocks} complete block(s), need at least 2")]
    TooFewBlocks { block: usize, blocks: usize },

    /// A resampling worker panicked; no partial result is reported.
    #[error("resampling worker {worker} failed")]
    WorkerFailed { worker: usize },

    #[error(transparent)]
    Core(#[from] belltest_core::Error),
}

pub type Result<T> = std::result::Result<T, StatsError>;
