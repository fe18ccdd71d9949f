//! Error types for belltest-core.

use thiserror::Error;

use crate::record::Station;

/// Errors raised while decoding, calibrating or binning event streams.
///
/// Every variant is fatal for the stage that raised it: a wrong period or a
/// malformed record stream would make every downstream trial index
/// meaningless, so nothing is retried or patched up.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw stream length is not a whole number of records.
    #[error("record stream of {len} bytes is not a multiple of {record_size}-byte records")]
    RecordSizeMismatch { len: usize, record_size: usize },

    /// The most frequent reference channel is not the configured sync channel.
    #[error("{station}: most frequent reference channel is {found}, expected sync channel {expected}")]
    UnexpectedChannel {
        station: Station,
        found: u8,
        expected: u8,
    },

    /// Reference stream contains no events at all.
    #[error("{station}: reference stream is empty")]
    EmptyReference { station: Station },

    /// Fewer than two sync pulses on the sync channel.
    #[error("{station}: found {found} pulse(s) on sync channel {channel}, need at least 2")]
    NoSyncPulses {
        station: Station,
        channel: u8,
        found: usize,
    },

    /// Median sync period outside the plausible hardware range.
    #[error("{station}: median sync period {period} ticks outside plausible range [{min}, {max}]")]
    PeriodOutOfRange {
        station: Station,
        period: u64,
        min: u64,
        max: u64,
    },

    /// The two stations disagree on the period by more than one tick.
    #[error("sync period mismatch: alice {alice} ticks vs bob {bob} ticks (tolerance 1 tick)")]
    PeriodMismatch { alice: u64, bob: u64 },

    /// No sync pulse passed the phase test.
    #[error("{station}: no good sync pulses (phase tolerance {tolerance} ticks)")]
    NoGoodSync { station: Station, tolerance: u64 },

    /// Good-sync positions or timestamps are not strictly increasing.
    #[error("{station}: good-sync sequence not strictly ascending at entry {at}")]
    SyncNotAscending { station: Station, at: usize },

    /// A good-sync position points past the end of the stream.
    #[error("{station}: good-sync position {position} outside stream of {len} events")]
    SyncPositionOutOfRange {
        station: Station,
        position: usize,
        len: usize,
    },

    /// A sync timestamp from the table does not occur in the stream.
    #[error("{station}: sync tag {tag} not present in raw stream")]
    SyncTagNotFound { station: Station, tag: u64 },

    /// Sync metadata lacks a required field.
    #[error("sync table is missing required field `{0}`")]
    MissingField(&'static str),

    /// Phase-window radius outside (0, 0.5).
    #[error("phase-window radius {0} must lie strictly between 0 and 0.5")]
    InvalidRadius(f64),

    /// Any other configuration value out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Per-trial table violates its structural invariants.
    #[error("invalid trial table: {0}")]
    InvalidTrialTable(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
