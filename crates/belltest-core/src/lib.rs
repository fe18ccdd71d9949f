//! # belltest-core
//!
//! **From raw time tags to per-trial Bell-test outcomes.**
//!
//! `belltest-core` turns the 24-byte time-tag streams recorded independently
//! at two stations (Alice and Bob) into a table of synchronized trials, each
//! carrying a detector click mask and a measurement setting per side.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use belltest_core::{AnalysisConfig, Station, read_records, recover_clock};
//!
//! let cfg = AnalysisConfig::default();
//! let a_ref = read_records(Path::new("alice_find.dat"), Station::Alice).unwrap();
//! let a_raw = read_records(Path::new("alice_raw.dat"), Station::Alice).unwrap();
//! let b_ref = read_records(Path::new("bob_find.dat"), Station::Bob).unwrap();
//! let b_raw = read_records(Path::new("bob_raw.dat"), Station::Bob).unwrap();
//!
//! let clock = recover_clock(&a_ref, &a_raw, &b_ref, &b_raw, &cfg).unwrap();
//! println!("period = {} ticks", clock.period_ticks);
//! ```
//!
//! ## Pipeline
//!
//! Raw records → clock recovery → trial assignment → outcome aggregation
//!
//! - **Clock recovery** ([`sync`]): pick the GPS sync channel, estimate its
//!   period and keep only pulses in phase with the reference capture.
//! - **Trial assignment** ([`trials`]): every good sync pulse opens a trial;
//!   events get a pulse slot `floor((t - t_sync) / period)`.
//! - **Outcome aggregation** ([`outcomes`]): clicks inside the phase window
//!   become a 16-bit mask; the first RNG event fixes the setting.
//!
//! Every stage is a pure function of its inputs. Failures are reported as
//! [`Error`] values naming the failed check; nothing is silently repaired.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod outcomes;
pub mod record;
pub mod sync;
pub mod trials;

pub use config::{AnalysisConfig, ChannelMap, validate_radius};
pub use diagnostics::{
    DriftPoint, MaskCount, MaskCoverage, PeriodJitter, mask_coverage, peak_drift, period_jitter,
};
pub use error::{Error, Result};
pub use outcomes::{
    Aggregation, AggregationStats, SideColumns, StationAggregate, TrialTable, aggregate,
    phase_peak,
};
pub use record::{
    RECORD_SIZE, RawEvent, Station, TICK_PS, decode_records, encode_records, read_records,
};
pub use sync::{
    StationClock, StationSync, SyncEstimate, SyncTable, recover_clock, recover_station_clock,
};
pub use trials::{AssignedEvents, TrialPartition, assign_raw_bytes, assign_trials};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
