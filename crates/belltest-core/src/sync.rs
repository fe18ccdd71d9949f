//! GPS-sync clock recovery.
//!
//! A *good* sync pulse is one whose phase relative to the first pulse of the
//! short find-sync (reference) capture is within a few ticks of a whole
//! number of periods:
//!
//! ```text
//! phase = (t - phi0) mod period      good  <=>  phase <= tol  or  phase >= period - tol
//! ```
//!
//! That leaves exactly one GPS pulse, hence one trial, per period. Both
//! stations are calibrated independently and must agree on the period to
//! within one tick before their estimates are merged.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::record::{RawEvent, Station};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Calibration of a single station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationClock {
    pub station: Station,
    pub sync_channel: u8,
    /// Median inter-pulse period of the production stream.
    pub period_ticks: u64,
    /// First sync timestamp of the reference capture.
    pub phi0: u64,
    /// Number of sync-channel pulses examined.
    pub candidates: usize,
    pub good: StationSync,
}

/// Good-sync pulses of one station, as stream positions and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationSync {
    pub positions: Vec<usize>,
    pub tags: Vec<u64>,
}

impl StationSync {
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Check both sequences are strictly increasing and equally long.
    pub fn validate(&self, station: Station) -> Result<()> {
        if self.positions.len() != self.tags.len() {
            return Err(Error::InvalidConfig(format!(
                "{station}: {} sync positions but {} sync tags",
                self.positions.len(),
                self.tags.len()
            )));
        }
        if let Some(at) = first_non_ascending(&self.positions) {
            return Err(Error::SyncNotAscending { station, at });
        }
        if let Some(at) = first_non_ascending(&self.tags) {
            return Err(Error::SyncNotAscending { station, at });
        }
        Ok(())
    }
}

/// Shared clock of both stations.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEstimate {
    pub period_ticks: u64,
    pub tolerance_ticks: u64,
    pub pulses_per_trial: u32,
    pub alice: StationSync,
    pub bob: StationSync,
}

impl SyncEstimate {
    pub fn station(&self, station: Station) -> &StationSync {
        match station {
            Station::Alice => &self.alice,
            Station::Bob => &self.bob,
        }
    }

    /// Serializable form carrying both positions and timestamps.
    pub fn to_table(&self) -> SyncTable {
        SyncTable {
            delta_ticks: self.period_ticks,
            pk: self.pulses_per_trial,
            alice_sync_idx: Some(self.alice.positions.clone()),
            alice_sync_tag: Some(self.alice.tags.clone()),
            bob_sync_idx: Some(self.bob.positions.clone()),
            bob_sync_tag: Some(self.bob.tags.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Most frequent channel; ties resolve to the lowest channel id.
pub fn most_frequent_channel(events: &[RawEvent]) -> Option<u8> {
    if events.is_empty() {
        return None;
    }
    let mut hist = [0usize; 256];
    for ev in events {
        hist[ev.channel as usize] += 1;
    }
    let mut best = 0usize;
    for ch in 1..256 {
        if hist[ch] > hist[best] {
            best = ch;
        }
    }
    Some(best as u8)
}

/// Median of consecutive differences, truncated to whole ticks.
///
/// Returns `None` with fewer than two timestamps.
pub fn median_period(tags: &[u64]) -> Option<u64> {
    if tags.len() < 2 {
        return None;
    }
    let mut diffs: Vec<u64> = tags.windows(2).map(|w| w[1].saturating_sub(w[0])).collect();
    let n = diffs.len();
    let mid = n / 2;
    let (_, upper, _) = diffs.select_nth_unstable(mid);
    let upper = *upper;
    if n % 2 == 1 {
        return Some(upper);
    }
    let lower = *diffs[..mid].iter().max()?;
    Some(((lower as u128 + upper as u128) / 2) as u64)
}

/// Phase of `t` relative to `phi0`, in `[0, period)`.
pub fn sync_phase(t: u64, phi0: u64, period: u64) -> u64 {
    (t as i128 - phi0 as i128).rem_euclid(period as i128) as u64
}

/// True when a phase sits within `tol` of 0 or of `period`.
pub fn is_good_phase(phase: u64, period: u64, tol: u64) -> bool {
    phase <= tol || phase >= period.saturating_sub(tol)
}

/// Calibrate one station from its reference and production streams.
pub fn recover_station_clock(
    station: Station,
    reference: &[RawEvent],
    production: &[RawEvent],
    cfg: &AnalysisConfig,
) -> Result<StationClock> {
    let expected = cfg.channels.sync;
    let sync_channel =
        most_frequent_channel(reference).ok_or(Error::EmptyReference { station })?;
    log::info!("{station}: chosen sync channel = {sync_channel}");
    if sync_channel != expected {
        return Err(Error::UnexpectedChannel {
            station,
            found: sync_channel,
            expected,
        });
    }

    let (positions, tags): (Vec<usize>, Vec<u64>) = production
        .iter()
        .enumerate()
        .filter(|(_, ev)| ev.channel == sync_channel)
        .map(|(i, ev)| (i, ev.timestamp))
        .unzip();
    let period = median_period(&tags).ok_or(Error::NoSyncPulses {
        station,
        channel: sync_channel,
        found: tags.len(),
    })?;
    log::info!("{station}: period (median) = {period} ticks");

    let (min, max) = cfg.period_range;
    if period < min || period > max {
        return Err(Error::PeriodOutOfRange {
            station,
            period,
            min,
            max,
        });
    }

    // reference has at least one event on the sync channel: it is the mode
    let phi0 = reference
        .iter()
        .find(|ev| ev.channel == sync_channel)
        .map(|ev| ev.timestamp)
        .ok_or(Error::EmptyReference { station })?;

    let tol = cfg.phase_tolerance_ticks;
    let mut good = StationSync::default();
    for (&pos, &tag) in positions.iter().zip(&tags) {
        if is_good_phase(sync_phase(tag, phi0, period), period, tol) {
            good.positions.push(pos);
            good.tags.push(tag);
        }
    }
    log::info!(
        "{station}: good-sync in raw: {} of {} sync pulses",
        good.len(),
        tags.len()
    );

    Ok(StationClock {
        station,
        sync_channel,
        period_ticks: period,
        phi0,
        candidates: tags.len(),
        good,
    })
}

/// Calibrate both stations and merge them into one shared clock.
pub fn recover_clock(
    alice_reference: &[RawEvent],
    alice_production: &[RawEvent],
    bob_reference: &[RawEvent],
    bob_production: &[RawEvent],
    cfg: &AnalysisConfig,
) -> Result<SyncEstimate> {
    cfg.validate()?;
    let alice = recover_station_clock(Station::Alice, alice_reference, alice_production, cfg)?;
    let bob = recover_station_clock(Station::Bob, bob_reference, bob_production, cfg)?;
    merge_clocks(alice, bob, cfg)
}

/// Combine two independently calibrated stations.
pub fn merge_clocks(
    alice: StationClock,
    bob: StationClock,
    cfg: &AnalysisConfig,
) -> Result<SyncEstimate> {
    let tolerance = cfg.phase_tolerance_ticks;
    for clock in [&alice, &bob] {
        if clock.good.is_empty() {
            return Err(Error::NoGoodSync {
                station: clock.station,
                tolerance,
            });
        }
    }
    if alice.period_ticks.abs_diff(bob.period_ticks) > 1 {
        return Err(Error::PeriodMismatch {
            alice: alice.period_ticks,
            bob: bob.period_ticks,
        });
    }
    let period_ticks = round_half_even_mean(alice.period_ticks, bob.period_ticks);
    log::info!(
        "average period = {period_ticks} ticks | pk = {}",
        cfg.pulses_per_trial
    );
    Ok(SyncEstimate {
        period_ticks,
        tolerance_ticks: tolerance,
        pulses_per_trial: cfg.pulses_per_trial,
        alice: alice.good,
        bob: bob.good,
    })
}

/// `round(0.5 * (a + b))` with ties going to the even neighbour.
fn round_half_even_mean(a: u64, b: u64) -> u64 {
    let sum = a as u128 + b as u128;
    let half = (sum / 2) as u64;
    if sum % 2 == 0 || half % 2 == 0 {
        half
    } else {
        half + 1
    }
}

fn first_non_ascending<T: PartialOrd>(seq: &[T]) -> Option<usize> {
    seq.windows(2).position(|w| w[1] <= w[0]).map(|i| i + 1)
}

// ---------------------------------------------------------------------------
// Sync table (JSON)
// ---------------------------------------------------------------------------

/// Persisted good-sync table.
///
/// Either the position (`*_sync_idx`) or timestamp (`*_sync_tag`) form must
/// be present for each station; timestamps are preferred when both are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTable {
    pub delta_ticks: u64,
    pub pk: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alice_sync_idx: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alice_sync_tag: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bob_sync_idx: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bob_sync_tag: Option<Vec<u64>>,
}

#[derive(Deserialize)]
struct SyncTableFile {
    delta_ticks: Option<u64>,
    pk: Option<u32>,
    alice_sync_idx: Option<Vec<usize>>,
    alice_sync_tag: Option<Vec<u64>>,
    bob_sync_idx: Option<Vec<usize>>,
    bob_sync_tag: Option<Vec<u64>>,
}

impl SyncTable {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: SyncTableFile = serde_json::from_str(text)?;
        let table = Self {
            delta_ticks: raw.delta_ticks.ok_or(Error::MissingField("delta_ticks"))?,
            pk: raw.pk.ok_or(Error::MissingField("pk"))?,
            alice_sync_idx: raw.alice_sync_idx,
            alice_sync_tag: raw.alice_sync_tag,
            bob_sync_idx: raw.bob_sync_idx,
            bob_sync_tag: raw.bob_sync_tag,
        };
        if table.alice_sync_idx.is_none() && table.alice_sync_tag.is_none() {
            return Err(Error::MissingField("alice_sync_tag"));
        }
        if table.bob_sync_idx.is_none() && table.bob_sync_tag.is_none() {
            return Err(Error::MissingField("bob_sync_tag"));
        }
        Ok(table)
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Range checks mirroring the calibration stage.
    pub fn validate(&self, cfg: &AnalysisConfig) -> Result<()> {
        let (min, max) = cfg.period_range;
        if self.delta_ticks < min || self.delta_ticks > max {
            return Err(Error::InvalidConfig(format!(
                "delta_ticks {} outside plausible range [{min}, {max}]",
                self.delta_ticks
            )));
        }
        if self.pk == 0 || self.pk > u16::MAX as u32 {
            return Err(Error::InvalidConfig(format!(
                "pk {} must lie in [1, 65535]",
                self.pk
            )));
        }
        Ok(())
    }

    /// Good-sync timestamps of a station, if stored in tag form.
    pub fn tags(&self, station: Station) -> Option<&[u64]> {
        match station {
            Station::Alice => self.alice_sync_tag.as_deref(),
            Station::Bob => self.bob_sync_tag.as_deref(),
        }
    }

    /// Good-sync stream positions of a station, if stored in index form.
    pub fn positions(&self, station: Station) -> Option<&[usize]> {
        match station {
            Station::Alice => self.alice_sync_idx.as_deref(),
            Station::Bob => self.bob_sync_idx.as_deref(),
        }
    }

    /// Resolve a station's good sync pulses against its raw stream.
    ///
    /// Tag form is located among the stream's sync-channel events; index form
    /// is looked up directly.
    pub fn station_sync(
        &self,
        station: Station,
        events: &[RawEvent],
        sync_channel: u8,
    ) -> Result<StationSync> {
        let sync = if let Some(tags) = self.tags(station) {
            StationSync {
                positions: resolve_positions(station, events, tags, sync_channel)?,
                tags: tags.to_vec(),
            }
        } else {
            let positions = self
                .positions(station)
                .ok_or(Error::MissingField("sync_idx"))?
                .to_vec();
            let mut tags = Vec::with_capacity(positions.len());
            for &p in &positions {
                let ev = events.get(p).ok_or(Error::SyncPositionOutOfRange {
                    station,
                    position: p,
                    len: events.len(),
                })?;
                tags.push(ev.timestamp);
            }
            StationSync { positions, tags }
        };
        sync.validate(station)?;
        Ok(sync)
    }
}

/// Locate each sync tag among the stream's events on `sync_channel`.
fn resolve_positions(
    station: Station,
    events: &[RawEvent],
    tags: &[u64],
    sync_channel: u8,
) -> Result<Vec<usize>> {
    if let Some(at) = first_non_ascending(tags) {
        return Err(Error::SyncNotAscending { station, at });
    }
    let mut found: Vec<Option<usize>> = vec![None; tags.len()];
    for (i, ev) in events.iter().enumerate() {
        if ev.channel != sync_channel {
            continue;
        }
        if let Ok(k) = tags.binary_search(&ev.timestamp) {
            found[k].get_or_insert(i);
        }
    }
    found
        .into_iter()
        .zip(tags)
        .map(|(pos, &tag)| pos.ok_or(Error::SyncTagNotFound { station, tag }))
        .collect()
}
