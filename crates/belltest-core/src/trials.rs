//! Trial assignment.
//!
//! Good sync pulses partition a station's event stream into trials: trial `k`
//! covers stream positions `[pos_k, pos_{k+1})`, the last one running to the
//! end of the stream. Each event then gets a pulse slot
//! `floor((t - t_sync(k)) / period)`; only slots `0..pk` are kept.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::record::{RawEvent, Station, decode_records};
use crate::sync::StationSync;

/// Index range table of one station's trials, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPartition {
    starts: Vec<usize>,
    len: usize,
}

impl TrialPartition {
    /// Build the partition of a stream of `len` events.
    pub fn new(station: Station, positions: &[usize], len: usize) -> Result<Self> {
        if let Some(at) = positions.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::SyncNotAscending { station, at: at + 1 });
        }
        if let Some(&position) = positions.last().filter(|&&p| p >= len) {
            return Err(Error::SyncPositionOutOfRange {
                station,
                position,
                len,
            });
        }
        Ok(Self {
            starts: positions.to_vec(),
            len,
        })
    }

    pub fn num_trials(&self) -> usize {
        self.starts.len()
    }

    /// Event positions belonging to trial `k`.
    pub fn range(&self, k: usize) -> Option<Range<usize>> {
        let start = *self.starts.get(k)?;
        let end = self.starts.get(k + 1).copied().unwrap_or(self.len);
        Some(start..end)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_trials()).filter_map(|k| self.range(k))
    }

    /// Trial owning stream position `i`; `None` before the first good sync.
    pub fn trial_of_position(&self, i: usize) -> Option<usize> {
        if i >= self.len {
            return None;
        }
        self.starts.partition_point(|&p| p <= i).checked_sub(1)
    }
}

/// Columnar per-event output of the assigner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignedEvents {
    pub trial: Vec<u32>,
    pub pulse: Vec<u16>,
    pub time: Vec<u64>,
    pub channel: Vec<u8>,
}

impl AssignedEvents {
    pub fn len(&self) -> usize {
        self.trial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trial.is_empty()
    }

    /// Number of trials spanned, i.e. highest trial index + 1.
    ///
    /// Does not assume the trial column is sorted.
    pub fn trial_span(&self) -> usize {
        self.trial.iter().max().map_or(0, |&t| t as usize + 1)
    }

    fn push(&mut self, trial: u32, pulse: u16, time: u64, channel: u8) {
        self.trial.push(trial);
        self.pulse.push(pulse);
        self.time.push(time);
        self.channel.push(channel);
    }
}

/// Check `pk` fits the pulse column.
pub fn validate_pulses_per_trial(pk: u32) -> Result<()> {
    if pk == 0 || pk > u16::MAX as u32 {
        return Err(Error::InvalidConfig(format!(
            "pulses per trial {pk} must lie in [1, 65535]"
        )));
    }
    Ok(())
}

/// Assign every event of one station to a trial and pulse slot.
pub fn assign_trials(
    station: Station,
    events: &[RawEvent],
    sync: &StationSync,
    period: u64,
    pk: u32,
) -> Result<AssignedEvents> {
    validate_pulses_per_trial(pk)?;
    if period == 0 {
        return Err(Error::InvalidConfig("period must be positive".to_string()));
    }
    if sync.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{station}: good-sync list is empty"
        )));
    }
    sync.validate(station)?;
    let partition = TrialPartition::new(station, &sync.positions, events.len())?;

    let mut out = AssignedEvents::default();
    let mut dropped_negative = 0usize;
    for (k, range) in partition.ranges().enumerate() {
        let t_sync = sync.tags[k] as i128;
        for ev in &events[range] {
            let slot = (ev.timestamp as i128 - t_sync).div_euclid(period as i128);
            if slot < 0 {
                dropped_negative += 1;
                continue;
            }
            if slot < pk as i128 {
                out.push(k as u32, slot as u16, ev.timestamp, ev.channel);
            }
        }
    }

    let pre_sync = sync.positions[0];
    log::info!(
        "{station}: {} events kept in {} trials ({} before first sync, {} before their sync tag)",
        out.len(),
        partition.num_trials(),
        pre_sync,
        dropped_negative
    );
    Ok(out)
}

/// Decode a raw record stream and assign it in one step.
pub fn assign_raw_bytes(
    station: Station,
    bytes: &[u8],
    sync: &StationSync,
    period: u64,
    pk: u32,
) -> Result<AssignedEvents> {
    let events = decode_records(bytes, station)?;
    assign_trials(station, &events, sync, period, pk)
}
