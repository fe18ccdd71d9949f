//! Per-trial outcomes: detector click masks and measurement settings.
//!
//! For each station the phase `(t mod period) / period` of detector events is
//! histogrammed to locate the laser-pulse peak; clicks inside a circular
//! window of radius `r` around it are OR-reduced into a 16-bit mask with bit
//! `pulse mod 16`. The setting of a trial is taken from its first RNG event.
//! Only trials in which both stations recorded a setting are retained.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{AnalysisConfig, validate_radius};
use crate::error::{Error, Result};
use crate::record::Station;
use crate::trials::AssignedEvents;

// ---------------------------------------------------------------------------
// Trial table
// ---------------------------------------------------------------------------

/// Click masks and settings of one station, one entry per retained trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideColumns {
    pub clicks: Vec<u16>,
    pub settings: Vec<u8>,
}

/// Retained trials of a run.
///
/// `trial_index` and `phase_ticks` may be empty in hand-made tables; when
/// present, `trial_index` has one entry per trial. `phase_ticks` holds the
/// phase (ticks into the period) of every accepted click, Alice first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialTable {
    #[serde(default)]
    pub trial_index: Vec<u32>,
    pub alice: SideColumns,
    pub bob: SideColumns,
    #[serde(default)]
    pub phase_ticks: Vec<u64>,
    #[serde(default)]
    pub period_ticks: u64,
}

impl TrialTable {
    pub fn len(&self) -> usize {
        self.alice.clicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn side(&self, station: Station) -> &SideColumns {
        match station {
            Station::Alice => &self.alice,
            Station::Bob => &self.bob,
        }
    }

    /// Structural checks: equal column lengths and settings in {0, 1, 2}.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let lengths = [
            ("alice.settings", self.alice.settings.len()),
            ("bob.clicks", self.bob.clicks.len()),
            ("bob.settings", self.bob.settings.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(Error::InvalidTrialTable(format!(
                    "{name} has {len} entries, alice.clicks has {n}"
                )));
            }
        }
        if !self.trial_index.is_empty() && self.trial_index.len() != n {
            return Err(Error::InvalidTrialTable(format!(
                "trial_index has {} entries, expected {n}",
                self.trial_index.len()
            )));
        }
        for station in Station::BOTH {
            if let Some(pos) = self.side(station).settings.iter().position(|&s| s > 2) {
                return Err(Error::InvalidTrialTable(format!(
                    "{} setting {} at row {pos} is not 0, 1 or 2",
                    station.key(),
                    self.side(station).settings[pos]
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(text)?;
        table.validate()?;
        Ok(table)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let table = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        log::debug!("read {} trials from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Concatenate another run's trials after this one's.
    ///
    /// `trial_index` survives only if both tables carry it. Phases are only
    /// comparable under one period, so differing non-zero periods are an
    /// error.
    pub fn append(&mut self, other: TrialTable) -> Result<()> {
        other.validate()?;
        if self.period_ticks != 0
            && other.period_ticks != 0
            && self.period_ticks != other.period_ticks
        {
            return Err(Error::InvalidTrialTable(format!(
                "cannot join tables with periods {} and {}",
                self.period_ticks, other.period_ticks
            )));
        }
        let keep_index = (self.is_empty() || !self.trial_index.is_empty())
            && (other.is_empty() || !other.trial_index.is_empty());
        if keep_index {
            self.trial_index.extend(other.trial_index);
        } else {
            self.trial_index.clear();
        }
        self.alice.clicks.extend(other.alice.clicks);
        self.alice.settings.extend(other.alice.settings);
        self.bob.clicks.extend(other.bob.clicks);
        self.bob.settings.extend(other.bob.settings);
        self.phase_ticks.extend(other.phase_ticks);
        if self.period_ticks == 0 {
            self.period_ticks = other.period_ticks;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Phase window
// ---------------------------------------------------------------------------

/// Phase of a timestamp as a fraction of the period, in `[0, 1)`.
pub fn phase_fraction(t: u64, period: u64) -> f64 {
    (t % period) as f64 / period as f64
}

/// Centre of the densest bin of a `bins`-bin histogram on `[0, 1)`.
///
/// Ties go to the lowest bin. `None` when there are no phases.
pub fn phase_peak(phases: impl IntoIterator<Item = f64>, bins: usize) -> Option<f64> {
    let mut hist = vec![0usize; bins.max(1)];
    let mut seen = false;
    for ph in phases {
        let idx = ((ph * hist.len() as f64) as usize).min(hist.len() - 1);
        hist[idx] += 1;
        seen = true;
    }
    if !seen {
        return None;
    }
    let best = hist
        .iter()
        .enumerate()
        .fold(0, |best, (i, &c)| if c > hist[best] { i } else { best });
    Some((best as f64 + 0.5) / hist.len() as f64)
}

/// Distance between two phases on the unit circle, in `[0, 0.5]`.
pub fn circular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(1.0);
    d.min(1.0 - d)
}

pub fn in_window(phase: f64, centre: f64, radius: f64) -> bool {
    circular_distance(phase, centre) < radius
}

/// True for masks with two or more bits set.
pub fn is_multi_bit(mask: u16) -> bool {
    mask != 0 && mask & (mask - 1) != 0
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Per-station aggregation summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationAggregate {
    pub station: Station,
    pub peak_centre: f64,
    pub detector_events: usize,
    pub accepted_clicks: usize,
    pub trials: usize,
    pub trials_with_setting: usize,
    /// Informational only; never gates acceptance.
    pub multi_bit_trials: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationStats {
    pub alice: StationAggregate,
    pub bob: StationAggregate,
    pub total_trials: usize,
    pub retained_trials: usize,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub table: TrialTable,
    pub stats: AggregationStats,
}

struct SideOutcome {
    clicks: Vec<u16>,
    settings: Vec<u8>,
    phase_ticks: Vec<u64>,
    summary: StationAggregate,
}

fn aggregate_side(
    station: Station,
    events: &AssignedEvents,
    period: u64,
    cfg: &AnalysisConfig,
) -> SideOutcome {
    let channels = &cfg.channels;
    let n_trials = events.trial_span();
    let is_det = |i: usize| channels.is_detector(events.channel[i]);

    let detector_events = (0..events.len()).filter(|&i| is_det(i)).count();
    let centre = match phase_peak(
        (0..events.len())
            .filter(|&i| is_det(i))
            .map(|i| phase_fraction(events.time[i], period)),
        cfg.histogram_bins,
    ) {
        Some(c) => c,
        None => {
            log::warn!("{station}: no detector events, phase peak defaults to 0.0");
            0.0
        }
    };
    log::info!("{station}: phase peak @ {centre:.4}");

    let mut clicks = vec![0u16; n_trials];
    let mut settings = vec![0u8; n_trials];
    let mut phase_ticks = Vec::new();
    for i in 0..events.len() {
        let trial = events.trial[i] as usize;
        let channel = events.channel[i];
        if channels.is_detector(channel) {
            let t = events.time[i];
            if in_window(phase_fraction(t, period), centre, cfg.radius) {
                clicks[trial] |= 1u16 << (events.pulse[i] % 16);
                phase_ticks.push(t % period);
            }
        } else if let Some(setting) = channels.setting_of(channel) {
            if settings[trial] == 0 {
                settings[trial] = setting;
            }
        }
    }

    let multi_bit_trials = clicks.iter().filter(|&&m| is_multi_bit(m)).count();
    if multi_bit_trials > 0 {
        log::info!(
            "{station}: {multi_bit_trials} trials contain >1 detector bit ({:.2}%) at radius {}",
            100.0 * multi_bit_trials as f64 / n_trials as f64,
            cfg.radius
        );
    }
    let summary = StationAggregate {
        station,
        peak_centre: centre,
        detector_events,
        accepted_clicks: phase_ticks.len(),
        trials: n_trials,
        trials_with_setting: settings.iter().filter(|&&s| s != 0).count(),
        multi_bit_trials,
    };
    SideOutcome {
        clicks,
        settings,
        phase_ticks,
        summary,
    }
}

/// Reduce both stations' assigned events to the retained-trial table.
///
/// An empty retained set is not an error; the statistic stage decides what
/// to do with it.
pub fn aggregate(
    alice: &AssignedEvents,
    bob: &AssignedEvents,
    period: u64,
    cfg: &AnalysisConfig,
) -> Result<Aggregation> {
    validate_radius(cfg.radius)?;
    if period == 0 {
        return Err(Error::InvalidConfig("period must be positive".to_string()));
    }
    let a = aggregate_side(Station::Alice, alice, period, cfg);
    let b = aggregate_side(Station::Bob, bob, period, cfg);

    let total = a.settings.len().max(b.settings.len());
    let mut table = TrialTable {
        period_ticks: period,
        ..Default::default()
    };
    for k in 0..a.settings.len().min(b.settings.len()) {
        if a.settings[k] != 0 && b.settings[k] != 0 {
            table.trial_index.push(k as u32);
            table.alice.clicks.push(a.clicks[k]);
            table.alice.settings.push(a.settings[k]);
            table.bob.clicks.push(b.clicks[k]);
            table.bob.settings.push(b.settings[k]);
        }
    }
    table.phase_ticks = a.phase_ticks;
    table.phase_ticks.extend(b.phase_ticks);

    log::info!("retained {} of {} trials", table.len(), total);
    let stats = AggregationStats {
        alice: a.summary,
        bob: b.summary,
        total_trials: total,
        retained_trials: table.len(),
    };
    Ok(Aggregation { table, stats })
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u64 = 120_000;

    fn assigned(rows: &[(u32, u16, u64, u8)]) -> AssignedEvents {
        let mut ev = AssignedEvents::default();
        for &(trial, pulse, time, channel) in rows {
            ev.trial.push(trial);
            ev.pulse.push(pulse);
            ev.time.push(time);
            ev.channel.push(channel);
        }
        ev
    }

    #[test]
    fn test_phase_peak_centre_and_ties() {
        let peak = phase_peak([0.26, 0.26, 0.7], 4).unwrap();
        assert_eq!(peak, 0.375);
        let tie = phase_peak([0.9, 0.1], 4).unwrap();
        assert_eq!(tie, 0.125);
        assert_eq!(phase_peak(std::iter::empty::<f64>(), 400), None);
    }

    #[test]
    fn test_window_wraps_around_period() {
        assert!(in_window(0.99, 0.02, 0.05));
        assert!(in_window(0.01, 0.98, 0.05));
        assert!(!in_window(0.5, 0.02, 0.05));
        assert!((circular_distance(0.1, 0.9) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_multi_bit() {
        assert!(!is_multi_bit(0));
        assert!(!is_multi_bit(0x0040));
        assert!(is_multi_bit(0x00C0));
    }

    #[test]
    fn test_aggregate_masks_settings_and_retention() {
        let cfg = AnalysisConfig::default();
        // clicks sit at phase ~0.1 of the period
        let click = |k: u64, pulse: u64| k * 90 * P + pulse * P + P / 10;
        let alice = assigned(&[
            (0, 0, 0, 6),
            (0, 1, P + 5, 2),
            (0, 3, 3 * P + 9, 4),
            (0, 6, click(0, 6), 0),
            (0, 7, click(0, 7), 0),
            (0, 8, 8 * P + P / 2, 0),
            (1, 2, click(1, 2), 0),
            (2, 1, 2 * 90 * P + P, 4),
        ]);
        let bob = assigned(&[
            (0, 2, 2 * P, 4),
            (0, 6, click(0, 6), 0),
            (2, 4, 2 * 90 * P + 4 * P, 2),
            (3, 4, 3 * 90 * P + 4 * P, 2),
        ]);
        let agg = aggregate(&alice, &bob, P, &cfg).unwrap();
        let t = &agg.table;
        assert_eq!(t.trial_index, vec![0, 2]);
        assert_eq!(t.alice.clicks, vec![0x00C0, 0]);
        assert_eq!(t.alice.settings, vec![1, 2]);
        assert_eq!(t.bob.clicks, vec![0x0040, 0]);
        assert_eq!(t.bob.settings, vec![2, 1]);
        assert_eq!(t.period_ticks, P);
        assert_eq!(t.phase_ticks, vec![P / 10; 4]);
        assert_eq!(agg.stats.alice.multi_bit_trials, 1);
        assert_eq!(agg.stats.alice.accepted_clicks, 3);
        assert_eq!(agg.stats.total_trials, 4);
        assert_eq!(agg.stats.retained_trials, 2);
        t.validate().unwrap();
    }

    #[test]
    fn test_aggregate_accepts_unsorted_trials() {
        let cfg = AnalysisConfig::default();
        let alice = assigned(&[(2, 6, P / 10, 0), (0, 0, 0, 2), (2, 1, P, 4)]);
        let bob = assigned(&[(1, 0, 0, 2), (2, 0, 0, 2), (0, 0, 0, 4)]);
        let agg = aggregate(&alice, &bob, P, &cfg).unwrap();
        assert_eq!(agg.stats.alice.trials, 3);
        assert_eq!(agg.table.trial_index, vec![0, 2]);
        assert_eq!(agg.table.alice.clicks, vec![0, 0x0040]);
    }

    #[test]
    fn test_aggregate_rejects_bad_radius() {
        let cfg = AnalysisConfig {
            radius: 0.5,
            ..Default::default()
        };
        let ev = AssignedEvents::default();
        assert!(matches!(
            aggregate(&ev, &ev, P, &cfg),
            Err(Error::InvalidRadius(_))
        ));
    }

    #[test]
    fn test_empty_retained_set_is_ok() {
        let cfg = AnalysisConfig::default();
        let alice = assigned(&[(0, 0, 0, 2)]);
        let bob = assigned(&[(0, 0, 0, 0)]);
        let agg = aggregate(&alice, &bob, P, &cfg).unwrap();
        assert!(agg.table.is_empty());
        assert_eq!(agg.stats.bob.peak_centre, 0.00125);
    }

    #[test]
    fn test_validate_catches_ragged_and_bad_settings() {
        let mut t = TrialTable {
            alice: SideColumns {
                clicks: vec![1, 2],
                settings: vec![1, 2],
            },
            bob: SideColumns {
                clicks: vec![1, 2],
                settings: vec![1, 3],
            },
            ..Default::default()
        };
        assert!(matches!(t.validate(), Err(Error::InvalidTrialTable(_))));
        t.bob.settings = vec![1];
        assert!(matches!(t.validate(), Err(Error::InvalidTrialTable(_))));
    }

    #[test]
    fn test_append_joins_runs() {
        let one = |idx: u32, period: u64| TrialTable {
            trial_index: vec![idx],
            alice: SideColumns {
                clicks: vec![0x40],
                settings: vec![1],
            },
            bob: SideColumns {
                clicks: vec![0],
                settings: vec![2],
            },
            phase_ticks: vec![7],
            period_ticks: period,
        };
        let mut t = TrialTable::default();
        t.append(one(3, P)).unwrap();
        t.append(one(5, 0)).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.trial_index, vec![3, 5]);
        assert_eq!(t.period_ticks, P);
        assert_eq!(t.phase_ticks, vec![7, 7]);

        let mut bare = one(9, P);
        bare.trial_index.clear();
        t.append(bare).unwrap();
        assert!(t.trial_index.is_empty());
        assert!(t.validate().is_ok());

        assert!(matches!(
            t.append(one(1, P + 1)),
            Err(Error::InvalidTrialTable(_))
        ));
    }

    #[test]
    fn test_trial_table_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_trials.json");
        let t = TrialTable {
            trial_index: vec![4],
            alice: SideColumns {
                clicks: vec![0x40],
                settings: vec![1],
            },
            bob: SideColumns {
                clicks: vec![0x40],
                settings: vec![1],
            },
            phase_ticks: vec![12_000, 12_001],
            period_ticks: P,
        };
        t.write(&path).unwrap();
        assert_eq!(TrialTable::read(&path).unwrap(), t);
        let minimal = r#"{"alice":{"clicks":[64],"settings":[1]},"bob":{"clicks":[0],"settings":[2]}}"#;
        let m = TrialTable::from_json_str(minimal).unwrap();
        assert_eq!(m.len(), 1);
        assert!(m.trial_index.is_empty());
    }
}
