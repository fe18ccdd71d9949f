//! Run-quality diagnostics on sync tags, click phases and click masks.
//!
//! None of these gate the analysis. They exist to spot drifting lasers,
//! jittery GPS references and detector slots that never fire.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Peak drift
// ---------------------------------------------------------------------------

/// Bins of the per-block phase histogram.
pub const DRIFT_BINS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftPoint {
    /// Number of residuals consumed up to the end of this block.
    pub trial_idx: usize,
    /// Left edge of the densest bin, in ticks.
    pub peak_phase_ticks: i64,
}

/// Phase-peak position per block of `block` consecutive click phases.
///
/// Each block is histogrammed into [`DRIFT_BINS`] bins spanning its own
/// minimum and maximum. A trailing partial block is ignored.
pub fn peak_drift(phase_ticks: &[u64], period: u64, block: usize) -> Result<Vec<DriftPoint>> {
    if block == 0 || period == 0 {
        return Err(Error::InvalidConfig(
            "peak drift needs a positive block size and period".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(phase_ticks.len() / block);
    for (k, chunk) in phase_ticks.chunks_exact(block).enumerate() {
        let values: Vec<f64> = chunk.iter().map(|&p| (p % period) as f64).collect();
        let edge = densest_left_edge(&values, DRIFT_BINS);
        out.push(DriftPoint {
            trial_idx: (k + 1) * block,
            peak_phase_ticks: edge as i64,
        });
    }
    Ok(out)
}

/// Histogram over `[min, max]` (widened by half a unit when flat) and return
/// the left edge of the fullest bin; ties go to the lowest bin.
fn densest_left_edge(values: &[f64], bins: usize) -> f64 {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) };
    let width = (hi - lo) / bins as f64;
    let mut hist = vec![0usize; bins];
    for &v in values {
        let idx = (((v - lo) / (hi - lo)) * bins as f64) as usize;
        hist[idx.min(bins - 1)] += 1;
    }
    let best = hist
        .iter()
        .enumerate()
        .fold(0, |best, (i, &c)| if c > hist[best] { i } else { best });
    lo + best as f64 * width
}

// ---------------------------------------------------------------------------
// GPS period jitter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodJitter {
    /// Consecutive good-sync differences.
    pub periods: Vec<u64>,
    /// Running median of `periods`, edge-clamped.
    pub running_median: Vec<u64>,
    /// Phase of each tag relative to the first, centred on zero.
    pub phase_residuals: Vec<i64>,
}

/// Inter-pulse periods, their running median and centred phase residuals.
///
/// `window` must be odd, at least 3 and smaller than the number of tags.
pub fn period_jitter(tags: &[u64], period: u64, window: usize) -> Result<PeriodJitter> {
    if window < 3 || window % 2 == 0 || window >= tags.len() {
        return Err(Error::InvalidConfig(format!(
            "running-median window {window} must be odd, >= 3 and < {} pulses",
            tags.len()
        )));
    }
    if period == 0 {
        return Err(Error::InvalidConfig("period must be positive".to_string()));
    }
    let periods: Vec<u64> = tags.windows(2).map(|w| w[1].saturating_sub(w[0])).collect();
    let running_median = running_median(&periods, window);

    let first = tags[0] as i128;
    let half = period as i128 / 2;
    let phase_residuals = tags
        .iter()
        .map(|&t| {
            let phase = (t as i128 - first).rem_euclid(period as i128);
            let centred = if phase > half { phase - period as i128 } else { phase };
            centred as i64
        })
        .collect();

    Ok(PeriodJitter {
        periods,
        running_median,
        phase_residuals,
    })
}

/// Odd-window median filter; samples past either edge repeat the edge value.
fn running_median(values: &[u64], window: usize) -> Vec<u64> {
    let half = window / 2;
    let n = values.len();
    let mut buf = Vec::with_capacity(window);
    (0..n)
        .map(|i| {
            buf.clear();
            for off in 0..window {
                let j = (i + off).saturating_sub(half).min(n - 1);
                buf.push(values[j]);
            }
            let (_, m, _) = buf.select_nth_unstable(half);
            *m
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Mask coverage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaskCount {
    pub mask: u16,
    pub count: usize,
    /// Relative to all trials, not only in-range ones.
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskCoverage {
    pub total: usize,
    /// Distinct masks whose bits all lie inside the allowed set.
    pub masks: Vec<MaskCount>,
    /// Trials with at least one bit outside the allowed set.
    pub out_of_range: usize,
}

impl MaskCoverage {
    pub fn out_of_range_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.out_of_range as f64 / self.total as f64
        }
    }

    pub fn fraction_of(&self, mask: u16) -> f64 {
        self.masks
            .iter()
            .find(|m| m.mask == mask)
            .map_or(0.0, |m| m.fraction)
    }

    /// Expected masks seen in fewer than `threshold` of all trials.
    pub fn rare(&self, expected: &[u16], threshold: f64) -> Vec<u16> {
        expected
            .iter()
            .copied()
            .filter(|&m| self.fraction_of(m) < threshold)
            .collect()
    }
}

/// Histogram of distinct click masks, split by whether they stay in `allowed`.
pub fn mask_coverage(clicks: &[u16], allowed: u16) -> MaskCoverage {
    let mut counts: BTreeMap<u16, usize> = BTreeMap::new();
    let mut out_of_range = 0;
    for &c in clicks {
        if c & !allowed == 0 {
            *counts.entry(c).or_default() += 1;
        } else {
            out_of_range += 1;
        }
    }
    let total = clicks.len();
    let masks = counts
        .into_iter()
        .map(|(mask, count)| MaskCount {
            mask,
            count,
            fraction: count as f64 / total as f64,
        })
        .collect();
    MaskCoverage {
        total,
        masks,
        out_of_range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_drift_tracks_block_mode() {
        let mut phases = vec![100u64; 6];
        phases.extend([0, 900, 900, 900, 900, 900]);
        phases.push(5);
        let drift = peak_drift(&phases, 1_000, 6).unwrap();
        assert_eq!(drift.len(), 2);
        // flat block widens to [99.5, 100.5]; 100 falls in the middle bin
        assert_eq!(drift[0].trial_idx, 6);
        assert_eq!(drift[0].peak_phase_ticks, 100);
        assert_eq!(drift[1].trial_idx, 12);
        // 900 is the maximum: it lands in the last bin [896.48.., 900]
        assert_eq!(drift[1].peak_phase_ticks, 896);
    }

    #[test]
    fn test_peak_drift_rejects_zero_block() {
        assert!(peak_drift(&[1, 2], 1_000, 0).is_err());
    }

    #[test]
    fn test_period_jitter_residuals_are_centred() {
        let p = 120_000u64;
        let tags = [0, p + 3, 2 * p - 2, 3 * p, 4 * p + 1, 5 * p];
        let j = period_jitter(&tags, p, 3).unwrap();
        assert_eq!(j.periods, vec![p + 3, p - 5, p + 2, p + 1, p - 1]);
        assert_eq!(j.phase_residuals, vec![0, 3, -2, 0, 1, 0]);
        assert_eq!(j.running_median.len(), 5);
        assert_eq!(j.running_median[0], p + 3);
        assert_eq!(j.running_median[1], p + 2);
        assert_eq!(j.running_median[4], p - 1);
    }

    #[test]
    fn test_period_jitter_window_checks() {
        let tags = [0, 10, 20, 30];
        assert!(period_jitter(&tags, 10, 2).is_err());
        assert!(period_jitter(&tags, 10, 5).is_err());
        assert!(period_jitter(&tags, 10, 3).is_ok());
    }

    #[test]
    fn test_mask_coverage() {
        let clicks = [0x40, 0x80, 0x40, 0x0, 0x100, 0xC0];
        let cov = mask_coverage(&clicks, 0x00C0);
        assert_eq!(cov.total, 6);
        assert_eq!(cov.out_of_range, 1);
        assert_eq!(cov.fraction_of(0x40), 2.0 / 6.0);
        assert_eq!(cov.masks.first().map(|m| m.mask), Some(0));
        assert_eq!(cov.rare(&[0x40, 0x80, 0x20], 0.1), vec![0x20]);
    }
}
