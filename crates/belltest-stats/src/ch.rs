//! CH/Eberhard statistic.
//!
//! Click masks are reduced to a pattern over the slots selected by the slot
//! mask (default bits 6..9). For each setting quadrant `(a, b)` four counters
//! are kept:
//!
//! ```text
//! S_A(a,b)  trials with pattern_A > 0
//! S_B(a,b)  trials with pattern_B > 0
//! C(a,b)    trials with pattern_A > 0 and pattern_A == pattern_B
//! N(a,b)    trials
//! ```
//!
//! and the normalized violation is
//!
//! ```text
//! S_ch  = (C11 + C12 + C21 - C22) / D
//! D     = (S_A(1,1) + S_A(2,1) + S_B(1,1) + S_B(1,2)) / 2
//! sigma = sqrt(2 D) / (2 D)
//! ```
//!
//! with a one-sided normal p-value `0.5 * erfc(S_ch / sigma / sqrt 2)`.

use serde::Serialize;
use statrs::function::erf::erfc;

use belltest_core::TrialTable;

use crate::error::{Result, StatsError};

/// Slot pattern of a click mask: masked bits shifted down to bit 0.
pub fn click_pattern(clicks: u16, slot_mask: u16) -> u16 {
    (clicks & slot_mask) >> slot_mask.trailing_zeros()
}

/// Quadrant row for settings `(a, b)`; `None` unless both are 1 or 2.
pub(crate) fn row(a: u8, b: u8) -> Option<usize> {
    match (a, b) {
        (1 | 2, 1 | 2) => Some((a as usize - 1) * 2 + (b as usize - 1)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Per-trial input
// ---------------------------------------------------------------------------

/// Per-trial patterns and settings shared by the point estimate, the
/// resampling workers and the diagnostics.
///
/// Only trials where both settings are 1 or 2 are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChInput {
    pub pattern_a: Vec<u16>,
    pub pattern_b: Vec<u16>,
    pub setting_a: Vec<u8>,
    pub setting_b: Vec<u8>,
}

impl ChInput {
    pub fn from_table(table: &TrialTable, slot_mask: u16) -> Result<Self> {
        table.validate()?;
        Self::from_columns(
            &table.alice.clicks,
            &table.alice.settings,
            &table.bob.clicks,
            &table.bob.settings,
            slot_mask,
        )
    }

    pub fn from_columns(
        clicks_a: &[u16],
        settings_a: &[u8],
        clicks_b: &[u16],
        settings_b: &[u8],
        slot_mask: u16,
    ) -> Result<Self> {
        if slot_mask == 0 {
            return Err(belltest_core::Error::InvalidConfig(
                "slot mask must not be zero".to_string(),
            )
            .into());
        }
        let n = clicks_a.len();
        if settings_a.len() != n || clicks_b.len() != n || settings_b.len() != n {
            return Err(belltest_core::Error::InvalidTrialTable(format!(
                "column lengths differ: {n}, {}, {}, {}",
                settings_a.len(),
                clicks_b.len(),
                settings_b.len()
            ))
            .into());
        }
        let valid = |s: u8| s == 1 || s == 2;
        let mut input = Self::default();
        for i in 0..n {
            if !valid(settings_a[i]) || !valid(settings_b[i]) {
                continue;
            }
            input.pattern_a.push(click_pattern(clicks_a[i], slot_mask));
            input.pattern_b.push(click_pattern(clicks_b[i], slot_mask));
            input.setting_a.push(settings_a[i]);
            input.setting_b.push(settings_b[i]);
        }
        if input.len() < n {
            log::debug!("skipped {} trials without both settings", n - input.len());
        }
        Ok(input)
    }

    pub fn len(&self) -> usize {
        self.setting_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setting_a.is_empty()
    }

    /// Same trials with the two stations exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            pattern_a: self.pattern_b.clone(),
            pattern_b: self.pattern_a.clone(),
            setting_a: self.setting_b.clone(),
            setting_b: self.setting_a.clone(),
        }
    }

    /// Per-trial `(single_a, single_b, coincidence)` flags.
    pub fn flags(&self, i: usize) -> (bool, bool, bool) {
        let (pa, pb) = (self.pattern_a[i], self.pattern_b[i]);
        (pa > 0, pb > 0, pa > 0 && pa == pb)
    }

    pub fn counts(&self) -> CountMatrix {
        let mut m = CountMatrix::default();
        for i in 0..self.len() {
            m.add_trial(self, i);
        }
        m
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuadrantCounts {
    pub singles_a: u64,
    pub singles_b: u64,
    pub coincidences: u64,
    pub trials: u64,
}

/// Counters of the four setting quadrants, rows ordered
/// (1,1), (1,2), (2,1), (2,2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountMatrix {
    pub cells: [QuadrantCounts; 4],
}

impl CountMatrix {
    pub fn from_cells(cells: [QuadrantCounts; 4]) -> Self {
        Self { cells }
    }

    /// Counters of quadrant `(a, b)`, `None` for settings outside {1, 2}.
    pub fn quadrant(&self, a: u8, b: u8) -> Option<&QuadrantCounts> {
        row(a, b).map(|r| &self.cells[r])
    }

    /// Count trial `i` of `input` into its quadrant.
    ///
    /// Trials whose settings are not both 1 or 2 are ignored.
    pub fn add_trial(&mut self, input: &ChInput, i: usize) {
        let Some(r) = row(input.setting_a[i], input.setting_b[i]) else {
            return;
        };
        let (sa, sb, co) = input.flags(i);
        let cell = &mut self.cells[r];
        cell.singles_a += sa as u64;
        cell.singles_b += sb as u64;
        cell.coincidences += co as u64;
        cell.trials += 1;
    }

    pub fn numer(&self) -> i64 {
        let c = |r: usize| self.cells[r].coincidences as i64;
        c(0) + c(1) + c(2) - c(3)
    }

    /// `S_A(1,1) + S_A(2,1) + S_B(1,1) + S_B(1,2)`.
    pub fn singles_sum(&self) -> u64 {
        self.cells[0].singles_a
            + self.cells[2].singles_a
            + self.cells[0].singles_b
            + self.cells[1].singles_b
    }

    pub fn denom(&self) -> f64 {
        0.5 * self.singles_sum() as f64
    }

    /// `S_ch`, or `None` when the denominator is zero.
    pub fn statistic(&self) -> Option<f64> {
        let denom = self.denom();
        (denom != 0.0).then(|| self.numer() as f64 / denom)
    }

    /// No-signaling checks for Alice (across Bob's settings) and Bob
    /// (across Alice's settings).
    pub fn no_signaling(&self) -> (NoSignaling, NoSignaling) {
        let [q11, q12, q21, q22] = self.cells;
        let alice = NoSignaling::from_counts(
            q11.singles_a + q21.singles_a,
            q11.trials + q21.trials,
            q12.singles_a + q22.singles_a,
            q12.trials + q22.trials,
        );
        let bob = NoSignaling::from_counts(
            q11.singles_b + q12.singles_b,
            q11.trials + q12.trials,
            q21.singles_b + q22.singles_b,
            q21.trials + q22.trials,
        );
        (alice, bob)
    }

    pub fn evaluate(&self) -> Result<ChResult> {
        let s_ch = self.statistic().ok_or(StatsError::NoSingles)?;
        let denom = self.denom();
        let sigma = 0.5 * (self.singles_sum() as f64).sqrt() / denom;
        let p_value_lr = 0.5 * erfc((s_ch / sigma) / std::f64::consts::SQRT_2);
        let (alice, bob) = self.no_signaling();
        Ok(ChResult {
            s_ch,
            sigma,
            p_value_lr,
            numer: self.numer(),
            denom,
            alice,
            bob,
            counts: *self,
        })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Difference of one station's click probability between the two remote
/// settings, with its z-score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoSignaling {
    pub delta: f64,
    pub z: f64,
    /// False when a remote setting had no trials or both probabilities are
    /// degenerate; `z` is then the sentinel 0.0.
    pub defined: bool,
}

impl NoSignaling {
    fn from_counts(hits_1: u64, trials_1: u64, hits_2: u64, trials_2: u64) -> Self {
        let prob = |h: u64, n: u64| if n > 0 { h as f64 / n as f64 } else { 0.0 };
        let var = |p: f64, n: u64| if n > 0 { p * (1.0 - p) / n as f64 } else { 0.0 };
        let (p1, p2) = (prob(hits_1, trials_1), prob(hits_2, trials_2));
        let delta = p1 - p2;
        let spread = var(p1, trials_1) + var(p2, trials_2);
        if trials_1 == 0 || trials_2 == 0 || spread <= 0.0 {
            return Self {
                delta,
                z: 0.0,
                defined: false,
            };
        }
        Self {
            delta,
            z: delta / spread.sqrt(),
            defined: true,
        }
    }
}

/// Point estimate of the CH/Eberhard test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChResult {
    pub s_ch: f64,
    pub sigma: f64,
    pub p_value_lr: f64,
    pub numer: i64,
    pub denom: f64,
    pub alice: NoSignaling,
    pub bob: NoSignaling,
    pub counts: CountMatrix,
}

/// Evaluate the statistic on a full input.
pub fn compute_ch(input: &ChInput) -> Result<ChResult> {
    let result = input.counts().evaluate()?;
    log::info!(
        "CH-norm = {:.6} +/- {:.6} over {} trials",
        result.s_ch,
        result.sigma,
        input.len()
    );
    Ok(result)
}
