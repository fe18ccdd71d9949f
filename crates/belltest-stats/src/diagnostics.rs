//! Stability diagnostics of the CH counters.

use serde::Serialize;

use crate::ch::{ChInput, CountMatrix};
use crate::error::{Result, StatsError};

/// One point of the running CH estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CumulativePoint {
    pub n_trials: usize,
    pub s_ch: f64,
    pub sigma: f64,
}

/// `S_ch` and `sigma` over the first `step`, `2 step`, ... trials.
///
/// Prefixes whose denominator is still zero are skipped.
pub fn cumulative_ch(input: &ChInput, step: usize) -> Result<Vec<CumulativePoint>> {
    if step == 0 {
        return Err(StatsError::InvalidStep { what: "step" });
    }
    let mut m = CountMatrix::default();
    let mut out = Vec::with_capacity(input.len() / step);
    for i in 0..input.len() {
        m.add_trial(input, i);
        if (i + 1) % step != 0 {
            continue;
        }
        if let Ok(r) = m.evaluate() {
            out.push(CumulativePoint {
                n_trials: i + 1,
                s_ch: r.s_ch,
                sigma: r.sigma,
            });
        }
    }
    Ok(out)
}

/// Names of the eight per-trial counters, in matrix order.
pub const COUNTER_LABELS: [&str; 8] = ["S_A1", "S_A2", "S_B1", "S_B2", "C11", "C12", "C21", "C22"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockCovariance {
    pub block: usize,
    pub blocks: usize,
    /// Sample covariance (n - 1 normalization) of per-block counter sums.
    pub matrix: [[f64; 8]; 8],
}

/// Per-trial 0/1 counters `[S_A1, S_A2, S_B1, S_B2, C11, C12, C21, C22]`.
fn trial_counters(input: &ChInput, i: usize) -> [f64; 8] {
    let (sa, sb, co) = input.flags(i);
    let (a, b) = (input.setting_a[i], input.setting_b[i]);
    let mut c = [0.0; 8];
    c[(a - 1) as usize] = sa as u8 as f64;
    c[2 + (b - 1) as usize] = sb as u8 as f64;
    c[4 + ((a - 1) * 2 + (b - 1)) as usize] = co as u8 as f64;
    c
}

/// Covariance of counter sums over non-overlapping blocks of `block` trials.
///
/// The trailing partial block is dropped; at least two blocks are needed.
pub fn block_covariance(input: &ChInput, block: usize) -> Result<BlockCovariance> {
    if block == 0 {
        return Err(StatsError::InvalidStep { what: "block" });
    }
    let blocks = input.len() / block;
    if blocks < 2 {
        return Err(StatsError::TooFewBlocks { block, blocks });
    }
    let sums: Vec<[f64; 8]> = (0..blocks)
        .map(|k| {
            let mut s = [0.0; 8];
            for i in k * block..(k + 1) * block {
                for (acc, v) in s.iter_mut().zip(trial_counters(input, i)) {
                    *acc += v;
                }
            }
            s
        })
        .collect();

    let n = blocks as f64;
    let mut mean = [0.0; 8];
    for s in &sums {
        for j in 0..8 {
            mean[j] += s[j] / n;
        }
    }
    let mut matrix = [[0.0; 8]; 8];
    for s in &sums {
        for r in 0..8 {
            for c in 0..8 {
                matrix[r][c] += (s[r] - mean[r]) * (s[c] - mean[c]);
            }
        }
    }
    for row in matrix.iter_mut() {
        for v in row.iter_mut() {
            *v /= n - 1.0;
        }
    }
    Ok(BlockCovariance {
        block,
        blocks,
        matrix,
    })
}
