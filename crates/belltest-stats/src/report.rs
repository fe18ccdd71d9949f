//! Text summary of a CH/Eberhard run.

use std::fmt;

use serde::Serialize;

use crate::ch::ChResult;
use crate::resample::ResamplingResult;

/// Everything printed in the summary block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChReport {
    pub result: ChResult,
    pub p_shuffle: Option<f64>,
    pub ci: Option<(f64, f64)>,
    /// `(undefined, total)` bootstrap draws, set only when some draw had
    /// no singles.
    pub undefined_draws: Option<(usize, usize)>,
}

impl ChReport {
    pub fn new(result: ChResult, resampling: &ResamplingResult) -> Self {
        Self {
            result,
            p_shuffle: resampling.shuffle.map(|s| s.p_value),
            ci: resampling.bootstrap.as_ref().map(|b| b.ci),
            undefined_draws: resampling
                .bootstrap
                .as_ref()
                .filter(|b| b.undefined_draws > 0)
                .map(|b| (b.undefined_draws, b.draws())),
        }
    }
}

impl fmt::Display for ChReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.result;
        writeln!(f, "CH-norm (NIST)      = {:.6}  +/- {:.6}", r.s_ch, r.sigma)?;
        writeln!(f, "p-value (LR bound)  = {}", sci(r.p_value_lr, 3, false))?;
        if let Some(p) = self.p_shuffle {
            writeln!(f, "p-value (shuffle)   = {}", sci(p, 3, false))?;
        }
        if let Some((lo, hi)) = self.ci {
            writeln!(f, "95% CI (bootstrap)  = [{lo:.4}, {hi:.4}]")?;
        }
        if let Some((undefined, total)) = self.undefined_draws {
            writeln!(
                f,
                "  {undefined} of {total} bootstrap draws had no singles and were dropped"
            )?;
        }
        writeln!(
            f,
            "dA = {}   (z = {:+.2})",
            sci(r.alice.delta, 4, true),
            r.alice.z
        )?;
        write!(f, "dB = {}   (z = {:+.2})", sci(r.bob.delta, 4, true), r.bob.z)
    }
}

/// Scientific notation with a signed, at least two-digit exponent
/// (`1.234e-05`, `+5.0000e+00`).
pub fn sci(x: f64, precision: usize, signed: bool) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        let sign = if x < 0.0 { "-" } else if signed { "+" } else { "" };
        return format!("{sign}inf");
    }
    let raw = if signed {
        format!("{x:+.precision$e}")
    } else {
        format!("{x:.precision$e}")
    };
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::{ChInput, compute_ch};
    use crate::resample::BootstrapOutcome;

    #[test]
    fn test_sci_matches_printf_style() {
        assert_eq!(sci(1.234e-5, 3, false), "1.234e-05");
        assert_eq!(sci(0.5, 3, false), "5.000e-01");
        assert_eq!(sci(0.0, 3, false), "0.000e+00");
        assert_eq!(sci(-0.0125, 4, true), "-1.2500e-02");
        assert_eq!(sci(0.0, 4, true), "+0.0000e+00");
        assert_eq!(sci(3.2e120, 3, false), "3.200e+120");
        assert_eq!(sci(f64::NAN, 3, false), "nan");
    }

    #[test]
    fn test_report_layout() {
        let input = ChInput::from_columns(&[0x40], &[1], &[0x40], &[1], 0x03C0).unwrap();
        let result = compute_ch(&input).unwrap();
        let report = ChReport {
            result,
            p_shuffle: Some(0.5),
            ci: Some((0.25, 1.0)),
            undefined_draws: None,
        };
        let lines: Vec<String> = report.to_string().lines().map(String::from).collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "CH-norm (NIST)      = 1.000000  +/- 0.707107");
        assert_eq!(lines[1], "p-value (LR bound)  = 7.865e-02");
        assert_eq!(lines[2], "p-value (shuffle)   = 5.000e-01");
        assert_eq!(lines[3], "95% CI (bootstrap)  = [0.2500, 1.0000]");
        // no trials under the second remote setting: probability 0, z undefined
        assert_eq!(lines[4], "dA = +1.0000e+00   (z = +0.00)");
        assert_eq!(lines[5], "dB = +1.0000e+00   (z = +0.00)");
    }

    #[test]
    fn test_optional_lines_omitted() {
        let input = ChInput::from_columns(&[0x40], &[1], &[0x40], &[1], 0x03C0).unwrap();
        let report = ChReport::new(compute_ch(&input).unwrap(), &ResamplingResult::default());
        assert_eq!(report.to_string().lines().count(), 4);
    }

    #[test]
    fn test_dropped_bootstrap_draws_reported() {
        let input = ChInput::from_columns(&[0x40], &[1], &[0x40], &[1], 0x03C0).unwrap();
        let resampling = ResamplingResult {
            bootstrap: Some(BootstrapOutcome {
                samples: vec![1.0; 6],
                undefined_draws: 4,
                ci: (1.0, 1.0),
            }),
            ..Default::default()
        };
        let report = ChReport::new(compute_ch(&input).unwrap(), &resampling);
        assert_eq!(report.undefined_draws, Some((4, 10)));
        let lines: Vec<String> = report.to_string().lines().map(String::from).collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], "95% CI (bootstrap)  = [1.0000, 1.0000]");
        assert_eq!(
            lines[3],
            "  4 of 10 bootstrap draws had no singles and were dropped"
        );
    }
}
