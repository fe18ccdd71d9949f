use std::path::Path;

use serde::Serialize;

use belltest_core::TrialTable;
use belltest_core::config::DEFAULT_SLOT_MASK;
use belltest_stats::{ChInput, ChReport, ResampleConfig, Resampling, ResamplingResult, compute_ch};

use super::CmdResult;

#[derive(Debug, Clone, Copy)]
pub struct ChCommandConfig<'a> {
    pub shuffle: usize,
    pub bootstrap: usize,
    pub threads: usize,
    pub seed: Option<u64>,
    /// Falls back to the default detector slots when unset.
    pub slot_mask: Option<u16>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct ChOutput<'a> {
    trials: usize,
    slot_mask: u16,
    seed: Option<u64>,
    plan: Resampling,
    report: &'a ChReport,
    resampling: &'a ResamplingResult,
}

pub fn run(tables: &[String], cfg: ChCommandConfig<'_>) -> CmdResult {
    println!("[1/3] SHA-256");
    super::print_digests(tables)?;

    println!("[2/3] Loading {} trial table(s)", tables.len());
    let mut table = TrialTable::default();
    for path in tables {
        table.append(TrialTable::read(Path::new(path))?)?;
    }
    println!("    {} trials", table.len());

    analyze(&table, &cfg)?;
    Ok(())
}

/// Point estimate, resampling and the summary block for one trial table.
pub fn analyze(table: &TrialTable, cfg: &ChCommandConfig<'_>) -> CmdResult<ChReport> {
    let resample_cfg = ResampleConfig {
        plan: Resampling::from_counts(cfg.shuffle, cfg.bootstrap),
        threads: cfg.threads,
        seed: cfg.seed,
    };
    resample_cfg.validate()?;

    let slot_mask = cfg.slot_mask.unwrap_or(DEFAULT_SLOT_MASK);
    let input = ChInput::from_table(table, slot_mask)?;
    let result = compute_ch(&input)?;

    println!("[3/3] Resampling");
    let resampling = belltest_stats::resample::run(&input, result.s_ch, &resample_cfg)?;
    if resampling.shuffle.is_none() && resampling.bootstrap.is_none() {
        println!("    skipped (--shuffle 0 --bootstrap 0)");
    } else {
        println!("    {} worker thread(s)", resampling.jobs);
    }

    let report = ChReport::new(result, &resampling);
    println!();
    println!("SUMMARY");
    println!("--------");
    println!("{report}");
    println!("--------");

    if let Some(path) = cfg.output_path {
        super::write_json(
            path,
            &ChOutput {
                trials: input.len(),
                slot_mask,
                seed: cfg.seed,
                plan: resample_cfg.plan,
                report: &report,
                resampling: &resampling,
            },
        )?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use belltest_core::SideColumns;

    fn coincident_table(n: usize) -> TrialTable {
        let side = SideColumns {
            clicks: vec![0x40; n],
            settings: vec![1; n],
        };
        TrialTable {
            alice: side.clone(),
            bob: side,
            ..Default::default()
        }
    }

    #[test]
    fn test_json_output_records_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch.json");
        let cfg = ChCommandConfig {
            shuffle: 10,
            bootstrap: 5,
            threads: 2,
            seed: Some(1),
            slot_mask: None,
            output_path: path.to_str(),
        };
        let report = analyze(&coincident_table(4), &cfg).unwrap();
        assert_eq!(report.result.s_ch, 1.0);

        let text = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["plan"]["kind"], "both");
        assert_eq!(v["plan"]["shuffle"], 10);
        assert_eq!(v["plan"]["bootstrap"], 5);
        assert_eq!(v["trials"], 4);
    }
}
