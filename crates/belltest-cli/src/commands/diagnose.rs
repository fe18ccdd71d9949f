use std::path::Path;

use serde::Serialize;

use belltest_core::{
    DriftPoint, MaskCoverage, PeriodJitter, Station, SyncTable, TrialTable, mask_coverage,
    peak_drift, period_jitter,
};
use belltest_stats::diagnostics::COUNTER_LABELS;
use belltest_stats::{BlockCovariance, ChInput, CumulativePoint, block_covariance, cumulative_ch};

use super::CmdResult;

pub struct DiagnoseCommandConfig<'a> {
    pub table_path: &'a str,
    pub sync_path: Option<&'a str>,
    pub step: usize,
    pub cov_block: usize,
    pub drift_block: usize,
    pub window: usize,
    pub alice_slots: u16,
    pub bob_slots: u16,
    pub threshold: f64,
    pub slot_mask: u16,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct StationCoverage {
    expected: Vec<u16>,
    rare: Vec<u16>,
    coverage: MaskCoverage,
}

#[derive(Serialize)]
struct StationJitter {
    station: Station,
    jitter: PeriodJitter,
}

#[derive(Default, Serialize)]
struct DiagnoseOutput {
    trials: usize,
    cumulative: Vec<CumulativePoint>,
    covariance: Option<BlockCovariance>,
    alice_masks: Option<StationCoverage>,
    bob_masks: Option<StationCoverage>,
    peak_drift: Vec<DriftPoint>,
    jitter: Vec<StationJitter>,
}

/// Single-bit masks of `slots`, lowest first.
fn single_bits(slots: u16) -> Vec<u16> {
    (0..16).map(|b| 1u16 << b).filter(|m| slots & m != 0).collect()
}

pub fn run(cfg: DiagnoseCommandConfig<'_>) -> CmdResult {
    let table = TrialTable::read(Path::new(cfg.table_path))?;
    let mut out = DiagnoseOutput {
        trials: table.len(),
        ..Default::default()
    };
    println!("Diagnostics for {} ({} trials)", cfg.table_path, table.len());

    let input = ChInput::from_table(&table, cfg.slot_mask)?;

    // Cumulative CH
    out.cumulative = cumulative_ch(&input, cfg.step)?;
    println!();
    println!("Cumulative CH (step {})", cfg.step);
    match out.cumulative.last() {
        Some(p) => println!(
            "  {} points, last: {} trials  S = {:.6} +/- {:.6}",
            out.cumulative.len(),
            p.n_trials,
            p.s_ch,
            p.sigma
        ),
        None => println!("  no prefix with non-zero singles"),
    }

    // Counter covariance
    println!();
    println!("Counter covariance (block {})", cfg.cov_block);
    match block_covariance(&input, cfg.cov_block) {
        Ok(cov) => {
            print_covariance(&cov);
            out.covariance = Some(cov);
        }
        Err(e) => {
            log::warn!("covariance skipped: {e}");
            println!("  skipped: {e}");
        }
    }

    // Mask coverage
    println!();
    println!("Click-mask coverage (threshold {:e})", cfg.threshold);
    out.alice_masks = Some(coverage(Station::Alice, &table, cfg.alice_slots, cfg.threshold));
    out.bob_masks = Some(coverage(Station::Bob, &table, cfg.bob_slots, cfg.threshold));

    // Peak drift
    println!();
    println!("Peak drift (block {})", cfg.drift_block);
    if table.period_ticks == 0 || table.phase_ticks.is_empty() {
        println!("  skipped: table has no click phases");
    } else {
        out.peak_drift = peak_drift(&table.phase_ticks, table.period_ticks, cfg.drift_block)?;
        let peaks = out.peak_drift.iter().map(|d| d.peak_phase_ticks);
        match (peaks.clone().min(), peaks.max()) {
            (Some(lo), Some(hi)) => println!(
                "  {} blocks, peak in [{lo}, {hi}] ticks (spread {})",
                out.peak_drift.len(),
                hi - lo
            ),
            _ => println!("  fewer than {} click phases", cfg.drift_block),
        }
    }

    // GPS jitter
    if let Some(sync_path) = cfg.sync_path {
        let sync = SyncTable::read(Path::new(sync_path))?;
        println!();
        println!("GPS period jitter (window {})", cfg.window);
        for station in Station::BOTH {
            let Some(tags) = sync.tags(station) else {
                println!("  {station}: skipped, sync table has no timestamps");
                continue;
            };
            let jitter = period_jitter(tags, sync.delta_ticks, cfg.window)?;
            print_jitter(station, &jitter);
            out.jitter.push(StationJitter { station, jitter });
        }
    }

    if let Some(path) = cfg.output_path {
        super::write_json(path, &out)?;
    }
    Ok(())
}

fn coverage(station: Station, table: &TrialTable, slots: u16, threshold: f64) -> StationCoverage {
    let expected = single_bits(slots);
    let coverage = mask_coverage(&table.side(station).clicks, slots);
    for m in &coverage.masks {
        println!(
            "  {station:<5} 0x{:04X}  {:>10}  {:.6}",
            m.mask, m.count, m.fraction
        );
    }
    if coverage.out_of_range > 0 {
        println!(
            "  {station:<5} BAD     {:>10}  {:.6}",
            coverage.out_of_range,
            coverage.out_of_range_fraction()
        );
    }
    let rare = coverage.rare(&expected, threshold);
    for m in &rare {
        log::warn!("{station}: expected mask 0x{m:04X} below {threshold:e}");
    }
    StationCoverage {
        expected,
        rare,
        coverage,
    }
}

fn print_covariance(cov: &BlockCovariance) {
    println!("  {} blocks", cov.blocks);
    print!("  {:>6}", "");
    for label in COUNTER_LABELS {
        print!(" {label:>10}");
    }
    println!();
    for (label, row) in COUNTER_LABELS.iter().zip(cov.matrix.iter()) {
        print!("  {label:>6}");
        for v in row {
            print!(" {v:>10.3}");
        }
        println!();
    }
}

fn print_jitter(station: Station, j: &PeriodJitter) {
    let worst = j
        .phase_residuals
        .iter()
        .map(|r| r.unsigned_abs())
        .max()
        .unwrap_or(0);
    let lo = j.running_median.iter().min().copied().unwrap_or(0);
    let hi = j.running_median.iter().max().copied().unwrap_or(0);
    println!(
        "  {station}: {} periods, running median in [{lo}, {hi}], max |residual| {worst} ticks",
        j.periods.len()
    );
}
