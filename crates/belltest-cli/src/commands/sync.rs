use std::path::Path;

use belltest_core::{AnalysisConfig, RawEvent, Station, SyncEstimate, read_records, recover_clock};

use super::{AnalysisOverrides, CmdResult};

pub struct SyncCommandConfig<'a> {
    pub alice_find: &'a str,
    pub alice_raw: &'a str,
    pub bob_find: &'a str,
    pub bob_raw: &'a str,
    pub output_path: &'a str,
    pub overrides: AnalysisOverrides<'a>,
}

/// Decoded find-sync and production streams of both stations.
pub struct Streams {
    pub alice_find: Vec<RawEvent>,
    pub alice_raw: Vec<RawEvent>,
    pub bob_find: Vec<RawEvent>,
    pub bob_raw: Vec<RawEvent>,
}

impl Streams {
    /// Paths in the order Alice find, Alice raw, Bob find, Bob raw.
    pub fn read(paths: [&str; 4]) -> CmdResult<Self> {
        let [a_find, a_raw, b_find, b_raw] = paths;
        let streams = Self {
            alice_find: read_records(Path::new(a_find), Station::Alice)?,
            alice_raw: read_records(Path::new(a_raw), Station::Alice)?,
            bob_find: read_records(Path::new(b_find), Station::Bob)?,
            bob_raw: read_records(Path::new(b_raw), Station::Bob)?,
        };
        log::info!(
            "read {} / {} events (ALICE find / raw), {} / {} (BOB find / raw)",
            streams.alice_find.len(),
            streams.alice_raw.len(),
            streams.bob_find.len(),
            streams.bob_raw.len()
        );
        Ok(streams)
    }
}

pub fn run(cfg: SyncCommandConfig<'_>) -> CmdResult {
    let analysis = cfg.overrides.load()?;
    let streams = Streams::read([cfg.alice_find, cfg.alice_raw, cfg.bob_find, cfg.bob_raw])?;
    let estimate = estimate_clock(&streams, &analysis)?;
    estimate.to_table().write(Path::new(cfg.output_path))?;
    println!("Wrote {}", cfg.output_path);
    Ok(())
}

pub fn estimate_clock(streams: &Streams, cfg: &AnalysisConfig) -> CmdResult<SyncEstimate> {
    let estimate = recover_clock(
        &streams.alice_find,
        &streams.alice_raw,
        &streams.bob_find,
        &streams.bob_raw,
        cfg,
    )?;
    print_estimate(&estimate);
    Ok(estimate)
}

fn print_estimate(e: &SyncEstimate) {
    println!("Shared clock");
    println!(
        "  period        {} ticks ({:.3} us)",
        e.period_ticks,
        e.period_ticks as f64 * belltest_core::TICK_PS as f64 * 1e-6
    );
    println!("  tolerance     +/- {} ticks", e.tolerance_ticks);
    println!("  pulses/trial  {}", e.pulses_per_trial);
    for station in Station::BOTH {
        println!(
            "  {:<5}         {} good sync pulses",
            station,
            e.station(station).len()
        );
    }
}
