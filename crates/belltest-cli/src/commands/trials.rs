use std::path::Path;

use belltest_core::{
    Aggregation, AnalysisConfig, AssignedEvents, RawEvent, Station, StationSync, SyncTable,
    aggregate, assign_trials, read_records,
};

use super::{AnalysisOverrides, CmdResult};

pub struct TrialsCommandConfig<'a> {
    pub alice_raw: &'a str,
    pub bob_raw: &'a str,
    pub sync_path: &'a str,
    pub output_path: &'a str,
    pub overrides: AnalysisOverrides<'a>,
}

pub fn run(cfg: TrialsCommandConfig<'_>) -> CmdResult {
    let analysis = cfg.overrides.load()?;
    let table = SyncTable::read(Path::new(cfg.sync_path))?;
    table.validate(&analysis)?;
    if table.pk != analysis.pulses_per_trial {
        log::info!(
            "using pk = {} from {} (config says {})",
            table.pk,
            cfg.sync_path,
            analysis.pulses_per_trial
        );
    }

    let alice = read_records(Path::new(cfg.alice_raw), Station::Alice)?;
    let bob = read_records(Path::new(cfg.bob_raw), Station::Bob)?;
    let sync_channel = analysis.channels.sync;
    let alice_sync = table.station_sync(Station::Alice, &alice, sync_channel)?;
    let bob_sync = table.station_sync(Station::Bob, &bob, sync_channel)?;

    let agg = build_table(
        [(alice.as_slice(), &alice_sync), (bob.as_slice(), &bob_sync)],
        table.delta_ticks,
        table.pk,
        &analysis,
    )?;
    agg.table.write(Path::new(cfg.output_path))?;
    println!("Wrote {}", cfg.output_path);
    Ok(())
}

/// Assign both stations to trials and aggregate them into the retained-trial
/// table.
pub fn build_table(
    streams: [(&[RawEvent], &StationSync); 2],
    period: u64,
    pk: u32,
    cfg: &AnalysisConfig,
) -> CmdResult<Aggregation> {
    let assigned = assign_streams(streams, period, pk)?;
    aggregate_assigned(&assigned, period, cfg)
}

/// Trial assignment of both stations, Alice first.
pub fn assign_streams(
    streams: [(&[RawEvent], &StationSync); 2],
    period: u64,
    pk: u32,
) -> CmdResult<[AssignedEvents; 2]> {
    let [(a_events, a_sync), (b_events, b_sync)] = streams;
    let alice = assign_trials(Station::Alice, a_events, a_sync, period, pk)?;
    let bob = assign_trials(Station::Bob, b_events, b_sync, period, pk)?;
    Ok([alice, bob])
}

pub fn aggregate_assigned(
    assigned: &[AssignedEvents; 2],
    period: u64,
    cfg: &AnalysisConfig,
) -> CmdResult<Aggregation> {
    let [alice, bob] = assigned;
    let agg = aggregate(alice, bob, period, cfg)?;
    print_aggregation(&agg);
    Ok(agg)
}

fn print_aggregation(agg: &Aggregation) {
    let s = &agg.stats;
    println!("Trials");
    for side in [&s.alice, &s.bob] {
        println!(
            "  {:<5}  peak {:.4}  clicks {}/{}  settings {}/{}  multi-bit {}",
            side.station,
            side.peak_centre,
            side.accepted_clicks,
            side.detector_events,
            side.trials_with_setting,
            side.trials,
            side.multi_bit_trials
        );
    }
    println!("  retained {} of {} trials", s.retained_trials, s.total_trials);
}
