use std::path::Path;

use serde::Serialize;

use belltest_core::{AnalysisConfig, AssignedEvents, validate_radius};

use super::ch::ChCommandConfig;
use super::sync::Streams;
use super::{AnalysisOverrides, CmdResult};

pub struct PipelineCommandConfig<'a> {
    pub alice_find: &'a str,
    pub alice_raw: &'a str,
    pub bob_find: &'a str,
    pub bob_raw: &'a str,
    pub sync_out: Option<&'a str>,
    pub trials_out: Option<&'a str>,
    /// Radii to scan; empty runs the single configured radius.
    pub scan_radius: &'a [f64],
    pub overrides: AnalysisOverrides<'a>,
    pub ch: ChCommandConfig<'a>,
}

/// One row of a radius scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPoint {
    pub radius: f64,
    pub trials: usize,
    pub s_ch: f64,
    pub sigma: f64,
    pub p_value_lr: f64,
    pub p_shuffle: Option<f64>,
    pub ci: Option<(f64, f64)>,
    pub multi_bit_alice: usize,
    pub multi_bit_bob: usize,
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    seed: Option<u64>,
    slot_mask: Option<u16>,
    points: &'a [ScanPoint],
}

/// Raw streams to CH report without intermediate files unless asked for.
pub fn run(cfg: PipelineCommandConfig<'_>) -> CmdResult {
    let analysis = cfg.overrides.load()?;
    for &r in cfg.scan_radius {
        validate_radius(r)?;
    }
    let paths = [cfg.alice_find, cfg.alice_raw, cfg.bob_find, cfg.bob_raw];

    println!("[1/3] SHA-256");
    super::print_digests(&paths)?;

    println!("[2/3] Synchronizing");
    let streams = Streams::read(paths)?;
    let estimate = super::sync::estimate_clock(&streams, &analysis)?;
    if let Some(path) = cfg.sync_out {
        estimate.to_table().write(Path::new(path))?;
        println!("Wrote {path}");
    }

    let assigned = super::trials::assign_streams(
        [
            (streams.alice_raw.as_slice(), &estimate.alice),
            (streams.bob_raw.as_slice(), &estimate.bob),
        ],
        estimate.period_ticks,
        estimate.pulses_per_trial,
    )?;
    drop(streams);

    let ch = ChCommandConfig {
        slot_mask: cfg.ch.slot_mask.or(Some(analysis.slot_mask)),
        ..cfg.ch
    };

    if !cfg.scan_radius.is_empty() {
        let points = scan(
            &assigned,
            estimate.period_ticks,
            &analysis,
            cfg.scan_radius,
            &ch,
            cfg.trials_out,
        )?;
        print_scan(&points);
        if let Some(path) = ch.output_path {
            super::write_json(
                path,
                &ScanOutput {
                    seed: ch.seed,
                    slot_mask: ch.slot_mask,
                    points: &points,
                },
            )?;
        }
        return Ok(());
    }

    let agg = super::trials::aggregate_assigned(&assigned, estimate.period_ticks, &analysis)?;
    if let Some(path) = cfg.trials_out {
        agg.table.write(Path::new(path))?;
        println!("Wrote {path}");
    }
    super::ch::analyze(&agg.table, &ch)?;
    Ok(())
}

/// Aggregate the same assigned trials once per radius and run the CH test
/// on each table.
///
/// With `trials_out` set, each table is written next to it with the radius
/// appended to the file stem.
pub fn scan(
    assigned: &[AssignedEvents; 2],
    period: u64,
    analysis: &AnalysisConfig,
    radii: &[f64],
    ch: &ChCommandConfig<'_>,
    trials_out: Option<&str>,
) -> CmdResult<Vec<ScanPoint>> {
    let ch = ChCommandConfig {
        output_path: None,
        ..*ch
    };
    let mut points = Vec::with_capacity(radii.len());
    for (i, &radius) in radii.iter().enumerate() {
        println!();
        println!("Radius {radius} ({}/{})", i + 1, radii.len());
        let cfg = AnalysisConfig {
            radius,
            ..analysis.clone()
        };
        let agg = super::trials::aggregate_assigned(assigned, period, &cfg)?;
        if let Some(base) = trials_out {
            let path = radius_path(base, radius);
            agg.table.write(Path::new(&path))?;
            println!("Wrote {path}");
        }
        let report = super::ch::analyze(&agg.table, &ch)?;
        points.push(ScanPoint {
            radius,
            trials: agg.table.len(),
            s_ch: report.result.s_ch,
            sigma: report.result.sigma,
            p_value_lr: report.result.p_value_lr,
            p_shuffle: report.p_shuffle,
            ci: report.ci,
            multi_bit_alice: agg.stats.alice.multi_bit_trials,
            multi_bit_bob: agg.stats.bob.multi_bit_trials,
        });
    }
    Ok(points)
}

/// `dir/name.ext` becomes `dir/name_r<radius>.ext`.
fn radius_path(path: &str, radius: f64) -> String {
    let p = Path::new(path);
    let stem = p
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match p.extension() {
        Some(ext) => format!("{stem}_r{radius}.{}", ext.to_string_lossy()),
        None => format!("{stem}_r{radius}"),
    };
    p.with_file_name(name).to_string_lossy().into_owned()
}

fn print_scan(points: &[ScanPoint]) {
    println!();
    println!("RADIUS SCAN");
    println!("--------");
    println!(
        "  {:>8}  {:>10}  {:>10}  {:>10}  {:>10}  {:>11}",
        "radius", "trials", "S_ch", "sigma", "p_shuffle", "multi-bit"
    );
    for p in points {
        let shuffle = p
            .p_shuffle
            .map_or_else(|| "-".to_string(), |v| belltest_stats::sci(v, 3, false));
        println!(
            "  {:>8}  {:>10}  {:>10.6}  {:>10.6}  {:>10}  {:>5}/{:<5}",
            p.radius, p.trials, p.s_ch, p.sigma, shuffle, p.multi_bit_alice, p.multi_bit_bob
        );
    }
    println!("--------");
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u64 = 1_000;

    fn push(ev: &mut AssignedEvents, trial: u32, pulse: u16, time: u64, channel: u8) {
        ev.trial.push(trial);
        ev.pulse.push(pulse);
        ev.time.push(time);
        ev.channel.push(channel);
    }

    /// Four trials at settings (1, 1). Every station clicks in slot 6 at
    /// phase 0.1; Alice also clicks in slot 7 at phase 0.25 in even trials.
    fn assigned() -> [AssignedEvents; 2] {
        let mut alice = AssignedEvents::default();
        let mut bob = AssignedEvents::default();
        for k in 0..4u32 {
            let base = k as u64 * 100 * P;
            for ev in [&mut alice, &mut bob] {
                push(ev, k, 0, base, 2);
                push(ev, k, 6, base + 6 * P + P / 10, 0);
            }
            if k % 2 == 0 {
                push(&mut alice, k, 7, base + 7 * P + P / 4, 0);
            }
        }
        [alice, bob]
    }

    fn ch_config() -> ChCommandConfig<'static> {
        ChCommandConfig {
            shuffle: 0,
            bootstrap: 0,
            threads: 1,
            seed: Some(0),
            slot_mask: Some(0x03C0),
            output_path: None,
        }
    }

    #[test]
    fn test_scan_reaggregates_per_radius() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("trials.json");
        let points = scan(
            &assigned(),
            P,
            &AnalysisConfig::default(),
            &[0.01, 0.2],
            &ch_config(),
            base.to_str(),
        )
        .unwrap();
        assert_eq!(points.len(), 2);

        let narrow = &points[0];
        assert_eq!(narrow.radius, 0.01);
        assert_eq!(narrow.trials, 4);
        assert_eq!(narrow.s_ch, 1.0);
        assert_eq!(narrow.multi_bit_alice, 0);

        // the wider window picks up the second slot and breaks two coincidences
        let wide = &points[1];
        assert_eq!(wide.multi_bit_alice, 2);
        assert_eq!(wide.multi_bit_bob, 0);
        assert_eq!(wide.s_ch, 0.5);
        assert!(wide.p_shuffle.is_none());

        assert!(dir.path().join("trials_r0.01.json").exists());
        assert!(dir.path().join("trials_r0.2.json").exists());
    }

    #[test]
    fn test_scan_rejects_bad_radius() {
        let res = scan(
            &assigned(),
            P,
            &AnalysisConfig::default(),
            &[0.1, 0.6],
            &ch_config(),
            None,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_radius_path() {
        assert_eq!(radius_path("out/run.json", 0.05), "out/run_r0.05.json");
        assert_eq!(radius_path("trials", 0.1), "trials_r0.1");
    }
}
