//! Integration tests for belltest-stats.
//!
//! Trial table → CH point estimate → shuffle / bootstrap → report.

use belltest_core::TrialTable;
use belltest_core::outcomes::SideColumns;
use belltest_stats::{
    ChInput, ChReport, ResampleConfig, Resampling, StatsError, compute_ch, resample,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MASK: u16 = 0x03C0;

/// Settings and clicks drawn independently: no correlation between stations.
fn null_table(seed: u64, n: usize) -> TrialTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut side = || {
        let mut s = SideColumns::default();
        for _ in 0..n {
            s.settings.push(rng.random_range(1..=2u8));
            let click = if rng.random_bool(0.5) {
                1u16 << rng.random_range(6..10u32)
            } else {
                0
            };
            s.clicks.push(click);
        }
        s
    };
    let alice = side();
    let bob = side();
    TrialTable {
        trial_index: (0..n as u32).collect(),
        alice,
        bob,
        ..Default::default()
    }
}

#[test]
fn single_matching_click_gives_unit_statistic() {
    let table = TrialTable {
        alice: SideColumns {
            clicks: vec![0x0040],
            settings: vec![1],
        },
        bob: SideColumns {
            clicks: vec![0x0040],
            settings: vec![1],
        },
        ..Default::default()
    };
    let input = ChInput::from_table(&table, MASK).unwrap();
    let r = compute_ch(&input).unwrap();
    assert_eq!(r.numer, 1);
    assert_eq!(r.denom, 1.0);
    assert_eq!(r.s_ch, 1.0);
}

#[test]
fn station_exchange_leaves_statistic_unchanged() {
    let input = ChInput::from_table(&null_table(5, 3_000), MASK).unwrap();
    let r = compute_ch(&input).unwrap();
    let s = compute_ch(&input.swapped()).unwrap();
    assert_eq!(r.s_ch.to_bits(), s.s_ch.to_bits());
    assert_eq!(r.sigma.to_bits(), s.sigma.to_bits());
    assert_eq!(r.alice, s.bob);
    assert_eq!(r.bob, s.alice);
}

#[test]
fn trial_order_does_not_matter() {
    let input = ChInput::from_table(&null_table(6, 500), MASK).unwrap();
    let mut rev = input.clone();
    rev.pattern_a.reverse();
    rev.pattern_b.reverse();
    rev.setting_a.reverse();
    rev.setting_b.reverse();
    assert_eq!(compute_ch(&input).unwrap(), compute_ch(&rev).unwrap());
}

#[test]
fn empty_remote_setting_flags_z_undefined() {
    let mut table = null_table(8, 200);
    table.bob.settings = vec![1; 200];
    let input = ChInput::from_table(&table, MASK).unwrap();
    let r = compute_ch(&input).unwrap();
    assert!(!r.alice.defined);
    assert_eq!(r.alice.z, 0.0);
    assert!(r.bob.defined);
}

#[test]
fn null_data_is_not_significant() {
    let input = ChInput::from_table(&null_table(2024, 1_000), MASK).unwrap();
    let r = compute_ch(&input).unwrap();
    assert!(r.s_ch.abs() < 0.5, "S_ch = {}", r.s_ch);

    let cfg = ResampleConfig {
        plan: Resampling::Both {
            shuffle: 2_000,
            bootstrap: 400,
        },
        threads: 4,
        seed: Some(17),
    };
    let res = resample::run(&input, r.s_ch, &cfg).unwrap();
    let shuffle = res.shuffle.unwrap();
    assert!(shuffle.p_value > 0.001, "p_shuffle = {}", shuffle.p_value);
    let boot = res.bootstrap.unwrap();
    assert!(boot.ci.0 <= r.s_ch && r.s_ch <= boot.ci.1);

    // resamples are drawn from the observed trials: they centre on S_ch
    let mean = boot.samples.iter().sum::<f64>() / boot.samples.len() as f64;
    assert!((mean - r.s_ch).abs() < 0.05);
}

#[test]
fn bootstrap_interval_shrinks_with_more_trials() {
    let width = |n: usize| {
        let input = ChInput::from_table(&null_table(99, n), MASK).unwrap();
        let b = resample::bootstrap_ci(&input, 300, 2, Some(4)).unwrap();
        b.ci.1 - b.ci.0
    };
    let small = width(400);
    let large = width(6_400);
    assert!(large < small, "width 400: {small}, width 6400: {large}");
}

#[test]
fn same_seed_and_jobs_reproduce_run() {
    let input = ChInput::from_table(&null_table(1, 800), MASK).unwrap();
    let observed = compute_ch(&input).unwrap().s_ch;
    let cfg = ResampleConfig {
        plan: Resampling::from_counts(300, 100),
        threads: 3,
        seed: Some(12_345),
    };
    let a = resample::run(&input, observed, &cfg).unwrap();
    let b = resample::run(&input, observed, &cfg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn no_singles_is_reported_not_nan() {
    let mut table = null_table(3, 50);
    table.alice.clicks = vec![0; 50];
    table.bob.clicks = vec![0x0001; 50];
    let input = ChInput::from_table(&table, MASK).unwrap();
    assert!(matches!(compute_ch(&input), Err(StatsError::NoSingles)));
}

#[test]
fn report_prints_summary_block() {
    let input = ChInput::from_table(&null_table(10, 1_000), MASK).unwrap();
    let r = compute_ch(&input).unwrap();
    let cfg = ResampleConfig {
        plan: Resampling::Shuffle { iterations: 50 },
        threads: 2,
        seed: Some(0),
    };
    let res = resample::run(&input, r.s_ch, &cfg).unwrap();
    let text = ChReport::new(r, &res).to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("CH-norm (NIST)      = "));
    assert!(lines[1].starts_with("p-value (LR bound)  = "));
    assert!(lines[2].starts_with("p-value (shuffle)   = "));
    assert!(lines[3].starts_with("dA = "));
    assert!(lines[4].starts_with("dB = "));
}
