//! CLI for belltest: from raw time-tag files to a CH/Eberhard verdict.

mod commands;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "belltest")]
#[command(about = "belltest: trial synchronization and CH/Eberhard inference for two-station Bell tests")]
#[command(version = belltest_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Knobs shared by every stage that touches raw streams.
#[derive(Args)]
struct AnalysisArgs {
    /// Analysis configuration JSON; flags below override its values
    #[arg(long)]
    config: Option<String>,

    /// Pulses per trial
    #[arg(long)]
    pk: Option<u32>,

    /// Good-sync phase tolerance in ticks
    #[arg(long)]
    tolerance: Option<u64>,

    /// Phase-window radius as a fraction of the period, in (0, 0.5)
    #[arg(long)]
    radius: Option<f64>,
}

/// Resampling and statistic options.
#[derive(Args)]
struct ChArgs {
    /// Number of permutations for the shuffle test (0 = skip)
    #[arg(long, default_value = "0")]
    shuffle: usize,

    /// Number of bootstrap samples (0 = skip)
    #[arg(long, default_value = "0")]
    bootstrap: usize,

    /// Upper bound on worker threads
    #[arg(long, default_value = "16")]
    threads: usize,

    /// RNG seed for shuffle / bootstrap (default: OS entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Detector slot mask entering the CH counters, hex accepted
    /// [default: config value, else 0x03C0]
    #[arg(long, value_parser = commands::parse_mask)]
    slot_mask: Option<u16>,

    /// Write the report and resampling output as JSON
    #[arg(long)]
    output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover the shared GPS clock and write the good-sync table
    Sync {
        /// Alice's short find-sync capture
        alice_find: String,
        /// Alice's production stream
        alice_raw: String,
        /// Bob's short find-sync capture
        bob_find: String,
        /// Bob's production stream
        bob_raw: String,

        /// Output path for the sync table
        #[arg(long, default_value = "sync_table.json")]
        out: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Bin both stations into trials and write the per-trial table
    Trials {
        alice_raw: String,
        bob_raw: String,
        /// Sync table from `belltest sync`
        sync_json: String,

        /// Output path for the trial table
        #[arg(long, default_value = "trials.json")]
        out: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// CH/Eberhard test with optional shuffle and bootstrap on trial tables
    Ch {
        /// One or more trial tables; they are concatenated
        #[arg(required = true)]
        tables: Vec<String>,

        #[command(flatten)]
        ch: ChArgs,
    },

    /// Full pipeline: four raw files to CH report
    Run {
        alice_find: String,
        alice_raw: String,
        bob_find: String,
        bob_raw: String,

        /// Also write the sync table here
        #[arg(long)]
        sync_out: Option<String>,

        /// Also write the trial table here (one file per radius when scanning)
        #[arg(long)]
        trials_out: Option<String>,

        /// Comma-separated radii: sync and assign once, then aggregate and
        /// run the CH test at each radius
        #[arg(long, value_delimiter = ',', conflicts_with = "radius")]
        scan_radius: Vec<f64>,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[command(flatten)]
        ch: ChArgs,
    },

    /// Stability diagnostics: cumulative CH, counter covariance, mask
    /// coverage, peak drift and (with --sync) GPS jitter
    Diagnose {
        /// Trial table to inspect
        table: String,

        /// Sync table for the GPS jitter check
        #[arg(long)]
        sync: Option<String>,

        /// Trial step of the cumulative CH curve
        #[arg(long, default_value = "100")]
        step: usize,

        /// Trials per block for the counter covariance
        #[arg(long, default_value = "500")]
        cov_block: usize,

        /// Click phases per block for the peak-drift scan
        #[arg(long, default_value = "1000")]
        drift_block: usize,

        /// Odd window of the running-median period filter
        #[arg(long, default_value = "201")]
        window: usize,

        /// Slots Alice is expected to use
        #[arg(long, default_value = "0x00C0", value_parser = commands::parse_mask)]
        alice_slots: u16,

        /// Slots Bob is expected to use
        #[arg(long, default_value = "0x0300", value_parser = commands::parse_mask)]
        bob_slots: u16,

        /// Fraction below which an expected mask is flagged as rare
        #[arg(long, default_value = "1e-6")]
        threshold: f64,

        /// Detector slot mask for the CH counters (hex accepted)
        #[arg(long, default_value = "0x03C0", value_parser = commands::parse_mask)]
        slot_mask: u16,

        /// Write all diagnostics as JSON
        #[arg(long)]
        output: Option<String>,
    },
}

impl AnalysisArgs {
    fn overrides(&self) -> commands::AnalysisOverrides<'_> {
        commands::AnalysisOverrides {
            config_path: self.config.as_deref(),
            pulses_per_trial: self.pk,
            tolerance: self.tolerance,
            radius: self.radius,
        }
    }
}

impl ChArgs {
    fn config(&self) -> commands::ch::ChCommandConfig<'_> {
        commands::ch::ChCommandConfig {
            shuffle: self.shuffle,
            bootstrap: self.bootstrap,
            threads: self.threads,
            seed: self.seed,
            slot_mask: self.slot_mask,
            output_path: self.output.as_deref(),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sync {
            alice_find,
            alice_raw,
            bob_find,
            bob_raw,
            out,
            analysis,
        } => commands::sync::run(commands::sync::SyncCommandConfig {
            alice_find: &alice_find,
            alice_raw: &alice_raw,
            bob_find: &bob_find,
            bob_raw: &bob_raw,
            output_path: &out,
            overrides: analysis.overrides(),
        }),
        Commands::Trials {
            alice_raw,
            bob_raw,
            sync_json,
            out,
            analysis,
        } => commands::trials::run(commands::trials::TrialsCommandConfig {
            alice_raw: &alice_raw,
            bob_raw: &bob_raw,
            sync_path: &sync_json,
            output_path: &out,
            overrides: analysis.overrides(),
        }),
        Commands::Ch { tables, ch } => commands::ch::run(&tables, ch.config()),
        Commands::Run {
            alice_find,
            alice_raw,
            bob_find,
            bob_raw,
            sync_out,
            trials_out,
            scan_radius,
            analysis,
            ch,
        } => commands::pipeline::run(commands::pipeline::PipelineCommandConfig {
            alice_find: &alice_find,
            alice_raw: &alice_raw,
            bob_find: &bob_find,
            bob_raw: &bob_raw,
            sync_out: sync_out.as_deref(),
            trials_out: trials_out.as_deref(),
            scan_radius: &scan_radius,
            overrides: analysis.overrides(),
            ch: ch.config(),
        }),
        Commands::Diagnose {
            table,
            sync,
            step,
            cov_block,
            drift_block,
            window,
            alice_slots,
            bob_slots,
            threshold,
            slot_mask,
            output,
        } => commands::diagnose::run(commands::diagnose::DiagnoseCommandConfig {
            table_path: &table,
            sync_path: sync.as_deref(),
            step,
            cov_block,
            drift_block,
            window,
            alice_slots,
            bob_slots,
            threshold,
            slot_mask,
            output_path: output.as_deref(),
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_radius_list_and_conflict() {
        let files = ["run", "a_find", "a_raw", "b_find", "b_raw"];
        let cli = Cli::try_parse_from(
            std::iter::once("belltest")
                .chain(files)
                .chain(["--scan-radius", "0.01,0.02,0.05"]),
        )
        .unwrap();
        let Commands::Run { scan_radius, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(scan_radius, vec![0.01, 0.02, 0.05]);

        let both = Cli::try_parse_from(
            std::iter::once("belltest")
                .chain(files)
                .chain(["--scan-radius", "0.01", "--radius", "0.02"]),
        );
        assert!(both.is_err());
    }
}
