use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};

use wbalrs::config::AppConfig;
use wbalrs::engine::integrator::tau;
use wbalrs::engine::projection::{maximal_power_available, time_to_exhaustion};
use wbalrs::logging::init_logging;
use wbalrs::session::run_ride;
use wbalrs::{apply_constraints, CsvSampleReader, EngineSnapshot, OutputChannel, SharedEngine};

/// wbalrs - Real-time W' balance
///
/// Tracks remaining anaerobic capacity from a power stream, re-estimates CP
/// during hard efforts and counts burned matches.
#[derive(Parser)]
#[command(name = "wbalrs")]
#[command(version)]
#[command(about = "W' balance engine", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded ride (CSV with timestamp and power columns)
    Replay {
        /// Input file path
        #[arg(short, long)]
        file: PathBuf,

        /// Override critical power (W)
        #[arg(long)]
        cp: Option<f64>,

        /// Override W' (J)
        #[arg(long)]
        w_prime: Option<f64>,

        /// Print a row every N samples (0 for summary only)
        #[arg(short, long, default_value = "60")]
        every: usize,

        /// Power for the time-to-exhaustion column (W)
        #[arg(long, default_value = "400")]
        tte_power: f64,

        /// Output format
        #[arg(short = 'F', long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Project time to exhaustion and maximal power available
    Project {
        /// Sustained power (W)
        #[arg(short, long)]
        power: f64,

        /// Critical power (W), defaults to the configured value
        #[arg(long)]
        cp: Option<f64>,

        /// W' (J), defaults to the configured value
        #[arg(long)]
        w_prime: Option<f64>,

        /// Current balance (J), defaults to full W'
        #[arg(short, long)]
        balance: Option<f64>,

        /// Typical below-CP power (W) for tau
        #[arg(long, default_value = "0")]
        below_cp: f64,
    },

    /// Configure application settings
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Tabled)]
struct ReplayRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "W' bal (J)")]
    balance: String,
    #[tabled(rename = "%")]
    percent: String,
    #[tabled(rename = "CP (W)")]
    cp: String,
    #[tabled(rename = "MPA (W)")]
    mpa: String,
    #[tabled(rename = "TTE")]
    tte: String,
    #[tabled(rename = "Matches")]
    matches: String,
}

fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn format_tte(snapshot: &EngineSnapshot, power: f64) -> String {
    let channel = OutputChannel::TimeToExhaustion { power };
    match channel.value(snapshot) {
        Some(secs) => format_clock(secs),
        None => "∞".to_string(),
    }
}

fn replay_row(snapshot: &EngineSnapshot, tte_power: f64) -> ReplayRow {
    ReplayRow {
        time: format_clock(snapshot.elapsed_secs),
        balance: format!("{:.0}", snapshot.balance),
        percent: format!("{:.1}", snapshot.percent_balance),
        cp: format!("{:.0}", snapshot.estimated_cp),
        mpa: format!("{:.0}", snapshot.maximal_power_available),
        tte: format_tte(snapshot, tte_power),
        matches: snapshot.match_count.to_string(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.logging.level = config.logging.level.raised_by(cli.verbose);
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Replay {
            file,
            cp,
            w_prime,
            every,
            tte_power,
            format,
        } => {
            if let Some(cp) = cp {
                config.athlete.critical_power = cp;
            }
            if let Some(w_prime) = w_prime {
                config.athlete.w_prime = w_prime;
            }
            config.validate()?;

            let engine = SharedEngine::new(config.engine(0));
            let mut source = CsvSampleReader::from_path(&file)
                .with_context(|| format!("Failed to open ride file: {}", file.display()))?;
            let report = run_ride(&engine, &mut source, every)
                .with_context(|| format!("Failed to replay {}", file.display()))?;

            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report.snapshots)?);
                println!("{}", serde_json::to_string_pretty(&report.summary)?);
                return Ok(());
            }

            println!("{}", format!("Replayed {} samples from {}", report.samples, file.display()).green().bold());
            let rows: Vec<ReplayRow> = report
                .snapshots
                .iter()
                .map(|snapshot| replay_row(snapshot, tte_power))
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{}", table);

            let summary = &report.summary;
            println!("{}", "Session summary".cyan().bold());
            println!("  Final balance: {:.0} J (min {:.0} J)", summary.final_balance, summary.min_balance);
            println!("  Matches burned: {}", summary.match_count);
            println!("  CP: {:.0} W (initial {:.0} W)", summary.estimated_cp, summary.initial_cp);
            println!("  W' from test: {:.0} J (initial {:.0} J)", summary.test_w_prime, summary.initial_w_prime);
            if let Some(notification) = summary.notification() {
                println!("{}", notification.yellow().bold());
            }
        }

        Commands::Project {
            power,
            cp,
            w_prime,
            balance,
            below_cp,
        } => {
            let constrained = apply_constraints(
                cp.unwrap_or(config.athlete.critical_power),
                w_prime.unwrap_or(config.athlete.w_prime),
            );
            let balance = balance.unwrap_or(constrained.w_prime);
            let tau = tau(constrained.critical_power, below_cp);

            println!("{}", "Projection".blue().bold());
            println!("  CP: {:.0} W, W': {:.0} J, balance: {:.0} J", constrained.critical_power, constrained.w_prime, balance);
            match time_to_exhaustion(balance, constrained.critical_power, power) {
                Some(tte) => println!("  Time to exhaustion at {:.0} W: {}", power, format_clock(tte.as_secs_f64())),
                None => println!("  Time to exhaustion at {:.0} W: unbounded", power),
            }
            println!(
                "  Maximal power available: {:.0} W (tau {:.0} s)",
                maximal_power_available(balance, constrained.critical_power, tau),
                tau
            );
        }

        Commands::Config { init, show } => {
            let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
            if init {
                let mut fresh = AppConfig::default();
                fresh
                    .save_to_file(&path)
                    .with_context(|| format!("Failed to write config file: {}", path.display()))?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
            if show || !init {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}
