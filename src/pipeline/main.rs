mod candles;
mod replay_trading;
mod sweep;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use replay_trading::Strategy;
use trend_signals::{EntryMode, StrategyConfig, Timeframe};

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Minute-bar trend following replay & parameter sweep pipeline")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Strategy config file plus command-line overrides
#[derive(clap::Args, Debug, Clone)]
struct ConfigArgs {
    /// JSON strategy config (missing fields use defaults)
    #[arg(short, long, env = "TREND_CONFIG")]
    config: Option<PathBuf>,

    /// Bar period, e.g. 30m, 1h, 4h
    #[arg(short, long, env = "TREND_TIMEFRAME")]
    timeframe: Option<Timeframe>,

    /// Starting cash
    #[arg(long)]
    initial_capital: Option<f64>,

    /// Open as soon as the gates pass instead of waiting for a pullback
    #[arg(long)]
    immediate: bool,

    /// Enable the trend-angle entry
    #[arg(long)]
    angle: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay minute candles through the trader
    Replay {
        /// Candle CSV (timestamp,open,high,low,close,volume), optionally .zst
        #[arg(short, long, env = "TREND_DATA")]
        data: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        /// Trend source driving the trader
        #[arg(short, long, value_enum, default_value = "vidya")]
        strategy: Strategy,

        /// Candles fed before signals are reported
        #[arg(long, default_value = "0")]
        warmup_bars: usize,

        /// Write every signal as one JSON line
        #[arg(long)]
        signals_out: Option<PathBuf>,
    },

    /// Run every parameter combination in parallel
    Sweep {
        /// Candle CSV (timestamp,open,high,low,close,volume), optionally .zst
        #[arg(short, long, env = "TREND_DATA")]
        data: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long, value_enum, default_value = "vidya")]
        strategy: Strategy,

        #[arg(long, default_value = "0")]
        warmup_bars: usize,

        /// Take profit values in percent (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "1.0,1.4,2.0")]
        take_profit: Vec<f64>,

        /// Max loss values in percent (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "2.0,2.5")]
        max_loss: Vec<f64>,

        /// Lock periods after a losing exit (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "3,5")]
        lock_periods: Vec<u32>,

        /// Output CSV ranked by net P&L
        #[arg(short, long, default_value = "sweep_results.csv")]
        output: PathBuf,
    },

    /// Validate a config and print it with defaults filled in
    CheckConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn load_config(path: &Path) -> Result<StrategyConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse config: {:?}", path))
}

fn resolve_config(args: &ConfigArgs) -> Result<StrategyConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => StrategyConfig::default(),
    };

    if let Some(timeframe) = args.timeframe {
        config.timeframe = timeframe;
    }
    if let Some(capital) = args.initial_capital {
        config.initial_capital = capital;
    }
    if args.immediate {
        config.entry.mode = EntryMode::Immediate;
    }
    if args.angle {
        config.trend_angle.enabled = true;
    }

    config.validate()?;
    Ok(config)
}

fn load_data(path: &Path) -> Result<Vec<trend_signals::Bar>> {
    info!("Loading candles from {:?}...", path);
    let start = std::time::Instant::now();
    let bars = candles::load_candles(path)?;
    if bars.is_empty() {
        anyhow::bail!("No candles found in {:?}", path);
    }
    info!("Loaded {} candles in {:.1}s", bars.len(), start.elapsed().as_secs_f64());
    Ok(bars)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Replay {
            data,
            config,
            strategy,
            warmup_bars,
            signals_out,
        } => {
            let config = resolve_config(&config)?;
            let bars = load_data(&data)?;
            replay_trading::run_replay(&bars, config, strategy, warmup_bars, signals_out.as_deref())?;
        }
        Commands::Sweep {
            data,
            config,
            strategy,
            warmup_bars,
            take_profit,
            max_loss,
            lock_periods,
            output,
        } => {
            let config = resolve_config(&config)?;
            let bars = load_data(&data)?;
            let combinations = sweep::generate_combinations(&take_profit, &max_loss, &lock_periods);
            sweep::run_sweep(&bars, &config, strategy, warmup_bars, combinations, &output)?;
        }
        Commands::CheckConfig { config } => {
            let config = resolve_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("Config OK");
        }
    }

    Ok(())
}
