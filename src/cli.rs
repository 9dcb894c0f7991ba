use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::models::AppConfig;

#[derive(Parser)]
#[command(name = "corrfinder")]
#[command(about = "Ranked, cached correlations against a price universe", long_about = None)]
pub struct Cli {
    /// Root of the input data (overrides CORR_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Where cached rankings are stored (overrides CORR_CACHE_DIR)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rank the securities most correlated with a target
    Correlate {
        /// Ticker or macro series code
        target: String,

        /// Data source of the target (price, fred-md, fred-api, fred-api-as-reported)
        #[arg(long, default_value = "price")]
        source: String,

        /// Ignore observations before January 1st of this year
        #[arg(long, default_value_t = crate::constants::DEFAULT_START_YEAR)]
        start_year: i32,

        /// Number of candidates to show (defaults to DEFAULT_TOP_N)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,

        /// Leave OTC securities out of the universe
        #[arg(long)]
        exclude_otc: bool,

        /// Resample everything to one point per month
        #[arg(long)]
        monthly: bool,

        /// Recompute even when a cached ranking is fresh
        #[arg(long)]
        reload: bool,

        /// Values to show: trended or detrended
        #[arg(long, default_value = "trended")]
        display: String,

        /// Trend removal: linear or diff
        #[arg(long, default_value = "linear")]
        detrend: String,

        /// Metadata filter such as sector=Energy,Utilities (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Market cap range such as small..large
        #[arg(long)]
        cap_range: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// List strongest positive and strongest negative correlations separately
        #[arg(long)]
        split: bool,
    },
    /// Pre-compute rankings for several start years
    Warm {
        /// Tickers or macro series codes
        #[arg(required = true)]
        targets: Vec<String>,

        #[arg(long, default_value = "price")]
        source: String,

        /// Comma-separated start years (default: 2010,2018,2021,2022,2023)
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,

        #[arg(long)]
        exclude_otc: bool,

        #[arg(long)]
        monthly: bool,
    },
    /// List identifiers known to a source
    List {
        #[arg(long, default_value = "price")]
        source: String,
    },
    /// Inspect or clear cached rankings
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show what the data directory holds
    Status,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// List stored rankings
    List,
    /// Remove every stored ranking for a target
    Invalidate { target: String },
    /// Show cache counters and disk usage
    Stats,
}

pub fn run() {
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config.with_dirs(cli.data_dir, cli.cache_dir),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Correlate {
            target,
            source,
            start_year,
            top_n,
            exclude_otc,
            monthly,
            reload,
            display,
            detrend,
            filters,
            cap_range,
            json,
            split,
        } => {
            let args = commands::correlate::CorrelateArgs {
                target,
                source,
                start_year,
                top_n,
                exclude_otc,
                monthly,
                reload,
                display,
                detrend,
                filters,
                cap_range,
                json,
                split,
            };
            commands::correlate::run(config, args);
        }
        Commands::Warm {
            targets,
            source,
            years,
            exclude_otc,
            monthly,
        } => {
            commands::warm::run(config, targets, source, years, exclude_otc, monthly);
        }
        Commands::List { source } => {
            commands::list::run(config, source);
        }
        Commands::Cache { action } => match action {
            CacheAction::List => commands::cache::list(config),
            CacheAction::Invalidate { target } => commands::cache::invalidate(config, target),
            CacheAction::Stats => commands::cache::stats(config),
        },
        Commands::Status => {
            commands::status::run(config);
        }
    }
}
