#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::Parser;
use std::path::PathBuf;
use std::process;

use eqi_kfold::config::AnalysisConfig;
use eqi_kfold::pipeline::{AnalysisError, RunOptions, run};
use eqi_kfold::service::HmcService;

#[derive(Parser)]
#[command(
    name = "eqi-kfold",
    version,
    about = "K-fold comparison of sex-ratio-at-birth models across EQI factors",
    long_about = "Fits an intercept-only binomial model and a model with one EQI factor plus a \
                 state random intercept to county birth counts, then compares both by repeated \
                 k-fold cross-validation. Results are written to <DATA_DIR>/KFOLDCV/."
)]
struct Cli {
    /// 1-based index of the EQI factor column to analyse
    #[arg(value_name = "FACTOR_INDEX", allow_negative_numbers = true)]
    factor_index: i64,

    /// Number of k-fold repetitions
    #[arg(value_name = "REPS", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    reps: u32,

    /// Directory holding the region list and the birth table
    #[arg(long, value_name = "DIR", default_value = ".")]
    data_dir: PathBuf,

    /// TOML file with sampler, prior and k-fold settings
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Number of folds (overrides the configuration)
    #[arg(long, value_name = "K")]
    folds: Option<usize>,

    /// Base random seed (overrides the configuration)
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Number of chains, also used as the worker count (overrides the configuration)
    #[arg(long, value_name = "N")]
    chains: Option<usize>,
}

fn load_config(cli: &Cli) -> Result<AnalysisConfig, AnalysisError> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(folds) = cli.folds {
        config.kfold.folds = folds;
    }
    if let Some(seed) = cli.seed {
        config.sampler.seed = seed;
    }
    if let Some(chains) = cli.chains {
        config.sampler.chains = chains;
        config.sampler.cores = chains;
    }
    config.validate()?;
    Ok(config)
}

fn run_cli(cli: Cli) -> Result<(), AnalysisError> {
    let config = load_config(&cli)?;
    let options = RunOptions {
        data_dir: cli.data_dir,
        factor_index: cli.factor_index,
        reps: cli.reps,
    };
    let report = run(&options, &config, &HmcService)?;
    println!(
        "Factor {}: summary written to {}, {} k-fold comparisons written to {}",
        report.factor,
        report.summary_path.display(),
        report.comparisons.len(),
        report.kfold_log_path.display()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
