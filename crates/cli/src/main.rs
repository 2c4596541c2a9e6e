//! Tick replay runner.
//!
//! ```bash
//! tick-replay config.json [--output report.json]
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`). The report is printed as
//! JSON on stdout unless `--output` is given. Exits with status 1 when the run
//! reports invariant violations.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use replay_backtest::{ReplayEngine, StrategyRegistry};
use replay_core::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct CliArgs {
    config_path: PathBuf,
    output_path: Option<PathBuf>,
}

impl CliArgs {
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut output_path = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--output" | "-o" => {
                    let path = args.next().context("--output requires a path")?;
                    output_path = Some(PathBuf::from(path));
                }
                "--help" | "-h" => {
                    bail!("usage: tick-replay <config.json> [--output report.json]");
                }
                _ if config_path.is_none() => config_path = Some(PathBuf::from(arg)),
                _ => bail!("unexpected argument '{arg}'"),
            }
        }
        Ok(Self {
            config_path: config_path.context("usage: tick-replay <config.json> [--output report.json]")?,
            output_path,
        })
    }
}

fn run() -> anyhow::Result<bool> {
    let args = CliArgs::parse()?;
    let config = Config::from_json_file(&args.config_path)
        .with_context(|| format!("loading config {}", args.config_path.display()))?;

    let registry = StrategyRegistry::with_builtins();
    let engine = ReplayEngine::new(config, &registry).context("invalid configuration")?;
    let report = engine.run().context("replay failed")?;

    let json = report.to_json_pretty()?;
    match &args.output_path {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(report.is_clean())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("run finished with invariant violations");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}
