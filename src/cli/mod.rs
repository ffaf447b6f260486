//! Command-line parsing for the mixed-frequency structural time-series fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "mfbsts",
    version,
    about = "Bayesian structural time series for mixed-frequency data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a request JSON file, print posterior summaries, and optionally plot/export.
    Fit(FitArgs),
    /// Write a simulated fit request (with its generating truth) to JSON.
    Simulate(SimulateArgs),
    /// Summarize a previously exported draws JSON.
    Summarize(SummarizeArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Fit request JSON (data, state specification, priors).
    #[arg(short = 'i', long, value_name = "JSON")]
    pub input: PathBuf,

    /// Number of MCMC iterations (overrides the request).
    #[arg(short = 'n', long)]
    pub niter: Option<usize>,

    /// Log progress every N iterations (0 disables; overrides the request).
    #[arg(long)]
    pub ping: Option<usize>,

    /// Random seed (overrides the request).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Do not record per-iteration state history.
    #[arg(long)]
    pub no_history: bool,

    /// Leading draws dropped from summaries and plots.
    #[arg(long, default_value_t = 0)]
    pub burn: usize,

    /// Write all draws to JSON.
    #[arg(short = 'o', long, value_name = "JSON")]
    pub output: Option<PathBuf>,

    /// Write posterior summaries to CSV.
    #[arg(long, value_name = "CSV")]
    pub summary: Option<PathBuf>,

    /// Render ASCII plots of the latent series.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Where to write the simulated request.
    #[arg(short = 'o', long, value_name = "JSON")]
    pub output: PathBuf,

    /// Number of coarse intervals.
    #[arg(long, default_value_t = 24)]
    pub intervals: usize,

    /// Fine periods per coarse interval.
    #[arg(long, default_value_t = 4)]
    pub per_interval: usize,

    /// Seed for the simulation (also stored as the request's fit seed).
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// MCMC iterations stored in the request.
    #[arg(short = 'n', long)]
    pub niter: Option<usize>,

    /// Pin state, coefficients and residual sd to the simulated truth.
    #[arg(long)]
    pub pin_truth: bool,
}

#[derive(Debug, Parser)]
pub struct SummarizeArgs {
    /// Draws JSON produced by `mfbsts fit --output`.
    #[arg(long, value_name = "JSON")]
    pub draws: PathBuf,

    /// Leading draws to drop.
    #[arg(long, default_value_t = 0)]
    pub burn: usize,

    /// Also write the summaries to CSV.
    #[arg(long, value_name = "CSV")]
    pub summary: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::parse_from([
            "mfbsts", "fit", "-i", "req.json", "-n", "50", "--seed", "7", "--no-history",
        ]);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.input, PathBuf::from("req.json"));
                assert_eq!(args.niter, Some(50));
                assert_eq!(args.seed, Some(7));
                assert!(args.no_history);
                assert_eq!(args.ping, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::parse_from(["mfbsts", "simulate", "-o", "sim.json"]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.intervals, 24);
                assert_eq!(args.per_interval, 4);
                assert!(!args.pin_truth);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
