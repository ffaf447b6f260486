//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - installs logging
//! - runs the fit pipeline or one of the auxiliary commands
//! - prints reports/plots
//! - writes optional exports

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Command, FitArgs, SimulateArgs, SummarizeArgs};
use crate::data::{simulate, SimulationConfig};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::report::{format_fit_summary, posterior_mean_series, summarize};

pub mod pipeline;

/// Entry point for the `mfbsts` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    init_tracing();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Summarize(args) => handle_summarize(args),
    }
}

/// Logs go to stderr so stdout stays a clean report. `RUST_LOG` overrides the
/// default `info` level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Flag raised by Ctrl+C. The fit polls it at the start of every iteration,
/// so an interrupted run exits with `EXIT_CANCELLED` and writes nothing.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Ctrl+C handling unavailable: {e}");
                return;
            }
        };
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping before the next iteration");
                    raised.store(true, Ordering::Relaxed);
                }
                Err(e) => warn!("Failed to install Ctrl+C handler: {e}"),
            }
        });
    });
    flag
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let cancel = interrupt_flag();
    let run = pipeline::run_fit(&config, &cancel)?;

    println!(
        "{}",
        format_fit_summary(&run.output, &run.summaries, config.burn)
    );

    if config.plot {
        if let Some(latent) = posterior_mean_series(&run.output, "latent_fine", config.burn) {
            println!("Latent fine series (posterior mean)");
            println!(
                "{}",
                crate::plot::render_series_plot(&latent, &[], config.plot_width, config.plot_height)
            );
        }
        if let Some(cumulator) = posterior_mean_series(&run.output, "cumulator", config.burn) {
            println!("Cumulator (posterior mean) vs observed aggregates (o)");
            println!(
                "{}",
                crate::plot::render_series_plot(
                    &cumulator,
                    &run.observed,
                    config.plot_width,
                    config.plot_height
                )
            );
        }
    }

    // Optional exports.
    if let Some(path) = &config.output {
        crate::io::write_draws_json(path, &run.output)?;
    }
    if let Some(path) = &config.summary_csv {
        crate::io::write_summary_csv(path, &run.summaries)?;
    }

    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let mut sim = simulate(&SimulationConfig {
        intervals: args.intervals,
        periods_per_interval: args.per_interval,
        seed: args.seed,
        ..Default::default()
    })?;
    if let Some(niter) = args.niter {
        sim.request.niter = niter;
    }
    if args.pin_truth {
        sim.request.truth = Some(sim.pinned_truth());
    }
    crate::io::write_json(&args.output, &sim)?;
    println!(
        "Wrote {} fine periods / {} coarse intervals to {}",
        sim.request.predictors.len(),
        sim.request.target_series.len(),
        args.output.display()
    );
    Ok(())
}

fn handle_summarize(args: SummarizeArgs) -> Result<(), AppError> {
    let output = crate::io::read_draws_json(&args.draws)?;
    let summaries = summarize(&output, args.burn);
    println!("{}", format_fit_summary(&output, &summaries, args.burn));
    if let Some(path) = &args.summary {
        crate::io::write_summary_csv(path, &summaries)?;
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        input: args.input.clone(),
        output: args.output.clone(),
        summary_csv: args.summary.clone(),
        niter: args.niter,
        ping: args.ping,
        seed: args.seed,
        save_state_history: !args.no_history,
        burn: args.burn,
        plot: args.plot,
        plot_width: args.width,
        plot_height: args.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn interrupt_flag_starts_lowered() {
        let flag = interrupt_flag();
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn fit_config_follows_flags() {
        let cli = Cli::parse_from(["mfbsts", "fit", "-i", "r.json", "--no-history", "--burn", "5"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let config = fit_config_from_args(&args);
        assert!(!config.save_state_history);
        assert_eq!(config.burn, 5);
        assert_eq!(config.output, None);
    }
}
