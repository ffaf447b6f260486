//! Posterior summaries and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the sampling code stays clean and testable
//! - output changes are localized (the tests below pin the layout)

use crate::report::recorder::{FitOutput, OutputArray};

/// Vector outputs summarised element by element.
const SUMMARY_VECTORS: [&str; 1] = ["coefficients"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q05: f64,
    pub q50: f64,
    pub q95: f64,
}

/// Summaries of every scalar output and of the summary vectors, dropping the
/// first `burn` draws. Outputs with no retained draws are skipped.
pub fn summarize(output: &FitOutput, burn: usize) -> Vec<ParameterSummary> {
    let mut out = Vec::new();
    for (name, array) in &output.outputs {
        match array.shape.len() {
            1 => out.extend(summarize_draws(name.clone(), &retained(array, 0, burn))),
            2 if SUMMARY_VECTORS.contains(&name.as_str()) => {
                for j in 0..array.draw_size() {
                    out.extend(summarize_draws(
                        format!("{name}[{j}]"),
                        &retained(array, j, burn),
                    ));
                }
            }
            _ => {}
        }
    }
    out
}

/// Posterior mean of a per-iteration vector output (e.g. `latent_fine`).
pub fn posterior_mean_series(output: &FitOutput, name: &str, burn: usize) -> Option<Vec<f64>> {
    let array = output.get(name)?;
    if array.shape.len() != 2 {
        return None;
    }
    (0..array.draw_size())
        .map(|j| mean(&retained(array, j, burn)))
        .collect()
}

fn retained(array: &OutputArray, index: usize, burn: usize) -> Vec<f64> {
    array.element(index).into_iter().skip(burn).collect()
}

fn summarize_draws(name: String, draws: &[f64]) -> Option<ParameterSummary> {
    let mean = mean(draws)?;
    let var = if draws.len() > 1 {
        draws.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / (draws.len() - 1) as f64
    } else {
        0.0
    };
    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(ParameterSummary {
        name,
        mean,
        sd: var.sqrt(),
        q05: quantile(&sorted, 0.05),
        q50: quantile(&sorted, 0.50),
        q95: quantile(&sorted, 0.95),
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Linear-interpolated quantile of sorted, non-empty values.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let u = pos - lo as f64;
    sorted[lo] + u * (sorted[hi] - sorted[lo])
}

/// Format the run header plus the parameter table.
pub fn format_fit_summary(output: &FitOutput, summaries: &[ParameterSummary], burn: usize) -> String {
    let mut out = String::new();

    out.push_str("=== mfbsts - mixed-frequency structural time series ===\n");
    out.push_str(&format!("Seed: {}\n", output.seed));
    out.push_str(&format!(
        "Draws: {} (burn-in {}, kept {})\n",
        output.niter,
        burn.min(output.niter),
        output.niter.saturating_sub(burn)
    ));
    out.push_str(&format!("Outputs: {}\n", output.outputs.len()));
    out.push('\n');
    out.push_str(&format_table(summaries));

    out
}

fn format_table(rows: &[ParameterSummary]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<32} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "parameter", "mean", "sd", "q05", "median", "q95"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!(
        "{:-<32} {:-<12} {:-<12} {:-<12} {:-<12} {:-<12}\n",
        "", "", "", "", "", ""
    ));

    for r in rows {
        out.push_str(&format!(
            "{:<32} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4}\n",
            truncate(&r.name, 32),
            r.mean,
            r.sd,
            r.q05,
            r.q50,
            r.q95,
        ));
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
