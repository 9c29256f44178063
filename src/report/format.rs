//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the sampling/prediction code stays clean and testable
//! - output changes are localized (golden tests below)

use crate::domain::{
    ClassTable, ParamSummary, PredictionSummary, SamplerConfig, SamplingDiagnosticWarning, SamplingDiagnostics,
};
use crate::fit::FitOutput;
use crate::posterior::ContrastSummary;

/// Full fit report: run header, parameter table, diagnostics.
pub fn format_fit_summary(fit: &FitOutput, summary: &[ParamSummary], config: &SamplerConfig) -> String {
    let mut out = String::new();

    out.push_str("=== rb - Bayesian ridership regression ===\n");
    out.push_str(&format!("Model: {}\n", fit.draws.model.kind().display_name()));
    out.push_str(&format!(
        "Chains: {} | warmup={} | sampling={} | seed={}\n",
        config.chains, config.warmup_iterations, config.sampling_iterations, fit.seed
    ));
    out.push_str(&format!(
        "Draws: {} (per chain: {})\n",
        fit.draws.len(),
        fmt_counts(&fit.draws.chain_lengths)
    ));
    if fit.partial {
        out.push_str("NOTE: sampling was cancelled; results are partial.\n");
    }
    for failed in &fit.failed_chains {
        out.push_str(&format!("NOTE: chain {} failed: {}\n", failed.chain, failed.message));
    }

    out.push('\n');
    out.push_str(&format_param_table(summary));
    out.push('\n');
    out.push_str(&format_diagnostics(&fit.diagnostics, &fit.warnings));
    out
}

/// One row per parameter.
pub fn format_param_table(rows: &[ParamSummary]) -> String {
    let mut out = String::new();
    let mass = rows.first().map(|r| r.mass).unwrap_or(0.0);

    out.push_str(
        format!(
            "{:<14} {:>9} {:>9} {:>9} {:>9} {:>9} {:>7} {:>8}\n",
            "param", "mean", "sd", "median", "lower", "upper", "rhat", "ess"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<14} {:-<9} {:-<9} {:-<9} {:-<9} {:-<9} {:-<7} {:-<8}\n",
            "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        let rhat = r.rhat.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{:<14} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>7} {:>8.0}\n",
                truncate(&r.name, 14),
                r.mean,
                r.sd,
                r.median,
                r.lower,
                r.upper,
                rhat,
                r.ess
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out.push_str(&format!("(interval: narrowest {:.0}% window containing the mean)\n", mass * 100.0));
    out
}

pub fn format_diagnostics(diag: &SamplingDiagnostics, warnings: &[SamplingDiagnosticWarning]) -> String {
    let mut out = String::new();
    out.push_str("Sampler diagnostics:\n");
    out.push_str(&format!(
        "- divergences: {} ({:.2}%)\n",
        diag.divergences,
        diag.divergence_rate() * 100.0
    ));
    out.push_str(&format!("- mean accept stat: {:.3}\n", diag.mean_accept_stat));
    out.push_str(&format!(
        "- mean tree depth: {:.2} (max-depth hits: {})\n",
        diag.mean_tree_depth, diag.max_depth_hits
    ));
    out.push_str(&format!("- step size: {:.4}\n", diag.step_size));
    for w in warnings {
        out.push_str(&format!("WARNING: {w}\n"));
    }
    out
}

/// Prediction table in grid order.
pub fn format_predictions(rows: &[PredictionSummary], classes: &ClassTable) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<10} {:>8} {:>10} {:>10} {:>10}\n",
            "class", "hours", "mean", "lower", "upper"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<10} {:-<8} {:-<10} {:-<10} {:-<10}\n", "", "", "", "", "").trim_end());
    out.push('\n');
    for p in rows {
        out.push_str(
            format!(
                "{:<10} {:>8.3} {:>10.4} {:>10.4} {:>10.4}\n",
                truncate(&class_name(classes, p.class), 10),
                p.hours_change_fraction,
                p.mean,
                p.lower,
                p.upper
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_contrast(c: &ContrastSummary, classes: &ClassTable) -> String {
    format!(
        "Contrast {}@{:.3} -> {}@{:.3}: mean={:.4} {:.0}%=[{:.4}, {:.4}]{}\n",
        class_name(classes, c.from.class),
        c.from.hours_change_fraction,
        class_name(classes, c.to.class),
        c.to.hours_change_fraction,
        c.mean,
        c.mass * 100.0,
        c.lower,
        c.upper,
        if c.excludes_zero() { " (excludes 0)" } else { "" }
    )
}

fn class_name(classes: &ClassTable, class: usize) -> String {
    classes
        .label(class)
        .map(str::to_string)
        .unwrap_or_else(|| class.to_string())
}

fn fmt_counts(v: &[usize]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
