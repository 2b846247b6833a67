//! Plain-text model summary, laid out like a brms `summary()` printout.

use crate::fit::{FitResult, ParameterSummary};
use itertools::Itertools;

/// Significant digits of every number in the summary.
pub const SUMMARY_DIGITS: usize = 6;

const HEADERS: [&str; 4] = ["Estimate", "Est.Error", "l-95% CI", "u-95% CI"];

/// Formats `value` with `digits` significant digits, switching to
/// scientific notation for very large or very small magnitudes.
pub fn format_significant(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "NA".to_string()
        } else if value > 0.0 {
            "Inf".to_string()
        } else {
            "-Inf".to_string()
        };
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = digits.max(1);
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= digits as i32 {
        return format!("{:.*e}", digits - 1, value);
    }
    let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
    format!("{:.*}", decimals, value)
}

fn parameter_table(rows: &[&ParameterSummary]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|p| {
            [p.mean, p.sd, p.lower_95, p.upper_95]
                .iter()
                .map(|&v| format_significant(v, SUMMARY_DIGITS))
                .collect()
        })
        .collect();

    let name_width = rows.iter().map(|p| p.name.len()).max().unwrap_or(0);
    let widths: Vec<usize> = HEADERS
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header = HEADERS
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:>w$}"))
        .join(" ");
    let mut out = format!("{:name_width$} {header}\n", "");
    for (p, row) in rows.iter().zip(&cells) {
        let values = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:>w$}"))
            .join(" ");
        out.push_str(&format!("{:name_width$} {values}\n", p.name));
    }
    out
}

/// Renders the full summary of a fitted model.
pub fn render_summary(fit: &FitResult) -> String {
    let spec = &fit.spec;
    let sampler = &spec.sampler;

    let mut out = format!(
        " Family: {} \n  Links: mu = {} \nFormula: {} \n   Data: {} (Number of observations: {}) \n",
        spec.family.name(),
        spec.family.link(),
        spec.formula,
        fit.data_name,
        fit.n_observations()
    );
    out.push_str(&format!(
        "  Draws: {} chains, each with iter = {}; warmup = {}; thin = {};\n         total post-warmup draws = {}\n\n",
        sampler.chains,
        sampler.iterations,
        sampler.warmup,
        sampler.thin,
        fit.draws.total_draws()
    ));

    if let (Some(sd), Some(group)) = (fit.group_sd.as_ref(), fit.design.group.as_ref()) {
        out.push_str(&format!(
            "Multilevel Hyperparameters:\n~{} (Number of levels: {}) \n",
            group.name,
            group.levels.len()
        ));
        out.push_str(&parameter_table(&[sd]));
        out.push('\n');
    }

    out.push_str("Regression Coefficients:\n");
    let coefficients: Vec<&ParameterSummary> = fit.coefficients.iter().collect();
    out.push_str(&parameter_table(&coefficients));
    out.push('\n');

    out.push_str(&format!(
        "Sampler diagnostics: Rhat = {}; ESS = {} (means over parameters).\n",
        format_significant(fit.draws.rhat, SUMMARY_DIGITS),
        format_significant(fit.draws.ess, SUMMARY_DIGITS)
    ));
    out.push_str(
        "Draws were sampled using NUTS. ESS is the effective sample size and Rhat is\n\
         the potential scale reduction factor on split chains (at convergence, Rhat = 1).\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriorConfig, SamplerConfig};
    use crate::data::{DATASET_FILE, RegionList, load_dataset};
    use crate::design::build_design;
    use crate::formula::{Formula, ModelSpec};
    use crate::posterior::ParameterLayout;
    use crate::sampler::Draws;
    use ndarray::Array2;
    use std::fs;
    use tempfile::tempdir;

    fn factor_fit() -> FitResult {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DATASET_FILE);
        fs::write(
            &path,
            "stfips,state,M,F,EQI_1\n01001,AL,10,9,1\n01003,GA,12,13,2\n",
        )
        .unwrap();
        let data = load_dataset(&path, &RegionList::from_ids(["01001", "01003"])).unwrap();
        let sampler = SamplerConfig {
            chains: 2,
            ..SamplerConfig::default()
        };
        let spec = ModelSpec::new(
            "EQI_1",
            Formula::factor_with_state("EQI_1"),
            &sampler,
            &PriorConfig::default(),
        );
        let design = build_design(&spec.formula, &data).unwrap();
        let layout = ParameterLayout::for_design(&design);
        let chain = Array2::<f64>::zeros((3, layout.dim()));
        let draws = Draws {
            chains: vec![chain.clone(), chain],
            rhat: 1.002,
            ess: 812.5,
        };
        let summary_of = |name: &str| ParameterSummary::from_chains(name, &draws.parameter(0));
        let coefficients = vec![summary_of("Intercept"), summary_of("EQI_12")];
        let group_sd = Some(summary_of("sd(Intercept)"));
        FitResult {
            spec,
            data_name: data.source_name().to_string(),
            design,
            layout,
            draws,
            coefficients,
            group_sd,
        }
    }

    #[test]
    fn summary_names_the_dataset_file() {
        let text = render_summary(&factor_fit());
        assert!(
            text.contains(
                "   Data: MSDX_day_20180922_SRB_clus_sept.csv (Number of observations: 2) "
            ),
            "{text}"
        );
        assert!(text.contains("Formula: M | trials(M + F) ~ 1 + EQI_1 + (1 | state) "));
        assert!(text.contains("total post-warmup draws = 6"));
    }

    #[test]
    fn summary_lists_group_sd_and_diagnostics() {
        let text = render_summary(&factor_fit());
        let lines: Vec<&str> = text.lines().collect();
        let group = lines
            .iter()
            .position(|l| *l == "~state (Number of levels: 2) ")
            .unwrap();
        assert!(lines[group + 2].starts_with("sd(Intercept)"));
        assert!(text.contains("Rhat = 1.00200; ESS = 812.500"));
        assert!(lines.iter().any(|l| l.starts_with("EQI_12")));
    }

    #[test]
    fn six_significant_digits() {
        assert_eq!(format_significant(0.123456789, 6), "0.123457");
        assert_eq!(format_significant(-12.3456789, 6), "-12.3457");
        assert_eq!(format_significant(123456.7, 6), "123457");
        assert_eq!(format_significant(1.0, 6), "1.00000");
        assert_eq!(format_significant(0.0, 6), "0");
    }

    #[test]
    fn extreme_magnitudes_use_scientific_notation() {
        assert_eq!(format_significant(1234567.0, 6), "1.23457e6");
        assert_eq!(format_significant(0.0000123456, 6), "1.23456e-5");
        assert_eq!(format_significant(f64::NAN, 6), "NA");
    }

    #[test]
    fn table_aligns_columns() {
        let p = ParameterSummary {
            name: "Intercept".to_string(),
            mean: 0.05,
            sd: 0.01,
            lower_95: 0.03,
            upper_95: 0.07,
        };
        let table = parameter_table(&[&p]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Estimate"));
        assert!(lines[1].starts_with("Intercept"));
        assert!(lines[1].contains("0.0500000"));
        assert!(lines[1].contains("0.0700000"));
        assert_eq!(lines[0].len(), lines[1].len());
    }
}
