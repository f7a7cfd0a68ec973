//! Selection verification.
//!
//! Measures how precisely the selection hit the per-term needs, compares it
//! against randomized alternative selections drawn from the eligible pool,
//! and grades the result.

use chrono::NaiveDate;
use harvest_core::{
    AlternativeTests, Lot, Precision, QualityRating, Recommendation, SelectionEfficiency, Term,
    Verification,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Default number of randomized alternatives sampled.
pub const DEFAULT_SAMPLES: usize = 5;

/// Verify a target-mode selection. A caller-supplied seed makes the sampling
/// reproducible; without one the generator self-seeds.
pub fn verify_selection(
    recommendations: &[Recommendation],
    eligible: &[Lot],
    valuation_date: NaiveDate,
    needed_short: f64,
    needed_long: f64,
    samples: usize,
    seed: Option<u64>,
) -> Verification {
    let actual_short: f64 = recommendations
        .iter()
        .filter(|r| r.term == Term::Short)
        .map(|r| r.actual_gain)
        .sum();
    let actual_long: f64 = recommendations
        .iter()
        .filter(|r| r.term == Term::Long)
        .map(|r| r.actual_gain)
        .sum();

    let short_term_diff = actual_short - needed_short;
    let long_term_diff = actual_long - needed_long;
    let precision = Precision {
        short_term_diff,
        long_term_diff,
        short_term_pct: diff_pct(actual_short, needed_short),
        long_term_pct: diff_pct(actual_long, needed_long),
    };
    let quality = QualityRating::from_precision(precision.short_term_pct, precision.long_term_pct);

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let selection_error = short_term_diff.abs() + long_term_diff.abs();
    let alternative_size = (recommendations.len() + 1).min(eligible.len());
    let mut better_found = 0;
    let samples_run = if eligible.is_empty() { 0 } else { samples };

    for _ in 0..samples_run {
        let alternative: Vec<&Lot> = eligible
            .choose_multiple(&mut rng, alternative_size)
            .collect();
        let alt_short: f64 = alternative
            .iter()
            .filter(|l| l.resolved_term(valuation_date) == Term::Short)
            .map(|l| l.unrealized_gain)
            .sum();
        let alt_long: f64 = alternative
            .iter()
            .filter(|l| l.resolved_term(valuation_date) == Term::Long)
            .map(|l| l.unrealized_gain)
            .sum();
        let alt_error = (alt_short - needed_short).abs() + (alt_long - needed_long).abs();
        if alt_error + 1e-9 < selection_error {
            better_found += 1;
        }
    }

    let confidence = if samples_run == 0 {
        1.0
    } else {
        (samples_run - better_found) as f64 / samples_run as f64
    };

    let utilization = if eligible.is_empty() {
        0.0
    } else {
        recommendations.len() as f64 / eligible.len() as f64
    };

    Verification {
        precision,
        quality,
        alternative_tests: AlternativeTests {
            samples: samples_run,
            better_found,
            confidence,
            is_likely_optimal: better_found == 0,
        },
        efficiency: SelectionEfficiency {
            lots_selected: recommendations.len(),
            lots_eligible: eligible.len(),
            utilization,
        },
    }
}

/// Deviation as a percentage of the need. A zero need is a perfect hit only
/// when nothing was realized against it.
fn diff_pct(actual: f64, needed: f64) -> f64 {
    if needed.abs() < 1e-9 {
        if actual.abs() < 1e-9 {
            0.0
        } else {
            100.0
        }
    } else {
        (actual - needed).abs() / needed.abs() * 100.0
    }
}

/// Entropy seed helper for callers that want reproducibility without picking
/// a number themselves.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}
