//! Cash-raising lot selection.
//!
//! Accumulates whole lots in tax-desirability order until the required cash
//! is covered, honoring signed ceilings on realized short- and long-term
//! gains.

use chrono::NaiveDate;
use harvest_core::{CashSummary, Lot, Term};

/// Factor by which a lot's proceeds may exceed the remaining cash and still
/// be taken outright.
const OVERSIZE_TOLERANCE: f64 = 1.1;

/// One selected lot with its resolved term.
#[derive(Debug, Clone)]
pub struct CashPick {
    pub lot: Lot,
    pub term: Term,
}

/// Selection plus the cash-mode summary.
#[derive(Debug, Clone)]
pub struct CashSelection {
    pub picks: Vec<CashPick>,
    pub summary: CashSummary,
    pub warnings: Vec<String>,
}

/// Desirability rank: losses are most attractive, then long-term gains, then
/// short-term gains.
fn desirability_rank(lot: &Lot, term: Term) -> u8 {
    if lot.unrealized_gain < 0.0 {
        0
    } else if term == Term::Long {
        1
    } else {
        2
    }
}

/// Select lots raising at least `cash_needed - current_cash`, minimizing the
/// realized tax cost while keeping the short- and long-term gain sums inside
/// their signed caps.
pub fn select_for_cash(
    eligible: &[Lot],
    valuation_date: NaiveDate,
    cash_needed: f64,
    current_cash: f64,
    cap_short: f64,
    cap_long: f64,
    max_lots: usize,
) -> CashSelection {
    let additional_needed = (cash_needed - current_cash).max(0.0);

    let mut ordered: Vec<(Lot, Term)> = eligible
        .iter()
        .map(|l| (l.clone(), l.resolved_term(valuation_date)))
        .collect();
    ordered.sort_by(|(a, ta), (b, tb)| {
        let rank_a = desirability_rank(a, *ta);
        let rank_b = desirability_rank(b, *tb);
        rank_a
            .cmp(&rank_b)
            // Within losses the bigger loss leads; within gains the smaller.
            .then_with(|| {
                a.unrealized_gain
                    .partial_cmp(&b.unrealized_gain)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            // Ties resolve to the larger proceeds.
            .then_with(|| {
                b.market_value()
                    .partial_cmp(&a.market_value())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut picks: Vec<CashPick> = Vec::new();
    let mut taken = vec![false; ordered.len()];
    let mut raised = 0.0;
    let mut short_sum = 0.0;
    let mut long_sum = 0.0;

    let fits_caps = |lot: &Lot, term: Term, short_sum: f64, long_sum: f64| -> bool {
        let (updated, cap) = match term {
            Term::Short => (short_sum + lot.unrealized_gain, cap_short),
            Term::Long => (long_sum + lot.unrealized_gain, cap_long),
        };
        if cap >= 0.0 {
            updated <= cap + 1e-9
        } else {
            updated >= cap - 1e-9
        }
    };

    for i in 0..ordered.len() {
        if picks.len() >= max_lots {
            break;
        }
        let remaining = additional_needed - raised;
        if remaining <= 0.0 {
            break;
        }
        if taken[i] {
            continue;
        }
        let (lot, term) = &ordered[i];
        if !fits_caps(lot, *term, short_sum, long_sum) {
            continue;
        }

        let proceeds = lot.market_value();
        let take = if proceeds <= OVERSIZE_TOLERANCE * remaining {
            true
        } else {
            // An oversized lot closes the gap only if nothing cheaper does:
            // it must carry the smallest proceeds among remaining cap-passing
            // lots that cover the shortfall on their own.
            let min_closer = ordered
                .iter()
                .enumerate()
                .filter(|(j, (other, other_term))| {
                    !taken[*j]
                        && other.market_value() >= remaining
                        && fits_caps(other, *other_term, short_sum, long_sum)
                })
                .map(|(_, (other, _))| other.market_value())
                .fold(f64::INFINITY, f64::min);
            (proceeds - min_closer).abs() < 1e-9
        };
        if !take {
            continue;
        }

        taken[i] = true;
        raised += proceeds;
        match term {
            Term::Short => short_sum += lot.unrealized_gain,
            Term::Long => long_sum += lot.unrealized_gain,
        }
        picks.push(CashPick {
            lot: lot.clone(),
            term: *term,
        });
    }

    let mut warnings = Vec::new();
    if raised + 1e-9 < additional_needed {
        warnings.push(format!(
            "cash raising fell short: ${raised:.2} raised of the ${additional_needed:.2} required"
        ));
        tracing::warn!(raised, additional_needed, "cash raising shortfall");
    }

    let summary = CashSummary {
        cash_needed,
        current_cash,
        additional_needed,
        actual_raised: raised,
        short_term_gain: short_sum,
        long_term_gain: long_sum,
        total_taxable_gain: short_sum + long_sum,
        total_recommendations: picks.len(),
    };

    CashSelection {
        picks,
        summary,
        warnings,
    }
}
