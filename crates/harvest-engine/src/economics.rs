//! Per-lot transaction economics.
//!
//! Transaction cost, tax impact, net benefit, and the recommendation record
//! assembled from them.

use harvest_core::{Lot, Recommendation, TaxConfig, Term, TransactionCostModel};

/// Cost of selling one whole lot:
/// `base_fee + sec_fee_rate*proceeds + taf_fee_rate*quantity + spread_rate*proceeds`.
pub fn transaction_cost(lot: &Lot, model: &TransactionCostModel) -> f64 {
    let proceeds = lot.market_value();
    model.base_fee
        + model.sec_fee_rate * proceeds
        + model.taf_fee_rate * lot.quantity
        + model.spread_rate * proceeds
}

/// Tax owed (positive) or saved (negative) by realizing `gain` at `term`.
/// The net-investment-income surtax applies only to gains.
pub fn tax_impact(gain: f64, term: Term, tax: &TaxConfig) -> f64 {
    let base_rate = match term {
        Term::Short => tax.short_term_rate,
        Term::Long => tax.long_term_rate,
    };
    let niit = if gain > 0.0 { tax.net_investment_income_rate } else { 0.0 };
    gain * (base_rate + tax.state_rate + niit)
}

/// Net benefit of one sale: tax savings (losses) or minus tax cost (gains),
/// less the transaction cost.
pub fn net_benefit(gain: f64, term: Term, tax: &TaxConfig, cost: f64) -> f64 {
    -tax_impact(gain, term, tax) - cost
}

/// Build the outgoing recommendation for a selected lot.
pub fn recommendation_for_lot(
    lot: &Lot,
    term: Term,
    reason: String,
    tax: &TaxConfig,
    costs: &TransactionCostModel,
) -> Recommendation {
    let cost = transaction_cost(lot, costs);
    let impact = tax_impact(lot.unrealized_gain, term, tax);
    Recommendation {
        symbol: lot.symbol.clone(),
        quantity_to_sell: lot.quantity,
        actual_gain: lot.unrealized_gain,
        proceeds: lot.market_value(),
        term,
        reason,
        tax_impact: impact,
        transaction_cost: cost,
        net_benefit: -impact - cost,
    }
}

/// Reason string for a target-mode selection.
pub fn target_reason(lot: &Lot, term: Term, needed: f64) -> String {
    let mut clauses = Vec::new();
    if lot.unrealized_gain >= 0.0 {
        clauses.push(format!(
            "Realizes ${:.2} {} gain toward the ${:.2} remaining target",
            lot.unrealized_gain,
            term,
            needed.abs()
        ));
    } else {
        clauses.push(format!(
            "Harvests ${:.2} {} loss toward the ${:.2} remaining loss target",
            lot.unrealized_gain.abs(),
            term,
            needed.abs()
        ));
    }
    let loss_pct = if lot.cost_basis > 0.0 {
        lot.unrealized_gain.abs() / lot.cost_basis * 100.0
    } else {
        0.0
    };
    if loss_pct > 20.0 {
        clauses.push(format!("{loss_pct:.1}% move from cost basis"));
    }
    clauses.join(". ")
}

/// Reason string for a cash-raising selection.
pub fn cash_reason(lot: &Lot, term: Term) -> String {
    if lot.unrealized_gain < 0.0 {
        format!(
            "Raises ${:.2} while harvesting a ${:.2} {} loss",
            lot.market_value(),
            lot.unrealized_gain.abs(),
            term
        )
    } else {
        format!(
            "Raises ${:.2} with a small ${:.2} {} gain",
            lot.market_value(),
            lot.unrealized_gain,
            term
        )
    }
}
