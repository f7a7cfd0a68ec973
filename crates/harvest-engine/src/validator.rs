//! Lot validation.
//!
//! Enforces the structural invariants of the lot model and normalizes
//! holding-period terms before anything downstream runs.

use chrono::NaiveDate;
use harvest_core::{EngineError, EngineOptions, Lot, LotIssue};

/// Tolerance for the declared-vs-recomputed unrealized gain cross-check.
const GAIN_CONSISTENCY_TOLERANCE: f64 = 0.01;

const MAX_SYMBOL_LEN: usize = 20;

/// Validated lots plus non-fatal findings.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub lots: Vec<Lot>,
    pub warnings: Vec<String>,
}

/// Validate the raw portfolio. Structural violations reject the whole call;
/// a declared-gain mismatch only warns (unless `strict_consistency` is set).
pub fn validate_portfolio(
    portfolio: &[Lot],
    options: &EngineOptions,
    valuation_date: NaiveDate,
) -> Result<ValidationOutcome, EngineError> {
    if portfolio.len() > options.max_portfolio_size {
        return Err(EngineError::PortfolioTooLarge {
            size: portfolio.len(),
            max: options.max_portfolio_size,
        });
    }

    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut lots = Vec::with_capacity(portfolio.len());

    for (index, lot) in portfolio.iter().enumerate() {
        check_symbol(index, &lot.symbol, &mut issues);

        if !(lot.quantity.is_finite() && lot.quantity > 0.0) {
            issues.push(issue(index, "quantity", "must be a positive number"));
        }
        if !(lot.price.is_finite() && lot.price > 0.0) {
            issues.push(issue(index, "price", "must be a positive number"));
        }
        if !(lot.cost_basis.is_finite() && lot.cost_basis >= 0.0) {
            issues.push(issue(index, "cost_basis", "must be a non-negative number"));
        }
        if !lot.unrealized_gain.is_finite() {
            issues.push(issue(index, "unrealized_gain", "must be a finite number"));
        }
        if lot.acquired_date > valuation_date {
            issues.push(issue(index, "acquired_date", "lies after the valuation date"));
        }

        let mismatch = (lot.unrealized_gain - lot.computed_gain()).abs();
        if lot.unrealized_gain.is_finite() && mismatch > GAIN_CONSISTENCY_TOLERANCE {
            let finding = format!(
                "lot {index} ({}): declared unrealized gain {:.2} differs from quantity*price - cost_basis = {:.2}",
                lot.symbol,
                lot.unrealized_gain,
                lot.computed_gain()
            );
            if options.strict_consistency {
                issues.push(issue(index, "unrealized_gain", &finding));
            } else {
                warnings.push(finding);
            }
        }

        let mut normalized = lot.clone();
        normalized.term = Some(lot.resolved_term(valuation_date));
        lots.push(normalized);
    }

    if !issues.is_empty() {
        tracing::debug!(count = issues.len(), "portfolio rejected by validator");
        return Err(EngineError::InvalidPortfolioData { issues });
    }

    Ok(ValidationOutcome { lots, warnings })
}

fn check_symbol(index: usize, symbol: &str, issues: &mut Vec<LotIssue>) {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        issues.push(issue(index, "symbol", "must not be empty"));
        return;
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        issues.push(issue(index, "symbol", "must be at most 20 characters"));
    }
    if symbol.chars().any(|c| c.is_control()) {
        issues.push(issue(index, "symbol", "must contain only printable characters"));
    }
}

fn issue(index: usize, field: &str, reason: &str) -> LotIssue {
    LotIssue {
        index,
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
