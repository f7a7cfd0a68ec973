//! Wash-sale filtering.
//!
//! Excludes loss lots whose sale would be disallowed: pre-flagged lots,
//! lots with a same-symbol purchase inside the window, lots bought too
//! recently, and (when the oracle knows both symbols) purchases of
//! substantially identical securities. Gain lots always pass.

use chrono::NaiveDate;
use harvest_core::{
    EngineError, Lot, PurchaseRecord, Recommendation, RiskLevel, WashSaleConfig,
};
use serde::{Deserialize, Serialize};

use crate::similarity::SimilarityOracle;

/// Similarity score at or above which a purchase counts as substantially
/// identical.
pub const SIMILAR_SECURITY_TRIGGER: u32 = 85;

/// Why a loss lot was excluded (or flagged) by the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WashSaleReason {
    /// `wash_sale_flag` was already set on the lot.
    Flagged,
    /// A purchase of the same symbol inside the look-back window.
    RecentPurchase { purchase_date: NaiveDate },
    /// The lot itself was bought inside the look-forward window.
    RecentAcquisition { holding_days: i64 },
    /// A purchase of a substantially identical security inside the window.
    SimilarSecurity {
        purchased_symbol: String,
        similarity: u32,
        risk_level: RiskLevel,
    },
}

/// One excluded (or, in warn-only mode, flagged) loss lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSaleExclusion {
    pub symbol: String,
    pub loss: f64,
    pub reason: WashSaleReason,
}

/// Lots that passed, exclusions, and human-readable warnings.
#[derive(Debug, Clone, Default)]
pub struct WashSaleOutcome {
    pub eligible: Vec<Lot>,
    pub excluded: Vec<WashSaleExclusion>,
    pub warnings: Vec<String>,
}

/// Run the filter over validated lots.
pub fn filter_lots(
    lots: Vec<Lot>,
    history: &[PurchaseRecord],
    valuation_date: NaiveDate,
    config: &WashSaleConfig,
    oracle: &SimilarityOracle,
) -> WashSaleOutcome {
    let mut outcome = WashSaleOutcome::default();

    for lot in lots {
        if !lot.is_loss() {
            outcome.eligible.push(lot);
            continue;
        }

        match find_violation(&lot, history, valuation_date, config, oracle) {
            Some(reason) => {
                let strict = config.strict_mode || matches!(reason, WashSaleReason::Flagged);
                let exclusion = WashSaleExclusion {
                    symbol: lot.symbol.clone(),
                    loss: lot.unrealized_gain,
                    reason,
                };
                outcome.warnings.push(describe(&exclusion, strict));
                if strict {
                    tracing::debug!(symbol = %lot.symbol, "loss lot excluded by wash-sale filter");
                    outcome.excluded.push(exclusion);
                } else {
                    outcome.excluded.push(exclusion);
                    outcome.eligible.push(lot);
                }
            }
            None => outcome.eligible.push(lot),
        }
    }

    outcome
}

fn find_violation(
    lot: &Lot,
    history: &[PurchaseRecord],
    valuation_date: NaiveDate,
    config: &WashSaleConfig,
    oracle: &SimilarityOracle,
) -> Option<WashSaleReason> {
    if lot.wash_sale_flag {
        return Some(WashSaleReason::Flagged);
    }

    let window_start = valuation_date - chrono::Duration::days(config.before_days as i64);
    let in_window =
        |p: &&PurchaseRecord| p.date >= window_start && p.date <= valuation_date;

    if let Some(purchase) = history
        .iter()
        .filter(in_window)
        .find(|p| p.symbol == lot.symbol)
    {
        return Some(WashSaleReason::RecentPurchase {
            purchase_date: purchase.date,
        });
    }

    let holding_days = lot.holding_days(valuation_date);
    if holding_days < config.after_days as i64 {
        return Some(WashSaleReason::RecentAcquisition { holding_days });
    }

    // Substantially identical securities: only purchases the oracle can score.
    let mut best: Option<(u32, &PurchaseRecord)> = None;
    for purchase in history.iter().filter(in_window) {
        if purchase.symbol == lot.symbol {
            continue;
        }
        if let Some(score) = oracle.score(&lot.symbol, &purchase.symbol) {
            if score >= SIMILAR_SECURITY_TRIGGER && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, purchase));
            }
        }
    }
    best.map(|(score, purchase)| WashSaleReason::SimilarSecurity {
        purchased_symbol: purchase.symbol.clone(),
        similarity: score,
        risk_level: RiskLevel::from_similarity(score),
    })
}

fn describe(exclusion: &WashSaleExclusion, excluded: bool) -> String {
    let action = if excluded { "excluded from harvesting" } else { "flagged" };
    match &exclusion.reason {
        WashSaleReason::Flagged => {
            format!("{} loss lot {}: pre-marked wash-sale flag", exclusion.symbol, action)
        }
        WashSaleReason::RecentPurchase { purchase_date } => format!(
            "{} loss lot {}: same-symbol purchase on {} inside the wash-sale window",
            exclusion.symbol, action, purchase_date
        ),
        WashSaleReason::RecentAcquisition { holding_days } => format!(
            "{} loss lot {}: held only {} day(s), inside the wash-sale window",
            exclusion.symbol, action, holding_days
        ),
        WashSaleReason::SimilarSecurity {
            purchased_symbol,
            similarity,
            risk_level,
        } => format!(
            "{} loss lot {}: {} purchase scores {} similarity ({} risk)",
            exclusion.symbol, action, purchased_symbol, similarity, risk_level
        ),
    }
}

/// Check a caller-supplied sell plan against a purchase history. This is the
/// only producer of `WashSaleViolation`; selection itself never generates one
/// because violating lots are filtered before selection runs.
pub fn validate_plan(
    plan: &[Recommendation],
    history: &[PurchaseRecord],
    valuation_date: NaiveDate,
    config: &WashSaleConfig,
    oracle: &SimilarityOracle,
) -> Result<(), EngineError> {
    let window_start = valuation_date - chrono::Duration::days(config.before_days as i64);
    let window_end = valuation_date + chrono::Duration::days(config.after_days as i64);

    for rec in plan.iter().filter(|r| r.actual_gain < 0.0) {
        for purchase in history
            .iter()
            .filter(|p| p.date >= window_start && p.date <= window_end)
        {
            let similarity = if purchase.symbol == rec.symbol {
                Some(100)
            } else {
                oracle
                    .score(&rec.symbol, &purchase.symbol)
                    .filter(|s| *s >= SIMILAR_SECURITY_TRIGGER)
            };
            if let Some(score) = similarity {
                return Err(EngineError::WashSaleViolation {
                    symbol: rec.symbol.clone(),
                    purchase_symbol: purchase.symbol.clone(),
                    purchase_date: purchase.date,
                    similarity: (purchase.symbol != rec.symbol).then_some(score),
                    risk_level: RiskLevel::from_similarity(score),
                });
            }
        }
    }
    Ok(())
}
