//! Corporate-action normalization.
//!
//! Re-expresses each lot's quantity, price, basis and symbol after every
//! split, merger, spinoff and dividend effective on or before the valuation
//! date, so selection sees post-action economics.

use chrono::NaiveDate;
use harvest_core::{CorporateAction, CorporateActionKind, Lot};

/// Apply all effective actions to every lot. Options-level actions are routed
/// to lots by symbol before the lot's own actions are merged in. Returns the
/// normalized lots plus warnings for actions that could not be applied.
pub fn normalize_lots(
    lots: Vec<Lot>,
    global_actions: &[CorporateAction],
    valuation_date: NaiveDate,
) -> (Vec<Lot>, Vec<String>) {
    let mut warnings = Vec::new();
    let normalized = lots
        .into_iter()
        .map(|lot| normalize_lot(lot, global_actions, valuation_date, &mut warnings))
        .collect();
    (normalized, warnings)
}

fn normalize_lot(
    mut lot: Lot,
    global_actions: &[CorporateAction],
    valuation_date: NaiveDate,
    warnings: &mut Vec<String>,
) -> Lot {
    let mut actions: Vec<CorporateAction> = global_actions
        .iter()
        .filter(|a| a.symbol.as_deref() == Some(lot.symbol.as_str()))
        .cloned()
        .chain(lot.corporate_actions.iter().cloned())
        .filter(|a| a.effective_date <= valuation_date)
        .collect();
    if actions.is_empty() {
        return lot;
    }
    actions.sort_by_key(|a| a.effective_date);

    for action in &actions {
        if let Some(warning) = apply_action(&mut lot, action) {
            warnings.push(warning);
        }
    }

    lot.unrealized_gain = lot.computed_gain();
    lot
}

/// Apply one action in place. Returns a warning when the action is malformed.
fn apply_action(lot: &mut Lot, action: &CorporateAction) -> Option<String> {
    match action.kind {
        CorporateActionKind::Split => {
            let ratio = action.ratio.filter(|r| r.is_finite() && *r > 0.0);
            match ratio {
                Some(r) => {
                    lot.quantity *= r;
                    lot.price /= r;
                    None
                }
                None => Some(format!(
                    "split on {} for {} has no usable ratio; skipped",
                    action.effective_date, lot.symbol
                )),
            }
        }
        CorporateActionKind::Merger => {
            let detail = action.detail.as_ref();
            let new_symbol = detail.and_then(|d| d.new_symbol.clone());
            let exchange_ratio = detail
                .and_then(|d| d.exchange_ratio)
                .filter(|r| r.is_finite() && *r > 0.0);
            match (new_symbol, exchange_ratio) {
                (Some(symbol), Some(ratio)) => {
                    lot.symbol = symbol;
                    lot.quantity *= ratio;
                    // Keep market value intact until a quote for the surviving
                    // symbol arrives.
                    lot.price /= ratio;
                    None
                }
                _ => Some(format!(
                    "merger on {} for {} is missing new_symbol or exchange_ratio; skipped",
                    action.effective_date, lot.symbol
                )),
            }
        }
        CorporateActionKind::Spinoff => {
            lot.corporate_action_flag = true;
            if let Some(fraction) = action
                .detail
                .as_ref()
                .and_then(|d| d.basis_allocation)
                .filter(|f| f.is_finite() && (0.0..=1.0).contains(f))
            {
                let allocated = lot.cost_basis * fraction;
                lot.cost_basis -= allocated;
                lot.spinoff_basis_allocated =
                    Some(lot.spinoff_basis_allocated.unwrap_or(0.0) + allocated);
            }
            None
        }
        CorporateActionKind::Dividend => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{AccountType, CorporateActionDetail};

    fn lot(symbol: &str, quantity: f64, price: f64, cost_basis: f64) -> Lot {
        Lot {
            symbol: symbol.to_string(),
            name: None,
            quantity,
            price,
            cost_basis,
            unrealized_gain: quantity * price - cost_basis,
            term: None,
            acquired_date: NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
            included_in_selling: true,
            account_type: AccountType::Taxable,
            wash_sale_flag: false,
            corporate_actions: Vec::new(),
            corporate_action_flag: false,
            spinoff_basis_allocated: None,
        }
    }

    fn split(date: (i32, u32, u32), ratio: f64) -> CorporateAction {
        CorporateAction {
            kind: CorporateActionKind::Split,
            effective_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            ratio: Some(ratio),
            detail: None,
            symbol: None,
        }
    }

    fn valuation() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    #[test]
    fn test_split_preserves_gain() {
        let mut l = lot("NVDA", 100.0, 450.0, 30_000.0);
        let before = l.unrealized_gain;
        l.corporate_actions.push(split((2024, 6, 7), 2.0));

        let (lots, warnings) = normalize_lots(vec![l], &[], valuation());
        assert!(warnings.is_empty());
        assert!((lots[0].quantity - 200.0).abs() < 1e-9);
        assert!((lots[0].price - 225.0).abs() < 1e-9);
        assert!((lots[0].cost_basis - 30_000.0).abs() < 1e-9);
        assert!((lots[0].unrealized_gain - before).abs() < 0.01);
    }

    #[test]
    fn test_future_actions_ignored() {
        let mut l = lot("NVDA", 100.0, 450.0, 30_000.0);
        l.corporate_actions.push(split((2026, 1, 1), 2.0));

        let (lots, _) = normalize_lots(vec![l], &[], valuation());
        assert!((lots[0].quantity - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_actions_applied_chronologically() {
        let mut l = lot("TSLA", 10.0, 900.0, 3_000.0);
        // Out of order on input: 3:1 then an earlier 5:1.
        l.corporate_actions.push(split((2024, 8, 25), 3.0));
        l.corporate_actions.push(split((2022, 8, 25), 5.0));

        let (lots, _) = normalize_lots(vec![l], &[], valuation());
        assert!((lots[0].quantity - 150.0).abs() < 1e-9);
        assert!((lots[0].price - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_merger_renames_and_rescales() {
        let mut l = lot("ATVI", 100.0, 95.0, 6_000.0);
        l.corporate_actions.push(CorporateAction {
            kind: CorporateActionKind::Merger,
            effective_date: NaiveDate::from_ymd_opt(2023, 10, 13).unwrap(),
            ratio: None,
            detail: Some(CorporateActionDetail {
                new_symbol: Some("MSFT".to_string()),
                exchange_ratio: Some(0.25),
                basis_allocation: None,
            }),
            symbol: None,
        });

        let (lots, warnings) = normalize_lots(vec![l], &[], valuation());
        assert!(warnings.is_empty());
        assert_eq!(lots[0].symbol, "MSFT");
        assert!((lots[0].quantity - 25.0).abs() < 1e-9);
        assert!((lots[0].cost_basis - 6_000.0).abs() < 1e-9);
        // Market value is preserved by the re-expression.
        assert!((lots[0].market_value() - 9_500.0).abs() < 1e-6);
    }

    #[test]
    fn test_spinoff_flags_and_carves_basis() {
        let mut l = lot("GE", 50.0, 110.0, 4_000.0);
        l.corporate_actions.push(CorporateAction {
            kind: CorporateActionKind::Spinoff,
            effective_date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            ratio: None,
            detail: Some(CorporateActionDetail {
                new_symbol: Some("GEV".to_string()),
                exchange_ratio: None,
                basis_allocation: Some(0.25),
            }),
            symbol: None,
        });

        let (lots, _) = normalize_lots(vec![l], &[], valuation());
        assert!(lots[0].corporate_action_flag);
        assert!((lots[0].cost_basis - 3_000.0).abs() < 1e-9);
        assert!((lots[0].spinoff_basis_allocated.unwrap() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_actions_routed_by_symbol() {
        let a = lot("NVDA", 10.0, 450.0, 3_000.0);
        let b = lot("MSFT", 10.0, 350.0, 2_500.0);
        let mut action = split((2024, 6, 7), 10.0);
        action.symbol = Some("NVDA".to_string());

        let (lots, _) = normalize_lots(vec![a, b], &[action], valuation());
        assert!((lots[0].quantity - 100.0).abs() < 1e-9);
        assert!((lots[1].quantity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_split_warns() {
        let mut l = lot("NVDA", 100.0, 450.0, 30_000.0);
        l.corporate_actions.push(CorporateAction {
            kind: CorporateActionKind::Split,
            effective_date: NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(),
            ratio: None,
            detail: None,
            symbol: None,
        });

        let (lots, warnings) = normalize_lots(vec![l], &[], valuation());
        assert_eq!(warnings.len(), 1);
        assert!((lots[0].quantity - 100.0).abs() < 1e-9);
    }
}
