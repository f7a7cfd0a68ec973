//! Categorization and portfolio context.
//!
//! Partitions eligible lots into the four signed term categories and derives
//! the size-scaled thresholds every selector honors.

use std::collections::HashSet;

use chrono::NaiveDate;
use harvest_core::{
    AdaptiveThresholds, EngineOptions, Lot, PortfolioContext, SizeClass, SizeClassThresholds,
    Term,
};

/// Ratio of the largest (smallest) lot to the average beyond which the
/// portfolio is considered to hold outsized (dust) lots.
const LARGE_LOT_RATIO: f64 = 5.0;
const SMALL_LOT_RATIO: f64 = 0.2;

/// Eligible lots split by term and gain sign. Zero-gain lots can move no
/// target and are left out of every pool.
#[derive(Debug, Clone, Default)]
pub struct CategorizedLots {
    pub short_term_gains: Vec<Lot>,
    pub short_term_losses: Vec<Lot>,
    pub long_term_gains: Vec<Lot>,
    pub long_term_losses: Vec<Lot>,
}

impl CategorizedLots {
    pub fn eligible_count(&self) -> usize {
        self.short_term_gains.len()
            + self.short_term_losses.len()
            + self.long_term_gains.len()
            + self.long_term_losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligible_count() == 0
    }

    pub fn all(&self) -> impl Iterator<Item = &Lot> {
        self.short_term_gains
            .iter()
            .chain(self.short_term_losses.iter())
            .chain(self.long_term_gains.iter())
            .chain(self.long_term_losses.iter())
    }

    pub fn gains(&self, term: Term) -> &[Lot] {
        match term {
            Term::Short => &self.short_term_gains,
            Term::Long => &self.long_term_gains,
        }
    }

    pub fn losses(&self, term: Term) -> &[Lot] {
        match term {
            Term::Short => &self.short_term_losses,
            Term::Long => &self.long_term_losses,
        }
    }
}

/// Partition lots into the four categories, dropping lots whose proceeds fall
/// below the minimum trade size.
pub fn categorize(
    lots: &[Lot],
    valuation_date: NaiveDate,
    min_trade_amount: f64,
) -> CategorizedLots {
    let mut categories = CategorizedLots::default();

    for lot in lots {
        if lot.market_value() < min_trade_amount {
            tracing::debug!(symbol = %lot.symbol, value = lot.market_value(), "lot below minimum trade size");
            continue;
        }
        let bucket = match (lot.resolved_term(valuation_date), lot.unrealized_gain) {
            (_, g) if g == 0.0 => continue,
            (Term::Short, g) if g > 0.0 => &mut categories.short_term_gains,
            (Term::Short, _) => &mut categories.short_term_losses,
            (Term::Long, g) if g > 0.0 => &mut categories.long_term_gains,
            (Term::Long, _) => &mut categories.long_term_losses,
        };
        bucket.push(lot.clone());
    }

    categories
}

/// Aggregate characteristics of the eligible portfolio.
pub fn portfolio_context(lots: &[Lot], thresholds: &SizeClassThresholds) -> PortfolioContext {
    let total_value: f64 = lots.iter().map(Lot::market_value).sum();
    let average_lot_value = if lots.is_empty() {
        0.0
    } else {
        total_value / lots.len() as f64
    };

    let size_class = if total_value >= thresholds.large_min {
        SizeClass::Large
    } else if total_value >= thresholds.medium_min {
        SizeClass::Medium
    } else {
        SizeClass::Small
    };

    let symbols: HashSet<&str> = lots.iter().map(|l| l.symbol.as_str()).collect();

    let has_large_lots = lots
        .iter()
        .any(|l| l.market_value() > LARGE_LOT_RATIO * average_lot_value);
    let has_small_lots = lots
        .iter()
        .any(|l| l.market_value() < SMALL_LOT_RATIO * average_lot_value);

    PortfolioContext {
        total_value,
        size_class,
        position_count: symbols.len(),
        average_lot_value,
        has_large_lots,
        has_small_lots,
    }
}

/// Size-scaled selection thresholds, with explicit option overrides applied.
/// The per-category trade cap never drops below one so a valid tiny
/// portfolio stays selectable.
pub fn adaptive_thresholds(
    context: &PortfolioContext,
    lot_count: usize,
    options: &EngineOptions,
) -> AdaptiveThresholds {
    let n = lot_count as f64;
    let (min_target, min_trade_amount, max_trades) = match context.size_class {
        SizeClass::Small => (
            (0.001 * context.total_value).max(50.0),
            (0.05 * context.average_lot_value).max(25.0),
            5.min((0.3 * n) as usize),
        ),
        SizeClass::Medium => (
            (0.0005 * context.total_value).max(500.0),
            (0.10 * context.average_lot_value).max(100.0),
            8.min((0.4 * n) as usize),
        ),
        SizeClass::Large => (
            (0.0002 * context.total_value).max(2_000.0),
            (0.15 * context.average_lot_value).max(500.0),
            15.min((0.5 * n) as usize),
        ),
    };

    AdaptiveThresholds {
        min_target: options.min_target_threshold.unwrap_or(min_target),
        min_trade_amount: options.min_trade_amount.unwrap_or(min_trade_amount),
        max_trades_per_category: max_trades.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::AccountType;

    fn lot(symbol: &str, quantity: f64, price: f64, gain: f64, term: Term) -> Lot {
        Lot {
            symbol: symbol.to_string(),
            name: None,
            quantity,
            price,
            cost_basis: quantity * price - gain,
            unrealized_gain: gain,
            term: Some(term),
            acquired_date: NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
            included_in_selling: true,
            account_type: AccountType::Taxable,
            wash_sale_flag: false,
            corporate_actions: Vec::new(),
            corporate_action_flag: false,
            spinoff_basis_allocated: None,
        }
    }

    fn valuation() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    #[test]
    fn test_partition_into_four_categories() {
        let lots = vec![
            lot("A", 10.0, 100.0, 200.0, Term::Short),
            lot("B", 10.0, 100.0, -200.0, Term::Short),
            lot("C", 10.0, 100.0, 300.0, Term::Long),
            lot("D", 10.0, 100.0, -300.0, Term::Long),
        ];
        let categories = categorize(&lots, valuation(), 0.0);
        assert_eq!(categories.short_term_gains.len(), 1);
        assert_eq!(categories.short_term_losses.len(), 1);
        assert_eq!(categories.long_term_gains.len(), 1);
        assert_eq!(categories.long_term_losses.len(), 1);
        assert_eq!(categories.eligible_count(), 4);
    }

    #[test]
    fn test_zero_gain_lots_dropped() {
        let lots = vec![lot("A", 10.0, 100.0, 0.0, Term::Long)];
        let categories = categorize(&lots, valuation(), 0.0);
        assert!(categories.is_empty());
    }

    #[test]
    fn test_min_trade_amount_filters_dust() {
        let lots = vec![
            lot("A", 1.0, 40.0, 10.0, Term::Long),
            lot("B", 10.0, 100.0, 100.0, Term::Long),
        ];
        let categories = categorize(&lots, valuation(), 50.0);
        assert_eq!(categories.long_term_gains.len(), 1);
        assert_eq!(categories.long_term_gains[0].symbol, "B");
    }

    #[test]
    fn test_context_size_classes() {
        let thresholds = SizeClassThresholds::default();

        let small = vec![lot("A", 10.0, 100.0, 50.0, Term::Long)];
        assert_eq!(portfolio_context(&small, &thresholds).size_class, SizeClass::Small);

        let medium = vec![lot("A", 1_000.0, 200.0, 50.0, Term::Long)];
        assert_eq!(portfolio_context(&medium, &thresholds).size_class, SizeClass::Medium);

        let large = vec![lot("A", 10_000.0, 200.0, 50.0, Term::Long)];
        assert_eq!(portfolio_context(&large, &thresholds).size_class, SizeClass::Large);
    }

    #[test]
    fn test_position_count_distinct_symbols() {
        let lots = vec![
            lot("A", 10.0, 100.0, 50.0, Term::Long),
            lot("A", 20.0, 100.0, 80.0, Term::Long),
            lot("B", 10.0, 100.0, 50.0, Term::Short),
        ];
        let context = portfolio_context(&lots, &SizeClassThresholds::default());
        assert_eq!(context.position_count, 2);
    }

    #[test]
    fn test_small_thresholds_table() {
        // Four lots totaling $55,500 as in the simple harvesting scenario.
        let lots = vec![
            lot("VTI", 100.0, 220.0, 1_000.0, Term::Long),
            lot("VTIAX", 500.0, 28.5, -750.0, Term::Long),
            lot("BND", 200.0, 75.0, -1_000.0, Term::Short),
            lot("VNQ", 50.0, 85.0, 250.0, Term::Short),
        ];
        let context = portfolio_context(&lots, &SizeClassThresholds::default());
        let thresholds = adaptive_thresholds(&context, lots.len(), &EngineOptions::default());

        // min_target = max($50, 0.1% of $55,500) = $55.50
        assert!((thresholds.min_target - 55.5).abs() < 0.01);
        // min_trade = max($25, 5% of $13,875) = $693.75
        assert!((thresholds.min_trade_amount - 693.75).abs() < 0.01);
        // min(5, floor(0.3 * 4)) = 1
        assert_eq!(thresholds.max_trades_per_category, 1);
    }

    #[test]
    fn test_threshold_overrides() {
        let lots = vec![lot("A", 10.0, 100.0, 50.0, Term::Long)];
        let context = portfolio_context(&lots, &SizeClassThresholds::default());
        let options = EngineOptions {
            min_target_threshold: Some(10.0),
            min_trade_amount: Some(1.0),
            ..EngineOptions::default()
        };
        let thresholds = adaptive_thresholds(&context, 1, &options);
        assert!((thresholds.min_target - 10.0).abs() < f64::EPSILON);
        assert!((thresholds.min_trade_amount - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_trade_cap_floors_at_one() {
        let lots = vec![lot("A", 10.0, 100.0, 50.0, Term::Long)];
        let context = portfolio_context(&lots, &SizeClassThresholds::default());
        let thresholds = adaptive_thresholds(&context, 1, &EngineOptions::default());
        assert_eq!(thresholds.max_trades_per_category, 1);
    }
}
