//! Core data model for the harvesting engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{TaxConfig, WashSaleConfig};

/// Days held at or beyond which a lot receives long-term treatment.
pub const LONG_TERM_THRESHOLD_DAYS: i64 = 365;

/// Holding-period classification of a lot's gain or loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    #[serde(rename = "short", alias = "Short", alias = "Short-Term", alias = "ShortTerm")]
    Short,
    #[serde(rename = "long", alias = "Long", alias = "Long-Term", alias = "LongTerm")]
    Long,
}

impl Term {
    /// Parse the source strings brokerage exports use ("Short-Term"/"Long-Term").
    pub fn from_source(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" | "short-term" | "short term" | "shortterm" | "st" => Some(Term::Short),
            "long" | "long-term" | "long term" | "longterm" | "lt" => Some(Term::Long),
            _ => None,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Term::Long)
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Short => write!(f, "short-term"),
            Term::Long => write!(f, "long-term"),
        }
    }
}

/// Account kind the lot is held in. Only taxable accounts participate in
/// harvesting; the rest are carried so callers can pass whole households.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Taxable,
    TraditionalIra,
    RothIra,
    Hsa,
    #[serde(rename = "401k")]
    FourOhOneK,
}

impl Default for AccountType {
    fn default() -> Self {
        Self::Taxable
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Taxable => write!(f, "taxable"),
            AccountType::TraditionalIra => write!(f, "traditional_ira"),
            AccountType::RothIra => write!(f, "roth_ira"),
            AccountType::Hsa => write!(f, "hsa"),
            AccountType::FourOhOneK => write!(f, "401k"),
        }
    }
}

/// Kind of corporate action applied to a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateActionKind {
    Split,
    Merger,
    Spinoff,
    Dividend,
}

/// Extra payload for mergers and spinoffs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorporateActionDetail {
    /// Surviving symbol after a merger.
    #[serde(default)]
    pub new_symbol: Option<String>,
    /// Shares of the new entity received per share held.
    #[serde(default)]
    pub exchange_ratio: Option<f64>,
    /// Fraction of cost basis allocated to a spun-off entity, in [0, 1].
    #[serde(default)]
    pub basis_allocation: Option<f64>,
}

/// A single corporate action. Actions attached to a lot apply to that lot;
/// actions supplied at the options level carry a `symbol` and are routed to
/// every matching lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub kind: CorporateActionKind,
    pub effective_date: NaiveDate,
    /// Split ratio (new shares per old share).
    #[serde(default)]
    pub ratio: Option<f64>,
    #[serde(default)]
    pub detail: Option<CorporateActionDetail>,
    /// Target symbol for options-level actions.
    #[serde(default)]
    pub symbol: Option<String>,
}

/// A unit of cost-basis accounting: one purchase of one security.
///
/// Immutable once validated; the corporate-action normalizer yields a new
/// value rather than mutating shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Shares held. Fractional shares are accepted on input; selection always
    /// sells the whole lot.
    pub quantity: f64,
    /// Current price per share.
    pub price: f64,
    /// Total cost basis for the lot.
    pub cost_basis: f64,
    /// Declared unrealized gain; cross-checked against quantity*price - cost_basis.
    pub unrealized_gain: f64,
    /// Holding-period classification; derived from `acquired_date` when absent.
    #[serde(default)]
    pub term: Option<Term>,
    pub acquired_date: NaiveDate,
    #[serde(default = "default_included")]
    pub included_in_selling: bool,
    #[serde(default)]
    pub account_type: AccountType,
    /// Pre-marked unavailability for loss harvesting.
    #[serde(default)]
    pub wash_sale_flag: bool,
    #[serde(default)]
    pub corporate_actions: Vec<CorporateAction>,
    /// Set by the normalizer when a spinoff touched this lot.
    #[serde(default)]
    pub corporate_action_flag: bool,
    /// Basis carved out to a spun-off entity, when the action provided one.
    #[serde(default)]
    pub spinoff_basis_allocated: Option<f64>,
}

fn default_included() -> bool {
    true
}

impl Lot {
    /// Market value of the whole lot at the current price.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.price
    }

    /// Gain recomputed from quantity, price and basis.
    pub fn computed_gain(&self) -> f64 {
        self.quantity * self.price - self.cost_basis
    }

    pub fn is_loss(&self) -> bool {
        self.unrealized_gain < 0.0
    }

    pub fn holding_days(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.acquired_date).num_days()
    }

    /// The declared term, or the one derived from the holding period.
    pub fn resolved_term(&self, as_of: NaiveDate) -> Term {
        self.term.unwrap_or({
            if self.holding_days(as_of) >= LONG_TERM_THRESHOLD_DAYS {
                Term::Long
            } else {
                Term::Short
            }
        })
    }

    /// Selection efficiency: gain magnitude per dollar of proceeds.
    pub fn efficiency(&self) -> f64 {
        let value = self.market_value();
        if value > 0.0 {
            self.unrealized_gain.abs() / value
        } else {
            0.0
        }
    }
}

/// A purchase event from the client's trade history, consumed by the
/// wash-sale filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub quantity: f64,
}

/// One whole-lot sell recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    /// Always the full lot quantity; partial sales are never produced.
    pub quantity_to_sell: f64,
    pub actual_gain: f64,
    pub proceeds: f64,
    pub term: Term,
    pub reason: String,
    pub tax_impact: f64,
    pub transaction_cost: f64,
    pub net_benefit: f64,
}

/// Year-end gain targets, one per term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GainTargets {
    pub short_term: f64,
    pub long_term: f64,
}

/// Year-to-date realized results, one per term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizedGains {
    pub short_term: f64,
    pub long_term: f64,
}

/// Portfolio size class used to scale selection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeClass::Small => write!(f, "small"),
            SizeClass::Medium => write!(f, "medium"),
            SizeClass::Large => write!(f, "large"),
        }
    }
}

/// Call-scoped aggregate characteristics of the eligible portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub total_value: f64,
    pub size_class: SizeClass,
    /// Distinct symbols.
    pub position_count: usize,
    pub average_lot_value: f64,
    pub has_large_lots: bool,
    pub has_small_lots: bool,
}

/// Selection thresholds scaled to the portfolio's size class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    /// Targets below this magnitude are skipped.
    pub min_target: f64,
    /// Lots with proceeds below this are not worth a trade.
    pub min_trade_amount: f64,
    /// Per-category cap on recommended trades.
    pub max_trades_per_category: usize,
}

/// Wash-sale risk bucket for a substantially-identical-security match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucketize a similarity score at the 70/85/95 breakpoints.
    pub fn from_similarity(score: u32) -> Self {
        if score >= 95 {
            RiskLevel::Critical
        } else if score >= 85 {
            RiskLevel::High
        } else if score >= 70 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which selection algorithm produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    DynamicProgramming,
    GreedyMultiStrategy,
    PositionAware,
    CashRaising,
    /// Nothing was selected for the term (skipped or unreachable).
    None,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::DynamicProgramming => write!(f, "dynamic_programming"),
            Algorithm::GreedyMultiStrategy => write!(f, "greedy_multi_strategy"),
            Algorithm::PositionAware => write!(f, "position_aware"),
            Algorithm::CashRaising => write!(f, "cash_raising"),
            Algorithm::None => write!(f, "none"),
        }
    }
}

/// Target-mode result summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSummary {
    pub target_short_term: f64,
    pub target_long_term: f64,
    pub actual_short_term: f64,
    pub actual_long_term: f64,
    pub total_recommendations: usize,
    pub total_proceeds: f64,
    pub total_tax_impact: f64,
    pub total_transaction_costs: f64,
    pub net_benefit: f64,
    pub ytd_realized_short_term: f64,
    pub ytd_realized_long_term: f64,
    pub total_annual_short_term: f64,
    pub total_annual_long_term: f64,
    pub cash_maximization_mode: bool,
}

/// Cash-raising result summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashSummary {
    pub cash_needed: f64,
    pub current_cash: f64,
    pub additional_needed: f64,
    pub actual_raised: f64,
    pub short_term_gain: f64,
    pub long_term_gain: f64,
    pub total_taxable_gain: f64,
    pub total_recommendations: usize,
}

/// Mode-specific summary of a calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    Target(TargetSummary),
    Cash(CashSummary),
}

/// Achieved precision against the per-term needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Precision {
    pub short_term_diff: f64,
    pub long_term_diff: f64,
    pub short_term_pct: f64,
    pub long_term_pct: f64,
}

/// Verifier quality rating over both precision percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityRating {
    Excellent,
    Good,
    Acceptable,
    Suboptimal,
}

impl QualityRating {
    pub fn from_precision(short_pct: f64, long_pct: f64) -> Self {
        let worst = short_pct.max(long_pct);
        if worst <= 5.0 {
            QualityRating::Excellent
        } else if worst <= 15.0 {
            QualityRating::Good
        } else if worst <= 25.0 {
            QualityRating::Acceptable
        } else {
            QualityRating::Suboptimal
        }
    }
}

/// Outcome of the randomized alternative-selection comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlternativeTests {
    pub samples: usize,
    pub better_found: usize,
    /// (samples - better_found) / samples.
    pub confidence: f64,
    pub is_likely_optimal: bool,
}

/// How much of the eligible pool the selection used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionEfficiency {
    pub lots_selected: usize,
    pub lots_eligible: usize,
    pub utilization: f64,
}

/// Verifier output attached to target-mode results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub precision: Precision,
    pub quality: QualityRating,
    pub alternative_tests: AlternativeTests,
    pub efficiency: SelectionEfficiency,
}

/// Per-call metadata attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub version: String,
    pub processing_time_ms: u64,
    pub algorithm_used: String,
    pub tax_config: TaxConfig,
    pub wash_sale_config: WashSaleConfig,
    pub portfolio_context: Option<PortfolioContext>,
}

/// Inputs echoed back into the calculation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationInputs {
    pub portfolio_size: usize,
    pub targets: GainTargets,
    pub realized: RealizedGains,
    pub cash_mode: bool,
}

/// Signed remaining needs after subtracting realized YTD results.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NeededGains {
    pub short_term: f64,
    pub long_term: f64,
}

/// Audit record of one engine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub inputs: CalculationInputs,
    pub needed: NeededGains,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// The complete output of one engine call. Always carries either `error` or a
/// populated (possibly empty) `recommendations` plus `warnings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub success: bool,
    pub recommendations: Vec<Recommendation>,
    pub summary: Option<Summary>,
    pub warnings: Vec<String>,
    pub verification: Option<Verification>,
    pub metadata: Metadata,
    pub calculation: Option<CalculationRecord>,
    pub error: Option<crate::error::ErrorReport>,
    /// True when the cancellation signal cut the calculation short; the
    /// recommendations present are whatever had been assembled.
    #[serde(default)]
    pub cancelled: bool,
}

/// Caller-supplied cooperative cancellation signal, checked between pipeline
/// stages and between DP rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_from_source() {
        assert_eq!(Term::from_source("Short-Term"), Some(Term::Short));
        assert_eq!(Term::from_source("Long-Term"), Some(Term::Long));
        assert_eq!(Term::from_source("long"), Some(Term::Long));
        assert_eq!(Term::from_source("forever"), None);
    }

    #[test]
    fn test_resolved_term_derivation() {
        let lot = Lot {
            symbol: "VTI".to_string(),
            name: None,
            quantity: 10.0,
            price: 220.0,
            cost_basis: 2000.0,
            unrealized_gain: 200.0,
            term: None,
            acquired_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            included_in_selling: true,
            account_type: AccountType::Taxable,
            wash_sale_flag: false,
            corporate_actions: Vec::new(),
            corporate_action_flag: false,
            spinoff_basis_allocated: None,
        };

        let early = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(lot.resolved_term(early), Term::Short);

        let late = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(lot.resolved_term(late), Term::Long);
    }

    #[test]
    fn test_risk_level_buckets() {
        assert_eq!(RiskLevel::from_similarity(60), RiskLevel::Low);
        assert_eq!(RiskLevel::from_similarity(70), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_similarity(85), RiskLevel::High);
        assert_eq!(RiskLevel::from_similarity(95), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_similarity(100), RiskLevel::Critical);
    }

    #[test]
    fn test_quality_rating_thresholds() {
        assert_eq!(QualityRating::from_precision(3.0, 4.9), QualityRating::Excellent);
        assert_eq!(QualityRating::from_precision(3.0, 12.0), QualityRating::Good);
        assert_eq!(QualityRating::from_precision(20.0, 5.0), QualityRating::Acceptable);
        assert_eq!(QualityRating::from_precision(26.0, 1.0), QualityRating::Suboptimal);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
