//! Configuration records for the harvesting engine.
//!
//! Everything the engine can be told is an explicit, enumerated field here;
//! unknown option keys are a deserialization error, never silently ignored.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{AccountType, CorporateAction, PurchaseRecord};

/// Supported tax jurisdictions. The engine applies a configurable flat-rate
/// model; jurisdictions differ only in their preset rates and windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxJurisdiction {
    US,
    UK,
    Canada,
    Australia,
    Germany,
    Custom,
}

impl Default for TaxJurisdiction {
    fn default() -> Self {
        Self::US
    }
}

impl std::fmt::Display for TaxJurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaxJurisdiction::US => write!(f, "United States"),
            TaxJurisdiction::UK => write!(f, "United Kingdom"),
            TaxJurisdiction::Canada => write!(f, "Canada"),
            TaxJurisdiction::Australia => write!(f, "Australia"),
            TaxJurisdiction::Germany => write!(f, "Germany"),
            TaxJurisdiction::Custom => write!(f, "Custom"),
        }
    }
}

/// Flat tax rates used by the economics calculator and verifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    pub short_term_rate: f64,
    pub long_term_rate: f64,
    pub ordinary_income_rate: f64,
    /// Applied on top of the capital-gains rate, gains only.
    pub net_investment_income_rate: f64,
    pub state_rate: f64,
    pub jurisdiction: TaxJurisdiction,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self::us()
    }
}

impl TaxConfig {
    /// United States preset: top marginal short-term rate, top long-term rate,
    /// 3.8% NIIT, no state tax.
    pub fn us() -> Self {
        Self {
            short_term_rate: 0.37,
            long_term_rate: 0.20,
            ordinary_income_rate: 0.37,
            net_investment_income_rate: 0.038,
            state_rate: 0.0,
            jurisdiction: TaxJurisdiction::US,
        }
    }

    /// United Kingdom preset: single CGT rate, no term distinction.
    pub fn uk() -> Self {
        Self {
            short_term_rate: 0.20,
            long_term_rate: 0.20,
            ordinary_income_rate: 0.45,
            net_investment_income_rate: 0.0,
            state_rate: 0.0,
            jurisdiction: TaxJurisdiction::UK,
        }
    }

    /// Canada preset: 50% inclusion approximated as a flat rate.
    pub fn canada() -> Self {
        Self {
            short_term_rate: 0.25,
            long_term_rate: 0.25,
            ordinary_income_rate: 0.33,
            net_investment_income_rate: 0.0,
            state_rate: 0.0,
            jurisdiction: TaxJurisdiction::Canada,
        }
    }

    /// Australia preset: 50% CGT discount past twelve months.
    pub fn australia() -> Self {
        Self {
            short_term_rate: 0.45,
            long_term_rate: 0.225,
            ordinary_income_rate: 0.45,
            net_investment_income_rate: 0.0,
            state_rate: 0.0,
            jurisdiction: TaxJurisdiction::Australia,
        }
    }

    /// Germany preset: flat Abgeltungssteuer plus solidarity surcharge.
    pub fn germany() -> Self {
        Self {
            short_term_rate: 0.26375,
            long_term_rate: 0.26375,
            ordinary_income_rate: 0.26375,
            net_investment_income_rate: 0.0,
            state_rate: 0.0,
            jurisdiction: TaxJurisdiction::Germany,
        }
    }

    pub fn for_jurisdiction(jurisdiction: TaxJurisdiction) -> Self {
        match jurisdiction {
            TaxJurisdiction::US => Self::us(),
            TaxJurisdiction::UK => Self::uk(),
            TaxJurisdiction::Canada => Self::canada(),
            TaxJurisdiction::Australia => Self::australia(),
            TaxJurisdiction::Germany => Self::germany(),
            TaxJurisdiction::Custom => Self::us(),
        }
    }

    fn rates(&self) -> [f64; 5] {
        [
            self.short_term_rate,
            self.long_term_rate,
            self.ordinary_income_rate,
            self.net_investment_income_rate,
            self.state_rate,
        ]
    }
}

/// Wash-sale window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WashSaleConfig {
    /// Days before the valuation date in which a purchase disqualifies a loss.
    pub before_days: u32,
    /// Days after a purchase during which selling the same lot at a loss
    /// would land the purchase inside the window.
    pub after_days: u32,
    /// Full window span (before + sale day + after).
    pub total_window: u32,
    pub jurisdiction: TaxJurisdiction,
    /// When true, window hits exclude the lot; when false they only warn.
    pub strict_mode: bool,
}

impl Default for WashSaleConfig {
    fn default() -> Self {
        Self {
            before_days: 30,
            after_days: 30,
            total_window: 61,
            jurisdiction: TaxJurisdiction::US,
            strict_mode: true,
        }
    }
}

/// Per-lot transaction cost model:
/// `base_fee + sec_fee_rate*proceeds + taf_fee_rate*quantity + spread_rate*proceeds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionCostModel {
    pub base_fee: f64,
    pub sec_fee_rate: f64,
    pub taf_fee_rate: f64,
    pub spread_rate: f64,
}

impl Default for TransactionCostModel {
    fn default() -> Self {
        Self {
            base_fee: 0.0,
            sec_fee_rate: 2.21e-5,
            taf_fee_rate: 1.66e-5,
            spread_rate: 1.0e-3,
        }
    }
}

/// How hard the target-mode selector works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// Greedy only.
    Fast,
    /// DP for small pools and large targets, greedy otherwise.
    Balanced,
    /// DP whenever the pool fits.
    Thorough,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Bounds on the position-aware enumeration. These were magic constants in
/// prior revisions; they are configuration here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSearchLimits {
    /// Alternatives kept across all positions.
    pub max_alternatives: usize,
    /// Alternatives considered for pairwise combination.
    pub max_pair_candidates: usize,
    /// Alternatives considered for triple combination.
    pub max_triple_candidates: usize,
}

impl Default for PositionSearchLimits {
    fn default() -> Self {
        Self {
            max_alternatives: 12,
            max_pair_candidates: 8,
            max_triple_candidates: 10,
        }
    }
}

/// Portfolio total-value breakpoints for the size classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeClassThresholds {
    /// Total value at or above which the portfolio is medium.
    pub medium_min: f64,
    /// Total value at or above which the portfolio is large.
    pub large_min: f64,
}

impl Default for SizeClassThresholds {
    fn default() -> Self {
        Self {
            medium_min: 100_000.0,
            large_min: 1_000_000.0,
        }
    }
}

/// The complete options record for one engine call.
///
/// Deserialization rejects unknown keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    pub tax_config: TaxConfig,
    pub wash_sale_config: WashSaleConfig,
    /// Account kinds eligible for selection.
    pub account_types: BTreeSet<AccountType>,
    /// Switch to the cash-raising selector.
    pub use_cash_raising: bool,
    pub cash_needed: f64,
    pub current_cash: f64,
    /// Overall cap on recommendations, applied after selection.
    pub max_lots: usize,
    pub optimization_level: OptimizationLevel,
    pub enable_corporate_actions: bool,
    /// Options-level corporate actions, routed to matching lots by symbol.
    pub corporate_actions_data: Vec<CorporateAction>,
    pub purchase_history: Vec<PurchaseRecord>,
    /// Forces the greedy path; auto-enabled above 1,000 lots.
    pub performance_mode: bool,
    /// Overshoot ceiling, in percent of the remaining need.
    pub max_overshoot_percent: f64,
    /// Override for the adaptive minimum trade size.
    pub min_trade_amount: Option<f64>,
    /// Override for the adaptive minimum target magnitude.
    pub min_target_threshold: Option<f64>,
    /// Seed for the verifier's randomized alternatives.
    pub random_seed: Option<u64>,
    pub max_portfolio_size: usize,
    pub position_search: PositionSearchLimits,
    pub size_class_thresholds: SizeClassThresholds,
    pub transaction_costs: TransactionCostModel,
    /// Treat a declared-gain consistency mismatch as a hard error.
    pub strict_consistency: bool,
    /// Number of randomized alternatives the verifier samples.
    pub verification_samples: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let mut account_types = BTreeSet::new();
        account_types.insert(AccountType::Taxable);
        Self {
            tax_config: TaxConfig::default(),
            wash_sale_config: WashSaleConfig::default(),
            account_types,
            use_cash_raising: false,
            cash_needed: 0.0,
            current_cash: 0.0,
            max_lots: 50,
            optimization_level: OptimizationLevel::default(),
            enable_corporate_actions: false,
            corporate_actions_data: Vec::new(),
            purchase_history: Vec::new(),
            performance_mode: false,
            max_overshoot_percent: 5.0,
            min_trade_amount: None,
            min_target_threshold: None,
            random_seed: None,
            max_portfolio_size: 10_000,
            position_search: PositionSearchLimits::default(),
            size_class_thresholds: SizeClassThresholds::default(),
            transaction_costs: TransactionCostModel::default(),
            strict_consistency: false,
            verification_samples: 5,
        }
    }
}

impl EngineOptions {
    /// Structural checks on the options record itself.
    pub fn validate(&self) -> Result<(), EngineError> {
        for rate in self.tax_config.rates() {
            if !(0.0..=1.0).contains(&rate) || !rate.is_finite() {
                return Err(EngineError::unexpected(
                    "options",
                    format!("tax rate {rate} outside [0, 1]"),
                ));
            }
        }
        if !self.max_overshoot_percent.is_finite() || self.max_overshoot_percent < 0.0 {
            return Err(EngineError::unexpected(
                "options",
                format!("max_overshoot_percent {} must be >= 0", self.max_overshoot_percent),
            ));
        }
        if self.max_portfolio_size == 0 {
            return Err(EngineError::unexpected("options", "max_portfolio_size must be positive"));
        }
        if self.use_cash_raising && (!self.cash_needed.is_finite() || self.cash_needed < 0.0) {
            return Err(EngineError::unexpected(
                "options",
                format!("cash_needed {} must be a non-negative amount", self.cash_needed),
            ));
        }
        Ok(())
    }

    /// Parse an options record from JSON, rejecting unknown keys.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EngineError> {
        let options: Self = serde_json::from_value(value)
            .map_err(|e| EngineError::unexpected("options", e.to_string()))?;
        options.validate()?;
        Ok(options)
    }
}
