//! Harvest Engine
//!
//! Whole-lot sell selection toward independent short- and long-term
//! capital-gain targets, plus a cash-raising mode, with wash-sale filtering,
//! corporate-action normalization and a verification pass.

pub mod cash_selector;
pub mod categorizer;
pub mod corporate_actions;
pub mod economics;
pub mod engine;
pub mod positions;
pub mod similarity;
pub mod target_selector;
pub mod validator;
pub mod verifier;
pub mod wash_sale;

pub use cash_selector::{CashPick, CashSelection};
pub use categorizer::CategorizedLots;
pub use engine::{HarvestEngine, HarvestRequest, ALGORITHM_VERSION};
pub use positions::{AlternativeStrategy, PositionGroup, SellAlternative};
pub use similarity::{SecurityProfile, SimilarityOracle};
pub use target_selector::{SelectionOutcome, TargetSelection};
pub use validator::ValidationOutcome;
pub use wash_sale::{WashSaleExclusion, WashSaleOutcome, WashSaleReason};

pub use harvest_core::{
    AccountType, AdaptiveThresholds, Algorithm, CancelToken, CashSummary, CorporateAction,
    CorporateActionDetail, CorporateActionKind, EngineError, EngineOptions, ErrorReport,
    GainTargets, Lot, OptimizationLevel, PortfolioContext, PurchaseRecord, QualityRating,
    RealizedGains, Recommendation, ResultRecord, RiskLevel, SizeClass, Summary, TargetSummary,
    TaxConfig, TaxJurisdiction, Term, Verification, WashSaleConfig,
};
