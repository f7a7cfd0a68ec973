//! Structured error taxonomy for the harvesting engine.
//!
//! Errors are values with a details payload, not bare strings; a
//! serializable [`ErrorReport`] form is embedded in the result record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RiskLevel, Term};

/// One structural problem found in a submitted lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotIssue {
    pub index: usize,
    pub field: String,
    pub reason: String,
}

/// Counts of lots removed at each filtering step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredCounts {
    pub excluded_account_type: usize,
    pub excluded_not_included: usize,
    pub excluded_wash_sale: usize,
    pub remaining: usize,
}

/// Details payload for `NoLotsFound`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterBreakdown {
    pub original_size: usize,
    pub account_types: Vec<String>,
    pub filtered_counts: FilteredCounts,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("invalid portfolio data: {} lot(s) failed validation", .issues.len())]
    InvalidPortfolioData { issues: Vec<LotIssue> },

    #[error("portfolio has {size} lots, exceeding the limit of {max}")]
    PortfolioTooLarge { size: usize, max: usize },

    #[error("no lots available for selection after filtering")]
    NoLotsFound { breakdown: FilterBreakdown },

    #[error("wash sale violation: selling {symbol} at a loss conflicts with the {purchase_symbol} purchase on {purchase_date}")]
    WashSaleViolation {
        symbol: String,
        purchase_symbol: String,
        purchase_date: NaiveDate,
        /// Similarity score when the conflict is a substantially identical
        /// security rather than the same symbol.
        similarity: Option<u32>,
        risk_level: RiskLevel,
    },

    /// The overshoot cap prevents any nonempty selection for the term.
    /// Reported as a warning, never as a top-level failure.
    #[error("{term} target unreachable under the overshoot cap")]
    TargetUnreachable { term: Term },

    #[error("calculation cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("unexpected failure in {stage}: {message}")]
    Unexpected { stage: String, message: String },
}

impl EngineError {
    pub fn unexpected(stage: &str, message: impl Into<String>) -> Self {
        Self::Unexpected {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled(stage: &str) -> Self {
        Self::Cancelled {
            stage: stage.to_string(),
        }
    }

    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidPortfolioData { .. } => "invalid_portfolio_data",
            EngineError::PortfolioTooLarge { .. } => "portfolio_too_large",
            EngineError::NoLotsFound { .. } => "no_lots_found",
            EngineError::WashSaleViolation { .. } => "wash_sale_violation",
            EngineError::TargetUnreachable { .. } => "target_unreachable",
            EngineError::Cancelled { .. } => "cancelled",
            EngineError::Unexpected { .. } => "unexpected",
        }
    }

    /// The structured details payload for the report form.
    pub fn details(&self) -> serde_json::Value {
        match self {
            EngineError::InvalidPortfolioData { issues } => {
                serde_json::to_value(issues).unwrap_or_default()
            }
            EngineError::PortfolioTooLarge { size, max } => {
                serde_json::json!({"size": size, "max": max})
            }
            EngineError::NoLotsFound { breakdown } => {
                serde_json::to_value(breakdown).unwrap_or_default()
            }
            EngineError::WashSaleViolation {
                symbol,
                purchase_symbol,
                purchase_date,
                similarity,
                risk_level,
            } => serde_json::json!({
                "symbol": symbol,
                "purchase_symbol": purchase_symbol,
                "purchase_date": purchase_date,
                "similarity": similarity,
                "risk_level": risk_level,
            }),
            EngineError::TargetUnreachable { term } => {
                serde_json::json!({"term": term})
            }
            EngineError::Cancelled { stage } => serde_json::json!({"stage": stage}),
            EngineError::Unexpected { stage, message } => {
                serde_json::json!({"stage": stage, "message": message})
            }
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

/// Serializable error form carried inside a result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_kinds() {
        let err = EngineError::PortfolioTooLarge { size: 10_001, max: 10_000 };
        let report = err.to_report();
        assert_eq!(report.kind, "portfolio_too_large");
        assert_eq!(report.details["size"], 10_001);
    }

    #[test]
    fn test_invalid_portfolio_details() {
        let err = EngineError::InvalidPortfolioData {
            issues: vec![LotIssue {
                index: 3,
                field: "quantity".to_string(),
                reason: "must be positive".to_string(),
            }],
        };
        assert!(err.to_string().contains("1 lot(s)"));
        let report = err.to_report();
        assert_eq!(report.details[0]["index"], 3);
    }

    #[test]
    fn test_target_unreachable_message() {
        let err = EngineError::TargetUnreachable { term: Term::Long };
        assert!(err.to_string().contains("long-term"));
    }
}
