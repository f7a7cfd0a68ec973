//! ETF similarity oracle.
//!
//! Scores how substantially identical two securities are from their asset
//! class, style and sector. The built-in table covers the broad index funds
//! that dominate taxable portfolios; callers inject larger tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Classification of one security.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub asset_class: String,
    pub style: String,
    pub sector: String,
}

impl SecurityProfile {
    pub fn new(asset_class: &str, style: &str, sector: &str) -> Self {
        Self {
            asset_class: asset_class.to_string(),
            style: style.to_string(),
            sector: sector.to_string(),
        }
    }
}

const ASSET_CLASS_WEIGHT: u32 = 40;
const STYLE_WEIGHT: u32 = 30;
const SECTOR_WEIGHT: u32 = 30;

/// Profile table plus the weighted scoring function.
#[derive(Debug, Clone)]
pub struct SimilarityOracle {
    profiles: HashMap<String, SecurityProfile>,
}

impl Default for SimilarityOracle {
    fn default() -> Self {
        let mut profiles = HashMap::new();

        // US total market / S&P 500 trackers.
        profiles.insert("VTI".to_string(), SecurityProfile::new("us_equity", "total_market", "broad"));
        profiles.insert("ITOT".to_string(), SecurityProfile::new("us_equity", "total_market", "broad"));
        profiles.insert("SCHB".to_string(), SecurityProfile::new("us_equity", "total_market", "broad"));
        profiles.insert("SPY".to_string(), SecurityProfile::new("us_equity", "large_blend", "broad"));
        profiles.insert("VOO".to_string(), SecurityProfile::new("us_equity", "large_blend", "broad"));
        profiles.insert("IVV".to_string(), SecurityProfile::new("us_equity", "large_blend", "broad"));
        profiles.insert("QQQ".to_string(), SecurityProfile::new("us_equity", "large_growth", "technology"));
        profiles.insert("VGT".to_string(), SecurityProfile::new("us_equity", "large_growth", "technology"));
        profiles.insert("XLK".to_string(), SecurityProfile::new("us_equity", "large_blend", "technology"));

        // International equity.
        profiles.insert("VXUS".to_string(), SecurityProfile::new("intl_equity", "total_market", "broad"));
        profiles.insert("VTIAX".to_string(), SecurityProfile::new("intl_equity", "total_market", "broad"));
        profiles.insert("IXUS".to_string(), SecurityProfile::new("intl_equity", "total_market", "broad"));
        profiles.insert("VEA".to_string(), SecurityProfile::new("intl_equity", "developed", "broad"));
        profiles.insert("VWO".to_string(), SecurityProfile::new("intl_equity", "emerging", "broad"));

        // Bonds and real estate.
        profiles.insert("BND".to_string(), SecurityProfile::new("bond", "aggregate", "broad"));
        profiles.insert("AGG".to_string(), SecurityProfile::new("bond", "aggregate", "broad"));
        profiles.insert("BNDX".to_string(), SecurityProfile::new("bond", "international", "broad"));
        profiles.insert("VNQ".to_string(), SecurityProfile::new("us_equity", "large_blend", "real_estate"));
        profiles.insert("XLRE".to_string(), SecurityProfile::new("us_equity", "large_blend", "real_estate"));

        Self { profiles }
    }
}

impl SimilarityOracle {
    /// Build an oracle from an injected table, replacing the built-in one.
    pub fn with_profiles(profiles: HashMap<String, SecurityProfile>) -> Self {
        Self { profiles }
    }

    /// Add or replace one profile.
    pub fn insert(&mut self, symbol: &str, profile: SecurityProfile) {
        self.profiles.insert(symbol.to_string(), profile);
    }

    pub fn profile(&self, symbol: &str) -> Option<&SecurityProfile> {
        self.profiles.get(symbol)
    }

    /// Similarity score in [0, 100]. Identical symbols always score 100;
    /// otherwise both must be in the table (None when either is unknown).
    pub fn score(&self, a: &str, b: &str) -> Option<u32> {
        if a == b {
            return Some(100);
        }
        let pa = self.profiles.get(a)?;
        let pb = self.profiles.get(b)?;

        let mut score = 0;
        if pa.asset_class == pb.asset_class {
            score += ASSET_CLASS_WEIGHT;
        }
        if pa.style == pb.style {
            score += STYLE_WEIGHT;
        }
        if pa.sector == pb.sector {
            score += SECTOR_WEIGHT;
        }
        Some(score)
    }
}
