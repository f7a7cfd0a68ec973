//! Position grouping.
//!
//! Groups lots by symbol and enumerates per-symbol sell alternatives for the
//! position-aware selection path.

use std::collections::BTreeMap;

use harvest_core::Lot;
use serde::{Deserialize, Serialize};

/// How an alternative was formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeStrategy {
    SingleLot,
    TwoLot,
    FullPosition,
    InteriorSubset,
}

/// One candidate sale of lots from a single position.
#[derive(Debug, Clone)]
pub struct SellAlternative {
    pub symbol: String,
    pub lots: Vec<Lot>,
    pub total_gain: f64,
    pub strategy: AlternativeStrategy,
}

/// All lots sharing one symbol.
#[derive(Debug, Clone)]
pub struct PositionGroup {
    pub symbol: String,
    pub lots: Vec<Lot>,
}

/// Group lots by symbol, in deterministic symbol order.
pub fn group_by_symbol(lots: &[Lot]) -> Vec<PositionGroup> {
    let mut groups: BTreeMap<&str, Vec<Lot>> = BTreeMap::new();
    for lot in lots {
        groups.entry(lot.symbol.as_str()).or_default().push(lot.clone());
    }
    groups
        .into_iter()
        .map(|(symbol, lots)| PositionGroup {
            symbol: symbol.to_string(),
            lots,
        })
        .collect()
}

/// Enumerate up to four alternatives for one position, each judged against
/// the target gain.
pub fn enumerate_alternatives(group: &PositionGroup, target: f64) -> Vec<SellAlternative> {
    let mut alternatives = Vec::new();
    if group.lots.is_empty() {
        return alternatives;
    }

    // Single lot: closest to the target; within a 10%-of-target proximity
    // band prefer the larger gain magnitude.
    let band = 0.10 * target.abs();
    let mut best: Option<&Lot> = None;
    for lot in &group.lots {
        best = Some(match best {
            None => lot,
            Some(current) => {
                let d_new = (target - lot.unrealized_gain).abs();
                let d_cur = (target - current.unrealized_gain).abs();
                if (d_new - d_cur).abs() <= band {
                    if lot.unrealized_gain.abs() > current.unrealized_gain.abs() {
                        lot
                    } else {
                        current
                    }
                } else if d_new < d_cur {
                    lot
                } else {
                    current
                }
            }
        });
    }
    if let Some(single) = best {
        alternatives.push(make(group, vec![single.clone()], AlternativeStrategy::SingleLot));
    }

    // Two-lot: the two individually best lots.
    if group.lots.len() >= 2 {
        let mut ranked: Vec<&Lot> = group.lots.iter().collect();
        ranked.sort_by(|a, b| {
            let d_a = (target - a.unrealized_gain).abs();
            let d_b = (target - b.unrealized_gain).abs();
            d_a.partial_cmp(&d_b).unwrap_or(std::cmp::Ordering::Equal)
        });
        alternatives.push(make(
            group,
            vec![ranked[0].clone(), ranked[1].clone()],
            AlternativeStrategy::TwoLot,
        ));
    }

    // Full position.
    if group.lots.len() >= 2 {
        alternatives.push(make(group, group.lots.clone(), AlternativeStrategy::FullPosition));
    }

    // Interior subset: best prefix of the proximity-sorted lots, kept only
    // when it beats everything enumerated so far.
    if group.lots.len() >= 3 {
        let mut ranked: Vec<&Lot> = group.lots.iter().collect();
        ranked.sort_by(|a, b| {
            let d_a = (target - a.unrealized_gain).abs();
            let d_b = (target - b.unrealized_gain).abs();
            d_a.partial_cmp(&d_b).unwrap_or(std::cmp::Ordering::Equal)
        });
        let max_len = group.lots.len().min(4);
        let mut best_prefix: Option<(f64, Vec<Lot>)> = None;
        let mut running = 0.0;
        for (i, lot) in ranked.iter().take(max_len).enumerate() {
            running += lot.unrealized_gain;
            let distance = (target - running).abs();
            if best_prefix.as_ref().map_or(true, |(d, _)| distance < *d) {
                best_prefix = Some((
                    distance,
                    ranked[..=i].iter().map(|l| (*l).clone()).collect(),
                ));
            }
        }
        if let Some((distance, lots)) = best_prefix {
            let beats_existing = alternatives
                .iter()
                .all(|alt| distance < (target - alt.total_gain).abs());
            if beats_existing {
                alternatives.push(make(group, lots, AlternativeStrategy::InteriorSubset));
            }
        }
    }

    alternatives
}

fn make(group: &PositionGroup, lots: Vec<Lot>, strategy: AlternativeStrategy) -> SellAlternative {
    let total_gain = lots.iter().map(|l| l.unrealized_gain).sum();
    SellAlternative {
        symbol: group.symbol.clone(),
        lots,
        total_gain,
        strategy,
    }
}
