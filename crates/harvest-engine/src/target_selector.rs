//! Target-mode lot selection.
//!
//! For each term independently, picks whole lots whose summed gain approaches
//! the signed remaining need without crossing the overshoot cap or the
//! per-category trade cap. Three paths compete: multi-strategy greedy,
//! bounded dynamic programming, and position-aware enumeration; the closest
//! cap-satisfying result wins.

use std::collections::HashMap;

use harvest_core::{
    AdaptiveThresholds, Algorithm, CancelToken, EngineError, EngineOptions, Lot,
    OptimizationLevel, PositionSearchLimits, Term,
};

use crate::categorizer::CategorizedLots;
use crate::positions;

/// DP applies only to pools at most this large.
pub const DP_POOL_LIMIT: usize = 50;
/// Under the balanced level, DP applies only to needs at least this large.
pub const DP_MIN_TARGET: f64 = 10_000.0;
/// Upper bound on dense DP table entries.
pub const DP_MEMO_CAP: usize = 50_000;

/// Greedy stops crossing the cap once this fraction of the need is reached.
const EARLY_TERMINATION_FRACTION: f64 = 0.90;
/// Greedy stops entirely once within this fraction of the need.
const CLOSE_ENOUGH_FRACTION: f64 = 0.05;

/// Position-aware enumeration runs above this pool size and need magnitude.
const POSITION_POOL_MIN: usize = 5;
const POSITION_TARGET_MIN: f64 = 1_000.0;
/// A triple must improve the best distance by this fraction to be accepted.
const TRIPLE_IMPROVEMENT: f64 = 0.25;

const CAP_EPSILON: f64 = 1e-9;

/// One term's selection result.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Selected lots, in the order the winning strategy produced them.
    pub lots: Vec<Lot>,
    /// Signed sum of selected unrealized gains.
    pub achieved: f64,
    pub algorithm: Algorithm,
}

impl SelectionOutcome {
    fn empty() -> Self {
        Self {
            lots: Vec::new(),
            achieved: 0.0,
            algorithm: Algorithm::None,
        }
    }
}

/// Both terms' selections plus everything worth telling the caller.
#[derive(Debug, Clone)]
pub struct TargetSelection {
    pub short_term: SelectionOutcome,
    pub long_term: SelectionOutcome,
    pub warnings: Vec<String>,
}

/// Entry point: select for both targets on disjoint pools. The two term
/// selections never trade off against each other.
pub fn select_for_targets(
    categories: &CategorizedLots,
    needed_short: f64,
    needed_long: f64,
    thresholds: &AdaptiveThresholds,
    options: &EngineOptions,
    force_greedy: bool,
    cancel: &CancelToken,
) -> Result<TargetSelection, EngineError> {
    let mut warnings = Vec::new();
    let mut needed_st = needed_short;
    let mut needed_lt = needed_long;

    // Gains can be re-routed into the other term when a gain category is
    // empty; losses never cross terms.
    if needed_st >= thresholds.min_target
        && categories.gains(Term::Short).is_empty()
        && !categories.gains(Term::Long).is_empty()
    {
        warnings.push(format!(
            "no short-term gain lots available; folding the ${needed_st:.2} short-term need into the long-term target"
        ));
        needed_lt += needed_st;
        needed_st = 0.0;
    } else if needed_lt >= thresholds.min_target
        && categories.gains(Term::Long).is_empty()
        && !categories.gains(Term::Short).is_empty()
    {
        warnings.push(format!(
            "no long-term gain lots available; folding the ${needed_lt:.2} long-term need into the short-term target"
        ));
        needed_st += needed_lt;
        needed_lt = 0.0;
    }

    let short_term = select_term(
        Term::Short,
        needed_st,
        categories,
        thresholds,
        options,
        force_greedy,
        cancel,
        &mut warnings,
    )?;
    let long_term = select_term(
        Term::Long,
        needed_lt,
        categories,
        thresholds,
        options,
        force_greedy,
        cancel,
        &mut warnings,
    )?;

    Ok(TargetSelection {
        short_term,
        long_term,
        warnings,
    })
}

#[allow(clippy::too_many_arguments)]
fn select_term(
    term: Term,
    needed: f64,
    categories: &CategorizedLots,
    thresholds: &AdaptiveThresholds,
    options: &EngineOptions,
    force_greedy: bool,
    cancel: &CancelToken,
    warnings: &mut Vec<String>,
) -> Result<SelectionOutcome, EngineError> {
    if needed.abs() < thresholds.min_target {
        tracing::debug!(%term, needed, "need below minimum target; term skipped");
        return Ok(SelectionOutcome::empty());
    }

    let pool: &[Lot] = if needed > 0.0 {
        categories.gains(term)
    } else {
        categories.losses(term)
    };
    if pool.is_empty() {
        warnings.push(format!(
            "{term} target unreachable: no {} lots available",
            if needed > 0.0 { "gain" } else { "loss" }
        ));
        return Ok(SelectionOutcome::empty());
    }

    let overshoot = progressive_overshoot(needed.abs(), options.max_overshoot_percent / 100.0);
    let cap_abs = needed.abs() * (1.0 + overshoot);
    let max_trades = thresholds.max_trades_per_category;
    let greedy_only =
        force_greedy || options.optimization_level == OptimizationLevel::Fast;

    let mut candidates: Vec<(Vec<Lot>, Algorithm)> = Vec::new();

    let greedy = multi_strategy_greedy(pool, needed, cap_abs, max_trades);
    candidates.push((greedy, Algorithm::GreedyMultiStrategy));

    let use_dp = !greedy_only
        && pool.len() <= DP_POOL_LIMIT
        && match options.optimization_level {
            OptimizationLevel::Fast => false,
            OptimizationLevel::Balanced => needed.abs() >= DP_MIN_TARGET,
            OptimizationLevel::Thorough => true,
        };
    if use_dp {
        if let Some(dp) = bounded_dp(pool, needed, cap_abs, cancel)? {
            candidates.push((dp, Algorithm::DynamicProgramming));
        }
    }

    if !greedy_only && pool.len() > POSITION_POOL_MIN && needed.abs() > POSITION_TARGET_MIN {
        let aware = position_aware(pool, needed, cap_abs, max_trades, &options.position_search);
        if !aware.is_empty() {
            candidates.push((aware, Algorithm::PositionAware));
        }
    }

    // Cap check, then the common tie-break: closest, then fewest lots, then
    // highest score.
    let mut best: Option<(Vec<Lot>, Algorithm)> = None;
    for (lots, algorithm) in candidates {
        if lots.is_empty() {
            continue;
        }
        let sum = gain_sum(&lots);
        if !within_cap(sum, needed, cap_abs) {
            continue;
        }
        let replace = match &best {
            None => true,
            Some((current, _)) => selection_beats(&lots, current, needed),
        };
        if replace {
            best = Some((lots, algorithm));
        }
    }

    let Some((mut lots, algorithm)) = best else {
        warnings.push(format!("{term} target unreachable under the overshoot cap"));
        tracing::warn!(%term, needed, "no strategy produced a cap-satisfying selection");
        return Ok(SelectionOutcome::empty());
    };

    // Excess-trade prevention: a category never exceeds its cap; keep the
    // most efficient lots.
    if lots.len() > max_trades {
        lots.sort_by(|a, b| {
            b.efficiency()
                .partial_cmp(&a.efficiency())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        lots.truncate(max_trades);
        warnings.push(format!(
            "{term} selection pruned to the {max_trades}-trade category cap"
        ));
    }

    let achieved = gain_sum(&lots);
    let deviation = (needed - achieved).abs() / needed.abs();
    if deviation > overshoot {
        warnings.push(format!(
            "{term} selection reaches ${achieved:.2} against a ${needed:.2} need ({:.1}% deviation)",
            deviation * 100.0
        ));
    }

    tracing::debug!(%term, achieved, %algorithm, lots = lots.len(), "term selection complete");
    Ok(SelectionOutcome {
        lots,
        achieved,
        algorithm,
    })
}

/// The overshoot ceiling tightens progressively for large needs.
pub fn progressive_overshoot(needed_abs: f64, base: f64) -> f64 {
    if needed_abs >= 100_000.0 {
        base.min(0.005)
    } else if needed_abs >= 50_000.0 {
        base.min(0.01)
    } else {
        base
    }
}

/// Signed cap contract: the realized amount may exceed the need on its own
/// side by at most the overshoot fraction.
pub fn within_cap(sum: f64, needed: f64, cap_abs: f64) -> bool {
    if needed > 0.0 {
        sum <= cap_abs + CAP_EPSILON
    } else {
        sum >= -cap_abs - CAP_EPSILON
    }
}

fn gain_sum(lots: &[Lot]) -> f64 {
    lots.iter().map(|l| l.unrealized_gain).sum()
}

/// Weighted per-lot score. `counts` holds per-symbol lot counts of the
/// selection being evaluated, for the concentration penalty.
fn score_lot(lot: &Lot, needed: f64, counts: &HashMap<&str, usize>) -> f64 {
    let proximity = 1.0 / (1.0 + (needed - lot.unrealized_gain).abs());
    let efficiency = lot.unrealized_gain.abs() / 1_000.0;
    let concentration = if counts.get(lot.symbol.as_str()).copied().unwrap_or(0) > 3 {
        0.5
    } else {
        1.0
    };
    let liquidity = (lot.market_value() / 10_000.0).min(2.0);
    let wash_penalty = if lot.unrealized_gain < 0.0 { 0.8 } else { 1.0 };
    0.4 * proximity + 0.3 * efficiency + 0.1 * concentration + 0.1 * liquidity + 0.1 * wash_penalty
}

fn total_score(lots: &[Lot], needed: f64) -> f64 {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lot in lots {
        *counts.entry(lot.symbol.as_str()).or_insert(0) += 1;
    }
    lots.iter().map(|l| score_lot(l, needed, &counts)).sum()
}

/// True when `a` beats `b` by (closer, fewer lots, higher score).
fn selection_beats(a: &[Lot], b: &[Lot], needed: f64) -> bool {
    let diff_a = (needed - gain_sum(a)).abs();
    let diff_b = (needed - gain_sum(b)).abs();
    if (diff_a - diff_b).abs() > CAP_EPSILON {
        return diff_a < diff_b;
    }
    if a.len() != b.len() {
        return a.len() < b.len();
    }
    total_score(a, needed) > total_score(b, needed)
}

// ---------------------------------------------------------------------------
// Multi-strategy greedy
// ---------------------------------------------------------------------------

fn multi_strategy_greedy(
    pool: &[Lot],
    needed: f64,
    cap_abs: f64,
    max_trades: usize,
) -> Vec<Lot> {
    let results = [
        greedy_proximity_first(pool, needed, cap_abs, max_trades),
        greedy_value_first(pool, needed, cap_abs, max_trades),
        greedy_directional(pool, needed, cap_abs, max_trades),
    ];

    let mut best: Option<Vec<usize>> = None;
    for result in results {
        let replace = match &best {
            None => true,
            Some(current) => {
                let a: Vec<Lot> = result.iter().map(|&i| pool[i].clone()).collect();
                let b: Vec<Lot> = current.iter().map(|&i| pool[i].clone()).collect();
                selection_beats(&a, &b, needed)
            }
        };
        if replace {
            best = Some(result);
        }
    }

    best.unwrap_or_default()
        .into_iter()
        .map(|i| pool[i].clone())
        .collect()
}

/// Iterate by descending proximity; include a lot only when it strictly
/// tightens the remaining need.
fn greedy_proximity_first(
    pool: &[Lot],
    needed: f64,
    cap_abs: f64,
    max_trades: usize,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|&i, &j| {
        let d_i = (needed - pool[i].unrealized_gain).abs();
        let d_j = (needed - pool[j].unrealized_gain).abs();
        d_i.partial_cmp(&d_j).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected = Vec::new();
    let mut accumulated = 0.0;
    for i in order {
        if selected.len() >= max_trades {
            break;
        }
        let candidate = accumulated + pool[i].unrealized_gain;
        if (needed - candidate).abs() >= (needed - accumulated).abs() {
            continue;
        }
        if !within_cap(candidate, needed, cap_abs) {
            if accumulated.abs() >= EARLY_TERMINATION_FRACTION * needed.abs() {
                break;
            }
            continue;
        }
        selected.push(i);
        accumulated = candidate;
        if (needed - accumulated).abs() <= CLOSE_ENOUGH_FRACTION * needed.abs() {
            break;
        }
    }
    selected
}

/// Re-rank the pool against the live remainder at every step.
fn greedy_value_first(pool: &[Lot], needed: f64, cap_abs: f64, max_trades: usize) -> Vec<usize> {
    let mut remaining_idx: Vec<usize> = (0..pool.len()).collect();
    let mut selected = Vec::new();
    let mut accumulated = 0.0;

    while selected.len() < max_trades && !remaining_idx.is_empty() {
        let remainder = needed - accumulated;
        let Some(&pick) = remaining_idx.iter().min_by(|&&i, &&j| {
            let d_i = (remainder - pool[i].unrealized_gain).abs();
            let d_j = (remainder - pool[j].unrealized_gain).abs();
            d_i.partial_cmp(&d_j).unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            break;
        };

        let candidate = accumulated + pool[pick].unrealized_gain;
        if (needed - candidate).abs() >= remainder.abs() {
            // The closest remaining lot no longer improves anything.
            break;
        }
        remaining_idx.retain(|&x| x != pick);
        if !within_cap(candidate, needed, cap_abs) {
            if accumulated.abs() >= EARLY_TERMINATION_FRACTION * needed.abs() {
                break;
            }
            continue;
        }
        selected.push(pick);
        accumulated = candidate;
    }
    selected
}

/// Prefer sign-matching lots by gain magnitude, with a bounded budget of
/// off-direction inclusions.
fn greedy_directional(pool: &[Lot], needed: f64, cap_abs: f64, max_trades: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|&i, &j| {
        let g_i = pool[i].unrealized_gain.abs();
        let g_j = pool[j].unrealized_gain.abs();
        g_j.partial_cmp(&g_i).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut off_direction_budget = max_trades / 2;
    let mut selected = Vec::new();
    let mut accumulated = 0.0;
    for i in order {
        if selected.len() >= max_trades {
            break;
        }
        let remainder = needed - accumulated;
        if remainder == 0.0 {
            break;
        }
        let matches_direction = (pool[i].unrealized_gain > 0.0) == (remainder > 0.0);
        if !matches_direction && off_direction_budget == 0 {
            continue;
        }
        let candidate = accumulated + pool[i].unrealized_gain;
        if (needed - candidate).abs() >= remainder.abs() {
            continue;
        }
        if !within_cap(candidate, needed, cap_abs) {
            if accumulated.abs() >= EARLY_TERMINATION_FRACTION * needed.abs() {
                break;
            }
            continue;
        }
        if !matches_direction {
            off_direction_budget -= 1;
        }
        selected.push(i);
        accumulated = candidate;
    }
    selected
}

// ---------------------------------------------------------------------------
// Bounded dynamic programming
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct DpCell {
    mask: u64,
    exact_cents: i64,
    score: f64,
    count: u32,
}

/// Subset-sum over (weight = |gain| in cents, value = score), dense table
/// indexed by accumulated weight. Columns are quantized just enough to keep
/// the table inside the memo cap; candidate cells always carry their exact
/// cent weights, so the final cap check is precise. Returns None when the
/// table cannot fit, handing the term back to greedy.
fn bounded_dp(
    pool: &[Lot],
    needed: f64,
    cap_abs: f64,
    cancel: &CancelToken,
) -> Result<Option<Vec<Lot>>, EngineError> {
    let n = pool.len();
    if n == 0 || n > 63 {
        return Ok(None);
    }
    let needed_cents = (needed.abs() * 100.0).round() as i64;
    let cap_cents = (cap_abs * 100.0).ceil() as i64;
    if cap_cents <= 0 {
        return Ok(None);
    }

    let max_cols = (DP_MEMO_CAP / n).max(1) as i64;
    let unit = cap_cents / max_cols + 1;
    let cols = (cap_cents / unit + 1) as usize;
    if n.saturating_mul(cols) > DP_MEMO_CAP {
        tracing::warn!(pool = n, cols, "dp table would exceed the memo cap; falling back to greedy");
        return Ok(None);
    }

    let mut dp: Vec<Option<DpCell>> = vec![None; cols];
    dp[0] = Some(DpCell {
        mask: 0,
        exact_cents: 0,
        score: 0.0,
        count: 0,
    });

    let empty_counts = HashMap::new();
    for (i, lot) in pool.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EngineError::cancelled("target_selector.dp"));
        }
        let weight = (lot.unrealized_gain.abs() * 100.0).round() as i64;
        if weight <= 0 {
            continue;
        }
        let value = score_lot(lot, needed, &empty_counts);

        for w in (0..cols).rev() {
            let Some(cell) = dp[w].clone() else { continue };
            let exact = cell.exact_cents + weight;
            if exact > cap_cents {
                continue;
            }
            let candidate = DpCell {
                mask: cell.mask | (1u64 << i),
                exact_cents: exact,
                score: cell.score + value,
                count: cell.count + 1,
            };
            let slot = (exact / unit) as usize;
            let replace = match &dp[slot] {
                None => true,
                Some(existing) => cell_beats(&candidate, existing, needed_cents),
            };
            if replace {
                dp[slot] = Some(candidate);
            }
        }
    }

    let mut best: Option<DpCell> = None;
    for cell in dp.into_iter().flatten() {
        if cell.count == 0 {
            continue;
        }
        let replace = match &best {
            None => true,
            Some(existing) => cell_beats(&cell, existing, needed_cents),
        };
        if replace {
            best = Some(cell);
        }
    }

    Ok(best.map(|cell| {
        (0..n)
            .filter(|i| cell.mask & (1u64 << i) != 0)
            .map(|i| pool[i].clone())
            .collect()
    }))
}

/// DP cell preference: closest to the need, then higher score, then fewer
/// items.
fn cell_beats(a: &DpCell, b: &DpCell, needed_cents: i64) -> bool {
    let diff_a = (needed_cents - a.exact_cents).abs();
    let diff_b = (needed_cents - b.exact_cents).abs();
    if diff_a != diff_b {
        return diff_a < diff_b;
    }
    if (a.score - b.score).abs() > f64::EPSILON {
        return a.score > b.score;
    }
    a.count < b.count
}

// ---------------------------------------------------------------------------
// Position-aware enhancement
// ---------------------------------------------------------------------------

/// Enumerate position alternatives and their cross-symbol pairs and triples.
fn position_aware(
    pool: &[Lot],
    needed: f64,
    cap_abs: f64,
    max_trades: usize,
    limits: &PositionSearchLimits,
) -> Vec<Lot> {
    let groups = positions::group_by_symbol(pool);
    let mut alternatives: Vec<positions::SellAlternative> = groups
        .iter()
        .flat_map(|g| positions::enumerate_alternatives(g, needed))
        .filter(|a| a.lots.len() <= max_trades && within_cap(a.total_gain, needed, cap_abs))
        .collect();
    alternatives.sort_by(|a, b| {
        let d_a = (needed - a.total_gain).abs();
        let d_b = (needed - b.total_gain).abs();
        d_a.partial_cmp(&d_b).unwrap_or(std::cmp::Ordering::Equal)
    });
    alternatives.truncate(limits.max_alternatives);

    let Some(first) = alternatives.first() else {
        return Vec::new();
    };

    // Level 1: the best single-position alternative.
    let mut best_lots = first.lots.clone();
    let mut best_diff = (needed - first.total_gain).abs();

    // Level 2: pairwise combinations across distinct symbols.
    let pair_span = alternatives.len().min(limits.max_pair_candidates);
    for i in 0..pair_span {
        for j in (i + 1)..pair_span {
            if alternatives[i].symbol == alternatives[j].symbol {
                continue;
            }
            let total = alternatives[i].total_gain + alternatives[j].total_gain;
            let count = alternatives[i].lots.len() + alternatives[j].lots.len();
            if count > max_trades || !within_cap(total, needed, cap_abs) {
                continue;
            }
            let diff = (needed - total).abs();
            if diff < best_diff {
                best_diff = diff;
                best_lots = alternatives[i]
                    .lots
                    .iter()
                    .chain(alternatives[j].lots.iter())
                    .cloned()
                    .collect();
            }
        }
    }

    // Level 3: triples, accepted only on a clear improvement.
    let triple_span = alternatives.len().min(limits.max_triple_candidates);
    for i in 0..triple_span {
        for j in (i + 1)..triple_span {
            if alternatives[i].symbol == alternatives[j].symbol {
                continue;
            }
            for k in (j + 1)..triple_span {
                if alternatives[k].symbol == alternatives[i].symbol
                    || alternatives[k].symbol == alternatives[j].symbol
                {
                    continue;
                }
                let total = alternatives[i].total_gain
                    + alternatives[j].total_gain
                    + alternatives[k].total_gain;
                let count = alternatives[i].lots.len()
                    + alternatives[j].lots.len()
                    + alternatives[k].lots.len();
                if count > max_trades || !within_cap(total, needed, cap_abs) {
                    continue;
                }
                let diff = (needed - total).abs();
                if diff < best_diff * (1.0 - TRIPLE_IMPROVEMENT) {
                    best_diff = diff;
                    best_lots = alternatives[i]
                        .lots
                        .iter()
                        .chain(alternatives[j].lots.iter())
                        .chain(alternatives[k].lots.iter())
                        .cloned()
                        .collect();
                }
            }
        }
    }

    best_lots
}
