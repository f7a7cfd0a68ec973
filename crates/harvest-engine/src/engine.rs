//! Calculation orchestrator.
//!
//! Drives validation, normalization, filtering, categorization, selection and
//! verification, and assembles the result record. One call is a pure
//! function of its inputs; nothing outlives it.

use std::time::Instant;

use chrono::{NaiveDate, Utc};
use harvest_core::{
    Algorithm, CalculationInputs, CalculationRecord, CancelToken, CashSummary, EngineError,
    EngineOptions, FilterBreakdown, FilteredCounts, GainTargets, Lot, Metadata, NeededGains,
    PortfolioContext, RealizedGains, Recommendation, ResultRecord, Summary, TargetSummary, Term,
};

use crate::cash_selector;
use crate::categorizer;
use crate::corporate_actions;
use crate::economics;
use crate::similarity::SimilarityOracle;
use crate::target_selector;
use crate::validator;
use crate::verifier;
use crate::wash_sale;

/// Version stamped into metadata and calculation records.
pub const ALGORITHM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Portfolio size above which the greedy path is forced.
const PERFORMANCE_MODE_THRESHOLD: usize = 1_000;

/// One calculation's inputs.
#[derive(Debug, Clone, Default)]
pub struct HarvestRequest {
    pub portfolio: Vec<Lot>,
    pub targets: GainTargets,
    pub realized: RealizedGains,
    /// Defaults to today when absent.
    pub valuation_date: Option<NaiveDate>,
    pub cancel: Option<CancelToken>,
}

/// The harvesting engine: options plus the similarity oracle, shared across
/// calls. All state lives in the request and the result.
pub struct HarvestEngine {
    options: EngineOptions,
    similarity: SimilarityOracle,
}

impl HarvestEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            similarity: SimilarityOracle::default(),
        }
    }

    /// Replace the built-in similarity table with an injected one.
    pub fn with_similarity(mut self, oracle: SimilarityOracle) -> Self {
        self.similarity = oracle;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Check a caller-supplied sell plan against the configured purchase
    /// history; the only operation that surfaces `WashSaleViolation`.
    pub fn validate_sell_plan(
        &self,
        plan: &[Recommendation],
        valuation_date: NaiveDate,
    ) -> Result<(), EngineError> {
        wash_sale::validate_plan(
            plan,
            &self.options.purchase_history,
            valuation_date,
            &self.options.wash_sale_config,
            &self.similarity,
        )
    }

    /// Run one calculation.
    pub fn run(&self, request: HarvestRequest) -> ResultRecord {
        let started = Instant::now();
        let timestamp = Utc::now();
        let valuation_date = request.valuation_date.unwrap_or_else(|| timestamp.date_naive());
        let cancel = request.cancel.clone().unwrap_or_default();

        tracing::debug!(
            lots = request.portfolio.len(),
            cash_mode = self.options.use_cash_raising,
            "calculation started"
        );

        let needed = NeededGains {
            short_term: request.targets.short_term - request.realized.short_term,
            long_term: request.targets.long_term - request.realized.long_term,
        };
        let calculation = CalculationRecord {
            inputs: CalculationInputs {
                portfolio_size: request.portfolio.len(),
                targets: request.targets,
                realized: request.realized,
                cash_mode: self.options.use_cash_raising,
            },
            needed,
            timestamp,
            version: ALGORITHM_VERSION.to_string(),
        };

        match self.execute(&request, valuation_date, needed, &cancel, started, calculation.clone()) {
            Ok(record) => record,
            Err(err) => self.failure_record(&err, started, calculation),
        }
    }

    fn execute(
        &self,
        request: &HarvestRequest,
        valuation_date: NaiveDate,
        needed: NeededGains,
        cancel: &CancelToken,
        started: Instant,
        calculation: CalculationRecord,
    ) -> Result<ResultRecord, EngineError> {
        self.options.validate()?;

        let validated = validator::validate_portfolio(&request.portfolio, &self.options, valuation_date)?;
        let mut warnings = validated.warnings;
        check_cancel(cancel, "validation")?;

        // Account-type and inclusion filter.
        let mut counts = FilteredCounts::default();
        let mut lots: Vec<Lot> = Vec::with_capacity(validated.lots.len());
        for lot in validated.lots {
            if !self.options.account_types.contains(&lot.account_type) {
                counts.excluded_account_type += 1;
            } else if !lot.included_in_selling {
                counts.excluded_not_included += 1;
            } else {
                lots.push(lot);
            }
        }

        if self.options.enable_corporate_actions {
            let (normalized, action_warnings) = corporate_actions::normalize_lots(
                lots,
                &self.options.corporate_actions_data,
                valuation_date,
            );
            lots = normalized;
            warnings.extend(action_warnings);
            check_cancel(cancel, "corporate_actions")?;
        }

        let before_wash_sale = lots.len();
        let filtered = wash_sale::filter_lots(
            lots,
            &self.options.purchase_history,
            valuation_date,
            &self.options.wash_sale_config,
            &self.similarity,
        );
        warnings.extend(filtered.warnings);
        let eligible = filtered.eligible;
        counts.excluded_wash_sale = before_wash_sale - eligible.len();
        counts.remaining = eligible.len();
        check_cancel(cancel, "wash_sale")?;

        if eligible.is_empty() {
            let breakdown = FilterBreakdown {
                original_size: request.portfolio.len(),
                account_types: self.options.account_types.iter().map(|a| a.to_string()).collect(),
                filtered_counts: counts,
            };
            return Ok(self.no_lots_record(breakdown, needed, started, calculation, warnings));
        }

        let context = categorizer::portfolio_context(&eligible, &self.options.size_class_thresholds);
        let thresholds = categorizer::adaptive_thresholds(&context, eligible.len(), &self.options);
        let categories = categorizer::categorize(&eligible, valuation_date, thresholds.min_trade_amount);
        check_cancel(cancel, "categorization")?;

        if self.options.use_cash_raising {
            return Ok(self.run_cash_mode(
                &eligible,
                valuation_date,
                needed,
                thresholds.min_trade_amount,
                context,
                started,
                calculation,
                warnings,
            ));
        }

        let performance_mode = self.options.performance_mode
            || request.portfolio.len() > PERFORMANCE_MODE_THRESHOLD;
        let selection = target_selector::select_for_targets(
            &categories,
            needed.short_term,
            needed.long_term,
            &thresholds,
            &self.options,
            performance_mode,
            cancel,
        )?;
        warnings.extend(selection.warnings.clone());

        // Assemble in deterministic order: short-term first, then long-term.
        let mut picks: Vec<(Lot, Term, f64)> = Vec::new();
        for lot in &selection.short_term.lots {
            picks.push((lot.clone(), Term::Short, needed.short_term));
        }
        for lot in &selection.long_term.lots {
            picks.push((lot.clone(), Term::Long, needed.long_term));
        }

        // Overall recommendation cap, keeping the most efficient lots.
        if picks.len() > self.options.max_lots {
            let mut ranked: Vec<usize> = (0..picks.len()).collect();
            ranked.sort_by(|&i, &j| {
                picks[j]
                    .0
                    .efficiency()
                    .partial_cmp(&picks[i].0.efficiency())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let keep: std::collections::HashSet<usize> =
                ranked.into_iter().take(self.options.max_lots).collect();
            picks = picks
                .into_iter()
                .enumerate()
                .filter(|(i, _)| keep.contains(i))
                .map(|(_, p)| p)
                .collect();
            warnings.push(format!(
                "selection truncated to the overall {}-lot cap",
                self.options.max_lots
            ));
        }

        let recommendations: Vec<Recommendation> = picks
            .iter()
            .map(|(lot, term, term_needed)| {
                economics::recommendation_for_lot(
                    lot,
                    *term,
                    economics::target_reason(lot, *term, *term_needed),
                    &self.options.tax_config,
                    &self.options.transaction_costs,
                )
            })
            .collect();

        let actual_short: f64 = recommendations
            .iter()
            .filter(|r| r.term == Term::Short)
            .map(|r| r.actual_gain)
            .sum();
        let actual_long: f64 = recommendations
            .iter()
            .filter(|r| r.term == Term::Long)
            .map(|r| r.actual_gain)
            .sum();

        let summary = TargetSummary {
            target_short_term: request.targets.short_term,
            target_long_term: request.targets.long_term,
            actual_short_term: actual_short,
            actual_long_term: actual_long,
            total_recommendations: recommendations.len(),
            total_proceeds: recommendations.iter().map(|r| r.proceeds).sum(),
            total_tax_impact: recommendations.iter().map(|r| r.tax_impact).sum(),
            total_transaction_costs: recommendations.iter().map(|r| r.transaction_cost).sum(),
            net_benefit: recommendations.iter().map(|r| r.net_benefit).sum(),
            ytd_realized_short_term: request.realized.short_term,
            ytd_realized_long_term: request.realized.long_term,
            total_annual_short_term: request.realized.short_term + actual_short,
            total_annual_long_term: request.realized.long_term + actual_long,
            cash_maximization_mode: false,
        };

        let eligible_pool: Vec<Lot> = categories.all().cloned().collect();
        let verification = verifier::verify_selection(
            &recommendations,
            &eligible_pool,
            valuation_date,
            needed.short_term,
            needed.long_term,
            self.options.verification_samples,
            self.options.random_seed,
        );
        check_cancel(cancel, "verification")?;

        let algorithm = describe_algorithms(
            selection.short_term.algorithm,
            selection.long_term.algorithm,
        );
        tracing::info!(
            recommendations = recommendations.len(),
            actual_short,
            actual_long,
            %algorithm,
            "target-mode calculation complete"
        );

        Ok(ResultRecord {
            success: true,
            recommendations,
            summary: Some(Summary::Target(summary)),
            warnings,
            verification: Some(verification),
            metadata: self.metadata(started, algorithm, Some(context)),
            calculation: Some(calculation),
            error: None,
            cancelled: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_cash_mode(
        &self,
        eligible: &[Lot],
        valuation_date: NaiveDate,
        needed: NeededGains,
        min_trade_amount: f64,
        context: PortfolioContext,
        started: Instant,
        calculation: CalculationRecord,
        mut warnings: Vec<String>,
    ) -> ResultRecord {
        let pool: Vec<Lot> = eligible
            .iter()
            .filter(|l| l.market_value() >= min_trade_amount)
            .cloned()
            .collect();

        // The remaining per-term needs act as signed ceilings on what cash
        // raising may realize.
        let selection = cash_selector::select_for_cash(
            &pool,
            valuation_date,
            self.options.cash_needed,
            self.options.current_cash,
            needed.short_term,
            needed.long_term,
            self.options.max_lots,
        );
        warnings.extend(selection.warnings.clone());

        let recommendations: Vec<Recommendation> = selection
            .picks
            .iter()
            .map(|pick| {
                economics::recommendation_for_lot(
                    &pick.lot,
                    pick.term,
                    economics::cash_reason(&pick.lot, pick.term),
                    &self.options.tax_config,
                    &self.options.transaction_costs,
                )
            })
            .collect();

        tracing::info!(
            recommendations = recommendations.len(),
            raised = selection.summary.actual_raised,
            "cash-mode calculation complete"
        );

        ResultRecord {
            success: true,
            recommendations,
            summary: Some(Summary::Cash(selection.summary)),
            warnings,
            verification: None,
            metadata: self.metadata(started, Algorithm::CashRaising.to_string(), Some(context)),
            calculation: Some(calculation),
            error: None,
            cancelled: false,
        }
    }

    /// Nothing selectable after filtering is a success with an empty
    /// selection; the structured cause rides along as a report.
    fn no_lots_record(
        &self,
        breakdown: FilterBreakdown,
        needed: NeededGains,
        started: Instant,
        calculation: CalculationRecord,
        mut warnings: Vec<String>,
    ) -> ResultRecord {
        let counts = &breakdown.filtered_counts;
        warnings.push(format!(
            "no lots available for selection: {} submitted, {} outside eligible accounts, {} excluded from selling, {} wash-sale excluded",
            breakdown.original_size,
            counts.excluded_account_type,
            counts.excluded_not_included,
            counts.excluded_wash_sale,
        ));
        tracing::info!(original = breakdown.original_size, "nothing selectable after filtering");
        let cause = EngineError::NoLotsFound { breakdown };

        let summary = if self.options.use_cash_raising {
            Summary::Cash(CashSummary {
                cash_needed: self.options.cash_needed,
                current_cash: self.options.current_cash,
                additional_needed: (self.options.cash_needed - self.options.current_cash).max(0.0),
                ..CashSummary::default()
            })
        } else {
            Summary::Target(TargetSummary {
                target_short_term: needed.short_term + calculation.inputs.realized.short_term,
                target_long_term: needed.long_term + calculation.inputs.realized.long_term,
                ytd_realized_short_term: calculation.inputs.realized.short_term,
                ytd_realized_long_term: calculation.inputs.realized.long_term,
                total_annual_short_term: calculation.inputs.realized.short_term,
                total_annual_long_term: calculation.inputs.realized.long_term,
                ..TargetSummary::default()
            })
        };

        ResultRecord {
            success: true,
            recommendations: Vec::new(),
            summary: Some(summary),
            warnings,
            verification: None,
            metadata: self.metadata(started, Algorithm::None.to_string(), None),
            calculation: Some(calculation),
            error: Some(cause.to_report()),
            cancelled: false,
        }
    }

    fn failure_record(
        &self,
        err: &EngineError,
        started: Instant,
        calculation: CalculationRecord,
    ) -> ResultRecord {
        let cancelled = matches!(err, EngineError::Cancelled { .. });
        tracing::warn!(kind = err.kind(), %err, "calculation failed");
        ResultRecord {
            success: false,
            recommendations: Vec::new(),
            summary: None,
            warnings: Vec::new(),
            verification: None,
            metadata: self.metadata(started, Algorithm::None.to_string(), None),
            calculation: Some(calculation),
            error: Some(err.to_report()),
            cancelled,
        }
    }

    fn metadata(
        &self,
        started: Instant,
        algorithm: String,
        context: Option<PortfolioContext>,
    ) -> Metadata {
        Metadata {
            version: ALGORITHM_VERSION.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            algorithm_used: algorithm,
            tax_config: self.options.tax_config,
            wash_sale_config: self.options.wash_sale_config,
            portfolio_context: context,
        }
    }
}

fn check_cancel(cancel: &CancelToken, stage: &str) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        Err(EngineError::cancelled(stage))
    } else {
        Ok(())
    }
}

/// Collapse the per-term algorithms into the metadata string.
fn describe_algorithms(short: Algorithm, long: Algorithm) -> String {
    match (short, long) {
        (Algorithm::None, Algorithm::None) => Algorithm::None.to_string(),
        (Algorithm::None, only) | (only, Algorithm::None) => only.to_string(),
        (a, b) if a == b => a.to_string(),
        (a, b) => format!("short_term={a},long_term={b}"),
    }
}
