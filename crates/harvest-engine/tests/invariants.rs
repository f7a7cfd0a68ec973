//! Quantified engine invariants, checked over literal and seeded-random
//! portfolios.

use chrono::NaiveDate;
use harvest_engine::categorizer;
use harvest_engine::{
    AccountType, CorporateAction, CorporateActionKind, EngineOptions, GainTargets, HarvestEngine,
    HarvestRequest, Lot, PurchaseRecord, RealizedGains, Recommendation, Summary, Term,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn valuation() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
}

fn lot(symbol: &str, quantity: f64, price: f64, cost_basis: f64, term: Term) -> Lot {
    Lot {
        symbol: symbol.to_string(),
        name: None,
        quantity,
        price,
        cost_basis,
        unrealized_gain: quantity * price - cost_basis,
        term: Some(term),
        acquired_date: match term {
            Term::Long => NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
            Term::Short => NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        },
        included_in_selling: true,
        account_type: AccountType::Taxable,
        wash_sale_flag: false,
        corporate_actions: Vec::new(),
        corporate_action_flag: false,
        spinoff_basis_allocated: None,
    }
}

/// Seeded portfolio of lots with varied terms, sizes and gain signs.
fn random_portfolio(seed: u64, n: usize) -> Vec<Lot> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let quantity = rng.gen_range(5.0..100.0_f64).round();
            let price = rng.gen_range(10.0..300.0_f64).round();
            let value = quantity * price;
            // Basis within +-25% of value, giving both gains and losses.
            let basis = value * rng.gen_range(0.75..1.25);
            let term = if rng.gen_bool(0.5) { Term::Short } else { Term::Long };
            lot(&format!("SYM{i}"), quantity, price, basis, term)
        })
        .collect()
}

fn run_targets(portfolio: Vec<Lot>, short: f64, long: f64) -> harvest_engine::ResultRecord {
    let options = EngineOptions {
        random_seed: Some(5),
        ..EngineOptions::default()
    };
    HarvestEngine::new(options).run(HarvestRequest {
        portfolio,
        targets: GainTargets {
            short_term: short,
            long_term: long,
        },
        realized: RealizedGains::default(),
        valuation_date: Some(valuation()),
        cancel: None,
    })
}

/// Match every recommendation back to a distinct portfolio lot; panics when a
/// recommendation reuses a lot or matches nothing.
fn match_recommendations<'a>(
    recommendations: &[Recommendation],
    portfolio: &'a [Lot],
) -> Vec<&'a Lot> {
    let mut used = vec![false; portfolio.len()];
    recommendations
        .iter()
        .map(|rec| {
            let (i, matched) = portfolio
                .iter()
                .enumerate()
                .find(|(i, l)| {
                    !used[*i]
                        && l.symbol == rec.symbol
                        && (l.quantity - rec.quantity_to_sell).abs() < 1e-9
                        && (l.unrealized_gain - rec.actual_gain).abs() < 1e-6
                })
                .unwrap_or_else(|| panic!("recommendation {} matches no unused lot", rec.symbol));
            used[i] = true;
            matched
        })
        .collect()
}

fn summary(record: &harvest_engine::ResultRecord) -> &harvest_engine::TargetSummary {
    match record.summary.as_ref() {
        Some(Summary::Target(s)) => s,
        other => panic!("expected target summary, got {other:?}"),
    }
}

#[test]
fn sign_fidelity_and_overshoot_over_seeded_portfolios() {
    for seed in [1_u64, 2, 3, 4, 5, 6, 7, 8] {
        let portfolio = random_portfolio(seed, 30);
        let needed_short = 2_000.0;
        let needed_long = 5_000.0;
        let record = run_targets(portfolio, needed_short, needed_long);
        assert!(record.success, "seed {seed}");
        let s = summary(&record);

        // Invariant 1: realized amounts never oppose their needs.
        if s.actual_short_term != 0.0 {
            assert!(s.actual_short_term > 0.0, "seed {seed}: ST sign flipped");
        }
        if s.actual_long_term != 0.0 {
            assert!(s.actual_long_term > 0.0, "seed {seed}: LT sign flipped");
        }

        // Invariant 2: overshoot stays inside the 5% cap.
        assert!(
            s.actual_short_term <= needed_short * 1.05 + 1e-6,
            "seed {seed}: ST overshoot {}",
            s.actual_short_term
        );
        assert!(
            s.actual_long_term <= needed_long * 1.05 + 1e-6,
            "seed {seed}: LT overshoot {}",
            s.actual_long_term
        );
    }
}

#[test]
fn loss_targets_never_select_gains() {
    for seed in [11_u64, 12, 13, 14] {
        let portfolio = random_portfolio(seed, 30);
        let record = run_targets(portfolio, -2_000.0, -5_000.0);
        let s = summary(&record);
        assert!(s.actual_short_term <= 0.0, "seed {seed}");
        assert!(s.actual_long_term <= 0.0, "seed {seed}");
        assert!(s.actual_short_term >= -2_000.0 * 1.05 - 1e-6, "seed {seed}");
        assert!(s.actual_long_term >= -5_000.0 * 1.05 - 1e-6, "seed {seed}");
        for rec in &record.recommendations {
            assert!(rec.actual_gain < 0.0, "seed {seed}: gain lot in loss selection");
        }
    }
}

#[test]
fn no_double_counting_and_term_classification() {
    for seed in [21_u64, 22, 23, 24] {
        let portfolio = random_portfolio(seed, 25);
        let record = run_targets(portfolio.clone(), 2_000.0, 5_000.0);

        // Invariant 4: every recommendation consumes a distinct lot.
        let matched = match_recommendations(&record.recommendations, &portfolio);

        // Invariant 5: terms agree with the underlying lots and the summary
        // reproduces the per-term sums.
        let mut st_sum = 0.0;
        let mut lt_sum = 0.0;
        for (rec, lot) in record.recommendations.iter().zip(&matched) {
            assert_eq!(Some(rec.term), lot.term, "seed {seed}");
            match rec.term {
                Term::Short => st_sum += rec.actual_gain,
                Term::Long => lt_sum += rec.actual_gain,
            }
        }
        let s = summary(&record);
        assert!((s.actual_short_term - st_sum).abs() < 1e-6, "seed {seed}");
        assert!((s.actual_long_term - lt_sum).abs() < 1e-6, "seed {seed}");

        // Invariant 9: proceeds add up.
        let proceeds: f64 = record.recommendations.iter().map(|r| r.proceeds).sum();
        assert!((s.total_proceeds - proceeds).abs() < 1e-6, "seed {seed}");
    }
}

#[test]
fn per_category_trade_counts_stay_capped() {
    for seed in [31_u64, 32, 33] {
        let portfolio = random_portfolio(seed, 40);
        let record = run_targets(portfolio.clone(), 2_000.0, 5_000.0);

        // Recompute the thresholds the engine derives for this portfolio.
        let context =
            categorizer::portfolio_context(&portfolio, &EngineOptions::default().size_class_thresholds);
        let thresholds =
            categorizer::adaptive_thresholds(&context, portfolio.len(), &EngineOptions::default());

        let mut counts = std::collections::HashMap::new();
        for rec in &record.recommendations {
            *counts
                .entry((rec.term, rec.actual_gain > 0.0))
                .or_insert(0_usize) += 1;
        }
        for ((term, positive), count) in counts {
            assert!(
                count <= thresholds.max_trades_per_category,
                "seed {seed}: {term} {} category holds {count} trades",
                if positive { "gain" } else { "loss" }
            );
        }
    }
}

#[test]
fn account_isolation() {
    // Invariant 8: only taxable lots are ever recommended.
    let mut portfolio = vec![
        lot("TAXABLE", 100.0, 50.0, 4_000.0, Term::Long), // +1,000
        lot("SHADOW", 100.0, 50.0, 4_000.0, Term::Long),  // +1,000, in an IRA
    ];
    portfolio[1].account_type = AccountType::TraditionalIra;

    let record = run_targets(portfolio.clone(), 0.0, 1_000.0);
    assert!(record.success);
    assert_eq!(record.recommendations.len(), 1);
    assert_eq!(record.recommendations[0].symbol, "TAXABLE");
}

#[test]
fn independence_of_other_term_pool() {
    // Invariant 3: permuting the long-term pool leaves the short-term
    // selection untouched.
    let st = vec![
        lot("S1", 10.0, 100.0, 880.0, Term::Short),  // +120
        lot("S2", 10.0, 100.0, 910.0, Term::Short),  // +90
    ];
    let lt = vec![
        lot("L1", 10.0, 100.0, 600.0, Term::Long),   // +400
        lot("L2", 10.0, 100.0, 300.0, Term::Long),   // +700
        lot("L3", 10.0, 100.0, 850.0, Term::Long),   // +150
    ];

    let mut forward = st.clone();
    forward.extend(lt.iter().cloned());
    let mut reversed = st.clone();
    reversed.extend(lt.iter().rev().cloned());

    let options = EngineOptions {
        min_target_threshold: Some(50.0),
        random_seed: Some(5),
        ..EngineOptions::default()
    };
    let run = |portfolio: Vec<Lot>| {
        HarvestEngine::new(options.clone()).run(HarvestRequest {
            portfolio,
            targets: GainTargets {
                short_term: 200.0,
                long_term: 550.0,
            },
            realized: RealizedGains::default(),
            valuation_date: Some(valuation()),
            cancel: None,
        })
    };

    let first = run(forward);
    let second = run(reversed);

    let st_symbols = |record: &harvest_engine::ResultRecord| {
        let mut symbols: Vec<String> = record
            .recommendations
            .iter()
            .filter(|r| r.term == Term::Short)
            .map(|r| r.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    };
    assert_eq!(st_symbols(&first), st_symbols(&second));
    assert!(
        (summary(&first).actual_short_term - summary(&second).actual_short_term).abs() < 1e-9
    );
}

#[test]
fn wash_sale_exclusion_holds_in_recommendations() {
    // Invariant 6: a loss lot with a same-symbol purchase inside the window
    // never appears, and neither does a pre-flagged one.
    let mut portfolio = vec![
        lot("VTIAX", 500.0, 28.5, 14_750.0, Term::Long), // -500
        lot("FLAGGED", 100.0, 40.0, 4_500.0, Term::Long), // -500
        lot("CLEAN", 100.0, 40.0, 4_450.0, Term::Long),  // -450
    ];
    portfolio[1].wash_sale_flag = true;

    let options = EngineOptions {
        purchase_history: vec![PurchaseRecord {
            symbol: "VTIAX".to_string(),
            date: valuation() - chrono::Duration::days(7),
            quantity: 10.0,
        }],
        min_target_threshold: Some(50.0),
        min_trade_amount: Some(10.0),
        ..EngineOptions::default()
    };
    let record = HarvestEngine::new(options).run(HarvestRequest {
        portfolio,
        targets: GainTargets {
            short_term: 0.0,
            long_term: -450.0,
        },
        realized: RealizedGains::default(),
        valuation_date: Some(valuation()),
        cancel: None,
    });

    assert!(record.success);
    assert_eq!(record.recommendations.len(), 1);
    assert_eq!(record.recommendations[0].symbol, "CLEAN");
    assert!(record.warnings.iter().any(|w| w.contains("VTIAX")));
    assert!(record.warnings.iter().any(|w| w.contains("FLAGGED")));
}

#[test]
fn idempotence_of_reruns() {
    // Invariant 10: re-running on the residual portfolio with updated
    // realized totals shrinks (or empties) the selection.
    let portfolio = vec![
        lot("A", 10.0, 100.0, 600.0, Term::Long),  // +400
        lot("B", 10.0, 100.0, 650.0, Term::Long),  // +350
        lot("C", 10.0, 100.0, 700.0, Term::Long),  // +300
        lot("D", 10.0, 100.0, 750.0, Term::Long),  // +250
        lot("E", 10.0, 100.0, 800.0, Term::Long),  // +200
    ];
    let options = EngineOptions {
        min_target_threshold: Some(50.0),
        min_trade_amount: Some(10.0),
        random_seed: Some(5),
        ..EngineOptions::default()
    };

    let first = HarvestEngine::new(options.clone()).run(HarvestRequest {
        portfolio: portfolio.clone(),
        targets: GainTargets {
            short_term: 0.0,
            long_term: 1_000.0,
        },
        realized: RealizedGains::default(),
        valuation_date: Some(valuation()),
        cancel: None,
    });
    let first_actual = summary(&first).actual_long_term;
    assert!(first_actual > 0.0);

    let sold: Vec<String> = first
        .recommendations
        .iter()
        .map(|r| r.symbol.clone())
        .collect();
    let residual: Vec<Lot> = portfolio
        .into_iter()
        .filter(|l| !sold.contains(&l.symbol))
        .collect();

    let second = HarvestEngine::new(options).run(HarvestRequest {
        portfolio: residual,
        targets: GainTargets {
            short_term: 0.0,
            long_term: 1_000.0,
        },
        realized: RealizedGains {
            short_term: 0.0,
            long_term: first_actual,
        },
        valuation_date: Some(valuation()),
        cancel: None,
    });

    let second_actual = summary(&second).actual_long_term;
    assert!(
        second.recommendations.is_empty() || second_actual.abs() < first_actual.abs(),
        "rerun realized {second_actual} after {first_actual}"
    );
}

#[test]
fn corporate_action_consistency() {
    // Invariant 11: a 2:1 split re-expression changes nothing economic, so
    // the gain and the selection decision survive it.
    let plain = lot("VTI", 100.0, 220.0, 21_000.0, Term::Long); // +1,000

    let mut with_split = plain.clone();
    with_split.corporate_actions.push(CorporateAction {
        kind: CorporateActionKind::Split,
        effective_date: NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(),
        ratio: Some(2.0),
        detail: None,
        symbol: None,
    });

    let options = EngineOptions {
        enable_corporate_actions: true,
        min_target_threshold: Some(50.0),
        random_seed: Some(5),
        ..EngineOptions::default()
    };
    let run = |l: Lot| {
        HarvestEngine::new(options.clone()).run(HarvestRequest {
            portfolio: vec![l],
            targets: GainTargets {
                short_term: 0.0,
                long_term: 1_000.0,
            },
            realized: RealizedGains::default(),
            valuation_date: Some(valuation()),
            cancel: None,
        })
    };

    let base = run(plain);
    let split = run(with_split);

    assert_eq!(base.recommendations.len(), 1);
    assert_eq!(split.recommendations.len(), 1);
    assert!(
        (base.recommendations[0].actual_gain - split.recommendations[0].actual_gain).abs() <= 0.01
    );
    // The split lot sells its post-split quantity.
    assert!((split.recommendations[0].quantity_to_sell - 200.0).abs() < 1e-9);
    assert!((split.recommendations[0].proceeds - base.recommendations[0].proceeds).abs() < 0.01);
}

#[test]
fn cash_mode_cap_obedience() {
    // Invariant 12: the signed cap contract holds in cash mode.
    let portfolio = vec![
        lot("L1", 100.0, 40.0, 4_600.0, Term::Long),  // -600, $4,000
        lot("G1", 100.0, 30.0, 2_700.0, Term::Long),  // +300, $3,000
        lot("G2", 100.0, 35.0, 3_100.0, Term::Short), // +400, $3,500
        lot("G3", 100.0, 45.0, 4_300.0, Term::Long),  // +200, $4,500
    ];
    let options = EngineOptions {
        use_cash_raising: true,
        cash_needed: 11_000.0,
        current_cash: 0.0,
        min_trade_amount: Some(10.0),
        ..EngineOptions::default()
    };
    let record = HarvestEngine::new(options).run(HarvestRequest {
        portfolio,
        targets: GainTargets {
            short_term: 0.0,
            long_term: 600.0,
        },
        realized: RealizedGains::default(),
        valuation_date: Some(valuation()),
        cancel: None,
    });

    let Some(Summary::Cash(summary)) = record.summary else {
        panic!("expected cash summary");
    };
    assert!(summary.short_term_gain <= 0.0 + 1e-9);
    assert!(summary.long_term_gain <= 600.0 + 1e-9);
    assert!(record.recommendations.iter().all(|r| r.symbol != "G2"));
}
