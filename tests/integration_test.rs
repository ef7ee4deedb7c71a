//! Engine integration tests.
//!
//! Tests cover:
//! - Validation and repair: alias normalization, idempotent revalidation,
//!   formation downgrade, gap-with-session rejection
//! - Time resolution: half-open ranges, trading-day arithmetic around
//!   weekends and holidays
//! - Each operation end to end through the executor with a mock store
//! - Chained steps, no-data propagation, store errors, cancellation

mod common;

use common::*;
use barquery::domain::calendar::TradingCalendar;
use barquery::domain::catalog::{Catalog, FilterKind, Role};
use barquery::domain::error::EngineError;
use barquery::domain::executor::{self, CancelToken, StepOutcome, StepReport};
use barquery::domain::ops::OperationResult;
use barquery::domain::plan::{plan, PlanMode};
use barquery::domain::query::{Cmp, Color, FilterExpr, OperationKind, Step, TimeExpr};
use barquery::domain::resolve::resolve_time;
use barquery::domain::timeframe::Timeframe;
use barquery::domain::validate::validate;

fn run(env: &TestEnv, steps: &[Step]) -> Vec<StepReport> {
    executor::run_steps(steps, &env.ctx()).unwrap()
}

fn data(report: &StepReport) -> &OperationResult {
    match report.outcome.as_ref().unwrap() {
        StepOutcome::Data(result) => result,
        other => panic!("expected data, got {:?}", other),
    }
}

fn change_cmp(cmp: Cmp, value: f64) -> FilterExpr {
    FilterExpr::Comparison {
        metric: "change".to_string(),
        cmp,
        value,
    }
}

mod validation_and_repair {
    use super::*;

    #[test]
    fn aliases_normalize_once() {
        let mut step = year_step("s1", OperationKind::List, "return", None);
        step.atoms[0].filter = Some(FilterExpr::Categorical {
            name: "Mon".to_string(),
        });

        let catalog = Catalog::new();
        let v = validate(step, &catalog).unwrap();
        assert_eq!(v.step.atoms[0].what, "change");
        assert!(matches!(
            v.step.atoms[0].filter,
            Some(FilterExpr::Categorical { ref name }) if name == "monday"
        ));
        assert!(v
            .corrections
            .iter()
            .any(|c| c.rule == "normalize_metrics" && c.field == "atoms[0].what"));
        assert!(v
            .corrections
            .iter()
            .any(|c| c.rule == "normalize_filter_names" && c.field == "atoms[0].filter"));

        // the repaired step is a fixed point of the chain
        let again = validate(v.step, &catalog).unwrap();
        assert!(again.corrections.is_empty());
    }

    #[test]
    fn formation_downgrades_to_distribution_end_to_end() {
        let store =
            MockBarStore::new().with_bars("ES", Timeframe::Day1, year_2024_with_100_reds("ES"));
        let env = TestEnv::new(store);

        let mut step = year_step("s1", OperationKind::Formation, "change", None);
        step.atoms[0].filter = Some(FilterExpr::Consecutive {
            color: Color::Red,
            cmp: Cmp::Ge,
            length: 2,
        });

        let reports = run(&env, &[step]);
        assert!(reports[0]
            .corrections
            .iter()
            .any(|c| c.field == "operation" && c.old == "formation" && c.new == "distribution"));
        let result = data(&reports[0]);
        // the reds come in pairs; only the second of each pair completes a run
        assert_eq!(result.summary["count"], 50);
        assert_eq!(result.summary["bins"], 10);
    }

    #[test]
    fn gap_metric_with_session_filter_is_rejected() {
        let store =
            MockBarStore::new().with_bars("ES", Timeframe::Day1, year_2024_with_100_reds("ES"));
        let env = TestEnv::new(store);

        let mut step = year_step("s1", OperationKind::Count, "gap", None);
        step.atoms[0].filter = Some(FilterExpr::Categorical {
            name: "rth".to_string(),
        });

        let reports = run(&env, &[step]);
        match &reports[0].outcome {
            Err(EngineError::Validation { violations, .. }) => {
                assert!(violations.iter().any(|v| v.rule == "reject_gap_with_session"));
            }
            other => panic!("expected a validation failure, got {:?}", other),
        }
    }

    #[test]
    fn consecutive_is_a_condition_for_streaks() {
        let catalog = Catalog::new();
        assert_eq!(
            catalog.role(OperationKind::Streak, FilterKind::Consecutive),
            Role::Condition
        );
        // the same filter kind selects rows everywhere else
        assert_eq!(
            catalog.role(OperationKind::Count, FilterKind::Consecutive),
            Role::Where
        );
        assert_eq!(
            catalog.role(OperationKind::Streak, FilterKind::Event),
            Role::Invalid
        );
    }
}

mod time_resolution {
    use super::*;

    #[test]
    fn year_range_is_half_open() {
        let range = resolve_time(
            &TimeExpr::Year { year: 2024 },
            &TradingCalendar::new(),
            date(2025, 6, 2),
        )
        .unwrap();
        assert_eq!(range.start, date(2024, 1, 1));
        assert_eq!(range.end, date(2025, 1, 1));
        assert!(range.contains(date(2024, 12, 31)));
        assert!(!range.contains(date(2025, 1, 1)));
    }

    #[test]
    fn last_five_trading_days_skip_the_holiday() {
        // As-of Mon 2024-07-08: July 4 and the weekend do not count.
        let calendar = TradingCalendar::new();
        let range = resolve_time(&TimeExpr::LastDays { days: 5 }, &calendar, date(2024, 7, 8))
            .unwrap();
        assert_eq!(range.start, date(2024, 7, 1));
        assert_eq!(range.end, date(2024, 7, 9));

        let mut trading = Vec::new();
        let mut day = range.start;
        while day < range.end {
            if calendar.is_trading_day(day) {
                trading.push(day);
            }
            day = day.succ_opt().unwrap();
        }
        assert_eq!(trading.len(), 5);
        assert!(!trading.contains(&date(2024, 7, 4)));
    }
}

mod single_operations {
    use super::*;

    #[test]
    fn count_red_days_over_a_full_year() {
        let store =
            MockBarStore::new().with_bars("ES", Timeframe::Day1, year_2024_with_100_reds("ES"));
        let env = TestEnv::new(store);

        let step = year_step(
            "reds",
            OperationKind::Count,
            "change",
            Some(change_cmp(Cmp::Lt, 0.0)),
        );
        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.summary["count"], 100);
        assert_eq!(result.summary["total"], 252);
        assert_eq!(result.summary["share"], 0.3968);
    }

    #[test]
    fn list_returns_the_top_n_sorted() {
        let closes = [103.0, 101.0, 104.0, 100.0, 106.0, 105.0, 109.0, 108.0, 110.0, 111.0];
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let step = year_step("top", OperationKind::List, "change", None);
        let reports = run(&env, &[step]);
        // defaults were filled in, and recorded
        assert!(reports[0].corrections.iter().any(|c| c.field == "params.n"));
        assert!(reports[0].corrections.iter().any(|c| c.field == "params.sort"));

        let result = data(&reports[0]);
        assert_eq!(result.rows.len(), 5);
        assert_eq!(result.row_count, 10);
        let changes: Vec<f64> = result
            .rows
            .iter()
            .map(|r| r["change_pct"].as_f64().unwrap())
            .collect();
        assert!(changes.windows(2).all(|w| w[0] >= w[1]));
        // the +6% day leads
        assert!(changes[0] > 5.9);
    }

    #[test]
    fn streak_segments_qualifying_runs() {
        // green green red green green green red
        let closes = [101.0, 102.0, 101.5, 102.5, 103.0, 104.0, 103.5];
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let step = year_step("runs", OperationKind::Streak, "change", None);
        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["length"], 2);
        assert_eq!(result.rows[1]["length"], 3);
        assert_eq!(result.rows[1]["start"], "2024-01-05");
        assert_eq!(result.rows[1]["end"], "2024-01-09");
        assert_eq!(result.summary["runs"], 2);
        assert_eq!(result.summary["max_len"], 3);
        assert_eq!(result.summary["mean_len"], 2.5);
    }

    #[test]
    fn probability_is_an_exact_rational() {
        // changes: + - + 0 - + - 0 + +; the condition (red) holds on days
        // 2, 5 and 7, and only two of the three next days are green
        let closes = [101.0, 100.0, 102.0, 102.0, 100.0, 103.0, 101.0, 101.0, 104.0, 105.0];
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let step = year_step(
            "next_day",
            OperationKind::Probability,
            "change",
            Some(change_cmp(Cmp::Lt, 0.0)),
        );
        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.summary["occurrences"], 3);
        assert_eq!(result.summary["hits"], 2);
        assert_eq!(result.summary["probability"], 0.6667);
        // five of the ten days were green
        assert_eq!(result.summary["baseline"], 0.5);
        assert_eq!(result.summary["offset"], 1);
    }

    #[test]
    fn correlation_of_metrics_is_a_single_fetch() {
        // volume tracks the change linearly, so r must round to 1
        let days = [2u32, 3, 4, 5, 8];
        let closes = [101.0, 102.0, 99.0, 103.0, 98.0];
        let volumes = [1_100i64, 1_200, 900, 1_300, 800];
        let bars: Vec<Bar> = days
            .iter()
            .zip(closes.iter().zip(volumes.iter()))
            .map(|(&d, (&close, &volume))| {
                let mut bar = daily_bar("ES", date(2024, 1, d), 100.0, close);
                bar.volume = volume;
                bar
            })
            .collect();
        let store = MockBarStore::new().with_bars("ES", Timeframe::Day1, bars);
        let env = TestEnv::new(store);

        let mut step = year_step("xy", OperationKind::Correlation, "change", None);
        step.atoms.push(atom(TimeExpr::Year { year: 2024 }, "volume", None));

        let validated = validate(step.clone(), &env.catalog).unwrap();
        let p = plan(&validated, &env.catalog, &env.session, &env.calendar, env.as_of).unwrap();
        assert_eq!(p.mode, PlanMode::MultiMetric);
        assert_eq!(p.requests.len(), 1);

        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.summary["n"], 5);
        assert_eq!(result.summary["r"], 1.0);
    }

    #[test]
    fn around_centers_on_detected_dojis() {
        // day two closes where it opens: a doji and nothing else
        let closes = [101.0, 101.0, 103.0, 104.0];
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let step = year_step(
            "around_doji",
            OperationKind::Around,
            "change",
            Some(FilterExpr::Pattern {
                name: "doji".to_string(),
            }),
        );
        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.summary["events"], 1);
        assert_eq!(result.rows[0]["date"], "2024-01-03");
        assert_eq!(result.rows[0]["offset_date"], "2024-01-04");
        assert_eq!(result.rows[0]["value"], 0.0);
    }

    #[test]
    fn opex_and_month_end_are_countable_events() {
        // all 19 trading days of June 2024 (Juneteenth closes the 19th)
        let closes: Vec<f64> = (1..=19).map(|i| 100.0 + i as f64).collect();
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 6, 3), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let june = TimeExpr::Month {
            year: 2024,
            month: 6,
        };
        let mut opex = year_step("opex", OperationKind::Count, "change", None);
        opex.atoms = vec![atom(
            june.clone(),
            "change",
            Some(FilterExpr::Categorical {
                name: "opex".to_string(),
            }),
        )];
        let mut month_end = year_step("eom", OperationKind::Count, "change", None);
        month_end.atoms = vec![atom(
            june,
            "change",
            Some(FilterExpr::Categorical {
                name: "month_end".to_string(),
            }),
        )];

        let reports = run(&env, &[opex, month_end]);
        let opex_result = data(&reports[0]);
        assert_eq!(opex_result.summary["count"], 1);
        assert_eq!(opex_result.summary["total"], 19);
        let eom_result = data(&reports[1]);
        assert_eq!(eom_result.summary["count"], 1);
    }

    #[test]
    fn evening_bars_roll_to_the_next_trading_day() {
        // a Sunday 18:30 bar belongs to Monday's session
        let sunday_evening = Bar {
            ts: date(2024, 1, 7).and_hms_opt(18, 30, 0).unwrap(),
            ..daily_bar("ES", date(2024, 1, 7), 100.0, 101.0)
        };
        let monday_morning = Bar {
            ts: date(2024, 1, 8).and_hms_opt(10, 0, 0).unwrap(),
            ..daily_bar("ES", date(2024, 1, 8), 101.0, 102.0)
        };
        let store = MockBarStore::new()
            .with_bars("ES", Timeframe::Hour1, vec![sunday_evening, monday_morning]);
        let env = TestEnv::new(store);

        let mut step = year_step("mondays", OperationKind::Count, "change", None);
        step.atoms = vec![atom(
            TimeExpr::Between {
                start: date(2024, 1, 7),
                end: date(2024, 1, 8),
            },
            "change",
            Some(FilterExpr::Categorical {
                name: "monday".to_string(),
            }),
        )];
        step.atoms[0].timeframe = Timeframe::Hour1;

        let reports = run(&env, &[step]);
        let result = data(&reports[0]);
        assert_eq!(result.summary["count"], 2);
        assert_eq!(result.summary["total"], 2);
    }
}

mod chained_and_batch {
    use super::*;

    #[test]
    fn list_rows_feed_a_dependent_count() {
        let closes = [101.0, 99.0, 103.0, 102.0, 100.0, 104.0];
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &closes),
        );
        let env = TestEnv::new(store);

        let mut picks = year_step("picks", OperationKind::List, "change", None);
        picks.params.n = Some(3);
        let mut verdict = year_step(
            "verdict",
            OperationKind::Count,
            "change",
            Some(change_cmp(Cmp::Gt, 0.0)),
        );
        verdict.depends_on = Some("picks".to_string());

        let reports = run(&env, &[picks, verdict]);
        // the top three moves are all advances
        let result = data(&reports[1]);
        assert_eq!(result.summary["count"], 3);
        assert_eq!(result.summary["total"], 3);
    }

    #[test]
    fn no_data_propagates_to_dependents() {
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &[101.0]),
        );
        let env = TestEnv::new(store);

        let mut empty = year_step("empty", OperationKind::Count, "change", None);
        empty.atoms[0].when = TimeExpr::Year { year: 2019 };
        let mut after = year_step("after", OperationKind::Count, "change", None);
        after.depends_on = Some("empty".to_string());

        let reports = run(&env, &[empty, after]);
        assert!(matches!(
            reports[0].outcome.as_ref().unwrap(),
            StepOutcome::NoData { .. }
        ));
        assert!(matches!(
            reports[1].outcome.as_ref().unwrap(),
            StepOutcome::NoData { requested, .. } if requested == "rows of step 'empty'"
        ));
    }

    #[test]
    fn store_errors_fail_the_step_not_the_batch() {
        let store = MockBarStore::new()
            .with_bars(
                "NQ",
                Timeframe::Day1,
                daily_series("NQ", date(2024, 1, 2), 100.0, &[101.0, 102.0]),
            )
            .with_error("ES", "disk on fire");
        let mut env = TestEnv::new(store);
        env.symbol = "ES".to_string();

        let broken = year_step("broken", OperationKind::Count, "change", None);
        let reports = run(&env, &[broken]);
        assert!(matches!(
            reports[0].outcome,
            Err(EngineError::Store { ref reason }) if reason == "disk on fire"
        ));

        env.symbol = "NQ".to_string();
        let fine = year_step("fine", OperationKind::Count, "change", None);
        let reports = run(&env, &[fine]);
        assert!(reports[0].outcome.is_ok());
    }

    #[test]
    fn pre_cancelled_batch_aborts() {
        let store = MockBarStore::new().with_bars(
            "ES",
            Timeframe::Day1,
            daily_series("ES", date(2024, 1, 2), 100.0, &[101.0]),
        );
        let env = TestEnv::new(store);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut ctx = env.ctx();
        ctx.cancel = cancel;

        let step = year_step("s1", OperationKind::Count, "change", None);
        let err = executor::run_steps(&[step], &ctx).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
