//! Executor: runs execution plans against a bar store.
//!
//! Per request: fetch, enrich, detect whatever patterns the plan's filters
//! name, apply where-predicates as row selection, then dispatch to the
//! operation with the full chronological table so run and offset logic never
//! sees a compacted sequence. The multi-step runner on top executes a step
//! list in dependency order, keeping completed results in an arena so a
//! dependent step can consume a prior step's rows instead of fetching.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::domain::bar::Bar;
use crate::domain::calendar::TradingCalendar;
use crate::domain::catalog::Catalog;
use crate::domain::enrich::BarTable;
use crate::domain::error::EngineError;
use crate::domain::ops::{self, OpInput, OperationResult, Series, predicate_mask};
use crate::domain::patterns;
use crate::domain::plan::{self, DataRequest, ExecutionPlan};
use crate::domain::query::{FilterExpr, Step};
use crate::domain::resolve::{ResolvedPredicate, SessionSpec};
use crate::domain::validate::{Correction, validate};
use crate::ports::bar_store::BarStore;

/// Cooperative cancellation, checked between fetches. Cancelling mid-plan
/// discards all partial work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Everything a run needs besides the steps themselves.
pub struct ExecContext<'a> {
    pub store: &'a dyn BarStore,
    pub symbol: &'a str,
    pub catalog: &'a Catalog,
    pub session: &'a SessionSpec,
    pub calendar: &'a TradingCalendar,
    pub as_of: NaiveDate,
    pub cancel: CancelToken,
}

/// What one step produced. An empty store range is an answer, not a failure.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Data(OperationResult),
    NoData { symbol: String, requested: String },
}

/// Per-step record the caller renders: the repairs made on the way in plus
/// whatever came out.
#[derive(Debug)]
pub struct StepReport {
    pub step_id: String,
    pub corrections: Vec<Correction>,
    pub outcome: Result<StepOutcome, EngineError>,
}

/// Run one plan against the store.
pub fn execute(plan: &ExecutionPlan, ctx: &ExecContext) -> Result<StepOutcome, EngineError> {
    let mut tables = Vec::with_capacity(plan.requests.len());
    for request in &plan.requests {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let bars = ctx.store.fetch(ctx.symbol, &request.period, request.timeframe)?;
        if bars.is_empty() {
            return Ok(StepOutcome::NoData {
                symbol: ctx.symbol.to_string(),
                requested: format!("{} at {}", request.period, request.timeframe),
            });
        }
        let mut table = BarTable::enrich(bars, request.timeframe, ctx.session, ctx.calendar);
        detect_needed_patterns(plan, request, &mut table, ctx.session);
        tables.push(table);
    }
    Ok(StepOutcome::Data(run_operation(plan, &tables, ctx)?))
}

/// Run a plan over a prior step's materialized rows instead of the store.
fn execute_from_rows(
    plan: &ExecutionPlan,
    dep_id: &str,
    rows: &[Map<String, Value>],
    ctx: &ExecContext,
) -> Result<StepOutcome, EngineError> {
    let bars = bars_from_rows(dep_id, rows, ctx.symbol)?;
    if bars.is_empty() {
        return Ok(StepOutcome::NoData {
            symbol: ctx.symbol.to_string(),
            requested: format!("rows of step '{}'", dep_id),
        });
    }
    let mut tables = Vec::with_capacity(plan.requests.len());
    for request in &plan.requests {
        let mut table =
            BarTable::enrich(bars.clone(), request.timeframe, ctx.session, ctx.calendar);
        detect_needed_patterns(plan, request, &mut table, ctx.session);
        tables.push(table);
    }
    Ok(StepOutcome::Data(run_operation(plan, &tables, ctx)?))
}

fn run_operation(
    plan: &ExecutionPlan,
    tables: &[BarTable],
    ctx: &ExecContext,
) -> Result<OperationResult, EngineError> {
    let mut series = Vec::with_capacity(tables.len());
    for (request, table) in plan.requests.iter().zip(tables) {
        series.push(Series {
            label: request.label.clone(),
            table,
            selected: select_rows(table, &request.where_predicates),
        });
    }
    let input = OpInput {
        mode: plan.mode,
        series,
        metrics: &plan.metrics,
        params: &plan.params,
        condition: plan.condition.as_ref(),
        event: plan.event.as_ref(),
        group: plan.group,
        catalog: ctx.catalog,
        session: ctx.session,
    };
    ops::dispatch(plan.operation, &input)
}

/// Where-role predicates select rows and nothing else; condition and event
/// filters stay with the operation.
fn select_rows(table: &BarTable, predicates: &[ResolvedPredicate]) -> Vec<usize> {
    let mut keep = vec![true; table.len()];
    for pred in predicates {
        for (k, m) in keep.iter_mut().zip(predicate_mask(table, pred)) {
            *k = *k && m;
        }
    }
    (0..table.len()).filter(|&i| keep[i]).collect()
}

/// Detect the candle patterns this plan actually references; calendar event
/// flags are already tagged during enrichment.
fn detect_needed_patterns(
    plan: &ExecutionPlan,
    request: &DataRequest,
    table: &mut BarTable,
    session: &SessionSpec,
) {
    let mut names: Vec<&str> = Vec::new();
    for pred in &request.where_predicates {
        if let ResolvedPredicate::Flag { name } = pred {
            names.push(name);
        }
    }
    for filter in [&plan.condition, &plan.event].into_iter().flatten() {
        if let FilterExpr::Pattern { name } = filter {
            names.push(name);
        }
    }
    for name in names {
        if table.flag(name).is_none() {
            if let Some(mask) = patterns::detect(table, name, session) {
                table.set_flag(name.to_string(), mask);
            }
        }
    }
}

/// Rebuild raw bars from a result's rows. Only row-shaped results chain;
/// aggregate rows are a typed operation error.
fn bars_from_rows(
    dep_id: &str,
    rows: &[Map<String, Value>],
    symbol: &str,
) -> Result<Vec<Bar>, EngineError> {
    fn field(dep_id: &str, row: &Map<String, Value>, name: &str) -> Result<f64, EngineError> {
        row.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| EngineError::Operation {
                reason: format!(
                    "step '{}' does not produce bar-shaped rows (missing '{}')",
                    dep_id, name
                ),
            })
    }

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let ts = row
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
            .ok_or_else(|| EngineError::Operation {
                reason: format!(
                    "step '{}' does not produce bar-shaped rows (missing 'ts')",
                    dep_id
                ),
            })?;
        bars.push(Bar {
            symbol: symbol.to_string(),
            ts,
            open: field(dep_id, row, "open")?,
            high: field(dep_id, row, "high")?,
            low: field(dep_id, row, "low")?,
            close: field(dep_id, row, "close")?,
            volume: field(dep_id, row, "volume")? as i64,
        });
    }
    Ok(bars)
}

/// Validate, plan and execute a list of steps in dependency order.
///
/// One step's failure is recorded in its report and leaves siblings
/// untouched; a dependent of a failed or no-data step reports no data.
/// Structural problems with the step list itself (duplicate ids, unknown or
/// cyclic `depends_on`) abort the whole batch, as does cancellation.
pub fn run_steps(steps: &[Step], ctx: &ExecContext) -> Result<Vec<StepReport>, EngineError> {
    let order = execution_order(steps)?;
    let mut arena: HashMap<String, StepOutcome> = HashMap::new();
    let mut reports: Vec<Option<StepReport>> = Vec::new();
    reports.resize_with(steps.len(), || None);

    for &i in &order {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let step = &steps[i];
        let report = run_one(step, &arena, ctx);
        if let Ok(outcome) = &report.outcome {
            arena.insert(step.id.clone(), outcome.clone());
        }
        reports[i] = Some(report);
    }
    Ok(reports.into_iter().flatten().collect())
}

fn run_one(step: &Step, arena: &HashMap<String, StepOutcome>, ctx: &ExecContext) -> StepReport {
    let step_id = step.id.clone();
    let validated = match validate(step.clone(), ctx.catalog) {
        Ok(v) => v,
        Err(violations) => {
            return StepReport {
                step_id: step_id.clone(),
                corrections: Vec::new(),
                outcome: Err(EngineError::Validation { step_id, violations }),
            };
        }
    };
    let plan = match plan::plan(&validated, ctx.catalog, ctx.session, ctx.calendar, ctx.as_of) {
        Ok(p) => p,
        Err(e) => {
            return StepReport {
                step_id,
                corrections: validated.corrections,
                outcome: Err(e),
            };
        }
    };
    let outcome = match &plan.depends_on {
        Some(dep) => match arena.get(dep) {
            Some(StepOutcome::Data(result)) => {
                execute_from_rows(&plan, dep, &result.rows, ctx)
            }
            // dependency missing, failed or had no data
            _ => Ok(StepOutcome::NoData {
                symbol: ctx.symbol.to_string(),
                requested: format!("rows of step '{}'", dep),
            }),
        },
        None => execute(&plan, ctx),
    };
    StepReport {
        step_id: plan.step_id,
        corrections: validated.corrections,
        outcome,
    }
}

/// Dependency-respecting execution order over step indices. Every step has
/// at most one parent, so readiness converges or a cycle is left over.
fn execution_order(steps: &[Step]) -> Result<Vec<usize>, EngineError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.id.as_str(), i).is_some() {
            return Err(EngineError::Operation {
                reason: format!("duplicate step id '{}'", step.id),
            });
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    let mut placed = vec![false; steps.len()];
    loop {
        let mut progressed = false;
        for (i, step) in steps.iter().enumerate() {
            if placed[i] {
                continue;
            }
            let ready = match &step.depends_on {
                None => true,
                Some(dep) => {
                    let j = *index.get(dep.as_str()).ok_or_else(|| {
                        EngineError::UnknownDependency {
                            id: step.id.clone(),
                            depends_on: dep.clone(),
                        }
                    })?;
                    placed[j]
                }
            };
            if ready {
                order.push(i);
                placed[i] = true;
                progressed = true;
            }
        }
        if order.len() == steps.len() {
            return Ok(order);
        }
        if !progressed {
            let stuck = steps
                .iter()
                .enumerate()
                .find(|(i, _)| !placed[*i])
                .map(|(_, s)| s.id.clone())
                .unwrap_or_default();
            return Err(EngineError::DependencyCycle { id: stuck });
        }
    }
}
