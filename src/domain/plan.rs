//! Planner: turns a validated step into a concrete execution plan.
//!
//! Pure function, no I/O. Time expressions become date ranges, session names
//! become clock windows, and every filter is split by its semantics-matrix
//! role: where-role filters are resolved into row predicates here, while
//! condition- and event-role filters ride along untouched for the operation
//! to interpret.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::calendar::TradingCalendar;
use crate::domain::catalog::{Catalog, FilterKind, Role};
use crate::domain::error::EngineError;
use crate::domain::query::{Atom, FilterExpr, GroupKey, OperationKind, Params, TimeExpr};
use crate::domain::resolve::{
    resolve_session, resolve_time, DateRange, ResolvedPredicate, SessionSpec,
};
use crate::domain::timeframe::Timeframe;
use crate::domain::validate::ValidatedStep;

/// Derived from the atoms, never chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Single,
    MultiPeriod,
    MultiFilter,
    MultiMetric,
}

/// One fetch the executor will perform.
#[derive(Debug, Clone, Serialize)]
pub struct DataRequest {
    pub label: String,
    pub period: DateRange,
    pub timeframe: Timeframe,
    pub where_predicates: Vec<ResolvedPredicate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub step_id: String,
    pub operation: OperationKind,
    pub mode: PlanMode,
    pub requests: Vec<DataRequest>,
    /// Enriched column per atom, in atom order.
    pub metrics: Vec<String>,
    pub params: Params,
    /// Condition-role filter, interpreted inside the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterExpr>,
    /// Event-role filter, interpreted inside the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<FilterExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

pub fn plan(
    validated: &ValidatedStep,
    catalog: &Catalog,
    session: &SessionSpec,
    calendar: &TradingCalendar,
    as_of: NaiveDate,
) -> Result<ExecutionPlan, EngineError> {
    let step = &validated.step;
    if step.atoms.is_empty() {
        return Err(EngineError::Operation {
            reason: "step has no atoms".to_string(),
        });
    }
    let mode = classify(&step.atoms)?;

    let mut metrics = Vec::with_capacity(step.atoms.len());
    for atom in &step.atoms {
        let column = catalog
            .metric_column(&atom.what)
            .ok_or_else(|| EngineError::Operation {
                reason: format!("metric '{}' has no enriched column", atom.what),
            })?;
        metrics.push(column.to_string());
    }

    let mut condition = None;
    let mut event = None;
    let mut atom_predicates: Vec<Vec<ResolvedPredicate>> = Vec::with_capacity(step.atoms.len());
    for atom in &step.atoms {
        let mut predicates = Vec::new();
        if let Some(filter) = &atom.filter {
            let kind = catalog.filter_kind(filter).ok_or_else(|| EngineError::Operation {
                reason: format!("filter '{}' missing from catalog", filter.label()),
            })?;
            match catalog.role(step.operation, kind) {
                Role::Where => {
                    predicates.push(resolve_predicate(filter, kind, catalog, session)?)
                }
                Role::Condition => condition = Some(filter.clone()),
                Role::Event => event = Some(filter.clone()),
                Role::Invalid => {
                    return Err(EngineError::Operation {
                        reason: format!(
                            "invalid filter '{}' for {} reached the planner",
                            filter.label(),
                            step.operation
                        ),
                    });
                }
            }
        }
        atom_predicates.push(predicates);
    }

    let requests = match mode {
        PlanMode::Single | PlanMode::MultiMetric => {
            vec![build_request(
                "all".to_string(),
                &step.atoms[0],
                atom_predicates[0].clone(),
                calendar,
                as_of,
            )?]
        }
        PlanMode::MultiPeriod => {
            let mut requests = Vec::with_capacity(step.atoms.len());
            for (atom, predicates) in step.atoms.iter().zip(&atom_predicates) {
                requests.push(build_request(
                    time_label(&atom.when),
                    atom,
                    predicates.clone(),
                    calendar,
                    as_of,
                )?);
            }
            requests
        }
        PlanMode::MultiFilter => {
            let mut requests = Vec::with_capacity(step.atoms.len());
            for (atom, predicates) in step.atoms.iter().zip(&atom_predicates) {
                let label = atom
                    .filter
                    .as_ref()
                    .map(|f| f.label())
                    .unwrap_or_else(|| "all".to_string());
                requests.push(build_request(label, atom, predicates.clone(), calendar, as_of)?);
            }
            requests
        }
    };

    Ok(ExecutionPlan {
        step_id: step.id.clone(),
        operation: step.operation,
        mode,
        requests,
        metrics,
        params: step.params.clone(),
        condition,
        event,
        group: step.atoms[0].group,
        depends_on: step.depends_on.clone(),
    })
}

fn classify(atoms: &[Atom]) -> Result<PlanMode, EngineError> {
    if atoms.len() <= 1 {
        return Ok(PlanMode::Single);
    }
    let first = &atoms[0];
    let when_differs = atoms.iter().any(|a| a.when != first.when);
    let what_differs = atoms.iter().any(|a| a.what != first.what);
    let filter_differs = atoms.iter().any(|a| a.filter != first.filter);
    match (when_differs, what_differs, filter_differs) {
        (false, false, false) => Ok(PlanMode::Single),
        (true, false, false) => Ok(PlanMode::MultiPeriod),
        (false, true, false) => Ok(PlanMode::MultiMetric),
        (false, false, true) => Ok(PlanMode::MultiFilter),
        _ => Err(EngineError::MixedAtoms),
    }
}

fn build_request(
    label: String,
    atom: &Atom,
    where_predicates: Vec<ResolvedPredicate>,
    calendar: &TradingCalendar,
    as_of: NaiveDate,
) -> Result<DataRequest, EngineError> {
    Ok(DataRequest {
        label,
        period: resolve_time(&atom.when, calendar, as_of)?,
        timeframe: atom.timeframe,
        where_predicates,
    })
}

pub(crate) fn resolve_predicate(
    filter: &FilterExpr,
    kind: FilterKind,
    catalog: &Catalog,
    session: &SessionSpec,
) -> Result<ResolvedPredicate, EngineError> {
    match (filter, kind) {
        (FilterExpr::Categorical { name }, FilterKind::Weekday) => {
            Ok(ResolvedPredicate::Weekday { day: name.clone() })
        }
        (FilterExpr::Categorical { name }, FilterKind::Session) => resolve_session(name, session)
            .ok_or_else(|| EngineError::Operation {
                reason: format!("session '{}' has no clock window", name),
            }),
        (FilterExpr::Categorical { name }, FilterKind::Event) => {
            Ok(ResolvedPredicate::Flag { name: name.clone() })
        }
        (FilterExpr::Pattern { name }, _) => Ok(ResolvedPredicate::Flag { name: name.clone() }),
        (FilterExpr::Comparison { metric, cmp, value }, _) => {
            let column = catalog
                .metric_column(metric)
                .ok_or_else(|| EngineError::Operation {
                    reason: format!("metric '{}' has no enriched column", metric),
                })?;
            Ok(ResolvedPredicate::Metric {
                column: column.to_string(),
                cmp: *cmp,
                value: *value,
            })
        }
        (FilterExpr::TimeOfDay { cmp, time }, _) => Ok(ResolvedPredicate::TimeCmp {
            cmp: *cmp,
            time: *time,
        }),
        (FilterExpr::Consecutive { color, cmp, length }, _) => {
            Ok(ResolvedPredicate::ConsecutiveRun {
                color: *color,
                cmp: *cmp,
                length: *length,
            })
        }
        (FilterExpr::Categorical { name }, _) => Err(EngineError::Operation {
            reason: format!("categorical '{}' cannot be resolved to a predicate", name),
        }),
    }
}

fn time_label(expr: &TimeExpr) -> String {
    match expr {
        TimeExpr::Year { year } => year.to_string(),
        TimeExpr::Quarter { year, quarter } => format!("{}Q{}", year, quarter),
        TimeExpr::Month { year, month } => format!("{}-{:02}", year, month),
        TimeExpr::Between { start, end } => format!("{}..{}", start, end),
        TimeExpr::LastDays { days } => format!("last_{}_days", days),
        TimeExpr::Yesterday => "yesterday".to_string(),
    }
}
