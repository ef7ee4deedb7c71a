//! Validator/Repairer: the ordered rule chain applied to every incoming step.
//!
//! Each rule either repairs a field (recording what changed) or rejects the
//! step with a violation and halts the chain. Rules are small objects behind
//! a common trait so each one is unit-testable on its own; the order below is
//! load-bearing and mirrors the repair pipeline end to end:
//!
//! 1. normalize filter names      5. reject gap metric + session filter
//! 2. normalize/default metrics   6. check operation arity
//! 3. fit timeframe to filters    7. check the semantics matrix
//! 4. resolve fixed-timeframe     8. fill declared default params
//!    conflicts (op downgrade)

use serde::Serialize;

use crate::domain::catalog::{Catalog, FilterKind, Role, DEFAULT_METRIC};
use crate::domain::error::Violation;
use crate::domain::query::{FilterExpr, OperationKind, Step};
use crate::domain::timeframe::Timeframe;

/// One recorded auto-repair. The ordered list of these is part of the
/// validator's output so callers can explain how the interpreted query
/// differs from the literal request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub rule: &'static str,
    pub field: String,
    pub old: String,
    pub new: String,
    pub reason: String,
}

/// A step that passed the chain, plus everything the chain changed.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedStep {
    pub step: Step,
    pub corrections: Vec<Correction>,
}

pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation>;
}

/// The chain, in required order.
pub fn rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(NormalizeFilterNames),
        Box::new(NormalizeMetrics),
        Box::new(FitTimeframeToFilters),
        Box::new(ResolveFixedTimeframe),
        Box::new(RejectGapWithSession),
        Box::new(CheckArity),
        Box::new(CheckSemanticsMatrix),
        Box::new(FillDefaultParams),
    ]
}

/// Run the full chain. Repairs are applied in place on a clone of the input;
/// the first rejection wins and discards all repairs.
pub fn validate(step: Step, catalog: &Catalog) -> Result<ValidatedStep, Vec<Violation>> {
    let mut repaired = step;
    let mut corrections = Vec::new();
    for rule in rules() {
        match rule.apply(&mut repaired, catalog) {
            Ok(mut made) => corrections.append(&mut made),
            Err(violation) => return Err(vec![violation]),
        }
    }
    Ok(ValidatedStep {
        step: repaired,
        corrections,
    })
}

fn json_str<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

// ---- rule 1 ----------------------------------------------------------------

pub struct NormalizeFilterNames;

impl NormalizeFilterNames {
    fn normalize(
        &self,
        filter: &mut FilterExpr,
        field: String,
        catalog: &Catalog,
        corrections: &mut Vec<Correction>,
    ) -> Result<(), Violation> {
        let (was_pattern, name) = match filter {
            FilterExpr::Categorical { name } => (false, name.clone()),
            FilterExpr::Pattern { name } => (true, name.clone()),
            _ => return Ok(()),
        };
        let Some(canonical) = catalog.canonical_filter(&name) else {
            return Err(Violation {
                rule: self.name(),
                field,
                reason: format!("unknown filter name '{}'", name),
            });
        };
        let is_pattern = catalog
            .filter_entry(canonical)
            .map(|e| e.kind == FilterKind::Pattern)
            .unwrap_or(was_pattern);
        let rebuilt = if is_pattern {
            FilterExpr::Pattern {
                name: canonical.to_string(),
            }
        } else {
            FilterExpr::Categorical {
                name: canonical.to_string(),
            }
        };
        if *filter != rebuilt {
            let describe = |pattern: bool, n: &str| {
                if pattern {
                    format!("pattern '{}'", n)
                } else {
                    format!("categorical '{}'", n)
                }
            };
            corrections.push(Correction {
                rule: self.name(),
                field,
                old: describe(was_pattern, &name),
                new: describe(is_pattern, canonical),
                reason: "normalized to canonical filter name".to_string(),
            });
            *filter = rebuilt;
        }
        Ok(())
    }
}

impl ValidationRule for NormalizeFilterNames {
    fn name(&self) -> &'static str {
        "normalize_filter_names"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let mut corrections = Vec::new();
        for (i, atom) in step.atoms.iter_mut().enumerate() {
            if let Some(filter) = atom.filter.as_mut() {
                self.normalize(filter, format!("atoms[{}].filter", i), catalog, &mut corrections)?;
            }
        }
        if let Some(outcome) = step.params.outcome.as_mut() {
            self.normalize(outcome, "params.outcome".to_string(), catalog, &mut corrections)?;
        }
        Ok(corrections)
    }
}

// ---- rule 2 ----------------------------------------------------------------

pub struct NormalizeMetrics;

impl NormalizeMetrics {
    fn normalize(
        &self,
        metric: &mut String,
        field: String,
        catalog: &Catalog,
        corrections: &mut Vec<Correction>,
    ) {
        match catalog.canonical_metric(metric) {
            Some(canonical) if canonical == metric => {}
            Some(canonical) => {
                corrections.push(Correction {
                    rule: self.name(),
                    field,
                    old: metric.clone(),
                    new: canonical.to_string(),
                    reason: "metric alias normalized".to_string(),
                });
                *metric = canonical.to_string();
            }
            None => {
                corrections.push(Correction {
                    rule: self.name(),
                    field,
                    old: metric.clone(),
                    new: DEFAULT_METRIC.to_string(),
                    reason: format!("unknown metric '{}' replaced with default", metric),
                });
                *metric = DEFAULT_METRIC.to_string();
            }
        }
    }
}

impl ValidationRule for NormalizeMetrics {
    fn name(&self) -> &'static str {
        "normalize_metrics"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let mut corrections = Vec::new();
        for (i, atom) in step.atoms.iter_mut().enumerate() {
            self.normalize(&mut atom.what, format!("atoms[{}].what", i), catalog, &mut corrections);
            if let Some(FilterExpr::Comparison { metric, .. }) = atom.filter.as_mut() {
                self.normalize(
                    metric,
                    format!("atoms[{}].filter.metric", i),
                    catalog,
                    &mut corrections,
                );
            }
        }
        if let Some(FilterExpr::Comparison { metric, .. }) = step.params.outcome.as_mut() {
            self.normalize(metric, "params.outcome.metric".to_string(), catalog, &mut corrections);
        }
        Ok(corrections)
    }
}

// ---- rule 3 ----------------------------------------------------------------

pub struct FitTimeframeToFilters;

impl ValidationRule for FitTimeframeToFilters {
    fn name(&self) -> &'static str {
        "fit_timeframe_to_filters"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let mut corrections = Vec::new();
        for (i, atom) in step.atoms.iter_mut().enumerate() {
            let Some(filter) = atom.filter.as_ref() else {
                continue;
            };
            let ceiling = catalog.filter_max_timeframe(filter);
            if atom.timeframe > ceiling {
                corrections.push(Correction {
                    rule: self.name(),
                    field: format!("atoms[{}].timeframe", i),
                    old: atom.timeframe.to_string(),
                    new: ceiling.to_string(),
                    reason: format!("filter '{}' needs {} bars or finer", filter.label(), ceiling),
                });
                atom.timeframe = ceiling;
            } else if catalog.filter_pins_daily(filter) && atom.timeframe < Timeframe::Day1 {
                corrections.push(Correction {
                    rule: self.name(),
                    field: format!("atoms[{}].timeframe", i),
                    old: atom.timeframe.to_string(),
                    new: Timeframe::Day1.to_string(),
                    reason: "consecutive runs are counted on daily bars".to_string(),
                });
                atom.timeframe = Timeframe::Day1;
            }
        }
        Ok(corrections)
    }
}

// ---- rule 4 ----------------------------------------------------------------

pub struct ResolveFixedTimeframe;

impl ValidationRule for ResolveFixedTimeframe {
    fn name(&self) -> &'static str {
        "resolve_fixed_timeframe"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let spec = catalog.operation_spec(step.operation);
        let Some(fixed) = spec.fixed_timeframe else {
            return Ok(Vec::new());
        };

        let conflicting = step.atoms.iter().find_map(|atom| {
            let filter = atom.filter.as_ref()?;
            let pins_daily = catalog.filter_pins_daily(filter) && fixed != Timeframe::Day1;
            let too_coarse = fixed > catalog.filter_max_timeframe(filter);
            (pins_daily || too_coarse).then(|| filter.label())
        });

        let mut corrections = Vec::new();
        if let Some(label) = conflicting {
            let Some(downgraded) = catalog.downgrade_for(step.operation) else {
                return Err(Violation {
                    rule: self.name(),
                    field: "operation".to_string(),
                    reason: format!(
                        "{} requires {} bars but filter '{}' cannot run there",
                        step.operation, fixed, label
                    ),
                });
            };
            corrections.push(Correction {
                rule: self.name(),
                field: "operation".to_string(),
                old: step.operation.to_string(),
                new: downgraded.to_string(),
                reason: format!(
                    "filter '{}' cannot run on {} bars; operation downgraded",
                    label, fixed
                ),
            });
            step.operation = downgraded;
            return Ok(corrections);
        }

        for (i, atom) in step.atoms.iter_mut().enumerate() {
            if atom.timeframe != fixed {
                corrections.push(Correction {
                    rule: self.name(),
                    field: format!("atoms[{}].timeframe", i),
                    old: atom.timeframe.to_string(),
                    new: fixed.to_string(),
                    reason: format!("{} always runs on {} bars", step.operation, fixed),
                });
                atom.timeframe = fixed;
            }
        }
        Ok(corrections)
    }
}

// ---- rule 5 ----------------------------------------------------------------

pub struct RejectGapWithSession;

impl ValidationRule for RejectGapWithSession {
    fn name(&self) -> &'static str {
        "reject_gap_with_session"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let uses_gap = step.atoms.iter().any(|atom| {
            atom.what == "gap"
                || matches!(atom.filter.as_ref(),
                    Some(FilterExpr::Comparison { metric, .. }) if metric == "gap")
        });
        if !uses_gap {
            return Ok(Vec::new());
        }
        let session = step.atoms.iter().enumerate().find(|(_, atom)| {
            atom.filter
                .as_ref()
                .and_then(|f| catalog.filter_kind(f))
                .map(|k| k == FilterKind::Session)
                .unwrap_or(false)
        });
        if let Some((i, _)) = session {
            return Err(Violation {
                rule: self.name(),
                field: format!("atoms[{}].filter", i),
                reason: "gap is only defined on full trading days; a session filter cannot apply"
                    .to_string(),
            });
        }
        Ok(Vec::new())
    }
}

// ---- rule 6 ----------------------------------------------------------------

pub struct CheckArity;

impl ValidationRule for CheckArity {
    fn name(&self) -> &'static str {
        "check_arity"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let spec = catalog.operation_spec(step.operation);
        let count = step.atoms.len();
        if count < spec.min_atoms || count > spec.max_atoms {
            return Err(Violation {
                rule: self.name(),
                field: "atoms".to_string(),
                reason: format!(
                    "{} takes {}..={} atoms, found {}",
                    step.operation, spec.min_atoms, spec.max_atoms, count
                ),
            });
        }
        if spec.lone_atom_needs_group && count == 1 && step.atoms[0].group.is_none() {
            return Err(Violation {
                rule: self.name(),
                field: "atoms[0].group".to_string(),
                reason: format!("{} with a single atom needs a group key", step.operation),
            });
        }
        Ok(Vec::new())
    }
}

// ---- rule 7 ----------------------------------------------------------------

pub struct CheckSemanticsMatrix;

impl ValidationRule for CheckSemanticsMatrix {
    fn name(&self) -> &'static str {
        "check_semantics_matrix"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        for (i, atom) in step.atoms.iter().enumerate() {
            let Some(filter) = atom.filter.as_ref() else {
                continue;
            };
            let Some(kind) = catalog.filter_kind(filter) else {
                return Err(Violation {
                    rule: self.name(),
                    field: format!("atoms[{}].filter", i),
                    reason: format!("unknown filter name '{}'", filter.label()),
                });
            };
            if catalog.role(step.operation, kind) == Role::Invalid {
                return Err(Violation {
                    rule: self.name(),
                    field: format!("atoms[{}].filter", i),
                    reason: format!(
                        "filter '{}' has no meaning under {}; remove it or change the operation",
                        filter.label(),
                        step.operation
                    ),
                });
            }
        }
        Ok(Vec::new())
    }
}

// ---- rule 8 ----------------------------------------------------------------

pub struct FillDefaultParams;

impl FillDefaultParams {
    fn record(&self, corrections: &mut Vec<Correction>, field: &str, new: String) {
        corrections.push(Correction {
            rule: self.name(),
            field: format!("params.{}", field),
            old: "none".to_string(),
            new,
            reason: "default applied".to_string(),
        });
    }
}

impl ValidationRule for FillDefaultParams {
    fn name(&self) -> &'static str {
        "fill_default_params"
    }

    fn apply(&self, step: &mut Step, catalog: &Catalog) -> Result<Vec<Correction>, Violation> {
        let defaults = catalog.default_params(step.operation);
        let mut corrections = Vec::new();
        let p = &mut step.params;

        if p.n.is_none() {
            if let Some(v) = defaults.n {
                self.record(&mut corrections, "n", v.to_string());
                p.n = Some(v);
            }
        }
        if p.sort.is_none() {
            if let Some(v) = defaults.sort {
                self.record(&mut corrections, "sort", json_str(&v));
                p.sort = Some(v);
            }
        }
        if p.offset.is_none() {
            if let Some(v) = defaults.offset {
                self.record(&mut corrections, "offset", v.to_string());
                p.offset = Some(v);
            }
        }
        if p.bins.is_none() {
            if let Some(v) = defaults.bins {
                self.record(&mut corrections, "bins", v.to_string());
                p.bins = Some(v);
            }
        }
        if p.extremum.is_none() {
            if let Some(v) = defaults.extremum {
                self.record(&mut corrections, "extremum", json_str(&v));
                p.extremum = Some(v);
            }
        }
        if p.bucket.is_none() {
            if let Some(v) = defaults.bucket {
                self.record(&mut corrections, "bucket", json_str(&v));
                p.bucket = Some(v);
            }
        }
        if p.outcome.is_none() {
            if let Some(v) = defaults.outcome {
                self.record(&mut corrections, "outcome", v.label());
                p.outcome = Some(v);
            }
        }
        if p.min_len.is_none() {
            if let Some(v) = defaults.min_len {
                self.record(&mut corrections, "min_len", v.to_string());
                p.min_len = Some(v);
            }
        }
        Ok(corrections)
    }
}
