//! Engine error taxonomy.

/// A single unrepairable rule breach found while validating a step.
///
/// Carries the offending field path so the caller can point at the exact
/// part of the query description that was rejected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("rule {rule} rejected {field}: {reason}")]
pub struct Violation {
    pub rule: &'static str,
    pub field: String,
    pub reason: String,
}

/// Top-level error type for barquery.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("bar store error: {reason}")]
    Store { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("step {step_id} failed validation with {} violation(s)", violations.len())]
    Validation {
        step_id: String,
        violations: Vec<Violation>,
    },

    #[error("unresolvable time expression: {detail}")]
    UnresolvableTime { detail: String },

    #[error("atoms differ in more than one dimension; no plan mode applies")]
    MixedAtoms,

    #[error("step {id} depends on unknown step {depends_on}")]
    UnknownDependency { id: String, depends_on: String },

    #[error("dependency cycle through step {id}")]
    DependencyCycle { id: String },

    #[error("operation failed: {reason}")]
    Operation { reason: String },

    #[error("no data for {symbol} at {timeframe}")]
    NoData { symbol: String, timeframe: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) | EngineError::Cancelled => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Store { .. } => 3,
            EngineError::Validation { .. }
            | EngineError::UnresolvableTime { .. }
            | EngineError::MixedAtoms
            | EngineError::UnknownDependency { .. }
            | EngineError::DependencyCycle { .. } => 4,
            EngineError::Operation { .. } | EngineError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_display_names_rule_and_field() {
        let v = Violation {
            rule: "check_arity",
            field: "atoms".into(),
            reason: "expected 2 atoms, found 1".into(),
        };
        let msg = v.to_string();
        assert!(msg.contains("check_arity"));
        assert!(msg.contains("atoms"));
    }

    #[test]
    fn validation_display_counts_violations() {
        let err = EngineError::Validation {
            step_id: "s1".into(),
            violations: vec![
                Violation {
                    rule: "a",
                    field: "f".into(),
                    reason: "r".into(),
                },
                Violation {
                    rule: "b",
                    field: "g".into(),
                    reason: "r".into(),
                },
            ],
        };
        assert!(err.to_string().contains("2 violation(s)"));
    }
}
