//! CLI definition and dispatch.

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_bars::CsvBarStore;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::calendar::TradingCalendar;
use crate::domain::catalog::Catalog;
use crate::domain::config_validation::{validate_engine_config, validate_session_config};
use crate::domain::error::EngineError;
use crate::domain::executor::{self, CancelToken, ExecContext, StepOutcome, StepReport};
use crate::domain::plan;
use crate::domain::query::{Step, parse_clock};
use crate::domain::resolve::SessionSpec;
use crate::domain::timeframe::Timeframe;
use crate::domain::validate::validate;
use crate::ports::bar_store::BarStore;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "barquery", about = "Query engine for OHLCV bar series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate, plan and execute steps against the configured store
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        steps: PathBuf,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        pretty: bool,
    },
    /// Validate and repair steps without touching the store
    Validate {
        #[arg(short, long)]
        steps: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Resolve steps into execution plans without running them
    Plan {
        #[arg(short, long)]
        steps: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        pretty: bool,
    },
    /// List store symbols and their coverage
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run {
            config,
            steps,
            as_of,
            symbol,
            pretty,
        } => run_steps_cmd(&config, &steps, as_of, symbol.as_deref(), pretty),
        Command::Validate { steps, pretty } => run_validate(&steps, pretty),
        Command::Plan {
            steps,
            config,
            as_of,
            pretty,
        } => run_plan(&steps, config.as_ref(), as_of, pretty),
        Command::Info {
            config,
            symbol,
            timeframe,
        } => run_info(&config, symbol.as_deref(), timeframe.as_deref()),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        (&e).into()
    })
}

pub fn load_steps(path: &PathBuf) -> Result<Vec<Step>, ExitCode> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to read {}: {}", path.display(), e);
            return Err(ExitCode::from(1));
        }
    };
    parse_steps(&content).map_err(|e| {
        eprintln!("error: failed to parse {}: {}", path.display(), e);
        ExitCode::from(4)
    })
}

/// A steps file is one step object or an array of them. Anonymous steps get
/// positional ids so reports and `depends_on` can name them.
pub fn parse_steps(content: &str) -> Result<Vec<Step>, serde_json::Error> {
    let value: Value = serde_json::from_str(content)?;
    let mut steps: Vec<Step> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    for (i, step) in steps.iter_mut().enumerate() {
        if step.id.is_empty() {
            step.id = format!("s{}", i + 1);
        }
    }
    Ok(steps)
}

fn run_steps_cmd(
    config_path: &PathBuf,
    steps_path: &PathBuf,
    as_of: Option<NaiveDate>,
    symbol_override: Option<&str>,
    pretty: bool,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_engine_config(&config) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    // Stage 2: Load steps
    eprintln!("Loading steps from {}", steps_path.display());
    let steps = match load_steps(steps_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    // Stage 3: Open the store
    let store = match build_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    // Stage 4: Execution context
    let symbol = resolve_symbol(symbol_override, &config);
    let session = build_session(&config);
    let calendar = build_calendar(&config);
    let as_of = as_of.unwrap_or_else(|| Local::now().date_naive());
    let catalog = Catalog::new();

    eprintln!(
        "Running {} step(s) for {} as of {}",
        steps.len(),
        symbol,
        as_of
    );

    let ctx = ExecContext {
        store: store.as_ref(),
        symbol: &symbol,
        catalog: &catalog,
        session: &session,
        calendar: &calendar,
        as_of,
        cancel: CancelToken::new(),
    };

    // Stage 5: Run and render
    let reports = match executor::run_steps(&steps, &ctx) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let mut exit: Option<ExitCode> = None;
    for report in &reports {
        match &report.outcome {
            Ok(StepOutcome::Data(result)) => {
                eprintln!("  {}: ok, {} row(s)", report.step_id, result.row_count);
            }
            Ok(StepOutcome::NoData { .. }) => {
                eprintln!("  {}: no data", report.step_id);
            }
            Err(e) => {
                eprintln!("  {}: {e}", report.step_id);
                if exit.is_none() {
                    exit = Some(e.into());
                }
            }
        }
    }

    let envelopes: Vec<Value> = reports.iter().map(step_envelope).collect();
    print_json(&Value::Array(envelopes), pretty);

    exit.unwrap_or(ExitCode::SUCCESS)
}

/// The per-step JSON object printed by `run`. Every envelope carries the
/// same six keys; no-data and error variants add their detail on top.
pub fn step_envelope(report: &StepReport) -> Value {
    let mut obj = Map::new();
    obj.insert("step".to_string(), json!(report.step_id));
    match &report.outcome {
        Ok(StepOutcome::Data(result)) => {
            obj.insert("status".to_string(), json!("ok"));
            obj.insert("rows".to_string(), json!(result.rows));
            obj.insert("summary".to_string(), Value::Object(result.summary.clone()));
            obj.insert("row_count".to_string(), json!(result.row_count));
        }
        Ok(StepOutcome::NoData { symbol, requested }) => {
            obj.insert("status".to_string(), json!("no_data"));
            obj.insert("rows".to_string(), json!([]));
            obj.insert("summary".to_string(), json!({}));
            obj.insert("row_count".to_string(), json!(0));
            obj.insert("symbol".to_string(), json!(symbol));
            obj.insert("requested".to_string(), json!(requested));
        }
        Err(e) => {
            obj.insert("status".to_string(), json!("error"));
            obj.insert("rows".to_string(), json!([]));
            obj.insert("summary".to_string(), json!({}));
            obj.insert("row_count".to_string(), json!(0));
            obj.insert("error".to_string(), json!(e.to_string()));
            if let EngineError::Validation { violations, .. } = e {
                obj.insert("violations".to_string(), json!(violations));
            }
        }
    }
    obj.insert("corrections".to_string(), json!(report.corrections));
    Value::Object(obj)
}

fn run_validate(steps_path: &PathBuf, pretty: bool) -> ExitCode {
    eprintln!("Validating steps from {}", steps_path.display());
    let steps = match load_steps(steps_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let catalog = Catalog::new();
    let mut invalid = 0usize;
    let mut results = Vec::with_capacity(steps.len());
    for step in steps {
        let id = step.id.clone();
        match validate(step, &catalog) {
            Ok(v) => results.push(json!({
                "step": id,
                "status": "ok",
                "corrections": v.corrections,
            })),
            Err(violations) => {
                invalid += 1;
                for v in &violations {
                    eprintln!("  {}: {}", id, v);
                }
                results.push(json!({
                    "step": id,
                    "status": "invalid",
                    "violations": violations,
                }));
            }
        }
    }

    print_json(&Value::Array(results), pretty);

    if invalid > 0 {
        eprintln!("{} step(s) failed validation", invalid);
        ExitCode::from(4)
    } else {
        eprintln!("All steps are valid.");
        ExitCode::SUCCESS
    }
}

fn run_plan(
    steps_path: &PathBuf,
    config_path: Option<&PathBuf>,
    as_of: Option<NaiveDate>,
    pretty: bool,
) -> ExitCode {
    eprintln!("Loading steps from {}", steps_path.display());
    let steps = match load_steps(steps_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    // plan never touches the store, so a config only contributes the
    // session clock and the holiday calendar
    let (session, calendar) = match config_path {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            let config = match load_config(path) {
                Ok(c) => c,
                Err(code) => return code,
            };
            if let Err(e) = validate_session_config(&config) {
                eprintln!("error: {e}");
                return (&e).into();
            }
            (build_session(&config), build_calendar(&config))
        }
        None => (SessionSpec::default(), TradingCalendar::new()),
    };

    let catalog = Catalog::new();
    let as_of = as_of.unwrap_or_else(|| Local::now().date_naive());
    eprintln!("Planning {} step(s) as of {}", steps.len(), as_of);

    let mut plans = Vec::with_capacity(steps.len());
    for step in steps {
        let id = step.id.clone();
        let validated = match validate(step, &catalog) {
            Ok(v) => v,
            Err(violations) => {
                for v in &violations {
                    eprintln!("  {}: {}", id, v);
                }
                let err = EngineError::Validation {
                    step_id: id,
                    violations,
                };
                eprintln!("error: {err}");
                return (&err).into();
            }
        };
        match plan::plan(&validated, &catalog, &session, &calendar, as_of) {
            Ok(p) => plans.push(p),
            Err(e) => {
                eprintln!("error: step {}: {}", id, e);
                return (&e).into();
            }
        }
    }

    print_json(&json!(plans), pretty);
    ExitCode::SUCCESS
}

fn run_info(config_path: &PathBuf, symbol: Option<&str>, timeframe: Option<&str>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_engine_config(&config) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    let store = match build_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let timeframe = match timeframe {
        Some(s) => match Timeframe::parse(s) {
            Some(tf) => tf,
            None => {
                eprintln!("error: unknown timeframe '{}'", s);
                return ExitCode::from(1);
            }
        },
        None => Timeframe::Day1,
    };

    let symbols = match symbol {
        Some(s) => vec![s.to_string()],
        None => match store.symbols() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: {e}");
                return (&e).into();
            }
        },
    };

    if symbols.is_empty() {
        eprintln!("No symbols in store");
        return ExitCode::SUCCESS;
    }

    for s in &symbols {
        match store.coverage(s, timeframe) {
            Ok(Some((min, max, count))) => {
                println!("{} @ {}: {} bars, {} to {}", s, timeframe, count, min, max);
            }
            Ok(None) => {
                eprintln!("{} @ {}: no data", s, timeframe);
            }
            Err(e) => {
                eprintln!("error querying {}: {}", s, e);
            }
        }
    }
    ExitCode::SUCCESS
}

pub fn resolve_symbol(symbol_override: Option<&str>, config: &dyn ConfigPort) -> String {
    match symbol_override {
        Some(s) => s.trim().to_uppercase(),
        None => config
            .get_string("engine", "symbol")
            .unwrap_or_default()
            .trim()
            .to_uppercase(),
    }
}

pub fn build_session(config: &dyn ConfigPort) -> SessionSpec {
    let mut session = SessionSpec::default();
    if let Some(t) = config
        .get_string("session", "rth_open")
        .and_then(|s| parse_clock(&s))
    {
        session.rth_open = t;
    }
    if let Some(t) = config
        .get_string("session", "rth_close")
        .and_then(|s| parse_clock(&s))
    {
        session.rth_close = t;
    }
    if let Some(t) = config
        .get_string("session", "day_open")
        .and_then(|s| parse_clock(&s))
    {
        session.day_open = t;
    }
    session
}

pub fn build_calendar(config: &dyn ConfigPort) -> TradingCalendar {
    match config.get_string("calendar", "extra_holidays") {
        Some(list) => {
            let extra = list
                .split(',')
                .filter_map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .collect();
            TradingCalendar::with_extra_holidays(extra)
        }
        None => TradingCalendar::new(),
    }
}

pub fn build_store(config: &dyn ConfigPort) -> Result<Box<dyn BarStore>, EngineError> {
    let kind = config.get_string("data", "kind").unwrap_or_default();
    match kind.trim() {
        "csv" => {
            let path =
                config
                    .get_string("data", "path")
                    .ok_or_else(|| EngineError::ConfigMissing {
                        section: "data".into(),
                        key: "path".into(),
                    })?;
            Ok(Box::new(CsvBarStore::new(PathBuf::from(path))))
        }
        "sqlite" => {
            #[cfg(feature = "sqlite")]
            {
                let store = crate::adapters::sqlite_bars::SqliteBarStore::from_config(config)?;
                Ok(Box::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            {
                Err(EngineError::ConfigInvalid {
                    section: "data".into(),
                    key: "kind".into(),
                    reason: "sqlite support is not compiled in".into(),
                })
            }
        }
        other => Err(EngineError::ConfigInvalid {
            section: "data".into(),
            key: "kind".into(),
            reason: format!("unknown store kind '{}'", other),
        }),
    }
}

fn print_json(value: &Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: failed to render output: {e}"),
    }
}
