//! Structured JSON-lines logging for the signal engine.
//!
//! Every record carries a run id, a monotonically increasing sequence number,
//! a level, a domain and a flat `data` object. Records go to stdout and, when
//! `LOG_DIR` is set, to `<LOG_DIR>/<run_id>/events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // Snapshot fetches, omitted instruments
    Selection, // Scorer runs and audit digests
    Risk,      // Drawdown gate, breaker
    Broadcast, // Packet fan-out, subscribers
    Scheduler, // Cycle lifecycle
    Server,    // HTTP / WebSocket endpoints
    Export,    // CSV artifacts
    System,    // Startup, shutdown
    Profile,   // Timing scopes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Selection => "selection",
            Domain::Risk => "risk",
            Domain::Broadcast => "broadcast",
            Domain::Scheduler => "scheduler",
            Domain::Server => "server",
            Domain::Export => "export",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let events = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            let _ = std::fs::write(
                run_dir.join("manifest.json"),
                json!({
                    "run_id": run_id,
                    "ts": ts_now(),
                    "pid": process::id(),
                    "log_dir": run_dir.to_string_lossy(),
                })
                .to_string(),
            );
            match File::create(run_dir.join("events.jsonl")) {
                Ok(f) => Some(Mutex::new(BufWriter::new(f))),
                Err(err) => {
                    eprintln!("[log] failed to create events log: {}", err);
                    None
                }
            }
        });
        RunContext { run_id, events }
    })
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, mut fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    if let Some(cycle) = fields.remove("cycle") {
        entry.insert("cycle".to_string(), cycle);
    }
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        write_line(events, &line);
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_cycle_start(cycle: u64, universe: usize) {
    log(
        Level::Info,
        Domain::Scheduler,
        "cycle_start",
        obj(&[("cycle", json!(cycle)), ("universe", json!(universe))]),
    );
}

pub fn log_cycle_end(cycle: u64, outcome: &str, packets: usize, elapsed_ms: f64, next_wait_ms: f64) {
    log(
        Level::Info,
        Domain::Scheduler,
        "cycle_end",
        obj(&[
            ("cycle", json!(cycle)),
            ("outcome", v_str(outcome)),
            ("packets", json!(packets)),
            ("elapsed_ms", v_num(elapsed_ms)),
            ("next_wait_ms", v_num(next_wait_ms)),
        ]),
    );
}

pub fn log_cycle_error(cycle: u64, kind: &str, error: &str) {
    log(
        Level::Warn,
        Domain::Scheduler,
        "cycle_failed",
        obj(&[
            ("cycle", json!(cycle)),
            ("kind", v_str(kind)),
            ("msg", v_str(error)),
        ]),
    );
}

pub fn log_omitted(provider: &str, instrument: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Market,
        "instrument_omitted",
        obj(&[
            ("provider", v_str(provider)),
            ("instrument", v_str(instrument)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_risk_check(check: &str, result: &str, value: f64, threshold: f64) {
    log(
        Level::Debug,
        Domain::Risk,
        "guard",
        obj(&[
            ("check", v_str(check)),
            ("result", v_str(result)),
            ("value", v_num(value)),
            ("threshold", v_num(threshold)),
        ]),
    );
}

/// Log an audit entry tying scorer inputs to outputs for replay checks
pub fn log_selection_audit(cycle: u64, scorer: &str, input_hash: &str, output_hash: &str, selected: &[&str]) {
    log(
        Level::Info,
        Domain::Selection,
        "selection",
        obj(&[
            ("cycle", json!(cycle)),
            ("scorer", v_str(scorer)),
            ("input_hash", v_str(input_hash)),
            ("output_hash", v_str(output_hash)),
            (
                "selected",
                Value::Array(selected.iter().map(|s| v_str(s)).collect()),
            ),
        ]),
    );
}

pub fn log_transport_failure(subscriber: u64, reason: &str) {
    log(
        Level::Warn,
        Domain::Broadcast,
        "transport_failure",
        obj(&[("subscriber", json!(subscriber)), ("reason", v_str(reason))]),
    );
}

/// Session summary on shutdown
pub fn log_session_summary(
    duration_secs: u64,
    cycles: u64,
    failed: u64,
    packets: u64,
    cumulative_pnl: f64,
    tripped: bool,
) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("duration_secs", json!(duration_secs)),
            ("cycles", json!(cycles)),
            ("failed_cycles", json!(failed)),
            ("packets", json!(packets)),
            ("cumulative_pnl", v_num(cumulative_pnl)),
            ("breaker_tripped", Value::Bool(tripped)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Hex SHA-256 of a string, truncated to 16 chars for log readability
pub fn digest_hex(input: &str) -> String {
    let full = hex::encode(Sha256::digest(input.as_bytes()));
    full[..16].to_string()
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: obj(fields),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
