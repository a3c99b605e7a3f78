use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use std::str::FromStr;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::env;

/// One log event as written by the JSON layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub level: String,
    /// Module path the event came from
    pub target: String,
    pub message: String,
    /// Execution the event belongs to, lifted out of the event fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Remaining event fields, flattened into the object
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

/// Layer writing one JSON object per event to stderr.
///
/// Stdout is left to the binaries, which print execution results there.
pub struct JsonFormatter;

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let entry = visitor.into_entry(
            *event.metadata().level(),
            event.metadata().target(),
        );

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stderr(), "{}", json);
        }
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl JsonVisitor {
    fn into_entry(mut self, level: Level, target: &str) -> StructuredLogEntry {
        let execution_id = match self.fields.remove("execution_id") {
            Some(Value::String(id)) => Some(id),
            Some(other) => Some(other.to_string()),
            None => None,
        };

        StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: target.to_string(),
            message: self.message.unwrap_or_default(),
            execution_id,
            fields: self.fields,
        }
    }

    fn put(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(text),
            _ => self.put(field, Value::String(text)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            _ => self.put(field, Value::String(value.to_string())),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

/// How [`init_structured_logging`] sets up the subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is not set
    pub level: Level,
    pub json_output: bool,
    /// ANSI colors; ignored by the JSON layer
    pub color_output: bool,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            json_output: false,
            color_output: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `CMDEXEC_LOG_LEVEL`, `CMDEXEC_LOG_JSON` and
    /// `CMDEXEC_LOG_COLOR`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(level) = env::string("LOG_LEVEL") {
            if let Ok(level) = Level::from_str(&level) {
                cfg.level = level;
            }
        }
        if let Some(json) = env::flag("LOG_JSON") {
            cfg.json_output = json;
        }
        if let Some(color) = env::flag("LOG_COLOR") {
            cfg.color_output = color;
        }

        cfg
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    if config.json_output {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonFormatter);

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output)
            .with_span_events(FmtSpan::CLOSE);

        let subscriber = Registry::default()
            .with(env_filter)
            .with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Measures an operation and logs its outcome with the collected fields.
pub struct OperationTimer {
    start: std::time::Instant,
    operation_name: String,
    fields: HashMap<String, Value>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation_name: operation_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish_with_result<T>(self, result: &Result<T, impl std::fmt::Display>) {
        let duration_ms = self.elapsed_ms();

        match result {
            Ok(_) => {
                tracing::info!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = true,
                    fields = ?self.fields,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = false,
                    error = %e,
                    fields = ?self.fields,
                    "Operation failed"
                );
            }
        }
    }
}
