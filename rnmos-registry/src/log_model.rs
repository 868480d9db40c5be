//! The in-memory log model
//!
//! A bounded ring buffer of structured log events, fed by a `tracing`
//! layer and served by the Logging API. The buffer has its own lock
//! (`log_lock`); nothing here touches the registry model.
//!
//! Severity follows the registry's logging scale: bigger is more severe
//! (error 40, warning 20, info 0, debug -20, trace -40), and
//! `logging_level` is the floor below which events are dropped.

use rnmos_core::make_id;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Ring buffer capacity
pub const DEFAULT_LOG_CAPACITY: usize = 1234;

/// The ring buffer of log events
pub struct LogModel {
    events: VecDeque<Value>,
    capacity: usize,
    level: i32,
}

impl LogModel {
    pub fn new(capacity: usize, level: i32) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            level,
        }
    }

    /// Append an event, minting an id and trimming to capacity
    pub fn insert(&mut self, mut event: Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.entry("id".to_string())
                .or_insert_with(|| Value::String(make_id()));
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn find(&self, id: &str) -> Option<&Value> {
        self.events
            .iter()
            .find(|e| e.get("id").and_then(Value::as_str) == Some(id))
    }

    pub fn iterate(&self) -> impl Iterator<Item = &Value> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Adjust the severity floor (the Settings API does this live)
    pub fn set_level(&mut self, level: i32) {
        self.level = level;
    }
}

/// The shared handle the Logging API and the layer both hold
pub type LogHandle = Arc<Mutex<LogModel>>;

pub fn make_log_model(level: i32) -> LogHandle {
    Arc::new(Mutex::new(LogModel::new(DEFAULT_LOG_CAPACITY, level)))
}

/// Map a tracing level onto the registry's severity scale
pub fn severity_of(level: &tracing::Level) -> i32 {
    match *level {
        tracing::Level::ERROR => 40,
        tracing::Level::WARN => 20,
        tracing::Level::INFO => 0,
        tracing::Level::DEBUG => -20,
        tracing::Level::TRACE => -40,
    }
}

fn severity_name(severity: i32) -> &'static str {
    match severity {
        40 => "error",
        20 => "warning",
        0 => "info",
        -20 => "debug",
        _ => "trace",
    }
}

/// A `tracing` layer appending events to the log model
///
/// This is the registry's logging gate: install it on the subscriber and
/// every `tracing` event at or above the configured level becomes a
/// queryable log event.
pub struct LogLayer {
    model: LogHandle,
}

impl LogLayer {
    pub fn new(model: LogHandle) -> Self {
        Self { model }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let severity = severity_of(event.metadata().level());

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let Ok(mut model) = self.model.lock() else {
            return;
        };
        if severity < model.level() {
            return;
        }

        let message = visitor
            .fields
            .remove("message")
            .unwrap_or_else(|| Value::String(String::new()));
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut record = Map::new();
        record.insert(
            "timestamp".to_string(),
            Value::String(format!("{}.{:09}", unix.as_secs(), unix.subsec_nanos())),
        );
        record.insert("level".to_string(), Value::from(severity));
        record.insert(
            "level_name".to_string(),
            Value::String(severity_name(severity).to_string()),
        );
        record.insert(
            "target".to_string(),
            Value::String(event.metadata().target().to_string()),
        );
        record.insert("message".to_string(), message);
        record.extend(visitor.fields);

        model.insert(Value::Object(record));
    }
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ring_buffer_trims_to_capacity() {
        let mut model = LogModel::new(3, 0);
        for i in 0..5 {
            model.insert(json!({"message": i}));
        }
        assert_eq!(model.len(), 3);
        let first = model.iterate().next().unwrap();
        assert_eq!(first["message"], 2);
    }

    #[test]
    fn test_insert_mints_id_and_find() {
        let mut model = LogModel::new(10, 0);
        model.insert(json!({"message": "hello"}));
        let id = model
            .iterate()
            .next()
            .unwrap()
            .get("id")
            .and_then(Value::as_str)
            .unwrap()
            .to_string();
        assert!(model.find(&id).is_some());
        assert!(model.find("nope").is_none());
    }

    #[test]
    fn test_severity_scale() {
        assert_eq!(severity_of(&tracing::Level::ERROR), 40);
        assert_eq!(severity_of(&tracing::Level::INFO), 0);
        assert_eq!(severity_of(&tracing::Level::TRACE), -40);
        assert_eq!(severity_name(20), "warning");
    }
}
