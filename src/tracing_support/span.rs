//! Span types.
//!
//! An [`ActiveSpan`] is owned by exactly one task. Its owner sets tags and
//! appends logs; the span is sealed exactly once, either by
//! [`ActiveSpan::finish`] or when it is dropped, and the sealed
//! [`FinishedSpan`] is handed to the tracer's sink if the trace is sampled.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::tracing_support::context::TraceContext;
use crate::tracing_support::sink::SpanSink;

/// Kind of span, indicating its role in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    /// An outgoing request.
    Client,
    /// An incoming request.
    Server,
    /// Work that does not cross a process boundary.
    #[default]
    Internal,
    /// A message sent to a queue.
    Producer,
    /// A message received from a queue.
    Consumer,
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanKind::Client => write!(f, "client"),
            SpanKind::Server => write!(f, "server"),
            SpanKind::Internal => write!(f, "internal"),
            SpanKind::Producer => write!(f, "producer"),
            SpanKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// A scalar value attached to a span as a tag or log field.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// A string value.
    String(String),
    /// An integer value.
    Int(i64),
    /// A float value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl TagValue {
    /// Returns the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(s) => write!(f, "{}", s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(fl) => write!(f, "{}", fl),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<i32> for TagValue {
    fn from(i: i32) -> Self {
        TagValue::Int(i64::from(i))
    }
}

impl From<u16> for TagValue {
    fn from(i: u16) -> Self {
        TagValue::Int(i64::from(i))
    }
}

impl From<usize> for TagValue {
    fn from(i: usize) -> Self {
        TagValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for TagValue {
    fn from(f: f64) -> Self {
        TagValue::Float(f)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// Common tag keys.
pub mod tag_keys {
    /// Set to `true` when the unit of work failed.
    pub const ERROR: &str = "error";
    /// The span kind.
    pub const SPAN_KIND: &str = "span.kind";
    /// HTTP request method.
    pub const HTTP_METHOD: &str = "http.method";
    /// HTTP request URL or path.
    pub const HTTP_URL: &str = "http.url";
    /// HTTP response status code.
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    /// gRPC status code name.
    pub const RPC_CODE: &str = "rpc.code";
    /// Queue channel a message was sent to or received from.
    pub const MESSAGE_CHANNEL: &str = "message.channel";
    /// Set to `true` when the incoming carrier could not be decoded and the
    /// span was started as a new root.
    pub const CARRIER_MALFORMED: &str = "carrier.malformed";
}

/// A timestamped log event on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event's fields, in insertion order.
    pub fields: Vec<(String, TagValue)>,
}

impl LogRecord {
    /// Returns the value of a field.
    pub fn field(&self, key: &str) -> Option<&TagValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

struct SpanData {
    operation_name: String,
    service: Arc<str>,
    kind: SpanKind,
    context: TraceContext,
    start_time: DateTime<Utc>,
    started: Instant,
    tags: BTreeMap<String, TagValue>,
    logs: Vec<LogRecord>,
}

/// A span that is still in flight.
///
/// Created by [`Tracer::span`](crate::tracing_support::Tracer::span).
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use tracemux::tracing_support::{MemorySink, SpanKind, Tracer};
///
/// let sink = Arc::new(MemorySink::new());
/// let tracer = Tracer::with_sink("service", sink.clone());
///
/// let mut span = tracer.span("save to storage").kind(SpanKind::Client).start();
/// span.set_tag("value", "x");
/// span.log([("event", "saved")]);
/// span.finish();
///
/// assert_eq!(sink.spans()[0].operation_name(), "save to storage");
/// ```
pub struct ActiveSpan {
    data: SpanData,
    sink: Option<Arc<dyn SpanSink>>,
}

impl ActiveSpan {
    pub(crate) fn start(
        operation_name: String,
        service: Arc<str>,
        kind: SpanKind,
        context: TraceContext,
        sink: Arc<dyn SpanSink>,
    ) -> Self {
        let sink = context.is_sampled().then_some(sink);
        let mut tags = BTreeMap::new();
        tags.insert(
            tag_keys::SPAN_KIND.to_string(),
            TagValue::String(kind.to_string()),
        );
        Self {
            data: SpanData {
                operation_name,
                service,
                kind,
                context,
                start_time: Utc::now(),
                started: Instant::now(),
                tags,
                logs: Vec::new(),
            },
            sink,
        }
    }

    /// Returns the span's trace context.
    ///
    /// Children started from this context record this span as their parent.
    pub fn context(&self) -> &TraceContext {
        &self.data.context
    }

    /// Returns the operation name.
    pub fn operation_name(&self) -> &str {
        &self.data.operation_name
    }

    /// Returns the span kind.
    pub fn kind(&self) -> SpanKind {
        self.data.kind
    }

    /// Returns the elapsed time since the span started.
    pub fn elapsed(&self) -> Duration {
        self.data.started.elapsed()
    }

    /// Sets a tag, replacing any previous value for the key.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.data.tags.insert(key.into(), value.into());
    }

    /// Returns the current value of a tag.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.data.tags.get(key)
    }

    /// Appends a log event.
    pub fn log<K, V, I>(&mut self, fields: I)
    where
        K: Into<String>,
        V: Into<TagValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.data.logs.push(LogRecord {
            timestamp: Utc::now(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
    }

    /// Marks the span as failed and logs the error.
    pub fn set_error(&mut self, error: &dyn fmt::Display) {
        self.set_tag(tag_keys::ERROR, true);
        self.log([
            ("event", TagValue::from("error")),
            ("error.object", TagValue::String(error.to_string())),
        ]);
    }

    /// Seals the span and reports it.
    pub fn finish(mut self) {
        self.seal();
    }

    // Taking the sink makes a second call a no-op; unsampled spans have none.
    fn seal(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };

        let duration = self.data.started.elapsed();
        let end_time = self.data.start_time
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());

        sink.submit(FinishedSpan {
            operation_name: std::mem::take(&mut self.data.operation_name),
            service: Arc::clone(&self.data.service),
            kind: self.data.kind,
            context: self.data.context.clone(),
            start_time: self.data.start_time,
            end_time,
            duration,
            tags: std::mem::take(&mut self.data.tags),
            logs: std::mem::take(&mut self.data.logs),
        });
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.seal();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("operation_name", &self.data.operation_name)
            .field("context", &self.data.context)
            .field("sampled", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// A sealed span with timing information.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    operation_name: String,
    service: Arc<str>,
    kind: SpanKind,
    context: TraceContext,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration: Duration,
    tags: BTreeMap<String, TagValue>,
    logs: Vec<LogRecord>,
}

impl FinishedSpan {
    /// Returns the operation name.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Returns the name of the service that recorded the span.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the span kind.
    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Returns the span's trace context.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Returns when the span started.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Returns when the span was sealed.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Returns the span duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns all tags.
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    /// Returns a single tag.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Returns the log events in the order they were recorded.
    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    /// Returns `true` if the span was tagged as failed.
    pub fn is_error(&self) -> bool {
        self.tag(tag_keys::ERROR).and_then(TagValue::as_bool) == Some(true)
    }
}
