//! The tracer handle that starts spans.

use std::fmt;
use std::sync::Arc;

use crate::config::{Sampler, TracerConfig};
use crate::tracing_support::context::TraceContext;
use crate::tracing_support::sink::SpanSink;
use crate::tracing_support::span::{tag_keys, ActiveSpan, SpanKind, TagValue};
use crate::Error;

/// Starts spans for one service and reports them to a sink.
///
/// There is no global tracer: every component receives a `Tracer` when it
/// is built. Cloning is cheap.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    service: Arc<str>,
    sampler: Sampler,
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    /// Creates a tracer from its configuration and a sink.
    pub fn new(config: TracerConfig, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                service: Arc::from(config.service_name),
                sampler: config.sampler,
                sink,
            }),
        }
    }

    /// Creates a tracer that samples every trace.
    pub fn with_sink(service_name: impl Into<String>, sink: Arc<dyn SpanSink>) -> Self {
        Self::new(TracerConfig::new(service_name), sink)
    }

    /// Returns the service name recorded on every span.
    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    /// Prepares a new span.
    ///
    /// Without a parent the span starts a new trace and the sampler decides
    /// whether it is reported; with a parent it joins the parent's trace and
    /// inherits its decision.
    pub fn span(&self, operation_name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            operation_name: operation_name.into(),
            kind: SpanKind::Internal,
            parent: None,
            malformed: None,
            tags: Vec::new(),
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("sampler", &self.inner.sampler)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Tracer::span`].
#[must_use = "a span is only recorded once `start` is called"]
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    operation_name: String,
    kind: SpanKind,
    parent: Option<TraceContext>,
    malformed: Option<Error>,
    tags: Vec<(String, TagValue)>,
}

impl SpanBuilder<'_> {
    /// Sets the span kind.
    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the span a child of `parent`.
    pub fn child_of(mut self, parent: &TraceContext) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Makes the span a child of whatever a propagator extracted.
    ///
    /// No context starts a new trace. A malformed carrier also starts a new
    /// trace, and the span is tagged `carrier.malformed` so the break in
    /// the chain is visible.
    pub fn child_of_extracted(mut self, extracted: Result<Option<TraceContext>, Error>) -> Self {
        match extracted {
            Ok(parent) => self.parent = parent,
            Err(err) => {
                self.parent = None;
                self.malformed = Some(err);
            }
        }
        self
    }

    /// Sets a tag on the span when it starts.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Starts the span.
    pub fn start(self) -> ActiveSpan {
        let inner = &self.tracer.inner;
        let context = match &self.parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(inner.sampler.should_sample()),
        };

        let mut span = ActiveSpan::start(
            self.operation_name,
            Arc::clone(&inner.service),
            self.kind,
            context,
            Arc::clone(&inner.sink),
        );

        for (key, value) in self.tags {
            span.set_tag(key, value);
        }

        if let Some(err) = self.malformed {
            tracing::debug!(
                service = %inner.service,
                operation = span.operation_name(),
                error = %err,
                "malformed trace carrier, starting a new trace"
            );
            span.set_tag(tag_keys::CARRIER_MALFORMED, true);
            span.log([
                ("event", TagValue::from("carrier.malformed")),
                ("error.object", TagValue::String(err.to_string())),
            ]);
        }

        span
    }
}
