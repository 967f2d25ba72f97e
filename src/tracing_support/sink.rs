//! Span sinks: where sealed spans go.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::tracing_support::span::FinishedSpan;

/// Receives every sealed, sampled span exactly once.
///
/// Submission cannot fail from the caller's point of view: a sink that loses
/// a span must absorb the failure itself.
pub trait SpanSink: Send + Sync + 'static {
    /// Accepts a sealed span.
    fn submit(&self, span: FinishedSpan);
}

/// Writes each span as one structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl SpanSink for LogSink {
    fn submit(&self, span: FinishedSpan) {
        let ctx = span.context();
        let tags = span
            .tags()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");

        tracing::info!(
            target: "tracemux::span",
            service = span.service(),
            operation = span.operation_name(),
            trace_id = %ctx.trace_id(),
            span_id = %ctx.span_id(),
            parent_span_id = %ctx.parent_span_id().map(|p| p.to_string()).unwrap_or_default(),
            duration_us = span.duration().as_micros() as u64,
            logs = span.logs().len(),
            error = span.is_error(),
            tags = %tags,
            "span finished"
        );
    }
}

/// Keeps spans in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    spans: Mutex<Vec<FinishedSpan>>,
    submitted: Notify,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every span submitted so far, in submission order.
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().clone()
    }

    /// Removes and returns every span submitted so far.
    pub fn take(&self) -> Vec<FinishedSpan> {
        std::mem::take(&mut *self.spans.lock())
    }

    /// Returns the number of spans submitted so far.
    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    /// Returns `true` if no span has been submitted.
    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }

    /// Waits until at least `count` spans were submitted or `timeout`
    /// elapses, then returns what is there.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<FinishedSpan> {
        let enough = async {
            loop {
                let notified = self.submitted.notified();
                tokio::pin!(notified);
                // must be registered before the length check
                notified.as_mut().enable();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        // on timeout the caller gets whatever arrived
        let _ = tokio::time::timeout(timeout, enough).await;
        self.spans()
    }
}

impl SpanSink for MemorySink {
    fn submit(&self, span: FinishedSpan) {
        self.spans.lock().push(span);
        self.submitted.notify_waiters();
    }
}

/// Forwards every span to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn SpanSink>>,
}

impl FanoutSink {
    /// Creates a sink with no targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl SpanSink for FanoutSink {
    fn submit(&self, span: FinishedSpan) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.submit(span.clone());
            }
            last.submit(span);
        }
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing_support::Tracer;

    #[test]
    fn test_memory_sink_take() {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::with_sink("svc", sink.clone());

        tracer.span("a").start().finish();
        tracer.span("b").start().finish();

        assert_eq!(sink.len(), 2);
        let taken = sink.take();
        assert_eq!(taken[0].operation_name(), "a");
        assert_eq!(taken[1].operation_name(), "b");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fanout_sink() {
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(LogSink));
        let tracer = Tracer::with_sink("svc", Arc::new(fanout));

        tracer.span("op").start().finish();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_submit() {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::with_sink("svc", sink.clone());

        let producer = tokio::spawn(async move {
            for name in ["a", "b"] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                tracer.span(name).start().finish();
            }
        });

        let started = std::time::Instant::now();
        let spans = sink.wait_for(2, Duration::from_secs(30)).await;
        assert_eq!(spans.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_returns_on_timeout() {
        let sink = MemorySink::new();
        let spans = sink.wait_for(1, Duration::from_millis(20)).await;
        assert!(spans.is_empty());
    }
}
