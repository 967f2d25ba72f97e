//! Reconstruction of causal span trees.
//!
//! A [`SpanTimeline`] links finished spans through their parent span ids so
//! a request that crossed HTTP, gRPC and the queue can be checked for being
//! one connected chain.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::tracing_support::context::{SpanId, TraceId};
use crate::tracing_support::span::FinishedSpan;

/// Parent/child view over a set of finished spans.
#[derive(Debug, Clone)]
pub struct SpanTimeline {
    spans: Vec<FinishedSpan>,
    index: HashMap<SpanId, usize>,
    children: HashMap<SpanId, Vec<usize>>,
}

impl SpanTimeline {
    /// Builds the timeline. Spans are ordered by start time.
    pub fn from_spans(mut spans: Vec<FinishedSpan>) -> Self {
        spans.sort_by_key(FinishedSpan::start_time);

        let index: HashMap<_, _> = spans
            .iter()
            .enumerate()
            .map(|(i, s)| (s.context().span_id(), i))
            .collect();

        let mut children: HashMap<SpanId, Vec<usize>> = HashMap::new();
        for (i, span) in spans.iter().enumerate() {
            if let Some(parent) = span.context().parent_span_id() {
                children.entry(parent).or_default().push(i);
            }
        }

        Self {
            spans,
            index,
            children,
        }
    }

    /// Returns every span, ordered by start time.
    pub fn spans(&self) -> &[FinishedSpan] {
        &self.spans
    }

    /// Returns the distinct trace ids present.
    pub fn trace_ids(&self) -> Vec<TraceId> {
        let mut seen = HashSet::new();
        self.spans
            .iter()
            .map(|s| s.context().trace_id())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Returns a timeline restricted to one trace.
    pub fn for_trace(&self, trace_id: TraceId) -> SpanTimeline {
        Self::from_spans(
            self.spans
                .iter()
                .filter(|s| s.context().trace_id() == trace_id)
                .cloned()
                .collect(),
        )
    }

    /// Returns the first span with the given operation name.
    pub fn find(&self, operation_name: &str) -> Option<&FinishedSpan> {
        self.spans
            .iter()
            .find(|s| s.operation_name() == operation_name)
    }

    /// Returns the span with the given id.
    pub fn get(&self, span_id: SpanId) -> Option<&FinishedSpan> {
        self.index.get(&span_id).map(|&i| &self.spans[i])
    }

    /// Returns the spans without a parent.
    pub fn roots(&self) -> Vec<&FinishedSpan> {
        self.spans
            .iter()
            .filter(|s| s.context().is_root())
            .collect()
    }

    /// Returns spans whose parent is not part of the timeline.
    pub fn orphans(&self) -> Vec<&FinishedSpan> {
        self.spans
            .iter()
            .filter(|s| {
                s.context()
                    .parent_span_id()
                    .is_some_and(|p| !self.index.contains_key(&p))
            })
            .collect()
    }

    /// Returns the direct children of a span, ordered by start time.
    pub fn children_of(&self, span_id: SpanId) -> Vec<&FinishedSpan> {
        self.children
            .get(&span_id)
            .map(|idx| idx.iter().map(|&i| &self.spans[i]).collect())
            .unwrap_or_default()
    }

    /// Returns the parent of a span, if it is part of the timeline.
    pub fn parent_of(&self, span: &FinishedSpan) -> Option<&FinishedSpan> {
        span.context().parent_span_id().and_then(|p| self.get(p))
    }

    /// Returns the chain of operation names from the root down to `span`.
    pub fn path_to<'a>(&'a self, span: &'a FinishedSpan) -> Vec<&'a str> {
        let mut path = vec![span.operation_name()];
        let mut current = span;
        let mut guard = self.spans.len();
        while let Some(parent) = self.parent_of(current) {
            if guard == 0 {
                break;
            }
            guard -= 1;
            path.push(parent.operation_name());
            current = parent;
        }
        path.reverse();
        path
    }

    /// Lists everything that keeps the timeline from being one causal tree.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let traces = self.trace_ids();
        if traces.len() > 1 {
            problems.push(format!("{} distinct traces", traces.len()));
        }

        let roots = self.roots();
        if roots.len() != 1 {
            problems.push(format!("{} roots", roots.len()));
        }

        for orphan in self.orphans() {
            problems.push(format!(
                "{} ({}) references missing parent",
                orphan.operation_name(),
                orphan.context().span_id()
            ));
        }

        for span in &self.spans {
            if let Some(parent) = self.parent_of(span) {
                if span.start_time() < parent.start_time() {
                    problems.push(format!(
                        "{} starts before its parent {}",
                        span.operation_name(),
                        parent.operation_name()
                    ));
                }
            }
        }

        problems
    }

    /// Returns `true` if the spans form exactly one connected tree.
    pub fn is_connected(&self) -> bool {
        !self.spans.is_empty() && self.problems().is_empty()
    }

    /// Renders the tree as indented text, one span per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for root in self.roots() {
            self.render_node(root, 0, &mut out);
        }
        for orphan in self.orphans() {
            out.push_str("(orphan) ");
            self.render_node(orphan, 0, &mut out);
        }
        out
    }

    fn render_node(&self, span: &FinishedSpan, depth: usize, out: &mut String) {
        let _ = writeln!(
            out,
            "{:indent$}{} [{}] {:?}{}",
            "",
            span.operation_name(),
            span.service(),
            span.duration(),
            if span.is_error() { " error" } else { "" },
            indent = depth * 2
        );
        if depth > self.spans.len() {
            return;
        }
        for child in self.children_of(span.context().span_id()) {
            self.render_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing_support::{MemorySink, TraceContext, Tracer};
    use std::sync::Arc;

    fn tracer() -> (Tracer, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Tracer::with_sink("svc", sink.clone()), sink)
    }

    #[test]
    fn test_connected_tree() {
        let (tracer, sink) = tracer();
        let root = tracer.span("root-handler").start();
        let child = tracer.span("call to service").child_of(root.context()).start();
        let grandchild = tracer.span("resource-save").child_of(child.context()).start();
        grandchild.finish();
        child.finish();
        root.finish();

        let timeline = SpanTimeline::from_spans(sink.spans());
        assert!(timeline.is_connected(), "{:?}", timeline.problems());

        let root = timeline.roots()[0];
        assert_eq!(root.operation_name(), "root-handler");
        assert_eq!(timeline.children_of(root.context().span_id()).len(), 1);

        let leaf = timeline.find("resource-save").unwrap();
        assert_eq!(
            timeline.path_to(leaf),
            vec!["root-handler", "call to service", "resource-save"]
        );
        assert!(timeline.render().contains("    resource-save"));
    }

    #[test]
    fn test_orphan_breaks_connectivity() {
        let (tracer, sink) = tracer();
        let root = tracer.span("root").start();
        let lost_parent = TraceContext::new_root(true);
        tracer.span("orphan").child_of(&lost_parent).start().finish();
        root.finish();

        let timeline = SpanTimeline::from_spans(sink.spans());
        assert!(!timeline.is_connected());
        assert_eq!(timeline.orphans().len(), 1);
        assert_eq!(timeline.trace_ids().len(), 2);
    }

    #[test]
    fn test_for_trace_filters() {
        let (tracer, sink) = tracer();
        let a = tracer.span("a").start();
        let b = tracer.span("b").start();
        let a_trace = a.context().trace_id();
        a.finish();
        b.finish();

        let timeline = SpanTimeline::from_spans(sink.spans()).for_trace(a_trace);
        assert_eq!(timeline.spans().len(), 1);
        assert!(timeline.is_connected());
    }

    #[test]
    fn test_empty_is_not_connected() {
        assert!(!SpanTimeline::from_spans(Vec::new()).is_connected());
    }
}
