//! Trace context carried across process boundaries.

use std::collections::BTreeMap;
use std::fmt;

use crate::Error;

/// The identity of one unit of work inside a distributed trace.
///
/// A context is created either as a root (a fresh trace id) or as the
/// child of another context, in which case it keeps the trace id, the
/// sampling decision and the baggage, and records the parent's span id.
///
/// ## Example
///
/// ```rust
/// use tracemux::tracing_support::TraceContext;
///
/// let root = TraceContext::new_root(true);
/// let child = root.child();
///
/// assert_eq!(child.trace_id(), root.trace_id());
/// assert_eq!(child.parent_span_id(), Some(root.span_id()));
/// assert!(child.is_sampled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
    baggage: BTreeMap<String, String>,
}

impl TraceContext {
    /// Creates a new root context with random ids.
    pub fn new_root(sampled: bool) -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            sampled,
            baggage: BTreeMap::new(),
        }
    }

    /// Creates a sampled context with the given ids and no parent.
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            sampled: true,
            baggage: BTreeMap::new(),
        }
    }

    /// Creates a child context.
    ///
    /// The child inherits the trace id, the sampling flag and the baggage,
    /// and uses this context's span id as its parent.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    /// Sets the parent span id.
    #[must_use]
    pub fn with_parent(mut self, parent: SpanId) -> Self {
        self.parent_span_id = Some(parent);
        self
    }

    /// Sets the sampling flag.
    #[must_use]
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    /// Adds a baggage item, replacing any previous value for the key.
    #[must_use]
    pub fn with_baggage_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Returns the trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the span id.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns the parent span id, if any.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// Returns `true` if this context has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Returns `true` if spans of this trace are reported.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Returns the baggage items.
    pub fn baggage(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }

    /// Returns a single baggage item.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// Checks that the context can be injected into a carrier.
    pub fn validate(&self) -> Result<(), Error> {
        if self.trace_id.is_zero() {
            return Err(Error::invalid_context("trace id is zero"));
        }
        if self.span_id.is_zero() {
            return Err(Error::invalid_context("span id is zero"));
        }
        if self.parent_span_id.is_some_and(|parent| parent.is_zero()) {
            return Err(Error::invalid_context("parent span id is zero"));
        }
        Ok(())
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.trace_id, self.span_id)?;
        match self.parent_span_id {
            Some(parent) => write!(f, "{}", parent)?,
            None => write!(f, "0")?,
        }
        write!(f, ":{}", if self.sampled { 1 } else { 0 })
    }
}

fn fill_random(buf: &mut [u8]) {
    if getrandom::getrandom(buf).is_err() {
        fastrand::fill(buf);
    }
}

/// A 128-bit trace identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// Creates a new random, non-zero trace id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        while bytes == [0u8; 16] {
            fill_random(&mut bytes);
        }
        Self(bytes)
    }

    /// Creates a trace id from bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a trace id from its integer value.
    pub fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Creates a trace id from 32 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if hex.len() != 32 {
            return Err(Error::malformed_carrier(format!(
                "trace id must be 32 hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| Error::malformed_carrier("trace id is not hex").with_source(e))?;

        if bytes == [0u8; 16] {
            return Err(Error::malformed_carrier("trace id is zero"));
        }

        Ok(Self(bytes))
    }

    /// Returns the trace id as bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` for the invalid all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A 64-bit span identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// Creates a new random, non-zero span id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        while bytes == [0u8; 8] {
            fill_random(&mut bytes);
        }
        Self(bytes)
    }

    /// Creates a span id from bytes.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Creates a span id from its integer value.
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    /// Creates a span id from 16 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if hex.len() != 16 {
            return Err(Error::malformed_carrier(format!(
                "span id must be 16 hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| Error::malformed_carrier("span id is not hex").with_source(e))?;

        if bytes == [0u8; 8] {
            return Err(Error::malformed_carrier("span id is zero"));
        }

        Ok(Self(bytes))
    }

    /// Returns the span id as bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Returns `true` for the invalid all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
