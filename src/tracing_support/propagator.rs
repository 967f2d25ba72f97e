//! Trace context propagation over textual carriers.
//!
//! HTTP requests and gRPC calls carry the context as a fixed set of
//! key/value pairs. The same keys are used for both, so a context injected
//! into a [`http::HeaderMap`] and one injected into a
//! [`tonic::metadata::MetadataMap`] are interchangeable.

use std::collections::HashMap;

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::tracing_support::context::{SpanId, TraceContext, TraceId};
use crate::Error;

/// A carrier that context fields can be read from.
pub trait Extractor {
    /// Gets a value by key.
    fn get(&self, key: &str) -> Option<&str>;

    /// Returns `true` if the key is present, even when its value is not
    /// readable as text.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// A carrier that context fields can be written to.
pub trait Injector {
    /// Sets a value, replacing any previous value for the key.
    fn set(&mut self, key: &str, value: String);
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(|s| s.as_str())
    }
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.insert(name, value);
        }
    }
}

#[cfg(feature = "grpc")]
impl Extractor for tonic::metadata::MetadataMap {
    fn get(&self, key: &str) -> Option<&str> {
        tonic::metadata::MetadataMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

#[cfg(feature = "grpc")]
impl Injector for tonic::metadata::MetadataMap {
    fn set(&mut self, key: &str, value: String) {
        use tonic::metadata::{Ascii, MetadataKey, MetadataValue};

        if let (Ok(key), Ok(value)) = (
            MetadataKey::<Ascii>::from_bytes(key.as_bytes()),
            value.parse::<MetadataValue<Ascii>>(),
        ) {
            self.insert(key, value);
        }
    }
}

/// Moves a [`TraceContext`] in and out of a textual carrier.
pub trait Propagator {
    /// Extracts a trace context.
    ///
    /// Returns `Ok(None)` when the carrier holds no context and
    /// [`ErrorKind::MalformedCarrier`](crate::ErrorKind::MalformedCarrier)
    /// when it holds one that cannot be decoded.
    fn extract<E: Extractor + ?Sized>(&self, carrier: &E) -> Result<Option<TraceContext>, Error>;

    /// Injects a trace context.
    ///
    /// Fails with [`ErrorKind::InvalidContext`](crate::ErrorKind::InvalidContext)
    /// if the context has a zero id; the carrier is left untouched.
    fn inject<I: Injector + ?Sized>(&self, context: &TraceContext, carrier: &mut I)
        -> Result<(), Error>;
}

/// Propagator for the `x-trace-*` header set.
///
/// | Header             | Content                                   |
/// |--------------------|-------------------------------------------|
/// | `x-trace-id`       | 32 lowercase hex characters               |
/// | `x-span-id`        | 16 lowercase hex characters               |
/// | `x-parent-span-id` | 16 hex characters, absent for roots       |
/// | `x-trace-sampled`  | `1` or `0`, defaults to `1`               |
/// | `x-trace-baggage`  | `key=value` pairs separated by commas,    |
/// |                    | both sides percent-encoded                |
///
/// ## Example
///
/// ```rust
/// use std::collections::HashMap;
/// use tracemux::tracing_support::{HttpHeaderPropagator, Propagator, TraceContext};
///
/// let ctx = TraceContext::new_root(true).with_baggage_item("tenant", "acme");
///
/// let mut headers = HashMap::new();
/// HttpHeaderPropagator.inject(&ctx, &mut headers).unwrap();
/// assert!(headers.contains_key("x-trace-id"));
///
/// let extracted = HttpHeaderPropagator.extract(&headers).unwrap();
/// assert_eq!(extracted, Some(ctx));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpHeaderPropagator;

impl HttpHeaderPropagator {
    /// The trace id header name.
    pub const TRACE_ID: &'static str = "x-trace-id";
    /// The span id header name.
    pub const SPAN_ID: &'static str = "x-span-id";
    /// The parent span id header name.
    pub const PARENT_SPAN_ID: &'static str = "x-parent-span-id";
    /// The sampling flag header name.
    pub const SAMPLED: &'static str = "x-trace-sampled";
    /// The baggage header name.
    pub const BAGGAGE: &'static str = "x-trace-baggage";

    /// All header names written by [`inject`](Propagator::inject).
    pub const FIELDS: [&'static str; 5] = [
        Self::TRACE_ID,
        Self::SPAN_ID,
        Self::PARENT_SPAN_ID,
        Self::SAMPLED,
        Self::BAGGAGE,
    ];
}

impl Propagator for HttpHeaderPropagator {
    fn extract<E: Extractor + ?Sized>(&self, carrier: &E) -> Result<Option<TraceContext>, Error> {
        let trace_id = field(carrier, Self::TRACE_ID)?;
        let span_id = field(carrier, Self::SPAN_ID)?;

        let (trace_id, span_id) = match (trace_id, span_id) {
            (None, None) => return Ok(None),
            (Some(trace_id), Some(span_id)) => (trace_id, span_id),
            (Some(_), None) => {
                return Err(Error::malformed_carrier(format!(
                    "{} present without {}",
                    Self::TRACE_ID,
                    Self::SPAN_ID
                )));
            }
            (None, Some(_)) => {
                return Err(Error::malformed_carrier(format!(
                    "{} present without {}",
                    Self::SPAN_ID,
                    Self::TRACE_ID
                )));
            }
        };

        let mut ctx = TraceContext::new(
            TraceId::from_hex(trace_id.trim())?,
            SpanId::from_hex(span_id.trim())?,
        );

        if let Some(parent) = field(carrier, Self::PARENT_SPAN_ID)? {
            ctx = ctx.with_parent(SpanId::from_hex(parent.trim())?);
        }

        if let Some(sampled) = field(carrier, Self::SAMPLED)? {
            ctx = ctx.with_sampled(parse_sampled(sampled)?);
        }

        if let Some(baggage) = field(carrier, Self::BAGGAGE)? {
            for (key, value) in parse_baggage(baggage)? {
                ctx = ctx.with_baggage_item(key, value);
            }
        }

        Ok(Some(ctx))
    }

    fn inject<I: Injector + ?Sized>(
        &self,
        context: &TraceContext,
        carrier: &mut I,
    ) -> Result<(), Error> {
        context.validate()?;

        carrier.set(Self::TRACE_ID, context.trace_id().to_string());
        carrier.set(Self::SPAN_ID, context.span_id().to_string());
        if let Some(parent) = context.parent_span_id() {
            carrier.set(Self::PARENT_SPAN_ID, parent.to_string());
        }
        carrier.set(
            Self::SAMPLED,
            if context.is_sampled() { "1" } else { "0" }.to_string(),
        );
        if !context.baggage().is_empty() {
            carrier.set(Self::BAGGAGE, format_baggage(context));
        }
        Ok(())
    }
}

/// Reads one field; a key that is present but not readable as text is
/// malformed rather than absent.
fn field<'c, E: Extractor + ?Sized>(carrier: &'c E, key: &str) -> Result<Option<&'c str>, Error> {
    match carrier.get(key) {
        Some(value) => Ok(Some(value)),
        None if carrier.contains(key) => Err(Error::malformed_carrier(format!(
            "{key} is not visible ASCII"
        ))),
        None => Ok(None),
    }
}

fn parse_sampled(value: &str) -> Result<bool, Error> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(Error::malformed_carrier(format!(
            "invalid sampling flag {other:?}"
        ))),
    }
}

fn format_baggage(context: &TraceContext) -> String {
    context
        .baggage()
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_baggage(header: &str) -> Result<Vec<(String, String)>, Error> {
    let mut items = Vec::new();
    for item in header.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| Error::malformed_carrier(format!("baggage item {item:?} has no '='")))?;
        let key = urlencoding::decode(key.trim())
            .map_err(|e| Error::malformed_carrier("baggage key is not UTF-8").with_source(e))?;
        let value = urlencoding::decode(value.trim())
            .map_err(|e| Error::malformed_carrier("baggage value is not UTF-8").with_source(e))?;
        items.push((key.into_owned(), value.into_owned()));
    }
    Ok(items)
}
