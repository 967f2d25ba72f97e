//! Binary trace context carrier for queue messages.
//!
//! A queue message body is a self-delimiting frame:
//!
//! ```text
//! +----------------+------------------------+-------------------+
//! | u32 BE length  | context bytes (length) | payload (rest)    |
//! +----------------+------------------------+-------------------+
//! ```
//!
//! The length counts the context bytes only. A length of zero means the
//! publisher had no context. Context bytes are laid out as:
//!
//! ```text
//! version u8 (=1)
//! trace_id [u8; 16]
//! span_id [u8; 8]
//! flags u8                (bit 0: sampled, bit 1: has parent)
//! parent_span_id [u8; 8]  (only when bit 1 is set)
//! baggage count u16 BE
//! count x (key_len u16 BE, key, value_len u16 BE, value)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::tracing_support::context::{SpanId, TraceContext, TraceId};
use crate::Error;

const LENGTH_PREFIX: usize = 4;
const VERSION: u8 = 1;
const FLAG_SAMPLED: u8 = 0b01;
const FLAG_PARENT: u8 = 0b10;

/// A decoded queue frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The trace context, if the publisher sent one.
    pub context: Option<TraceContext>,
    /// The application payload, byte-for-byte as published.
    pub payload: Bytes,
}

/// Moves a [`TraceContext`] in and out of queue frames.
///
/// ## Example
///
/// ```rust
/// use tracemux::tracing_support::{BinaryPropagator, SpanId, TraceContext, TraceId};
///
/// let ctx = TraceContext::new(TraceId::from_u128(1), SpanId::from_u64(2));
/// let frame = BinaryPropagator.inject(Some(&ctx), br#"{"value":"x"}"#).unwrap();
///
/// let decoded = BinaryPropagator.extract(frame).unwrap();
/// assert_eq!(decoded.context, Some(ctx));
/// assert_eq!(&decoded.payload[..], br#"{"value":"x"}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryPropagator;

impl BinaryPropagator {
    /// Builds a frame from an optional context and a payload.
    pub fn inject(&self, context: Option<&TraceContext>, payload: &[u8]) -> Result<Bytes, Error> {
        let encoded = match context {
            Some(ctx) => encode_context(ctx)?,
            None => Bytes::new(),
        };

        let len = u32::try_from(encoded.len())
            .map_err(|_| Error::invalid_context("encoded context exceeds u32::MAX bytes"))?;

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + encoded.len() + payload.len());
        frame.put_u32(len);
        frame.put_slice(&encoded);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    /// Splits a frame into its context and payload.
    ///
    /// A buffer shorter than the length prefix, a length that exceeds the
    /// buffer, or context bytes that do not decode cleanly all fail with
    /// [`ErrorKind::MalformedCarrier`](crate::ErrorKind::MalformedCarrier).
    pub fn extract(&self, mut frame: Bytes) -> Result<Frame, Error> {
        if frame.len() < LENGTH_PREFIX {
            return Err(Error::malformed_carrier(format!(
                "frame of {} bytes is shorter than its length prefix",
                frame.len()
            )));
        }

        let len = frame.get_u32() as usize;
        if len > frame.len() {
            return Err(Error::malformed_carrier(format!(
                "length prefix {} exceeds remaining {} bytes",
                len,
                frame.len()
            )));
        }

        let context_bytes = frame.split_to(len);
        let context = if context_bytes.is_empty() {
            None
        } else {
            Some(decode_context(context_bytes)?)
        };

        Ok(Frame {
            context,
            payload: frame,
        })
    }
}

fn encode_context(ctx: &TraceContext) -> Result<Bytes, Error> {
    ctx.validate()?;

    let mut buf = BytesMut::with_capacity(40);
    buf.put_u8(VERSION);
    buf.put_slice(ctx.trace_id().as_bytes());
    buf.put_slice(ctx.span_id().as_bytes());

    let mut flags = 0;
    if ctx.is_sampled() {
        flags |= FLAG_SAMPLED;
    }
    if ctx.parent_span_id().is_some() {
        flags |= FLAG_PARENT;
    }
    buf.put_u8(flags);
    if let Some(parent) = ctx.parent_span_id() {
        buf.put_slice(parent.as_bytes());
    }

    let count = u16::try_from(ctx.baggage().len())
        .map_err(|_| Error::invalid_context("too many baggage items"))?;
    buf.put_u16(count);
    for (key, value) in ctx.baggage() {
        put_str(&mut buf, key)?;
        put_str(&mut buf, value)?;
    }

    Ok(buf.freeze())
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), Error> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::invalid_context("baggage entry longer than 65535 bytes"))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn need(buf: &Bytes, n: usize, field: &str) -> Result<(), Error> {
    if buf.remaining() < n {
        return Err(Error::malformed_carrier(format!(
            "context truncated in {field}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_str(buf: &mut Bytes, field: &str) -> Result<String, Error> {
    need(buf, 2, field)?;
    let len = buf.get_u16() as usize;
    need(buf, len, field)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::malformed_carrier(format!("{field} is not UTF-8")).with_source(e))
}

fn decode_context(mut buf: Bytes) -> Result<TraceContext, Error> {
    need(&buf, 1, "version")?;
    let version = buf.get_u8();
    if version != VERSION {
        return Err(Error::malformed_carrier(format!(
            "unsupported context version {version}"
        )));
    }

    need(&buf, 16 + 8 + 1, "ids")?;
    let mut trace_id = [0u8; 16];
    buf.copy_to_slice(&mut trace_id);
    let mut span_id = [0u8; 8];
    buf.copy_to_slice(&mut span_id);
    let flags = buf.get_u8();

    let trace_id = TraceId::from_bytes(trace_id);
    let span_id = SpanId::from_bytes(span_id);
    if trace_id.is_zero() || span_id.is_zero() {
        return Err(Error::malformed_carrier("context carries a zero id"));
    }

    let mut ctx = TraceContext::new(trace_id, span_id).with_sampled(flags & FLAG_SAMPLED != 0);

    if flags & FLAG_PARENT != 0 {
        need(&buf, 8, "parent span id")?;
        let mut parent = [0u8; 8];
        buf.copy_to_slice(&mut parent);
        let parent = SpanId::from_bytes(parent);
        if parent.is_zero() {
            return Err(Error::malformed_carrier("context carries a zero parent span id"));
        }
        ctx = ctx.with_parent(parent);
    }

    need(&buf, 2, "baggage count")?;
    let count = buf.get_u16();
    for _ in 0..count {
        let key = get_str(&mut buf, "baggage key")?;
        let value = get_str(&mut buf, "baggage value")?;
        ctx = ctx.with_baggage_item(key, value);
    }

    if buf.has_remaining() {
        return Err(Error::malformed_carrier(format!(
            "{} trailing bytes after context",
            buf.remaining()
        )));
    }

    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use proptest::prelude::*;

    fn sample_context() -> TraceContext {
        TraceContext::new(TraceId::from_u128(1), SpanId::from_u64(2))
    }

    #[test]
    fn test_scenario_frame() {
        let payload = br#"{"value":"x"}"#;
        assert_eq!(payload.len(), 13);

        let frame = BinaryPropagator.inject(Some(&sample_context()), payload).unwrap();
        let ctx_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(frame.len(), LENGTH_PREFIX + ctx_len + payload.len());

        let decoded = BinaryPropagator.extract(frame).unwrap();
        let ctx = decoded.context.unwrap();
        assert_eq!(ctx.trace_id(), TraceId::from_u128(1));
        assert_eq!(ctx.span_id(), SpanId::from_u64(2));
        assert_eq!(&decoded.payload[..], payload);
    }

    #[test]
    fn test_no_context() {
        let frame = BinaryPropagator.inject(None, b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 0]);

        let decoded = BinaryPropagator.extract(frame).unwrap();
        assert!(decoded.context.is_none());
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn test_truncated_frames() {
        let frame = BinaryPropagator
            .inject(Some(&sample_context().with_baggage_item("k", "v")), b"")
            .unwrap();

        // every strict prefix either lacks the length prefix or the context
        for cut in 0..frame.len() {
            let err = BinaryPropagator.extract(frame.slice(..cut)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedCarrier, "cut at {cut}");
        }
    }

    #[test]
    fn test_length_prefix_exceeds_buffer() {
        let mut frame = BytesMut::new();
        frame.put_u32(1000);
        frame.put_slice(b"short");

        let err = BinaryPropagator.extract(frame.freeze()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedCarrier);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut frame = BytesMut::new();
        frame.put_u32(1);
        frame.put_u8(9);

        let err = BinaryPropagator.extract(frame.freeze()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedCarrier);
        assert!(err.message().contains("version"));
    }

    #[test]
    fn test_rejects_trailing_context_bytes() {
        let encoded = encode_context(&sample_context()).unwrap();
        let mut frame = BytesMut::new();
        frame.put_u32(encoded.len() as u32 + 1);
        frame.put_slice(&encoded);
        frame.put_u8(0xff);

        let err = BinaryPropagator.extract(frame.freeze()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedCarrier);
    }

    #[test]
    fn test_rejects_zero_parent_span_id() {
        let mut context = BytesMut::new();
        context.put_u8(VERSION);
        context.put_u128(1);
        context.put_u64(2);
        context.put_u8(FLAG_SAMPLED | FLAG_PARENT);
        context.put_u64(0);
        context.put_u16(0);

        let mut frame = BytesMut::new();
        frame.put_u32(context.len() as u32);
        frame.put_slice(&context);
        frame.put_slice(b"{}");

        let err = BinaryPropagator.extract(frame.freeze()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedCarrier);
    }

    #[test]
    fn test_inject_rejects_zero_parent() {
        let ctx = TraceContext::new(TraceId::from_u128(1), SpanId::from_u64(2))
            .with_parent(SpanId::from_u64(0));
        let err = BinaryPropagator.inject(Some(&ctx), b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContext);
    }

    #[test]
    fn test_inject_rejects_zero_ids() {
        let ctx = TraceContext::new(TraceId::from_u128(0), SpanId::from_u64(2));
        let err = BinaryPropagator.inject(Some(&ctx), b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContext);
    }

    proptest! {
        #[test]
        fn prop_frame_is_self_delimiting(
            trace in 1u128..=u128::MAX,
            span in 1u64..=u64::MAX,
            parent in proptest::option::of(1u64..=u64::MAX),
            sampled in any::<bool>(),
            baggage in proptest::collection::btree_map(".{0,6}", ".{0,6}", 0..4),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut ctx = TraceContext::new(TraceId::from_u128(trace), SpanId::from_u64(span))
                .with_sampled(sampled);
            if let Some(parent) = parent {
                ctx = ctx.with_parent(SpanId::from_u64(parent));
            }
            for (k, v) in baggage {
                ctx = ctx.with_baggage_item(k, v);
            }

            let frame = BinaryPropagator.inject(Some(&ctx), &payload).unwrap();
            let decoded = BinaryPropagator.extract(frame).unwrap();
            prop_assert_eq!(decoded.context, Some(ctx));
            prop_assert_eq!(&decoded.payload[..], &payload[..]);
        }

        #[test]
        fn prop_extract_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = BinaryPropagator.extract(Bytes::from(bytes));
        }
    }
}
