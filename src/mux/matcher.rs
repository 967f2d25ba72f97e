//! Connection matchers and routing rules.
//!
//! A matcher looks at the bytes buffered so far and answers [`Verdict::Match`],
//! [`Verdict::Mismatch`] or [`Verdict::Incomplete`]. Matchers are pure: the
//! same prefix always yields the same verdict, and a longer prefix never
//! turns a decided verdict back into `Incomplete`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// HTTP/2 client connection preface.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// Result of checking a prefix against a matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The prefix belongs to this protocol.
    Match,
    /// The prefix can never belong to this protocol.
    Mismatch,
    /// More bytes are needed.
    Incomplete,
}

/// The engine a connection is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP/2 gRPC.
    Rpc,
    /// HTTP/1.x REST.
    Rest,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Rpc => write!(f, "rpc"),
            Protocol::Rest => write!(f, "rest"),
        }
    }
}

/// Inspects a connection prefix.
pub trait Matcher: Send + Sync + fmt::Debug + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks the bytes buffered so far.
    fn check(&self, prefix: &[u8]) -> Verdict;
}

/// Compares `prefix` against a fixed byte string.
fn starts_with_verdict(prefix: &[u8], expected: &[u8]) -> Verdict {
    let n = prefix.len().min(expected.len());
    if prefix[..n] != expected[..n] {
        Verdict::Mismatch
    } else if n < expected.len() {
        Verdict::Incomplete
    } else {
        Verdict::Match
    }
}

/// Matches the HTTP/2 connection preface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http2Preface;

impl Matcher for Http2Preface {
    fn name(&self) -> &'static str {
        "http2-preface"
    }

    fn check(&self, prefix: &[u8]) -> Verdict {
        starts_with_verdict(prefix, HTTP2_PREFACE)
    }
}

/// Matches an HTTP/2 connection whose first HEADERS frame carries a header
/// field starting with a given value.
///
/// Frames before the first HEADERS frame (SETTINGS, WINDOW_UPDATE, ...) are
/// skipped. The header block is HPACK-decoded with a fresh decoder, which is
/// exact for the first block of a connection.
#[derive(Debug, Clone)]
pub struct Http2HeaderField {
    name: String,
    value_prefix: String,
}

impl Http2HeaderField {
    /// Matches when header `name` starts with `value_prefix`.
    pub fn new(name: impl Into<String>, value_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            value_prefix: value_prefix.into(),
        }
    }

    /// Matches gRPC requests: `content-type: application/grpc*`.
    pub fn grpc() -> Self {
        Self::new("content-type", "application/grpc")
    }

    fn check_block(&self, block: &[u8]) -> Verdict {
        // hpack panics on some malformed integer encodings
        let decoded = catch_unwind(AssertUnwindSafe(|| hpack::Decoder::new().decode(block)));
        let Ok(Ok(fields)) = decoded else {
            return Verdict::Mismatch;
        };

        let found = fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(self.name.as_bytes()));
        match found {
            Some((_, value)) if value.starts_with(self.value_prefix.as_bytes()) => Verdict::Match,
            _ => Verdict::Mismatch,
        }
    }
}

impl Matcher for Http2HeaderField {
    fn name(&self) -> &'static str {
        "http2-header-field"
    }

    fn check(&self, prefix: &[u8]) -> Verdict {
        match starts_with_verdict(prefix, HTTP2_PREFACE) {
            Verdict::Match => {}
            other => return other,
        }

        match first_header_block(&prefix[HTTP2_PREFACE.len()..]) {
            HeaderBlock::Complete(block) => self.check_block(&block),
            HeaderBlock::Incomplete => Verdict::Incomplete,
            HeaderBlock::Invalid => Verdict::Mismatch,
        }
    }
}

enum HeaderBlock {
    Complete(Vec<u8>),
    Incomplete,
    Invalid,
}

/// Walks HTTP/2 frames and assembles the first header block, following
/// CONTINUATION frames until END_HEADERS.
fn first_header_block(mut frames: &[u8]) -> HeaderBlock {
    let mut block: Option<Vec<u8>> = None;

    loop {
        if frames.len() < FRAME_HEADER_LEN {
            return HeaderBlock::Incomplete;
        }
        let len = u32::from_be_bytes([0, frames[0], frames[1], frames[2]]) as usize;
        let frame_type = frames[3];
        let flags = frames[4];
        let Some(payload) = frames.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len) else {
            return HeaderBlock::Incomplete;
        };
        frames = &frames[FRAME_HEADER_LEN + len..];

        match block.take() {
            None if frame_type == FRAME_HEADERS => {
                let Some(fragment) = headers_fragment(payload, flags) else {
                    return HeaderBlock::Invalid;
                };
                if flags & FLAG_END_HEADERS != 0 {
                    return HeaderBlock::Complete(fragment.to_vec());
                }
                block = Some(fragment.to_vec());
            }
            None => {}
            Some(mut acc) if frame_type == FRAME_CONTINUATION => {
                acc.extend_from_slice(payload);
                if flags & FLAG_END_HEADERS != 0 {
                    return HeaderBlock::Complete(acc);
                }
                block = Some(acc);
            }
            // anything but CONTINUATION inside a header block is a protocol error
            Some(_) => return HeaderBlock::Invalid,
        }
    }
}

/// Strips padding and priority fields from a HEADERS payload.
fn headers_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut end = payload.len();

    if flags & FLAG_PADDED != 0 {
        let pad = *payload.first()? as usize;
        start += 1;
        end = end.checked_sub(pad)?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }

    payload.get(start..end)
}

/// Methods recognized by [`Http1Fast`].
pub const HTTP1_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Matches an HTTP/1.x request line by its method token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Fast;

impl Matcher for Http1Fast {
    fn name(&self) -> &'static str {
        "http1-fast"
    }

    fn check(&self, prefix: &[u8]) -> Verdict {
        let mut verdict = Verdict::Mismatch;
        for method in HTTP1_METHODS {
            let n = method.len();
            match starts_with_verdict(prefix, method.as_bytes()) {
                Verdict::Match => match prefix.get(n) {
                    Some(b' ') => return Verdict::Match,
                    None => verdict = Verdict::Incomplete,
                    Some(_) => {}
                },
                Verdict::Incomplete => verdict = Verdict::Incomplete,
                Verdict::Mismatch => {}
            }
        }
        verdict
    }
}

/// Matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

impl Matcher for Any {
    fn name(&self) -> &'static str {
        "any"
    }

    fn check(&self, _prefix: &[u8]) -> Verdict {
        Verdict::Match
    }
}

/// A protocol and the matchers that select it.
///
/// The rule matches when any matcher matches and mismatches when all of
/// them do.
#[derive(Debug)]
pub struct Rule {
    protocol: Protocol,
    matchers: Vec<Box<dyn Matcher>>,
}

impl Rule {
    /// Creates a rule with no matchers. It mismatches everything until one
    /// is added.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            matchers: Vec::new(),
        }
    }

    /// Adds a matcher.
    #[must_use]
    pub fn with(mut self, matcher: impl Matcher) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// The gRPC rule: HTTP/2 preface or a gRPC content type.
    pub fn rpc() -> Self {
        Self::new(Protocol::Rpc)
            .with(Http2Preface)
            .with(Http2HeaderField::grpc())
    }

    /// The catch-all REST rule.
    pub fn rest() -> Self {
        Self::new(Protocol::Rest).with(Any)
    }

    /// Returns the protocol this rule routes to.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Checks every matcher against the same prefix.
    pub fn check(&self, prefix: &[u8]) -> Verdict {
        let mut verdict = Verdict::Mismatch;
        for matcher in &self.matchers {
            match matcher.check(prefix) {
                Verdict::Match => return Verdict::Match,
                Verdict::Incomplete => verdict = Verdict::Incomplete,
                Verdict::Mismatch => {}
            }
        }
        verdict
    }
}

/// The default rule set: gRPC first, then REST.
pub fn default_rules() -> Vec<Rule> {
    vec![Rule::rpc(), Rule::rest()]
}

/// Decides a protocol from the rules in priority order.
///
/// Returns `None` while the first undecided rule needs more bytes. If every
/// rule mismatches the connection is REST.
pub fn decide(rules: &[Rule], prefix: &[u8]) -> Option<Protocol> {
    for rule in rules {
        match rule.check(prefix) {
            Verdict::Match => return Some(rule.protocol()),
            Verdict::Incomplete => return None,
            Verdict::Mismatch => {}
        }
    }
    Some(Protocol::Rest)
}
