//! Message queue transport.
//!
//! Queue payloads have no headers, so trace context travels inside the body
//! as a length-prefixed frame (see [`BinaryPropagator`]). [`TracedQueue`]
//! frames outgoing payloads and unframes incoming ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::tracing_support::{
    tag_keys, ActiveSpan, BinaryPropagator, SpanKind, TagValue, Tracer,
};
use crate::Error;

/// Default per-subscriber buffer of [`MemoryQueue`].
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// A subject-based publish/subscribe queue with request/reply.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Delivers `payload` to every current subscriber of `channel`.
    ///
    /// Delivery is at most once; publishing with no subscribers succeeds.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), Error>;

    /// Subscribes to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, Error>;

    /// Publishes `payload` with a reply handle and waits for the first reply.
    ///
    /// Fails with `Unavailable` if nobody is subscribed and with `Timeout`
    /// if no reply arrives in time.
    async fn request(&self, channel: &str, payload: Bytes, timeout: Duration)
        -> Result<Bytes, Error>;
}

/// Where a reply to a request goes. Shared by every subscriber that received
/// the request; the first response wins.
#[derive(Clone)]
pub struct ReplyHandle {
    tx: Arc<Mutex<Option<oneshot::Sender<Bytes>>>>,
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("answered", &self.tx.lock().is_none())
            .finish()
    }
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: String,
    /// The message body, framed or not.
    pub payload: Bytes,
    reply: Option<ReplyHandle>,
}

impl Message {
    /// Creates a message without a reply handle.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    /// Returns `true` if the sender waits for a reply.
    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Sends a reply. Returns `false` if there is no reply handle, someone
    /// already replied, or the requester stopped waiting.
    pub fn respond(&self, payload: impl Into<Bytes>) -> bool {
        let Some(reply) = &self.reply else {
            return false;
        };
        match reply.tx.lock().take() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }
}

/// A stream of messages for one channel. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    /// Returns the subscribed channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message. Returns `None` once the queue is gone.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

// ============================================================================
// In-memory queue
// ============================================================================

/// An in-process queue with subject fan-out.
#[derive(Debug)]
pub struct MemoryQueue {
    subjects: Mutex<HashMap<String, Vec<mpsc::Sender<Message>>>>,
    buffer: usize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Creates a queue with the default subscriber buffer.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates a queue whose subscribers buffer up to `buffer` messages.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Returns the number of channels with at least one live subscriber.
    pub fn channel_count(&self) -> usize {
        let mut subjects = self.subjects.lock();
        prune(&mut subjects);
        subjects.len()
    }

    /// Returns the number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subjects
            .lock()
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Delivers a message, returning how many subscribers got it.
    fn deliver(&self, message: Message) -> usize {
        let mut subjects = self.subjects.lock();
        let Some(subscribers) = subjects.get_mut(&message.channel) else {
            return 0;
        };
        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.is_empty() {
            subjects.remove(&message.channel);
            return 0;
        }

        let mut delivered = 0;
        for tx in subscribers.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(channel = %message.channel, "subscriber buffer full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// Drops closed subscribers and the channels left without any.
fn prune(subjects: &mut HashMap<String, Vec<mpsc::Sender<Message>>>) {
    subjects.retain(|_, subscribers| {
        subscribers.retain(|tx| !tx.is_closed());
        !subscribers.is_empty()
    });
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), Error> {
        let delivered = self.deliver(Message::new(channel, payload));
        tracing::trace!(channel, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut subjects = self.subjects.lock();
        prune(&mut subjects);
        subjects.entry(channel.to_string()).or_default().push(tx);
        drop(subjects);
        Ok(Subscription {
            channel: channel.to_string(),
            rx,
        })
    }

    async fn request(
        &self,
        channel: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, Error> {
        let (tx, rx) = oneshot::channel();
        let message = Message {
            channel: channel.to_string(),
            payload,
            reply: Some(ReplyHandle {
                tx: Arc::new(Mutex::new(Some(tx))),
            }),
        };

        if self.deliver(message) == 0 {
            return Err(Error::unavailable(format!("no responders on {channel}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::unavailable(format!(
                "responders on {channel} dropped the request"
            ))),
            Err(_) => Err(Error::timeout(format!(
                "no reply on {channel} within {timeout:?}"
            ))),
        }
    }
}

// ============================================================================
// Traced queue
// ============================================================================

/// A queue wrapper that carries trace context in every message body.
#[derive(Clone)]
pub struct TracedQueue {
    queue: Arc<dyn Queue>,
    tracer: Tracer,
}

impl fmt::Debug for TracedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedQueue")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl TracedQueue {
    /// Wraps `queue`; spans are reported through `tracer`.
    pub fn new(queue: Arc<dyn Queue>, tracer: Tracer) -> Self {
        Self { queue, tracer }
    }

    /// Returns the tracer used for consumer spans.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Publishes `payload` framed with the context of `span`.
    ///
    /// The span is tagged with the channel; a failure is recorded on it.
    pub async fn publish(
        &self,
        span: &mut ActiveSpan,
        channel: &str,
        payload: &[u8],
    ) -> Result<(), Error> {
        span.set_tag(tag_keys::MESSAGE_CHANNEL, channel);
        let result = match BinaryPropagator.inject(Some(span.context()), payload) {
            Ok(frame) => self.queue.publish(channel, frame).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            span.set_error(err);
        }
        result
    }

    /// Sends a framed request and waits for the reply.
    ///
    /// A timeout or missing responder is recorded on the span.
    pub async fn request(
        &self,
        span: &mut ActiveSpan,
        channel: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes, Error> {
        span.set_tag(tag_keys::MESSAGE_CHANNEL, channel);
        let result = match BinaryPropagator.inject(Some(span.context()), payload) {
            Ok(frame) => self.queue.request(channel, frame, timeout).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            span.set_error(err);
        }
        result
    }

    /// Subscribes to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
        self.queue.subscribe(channel).await
    }

    /// Unframes a received message and starts its consumer span.
    ///
    /// A message without context starts a new trace. A message whose frame
    /// cannot be decoded also starts a new trace, tagged `carrier.malformed`,
    /// and its whole body is returned as the payload.
    pub fn receive(&self, message: &Message, operation_name: &str) -> (ActiveSpan, Bytes) {
        let (extracted, payload) = match BinaryPropagator.extract(message.payload.clone()) {
            Ok(frame) => (Ok(frame.context), frame.payload),
            Err(err) => {
                tracing::debug!(channel = %message.channel, error = %err, "malformed queue frame");
                (Err(err), message.payload.clone())
            }
        };

        let span = self
            .tracer
            .span(operation_name)
            .kind(SpanKind::Consumer)
            .tag(tag_keys::MESSAGE_CHANNEL, TagValue::from(message.channel.as_str()))
            .child_of_extracted(extracted)
            .start();
        (span, payload)
    }
}
