//! The worker node: consumes jobs from the queue.

use std::time::Duration;

use crate::transport::queue::{Message, Subscription, TracedQueue};

/// Number of simulated progress steps per job.
pub const PROGRESS_STEPS: u32 = 10;

/// Consumes jobs, one `worker-response` span per message.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: TracedQueue,
    step_delay: Duration,
}

impl Worker {
    /// Creates a worker; consumer spans are reported through the queue's
    /// tracer.
    pub fn new(queue: TracedQueue) -> Self {
        Self {
            queue,
            step_delay: Duration::from_millis(1),
        }
    }

    /// Sets the pause between progress steps.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Handles messages until the subscription ends.
    pub async fn run(self, mut subscription: Subscription) {
        tracing::info!(channel = subscription.channel(), "worker consuming");
        while let Some(message) = subscription.next().await {
            self.handle(&message).await;
        }
        tracing::info!(channel = subscription.channel(), "worker subscription closed");
    }

    /// Processes one job.
    ///
    /// Replies `OK` when the message came from a request; a published
    /// message gets no reply.
    pub async fn handle(&self, message: &Message) {
        let (mut span, payload) = self.queue.receive(message, "worker-response");
        span.log([
            ("request.channel", message.channel.as_str()),
            ("request.data", String::from_utf8_lossy(&payload).as_ref()),
        ]);

        for step in 1..=PROGRESS_STEPS {
            tokio::time::sleep(self.step_delay).await;
            span.log([("progress", format!("{}%", step * 100 / PROGRESS_STEPS))]);
        }

        if message.has_reply() && !message.respond("OK") {
            span.set_error(&"requester is gone");
        }
        span.finish();
    }
}
