//! Delivery metadata
//!
//! TigerStyle: Immutable after dispatch begins, one write to `received_at_ms`.

use crate::actor::Actor;
use troupe_core::ThreadId;

/// Per-delivery headers chosen by the sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Ask the receiver's engine for a receipt (Delivery, Failure or Bounce)
    pub receipt_id: Option<String>,
    /// Tag the message as part of a conversation
    pub thread_id: Option<ThreadId>,
    /// Sender's declared clock skew, added to its local clock for `sent_at_ms`
    pub clock_offset_ms: i64,
}

impl Headers {
    /// Empty headers
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a receipt tagged with `receipt_id`
    pub fn with_receipt(mut self, receipt_id: impl Into<String>) -> Self {
        self.receipt_id = Some(receipt_id.into());
        self
    }

    /// Tag with a conversation thread
    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Declare the sender's clock skew
    pub fn with_clock_offset_ms(mut self, offset_ms: i64) -> Self {
        self.clock_offset_ms = offset_ms;
        self
    }

    /// Copy that keeps only the thread id
    ///
    /// Used for replies generated by the runtime so they never ask for a
    /// receipt of their own.
    pub fn thread_only(&self) -> Self {
        Self {
            receipt_id: None,
            thread_id: self.thread_id.clone(),
            clock_offset_ms: 0,
        }
    }
}

/// Metadata wrapped around one delivery
#[derive(Debug, Clone)]
pub struct Envelope {
    sender: Option<Actor>,
    headers: Headers,
    sent_at_ms: u64,
    received_at_ms: Option<u64>,
    prevent_receipt: bool,
}

impl Envelope {
    /// Envelope stamped with the sender's clock
    pub(crate) fn new(sender: Option<Actor>, headers: Headers, now_ms: u64) -> Self {
        let sent_at_ms = now_ms.saturating_add_signed(headers.clock_offset_ms);
        Self {
            sender,
            headers,
            sent_at_ms,
            received_at_ms: None,
            prevent_receipt: false,
        }
    }

    /// Envelope for runtime-generated deliveries, never answered with a receipt
    pub(crate) fn system(sender: Option<Actor>, headers: Headers, now_ms: u64) -> Self {
        let mut envelope = Self::new(sender, headers, now_ms);
        envelope.prevent_receipt = true;
        envelope
    }

    /// Actor that sent the message, if any
    pub fn sender(&self) -> Option<&Actor> {
        self.sender.as_ref()
    }

    /// Headers as sent
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Conversation thread, if any
    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.headers.thread_id.as_ref()
    }

    /// Sender clock plus declared offset, in ms since epoch
    pub fn sent_at_ms(&self) -> u64 {
        self.sent_at_ms
    }

    /// When dispatch began, `None` until then
    pub fn received_at_ms(&self) -> Option<u64> {
        self.received_at_ms
    }

    /// Time spent between send and dispatch, tolerant to declared skew
    pub fn queued_ms(&self) -> Option<u64> {
        self.received_at_ms
            .map(|received| received.saturating_sub(self.sent_at_ms))
    }

    /// Whether the engine must answer this delivery with a receipt
    pub fn wants_receipt(&self) -> bool {
        !self.prevent_receipt && self.sender.is_some() && self.headers.receipt_id.is_some()
    }

    /// Whether the runtime generated this delivery
    pub fn is_system(&self) -> bool {
        self.prevent_receipt
    }

    /// Stamp the dispatch time; later calls are ignored
    pub(crate) fn mark_received(&mut self, now_ms: u64) {
        if self.received_at_ms.is_none() {
            self.received_at_ms = Some(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_only_strips_receipt() {
        let thread = ThreadId::new("t-1").unwrap();
        let headers = Headers::new()
            .with_receipt("r1")
            .with_thread(thread.clone())
            .with_clock_offset_ms(-20);

        let stripped = headers.thread_only();
        assert_eq!(stripped.receipt_id, None);
        assert_eq!(stripped.thread_id, Some(thread));
        assert_eq!(stripped.clock_offset_ms, 0);
    }

    #[test]
    fn test_sent_at_applies_offset() {
        let envelope = Envelope::new(None, Headers::new().with_clock_offset_ms(-250), 1_000);
        assert_eq!(envelope.sent_at_ms(), 750);

        let envelope = Envelope::new(None, Headers::new().with_clock_offset_ms(40), 1_000);
        assert_eq!(envelope.sent_at_ms(), 1_040);
    }

    #[test]
    fn test_received_at_set_once() {
        let mut envelope = Envelope::new(None, Headers::new(), 100);
        assert_eq!(envelope.received_at_ms(), None);

        envelope.mark_received(130);
        envelope.mark_received(500);
        assert_eq!(envelope.received_at_ms(), Some(130));
        assert_eq!(envelope.queued_ms(), Some(30));
    }

    #[test]
    fn test_receipt_requires_sender() {
        let envelope = Envelope::new(None, Headers::new().with_receipt("r1"), 0);
        assert!(!envelope.wants_receipt());
    }
}
