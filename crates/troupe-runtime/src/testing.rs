//! Test helpers
//!
//! TigerStyle: Observe actors from the outside, fail loudly on surprises.
//!
//! A [`Probe`] is a behavior that forwards everything it receives to a
//! channel, so tests can assert on receipts, notifications and signals in the
//! order they were processed.

use crate::behavior::Behavior;
use crate::context::Context;
use crate::envelope::Envelope;
use crate::message::Message;
use async_trait::async_trait;
use std::any::Any;
use std::time::Duration;
use tokio::sync::mpsc;
use troupe_core::Result;

/// How long the expect helpers wait before giving up
pub const PROBE_WAIT_MS_DEFAULT: u64 = 1_000;

/// One message as the probe saw it
#[derive(Debug, Clone)]
pub struct Received {
    pub message: Message,
    pub envelope: Envelope,
}

/// Behavior that records every message it processes
pub struct Probe {
    tx: mpsc::UnboundedSender<Received>,
}

impl Probe {
    /// Create a probe and the receiver its messages go to
    pub fn new() -> (Self, ProbeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ProbeReceiver { rx })
    }
}

#[async_trait]
impl Behavior for Probe {
    async fn message(
        &mut self,
        msg: Message,
        envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        // Receiver dropped means the test no longer cares
        let _ = self.tx.send(Received {
            message: msg,
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

/// Receiving side of a [`Probe`]
pub struct ProbeReceiver {
    rx: mpsc::UnboundedReceiver<Received>,
}

impl ProbeReceiver {
    /// Next message, or `None` once the probe is gone
    pub async fn recv(&mut self) -> Option<Received> {
        self.rx.recv().await
    }

    /// Next message if one is already waiting
    pub fn try_recv(&mut self) -> Option<Received> {
        self.rx.try_recv().ok()
    }

    /// Next message, which must be a `T`
    ///
    /// # Panics
    /// On timeout or on a message of another type.
    pub async fn expect<T: Any + Clone>(&mut self) -> T {
        let received = self.next_within(PROBE_WAIT_MS_DEFAULT).await;
        match received.message.downcast_ref::<T>() {
            Some(value) => value.clone(),
            None => panic!(
                "expected {}, got {}",
                std::any::type_name::<T>(),
                received.message.type_name()
            ),
        }
    }

    /// Next message, which must be a `T`, with its envelope
    pub async fn expect_with_envelope<T: Any + Clone>(&mut self) -> (T, Envelope) {
        let received = self.next_within(PROBE_WAIT_MS_DEFAULT).await;
        match received.message.downcast_ref::<T>() {
            Some(value) => (value.clone(), received.envelope),
            None => panic!(
                "expected {}, got {}",
                std::any::type_name::<T>(),
                received.message.type_name()
            ),
        }
    }

    /// Skip messages until a `T` arrives
    pub async fn next_of<T: Any + Clone>(&mut self) -> T {
        loop {
            let received = self.next_within(PROBE_WAIT_MS_DEFAULT).await;
            if let Some(value) = received.message.downcast_ref::<T>() {
                return value.clone();
            }
        }
    }

    /// Assert nothing arrives for `wait_ms`
    pub async fn expect_quiet(&mut self, wait_ms: u64) {
        if let Ok(Some(received)) =
            tokio::time::timeout(Duration::from_millis(wait_ms), self.rx.recv()).await
        {
            panic!("expected no message, got {}", received.message.type_name());
        }
    }

    async fn next_within(&mut self, wait_ms: u64) -> Received {
        match tokio::time::timeout(Duration::from_millis(wait_ms), self.rx.recv()).await {
            Ok(Some(received)) => received,
            Ok(None) => panic!("probe dropped"),
            Err(_) => panic!("no message within {}ms", wait_ms),
        }
    }
}
