//! User-supplied actor logic
//!
//! TigerStyle: Three callbacks, failures are values.

use crate::context::Context;
use crate::envelope::Envelope;
use crate::message::Message;
use async_trait::async_trait;
use troupe_core::Result;

/// Reaction of an actor to its lifecycle and its mailbox
///
/// The engine calls at most one method at a time. `start` runs lazily before
/// the first message the actor ever processes, and again after a restart.
/// Returning `Err` or panicking from any method counts as a failure; the
/// engine catches it and the sender never sees it.
///
/// # Example
///
/// ```rust,ignore
/// struct Counter { count: u64 }
///
/// #[async_trait]
/// impl Behavior for Counter {
///     async fn message(&mut self, msg: Message, env: &Envelope, ctx: &mut Context) -> Result<()> {
///         if msg.is::<Increment>() {
///             self.count += 1;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Called before the first message and after each restart
    async fn start(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Handle one message
    async fn message(&mut self, msg: Message, envelope: &Envelope, ctx: &mut Context)
        -> Result<()>;

    /// Called when the actor stops and before each restart
    async fn stop(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}
