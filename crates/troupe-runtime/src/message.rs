//! Type-erased message payloads
//!
//! TigerStyle: Cheap clones, explicit downcasts.

use crate::protocol;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A message payload
///
/// Payloads are reference counted so the same message can be replayed after a
/// suspension or fanned out over a conversation group without copying.
#[derive(Clone)]
pub struct Message {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    protocol: bool,
}

impl Message {
    /// Wrap a value
    ///
    /// Wrapping a `Message` returns it unchanged.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        if let Some(message) = (&value as &dyn Any).downcast_ref::<Message>() {
            return message.clone();
        }
        Self {
            payload: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            protocol: protocol::is_protocol_type(TypeId::of::<T>()),
        }
    }

    /// Borrow the payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Whether the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Rust type name of the payload, for logs
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether this is one of the runtime's own protocol messages
    ///
    /// Protocol messages never raise conversation notifications.
    pub fn is_protocol(&self) -> bool {
        self.protocol
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeadLetter;

    #[test]
    fn test_downcast() {
        let msg = Message::new(String::from("hello"));
        assert!(msg.is::<String>());
        assert_eq!(msg.downcast_ref::<String>().map(String::as_str), Some("hello"));
        assert!(msg.downcast_ref::<u32>().is_none());
        assert!(!msg.is_protocol());
    }

    #[test]
    fn test_wrapping_message_is_identity() {
        let inner = Message::new(7u32);
        let outer = Message::new(inner.clone());
        assert!(outer.is::<u32>());
        assert!(Arc::ptr_eq(&inner.payload, &outer.payload));
    }

    #[test]
    fn test_protocol_detection() {
        // DeadLetter needs an actor, so only check the type table
        assert!(protocol::is_protocol_type(TypeId::of::<DeadLetter>()));
        assert!(!protocol::is_protocol_type(TypeId::of::<&'static str>()));
    }
}
