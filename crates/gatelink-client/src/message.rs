//! Application messages, their codec and the message pool

use bytes::Bytes;
use std::collections::HashMap;

use crate::error::{ClientError, Result};

/// A decoded application message that can name its own type.
pub trait Message: Send + 'static {
    /// Stable descriptor of the message type, e.g. `"login.LoginResponse"`
    fn descriptor(&self) -> &str;
}

/// Turns frame payloads into application messages and back.
pub trait MessageCodec<M>: Send + Sync {
    fn encode(&self, message: &M) -> Result<Bytes>;

    fn decode(&self, payload: Bytes) -> Result<M>;
}

/// Resolves a message to its routing identifier.
///
/// Populated before the manager starts and read without locking afterwards.
pub trait MessagePool<M>: Send + Sync {
    fn message_id(&self, message: &M) -> Option<u32>;
}

/// Bidirectional descriptor <-> id table
#[derive(Debug, Default, Clone)]
pub struct DescriptorPool {
    ids: HashMap<String, u32>,
    descriptors: HashMap<u32, String>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type. Both the descriptor and the id must be new.
    pub fn register(&mut self, descriptor: impl Into<String>, id: u32) -> Result<()> {
        let descriptor = descriptor.into();
        if self.ids.contains_key(&descriptor) || self.descriptors.contains_key(&id) {
            return Err(ClientError::DuplicateMessage { descriptor, id });
        }
        self.descriptors.insert(id, descriptor.clone());
        self.ids.insert(descriptor, id);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, descriptor: impl Into<String>, id: u32) -> Result<Self> {
        self.register(descriptor, id)?;
        Ok(self)
    }

    pub fn id_of(&self, descriptor: &str) -> Option<u32> {
        self.ids.get(descriptor).copied()
    }

    pub fn descriptor_of(&self, id: u32) -> Option<&str> {
        self.descriptors.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<M: Message> MessagePool<M> for DescriptorPool {
    fn message_id(&self, message: &M) -> Option<u32> {
        self.id_of(message.descriptor())
    }
}

/// Codec that hands frame payloads through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl MessageCodec<Bytes> for RawCodec {
    fn encode(&self, message: &Bytes) -> Result<Bytes> {
        Ok(message.clone())
    }

    fn decode(&self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}
