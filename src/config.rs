/// Protocol configuration and notification hooks
///
/// One `EsmConfig` is built before a simulation starts and shared read-only
/// by every node through an `Arc`.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::contracts::EsmHeader;
use crate::errors::{EsmError, Result};
use crate::identity::{MessageId, NodeId};
use crate::packet::{PhysicalStateRecord, WireHeader};

/// Invoked after every ESM broadcast: `(sender, message_id)`
pub type SendCallback = Arc<dyn Fn(NodeId, MessageId) + Send + Sync>;

/// Invoked on every accepted ESM: `(receiver, message_id, latency)`
pub type RecvCallback = Arc<dyn Fn(NodeId, MessageId, Duration) + Send + Sync>;

/// Optional send/receive notification hooks
#[derive(Clone, Default)]
pub struct EsmHooks {
    on_send: Option<SendCallback>,
    on_receive: Option<RecvCallback>,
}

impl EsmHooks {
    pub fn notify_send(&self, sender: NodeId, message_id: MessageId) {
        if let Some(cb) = &self.on_send {
            cb(sender, message_id);
        }
    }

    pub fn notify_receive(&self, receiver: NodeId, message_id: MessageId, latency: Duration) {
        if let Some(cb) = &self.on_receive {
            cb(receiver, message_id, latency);
        }
    }
}

impl fmt::Debug for EsmHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsmHooks")
            .field("on_send", &self.on_send.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

/// Immutable protocol configuration
#[derive(Debug, Clone)]
pub struct EsmConfig {
    message_size: usize,
    lower_header_size: usize,
    hooks: EsmHooks,
}

impl EsmConfig {
    /// Smallest message size that fits all headers for the given lower layer
    pub fn minimum_message_size(lower_header_size: usize) -> usize {
        lower_header_size + EsmHeader::SIZE + PhysicalStateRecord::SIZE
    }

    /// Total on-air packet size, lower-layer header included
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    pub fn lower_header_size(&self) -> usize {
        self.lower_header_size
    }

    pub fn hooks(&self) -> &EsmHooks {
        &self.hooks
    }
}

impl Default for EsmConfig {
    fn default() -> Self {
        Self {
            message_size: crate::DEFAULT_MESSAGE_SIZE,
            lower_header_size: crate::WSMP_HEADER_SIZE,
            hooks: EsmHooks::default(),
        }
    }
}

/// EsmConfigBuilder - Fluent interface for protocol configuration
pub struct EsmConfigBuilder {
    message_size: usize,
    lower_header_size: usize,
    hooks: EsmHooks,
}

impl EsmConfigBuilder {
    /// Create a new EsmConfigBuilder with defaults
    pub fn new() -> Self {
        Self {
            message_size: crate::DEFAULT_MESSAGE_SIZE,
            lower_header_size: crate::WSMP_HEADER_SIZE,
            hooks: EsmHooks::default(),
        }
    }

    /// Set the total on-air packet size in bytes
    pub fn with_message_size(mut self, bytes: usize) -> Self {
        self.message_size = bytes;
        self
    }

    /// Set the size of the transport's own header
    pub fn with_lower_header_size(mut self, bytes: usize) -> Self {
        self.lower_header_size = bytes;
        self
    }

    pub fn with_send_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(NodeId, MessageId) + Send + Sync + 'static,
    {
        self.hooks.on_send = Some(Arc::new(cb));
        self
    }

    pub fn with_receive_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(NodeId, MessageId, Duration) + Send + Sync + 'static,
    {
        self.hooks.on_receive = Some(Arc::new(cb));
        self
    }

    pub fn get_message_size(&self) -> usize {
        self.message_size
    }

    pub fn get_lower_header_size(&self) -> usize {
        self.lower_header_size
    }

    /// Validate and freeze the configuration
    ///
    /// # Errors
    /// `BufferTooSmall` if the message size cannot hold the lower-layer
    /// header, the ESM header and the physical-state record.
    pub fn build(self) -> Result<Arc<EsmConfig>> {
        let required = EsmConfig::minimum_message_size(self.lower_header_size);
        if self.message_size < required {
            return Err(EsmError::BufferTooSmall {
                required,
                available: self.message_size,
            });
        }

        Ok(Arc::new(EsmConfig {
            message_size: self.message_size,
            lower_header_size: self.lower_header_size,
            hooks: self.hooks,
        }))
    }
}

impl Default for EsmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
