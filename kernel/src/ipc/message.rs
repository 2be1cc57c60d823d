// SPDX-License-Identifier: MPL-2.0

//! Message types carried through the work queue.

use crate::ipc::MessageReceiver;
use crate::prelude::*;
use crate::sync::Semaphore;

// Message identifiers.
pub const SM_IO_MSG: u64 = 1;
pub const SM_IO_COMPLETE: u64 = 2;
pub const SM_FAT_CHAIN_IO: u64 = 3;
pub const SM_FAT_CHANGE_CHAIN_LEN: u64 = 4;
pub const SM_FAT_CALC_NEXT_CLUSTER: u64 = 5;
pub const SM_ATA_CMD: u64 = 6;
pub const SM_IRQ_SLOW: u64 = 7;
/// First identifier available to user-mode messaging.
pub const SM_USER_BASE: u64 = 0x100;

/// A byte buffer with shared ownership, passed between sender and handler.
pub type SharedBuffer = Arc<SpinLock<Box<[u8]>>>;

/// Allocates a zeroed [`SharedBuffer`] of `len` bytes.
pub fn shared_buffer(len: usize) -> SharedBuffer {
    Arc::new(SpinLock::new(vec![0u8; len].into_boxed_slice()))
}

/// The fields common to every message.
pub struct MessageHeader {
    /// Identifier selecting the receiver's handler.
    pub id: u64,
    /// When true the work queue signals `completion_semaphore` as soon as the
    /// handler returns; when false the receiver signals it itself, which is
    /// used when completion is asynchronous through further messages.
    pub auto_signal: bool,
    pub completion_semaphore: Option<Arc<Semaphore>>,
    /// Optional buffer for results the sender wants back.
    pub output_buffer: Option<SharedBuffer>,
}

impl MessageHeader {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            auto_signal: true,
            completion_semaphore: None,
            output_buffer: None,
        }
    }
}

/// The root of all messages.
pub trait Message: Any + Send {
    fn header(&self) -> &MessageHeader;
    fn header_mut(&mut self) -> &mut MessageHeader;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Implements the [`Message`] boilerplate for a type with a `header` field.
#[macro_export]
macro_rules! impl_message {
    ($ty:ty) => {
        impl $crate::ipc::Message for $ty {
            fn header(&self) -> &$crate::ipc::MessageHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::ipc::MessageHeader {
                &mut self.header
            }

            fn into_any(
                self: alloc::boxed::Box<Self>,
            ) -> alloc::boxed::Box<dyn core::any::Any> {
                self
            }
        }
    };
}

/// Downcasts a generic message to the subtype a handler expects.
///
/// Returns `None` (after routing through the failure handler) if the message
/// is of a different type.
pub fn convert_message<T: Message>(msg: Box<dyn Message>) -> Option<Box<T>> {
    match msg.into_any().downcast::<T>() {
        Ok(typed) => Some(typed),
        Err(_) => {
            dispatch_failure("message failed downcast to expected type");
            None
        }
    }
}

/// Called for a message id a receiver does not understand.
pub fn unknown_message(id: u64) {
    dispatch_failure("unknown message id");
    log::warn!("ignoring unknown message id {id}");
}

fn dispatch_failure(reason: &str) {
    #[cfg(feature = "strict-dispatch")]
    panic!("message dispatch failure: {reason}");

    #[cfg(not(feature = "strict-dispatch"))]
    let _ = reason;
}

/// A message carrying a raw byte payload, the C-style type/length/value shape
/// used by user-mode messaging.
pub struct BasicMessage {
    pub header: MessageHeader,
    pub data: Vec<u8>,
}

impl BasicMessage {
    pub fn new(id: u64, data: Vec<u8>) -> Box<Self> {
        Box::new(Self {
            header: MessageHeader::new(id),
            data,
        })
    }
}

impl_message!(BasicMessage);

/// I/O request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoRequest {
    #[default]
    Invalid,
    Read,
    Write,
}

/// A block- or byte-range I/O request.
///
/// `start` and `count` are blocks when addressed to a block device and bytes
/// when addressed to a file object.
pub struct IoMessage {
    pub header: MessageHeader,
    pub request: IoRequest,
    pub start: u64,
    pub count: u64,
    pub buffer: SharedBuffer,
    /// Error code filled in by the handler.
    pub response: Result,
    /// Back-reference to the sender; the completion reply goes here.
    pub sender: Option<Weak<dyn MessageReceiver>>,
    /// For nested handlers: the request this one was issued on behalf of.
    pub parent: Option<Box<dyn Message>>,
}

impl IoMessage {
    pub fn new(
        request: IoRequest,
        start: u64,
        count: u64,
        buffer: SharedBuffer,
        sender: Option<Weak<dyn MessageReceiver>>,
    ) -> Box<Self> {
        Box::new(Self {
            header: MessageHeader::new(SM_IO_MSG),
            request,
            start,
            count,
            buffer,
            response: Err(Error::Unknown),
            sender,
            parent: None,
        })
    }
}

impl_message!(IoMessage);

/// Sends the completed I/O message back to its sender, if it still exists.
pub fn return_io_message(mut msg: Box<IoMessage>) {
    msg.header.id = SM_IO_COMPLETE;
    let target = msg.sender.take().and_then(|weak| weak.upgrade());
    if let Some(receiver) = target {
        crate::ipc::queue_message(receiver, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_recovers_concrete_type() {
        let msg: Box<dyn Message> = BasicMessage::new(SM_USER_BASE, vec![1, 2, 3]);
        let basic = convert_message::<BasicMessage>(msg).unwrap();
        assert_eq!(basic.data, [1, 2, 3]);
    }

    #[test]
    fn conversion_to_wrong_type_fails() {
        let msg: Box<dyn Message> = BasicMessage::new(SM_USER_BASE, Vec::new());
        assert!(convert_message::<IoMessage>(msg).is_none());
    }

    #[test]
    fn shared_buffers_are_shared() {
        let buf = shared_buffer(4);
        buf.lock()[0] = 0xAA;
        let clone = buf.clone();
        assert_eq!(clone.lock()[0], 0xAA);
    }
}
