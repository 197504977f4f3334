use crate::block_option::BlockOption;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;

/// The role a message plays in a block-wise exchange, mapped from / to the outer protocol's
///  message codes by the message layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A message carrying payload - a frame of a transfer if a block option is present.
    Data,
    /// Acknowledgement for one frame of an incomplete transfer: keep sending.
    Continue,
    /// Terminal acknowledgement: the transfer is complete on the receiving side.
    Done,
}

/// The narrow slice of an outer-protocol message that the transfer subsystem works with.
///
/// Parsing and serializing the full wire format (codes, option encoding, tokens on the wire)
///  is the message layer's job; by the time a message gets here it is also already decrypted,
///  and outgoing messages are encrypted after they leave through [`MessageSender`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub token: Bytes,
    pub block: Option<BlockOption>,
    pub window: Option<u32>,
    pub payload: Bytes,
}

impl Message {
    pub fn data_frame(token: Bytes, block: BlockOption, window: u32, payload: Bytes) -> Message {
        Message {
            kind: MessageKind::Data,
            token,
            block: Some(block),
            window: Some(window),
            payload,
        }
    }

    pub fn continue_ack(token: Bytes, block: BlockOption, window: u32) -> Message {
        Message {
            kind: MessageKind::Continue,
            token,
            block: Some(block),
            window: Some(window),
            payload: Bytes::new(),
        }
    }

    pub fn done_ack(token: Bytes, block: BlockOption) -> Message {
        Message {
            kind: MessageKind::Done,
            token,
            block: Some(block),
            window: None,
            payload: Bytes::new(),
        }
    }
}

/// Abstraction for handing a message to the peer, introduced to keep socket I/O (and the
///  encrypting wire codec in front of it) out of this crate and to facilitate mocking in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    async fn send_message(&self, to: SocketAddr, message: Message);
}

/// Callback for completed transfers: receives every reassembled payload exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, sender_addr: SocketAddr, token: Bytes, payload: Bytes);
}
