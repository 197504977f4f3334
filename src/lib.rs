//! Block-wise ARQ transfer over unreliable datagrams.
//!
//! Messaging layers on top of UDP have a hard upper bound for how much payload fits into a
//!  single datagram. This crate takes over when a message exceeds that bound: it fragments the
//!  payload into numbered frames of a fixed size, transmits them inside regular messages of the
//!  outer protocol, re-sends frames that are not acknowledged in time, and reassembles the
//!  original payload on the receiving side before handing it upwards in one piece.
//!
//! ## Design goals
//!
//! * Reliability is per *transfer*: a transfer either delivers the complete reassembled payload
//!   exactly once, or it fails as a whole. There is no partial delivery.
//! * Frames may arrive out of order within a bounded window; the receiver buffers and re-orders
//!   them. Frames outside the window are treated as stale or garbage and never corrupt a
//!   transfer.
//! * The sender keeps a bounded number of frames in flight and adapts that bound based on how
//!   many retransmissions recent history required. This is a best-effort heuristic, not a
//!   congestion controller with formal guarantees.
//! * Every wait is bounded: a frame that is not acknowledged after a configured number of
//!   attempts fails the transfer, and a receiver that stops seeing frames discards its partial
//!   state after an idle timeout.
//! * The outer wire format, encryption and socket I/O stay outside this crate. They are consumed
//!   through narrow trait seams ([`message::MessageSender`], [`message::MessageDispatcher`])
//!   so the subsystem can be driven and tested without real sockets.
//!
//! ## Wire representation
//!
//! Frames are described by a single integer option of the outer protocol:
//!
//! ```ascii
//! block option (u32):
//!     bits 4..: frame sequence number
//!     bit 3:    'more frames follow' flag
//!     bits 0-2: szx - frame size encoded as exponent, frame size = 16 * 2^szx (max 1024)
//! ```
//!
//! A second plain-integer option advertises the current window size of whoever sends it; the
//!  peer uses it as an upper bound for its own in-flight frame count.
//!
//! A transfer is identified by the outer message token plus the peer address. The receiver
//!  acknowledges every accepted frame: with a *continue* response while the transfer is
//!  incomplete, and with a terminal *done* response once the last gap is filled. The terminal
//!  response is what completes the transfer on the sending side.

pub mod block_option;
pub mod config;
pub mod end_point;
pub mod error;
pub mod frame_buffer;
pub mod message;
pub mod receive_stream;
pub mod registry;
pub mod safe_converter;
pub mod send_stream;
pub mod sliding_window;
