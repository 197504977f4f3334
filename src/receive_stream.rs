use crate::block_option::BlockOption;
use crate::config::EffectiveReceiveConfig;
use crate::error::BlockwiseError;
use crate::frame_buffer::ReassemblyBuffer;
use crate::message::{Message, MessageDispatcher, MessageSender};
use crate::registry::{TransferKey, TransferRegistry};
use crate::safe_converter::PrecheckedCast;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

struct ReceiveStreamInner {
    config: Arc<EffectiveReceiveConfig>,
    key: TransferKey,
    sender: Arc<dyn MessageSender>,
    dispatcher: Arc<dyn MessageDispatcher>,
    registry: Arc<TransferRegistry>,

    reassembly: ReassemblyBuffer,
    /// the time of the most recent frame, for the idle timeout
    last_frame_at: Instant,
    /// set once the payload was handed to the dispatcher (or the transfer aborted); duplicate
    ///  final frames after that are answered but never re-dispatched
    completed: bool,
}

/// The receiver pipeline for one transfer: reassembles frames, acknowledges each accepted
///  frame, and delivers the completed payload exactly once.
///
/// A completed transfer stays registered until the idle timeout so a retransmitted final frame
///  (whose terminal acknowledgement was lost) gets the terminal response again instead of
///  starting a bogus fresh transfer.
pub struct ReceiveStream {
    inner: Arc<RwLock<ReceiveStreamInner>>,
    idle_handle: Option<JoinHandle<()>>,
}

impl ReceiveStream {
    pub fn new(
        config: Arc<EffectiveReceiveConfig>,
        key: TransferKey,
        sender: Arc<dyn MessageSender>,
        dispatcher: Arc<dyn MessageDispatcher>,
        registry: Arc<TransferRegistry>,
    ) -> ReceiveStream {
        let reassembly = ReassemblyBuffer::new(config.receive_window_size);

        let inner = ReceiveStreamInner {
            config,
            key,
            sender,
            dispatcher,
            registry,
            reassembly,
            last_frame_at: Instant::now(),
            completed: false,
        };

        ReceiveStream {
            inner: Arc::new(RwLock::new(inner)),
            idle_handle: None,
        }
    }

    /// Start the background loop that aborts this transfer (removing it from the registry and
    ///  discarding partial state) once no frame has arrived for the idle timeout.
    pub fn spawn_idle_loop(&mut self) {
        let inner = self.inner.clone();

        self.idle_handle = Some(tokio::spawn(async move {
            loop {
                let (wake_at, idle_timeout) = {
                    let inner = inner.read().await;
                    (inner.last_frame_at + inner.config.idle_timeout, inner.config.idle_timeout)
                };
                time::sleep_until(wake_at).await;

                let inner = inner.read().await;
                if inner.last_frame_at.elapsed() >= idle_timeout {
                    if inner.completed {
                        trace!("removing completed transfer {:?} after idle timeout", inner.key);
                    } else {
                        warn!("aborting transfer {:?} - no frame for {:?}", inner.key, idle_timeout);
                    }
                    inner.registry.remove(&inner.key);
                    break;
                }
            }
        }));
    }

    /// Handle one incoming frame: feed it to the reassembly buffer and send the matching
    ///  acknowledgement. Frames outside the window are dropped without response so a window
    ///  overrun by the peer never grows local state.
    pub async fn on_frame(&self, block: BlockOption, payload: Bytes) {
        let mut inner = self.inner.write().await;
        inner.last_frame_at = Instant::now();

        let token = inner.key.token.clone();
        let peer_addr = inner.key.peer_addr;
        let sender = inner.sender.clone();

        if inner.completed {
            // the terminal response may have been lost, repeat it
            drop(inner);
            sender.send_message(peer_addr, Message::done_ack(token, block)).await;
            return;
        }

        let window_advert: u32 = inner.config.receive_window_size.prechecked_cast();

        match inner.reassembly.accept(block.sequence_number, block.has_more, payload) {
            Ok(()) => {}
            Err(BlockwiseError::StaleFrame { sequence_number, window_offset }) => {
                // drained before, the earlier acknowledgement was presumably lost
                trace!("re-acknowledging stale frame #{} (window offset {})", sequence_number, window_offset);
                drop(inner);
                sender.send_message(peer_addr, Message::continue_ack(token, block, window_advert)).await;
                return;
            }
            Err(e) => {
                debug!("dropping frame from {:?}: {}", peer_addr, e);
                return;
            }
        }

        if inner.reassembly.assembled_len() > inner.config.max_message_size {
            warn!("aborting transfer {:?} - reassembled size exceeds {} bytes", inner.key, inner.config.max_message_size);
            inner.completed = true;
            inner.registry.remove(&inner.key);
            return;
        }

        if inner.reassembly.is_completed() {
            let assembled = inner.reassembly.take_payload();
            inner.completed = true;
            let dispatcher = inner.dispatcher.clone();
            drop(inner);

            sender.send_message(peer_addr, Message::done_ack(token.clone(), block)).await;
            dispatcher.on_message(peer_addr, token, assembled).await;
        } else {
            drop(inner);
            sender.send_message(peer_addr, Message::continue_ack(token, block, window_advert)).await;
        }
    }
}

impl Drop for ReceiveStream {
    fn drop(&mut self) {
        if let Some(handle) = &self.idle_handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, MockMessageDispatcher, MockMessageSender};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::runtime::Builder;

    const BLOCK_SIZE: usize = 16;

    fn test_config() -> Arc<EffectiveReceiveConfig> {
        Arc::new(EffectiveReceiveConfig {
            receive_window_size: 4,
            idle_timeout: Duration::from_secs(30),
            max_message_size: 1024,
        })
    }

    fn test_key() -> TransferKey {
        TransferKey::new(Bytes::from_static(b"tok"), SocketAddr::from(([1, 2, 3, 4], 9)))
    }

    fn test_payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    fn test_block(sequence_number: u32, has_more: bool) -> BlockOption {
        BlockOption::new(sequence_number, has_more, BLOCK_SIZE)
    }

    fn recording_sender() -> (Arc<MockMessageSender>, Arc<Mutex<Vec<Message>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let store = recorded.clone();

        let mut sender = MockMessageSender::new();
        sender.expect_send_message()
            .returning(move |_, message| {
                store.lock().unwrap().push(message);
            });

        (Arc::new(sender), recorded)
    }

    fn recording_dispatcher() -> (Arc<MockMessageDispatcher>, Arc<Mutex<Vec<Bytes>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let store = recorded.clone();

        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher.expect_on_message()
            .returning(move |_, _, payload| {
                store.lock().unwrap().push(payload);
            });

        (Arc::new(dispatcher), recorded)
    }

    struct TestSetup {
        registry: Arc<TransferRegistry>,
        stream: Arc<ReceiveStream>,
        sent: Arc<Mutex<Vec<Message>>>,
        dispatched: Arc<Mutex<Vec<Bytes>>>,
    }

    fn test_setup(config: Arc<EffectiveReceiveConfig>, with_idle_loop: bool) -> TestSetup {
        let (sender, sent) = recording_sender();
        let (dispatcher, dispatched) = recording_dispatcher();
        let registry = Arc::new(TransferRegistry::new());

        let stream = registry.get_or_create_receive(&test_key(), || {
            let mut stream = ReceiveStream::new(config, test_key(), sender, dispatcher, registry.clone());
            if with_idle_loop {
                stream.spawn_idle_loop();
            }
            Arc::new(stream)
        }).unwrap();

        TestSetup { registry, stream, sent, dispatched }
    }

    fn paused_rt() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap()
    }

    #[test]
    fn test_continue_ack_per_frame_and_delivery_on_completion() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), false);
            let payload = test_payload(2 * BLOCK_SIZE + 3);

            setup.stream.on_frame(test_block(0, true), payload.slice(..BLOCK_SIZE)).await;
            setup.stream.on_frame(test_block(1, true), payload.slice(BLOCK_SIZE..2 * BLOCK_SIZE)).await;

            {
                let sent = setup.sent.lock().unwrap();
                assert_eq!(sent.len(), 2);
                for (i, ack) in sent.iter().enumerate() {
                    assert_eq!(ack.kind, MessageKind::Continue);
                    assert_eq!(ack.token, Bytes::from_static(b"tok"));
                    assert_eq!(ack.block.unwrap().sequence_number, i as u32);
                    assert_eq!(ack.window, Some(4));
                }
            }
            assert!(setup.dispatched.lock().unwrap().is_empty());

            setup.stream.on_frame(test_block(2, false), payload.slice(2 * BLOCK_SIZE..)).await;

            let sent = setup.sent.lock().unwrap();
            assert_eq!(sent.len(), 3);
            assert_eq!(sent[2].kind, MessageKind::Done);
            assert_eq!(setup.dispatched.lock().unwrap().as_slice(), &[payload]);
        });
    }

    #[test]
    fn test_out_of_order_frames_delivered_in_order() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), false);
            let payload = test_payload(3 * BLOCK_SIZE);

            setup.stream.on_frame(test_block(1, true), payload.slice(BLOCK_SIZE..2 * BLOCK_SIZE)).await;
            setup.stream.on_frame(test_block(2, false), payload.slice(2 * BLOCK_SIZE..)).await;
            assert!(setup.dispatched.lock().unwrap().is_empty());

            setup.stream.on_frame(test_block(0, true), payload.slice(..BLOCK_SIZE)).await;
            assert_eq!(setup.dispatched.lock().unwrap().as_slice(), &[payload]);
        });
    }

    #[test]
    fn test_stale_frame_is_reacknowledged_without_redelivery() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), false);
            let payload = test_payload(2 * BLOCK_SIZE);

            setup.stream.on_frame(test_block(0, true), payload.slice(..BLOCK_SIZE)).await;
            // retransmission of a frame that was already drained
            setup.stream.on_frame(test_block(0, true), payload.slice(..BLOCK_SIZE)).await;

            let sent = setup.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert!(sent.iter().all(|ack| ack.kind == MessageKind::Continue));
            assert!(setup.dispatched.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_frame_above_window_dropped_without_response() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), false);

            setup.stream.on_frame(test_block(100, true), test_payload(BLOCK_SIZE)).await;

            assert!(setup.sent.lock().unwrap().is_empty());
            assert!(setup.dispatched.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_duplicate_final_frame_repeats_terminal_ack_without_redispatch() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), false);
            let payload = test_payload(BLOCK_SIZE);

            setup.stream.on_frame(test_block(0, false), payload.clone()).await;
            setup.stream.on_frame(test_block(0, false), payload.clone()).await;

            let sent = setup.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert!(sent.iter().all(|ack| ack.kind == MessageKind::Done));
            assert_eq!(setup.dispatched.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_idle_timeout_removes_transfer() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), true);

            setup.stream.on_frame(test_block(0, true), test_payload(BLOCK_SIZE)).await;
            assert_eq!(setup.registry.num_transfers(), 1);

            time::sleep(Duration::from_secs(31)).await;

            assert_eq!(setup.registry.num_transfers(), 0);
            assert!(setup.dispatched.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_frame_resets_idle_timeout() {
        paused_rt().block_on(async {
            let setup = test_setup(test_config(), true);

            setup.stream.on_frame(test_block(0, true), test_payload(BLOCK_SIZE)).await;
            time::sleep(Duration::from_secs(20)).await;
            setup.stream.on_frame(test_block(1, true), test_payload(BLOCK_SIZE)).await;
            time::sleep(Duration::from_secs(20)).await;

            assert_eq!(setup.registry.num_transfers(), 1);

            time::sleep(Duration::from_secs(11)).await;
            assert_eq!(setup.registry.num_transfers(), 0);
        });
    }

    #[test]
    fn test_oversized_transfer_is_aborted() {
        paused_rt().block_on(async {
            let config = Arc::new(EffectiveReceiveConfig {
                receive_window_size: 4,
                idle_timeout: Duration::from_secs(30),
                max_message_size: BLOCK_SIZE + 1,
            });
            let setup = test_setup(config, false);

            setup.stream.on_frame(test_block(0, true), test_payload(BLOCK_SIZE)).await;
            assert_eq!(setup.registry.num_transfers(), 1);

            setup.stream.on_frame(test_block(1, true), test_payload(BLOCK_SIZE)).await;

            assert_eq!(setup.registry.num_transfers(), 0);
            assert!(setup.dispatched.lock().unwrap().is_empty());
            // the oversized frame is not acknowledged
            assert_eq!(setup.sent.lock().unwrap().len(), 1);
        });
    }
}
