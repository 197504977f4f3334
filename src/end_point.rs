use crate::config::{BlockwiseConfig, EffectiveReceiveConfig, EffectiveSendConfig};
use crate::message::{Message, MessageDispatcher, MessageKind, MessageSender};
use crate::registry::{TransferKey, TransferRegistry};
use crate::receive_stream::ReceiveStream;
use crate::send_stream::SendStream;
use anyhow::bail;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument};
use uuid::Uuid;

/// The seam between the outer message layer and the per-transfer pipelines.
///
/// The message layer calls [`BlockwiseEndpoint::on_send`] for every outgoing message and
///  [`BlockwiseEndpoint::on_receive`] for every incoming one; both return whether the message
///  is *not* part of a block-wise exchange and should take the regular path instead. Everything
///  else - fragmentation, reassembly, retries, windowing - happens behind this facade.
pub struct BlockwiseEndpoint {
    block_size: usize,
    send_config: Arc<EffectiveSendConfig>,
    receive_config: Arc<EffectiveReceiveConfig>,
    registry: Arc<TransferRegistry>,
    sender: Arc<dyn MessageSender>,
    dispatcher: Arc<dyn MessageDispatcher>,
}

impl BlockwiseEndpoint {
    pub fn new(
        config: &BlockwiseConfig,
        sender: Arc<dyn MessageSender>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> anyhow::Result<BlockwiseEndpoint> {
        config.validate()?;

        Ok(BlockwiseEndpoint {
            block_size: config.block_size,
            send_config: Arc::new(config.effective_send_config()),
            receive_config: Arc::new(config.effective_receive_config()),
            registry: Arc::new(TransferRegistry::new()),
            sender,
            dispatcher,
        })
    }

    pub fn num_transfers(&self) -> usize {
        self.registry.num_transfers()
    }

    /// Send a message's payload to a peer, fragmenting if it does not fit into a single frame.
    ///
    /// Returns `Ok(true)` if the payload fits and the caller should send it unfragmented, and
    ///  `Ok(false)` once a block-wise transfer completed successfully. The call resolves only
    ///  when the transfer is over, one way or the other - retries happen inside.
    pub async fn on_send(&self, to: SocketAddr, token: Bytes, payload: Bytes) -> anyhow::Result<bool> {
        if payload.len() <= self.block_size {
            return Ok(true);
        }

        let key = TransferKey::new(token.clone(), to);
        let stream = Arc::new(SendStream::new(
            self.send_config.clone(),
            token,
            to,
            payload,
            self.sender.clone(),
        ));

        if !self.registry.insert_send(&key, stream.clone()) {
            bail!("a transfer for token {:?} to {} is already in progress", key.token, to);
        }

        let span = debug_span!("send_transfer", transfer_id = %Uuid::new_v4(), peer = %to);
        let result = stream.run().instrument(span).await;

        self.registry.remove(&key);
        result?;
        Ok(false)
    }

    /// Route one incoming message. Frames feed the matching receive transfer (starting one if
    ///  necessary), acknowledgements feed the matching send transfer.
    ///
    /// Returns `true` if the message is not part of a block-wise exchange and the caller should
    ///  process it as a regular message.
    pub async fn on_receive(&self, from: SocketAddr, message: Message) -> bool {
        let Some(block) = message.block else {
            return true;
        };
        let key = TransferKey::new(message.token.clone(), from);

        match message.kind {
            MessageKind::Data => {
                let stream = self.registry.get_or_create_receive(&key, || {
                    debug!("starting transfer {:?} from {}", key.token, from);
                    let mut stream = ReceiveStream::new(
                        self.receive_config.clone(),
                        key.clone(),
                        self.sender.clone(),
                        self.dispatcher.clone(),
                        self.registry.clone(),
                    );
                    stream.spawn_idle_loop();
                    Arc::new(stream)
                });

                match stream {
                    Some(stream) => stream.on_frame(block, message.payload).await,
                    None => debug!("frame from {} collides with an outgoing transfer - dropping", from),
                }
            }
            MessageKind::Continue => match self.registry.get_send(&key) {
                Some(stream) => stream.on_ack(block.sequence_number, message.window).await,
                None => debug!("ack from {} for unknown transfer {:?} - dropping", from, key.token),
            },
            MessageKind::Done => match self.registry.get_send(&key) {
                Some(stream) => stream.on_terminal_ack().await,
                None => debug!("terminal ack from {} for unknown transfer {:?} - dropping", from, key.token),
            },
        }
        false
    }
}
