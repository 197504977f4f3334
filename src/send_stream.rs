use crate::block_option::BlockOption;
use crate::config::EffectiveSendConfig;
use crate::error::BlockwiseError;
use crate::frame_buffer::{FragmentQueue, Frame};
use crate::message::{Message, MessageSender};
use crate::safe_converter::SafeCast;
use bytes::Bytes;
use std::cmp::min;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Per-frame bookkeeping of the sender pipeline.
struct FrameState {
    frame: Frame,
    acked: bool,
    attempts: u32,
    last_sent: Option<Instant>,
}

impl FrameState {
    fn new(frame: Frame) -> FrameState {
        FrameState {
            frame,
            acked: false,
            attempts: 0,
            last_sent: None,
        }
    }
}

struct SendStreamInner {
    config: Arc<EffectiveSendConfig>,
    token: Bytes,
    peer_addr: SocketAddr,
    sender: Arc<dyn MessageSender>,

    fragments: FragmentQueue,
    /// frame states for all frames produced so far - index equals frame sequence number
    frames: Vec<FrameState>,
    /// index of the first unacknowledged frame
    shift: u32,

    window_size: u32,
    /// the window the peer advertised most recently, an upper bound for ours
    peer_window: Option<u32>,

    acks_in_period: u32,
    recent_retransmits: u32,
    previous_retransmits: u32,

    completed: bool,
}

impl SendStreamInner {
    fn effective_window(&self) -> u32 {
        min(self.window_size, self.peer_window.unwrap_or(u32::MAX)).max(1)
    }

    /// Produce frames from the fragment queue up to the edge of the current window.
    fn produce_frames(&mut self) {
        let window = self.effective_window();
        let target = min(self.shift.saturating_add(window), self.fragments.num_frames());

        while (self.frames.len() as u32) < target {
            match self.fragments.pop_block(window) {
                Some(frame) => self.frames.push(FrameState::new(frame)),
                None => break,
            }
        }
    }

    /// The periodic window-size re-evaluation: an additive adjustment based on how many
    ///  retransmissions the two most recent ack periods required. A heuristic with empirically
    ///  chosen constants, see `BlockwiseConfig`.
    fn adjust_window(&mut self) {
        let delta = (2.0 - self.recent_retransmits as f64 + self.previous_retransmits as f64)
            * self.config.window_adjust_factor;

        let adjusted = self.window_size as i64 + delta.round() as i64;
        self.window_size = adjusted
            .clamp(self.config.min_window_size as i64, self.config.max_window_size as i64)
            as u32;

        trace!("adjusted send window to {} (retransmits: {} recent, {} previous)",
            self.window_size, self.recent_retransmits, self.previous_retransmits);

        self.previous_retransmits = self.recent_retransmits;
        self.recent_retransmits = 0;
        self.acks_in_period = 0;
    }
}

enum TickOutcome {
    Completed,
    Pending(Instant),
}

/// The sender pipeline for one transfer: emits the frames inside the current window, retries
///  the unacknowledged ones, adapts the window size, and fails after a bounded number of
///  attempts per frame.
///
/// [`SendStream::run`] drives the transfer and resolves with its outcome; acknowledgements
///  arrive concurrently through [`SendStream::on_ack`] / [`SendStream::on_terminal_ack`].
pub struct SendStream {
    config: Arc<EffectiveSendConfig>,
    inner: Arc<RwLock<SendStreamInner>>,
    ack_notify: Notify,
}

impl SendStream {
    pub fn new(
        config: Arc<EffectiveSendConfig>,
        token: Bytes,
        peer_addr: SocketAddr,
        payload: Bytes,
        sender: Arc<dyn MessageSender>,
    ) -> SendStream {
        let fragments = FragmentQueue::new(payload, config.block_size, config.max_window_size.safe_cast());

        let inner = SendStreamInner {
            config: config.clone(),
            token,
            peer_addr,
            sender,
            fragments,
            frames: Vec::new(),
            shift: 0,
            window_size: config.initial_window_size,
            peer_window: None,
            acks_in_period: 0,
            recent_retransmits: 0,
            previous_retransmits: 0,
            completed: false,
        };

        SendStream {
            config,
            inner: Arc::new(RwLock::new(inner)),
            ack_notify: Notify::new(),
        }
    }

    pub async fn peer_addr(&self) -> SocketAddr {
        self.inner.read().await.peer_addr
    }

    /// A continue-acknowledgement for one frame. Duplicates are ignored and never double-count
    ///  towards the window adjustment.
    pub async fn on_ack(&self, sequence_number: u32, peer_window: Option<u32>) {
        let mut inner = self.inner.write().await;

        if let Some(peer_window) = peer_window {
            inner.peer_window = Some(peer_window);
        }

        let index: usize = sequence_number.safe_cast();
        if index >= inner.frames.len() {
            debug!("ack for frame {:?} which was never produced - ignoring", sequence_number);
            return;
        }
        if inner.frames[index].acked {
            trace!("duplicate ack for frame #{} - ignoring", sequence_number);
            return;
        }

        inner.frames[index].acked = true;

        // advance past the maximal contiguous acknowledged run
        if sequence_number == inner.shift {
            while (inner.shift as usize) < inner.frames.len() && inner.frames[inner.shift as usize].acked {
                inner.shift += 1;
            }
        }

        inner.acks_in_period += 1;
        if inner.acks_in_period >= inner.config.window_adjust_period {
            inner.adjust_window();
        }

        drop(inner);
        self.ack_notify.notify_one();
    }

    /// The terminal acknowledgement: the peer has the complete payload.
    pub async fn on_terminal_ack(&self) {
        let mut inner = self.inner.write().await;
        trace!("terminal ack for transfer to {:?}", inner.peer_addr);
        inner.completed = true;

        drop(inner);
        self.ack_notify.notify_one();
    }

    /// Drive the transfer until the peer acknowledges completion or the retry / deadline budget
    ///  is exhausted. All retry handling happens here; callers get a single terminal result.
    pub async fn run(&self) -> Result<(), BlockwiseError> {
        let deadline = self.config.transfer_deadline.map(|d| Instant::now() + d);

        loop {
            match self.do_tick().await? {
                TickOutcome::Completed => return Ok(()),
                TickOutcome::Pending(next_due) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            warn!("transfer deadline exceeded");
                            return Err(BlockwiseError::DeadlineExceeded);
                        }
                    }

                    let wake_at = deadline.map_or(next_due, |deadline| min(next_due, deadline));
                    tokio::select! {
                        _ = self.ack_notify.notified() => {}
                        _ = time::sleep_until(wake_at) => {}
                    }
                }
            }
        }
    }

    /// One windowing decision: (re-)send everything in the window that is due, concurrently,
    ///  and join all sends before returning.
    async fn do_tick(&self) -> Result<TickOutcome, BlockwiseError> {
        let mut inner = self.inner.write().await;

        if inner.completed {
            return Ok(TickOutcome::Completed);
        }

        inner.produce_frames();

        let now = Instant::now();
        let retry_interval = inner.config.retry_interval;
        let max_attempts = inner.config.max_send_attempts;
        let block_size = inner.config.block_size;
        let token = inner.token.clone();
        let window_advert = inner.window_size;
        let num_frames = inner.fragments.num_frames();

        let window_end = min(inner.shift.saturating_add(inner.effective_window()), num_frames);

        // If every frame is acknowledged but the terminal response is still missing (it may have
        //  been lost), the final frame is re-sent on the retry cadence so the wait stays bounded
        //  by the per-frame attempt budget.
        let all_acked = inner.shift == num_frames;
        let candidate_indices: Vec<u32> = if all_acked {
            vec![num_frames - 1]
        } else {
            (inner.shift..window_end).collect()
        };

        let mut due = Vec::new();
        let mut retransmits = 0;
        let mut next_due = now + retry_interval;

        for index in candidate_indices {
            let state = &mut inner.frames[index as usize];
            if state.acked && !all_acked {
                continue;
            }

            if let Some(last_sent) = state.last_sent {
                if now < last_sent + retry_interval {
                    next_due = min(next_due, last_sent + retry_interval);
                    continue;
                }
            }

            if state.attempts >= max_attempts {
                warn!("frame #{} exhausted its {} attempts - failing the transfer", index, max_attempts);
                return Err(BlockwiseError::MaxAttemptsExceeded {
                    sequence_number: index,
                    max_attempts,
                });
            }

            state.attempts += 1;
            if state.attempts > 1 {
                retransmits += 1;
            }
            state.last_sent = Some(now);
            next_due = min(next_due, now + retry_interval);

            let block = BlockOption::new(index, state.frame.has_more, block_size);
            due.push(Message::data_frame(token.clone(), block, window_advert, state.frame.bytes.clone()));
        }

        inner.recent_retransmits += retransmits;

        let sender = inner.sender.clone();
        let peer_addr = inner.peer_addr;
        drop(inner);

        if !due.is_empty() {
            trace!("dispatching {} frame(s) to {:?}", due.len(), peer_addr);

            // concurrent fan-out, bounded by the window size; joined before the next
            //  windowing decision
            let mut dispatch = JoinSet::new();
            for message in due {
                let sender = sender.clone();
                dispatch.spawn(async move {
                    sender.send_message(peer_addr, message).await;
                });
            }
            while dispatch.join_next().await.is_some() {}
        }

        Ok(TickOutcome::Pending(next_due))
    }
}
