use crate::block_option::BlockOption;
use anyhow::bail;
use std::time::Duration;

/// Configuration for the block-wise transfer subsystem.
///
/// The adaptive-window constants (`window_adjust_period`, `window_adjust_factor`, the window
///  bounds) are empirically chosen defaults without a derivation behind them - they are tunable
///  per deployment, not validated optima.
pub struct BlockwiseConfig {
    /// The canonical frame size for outgoing transfers. All frames of a transfer use this size
    ///  (except the final one, which carries the remainder). Must be a power of two in
    ///  `[16, 1024]` so it is representable in the block option's szx encoding.
    ///
    /// All nodes of a deployment should agree on this value: the receive side accepts whatever
    ///  size the block option declares, but mixing sizes across senders wastes window capacity.
    pub block_size: usize,

    /// Lower bound for the sender's adaptive window.
    pub min_window_size: u32,
    /// Upper bound for the sender's adaptive window.
    pub max_window_size: u32,
    /// The window size a fresh transfer starts with.
    pub initial_window_size: u32,

    /// A frame that is unacknowledged for this long is retransmitted.
    pub retry_interval: Duration,
    /// A frame that was sent this many times without acknowledgement fails the whole
    ///  transfer with `MaxAttemptsExceeded`.
    pub max_send_attempts: u32,

    /// The sender re-evaluates its window size after every this many acknowledgements.
    pub window_adjust_period: u32,
    /// Scaling factor for the additive window adjustment.
    pub window_adjust_factor: f64,

    /// Number of out-of-order frames the receive side buffers ahead of the first gap. Also
    ///  advertised to the sender in every continue acknowledgement as an upper bound for its
    ///  window.
    pub receive_window_size: usize,

    /// A receiving transfer that sees no frame for this long is aborted and its partial
    ///  state discarded.
    pub idle_timeout: Duration,

    /// Optional overall deadline for a sending transfer, on top of the per-frame retry budget.
    pub transfer_deadline: Option<Duration>,

    /// Upper bound for a reassembled payload; a transfer growing beyond this is aborted.
    pub max_message_size: usize,
}

impl Default for BlockwiseConfig {
    fn default() -> BlockwiseConfig {
        BlockwiseConfig {
            block_size: 512,
            min_window_size: 50,
            max_window_size: 1500,
            initial_window_size: 50,
            retry_interval: Duration::from_secs(1),
            max_send_attempts: 6,
            window_adjust_period: 25,
            window_adjust_factor: 0.7,
            receive_window_size: 64,
            idle_timeout: Duration::from_secs(30),
            transfer_deadline: None,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl BlockwiseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if BlockOption::szx_for_frame_size(self.block_size).is_none() {
            bail!("block size {} has no szx representation - must be a power of two in [16, 1024]", self.block_size);
        }
        if self.min_window_size == 0 {
            bail!("minimum window size must be at least 1");
        }
        if self.min_window_size > self.max_window_size {
            bail!("minimum window size {} is above maximum window size {}", self.min_window_size, self.max_window_size);
        }
        if !(self.min_window_size..=self.max_window_size).contains(&self.initial_window_size) {
            bail!("initial window size {} is outside [{}, {}]", self.initial_window_size, self.min_window_size, self.max_window_size);
        }
        if self.retry_interval.is_zero() {
            bail!("retry interval must not be zero");
        }
        if self.max_send_attempts == 0 {
            bail!("max send attempts must be at least 1");
        }
        if self.window_adjust_period == 0 {
            bail!("window adjust period must be at least 1");
        }
        if !(self.window_adjust_factor > 0.0) {
            bail!("window adjust factor must be positive");
        }
        if self.receive_window_size == 0 {
            bail!("receive window size must be at least 1");
        }
        if self.idle_timeout < self.retry_interval {
            bail!("idle timeout below the retry interval would abort live transfers");
        }
        Ok(())
    }

    pub fn effective_send_config(&self) -> EffectiveSendConfig {
        EffectiveSendConfig {
            block_size: self.block_size,
            min_window_size: self.min_window_size,
            max_window_size: self.max_window_size,
            initial_window_size: self.initial_window_size,
            retry_interval: self.retry_interval,
            max_send_attempts: self.max_send_attempts,
            window_adjust_period: self.window_adjust_period,
            window_adjust_factor: self.window_adjust_factor,
            transfer_deadline: self.transfer_deadline,
        }
    }

    pub fn effective_receive_config(&self) -> EffectiveReceiveConfig {
        EffectiveReceiveConfig {
            receive_window_size: self.receive_window_size,
            idle_timeout: self.idle_timeout,
            max_message_size: self.max_message_size,
        }
    }
}

pub struct EffectiveSendConfig {
    pub block_size: usize,
    pub min_window_size: u32,
    pub max_window_size: u32,
    pub initial_window_size: u32,
    pub retry_interval: Duration,
    pub max_send_attempts: u32,
    pub window_adjust_period: u32,
    pub window_adjust_factor: f64,
    pub transfer_deadline: Option<Duration>,
}

pub struct EffectiveReceiveConfig {
    pub receive_window_size: usize,
    pub idle_timeout: Duration,
    pub max_message_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BlockwiseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_block_size() {
        let config = BlockwiseConfig {
            block_size: 100,
            ..BlockwiseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_window_bounds() {
        let config = BlockwiseConfig {
            min_window_size: 10,
            max_window_size: 5,
            ..BlockwiseConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BlockwiseConfig {
            initial_window_size: 2000,
            ..BlockwiseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_idle_timeout() {
        let config = BlockwiseConfig {
            idle_timeout: Duration::from_millis(100),
            ..BlockwiseConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
