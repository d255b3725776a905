use std::time::Duration;

use uartev_decode::PatternConfig;

use crate::error::{Result, UartError};
use crate::TextEncoding;

/// Sizes of the driver-side buffers and the marker to detect.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub rx_buffer_size: usize,
    pub queue_len: usize,
    pub pattern_queue_len: usize,
    /// Largest chunk the reader hands to the feeder at once.
    pub read_chunk: usize,
    pub pattern: PatternConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rx_buffer_size: 2048,
            queue_len: 20,
            pattern_queue_len: 20,
            read_chunk: 120,
            pattern: PatternConfig::default(),
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rx_buffer_size == 0 {
            return Err(UartError::InvalidConfig("rx_buffer_size must be non-zero".into()));
        }
        if self.queue_len == 0 {
            return Err(UartError::InvalidConfig("queue_len must be non-zero".into()));
        }
        if self.read_chunk == 0 {
            return Err(UartError::InvalidConfig("read_chunk must be non-zero".into()));
        }
        if self.pattern.count == 0 {
            return Err(UartError::InvalidConfig("pattern count must be at least 1".into()));
        }
        if self.pattern.count > self.rx_buffer_size {
            return Err(UartError::InvalidConfig(format!(
                "pattern of {} bytes does not fit a {} byte rx buffer",
                self.pattern.count, self.rx_buffer_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Initial size of the scratch buffer used for reads.
    pub read_buf_size: usize,
    pub data_read_timeout: Option<Duration>,
    pub pattern_read_timeout: Option<Duration>,
    /// Encoding used when payloads are shown in log lines.
    pub encoding: TextEncoding,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            read_buf_size: 1024,
            data_read_timeout: Some(Duration::from_secs(1)),
            pattern_read_timeout: Some(Duration::from_millis(100)),
            encoding: TextEncoding::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DriverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let cfg = DriverConfig { queue_len: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(UartError::InvalidConfig(_))));

        let cfg = DriverConfig { rx_buffer_size: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_marker_larger_than_buffer() {
        let cfg = DriverConfig {
            rx_buffer_size: 2,
            pattern: PatternConfig::new(b'+', 3),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
