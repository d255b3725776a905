use std::io::Write;
use std::time::Duration;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::event::PatternPos;
use crate::queue::{event_queue, EventReceiver};
use crate::rx::{RxBuffer, RxFeeder};

/// Byte source and sink drained by the dispatch loop.
pub trait UartDriver {
    /// Reads up to `buf.len()` bytes, waiting at most `timeout` for all of
    /// them to arrive. Returns the number of bytes read.
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize>;

    fn buffered_len(&self) -> usize;

    /// Discards everything received but not yet read.
    fn flush_input(&mut self) -> Result<()>;

    fn pattern_pop_pos(&mut self) -> PatternPos;

    /// Flushes buffered input and drains `events`, returning the byte and
    /// event counts discarded. Implementations fed from another thread must
    /// do both under one lock so the queue and buffer end up empty together.
    fn resync(&mut self, events: &EventReceiver) -> Result<(usize, usize)> {
        let flushed = self.buffered_len();
        self.flush_input()?;
        Ok((flushed, events.reset()))
    }
}

/// Driver port over a shared RX buffer and any writable sink.
pub struct UartPort<W> {
    rx: RxBuffer,
    tx: W,
}

impl<W: Write> UartPort<W> {
    pub fn new(rx: RxBuffer, tx: W) -> Self {
        Self { rx, tx }
    }

    pub fn sink(&self) -> &W {
        &self.tx
    }
}

impl<W: Write> UartDriver for UartPort<W> {
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        Ok(self.rx.read(buf, timeout))
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        self.tx.write_all(data)?;
        self.tx.flush()?;
        Ok(data.len())
    }

    fn buffered_len(&self) -> usize {
        self.rx.buffered_len()
    }

    fn flush_input(&mut self) -> Result<()> {
        let n = self.rx.flush();
        log::debug!("flushed {n} buffered bytes");
        Ok(())
    }

    fn pattern_pop_pos(&mut self) -> PatternPos {
        self.rx.pop_pattern_pos()
    }

    fn resync(&mut self, events: &EventReceiver) -> Result<(usize, usize)> {
        Ok(self.rx.flush_with(|| events.reset()))
    }
}

/// Everything `install` hands out: the port for the dispatcher, the feeder
/// for whoever receives from the line, and the event queue.
pub struct DriverParts<W> {
    pub port: UartPort<W>,
    pub feeder: RxFeeder,
    pub events: EventReceiver,
}

/// Builds the RX buffer, event queue and feeder for one port.
pub fn install<W: Write>(config: &DriverConfig, tx: W) -> Result<DriverParts<W>> {
    config.validate()?;

    let rx = RxBuffer::new(config.rx_buffer_size, config.pattern_queue_len);
    let (sender, events) = event_queue(config.queue_len);
    let feeder = RxFeeder::new(rx.clone(), sender, config.pattern);

    log::debug!(
        "driver installed: rx buffer {} bytes, queue {} events, pattern {}x{:?}",
        config.rx_buffer_size,
        config.queue_len,
        config.pattern.count,
        config.pattern.byte as char
    );

    Ok(DriverParts {
        port: UartPort::new(rx, tx),
        feeder,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::UartEvent;

    #[test]
    fn test_install_wires_feeder_to_port() {
        let DriverParts { mut port, feeder, events } =
            install(&DriverConfig::default(), Vec::new()).unwrap();

        feeder.feed(b"hi");
        assert_eq!(events.recv(), Some(UartEvent::Data { size: 2 }));
        assert_eq!(port.buffered_len(), 2);

        let mut buf = [0u8; 2];
        assert_eq!(port.read_bytes(&mut buf, None).unwrap(), 2);
        assert_eq!(port.write_bytes(&buf).unwrap(), 2);
        assert_eq!(port.sink(), &b"hi".to_vec());
    }

    #[test]
    fn test_install_rejects_bad_config() {
        let cfg = DriverConfig { queue_len: 0, ..Default::default() };
        assert!(install(&cfg, Vec::new()).is_err());
    }

    #[test]
    fn test_resync_empties_buffer_and_queue() {
        let DriverParts { mut port, feeder, events } =
            install(&DriverConfig::default(), Vec::new()).unwrap();
        feeder.feed(b"ab+++cd");

        assert_eq!(port.resync(&events).unwrap(), (7, 2));
        assert_eq!(port.buffered_len(), 0);
        assert!(events.is_empty());
        assert_eq!(port.pattern_pop_pos(), PatternPos::Lost);
    }

    #[test]
    fn test_flush_input_empties_buffer() {
        let DriverParts { mut port, feeder, .. } =
            install(&DriverConfig::default(), Vec::new()).unwrap();
        feeder.feed(b"abc+++");
        port.flush_input().unwrap();
        assert_eq!(port.buffered_len(), 0);
        assert_eq!(port.pattern_pop_pos(), PatternPos::Lost);
    }
}
