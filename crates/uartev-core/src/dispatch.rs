//! The event dispatch loop.
//!
//! One dispatcher consumes one event queue and owns the driver while it
//! handles an event. Every condition is recovered locally: overflows flush
//! and resynchronise, line errors are only logged, and I/O failures end the
//! current iteration.

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use uartev_decode::PatternConfig;

use crate::config::DispatchConfig;
use crate::driver::UartDriver;
use crate::error::Result;
use crate::event::{PatternPos, UartEvent};
use crate::logbuf::{Direction, TrafficLog};
use crate::queue::EventReceiver;

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Echoed { read: usize, written: usize },
    Pattern { pos: usize, data: Vec<u8>, marker: Vec<u8> },
    /// The marker position was lost; `flushed` buffered bytes were dropped.
    PatternLost { flushed: usize },
    Resynced { flushed: usize, drained: usize },
    LineCondition(UartEvent),
    Unhandled(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub data_events: u64,
    pub pattern_events: u64,
    pub patterns_lost: u64,
    pub resyncs: u64,
    pub line_conditions: u64,
    pub unhandled: u64,
    pub bytes_echoed: u64,
    pub events_drained: u64,
    pub failures: u64,
}

pub struct EventDispatcher<D> {
    driver: D,
    events: EventReceiver,
    pattern_len: usize,
    config: DispatchConfig,
    scratch: Vec<u8>,
    traffic: Option<Arc<Mutex<TrafficLog>>>,
    stats: DispatchStats,
}

impl<D: UartDriver> EventDispatcher<D> {
    pub fn new(driver: D, events: EventReceiver, pattern: PatternConfig, config: DispatchConfig) -> Self {
        Self {
            driver,
            events,
            pattern_len: pattern.count,
            scratch: vec![0; config.read_buf_size],
            config,
            traffic: None,
            stats: DispatchStats::default(),
        }
    }

    /// Records every payload read or echoed into `log`.
    pub fn with_traffic_log(mut self, log: Arc<Mutex<TrafficLog>>) -> Self {
        self.traffic = Some(log);
        self
    }

    /// Handles events until every producer is gone.
    pub fn run(&mut self) {
        while let Some(event) = self.events.recv() {
            self.dispatch(event);
        }
        log::info!("event queue closed, dispatcher exiting");
    }

    /// Like [`run`](Self::run), but also returns when `stop` receives a
    /// message or is disconnected. The stop signal is checked between events.
    pub fn run_until(&mut self, stop: &Receiver<()>) {
        let events = self.events.channel().clone();
        loop {
            crossbeam_channel::select! {
                recv(events) -> msg => match msg {
                    Ok(event) => self.dispatch(event),
                    Err(_) => {
                        log::info!("event queue closed, dispatcher exiting");
                        break;
                    }
                },
                recv(stop) -> _ => {
                    log::info!("stop requested, dispatcher exiting");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, event: UartEvent) {
        if let Err(e) = self.handle(event) {
            self.stats.failures += 1;
            log::error!("failed to handle {event}: {e}");
        }
    }

    /// Handles a single event.
    pub fn handle(&mut self, event: UartEvent) -> Result<Outcome> {
        match event {
            UartEvent::Data { size } => self.on_data(size),
            UartEvent::PatternDetected => self.on_pattern(),
            UartEvent::FifoOverflow | UartEvent::BufferFull => self.resync(event),
            UartEvent::Break | UartEvent::ParityError | UartEvent::FrameError => {
                self.stats.line_conditions += 1;
                log::info!("uart {event}");
                Ok(Outcome::LineCondition(event))
            }
            UartEvent::Other(code) => {
                self.stats.unhandled += 1;
                log::info!("uart event type: {code}");
                Ok(Outcome::Unhandled(code))
            }
        }
    }

    fn on_data(&mut self, size: usize) -> Result<Outcome> {
        self.stats.data_events += 1;
        let read = self.fill_scratch(size, self.config.data_read_timeout)?;
        if read < size {
            log::warn!("data event announced {size} bytes, only {read} arrived");
        }

        let payload = &self.scratch[..read];
        log::info!(
            "event - uart data ({read} bytes): {}",
            self.config.encoding.decode_for_log(payload)
        );
        let written = if read > 0 { self.driver.write_bytes(payload)? } else { 0 };
        self.stats.bytes_echoed += written as u64;

        if let Some(log) = &self.traffic {
            let mut log = log.lock();
            log.push(Direction::Rx, payload.to_vec());
            log.push(Direction::Tx, payload[..written].to_vec());
        }
        Ok(Outcome::Echoed { read, written })
    }

    fn on_pattern(&mut self) -> Result<Outcome> {
        self.stats.pattern_events += 1;
        let buffered = self.driver.buffered_len();
        let pos = self.driver.pattern_pop_pos();
        log::info!(
            "event - pattern detected pos: {}, buffered size: {buffered}",
            pos.as_raw()
        );

        let pos = match pos {
            PatternPos::At(pos) => pos,
            PatternPos::Lost => {
                self.stats.patterns_lost += 1;
                log::warn!("pattern position lost, dropping {buffered} buffered bytes");
                self.driver.flush_input()?;
                return Ok(Outcome::PatternLost { flushed: buffered });
            }
        };

        let timeout = self.config.pattern_read_timeout;
        let n = self.fill_scratch(pos, timeout)?;
        let data = self.scratch[..n].to_vec();
        let n = self.fill_scratch(self.pattern_len, timeout)?;
        let marker = self.scratch[..n].to_vec();

        let encoding = self.config.encoding;
        log::info!("read data: {}", encoding.decode_for_log(&data));
        log::info!("read pat : {}", encoding.decode_for_log(&marker));

        if let Some(log) = &self.traffic {
            let mut entry = data.clone();
            entry.extend_from_slice(&marker);
            log.lock().push(Direction::Pattern, entry);
        }
        Ok(Outcome::Pattern { pos, data, marker })
    }

    fn resync(&mut self, event: UartEvent) -> Result<Outcome> {
        self.stats.resyncs += 1;
        log::info!("{event}, resynchronising");
        let (flushed, drained) = self.driver.resync(&self.events)?;
        self.stats.events_drained += drained as u64;
        log::debug!("dropped {flushed} buffered bytes and {drained} queued events");
        Ok(Outcome::Resynced { flushed, drained })
    }

    fn fill_scratch(&mut self, len: usize, timeout: Option<Duration>) -> Result<usize> {
        if self.scratch.len() < len {
            self.scratch.resize(len, 0);
        }
        self.driver.read_bytes(&mut self.scratch[..len], timeout)
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UartError;
    use crate::queue::{event_queue, EventSender};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockDriver {
        rx: VecDeque<u8>,
        positions: VecDeque<PatternPos>,
        reads: Vec<usize>,
        written: Vec<u8>,
        flushes: usize,
        fail_writes: bool,
    }

    impl MockDriver {
        fn with_input(input: &[u8]) -> Self {
            Self {
                rx: input.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl UartDriver for MockDriver {
        fn read_bytes(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> Result<usize> {
            self.reads.push(buf.len());
            let n = buf.len().min(self.rx.len());
            for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
            if self.fail_writes {
                return Err(UartError::Closed);
            }
            self.written.extend_from_slice(data);
            Ok(data.len())
        }

        fn buffered_len(&self) -> usize {
            self.rx.len()
        }

        fn flush_input(&mut self) -> Result<()> {
            self.flushes += 1;
            self.rx.clear();
            Ok(())
        }

        fn pattern_pop_pos(&mut self) -> PatternPos {
            self.positions.pop_front().unwrap_or(PatternPos::Lost)
        }
    }

    fn dispatcher(driver: MockDriver) -> (EventDispatcher<MockDriver>, EventSender) {
        let (tx, rx) = event_queue(8);
        let d = EventDispatcher::new(driver, rx, PatternConfig::default(), DispatchConfig::default());
        (d, tx)
    }

    #[test]
    fn test_data_event_echoes_exactly_size_bytes() {
        let (mut d, _tx) = dispatcher(MockDriver::with_input(b"hello world"));
        let outcome = d.handle(UartEvent::Data { size: 5 }).unwrap();

        assert_eq!(outcome, Outcome::Echoed { read: 5, written: 5 });
        assert_eq!(d.driver().reads, vec![5]);
        assert_eq!(d.driver().written, b"hello".to_vec());
        assert_eq!(d.driver().buffered_len(), 6);
    }

    #[test]
    fn test_data_event_larger_than_scratch_buffer() {
        let input = vec![0x5a; 3000];
        let (mut d, _tx) = dispatcher(MockDriver::with_input(&input));
        let outcome = d.handle(UartEvent::Data { size: 3000 }).unwrap();
        assert_eq!(outcome, Outcome::Echoed { read: 3000, written: 3000 });
        assert_eq!(d.driver().written, input);
    }

    #[test]
    fn test_short_data_echoes_what_arrived() {
        let (mut d, _tx) = dispatcher(MockDriver::with_input(b"ab"));
        let outcome = d.handle(UartEvent::Data { size: 4 }).unwrap();
        assert_eq!(outcome, Outcome::Echoed { read: 2, written: 2 });
        assert_eq!(d.driver().written, b"ab".to_vec());
    }

    #[test]
    fn test_lost_pattern_flushes_without_reading() {
        let (mut d, _tx) = dispatcher(MockDriver::with_input(b"abc+++"));
        let outcome = d.handle(UartEvent::PatternDetected).unwrap();

        assert_eq!(outcome, Outcome::PatternLost { flushed: 6 });
        assert!(d.driver().reads.is_empty());
        assert_eq!(d.driver().flushes, 1);
        assert_eq!(d.driver().buffered_len(), 0);
        assert_eq!(d.stats().patterns_lost, 1);
    }

    #[test]
    fn test_pattern_reads_prefix_then_marker() {
        let mut driver = MockDriver::with_input(b"ab+++ab+++");
        driver.positions.extend([PatternPos::At(2), PatternPos::At(2)]);
        let (mut d, _tx) = dispatcher(driver);

        for _ in 0..2 {
            let outcome = d.handle(UartEvent::PatternDetected).unwrap();
            assert_eq!(
                outcome,
                Outcome::Pattern { pos: 2, data: b"ab".to_vec(), marker: b"+++".to_vec() }
            );
        }
        assert_eq!(d.driver().reads, vec![2, 3, 2, 3]);
        assert!(d.driver().written.is_empty());
    }

    #[test]
    fn test_overflow_and_full_resynchronise() {
        for event in [UartEvent::FifoOverflow, UartEvent::BufferFull] {
            let (mut d, tx) = dispatcher(MockDriver::with_input(b"stale"));
            tx.post(UartEvent::Data { size: 5 });
            tx.post(UartEvent::PatternDetected);

            let outcome = d.handle(event).unwrap();

            assert_eq!(outcome, Outcome::Resynced { flushed: 5, drained: 2 });
            assert!(d.events().is_empty());
            assert_eq!(d.driver().buffered_len(), 0);
        }
    }

    #[test]
    fn test_line_conditions_only_log() {
        let (mut d, _tx) = dispatcher(MockDriver::with_input(b"keep"));
        for event in [UartEvent::Break, UartEvent::ParityError, UartEvent::FrameError] {
            assert_eq!(d.handle(event).unwrap(), Outcome::LineCondition(event));
        }
        assert_eq!(d.handle(UartEvent::Other(9)).unwrap(), Outcome::Unhandled(9));

        let driver = d.driver();
        assert!(driver.reads.is_empty());
        assert!(driver.written.is_empty());
        assert_eq!(driver.flushes, 0);
        assert_eq!(driver.buffered_len(), 4);
    }

    #[test]
    fn test_run_drains_queue_then_exits() {
        let (mut d, tx) = dispatcher(MockDriver::with_input(b"abcdef"));
        tx.post(UartEvent::Data { size: 3 });
        tx.post(UartEvent::Break);
        tx.post(UartEvent::Data { size: 3 });
        drop(tx);

        d.run();

        assert_eq!(d.driver().written, b"abcdef".to_vec());
        assert_eq!(d.stats().data_events, 2);
        assert_eq!(d.stats().line_conditions, 1);
        assert_eq!(d.stats().bytes_echoed, 6);
    }

    #[test]
    fn test_write_failure_does_not_stop_the_loop() {
        let mut driver = MockDriver::with_input(b"abcd");
        driver.fail_writes = true;
        let (mut d, tx) = dispatcher(driver);
        tx.post(UartEvent::Data { size: 2 });
        tx.post(UartEvent::Data { size: 2 });
        drop(tx);

        d.run();

        assert_eq!(d.stats().failures, 2);
        assert_eq!(d.driver().buffered_len(), 0);
    }

    #[test]
    fn test_run_until_honours_stop() {
        let (mut d, tx) = dispatcher(MockDriver::default());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let handle = std::thread::spawn(move || {
            d.run_until(&stop_rx);
            d
        });
        stop_tx.send(()).unwrap();
        let d = handle.join().unwrap();

        assert_eq!(d.stats(), &DispatchStats::default());
        drop(tx);
    }

    #[test]
    fn test_traffic_log_records_echo_and_pattern() {
        let mut driver = MockDriver::with_input(b"x+++yz");
        driver.positions.push_back(PatternPos::At(1));
        let log = Arc::new(Mutex::new(TrafficLog::new(16)));
        let (d, _tx) = dispatcher(driver);
        let mut d = d.with_traffic_log(log.clone());

        d.handle(UartEvent::PatternDetected).unwrap();
        d.handle(UartEvent::Data { size: 2 }).unwrap();

        assert_eq!(log.lock().to_text(false, false), "PAT: x+++\nRX: yz\nTX: yz\n");
    }
}
