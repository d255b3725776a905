//! Receive side of the driver: a bounded byte buffer with a queue of marker
//! positions, and the feeder that fills it from the line.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uartev_decode::{PatternConfig, PatternDetector};

use crate::event::{LineCondition, PatternPos, UartEvent};
use crate::queue::EventSender;

struct RxState {
    data: VecDeque<u8>,
    capacity: usize,
    /// Absolute stream offsets of pending markers.
    positions: VecDeque<u64>,
    positions_capacity: usize,
    /// Absolute stream offset of `data[0]`.
    consumed: u64,
    closed: bool,
}

impl RxState {
    fn received(&self) -> u64 {
        self.consumed + self.data.len() as u64
    }

    fn free(&self) -> usize {
        self.capacity - self.data.len()
    }
}

struct Shared {
    state: Mutex<RxState>,
    ready: Condvar,
}

/// Shared handle to the RX buffer. Clones refer to the same buffer.
#[derive(Clone)]
pub struct RxBuffer {
    inner: Arc<Shared>,
}

impl RxBuffer {
    pub fn new(capacity: usize, pattern_queue_len: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(RxState {
                    data: VecDeque::with_capacity(capacity),
                    capacity,
                    positions: VecDeque::with_capacity(pattern_queue_len),
                    positions_capacity: pattern_queue_len,
                    consumed: 0,
                    closed: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Reads up to `buf.len()` bytes.
    ///
    /// Waits until the whole request is buffered, the timeout expires or the
    /// buffer is closed, then copies out whatever is available. A `None`
    /// timeout waits without limit.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> usize {
        let want = buf.len();
        if want == 0 {
            return 0;
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut st = self.inner.state.lock();
        while st.data.len() < want && !st.closed {
            match deadline {
                Some(deadline) => {
                    if self.inner.ready.wait_until(&mut st, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.ready.wait(&mut st),
            }
        }

        let n = want.min(st.data.len());
        for (dst, src) in buf.iter_mut().zip(st.data.drain(..n)) {
            *dst = src;
        }
        st.consumed += n as u64;
        n
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().data.len()
    }

    /// Drops all buffered bytes and pending marker positions.
    pub fn flush(&self) -> usize {
        self.flush_with(|| ()).0
    }

    /// Flushes and runs `f` without releasing the buffer lock in between.
    ///
    /// Feeders post events while holding the same lock, so no chunk can be
    /// stored by one step and its events discarded by the other.
    pub fn flush_with<R>(&self, f: impl FnOnce() -> R) -> (usize, R) {
        let mut st = self.inner.state.lock();
        let n = st.data.len();
        st.data.clear();
        st.consumed += n as u64;
        st.positions.clear();
        (n, f())
    }

    /// Pops the oldest marker position, relative to the read cursor.
    pub fn pop_pattern_pos(&self) -> PatternPos {
        let mut st = self.inner.state.lock();
        match st.positions.pop_front() {
            Some(abs) if abs >= st.consumed => PatternPos::At((abs - st.consumed) as usize),
            _ => PatternPos::Lost,
        }
    }

    /// Wakes blocked readers; later reads return what is buffered at once.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// Producer half of the driver: turns received chunks into buffered bytes
/// and queued events. Dropping the feeder closes the buffer.
pub struct RxFeeder {
    rx: RxBuffer,
    events: EventSender,
    detector: PatternDetector,
}

impl RxFeeder {
    pub fn new(rx: RxBuffer, events: EventSender, pattern: PatternConfig) -> Self {
        Self {
            rx,
            events,
            detector: PatternDetector::new(pattern),
        }
    }

    /// Stores one received chunk and posts the events it produces.
    ///
    /// Each marker yields `PatternDetected` for the bytes up to and including
    /// it; the bytes after the last marker yield `Data`. A segment that does
    /// not fit is dropped with the rest of the chunk and `BufferFull` posted.
    /// Events are posted before the buffer lock is released.
    pub fn feed(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let markers = self.detector.scan(chunk);

        {
            let mut st = self.rx.inner.state.lock();
            let mut cursor = 0;
            let mut full = false;

            for marker in markers {
                let segment = &chunk[cursor..marker.end];
                if segment.len() > st.free() {
                    full = true;
                    break;
                }
                let pos = st.received() + (marker.start - cursor) as u64;
                st.data.extend(segment);
                if st.positions.len() < st.positions_capacity {
                    st.positions.push_back(pos);
                } else {
                    log::warn!("pattern queue full, position {pos} not recorded");
                }
                self.events.post(UartEvent::PatternDetected);
                cursor = marker.end;
            }

            if !full && cursor < chunk.len() {
                let tail = &chunk[cursor..];
                if tail.len() > st.free() {
                    full = true;
                } else {
                    st.data.extend(tail);
                    self.events.post(UartEvent::Data { size: tail.len() });
                }
            }

            if full {
                log::debug!(
                    "rx buffer full ({} of {} bytes), dropping input",
                    st.data.len(),
                    st.capacity
                );
                self.events.post(UartEvent::BufferFull);
            }
        }
        self.rx.inner.ready.notify_all();
    }

    pub fn report(&self, condition: LineCondition) {
        let _st = self.rx.inner.state.lock();
        self.events.post(condition.into());
    }

    pub fn buffer(&self) -> &RxBuffer {
        &self.rx
    }
}

impl Drop for RxFeeder {
    fn drop(&mut self) {
        self.rx.close();
    }
}
