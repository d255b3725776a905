use std::fmt;

/// Notification posted by the driver for the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// `size` bytes of ordinary data are buffered.
    Data { size: usize },
    Break,
    BufferFull,
    FifoOverflow,
    FrameError,
    ParityError,
    /// A marker was seen; its position sits in the pattern queue.
    PatternDetected,
    Other(u32),
}

impl UartEvent {
    pub const DATA: u32 = 0;
    pub const BREAK: u32 = 1;
    pub const BUFFER_FULL: u32 = 2;
    pub const FIFO_OVERFLOW: u32 = 3;
    pub const FRAME_ERROR: u32 = 4;
    pub const PARITY_ERROR: u32 = 5;
    pub const PATTERN_DETECTED: u32 = 7;

    pub fn code(&self) -> u32 {
        match self {
            Self::Data { .. } => Self::DATA,
            Self::Break => Self::BREAK,
            Self::BufferFull => Self::BUFFER_FULL,
            Self::FifoOverflow => Self::FIFO_OVERFLOW,
            Self::FrameError => Self::FRAME_ERROR,
            Self::ParityError => Self::PARITY_ERROR,
            Self::PatternDetected => Self::PATTERN_DETECTED,
            Self::Other(code) => *code,
        }
    }

    /// Builds an event from its numeric code. `size` is only kept for data.
    pub fn from_code(code: u32, size: usize) -> Self {
        match code {
            Self::DATA => Self::Data { size },
            Self::BREAK => Self::Break,
            Self::BUFFER_FULL => Self::BufferFull,
            Self::FIFO_OVERFLOW => Self::FifoOverflow,
            Self::FRAME_ERROR => Self::FrameError,
            Self::PARITY_ERROR => Self::ParityError,
            Self::PATTERN_DETECTED => Self::PatternDetected,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for UartEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data { size } => write!(f, "data ({size} bytes)"),
            Self::Break => f.write_str("rx break"),
            Self::BufferFull => f.write_str("ring buffer full"),
            Self::FifoOverflow => f.write_str("hw fifo overflow"),
            Self::FrameError => f.write_str("frame error"),
            Self::ParityError => f.write_str("parity error"),
            Self::PatternDetected => f.write_str("pattern detected"),
            Self::Other(code) => write!(f, "event type {code}"),
        }
    }
}

/// Line conditions a producer reports without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCondition {
    Break,
    ParityError,
    FrameError,
    FifoOverflow,
}

impl From<LineCondition> for UartEvent {
    fn from(cond: LineCondition) -> Self {
        match cond {
            LineCondition::Break => UartEvent::Break,
            LineCondition::ParityError => UartEvent::ParityError,
            LineCondition::FrameError => UartEvent::FrameError,
            LineCondition::FifoOverflow => UartEvent::FifoOverflow,
        }
    }
}

/// Where the next detected marker starts in the RX buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPos {
    /// Bytes buffered ahead of the first marker byte.
    At(usize),
    /// The position was not recorded or no longer points at buffered data.
    Lost,
}

impl PatternPos {
    /// Vendor-style rendering, `-1` for a lost position. Logging only.
    pub fn as_raw(&self) -> i64 {
        match self {
            Self::At(pos) => *pos as i64,
            Self::Lost => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_from_code() {
        let events = [
            UartEvent::Data { size: 12 },
            UartEvent::Break,
            UartEvent::BufferFull,
            UartEvent::FifoOverflow,
            UartEvent::FrameError,
            UartEvent::ParityError,
            UartEvent::PatternDetected,
        ];
        for ev in events {
            assert_eq!(UartEvent::from_code(ev.code(), 12), ev);
        }
    }

    #[test]
    fn test_unknown_code_is_other() {
        assert_eq!(UartEvent::from_code(6, 0), UartEvent::Other(6));
        assert_eq!(UartEvent::Other(42).code(), 42);
        assert_eq!(UartEvent::Other(42).to_string(), "event type 42");
    }

    #[test]
    fn test_line_condition_mapping() {
        assert_eq!(UartEvent::from(LineCondition::FifoOverflow), UartEvent::FifoOverflow);
        assert_eq!(UartEvent::from(LineCondition::Break), UartEvent::Break);
    }

    #[test]
    fn test_lost_position_renders_as_minus_one() {
        assert_eq!(PatternPos::Lost.as_raw(), -1);
        assert_eq!(PatternPos::At(7).as_raw(), 7);
    }
}
