//! Core functionalities: UART events, driver buffers, the dispatch loop,
//! serial I/O and traffic logging.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod encoding;
pub mod error;
pub mod event;
pub mod logbuf;
pub mod queue;
pub mod rx;
pub mod serial_service;

pub use config::{DispatchConfig, DriverConfig};
pub use dispatch::{DispatchStats, EventDispatcher, Outcome};
pub use driver::{install, DriverParts, UartDriver, UartPort};
pub use encoding::TextEncoding;
pub use error::{Result, UartError};
pub use event::{LineCondition, PatternPos, UartEvent};
pub use logbuf::{Direction, LogEntry, TrafficLog};
pub use queue::{event_queue, EventReceiver, EventSender};
pub use rx::{RxBuffer, RxFeeder};
pub use serial_service::{PortInfo, ReaderHandle, SerialConfig, SerialService, SerialSession};
pub use uartev_decode::PatternConfig;
