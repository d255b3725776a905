use crossbeam_channel::{unbounded, Sender, TryRecvError};
use serialport::{SerialPort, SerialPortInfo};
use std::io::{ErrorKind, Read};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::DriverConfig;
use crate::driver::{install, UartPort};
use crate::error::Result;
use crate::queue::EventReceiver;
use crate::rx::RxFeeder;

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number.clone(),
                usb.manufacturer.clone(),
                usb.product.clone(),
            ),
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => write!(f, "{} ({:04X}:{:04X})", self.port_name, vid, pid),
            _ => write!(f, "{} [{}]", self.port_name, self.port_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
        }
    }
}

enum Command {
    Close,
}

/// An open serial port: the dispatcher side (`port`, `events`) and the
/// reader thread feeding it.
pub struct SerialSession {
    pub port: UartPort<Box<dyn SerialPort>>,
    pub events: EventReceiver,
    reader: ReaderHandle,
}

impl SerialSession {
    pub fn into_parts(self) -> (UartPort<Box<dyn SerialPort>>, EventReceiver, ReaderHandle) {
        (self.port, self.events, self.reader)
    }
}

/// Controls the background reader thread.
pub struct ReaderHandle {
    tx_cmd: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Stops the reader and waits for it to exit.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx_cmd.send(Command::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("serial reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct SerialService;

impl SerialService {
    pub fn list_ports() -> Vec<PortInfo> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(PortInfo::from)
            .collect()
    }

    /// Opens the port and starts a reader thread that feeds received bytes
    /// into the driver. The returned port writes through a clone of the
    /// serial handle.
    pub fn open(cfg: &SerialConfig, driver_cfg: &DriverConfig) -> Result<SerialSession> {
        let reader_port = serialport::new(&cfg.port_name, cfg.baud_rate)
            .data_bits(cfg.data_bits)
            .parity(cfg.parity)
            .stop_bits(cfg.stop_bits)
            .flow_control(cfg.flow_control)
            .timeout(Duration::from_millis(50))
            .open()?;
        let writer_port = reader_port.try_clone()?;

        let parts = install(driver_cfg, writer_port)?;
        let (tx_cmd, rx_cmd) = unbounded::<Command>();
        let chunk = driver_cfg.read_chunk;
        let port_name = cfg.port_name.clone();
        let feeder = parts.feeder;

        let thread = std::thread::Builder::new()
            .name(format!("uart-rx {port_name}"))
            .spawn(move || {
                read_loop(reader_port, feeder, chunk, || {
                    !matches!(rx_cmd.try_recv(), Err(TryRecvError::Empty))
                });
                log::info!("reader for {port_name} stopped");
            })?;

        log::info!("opened {} at {} baud", cfg.port_name, cfg.baud_rate);
        Ok(SerialSession {
            port: parts.port,
            events: parts.events,
            reader: ReaderHandle {
                tx_cmd,
                thread: Some(thread),
            },
        })
    }
}

/// Pumps `source` into `feeder` until `should_stop` is true or a read fails
/// with anything other than a timeout. Dropping the feeder on return closes
/// the RX buffer and disconnects the event queue.
fn read_loop<R: Read>(mut source: R, feeder: RxFeeder, chunk: usize, mut should_stop: impl FnMut() -> bool) {
    let mut buf = vec![0u8; chunk];
    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                log::info!("serial source reached end of stream");
                return;
            }
            Ok(n) => feeder.feed(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                log::error!("serial read failed: {e}");
                return;
            }
        }
        if should_stop() {
            return;
        }
    }
}
