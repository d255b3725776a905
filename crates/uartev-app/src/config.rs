use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use uartev_core::{DispatchConfig, DriverConfig, SerialConfig, TextEncoding};
use uartev_decode::PatternConfig;

/// On-disk settings. Every field is optional; missing ones keep defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<String>,
    pub stop_bits: Option<u8>,
    pub flow_control: Option<String>,
    pub pattern: Option<PatternConfig>,
    pub queue_len: Option<usize>,
    pub pattern_queue_len: Option<usize>,
    pub rx_buffer_size: Option<usize>,
    pub read_chunk: Option<usize>,
    pub encoding: Option<String>,
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("uartev").join("config.json"))
}

/// Reads `path`, or the default location when `path` is `None`. A missing
/// default file is not an error.
pub fn load(path: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_path() {
            Some(path) => (path, false),
            None => return Ok(FileConfig::default()),
        },
    };

    if !required && !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let cfg = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    log::debug!("loaded config from {}", path.display());
    Ok(cfg)
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub serial: SerialConfig,
    pub driver: DriverConfig,
    pub dispatch: DispatchConfig,
}

impl Settings {
    pub fn from_file(file: &FileConfig) -> Result<Self> {
        let mut serial = SerialConfig::default();
        if let Some(port) = &file.port {
            serial.port_name = port.clone();
        }
        if let Some(baud) = file.baud_rate {
            serial.baud_rate = baud;
        }
        if let Some(bits) = file.data_bits {
            serial.data_bits = parse_data_bits(bits)?;
        }
        if let Some(parity) = &file.parity {
            serial.parity = parse_parity(parity)?;
        }
        if let Some(bits) = file.stop_bits {
            serial.stop_bits = parse_stop_bits(bits)?;
        }
        if let Some(flow) = &file.flow_control {
            serial.flow_control = parse_flow_control(flow)?;
        }

        let defaults = DriverConfig::default();
        let driver = DriverConfig {
            rx_buffer_size: file.rx_buffer_size.unwrap_or(defaults.rx_buffer_size),
            queue_len: file.queue_len.unwrap_or(defaults.queue_len),
            pattern_queue_len: file.pattern_queue_len.unwrap_or(defaults.pattern_queue_len),
            read_chunk: file.read_chunk.unwrap_or(defaults.read_chunk),
            pattern: file.pattern.unwrap_or(defaults.pattern),
        };

        let mut dispatch = DispatchConfig::default();
        if let Some(name) = &file.encoding {
            dispatch.encoding = name.parse::<TextEncoding>().map_err(anyhow::Error::msg)?;
        }

        Ok(Self { serial, driver, dispatch })
    }
}

fn parse_data_bits(bits: u8) -> Result<serialport::DataBits> {
    Ok(match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => bail!("unsupported data bits: {other}"),
    })
}

fn parse_parity(name: &str) -> Result<serialport::Parity> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "none" => serialport::Parity::None,
        "odd" => serialport::Parity::Odd,
        "even" => serialport::Parity::Even,
        other => bail!("unsupported parity: {other}"),
    })
}

fn parse_stop_bits(bits: u8) -> Result<serialport::StopBits> {
    Ok(match bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => bail!("unsupported stop bits: {other}"),
    })
}

fn parse_flow_control(name: &str) -> Result<serialport::FlowControl> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "none" => serialport::FlowControl::None,
        "software" => serialport::FlowControl::Software,
        "hardware" => serialport::FlowControl::Hardware,
        other => bail!("unsupported flow control: {other}"),
    })
}
