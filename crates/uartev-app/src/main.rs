mod config;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use config::Settings;
use uartev_core::{
    install, DispatchStats, DriverParts, EventDispatcher, LineCondition, SerialService, TrafficLog,
};
use uartev_decode::PatternConfig;

const TRAFFIC_LOG_ENTRIES: usize = 10_000;

/// Echo serial traffic and report UART events, with marker detection.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// list available serial ports and exit
    #[arg(short, long)]
    list: bool,

    /// serial port to open
    #[arg(short, long)]
    port: Option<String>,

    /// baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// feed stdin lines to the driver instead of a serial port
    #[arg(long, conflicts_with = "port")]
    loopback: bool,

    /// config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// marker character
    #[arg(long)]
    pattern_char: Option<char>,

    /// how many repetitions of the marker character form a marker
    #[arg(long)]
    pattern_count: Option<usize>,

    /// event queue length
    #[arg(long)]
    queue_len: Option<usize>,

    /// rx buffer size in bytes
    #[arg(long)]
    rx_buffer: Option<usize>,

    /// write the traffic log to this file on exit
    #[arg(short, long)]
    transcript: Option<PathBuf>,

    /// render the transcript as hex
    #[arg(long)]
    hex: bool,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    builder.init();

    if args.list {
        for port in SerialService::list_ports() {
            println!("{port}");
        }
        return Ok(());
    }

    let file = config::load(args.config.as_deref())?;
    let mut settings = Settings::from_file(&file)?;
    apply_overrides(&args, &mut settings)?;

    let traffic = Arc::new(Mutex::new(TrafficLog::new(TRAFFIC_LOG_ENTRIES)));
    let stats = if args.loopback {
        run_loopback(&settings, traffic.clone())?
    } else {
        run_serial(&settings, traffic.clone())?
    };
    log::info!("session finished: {stats:?}");

    if let Some(path) = &args.transcript {
        let text = traffic.lock().to_text_with_encoding(true, args.hex, settings.dispatch.encoding);
        std::fs::write(path, text).with_context(|| format!("writing transcript {}", path.display()))?;
        log::info!("wrote {} traffic entries to {}", traffic.lock().len(), path.display());
    }
    Ok(())
}

fn apply_overrides(args: &Args, settings: &mut Settings) -> Result<()> {
    if let Some(port) = &args.port {
        settings.serial.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        settings.serial.baud_rate = baud;
    }
    if let Some(c) = args.pattern_char {
        let byte = u8::try_from(c).with_context(|| format!("marker character {c:?} is not a single byte"))?;
        settings.driver.pattern = PatternConfig::new(byte, settings.driver.pattern.count);
    }
    if let Some(count) = args.pattern_count {
        settings.driver.pattern.count = count;
    }
    if let Some(len) = args.queue_len {
        settings.driver.queue_len = len;
    }
    if let Some(size) = args.rx_buffer {
        settings.driver.rx_buffer_size = size;
    }
    Ok(())
}

fn run_serial(settings: &Settings, traffic: Arc<Mutex<TrafficLog>>) -> Result<DispatchStats> {
    if settings.serial.port_name.is_empty() {
        anyhow::bail!("no serial port given, use --port, --loopback or a config file");
    }
    let session = SerialService::open(&settings.serial, &settings.driver)
        .with_context(|| format!("opening {}", settings.serial.port_name))?;
    let (port, events, reader) = session.into_parts();

    let mut dispatcher =
        EventDispatcher::new(port, events, settings.driver.pattern, settings.dispatch.clone()).with_traffic_log(traffic);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    // Dropped when the dispatcher returns, e.g. after the reader thread died.
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
    let worker = std::thread::Builder::new()
        .name("uart-events".into())
        .spawn(move || {
            let _done = done_tx;
            dispatcher.run_until(&stop_rx);
            dispatcher.stats().clone()
        })?;

    log::info!("dispatching events, close stdin (Ctrl-D) or type `quit` to stop");
    match wait_for_session_end(&stdin_lines(), &done_rx) {
        SessionEnd::Requested => log::info!("stopping"),
        SessionEnd::LineClosed => log::warn!("serial line closed, ending session"),
    }

    let _ = stop_tx.send(());
    let stats = worker.join().map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
    reader.close();
    Ok(stats)
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// `quit` typed or stdin closed.
    Requested,
    /// The dispatcher stopped on its own.
    LineClosed,
}

/// Stdin lines, read on a detached thread so the session can also end when
/// the serial side goes away.
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn wait_for_session_end(lines: &Receiver<String>, done: &Receiver<()>) -> SessionEnd {
    loop {
        crossbeam_channel::select! {
            recv(lines) -> line => match line {
                Ok(line) if line.trim() == "quit" => return SessionEnd::Requested,
                Ok(_) => {}
                Err(_) => return SessionEnd::Requested,
            },
            recv(done) -> _ => return SessionEnd::LineClosed,
        }
    }
}

/// Input line in loopback mode.
#[derive(Debug, PartialEq, Eq)]
enum LoopbackInput {
    Bytes(Vec<u8>),
    Condition(LineCondition),
}

/// `!break`, `!parity`, `!frame` and `!overflow` report line conditions;
/// `hex:<digits>` feeds raw bytes; anything else is fed with a trailing
/// newline.
fn parse_loopback_line(line: &str) -> Result<LoopbackInput> {
    Ok(match line.trim_end_matches(['\r', '\n']) {
        "!break" => LoopbackInput::Condition(LineCondition::Break),
        "!parity" => LoopbackInput::Condition(LineCondition::ParityError),
        "!frame" => LoopbackInput::Condition(LineCondition::FrameError),
        "!overflow" => LoopbackInput::Condition(LineCondition::FifoOverflow),
        text => match text.strip_prefix("hex:") {
            Some(digits) => LoopbackInput::Bytes(hex::decode(digits.trim()).context("invalid hex input")?),
            None => {
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(b'\n');
                LoopbackInput::Bytes(bytes)
            }
        },
    })
}

fn run_loopback(settings: &Settings, traffic: Arc<Mutex<TrafficLog>>) -> Result<DispatchStats> {
    let DriverParts { port, feeder, events } = install(&settings.driver, io::stdout())?;
    let mut dispatcher =
        EventDispatcher::new(port, events, settings.driver.pattern, settings.dispatch.clone()).with_traffic_log(traffic);
    let worker = std::thread::Builder::new()
        .name("uart-events".into())
        .spawn(move || {
            dispatcher.run();
            dispatcher.stats().clone()
        })?;

    for line in io::stdin().lock().lines() {
        match parse_loopback_line(&line?) {
            Ok(LoopbackInput::Bytes(bytes)) => feeder.feed(&bytes),
            Ok(LoopbackInput::Condition(cond)) => feeder.report(cond),
            Err(e) => log::warn!("{e:#}"),
        }
    }
    drop(feeder);

    worker.join().map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))
}
