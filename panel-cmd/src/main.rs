mod plot;
mod summary;

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::stderr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser};
use panel::logcodec::LogWriter;
use panel::source::{LinkOpts, LiveLink, Next, PacketSource, ReplayLog};
use plot::Plotter;
use serialport::SerialPort;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_TEMPLATE: &str = "panel-logs/panel-%F-%H%M%S.json";
const BAUD_RATE: u32 = 57600;

/// Capture, replay and plot piezo panel hit data.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    source: Source,

    /// Plot each record with gnuplot.
    #[arg(short, long, action)]
    plot: bool,

    /// With --serial, write records to this file.
    ///
    /// The name is expanded with strftime style escapes using the local time. Missing
    /// directories are created. Use an empty string to disable.
    #[arg(short = 'w', long, default_value = DEFAULT_LOG_TEMPLATE, value_name = "template")]
    save_logs: String,

    /// Serial read timeout, and time to wait before giving up on a frame, in
    /// milliseconds.
    #[arg(long, default_value_t = 100, value_name = "ms")]
    timeout: u64,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Read data from this serial port, opened at 57600 baud 8N1.
    #[arg(short, long, value_name = "/dev/tty...")]
    serial: Option<PathBuf>,

    /// Read data from this log file, or - for stdin.
    #[arg(short, long, value_name = "path")]
    read_log: Option<PathBuf>,
}

/// Expand a strftime style log name template.
fn log_path(template: &str, now: &DateTime<Local>) -> Result<PathBuf> {
    let mut name = String::new();
    write!(name, "{}", now.format(template))
        .map_err(|_| anyhow!("invalid log name template {template:?}"))?;
    Ok(PathBuf::from(name))
}

fn create_log(template: &str) -> Result<Option<LogWriter<File>>> {
    if template.is_empty() {
        return Ok(None);
    }
    let path = log_path(template, &Local::now())?;
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating log directory {dir:?}"))?;
    }
    let file = File::create(&path).with_context(|| format!("failed to create log {path:?}"))?;
    info!("saving logs to {path:?}");
    Ok(Some(LogWriter::new(file)))
}

/// Read records from `source` until it ends or fails, printing and plotting each one.
fn run<S: PacketSource>(source: &mut S, mut plotter: Option<&mut Plotter>) -> Result<()> {
    let mut t0 = None;
    loop {
        if let Some(p) = plotter.as_deref_mut() {
            p.poll()?;
        }
        let rec = match source.read()? {
            Next::Record(rec) => rec,
            Next::Idle => continue,
            Next::End => return Ok(()),
        };
        let t0 = *t0.get_or_insert(rec.captured_at.epoch);
        println!("{}", summary::describe(&rec, t0));

        if let Some(p) = plotter.as_deref_mut() {
            p.plot(&rec)?;
        }
    }
}

fn open_port(port: &Path, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let name = port.to_string_lossy();
    let port = serialport::new(name.as_ref(), BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .with_context(|| format!("opening port {name}"))?;
    info!(baud = BAUD_RATE, ?timeout, "opened port {name}");
    Ok(port)
}

fn live(port: &Path, cli: &Cli, plotter: Option<&mut Plotter>) -> Result<()> {
    let timeout = Duration::from_millis(cli.timeout);
    let reader = open_port(port, timeout)?;

    let opts = LinkOpts::builder().timeout(timeout);
    let opts = match create_log(&cli.save_logs)? {
        Some(writer) => opts.sink(Box::new(writer)).build(),
        None => opts.build(),
    };
    let mut link = LiveLink::new(reader, opts);

    let zult = run(&mut link, plotter);
    let stats = link.stats();
    info!(
        frames = stats.frames,
        records = stats.records,
        discarded_bytes = stats.discarded_bytes,
        incomplete = stats.incomplete_frames,
        checksum_errors = stats.checksum_errors,
        "link closed"
    );
    zult
}

fn replay(path: &Path, plotter: Option<&mut Plotter>) -> Result<()> {
    let mut replay = ReplayLog::open(path).with_context(|| format!("opening log {path:?}"))?;
    run(&mut replay, plotter)?;
    println!("File finished, exiting");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("PANEL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // a replayed plot should stay up after we exit
    let mut plotter = if cli.plot {
        Some(Plotter::spawn(cli.source.serial.is_none())?)
    } else {
        None
    };

    match (&cli.source.serial, &cli.source.read_log) {
        (Some(port), _) => live(port, &cli, plotter.as_mut()),
        (None, Some(path)) => replay(path, plotter.as_mut()),
        (None, None) => bail!("no data source"),
    }
}
