//! EMS Wünsche CPC command-line tool
//!
//! Drives a CPC interface through the can-wuensche library:
//! - List the channels known to the vendor library and `cpcconf.ini`
//! - Dump received messages
//! - Send messages given in `cansend` notation
//! - Show the interface, driver and library info together with the bus setup

use anyhow::{Context, Result};
use can_wuensche::{duration_from_secs, BusConfig, BusState, WuenscheBus};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

mod config;
mod cpclib;
mod discovery;
mod frame_arg;

use config::AppConfig;
use cpclib::CpcLibrary;

/// EMS Wünsche CPC tool - Talk to CAN and CAN-FD interfaces
#[derive(Parser, Debug)]
#[command(name = "can-wuensche-cli")]
#[command(about = "Send and receive CAN frames through EMS Wünsche CPC interfaces", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// CPC library to load instead of the platform default
    #[arg(long, value_name = "FILE", global = true)]
    library: Option<PathBuf>,

    /// Channel name or JSON channel descriptor
    #[arg(long, global = true)]
    channel: Option<String>,

    /// Classic bitrate in bit/s
    #[arg(short, long, global = true)]
    bitrate: Option<u32>,

    /// Enable CAN-FD with this data phase bitrate; the nominal rate is --bitrate
    #[arg(long, value_name = "BITRATE", global = true)]
    data_bitrate: Option<u32>,

    /// Open the channel listen-only
    #[arg(long, global = true)]
    listen_only: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available channels
    List,

    /// Print received messages
    Dump {
        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop when nothing arrives for this many seconds
        #[arg(long, value_name = "SECONDS")]
        idle: Option<f64>,
    },

    /// Send messages (<id>#<data>, <id>#R<len>, <id>##<flags><data>)
    Send {
        #[arg(required = true)]
        frames: Vec<String>,

        /// Seconds to wait for transmit buffer space
        #[arg(long, value_name = "SECONDS", default_value_t = 1.0)]
        timeout: f64,
    },

    /// Show device info and bus configuration
    Info,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CPC CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using adapter library v{}", can_wuensche::VERSION);

    let app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match &args.command {
        Command::List => list_mode(&args, &app_config),
        Command::Dump { count, idle } => dump_mode(&args, app_config, *count, *idle),
        Command::Send { frames, timeout } => send_mode(&args, app_config, frames, *timeout),
        Command::Info => info_mode(&args, app_config),
    }
}

fn load_library(args: &Args, app_config: &AppConfig) -> Result<CpcLibrary> {
    let library = match args.library.as_ref().or(app_config.library.path.as_ref()) {
        Some(path) => CpcLibrary::load_from(path)
            .with_context(|| format!("Failed to load CPC library: {:?}", path))?,
        None => CpcLibrary::load().context("Failed to load CPC library")?,
    };
    Ok(library)
}

/// Merge command-line overrides into the configured bus settings
fn bus_config(args: &Args, mut config: BusConfig) -> BusConfig {
    if let Some(channel) = &args.channel {
        config = config.with_channel(channel.as_str());
    }
    match (args.bitrate, args.data_bitrate) {
        (Some(nominal), Some(data)) => config = config.with_fd_bitrates(nominal, data),
        (None, Some(data)) => {
            let nominal = config
                .timing_request
                .nom_bitrate
                .or(config.timing_request.bitrate)
                .unwrap_or(500_000);
            config = config.with_fd_bitrates(nominal, data);
        }
        (Some(bitrate), None) => config = config.with_bitrate(bitrate),
        (None, None) => {}
    }
    if args.listen_only {
        config = config.with_state(BusState::Passive);
    }
    config
}

fn open_bus(args: &Args, app_config: AppConfig) -> Result<WuenscheBus<CpcLibrary>> {
    let library = load_library(args, &app_config)?;
    let config = bus_config(args, app_config.bus);
    log::debug!("Bus configuration: {:?}", config);
    let channel = config.channel.clone();
    WuenscheBus::open(library, config)
        .with_context(|| format!("Failed to open channel {}", channel))
}

fn list_mode(args: &Args, app_config: &AppConfig) -> Result<()> {
    let library = match load_library(args, app_config) {
        Ok(library) => Some(library),
        Err(e) => {
            log::warn!("{:#}", e);
            None
        }
    };

    let channels = discovery::list_channels(library.as_ref());
    if channels.is_empty() {
        println!("No channels found");
    }
    for entry in &channels {
        if entry.descriptor.is_some() {
            println!("{:<20}  {}", entry.name, entry.channel());
        } else {
            println!("{}", entry.name);
        }
    }
    Ok(())
}

fn dump_mode(
    args: &Args,
    app_config: AppConfig,
    count: Option<usize>,
    idle: Option<f64>,
) -> Result<()> {
    let idle = idle.map(duration_from_secs).transpose()?;
    let mut bus = open_bus(args, app_config)?;
    log::info!("Listening on {} ({})", bus.channel_info(), bus.state());

    let mut received = 0usize;
    while count.map_or(true, |limit| received < limit) {
        match bus.receive(idle)? {
            Some(message) => {
                received += 1;
                println!(
                    "{} ({:.6}) {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    message.timestamp_secs_f64(),
                    message
                );
            }
            None if idle.is_some() => {
                log::info!("Idle, stopping");
                break;
            }
            None => {}
        }
    }

    log::info!("Received {} messages", received);
    bus.shutdown();
    Ok(())
}

fn send_mode(args: &Args, app_config: AppConfig, frames: &[String], timeout: f64) -> Result<()> {
    let messages = frames
        .iter()
        .map(|frame| frame_arg::parse_message(frame))
        .collect::<Result<Vec<_>>>()?;
    let timeout: Duration = duration_from_secs(timeout)?;

    let mut bus = open_bus(args, app_config)?;
    for message in &messages {
        bus.send(message, Some(timeout))
            .with_context(|| format!("Failed to send {}", message))?;
        log::info!("Sent {}", message);
    }
    bus.shutdown();
    Ok(())
}

fn info_mode(args: &Args, app_config: AppConfig) -> Result<()> {
    let mut bus = open_bus(args, app_config)?;

    // interface and driver answers arrive as frames
    while bus.receive(Some(Duration::from_millis(100)))?.is_some() {}

    let library = bus.transport();
    println!(
        "Library:    {} ({})",
        library.path(),
        library.version().unwrap_or("unknown version")
    );
    println!("Channel:    {}", bus.channel_info());
    println!("State:      {} (requested {})", bus.state(), bus.target_state());
    println!("Controller: {}", bus.controller_params().family());
    match bus.timing() {
        Some(timing) => println!("Timing:     {}", timing),
        None => println!("Timing:     unknown"),
    }
    if let Some((rx, tx)) = bus.error_counters() {
        println!("Errors:     rx {} tx {}", rx, tx);
    }
    if let Some(load) = bus.busload() {
        println!("Busload:    {}%", load);
    }

    for (source, info_type, value) in bus.info().iter() {
        println!("{:<10}  {:<10}  {}", source, info_type, value);
    }

    bus.shutdown();
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_subcommands() {
        let args = parse(&["cpc", "send", "123#00", "--channel", "CHAN01", "-vv"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.channel.as_deref(), Some("CHAN01"));
        match args.command {
            Command::Send { frames, timeout } => {
                assert_eq!(frames, vec!["123#00"]);
                assert_eq!(timeout, 1.0);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::try_parse_from(["cpc", "send"]).is_err());
        assert!(matches!(parse(&["cpc", "list"]).command, Command::List));
    }

    #[test]
    fn test_bus_config_overrides() {
        let args = parse(&["cpc", "dump", "--bitrate", "250000", "--listen-only"]);
        let config = bus_config(&args, BusConfig::default());
        assert_eq!(config.timing_request.bitrate, Some(250_000));
        assert_eq!(config.state, BusState::Passive);
        assert_eq!(config.channel, "CHAN00");

        let args = parse(&["cpc", "dump", "--data-bitrate", "2000000"]);
        let config = bus_config(&args, BusConfig::default());
        assert_eq!(config.timing_request.fd, Some(true));
        assert_eq!(config.timing_request.nom_bitrate, Some(500_000));
        assert_eq!(config.timing_request.data_bitrate, Some(2_000_000));
    }
}
