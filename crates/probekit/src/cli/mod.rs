//! CLI subcommands: device listing, configuration, bus scans, radio control.

mod bus;
mod config_cmd;
mod devices;
mod zigbee;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Subcommand};
use serde::Serialize;

pub(super) use probekit_lib::config::Config;
pub(super) use probekit_lib::error::{ProbeError, Result};
pub(super) use probekit_lib::family::DiscoveredDevice;
pub(super) use probekit_lib::poll::CancelToken;
pub(super) use probekit_lib::service::{DeviceInfo, ServiceStatus};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

pub(super) fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

/// Shared state handed to every subcommand.
pub struct Context {
    pub json: bool,
    pub config_path: Option<PathBuf>,
    pub cancel: CancelToken,
}

impl Context {
    pub(super) fn load_config(&self) -> Config {
        load_config(self.config_path.as_deref())
    }
}

/// Load the config from `custom_path`, or the default location.
/// Parse errors and invalid values are logged, not fatal.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    let (config, warnings) = match custom_path {
        Some(path) => Config::load_from(path),
        None => Config::load_with_warnings(),
    };
    for w in &warnings {
        log::warn!("{w}");
    }
    if let Err(issues) = config.validate() {
        for issue in &issues {
            log::warn!("config: {issue}");
        }
    }
    config
}

/// Print device identity and the service table.
pub(super) fn print_device(info: &DeviceInfo, services: &[ServiceStatus]) {
    let w = kv_width(
        &["Device:"],
        &["Firmware:", "Hardware:", "Serial:", "Path:", "Packet size:"],
    );
    kv("Device:", info.family, w);
    kv_indent("Firmware:", &info.firmware_version, w);
    kv_indent("Hardware:", &info.hardware_version, w);
    kv_indent("Serial:", info.serial.as_deref().unwrap_or("(none)"), w);
    kv_indent("Path:", &info.path, w);
    kv_indent("Packet size:", info.max_packet_size, w);
    println!();
    println!("Services:");
    let names: Vec<&str> = services.iter().map(|s| s.name).collect();
    let sw = kv_width(&[], &names) + 1;
    for s in services {
        kv_indent(
            &format!("{}:", s.name),
            if s.supported { "yes" } else { "no" },
            sw,
        );
    }
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DiscoveredDevice>,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub issues: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct DeviceOutput<'a, S: Serialize> {
    pub device: &'a DeviceInfo,
    pub services: Vec<ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<S>,
}

#[derive(Serialize)]
pub(super) struct ScanOutput<T: Serialize> {
    pub scan: &'static str,
    pub start: u8,
    pub end: u8,
    pub volts: String,
    pub count: usize,
    pub results: Vec<T>,
}

// ── Arguments ──

/// Pin range and target voltage shared by every bus scan.
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// First probe channel of the range
    #[arg(long, default_value_t = 0)]
    pub start: u8,
    /// Last probe channel of the range
    #[arg(long, default_value_t = probekit_lib::bus::MAX_PIN)]
    pub end: u8,
    /// Target voltage: 3.3, 1.8 or 1.2 (default: from config)
    #[arg(long)]
    pub volts: Option<String>,
}

/// Raw bytes given as hex, e.g. `41880a` or `41:88:0a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | ':' | '-'))
            .collect();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(&digits);
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(format!("expected an even number of hex digits, got \"{s}\""));
        }
        (0..digits.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&digits[i..i + 2], 16)
                    .map_err(|_| format!("invalid hex byte \"{}\"", &digits[i..i + 2]))
            })
            .collect::<std::result::Result<Vec<u8>, String>>()
            .map(HexBytes)
    }
}

/// Comma-separated channel list, e.g. `11,15,20`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelList(pub Vec<u8>);

impl FromStr for ChannelList {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u8>().map_err(|_| format!("invalid channel \"{p}\"")))
            .collect::<std::result::Result<Vec<u8>, String>>()
            .map(ChannelList)
    }
}

#[derive(Subcommand)]
pub enum BusCommand {
    /// Show firmware revision and supported services
    Info,
    /// Find JTAG pinouts (IDCODE scan + pattern scan)
    Jtag {
        #[command(flatten)]
        scan: ScanArgs,
        /// Include TRST in the pin search
        #[arg(long)]
        trst: bool,
    },
    /// Find SWD pinouts
    Swd {
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Find UART pins and baud rates
    Uart {
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Find I2C buses and device addresses
    I2c {
        #[command(flatten)]
        scan: ScanArgs,
    },
}

#[derive(Subcommand)]
pub enum ZigbeeCommand {
    /// Show firmware revision, supported services and radio status
    Info,
    /// Active scan for 802.15.4 / Zigbee networks
    Scan {
        /// Channels to scan, comma-separated (default: 11-26)
        #[arg(long)]
        channels: Option<ChannelList>,
    },
    /// Capture raw frames (Ctrl+C to stop)
    Sniff {
        /// Channel to listen on (default: from config)
        #[arg(long)]
        channel: Option<u8>,
        /// Stop after this many frames
        #[arg(long)]
        count: Option<usize>,
    },
    /// Transmit one raw frame (PSDU in hex)
    Inject {
        /// Frame bytes, e.g. 41880a
        psdu: HexBytes,
        /// Channel to transmit on (default: from config)
        #[arg(long)]
        channel: Option<u8>,
    },
}

#[derive(Subcommand)]
pub enum Command {
    /// List attached Bus Auditor and Zigbee Auditor probes
    Devices,

    /// Show current configuration and file path
    Config,

    /// Bus Auditor: JTAG / SWD / UART / I2C discovery
    Bus {
        #[command(subcommand)]
        command: BusCommand,
    },

    /// Zigbee Auditor: 802.15.4 scanning, sniffing and injection
    Zigbee {
        #[command(subcommand)]
        command: ZigbeeCommand,
    },
}

pub fn run(cmd: Command, ctx: &Context) -> Result<()> {
    match cmd {
        Command::Devices => devices::cmd_devices(ctx.json),
        Command::Config => config_cmd::cmd_config(ctx.json, ctx.config_path.as_deref()),
        Command::Bus { command } => bus::run(command, ctx),
        Command::Zigbee { command } => zigbee::run(command, ctx),
    }
}
