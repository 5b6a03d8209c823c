//! `zigbee` subcommands: radio status, network scan, capture, injection.

use serde::Serialize;

use probekit_lib::zigbee::nwkscan::ALL_CHANNELS_MASK;
use probekit_lib::zigbee::{
    Beacon, FrameSink, NetworkScan, SnifferFrame, ZigbeeAuditor, ZigbeeService, channel_mask,
};

use super::{
    Config, Context, DeviceOutput, ProbeError, Result, ZigbeeCommand, kv, kv_indent, kv_width,
    plural, print_device, print_json,
};

pub(super) fn run(cmd: ZigbeeCommand, ctx: &Context) -> Result<()> {
    let config = ctx.load_config();
    match cmd {
        ZigbeeCommand::Info => cmd_info(ctx, &config),
        ZigbeeCommand::Scan { channels } => {
            let mask = match channels {
                Some(list) => channel_mask(&list.0)?,
                None => ALL_CHANNELS_MASK,
            };
            cmd_scan(ctx, &config, mask)
        }
        ZigbeeCommand::Sniff { channel, count } => {
            let channel = channel.unwrap_or(config.zigbee_channel);
            probekit_lib::zigbee::validate_channel(channel, 0)?;
            cmd_sniff(ctx, &config, channel, count)
        }
        ZigbeeCommand::Inject { psdu, channel } => {
            let channel = channel.unwrap_or(config.zigbee_channel);
            probekit_lib::zigbee::validate_channel(channel, 0)?;
            cmd_inject(ctx, &config, channel, &psdu.0)
        }
    }
}

fn open(ctx: &Context, config: &Config) -> Result<ZigbeeAuditor> {
    let mut auditor = ZigbeeAuditor::open(&config.device_serial)?;
    auditor.set_poll_options(config.poll_options(Some(ctx.cancel.clone())));
    Ok(auditor)
}

fn cmd_info(ctx: &Context, config: &Config) -> Result<()> {
    let auditor = open(ctx, config)?;
    let services = auditor.services().entries();
    let status = if auditor.services().is_supported(ZigbeeService::GetMacStatus) {
        match auditor.mac_status() {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("MAC status unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    if ctx.json {
        return print_json(&DeviceOutput {
            device: auditor.info(),
            services,
            status,
        });
    }

    print_device(auditor.info(), &services);
    if let Some(s) = status {
        println!();
        let w = kv_width(&["Radio:"], &["Sniffer:"]);
        kv("Radio:", if s.radio_on { "on" } else { "off" }, w);
        kv_indent("Sniffer:", if s.sniffing { "on" } else { "off" }, w);
    }
    Ok(())
}

fn cmd_scan(ctx: &Context, config: &Config, mask: u32) -> Result<()> {
    let mut auditor = open(ctx, config)?;
    let result = auditor.scan(mask);
    auditor.close();
    let scan = result?.unwrap_or(NetworkScan {
        device_count: 0,
        beacons: vec![],
    });

    if ctx.json {
        return print_json(&scan);
    }
    if scan.beacons.is_empty() {
        println!("No networks found.");
        return Ok(());
    }
    println!(
        "Found {} network{}:",
        scan.beacons.len(),
        plural(scan.beacons.len())
    );
    println!();
    for (i, beacon) in scan.beacons.iter().enumerate() {
        println!("  [{}] {}", i + 1, describe_beacon(beacon));
    }
    Ok(())
}

pub(super) fn describe_beacon(b: &Beacon) -> String {
    let mut s = format!(
        "PAN 0x{:04x}  addr 0x{:04x}  ch {:<2}  rssi {} dBm  lqi {}",
        b.source_pan_id, b.source_addr, b.channel, b.rssi, b.lqi
    );
    if b.pan_coordinator {
        s.push_str("  coordinator");
    }
    if b.permit_joining {
        s.push_str("  joinable");
    }
    if let Some(z) = &b.zigbee {
        s.push_str(&format!(
            "  zigbee xpan {} profile {}",
            hex(&z.extended_pan_id),
            z.stack_profile
        ));
    }
    s
}

pub(super) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Serialize)]
struct FrameLine {
    index: usize,
    timestamp: u32,
    length: usize,
    crc_valid: bool,
    payload: String,
}

/// Writes each captured frame to stdout, one per line.
struct PrintSink {
    json: bool,
    written: usize,
}

impl FrameSink for PrintSink {
    fn write_frame(&mut self, frame: &SnifferFrame) -> Result<()> {
        self.written += 1;
        if self.json {
            let line = FrameLine {
                index: self.written,
                timestamp: frame.timestamp,
                length: frame.payload.len(),
                crc_valid: frame.crc_valid,
                payload: hex(&frame.payload),
            };
            let text = serde_json::to_string(&line).map_err(std::io::Error::other)?;
            println!("{text}");
        } else {
            println!(
                "[{:>5}] {:>10}us  {:>3} bytes{}  {}",
                self.written,
                frame.timestamp,
                frame.payload.len(),
                if frame.crc_valid { "" } else { " (fcs*)" },
                hex(&frame.payload)
            );
        }
        Ok(())
    }
}

fn cmd_sniff(ctx: &Context, config: &Config, channel: u8, count: Option<usize>) -> Result<()> {
    let mut auditor = open(ctx, config)?;
    if let Err(e) = auditor.sniffer_on(channel, 0) {
        auditor.close();
        return Err(e);
    }
    if !ctx.json {
        eprintln!("Sniffing on channel {channel}, Ctrl+C to stop");
    }

    let mut sink = PrintSink {
        json: ctx.json,
        written: 0,
    };
    let result = match auditor.capture(count, &mut sink) {
        Err(ProbeError::Cancelled) => Ok(()),
        other => other.map(|_| ()),
    };
    let received = auditor.rx_count();
    auditor.close();

    if !ctx.json {
        eprintln!(
            "Captured {} frame{} ({received} received)",
            sink.written,
            plural(sink.written)
        );
    }
    result
}

fn transmit(auditor: &mut ZigbeeAuditor, channel: u8, psdu: &[u8]) -> Result<()> {
    auditor.radio_on()?;
    auditor.set_channel(channel, 0)?;
    auditor.inject_packet(psdu)
}

fn cmd_inject(ctx: &Context, config: &Config, channel: u8, psdu: &[u8]) -> Result<()> {
    let mut auditor = open(ctx, config)?;
    let result = transmit(&mut auditor, channel, psdu);
    auditor.close();
    result?;

    if ctx.json {
        #[derive(Serialize)]
        struct InjectOutput {
            channel: u8,
            length: usize,
        }
        return print_json(&InjectOutput {
            channel,
            length: psdu.len(),
        });
    }
    println!(
        "Sent {} byte{} on channel {channel}.",
        psdu.len(),
        plural(psdu.len())
    );
    Ok(())
}
