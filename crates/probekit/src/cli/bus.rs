//! `bus` subcommands: Bus Auditor pin discovery.

use probekit_lib::bus::{
    BusAuditor, DeviceIdentification, PinAssignment, ScanRange, UartCandidate, Volts,
};

use super::{
    BusCommand, Config, Context, DeviceOutput, Result, ScanArgs, ScanOutput, plural, print_device,
    print_json,
};

pub(super) fn run(cmd: BusCommand, ctx: &Context) -> Result<()> {
    let config = ctx.load_config();
    match cmd {
        BusCommand::Info => cmd_info(ctx, &config),
        BusCommand::Jtag { scan, trst } => {
            let (range, volts) = scan_params(&scan, &config)?;
            let auditor = open(ctx, &config)?;
            let found = auditor.jtag_scan(range, volts, trst)?;
            let name = if trst { "jtag+trst" } else { "jtag" };
            report_devices(ctx.json, name, range, volts, found)
        }
        BusCommand::Swd { scan } => {
            let (range, volts) = scan_params(&scan, &config)?;
            let found = open(ctx, &config)?.swd_scan(range, volts)?;
            report_devices(ctx.json, "swd", range, volts, found)
        }
        BusCommand::Uart { scan } => {
            let (range, volts) = scan_params(&scan, &config)?;
            let found = open(ctx, &config)?.uart_scan(range, volts)?;
            report_uart(ctx.json, range, volts, found)
        }
        BusCommand::I2c { scan } => {
            let (range, volts) = scan_params(&scan, &config)?;
            let found = open(ctx, &config)?.i2c_scan(range, volts)?;
            report_devices(ctx.json, "i2c", range, volts, found)
        }
    }
}

/// Resolve range and voltage before touching the device.
fn scan_params(args: &ScanArgs, config: &Config) -> Result<(ScanRange, Volts)> {
    let range = ScanRange::new(args.start, args.end)?;
    let volts = args
        .volts
        .as_deref()
        .unwrap_or(&config.default_volts)
        .parse::<Volts>()?;
    Ok((range, volts))
}

fn open(ctx: &Context, config: &Config) -> Result<BusAuditor> {
    let mut auditor = BusAuditor::open(&config.device_serial)?;
    auditor.set_poll_options(config.poll_options(Some(ctx.cancel.clone())));
    auditor.set_jtag_settle(config.jtag_settle());
    Ok(auditor)
}

fn cmd_info(ctx: &Context, config: &Config) -> Result<()> {
    let auditor = open(ctx, config)?;
    let services = auditor.services().entries();
    if ctx.json {
        return print_json(&DeviceOutput::<()> {
            device: auditor.info(),
            services,
            status: None,
        });
    }
    print_device(auditor.info(), &services);
    Ok(())
}

/// One-line pin listing, e.g. `TCK=0 TMS=1 TDO=2 TDI=3`.
pub(super) fn describe_pins(pins: &PinAssignment) -> String {
    match pins {
        PinAssignment::Jtag(p) => {
            let mut s = format!("TCK={} TMS={} TDO={} TDI={}", p.tck, p.tms, p.tdo, p.tdi);
            if let Some(trst) = p.trst {
                s.push_str(&format!(" TRST={trst}"));
            }
            s
        }
        PinAssignment::Swd(p) => format!("SWCLK={} SWDIO={}", p.swclk, p.swdio),
        PinAssignment::Uart(p) => format!("TX={} RX={}", p.tx, p.rx),
        PinAssignment::I2c(p) => format!("SCL={} SDA={}", p.scl, p.sda),
    }
}

fn report_devices(
    json: bool,
    scan: &'static str,
    range: ScanRange,
    volts: Volts,
    found: Vec<DeviceIdentification>,
) -> Result<()> {
    if json {
        return print_json(&ScanOutput {
            scan,
            start: range.start,
            end: range.end,
            volts: volts.to_string(),
            count: found.len(),
            results: found,
        });
    }
    if found.is_empty() {
        println!("No devices found on channels {}-{}.", range.start, range.end);
        return Ok(());
    }
    println!("Found {} device{}:", found.len(), plural(found.len()));
    println!();
    for (i, dev) in found.iter().enumerate() {
        println!("  [{}] {:<12}{}", i + 1, dev.id, describe_pins(&dev.pins));
    }
    Ok(())
}

fn report_uart(
    json: bool,
    range: ScanRange,
    volts: Volts,
    found: Vec<UartCandidate>,
) -> Result<()> {
    if json {
        return print_json(&ScanOutput {
            scan: "uart",
            start: range.start,
            end: range.end,
            volts: volts.to_string(),
            count: found.len(),
            results: found,
        });
    }
    if found.is_empty() {
        println!("No UART activity on channels {}-{}.", range.start, range.end);
        return Ok(());
    }
    println!("Found {} baud rate{}:", found.len(), plural(found.len()));
    println!();
    for candidate in &found {
        println!("  {} baud", candidate.baud);
        for pins in &candidate.pins {
            println!("      TX={} RX={}", pins.tx, pins.rx);
        }
    }
    Ok(())
}
