//! `devices` subcommand: list attached probes.

use super::{DevicesOutput, Result, plural, print_json};

pub(super) fn cmd_devices(json: bool) -> Result<()> {
    let devices = probekit_lib::family::enumerate_devices();

    if json {
        return print_json(&DevicesOutput {
            count: devices.len(),
            devices,
        });
    }

    if devices.is_empty() {
        println!("No probes found.");
        return Ok(());
    }

    println!("Found {} probe{}:", devices.len(), plural(devices.len()));
    println!();

    for (i, dev) in devices.iter().enumerate() {
        println!("  [{}] {} ({})", i + 1, dev.family.name(), dev.path);
        if let Some(ref serial) = dev.serial {
            println!("      Serial: {serial}");
        }
    }

    Ok(())
}
