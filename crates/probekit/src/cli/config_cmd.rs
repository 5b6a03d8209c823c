//! `config` subcommand: show current configuration and file path.

use std::path::Path;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width, print_json};

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let issues: Vec<String> = match config.validate() {
        Ok(()) => vec![],
        Err(issues) => issues.iter().map(|i| i.to_string()).collect(),
    };

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            issues,
        });
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "device_serial:",
            "read_timeout_ms:",
            "scan_timeout_secs:",
            "jtag_settle_ms:",
            "default_volts:",
            "zigbee_channel:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    let serial = if config.device_serial.is_empty() {
        "(first found)"
    } else {
        config.device_serial.as_str()
    };
    kv_indent("device_serial:", serial, w);
    kv_indent("read_timeout_ms:", config.read_timeout_ms, w);
    let scan_timeout = if config.scan_timeout_secs == 0 {
        "none".to_string()
    } else {
        config.scan_timeout_secs.to_string()
    };
    kv_indent("scan_timeout_secs:", scan_timeout, w);
    kv_indent("jtag_settle_ms:", config.jtag_settle_ms, w);
    kv_indent("default_volts:", &config.default_volts, w);
    kv_indent("zigbee_channel:", config.zigbee_channel, w);

    if !issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &issues {
            println!("  {issue}");
        }
    }
    Ok(())
}
