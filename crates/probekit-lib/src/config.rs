//! Application configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::Volts;
use crate::poll::{CancelToken, PollOptions};
use crate::zigbee::{MAX_CHANNEL, MIN_CHANNEL};

const CONFIG_FILE: &str = "config.toml";

const CONFIG_HEADER: &str = "# probekit configuration. Unknown keys are dropped on save.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Preferred device serial number. Empty = first matching device.
    #[serde(default)]
    pub device_serial: String,

    /// Timeout of each bulk read in milliseconds. Default: 100.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound on one scan in seconds. 0 = wait until the device finishes.
    #[serde(default)]
    pub scan_timeout_secs: u64,

    /// Pause between the JTAG idcode and pattern scans. Default: 500.
    #[serde(default = "default_jtag_settle_ms")]
    pub jtag_settle_ms: u64,

    /// Target voltage used when a scan command gives none. Default: "3.3".
    #[serde(default = "default_volts")]
    pub default_volts: String,

    /// 802.15.4 channel for sniffing when none is given. Default: 11.
    #[serde(default = "default_zigbee_channel")]
    pub zigbee_channel: u8,
}

fn default_read_timeout_ms() -> u64 {
    crate::protocol::DEFAULT_READ_TIMEOUT_MS
}
fn default_jtag_settle_ms() -> u64 {
    500
}
fn default_volts() -> String {
    "3.3".into()
}
fn default_zigbee_channel() -> u8 {
    MIN_CHANNEL
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_serial: String::new(),
            read_timeout_ms: default_read_timeout_ms(),
            scan_timeout_secs: 0,
            jtag_settle_ms: default_jtag_settle_ms(),
            default_volts: default_volts(),
            zigbee_channel: default_zigbee_channel(),
        }
    }
}

/// Problems that [`Config::validate`] can report.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigIssue {
    /// `read_timeout_ms` is zero.
    ZeroReadTimeout,
    /// `default_volts` is not a supported target level.
    InvalidVolts(String),
    /// `zigbee_channel` is outside 11..=26.
    InvalidChannel(u8),
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::ZeroReadTimeout => write!(f, "read_timeout_ms must be greater than 0"),
            ConfigIssue::InvalidVolts(v) => {
                write!(f, "Invalid default_volts \"{v}\" (expected 3.3, 1.8 or 1.2)")
            }
            ConfigIssue::InvalidChannel(ch) => write!(
                f,
                "Invalid zigbee_channel {ch} (expected {MIN_CHANNEL}-{MAX_CHANNEL})"
            ),
        }
    }
}

impl Config {
    /// `<platform config dir>/probekit`.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("probekit"))
    }

    pub fn path() -> Option<PathBuf> {
        Some(Self::dir()?.join(CONFIG_FILE))
    }

    /// Config at the default path. Parse problems are logged and replaced by defaults.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        warnings.iter().for_each(|w| log::warn!("{w}"));
        config
    }

    /// Write through a sibling staging file so readers never see half a config.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let body = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = [CONFIG_HEADER, body.as_str()].concat();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("toml.tmp");
        std::fs::write(&staging, &contents)?;
        if std::fs::rename(&staging, path).is_ok() {
            return Ok(());
        }
        // rename refuses cross-device moves
        let written = std::fs::write(path, &contents);
        std::fs::remove_file(&staging).ok();
        written
    }

    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "platform has no config directory",
            )
        })?;
        self.save_to(&path)
    }

    /// Read `path`. A missing file yields the defaults; an unparsable one
    /// yields the defaults plus a warning.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return (Self::default(), Vec::new());
        };
        toml::from_str(&text).map_or_else(
            |e| {
                let warning = format!("ignoring {} (using defaults): {e}", path.display());
                (Self::default(), vec![warning])
            },
            |config| (config, Vec::new()),
        )
    }

    pub fn load_with_warnings() -> (Self, Vec<String>) {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => (Self::default(), Vec::new()),
        }
    }

    /// Validate the entire config, collecting all problems.
    pub fn validate(&self) -> std::result::Result<(), Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        if self.read_timeout_ms == 0 {
            issues.push(ConfigIssue::ZeroReadTimeout);
        }
        if self.default_volts.parse::<Volts>().is_err() {
            issues.push(ConfigIssue::InvalidVolts(self.default_volts.clone()));
        }
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&self.zigbee_channel) {
            issues.push(ConfigIssue::InvalidChannel(self.zigbee_channel));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Poll behavior for device handles built from this config.
    pub fn poll_options(&self, cancel: Option<CancelToken>) -> PollOptions {
        PollOptions {
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
            max_duration: (self.scan_timeout_secs > 0)
                .then(|| Duration::from_secs(self.scan_timeout_secs)),
            cancel,
        }
    }

    pub fn jtag_settle(&self) -> Duration {
        Duration::from_millis(self.jtag_settle_ms)
    }
}
