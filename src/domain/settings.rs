use crate::domain::levels::DeviceVariant;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "heatmat".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Raw device section as written in the settings file.
///
/// Validated into a `DeviceIdentity` before the session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub service_uuid: String,
    #[serde(default)]
    pub temperature_char_uuid: String,
    #[serde(default)]
    pub timer_char_uuid: String,
    #[serde(default)]
    pub set_char_uuid: Option<String>,
    /// Hex encoded init/keep-alive packet for the set characteristic
    #[serde(default)]
    pub init_payload: Option<String>,
    /// Adapter name, e.g. "hci0". First adapter when unset.
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub variant: DeviceVariant,
    /// Hex encoded 4-byte packet sent instead of a zero level to stop the timer
    #[serde(default)]
    pub timer_off_packet: Option<String>,
}

/// Delays and bounds of the session's scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_connect_settle_ms")]
    pub connect_settle_ms: u64,
    #[serde(default = "default_init_settle_ms")]
    pub init_settle_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_write_stabilize_ms")]
    pub write_stabilize_ms: u64,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
    /// ATT error code that means the link itself is gone
    #[serde(default = "default_fatal_att_code")]
    pub fatal_att_code: u8,
    #[serde(default = "default_read_gap_ms")]
    pub read_gap_ms: u64,
    #[serde(default = "default_keepalive_initial_ms")]
    pub keepalive_initial_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scan_window_ms: default_scan_window_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            connect_settle_ms: default_connect_settle_ms(),
            init_settle_ms: default_init_settle_ms(),
            debounce_ms: default_debounce_ms(),
            write_stabilize_ms: default_write_stabilize_ms(),
            write_retries: default_write_retries(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
            fatal_att_code: default_fatal_att_code(),
            read_gap_ms: default_read_gap_ms(),
            keepalive_initial_ms: default_keepalive_initial_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl SessionSettings {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }
    pub fn init_settle(&self) -> Duration {
        Duration::from_millis(self.init_settle_ms)
    }
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
    pub fn write_stabilize(&self) -> Duration {
        Duration::from_millis(self.write_stabilize_ms)
    }
    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
    pub fn read_gap(&self) -> Duration {
        Duration::from_millis(self.read_gap_ms)
    }
    pub fn keepalive_initial(&self) -> Duration {
        Duration::from_millis(self.keepalive_initial_ms)
    }
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

fn default_scan_window_ms() -> u64 {
    4000
}
fn default_scan_interval_ms() -> u64 {
    15000
}
fn default_idle_poll_ms() -> u64 {
    5000
}
fn default_connect_settle_ms() -> u64 {
    1000
}
fn default_init_settle_ms() -> u64 {
    200
}
fn default_debounce_ms() -> u64 {
    350
}
fn default_write_stabilize_ms() -> u64 {
    200
}
fn default_write_retries() -> u32 {
    3
}
fn default_write_retry_delay_ms() -> u64 {
    300
}
fn default_fatal_att_code() -> u8 {
    0x0E
}
fn default_read_gap_ms() -> u64 {
    250
}
fn default_keepalive_initial_ms() -> u64 {
    5000
}
fn default_keepalive_interval_ms() -> u64 {
    30000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub session: SessionSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from `path`, or from the per-user config directory when `None`.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn new(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(path) => path,
            None => Self::get_settings_path()?,
        };
        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)?
        } else {
            Settings::default()
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("heatmat");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
