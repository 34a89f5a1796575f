use crate::domain::models::ConfigEntry;
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
    "generic_bt".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Configured devices
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,

    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Settings
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_scan_window_secs")]
    pub scan_window_secs: u64,
    #[serde(default = "default_setup_retry_secs")]
    pub setup_retry_secs: u64,

    // Control socket
    #[serde(default = "default_control_socket")]
    pub control_socket: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            log_settings: LogSettings::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            scan_window_secs: default_scan_window_secs(),
            setup_retry_secs: default_setup_retry_secs(),
            control_socket: default_control_socket(),
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }

    pub fn setup_retry_interval(&self) -> Duration {
        Duration::from_secs(self.setup_retry_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_ready_timeout_secs() -> u64 {
    30
}
fn default_scan_window_secs() -> u64 {
    10
}
fn default_setup_retry_secs() -> u64 {
    10
}
fn default_control_socket() -> String {
    "generic_bt.sock".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit path, falling back to defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("generic_bt");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Upper-cased addresses of every configured device
    pub fn configured_addresses(&self) -> Vec<String> {
        self.settings
            .entries
            .iter()
            .map(|entry| entry.unique_id.to_uppercase())
            .collect()
    }

    /// Store a new entry. Returns false if its device is already configured.
    pub fn add_entry(&mut self, entry: ConfigEntry) -> anyhow::Result<bool> {
        let configured = self
            .settings
            .entries
            .iter()
            .any(|e| e.unique_id.eq_ignore_ascii_case(&entry.unique_id));
        if configured {
            return Ok(false);
        }
        self.settings.entries.push(entry);
        self.save()?;
        Ok(true)
    }

    pub fn remove_entry(&mut self, address: &str) -> anyhow::Result<Option<ConfigEntry>> {
        let Some(index) = self
            .settings
            .entries
            .iter()
            .position(|e| e.address.eq_ignore_ascii_case(address))
        else {
            return Ok(None);
        };
        let entry = self.settings.entries.remove(index);
        self.save()?;
        Ok(Some(entry))
    }
}
