//! Persistent assistant settings (JSON file in the app data directory).

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soundverse_core::{remote::DEFAULT_ENDPOINT, ControllerConfig};

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AssistantSettings {
    pub preferred_input_device: Option<String>,
    /// `"remote"` posts transcripts to `command_service_url`; `"local"`
    /// answers in-process.
    pub command_mode: String,
    pub command_service_url: String,
    pub remote_timeout_ms: u64,
    pub relisten_delay_ms: u64,
    /// Pacing of the console voice.
    pub speech_words_per_minute: u32,
    pub greeting: String,
    pub server_bind: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            preferred_input_device: None,
            command_mode: "remote".into(),
            command_service_url: DEFAULT_ENDPOINT.into(),
            remote_timeout_ms: controller.remote_timeout.as_millis() as u64,
            relisten_delay_ms: controller.relisten_delay.as_millis() as u64,
            speech_words_per_minute: 180,
            greeting: controller.greeting,
            server_bind: DEFAULT_BIND.into(),
        }
    }
}

impl AssistantSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.command_mode = normalize_command_mode(&self.command_mode);
        self.command_service_url = self.command_service_url.trim().to_string();
        if !(self.command_service_url.starts_with("http://")
            || self.command_service_url.starts_with("https://"))
        {
            self.command_service_url = defaults.command_service_url;
        }
        self.remote_timeout_ms = self.remote_timeout_ms.clamp(500, 60_000);
        self.relisten_delay_ms = self.relisten_delay_ms.min(10_000);
        self.speech_words_per_minute = self.speech_words_per_minute.clamp(60, 600);
        self.greeting = self.greeting.trim().to_string();
        if self.greeting.is_empty() {
            self.greeting = defaults.greeting;
        }
        self.server_bind = self.server_bind.trim().to_string();
        if self.server_bind.parse::<SocketAddr>().is_err() {
            self.server_bind = defaults.server_bind;
        }
    }

    pub fn uses_remote(&self) -> bool {
        self.command_mode == "remote"
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.server_bind
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8000)))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            greeting: self.greeting.clone(),
            relisten_delay: Duration::from_millis(self.relisten_delay_ms),
            remote_timeout: Duration::from_millis(self.remote_timeout_ms),
            ..ControllerConfig::default()
        }
    }

    /// Override fields from `SOUNDVERSE_*` variables, then re-normalise.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SOUNDVERSE_INPUT_DEVICE") {
            self.preferred_input_device = Some(v);
        }
        if let Some(v) = lookup("SOUNDVERSE_COMMAND_MODE") {
            self.command_mode = v;
        }
        if let Some(v) = lookup("SOUNDVERSE_COMMAND_URL") {
            self.command_service_url = v;
        }
        if let Some(v) = lookup("SOUNDVERSE_REMOTE_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.remote_timeout_ms = v;
        }
        if let Some(v) = lookup("SOUNDVERSE_RELISTEN_DELAY_MS").and_then(|v| v.trim().parse().ok()) {
            self.relisten_delay_ms = v;
        }
        if let Some(v) = lookup("SOUNDVERSE_BIND") {
            self.server_bind = v;
        }
        self.normalize();
    }
}

pub fn normalize_command_mode(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" | "offline" => "local".into(),
        _ => "remote".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Soundverse")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("soundverse")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AssistantSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AssistantSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AssistantSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
