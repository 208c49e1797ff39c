use crate::cli::Args;
use crate::controller::ControllerSettings;
use crate::session::SessionDraft;
use anyhow::Result;
use clap::ValueEnum;
use notify::{Config, Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Separate backend process reached over TCP
    Ipc,
    /// Built-in demo backend
    #[value(alias = "sim")]
    Simulate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub backend: BackendKind,
    pub backend_addr: String,
    pub default_local_address: String,
    pub default_local_port: u16,
    pub default_remote_address: String,
    pub default_remote_port: u16,
    pub default_user: String,
    pub max_samples: usize,
    pub error_display_ms: u64,
    pub reset_telemetry_on_connect: bool,
    pub tick_rate_ms: u64,
    pub log_file: String,
    pub log_level: String,
    pub httpd_enabled: bool,
    pub httpd_ip: String,
    pub httpd_port: u16,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            backend: BackendKind::Ipc,
            backend_addr: "127.0.0.1:7878".to_string(),
            default_local_address: "127.0.0.1".to_string(),
            default_local_port: 5678,
            default_remote_address: "".to_string(),
            default_remote_port: 22,
            default_user: "".to_string(),
            max_samples: 50,
            error_display_ms: 3000,
            reset_telemetry_on_connect: false,
            tick_rate_ms: 250,
            log_file: "/tmp/tunnel_console.log".to_string(),
            log_level: "info".to_string(),
            httpd_enabled: false,
            httpd_ip: "127.0.0.1".to_string(),
            httpd_port: 8080,
        }
    }
}

impl ConsoleConfig {
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|_| Self::default())
    }

    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        let mut args_provided = false;

        if let Some(backend) = args.backend {
            self.backend = backend;
            args_provided = true;
        }

        if let Some(ref addr) = args.backend_addr {
            self.backend_addr = addr.clone();
            args_provided = true;
        }

        if let Some(ref local) = args.local {
            self.default_local_address = local.clone();
            args_provided = true;
        }

        if let Some(port) = args.local_port {
            self.default_local_port = port;
            args_provided = true;
        }

        if let Some(ref remote) = args.remote {
            self.default_remote_address = remote.clone();
            args_provided = true;
        }

        if let Some(port) = args.remote_port {
            self.default_remote_port = port;
            args_provided = true;
        }

        if let Some(ref user) = args.user {
            self.default_user = user.clone();
            args_provided = true;
        }

        if let Some(max_samples) = args.max_samples {
            self.max_samples = max_samples;
            args_provided = true;
        }

        args_provided
    }

    /// Initial form contents. The password is never stored.
    pub fn session_draft(&self) -> SessionDraft {
        SessionDraft {
            local_address: self.default_local_address.clone(),
            local_port: self.default_local_port.to_string(),
            remote_address: self.default_remote_address.clone(),
            remote_port: self.default_remote_port.to_string(),
            user: self.default_user.clone(),
            password: "".to_string(),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_samples: self.max_samples.max(1),
            error_display: Duration::from_millis(self.error_display_ms),
            reset_telemetry_on_connect: self.reset_telemetry_on_connect,
        }
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.max(10))
    }

    /// Keys that only take effect after a restart.
    pub fn needs_restart(&self, other: &ConsoleConfig) -> bool {
        self.backend != other.backend
            || self.backend_addr != other.backend_addr
            || self.log_file != other.log_file
            || self.log_level != other.log_level
            || self.httpd_enabled != other.httpd_enabled
            || self.httpd_ip != other.httpd_ip
            || self.httpd_port != other.httpd_port
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        let config_dir = PathBuf::from(home).join(".config").join("tunnel_console");
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.conf"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_commented_toml()?)?;
        Ok(())
    }

    // Values go through the toml serializer so strings are always quoted
    // and escaped correctly; the comments are added around them.
    fn to_commented_toml(&self) -> Result<String> {
        let s = |v: &str| toml::Value::String(v.to_string()).to_string();
        let backend = match self.backend {
            BackendKind::Ipc => "ipc",
            BackendKind::Simulate => "simulate",
        };

        Ok(format!(
            r#"# Tunnel Console Configuration File
# Edit this file while the console is running; chart and error settings
# apply immediately, backend/logging/httpd changes require a restart.

# Backend to drive
# Options: "ipc" (separate backend process), "simulate" (built-in demo backend)
backend = {}

# Address of the backend process for the "ipc" backend
backend_addr = {}

# Initial values of the session form
default_local_address = {}
default_local_port = {}
default_remote_address = {}
default_remote_port = {}
default_user = {}

# Number of send/receive samples kept for the chart (oldest dropped first)
max_samples = {}

# How long an error message stays visible, in milliseconds
error_display_ms = {}

# Clear the chart whenever a new connection attempt starts
# Options: true, false
reset_telemetry_on_connect = {}

# UI refresh interval in milliseconds
tick_rate_ms = {}

# Log file (the terminal is used by the UI) and level filter
# RUST_LOG overrides log_level when set
log_file = {}
log_level = {}

# Read-only HTTP status endpoint (/api/status, /api/config)
httpd_enabled = {}
httpd_ip = {}
httpd_port = {}
"#,
            s(backend),
            s(&self.backend_addr),
            s(&self.default_local_address),
            self.default_local_port,
            s(&self.default_remote_address),
            self.default_remote_port,
            s(&self.default_user),
            self.max_samples,
            self.error_display_ms,
            self.reset_telemetry_on_connect,
            self.tick_rate_ms,
            s(&self.log_file),
            s(&self.log_level),
            self.httpd_enabled,
            s(&self.httpd_ip),
            self.httpd_port,
        ))
    }
}

/// Watches the config file and forwards every successfully parsed
/// modification. Runs on its own thread for the life of the process.
pub fn spawn_config_watcher(path: PathBuf, tx: mpsc::UnboundedSender<ConsoleConfig>) {
    std::thread::spawn(move || {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = match RecommendedWatcher::new(notify_tx, Config::default()) {
            Ok(w) => w,
            Err(e) => {
                warn!("Config watcher unavailable: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            warn!("Cannot watch {}: {}", path.display(), e);
            return;
        }

        for event in notify_rx {
            if let Ok(NotifyEvent { kind, .. }) = event {
                if !matches!(kind, notify::EventKind::Modify(_)) {
                    continue;
                }
                match ConsoleConfig::load_from(&path) {
                    Ok(config) => {
                        debug!("Config file reloaded");
                        if tx.send(config).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring unreadable config: {}", e),
                }
            }
        }
    });
}
