//! Configuration and session state.
//!
//! Settings carry the effective runtime values; Config is the optional
//! TOML file that overrides them. SessionContext owns the persisted auth
//! token so no auth state lives in ambient globals.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default API base URL for a local backend.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000/api";
/// Default page size for listing requests.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Hard bound on the offset an exhaustive fetch will walk to.
pub const DEFAULT_MAX_SCAN_OFFSET: u32 = 10_000;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the detection API.
    pub api_base_url: String,
    /// Base data directory (token file, downloads).
    pub data_dir: PathBuf,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Page size for listing and exhaustive fetches.
    pub page_size: u32,
    /// Safety bound for exhaustive pagination.
    pub max_scan_offset: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("ppescan");

        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            data_dir,
            request_timeout: 30,
            page_size: DEFAULT_PAGE_SIZE,
            max_scan_offset: DEFAULT_MAX_SCAN_OFFSET,
        }
    }
}

impl Settings {
    /// Path of the persisted auth token.
    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("token")
    }

    /// Default directory for downloaded images.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the detection API.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Data directory (supports `~` expansion).
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Page size for listing requests.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Safety bound for exhaustive pagination.
    #[serde(default)]
    pub max_scan_offset: Option<u32>,
}

impl Config {
    /// Default config file location: `<config dir>/ppescan/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ppescan").join("config.toml"))
    }

    /// Load the config file if one exists; otherwise defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!("Ignoring unparseable config {}: {}", path.display(), err);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Apply configuration to settings. `PPE_API_BASE_URL` in the
    /// environment wins over the config file.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref base_url) = self.api_base_url {
            settings.api_base_url = base_url.clone();
        }
        if let Ok(base_url) = std::env::var("PPE_API_BASE_URL") {
            settings.api_base_url = base_url;
        }
        if let Some(ref data_dir) = self.data_dir {
            let path = shellexpand::tilde(data_dir);
            settings.data_dir = PathBuf::from(path.as_ref());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(page_size) = self.page_size {
            settings.page_size = page_size;
        }
        if let Some(bound) = self.max_scan_offset {
            settings.max_scan_offset = bound;
        }
    }
}

/// Load effective settings from config file and environment.
pub fn load_settings() -> Settings {
    let config = Config::load();
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}

/// Persisted auth session. The token lives in a file under the data
/// directory; login stores it, logout (and a rejected token) clears it.
#[derive(Debug)]
pub struct SessionContext {
    token: Option<String>,
    token_path: PathBuf,
}

impl SessionContext {
    /// Load the session from durable storage.
    pub fn load(settings: &Settings) -> Self {
        let token_path = settings.token_path();
        let token = fs::read_to_string(&token_path)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|token| !token.is_empty());
        Self { token, token_path }
    }

    /// Session with no persistence, for tests and one-off clients.
    pub fn ephemeral(token: Option<String>) -> Self {
        Self {
            token,
            token_path: PathBuf::new(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Store a new token durably.
    pub fn store(&mut self, token: String) -> io::Result<()> {
        if let Some(parent) = self.token_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !self.token_path.as_os_str().is_empty() {
            fs::write(&self.token_path, &token)?;
        }
        self.token = Some(token);
        Ok(())
    }

    /// Clear the session, removing the stored token.
    pub fn clear(&mut self) -> io::Result<()> {
        self.token = None;
        if !self.token_path.as_os_str().is_empty() && self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}
