//! Configuration for dashterm sessions.

/// Environment variable that overrides `dashboard.token`.
pub const TOKEN_ENV: &str = "DASHTERM_TOKEN";

/// Main configuration structure.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Dashboard connection settings.
    pub dashboard: DashboardConfig,

    /// Keybind configuration.
    pub keybinds: KeybindConfig,

    /// Timing configuration.
    pub timing: TimingConfig,

    /// File transfer configuration.
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the dashboard, e.g. "http://127.0.0.1:8008".
    /// WebSocket URLs are derived from it.
    pub url: String,

    /// API token sent as a bearer credential.
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct KeybindConfig {
    /// Keybind that leaves an interactive terminal.
    /// Format: "Ctrl-]", "Alt-q", etc.
    pub detach: String,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Quiescence window in milliseconds before a resize is sent to the remote pty.
    pub resize_debounce_ms: u64,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per upload body frame.
    pub chunk_size: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8008".to_string(),
            token: None,
        }
    }
}

impl Default for KeybindConfig {
    fn default() -> Self {
        Self {
            detach: "Ctrl-]".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 1500,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn resize_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.resize_debounce_ms)
    }
}

/// Returns the config file path: ~/.config/dashterm/config.toml
#[must_use]
pub fn config_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("~/.config"))
        .join("dashterm")
        .join("config.toml")
}

/// Load configuration from default path, falling back to defaults if not found.
pub fn load() -> eyre::Result<Config> {
    load_from(&config_path())
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
pub fn load_from(path: &std::path::Path) -> eyre::Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        if config.transfer.chunk_size == 0 {
            eyre::bail!("transfer.chunk_size must be greater than zero");
        }
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Get the effective API token.
#[must_use]
pub fn get_token(config: &Config) -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .filter(|t| !t.is_empty())
        .or_else(|| config.dashboard.token.clone())
}

/// Parsed keybind representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keybind {
    Alt(char),
    Ctrl(char),
}

impl Keybind {
    /// Parse a keybind string like "Alt-q" or "Ctrl-]".
    pub fn parse(s: &str) -> eyre::Result<Self> {
        let (modifier, key) = s
            .split_once('-')
            .ok_or_else(|| eyre::eyre!("Invalid keybind format: {s}"))?;
        let mut chars = key.chars();
        let key = chars
            .next()
            .ok_or_else(|| eyre::eyre!("Missing key in keybind: {s}"))?;
        if chars.next().is_some() {
            eyre::bail!("Invalid keybind format: {s}");
        }

        match modifier.to_lowercase().as_str() {
            "alt" => Ok(Keybind::Alt(key)),
            "ctrl" => Ok(Keybind::Ctrl(key.to_ascii_lowercase())),
            other => eyre::bail!("Unknown modifier: {other}"),
        }
    }

    /// Find this keybind in `bytes`, returning its offset.
    #[must_use]
    pub fn find(&self, bytes: &[u8]) -> Option<usize> {
        match self {
            // Alt-key is ESC followed by the character
            Keybind::Alt(c) => bytes
                .windows(2)
                .position(|w| w[0] == 0x1b && w[1] == *c as u8),
            // Ctrl-key is the character with upper bits cleared
            Keybind::Ctrl(c) => {
                let ctrl_byte = (*c as u8) & 0x1f;
                bytes.iter().position(|&b| b == ctrl_byte)
            }
        }
    }
}
