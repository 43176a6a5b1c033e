//! Configuration for the failover proxy
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/keywheel/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! API keys come from the enumerated slots GEMINI_API_KEY_1 .. GEMINI_API_KEY_5.
//! Unset slots are silently skipped; slot order is attempt order.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of enumerated key slots read from the environment
pub const MAX_KEY_SLOTS: usize = 5;

/// Default upstream base URL (Google Generative Language API)
pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Default target model shared by all key slots
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Application configuration
///
/// Built once at startup and injected into the server state; the dispatch
/// loop never reads ambient environment itself.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the proxy server to
    pub bind_addr: SocketAddr,

    /// Upstream API base URL
    pub api_url: String,

    /// Target model identifier shared by all key slots
    pub model: String,

    /// API keys in attempt order (slot 1 first)
    pub api_keys: Vec<String>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_keys: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter for keywheel's own spans ("trace".."error")
    pub level: String,
    /// Whether to also write logs to rotating files
    pub file_enabled: bool,
    /// Directory for log files
    pub file_dir: PathBuf,
    /// Log file name prefix
    pub file_prefix: String,
    /// Rotation policy for log files
    pub file_rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
            file_prefix: "keywheel.log".to_string(),
            file_rotation: LogRotation::Daily,
        }
    }
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogRotation::Hourly => "hourly",
            LogRotation::Daily => "daily",
            LogRotation::Never => "never",
        }
    }
}

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,

    /// File-layer equivalent of the env key slots; env slots take precedence
    pub api_keys: Option<Vec<String>>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

/// Optional [logging] section of the config file
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub file_rotation: Option<LogRotation>,
}

impl Config {
    /// Get the config file path: ~/.config/keywheel/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("keywheel").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        // Create parent directory
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        // Use Config::default().to_toml() as single source of truth
        let template = Self::default().to_toml();

        // Write config (ignore errors - config is optional)
        let _ = std::fs::write(&path, template);
    }

    /// Load file config if it exists
    ///
    /// # Panics
    /// If config file exists but cannot be parsed. This is intentional -
    /// a broken config should fail fast with a clear error, not silently
    /// fall back to defaults while the user debugs the wrong thing.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("\nCONFIG ERROR - Failed to parse configuration file\n");
                    eprintln!("  File: {}\n", path.display());
                    eprintln!("  Error: {}\n", e);
                    eprintln!("  To reset, delete the file and restart keywheel.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Config file doesn't exist - use defaults
                FileConfig::default()
            }
            Err(e) => {
                // File exists but can't be read (permissions, etc.)
                eprintln!("\nCONFIG ERROR - Cannot read configuration file\n");
                eprintln!("  File: {}\n", path.display());
                eprintln!("  Error: {}\n", e);
                std::process::exit(1);
            }
        }
    }

    /// Read the enumerated key slots from the environment, in slot order.
    /// Unset or empty slots are skipped, not errors.
    fn keys_from_env_slots() -> Vec<String> {
        (1..=MAX_KEY_SLOTS)
            .filter_map(|n| std::env::var(format!("GEMINI_API_KEY_{}", n)).ok())
            .filter(|k| !k.trim().is_empty())
            .collect()
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        // Bind address: env > file > default
        let bind_addr = std::env::var("KEYWHEEL_BIND")
            .ok()
            .or(file.bind_addr)
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid bind address");

        // Upstream API URL: env > file > default
        let api_url = std::env::var("GEMINI_API_URL")
            .ok()
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        // Target model: env > file > default
        let model = std::env::var("GEMINI_MODEL")
            .ok()
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        // API keys: env slots > file list. A key present in any env slot
        // means the environment owns the whole list.
        let env_keys = Self::keys_from_env_slots();
        let api_keys = if env_keys.is_empty() {
            file.api_keys.unwrap_or_default()
        } else {
            env_keys
        };

        let logging = LoggingConfig::from_file(file.logging);

        Self {
            bind_addr,
            api_url,
            model,
            api_keys,
            logging,
        }
    }

    /// Generate the TOML template for the config file
    /// Single source of truth for ensure_config_exists and `config --reset`
    pub fn to_toml(&self) -> String {
        let keys = self
            .api_keys
            .iter()
            .map(|k| format!("{:?}", k))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"# keywheel configuration
# Env vars override these values. API keys are usually supplied via the
# GEMINI_API_KEY_1 .. GEMINI_API_KEY_{max} environment slots instead of here.

bind_addr = {bind:?}
api_url = {api_url:?}
model = {model:?}

# Attempt order matters: the first key that succeeds wins.
api_keys = [{keys}]

[logging]
level = {level:?}
file_enabled = {file_enabled}
file_dir = {file_dir:?}
file_prefix = {file_prefix:?}
file_rotation = {rotation:?}
"#,
            max = MAX_KEY_SLOTS,
            bind = self.bind_addr.to_string(),
            api_url = self.api_url,
            model = self.model,
            keys = keys,
            level = self.logging.level,
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display().to_string(),
            file_prefix = self.logging.file_prefix,
            rotation = self.logging.file_rotation.as_str(),
        )
    }
}

impl LoggingConfig {
    fn from_file(file: Option<FileLogging>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            level: file.level.unwrap_or(defaults.level),
            file_enabled: file.file_enabled.unwrap_or(defaults.file_enabled),
            file_dir: file.file_dir.map(PathBuf::from).unwrap_or(defaults.file_dir),
            file_prefix: file.file_prefix.unwrap_or(defaults.file_prefix),
            file_rotation: file.file_rotation.unwrap_or(defaults.file_rotation),
        }
    }
}

/// Short SHA-256 fingerprint of an API key, for logging (never log the key!)
pub fn key_fingerprint(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    format!("{:x}", hash)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_key_slots() {
        for n in 1..=MAX_KEY_SLOTS {
            std::env::remove_var(format!("GEMINI_API_KEY_{}", n));
        }
    }

    /// Verify that the generated template can be parsed back.
    /// Catches TOML syntax errors in the to_toml format string.
    #[test]
    fn test_config_roundtrip_default() {
        let config = Config::default();
        let toml_str = config.to_toml();

        let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
        assert!(
            parsed.is_ok(),
            "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
            toml_str,
            parsed.err()
        );
    }

    #[test]
    fn test_config_roundtrip_with_keys() {
        let config = Config {
            api_keys: vec!["alpha".to_string(), "beta".to_string()],
            ..Config::default()
        };
        let toml_str = config.to_toml();

        let parsed: FileConfig = toml::from_str(&toml_str).expect("template should parse");
        assert_eq!(
            parsed.api_keys,
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
        let logging = parsed.logging.expect("logging section should be present");
        assert_eq!(logging.file_rotation, Some(LogRotation::Daily));
    }

    #[test]
    #[serial]
    fn test_env_slots_preserve_order_and_skip_gaps() {
        clear_key_slots();
        std::env::set_var("GEMINI_API_KEY_1", "first");
        // slot 2 deliberately unset
        std::env::set_var("GEMINI_API_KEY_3", "third");
        std::env::set_var("GEMINI_API_KEY_5", "fifth");

        let keys = Config::keys_from_env_slots();
        assert_eq!(keys, vec!["first", "third", "fifth"]);

        clear_key_slots();
    }

    #[test]
    #[serial]
    fn test_env_slots_skip_empty_values() {
        clear_key_slots();
        std::env::set_var("GEMINI_API_KEY_1", "");
        std::env::set_var("GEMINI_API_KEY_2", "  ");
        std::env::set_var("GEMINI_API_KEY_3", "real-key");

        let keys = Config::keys_from_env_slots();
        assert_eq!(keys, vec!["real-key"]);

        clear_key_slots();
    }

    #[test]
    #[serial]
    fn test_no_slots_set_yields_empty_list() {
        clear_key_slots();
        assert!(Config::keys_from_env_slots().is_empty());
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let fp = key_fingerprint("AIzaSy-example");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, key_fingerprint("AIzaSy-example"));
        assert_ne!(fp, key_fingerprint("AIzaSy-other"));
        // Never leak the key itself
        assert!(!fp.contains("AIzaSy"));
    }

    #[test]
    fn test_log_rotation_deserializes_lowercase() {
        let file: FileLogging = toml::from_str(r#"file_rotation = "hourly""#).unwrap();
        assert_eq!(file.file_rotation, Some(LogRotation::Hourly));
    }
}
