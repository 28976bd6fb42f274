//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/genstream/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/genstream/` (~/.config/genstream/)
//! - State/Logs: `$XDG_STATE_HOME/genstream/` (~/.local/state/genstream/)
//!
//! Every section falls back to defaults, so an empty file (or no file) gives
//! the stock pipeline behavior.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Format detection thresholds
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Boundary scanning and progress estimation
    #[serde(default)]
    pub scan: ScanConfig,

    /// Completion stagger policy
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Truncation analysis and repair
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Emergency extraction heuristics
    #[serde(default)]
    pub emergency: EmergencyConfig,

    /// Multi-batch continuation limits
    #[serde(default)]
    pub continuation: ContinuationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Format detection thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Text shorter than this is never classified
    #[serde(default = "default_min_detect_chars")]
    pub min_chars: usize,

    /// How much of the text head the early-pattern rules look at
    #[serde(default = "default_detect_window")]
    pub window_chars: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_detect_chars(),
            window_chars: default_detect_window(),
        }
    }
}

fn default_min_detect_chars() -> usize {
    50
}

fn default_detect_window() -> usize {
    500
}

/// Boundary scanning and progress estimation
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Minimum milliseconds between full boundary scans
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,

    /// Characters assumed per line when estimating percent
    #[serde(default = "default_chars_per_line")]
    pub chars_per_line: usize,

    /// Expected line count for files without a size hint
    #[serde(default = "default_expected_lines")]
    pub default_expected_lines: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_scan_interval_ms(),
            chars_per_line: default_chars_per_line(),
            default_expected_lines: default_expected_lines(),
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_scan_interval_ms() -> u64 {
    100
}

fn default_chars_per_line() -> usize {
    40
}

fn default_expected_lines() -> usize {
    100
}

/// Completion stagger policy
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// Disable to complete files the moment their boundary closes
    #[serde(default = "default_true")]
    pub staggered: bool,

    /// Minimum time a file stays Streaming before it may complete
    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,

    /// Extra dwell per plan position
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    /// Pause between forced completions at stream end
    #[serde(default = "default_finalize_delay_ms")]
    pub finalize_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            staggered: true,
            min_dwell_ms: default_min_dwell_ms(),
            stagger_ms: default_stagger_ms(),
            finalize_delay_ms: default_finalize_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_dwell_ms() -> u64 {
    400
}

fn default_stagger_ms() -> u64 {
    150
}

fn default_finalize_delay_ms() -> u64 {
    60
}

/// Truncation analysis and repair
#[derive(Debug, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Texts shorter than this are not analyzed at all
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Maximum number of closers appended by brace repair
    #[serde(default = "default_max_brace_repair")]
    pub max_brace_repair: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            max_brace_repair: default_max_brace_repair(),
        }
    }
}

fn default_min_text_chars() -> usize {
    20
}

fn default_max_brace_repair() -> usize {
    3
}

/// Emergency extraction heuristics
#[derive(Debug, Deserialize, Clone)]
pub struct EmergencyConfig {
    /// Code blocks shorter than this are treated as snippets and skipped
    #[serde(default = "default_min_block_chars")]
    pub min_block_chars: usize,

    /// Directory every inferred path is placed under
    #[serde(default = "default_source_root")]
    pub source_root: String,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            min_block_chars: default_min_block_chars(),
            source_root: default_source_root(),
        }
    }
}

fn default_min_block_chars() -> usize {
    50
}

fn default_source_root() -> String {
    "src".to_string()
}

/// Multi-batch continuation limits
#[derive(Debug, Deserialize, Clone)]
pub struct ContinuationConfig {
    /// Hard ceiling on batches per generation, the first one included
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,

    /// Follow-up batches allowed to deliver nothing before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_batches: default_max_batches(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_batches() -> usize {
    5
}

fn default_max_retries() -> usize {
    2
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.scan.chars_per_line == 0 {
            return Err(Error::Config(
                "scan.chars_per_line must be at least 1".to_string(),
            ));
        }
        if self.scan.interval_ms == 0 {
            return Err(Error::Config(
                "scan.interval_ms must be at least 1".to_string(),
            ));
        }
        if self.continuation.max_batches == 0 {
            return Err(Error::Config(
                "continuation.max_batches must be at least 1".to_string(),
            ));
        }
        if self.emergency.source_root.trim_matches('/').is_empty() {
            return Err(Error::Config(
                "emergency.source_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/genstream/config.toml` (~/.config/genstream/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("genstream").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/genstream/` (~/.local/state/genstream/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("genstream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detection.min_chars, 50);
        assert_eq!(config.scan.interval_ms, 100);
        assert_eq!(config.scan.default_expected_lines, 100);
        assert!(config.completion.staggered);
        assert_eq!(config.continuation.max_batches, 5);
        assert_eq!(config.emergency.source_root, "src");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[scan]
interval_ms = 250
chars_per_line = 60

[completion]
staggered = false

[continuation]
max_batches = 3

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.scan.interval_ms, 250);
        assert_eq!(config.scan.chars_per_line, 60);
        assert_eq!(config.scan.default_expected_lines, 100);
        assert!(!config.completion.staggered);
        assert_eq!(config.completion.min_dwell_ms, 400);
        assert_eq!(config.continuation.max_batches, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_batches() {
        let mut config = Config::default();
        config.continuation.max_batches = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.emergency.source_root = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recovery]\nmax_brace_repair = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.recovery.max_brace_repair, 5);
        assert_eq!(config.recovery.min_text_chars, 20);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nchars_per_line = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[scan]\ninterval_ms = 0\n").unwrap();
        match Config::load_from(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("interval_ms")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
