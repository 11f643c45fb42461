//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$I18NMAIL_CONFIG` (environment variable)
//! 2. `~/.config/i18nmail/config.toml` (Linux/macOS)
//!    `%APPDATA%\i18nmail\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parser::header::MAX_HEADER_BYTES;
use crate::section::DEFAULT_THRESHOLD;
use crate::walk::MAX_WALK_DEPTH;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// MIME traversal limits.
    pub walk: WalkConfig,
    /// S/MIME unwrapping.
    pub smime: SmimeConfig,
    /// Part extraction.
    pub extract: ExtractConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Deepest container nesting followed before failing.
    pub max_depth: usize,
    /// Report top-level parts only.
    pub dont_descend: bool,
    /// Bodies larger than this many bytes are spilled to a temp file.
    pub materialize_threshold: usize,
    /// Largest accepted header block, in bytes.
    pub max_header_bytes: usize,
    /// Directory for spill files (default: system temp dir).
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmimeConfig {
    /// Unwrap `application/pkcs7-mime` parts.
    pub enabled: bool,
    /// `openssl` executable (looked up on `PATH` if not absolute).
    pub openssl: PathBuf,
    /// Seconds before a stuck `openssl` run is killed.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Longest file name written by `extract`, in characters.
    pub max_name_len: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_WALK_DEPTH,
            dont_descend: false,
            materialize_threshold: DEFAULT_THRESHOLD, // 1 MiB
            max_header_bytes: MAX_HEADER_BYTES,       // 256 KB
            temp_dir: None,
        }
    }
}

impl Default for SmimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            openssl: PathBuf::from("openssl"),
            timeout_secs: 60,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { max_name_len: 200 }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("I18NMAIL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("i18nmail").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("i18nmail")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("i18nmail.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.walk.max_depth, 32);
        assert_eq!(cfg.walk.materialize_threshold, 1 << 20);
        assert!(cfg.smime.enabled);
        assert_eq!(cfg.smime.openssl, PathBuf::from("openssl"));
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.walk.max_depth, cfg.walk.max_depth);
        assert_eq!(parsed.smime.timeout_secs, cfg.smime.timeout_secs);
        assert_eq!(parsed.extract.max_name_len, cfg.extract.max_name_len);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[walk]
max_depth = 8
dont_descend = true

[smime]
enabled = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.walk.max_depth, 8);
        assert!(cfg.walk.dont_descend);
        assert!(!cfg.smime.enabled);
        // Other fields use defaults
        assert_eq!(cfg.walk.max_header_bytes, 256 * 1024);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_log_file_in_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/i18nmail-cache"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/tmp/i18nmail-cache/i18nmail.log")
        );
    }
}
