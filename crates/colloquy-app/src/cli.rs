//! CLI argument definitions for the Colloquy server.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Colloquy - a chat server bridging end users and an LLM backend.
#[derive(Parser, Debug)]
#[command(name = "colloquy", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for SQLite and the API token file.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Disable tool augmentation even when the config enables it.
    #[arg(long = "no-tools")]
    pub no_tools: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > COLLOQUY_CONFIG env var > platform
    /// default (~/.colloquy/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("COLLOQUY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > COLLOQUY_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("COLLOQUY_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Resolve the data directory override, if any.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level override, if any.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Platform default config path: ~/.colloquy/config.toml.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".colloquy").join("config.toml")
}

/// Expand a leading `~/` against the home directory.
pub fn resolve_data_dir(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            config: None,
            port: None,
            data_dir: None,
            log_level: None,
            no_tools: false,
        }
    }

    #[test]
    fn test_port_flag_wins() {
        let mut a = args();
        a.port = Some(9000);
        assert_eq!(a.resolve_port(3900), 9000);
    }

    #[test]
    fn test_port_falls_back_to_config() {
        assert_eq!(args().resolve_port(3900), 3900);
    }

    #[test]
    fn test_config_flag_wins() {
        let mut a = args();
        a.config = Some(PathBuf::from("/tmp/custom.toml"));
        assert_eq!(a.resolve_config_path(), PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn test_resolve_data_dir_expands_tilde() {
        let expanded = resolve_data_dir("~/data");
        assert!(!expanded.to_string_lossy().starts_with("~"));
        assert!(expanded.to_string_lossy().ends_with("data"));
    }

    #[test]
    fn test_resolve_data_dir_absolute_unchanged() {
        assert_eq!(resolve_data_dir("/var/lib/colloquy"), PathBuf::from("/var/lib/colloquy"));
    }
}
