//! Session configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Everything a session needs to spawn and size its shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell executable. When unset, `$SHELL` is consulted, then `/bin/zsh`.
    pub shell_path: Option<String>,
    /// Arguments passed to the shell after the login-form argv[0].
    pub shell_args: Vec<String>,
    /// Extra environment for the child. `TERM` and `LANG` get sensible
    /// defaults unless overridden here.
    pub env: HashMap<String, String>,
    /// Working directory for the child; inherited when unset.
    pub working_dir: Option<String>,
    pub rows: u16,
    pub cols: u16,
    /// Scrollback bound in lines. Zero disables history.
    pub max_scrollback: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell_path: None,
            shell_args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            rows: 24,
            cols: 80,
            max_scrollback: 10_000,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file. Missing or malformed files fall
    /// back to defaults so a bad config never takes the terminal down.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("no config file at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    log::error!("failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::error!("failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Resolve the shell to launch: explicit configuration wins, then
    /// `$SHELL`, then `/bin/zsh`.
    pub fn shell(&self) -> String {
        self.shell_path
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/zsh".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rows, 24);
        assert_eq!(config.cols, 80);
        assert_eq!(config.max_scrollback, 10_000);
        assert!(config.shell_path.is_none());
    }

    #[test]
    fn test_explicit_shell_wins() {
        let config = Config {
            shell_path: Some("/bin/dash".to_string()),
            ..Config::default()
        };
        assert_eq!(config.shell(), "/bin/dash");
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = Config::default();
        config.shell_args = vec!["-l".to_string()];
        config.env.insert("FOO".to_string(), "bar".to_string());
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.shell_args, config.shell_args);
        assert_eq!(back.env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"rows": 50}"#).unwrap();
        assert_eq!(config.rows, 50);
        assert_eq!(config.cols, 80);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = Config::load_from(Path::new("/nonexistent/termcore.json"));
        assert_eq!(config.cols, 80);
    }
}
