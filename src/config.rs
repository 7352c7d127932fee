use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::credential::{FileStorage, MemoryStorage, NoPrompt, Prompter, SecretStorage, StdinPrompter};
use crate::pr::DEFAULT_API_BASE;

const CONFIG_FILE: &str = ".pr-badges.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .pr-badges.toml.
///
/// All fields are optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub credential: CredentialConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,

    /// REST API root, for GitHub Enterprise.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// File the token is persisted in between runs. Kept in memory only when unset.
    pub path: Option<PathBuf>,

    /// Ask on stdin when no token is known.
    #[serde(default = "default_prompt")]
    pub prompt: bool,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            path: None,
            prompt: default_prompt(),
        }
    }
}

fn default_prompt() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayConfig {
    pub mode: Option<Theme>,
}

/// Color scheme override written to the page root before badging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the page, then the system preference.
    #[default]
    Auto,
    Light,
    Dark,
}

impl Theme {
    pub fn as_attr(&self) -> &'static str {
        match self {
            Theme::Auto => "auto",
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl Config {
    /// Load configuration from .pr-badges.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                config.github.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN env var.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|token| !token.trim().is_empty())
    }

    pub fn api_base(&self) -> &str {
        self.github.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn storage(&self) -> Arc<dyn SecretStorage> {
        match &self.credential.path {
            Some(path) => Arc::new(FileStorage::new(path.clone())),
            None => Arc::new(MemoryStorage::default()),
        }
    }

    /// `allow` is false when the command line forbids prompting.
    pub fn prompter(&self, allow: bool) -> Arc<dyn Prompter> {
        if allow && self.credential.prompt {
            Arc::new(StdinPrompter)
        } else {
            Arc::new(NoPrompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert_eq!(config.api_base(), "https://api.github.com");
        assert!(config.credential.path.is_none());
        assert!(config.credential.prompt);
        assert!(config.display.mode.is_none());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[github]
api_base = "https://ghe.example.com/api/v3"

[credential]
path = "/tmp/pr-badges-token"
prompt = false

[display]
mode = "dark"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_base(), "https://ghe.example.com/api/v3");
        assert_eq!(config.credential.path.as_deref(), Some(Path::new("/tmp/pr-badges-token")));
        assert!(!config.credential.prompt);
        assert_eq!(config.display.mode, Some(Theme::Dark));
    }

    #[test]
    fn test_partial_credential_section_keeps_prompt() {
        let config: Config = toml::from_str("[credential]\npath = \"token\"\n").unwrap();
        assert!(config.credential.prompt);
    }

    #[test]
    fn test_unknown_theme_is_rejected() {
        assert!(toml::from_str::<Config>("[display]\nmode = \"sepia\"\n").is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from(Path::new("/nonexistent/.pr-badges.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_)));
    }

    #[test]
    fn test_configured_token_wins() {
        let config: Config = toml::from_str("[github]\ntoken = \"ghp_configured\"\n").unwrap();
        assert_eq!(config.github_token().as_deref(), Some("ghp_configured"));
    }
}
