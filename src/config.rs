//! Optional config file loading. Search order: ./inkwell.toml, then
//! $XDG_CONFIG_HOME/inkwell/inkwell.toml (or the platform equivalent).
//!
//! Every key is optional; missing keys keep their defaults and CLI flags
//! override whatever the file sets.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const APP_NAME: &str = "inkwell";
pub const CONFIG_FILE_NAME: &str = "inkwell.toml";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; Inkwell/0.1; +https://github.com/inkwell)";

/// Layered settings read once at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub download: DownloadConfig,
    pub epub: EpubConfig,
    pub resume: ResumeConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Where packages are written when no explicit output path is given.
    pub output_dir: PathBuf,
    /// Seconds between outgoing requests.
    pub rate_limit: f64,
    /// Total attempts per request, including the first.
    pub max_retries: u32,
    /// Request timeout in seconds.
    pub timeout: f64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            rate_limit: 1.0,
            max_retries: 3,
            timeout: 30.0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DownloadConfig {
    pub fn request_delay(&self) -> Result<Duration, ConfigError> {
        seconds("download.rate_limit", self.rate_limit.max(0.0))
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        seconds("download.timeout", self.timeout.max(1.0))
    }

    /// Rejects durations that cannot be represented (infinite or out of range).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.request_delay()?;
        self.request_timeout()?;
        Ok(())
    }
}

fn seconds(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|source| ConfigError::Duration { key, value, source })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EpubConfig {
    pub include_images: bool,
    pub include_cover: bool,
    pub chapter_style: String,
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            include_images: true,
            include_cover: true,
            chapter_style: "default".to_string(),
        }
    }
}

/// Stale checkpoint policy. With `prune_completed`, a checkpoint is deleted
/// once its story has been packaged; otherwise it stays until cleared by hand.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    pub prune_completed: bool,
}

impl Config {
    pub fn from_toml(s: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.download.validate()?;
        Ok(config)
    }

    /// First existing file in [search_paths] wins. Missing file returns defaults.
    /// Invalid TOML or an I/O error reading a present file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        for path in search_paths()? {
            if path.exists() {
                let s = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                    path: path.clone(),
                    source: e,
                })?;
                tracing::debug!(path = %path.display(), "Loaded config");
                return Self::from_toml(&s, &path);
            }
        }
        Ok(Self::default())
    }
}

pub fn search_paths() -> Result<Vec<PathBuf>, ConfigError> {
    let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(d) = config_dir() {
        paths.push(d.join(CONFIG_FILE_NAME));
    }
    Ok(paths)
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

pub fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Config, ConfigError> {
        Config::from_toml(s, Path::new("inkwell.toml"))
    }

    #[test]
    fn parse_empty_config_gives_defaults() -> Result<(), ConfigError> {
        let c = parse("")?;
        assert_eq!(c, Config::default());
        assert_eq!(c.download.rate_limit, 1.0);
        assert_eq!(c.download.max_retries, 3);
        assert_eq!(c.download.timeout, 30.0);
        assert!(c.epub.include_images);
        assert!(c.epub.include_cover);
        assert_eq!(c.epub.chapter_style, "default");
        assert!(!c.resume.prune_completed);
        Ok(())
    }

    #[test]
    fn parse_full_config() -> Result<(), ConfigError> {
        let s = r#"
            [download]
            output_dir = "out"
            rate_limit = 2.5
            max_retries = 5
            timeout = 60.0
            user_agent = "Custom/1.0"

            [epub]
            include_images = false
            include_cover = false
            chapter_style = "classic"

            [resume]
            prune_completed = true
        "#;
        let c = parse(s)?;
        assert_eq!(c.download.output_dir, PathBuf::from("out"));
        assert_eq!(c.download.request_delay()?, Duration::from_millis(2500));
        assert_eq!(c.download.max_retries, 5);
        assert_eq!(c.download.request_timeout()?, Duration::from_secs(60));
        assert_eq!(c.download.user_agent, "Custom/1.0");
        assert!(!c.epub.include_images);
        assert!(!c.epub.include_cover);
        assert_eq!(c.epub.chapter_style, "classic");
        assert!(c.resume.prune_completed);
        Ok(())
    }

    #[test]
    fn parse_partial_section_keeps_other_defaults() -> Result<(), ConfigError> {
        let c = parse("[download]\nrate_limit = 0.5\n")?;
        assert_eq!(c.download.request_delay()?, Duration::from_millis(500));
        assert_eq!(c.download.max_retries, 3);
        assert_eq!(c.download.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(c.epub, EpubConfig::default());
        Ok(())
    }

    #[test]
    fn negative_delay_clamps_to_zero() -> Result<(), ConfigError> {
        let c = parse("[download]\nrate_limit = -3.0\n")?;
        assert_eq!(c.download.request_delay()?, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn unrepresentable_durations_are_errors() {
        let huge = parse("[download]\nrate_limit = 1e30\n");
        assert!(matches!(
            huge,
            Err(ConfigError::Duration { key: "download.rate_limit", .. })
        ));
        let infinite = parse("[download]\ntimeout = inf\n");
        assert!(matches!(
            infinite,
            Err(ConfigError::Duration { key: "download.timeout", .. })
        ));
    }

    #[test]
    fn invalid_toml_errors() {
        let result = parse("[download]\nrate_limit = [");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
