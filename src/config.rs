use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::art::ArtPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub art: ArtConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Media kind used for the "All <kind>" category.
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Zero disables periodic reloads.
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            poll_interval_ms: default_poll_interval_ms(),
            reload_interval_secs: default_reload_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl CatalogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        match self.reload_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_kind() -> String {
    "Movies".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_reload_interval_secs() -> u64 {
    3600
}
fn default_retry_interval_secs() -> u64 {
    60
}
fn default_shutdown_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtConfig {
    /// Only honored by the HTTP source; when unset it defaults to on there.
    #[serde(default)]
    pub eager_thumbnails: Option<bool>,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
    #[serde(default = "default_art_log_level")]
    pub log_level: String,
}

impl Default for ArtConfig {
    fn default() -> Self {
        Self {
            eager_thumbnails: None,
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
            log_level: default_art_log_level(),
        }
    }
}

fn default_thumbnail_width() -> u32 {
    200
}
fn default_thumbnail_height() -> u32 {
    300
}
fn default_art_log_level() -> String {
    "debug".to_string()
}

impl ArtConfig {
    /// Resolve the effective art policy for `source`.
    pub fn policy(&self, source: &SourceConfig) -> Result<ArtPolicy> {
        let log_level = self
            .log_level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("art.log_level '{}' is not a log level", self.log_level))?;
        let eager_thumbnails = match source {
            SourceConfig::Http(_) => self.eager_thumbnails.unwrap_or(true),
            SourceConfig::File(_) => false,
        };
        Ok(ArtPolicy {
            eager_thumbnails,
            thumbnail_width: self.thumbnail_width,
            thumbnail_height: self.thumbnail_height,
            log_level,
        })
    }
}

/// Exactly one source per config: `[source.file]` or `[source.http]`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum SourceConfig {
    File(FileSourceConfig),
    Http(HttpSourceConfig),
}

impl SourceConfig {
    pub fn source_type(&self) -> &'static str {
        match self {
            SourceConfig::File(_) => "file",
            SourceConfig::Http(_) => "http",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    #[serde(default = "default_section_type")]
    pub section_type: String,
    /// Allow-list of section titles. Empty means every section of the type.
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_section_type() -> String {
    "movie".to_string()
}
fn default_page_size() -> u32 {
    200
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.catalog.kind.trim().is_empty() {
        anyhow::bail!("catalog.kind must not be empty");
    }
    if config.catalog.poll_interval_ms == 0 {
        anyhow::bail!("catalog.poll_interval_ms must be > 0");
    }

    if config.art.thumbnail_width == 0 || config.art.thumbnail_height == 0 {
        anyhow::bail!("art.thumbnail_width and art.thumbnail_height must be > 0");
    }
    // Surface a bad log level at load time rather than on first use.
    config.art.policy(&config.source)?;

    match &config.source {
        SourceConfig::File(file) => {
            if file.path.as_os_str().is_empty() {
                anyhow::bail!("source.file.path must not be empty");
            }
        }
        SourceConfig::Http(http) => {
            if !(http.base_url.starts_with("http://") || http.base_url.starts_with("https://")) {
                anyhow::bail!(
                    "source.http.base_url must be an http(s) URL, got '{}'",
                    http.base_url
                );
            }
            if http.page_size == 0 {
                anyhow::bail!("source.http.page_size must be > 0");
            }
            if http.timeout_secs == 0 {
                anyhow::bail!("source.http.timeout_secs must be > 0");
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_with_defaults() {
        let config = parse_config(
            r#"
[source.file]
path = "/data/collection.xml"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.kind, "Movies");
        assert_eq!(config.catalog.reload_interval(), Some(Duration::from_secs(3600)));
        let policy = config.art.policy(&config.source).unwrap();
        assert!(!policy.eager_thumbnails);
        assert_eq!(policy.log_level, tracing::Level::DEBUG);
        assert!(matches!(&config.source, SourceConfig::File(f) if f.image_dir.is_none()));
    }

    #[test]
    fn http_source_defaults_to_eager_thumbnails() {
        let config = parse_config(
            r#"
[catalog]
kind = "Films"
reload_interval_secs = 0

[art]
log_level = "warn"

[source.http]
base_url = "http://media.local:32400"
sections = ["Films"]
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.reload_interval(), None);
        let policy = config.art.policy(&config.source).unwrap();
        assert!(policy.eager_thumbnails);
        assert_eq!(policy.log_level, tracing::Level::WARN);
        match &config.source {
            SourceConfig::Http(http) => {
                assert_eq!(http.section_type, "movie");
                assert_eq!(http.page_size, 200);
                assert_eq!(http.sections, vec!["Films"]);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse_config("[catalog]\nkind = \"Movies\"\n").is_err());
        assert!(parse_config("[source.http]\nbase_url = \"media.local\"\n").is_err());
        assert!(parse_config(
            "[art]\nlog_level = \"loud\"\n[source.file]\npath = \"/x.xml\"\n"
        )
        .is_err());
        assert!(parse_config(
            "[source.http]\nbase_url = \"http://h\"\npage_size = 0\n"
        )
        .is_err());
    }
}
