use anyhow::Result;
use serde::Serialize;

use crate::config::{Config, SourceConfig};
use crate::connector_http::HttpSource;

/// Health of the configured source, as reported by `catalog sources`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_type: String,
    pub location: String,
    pub healthy: bool,
    pub detail: String,
}

pub fn get_source_status(config: &Config) -> SourceStatus {
    match &config.source {
        SourceConfig::File(file) => {
            let (healthy, detail) = if file.path.is_file() {
                (true, "OK".to_string())
            } else {
                (false, "NOT FOUND".to_string())
            };
            let detail = match &file.image_dir {
                Some(dir) if !dir.is_dir() => format!("{} (image_dir missing)", detail),
                _ => detail,
            };
            SourceStatus {
                source_type: "file".to_string(),
                location: file.path.display().to_string(),
                healthy,
                detail,
            }
        }
        SourceConfig::Http(http) => {
            let (healthy, detail) = match HttpSource::new(String::new(), http.clone())
                .map_err(|e| format!("{:#}", e))
                .and_then(|source| source.sections().map_err(|e| e.to_string()))
            {
                Ok(sections) => (true, format!("OK ({} matching sections)", sections.len())),
                Err(e) => (false, e),
            };
            SourceStatus {
                source_type: "http".to_string(),
                location: http.base_url.clone(),
                healthy,
                detail,
            }
        }
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    let status = get_source_status(config);
    println!("{:<8} {:<8} {:<40} DETAIL", "SOURCE", "HEALTHY", "LOCATION");
    println!(
        "{:<8} {:<8} {:<40} {}",
        status.source_type, status.healthy, status.location, status.detail
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn file_source_health_follows_file_existence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("collection.xml");
        let toml = format!("[source.file]\npath = {:?}\n", path.display().to_string());
        let config = parse_config(&toml).unwrap();

        assert!(!get_source_status(&config).healthy);
        std::fs::write(&path, "<Collection/>").unwrap();
        let status = get_source_status(&config);
        assert!(status.healthy);
        assert_eq!(status.source_type, "file");
    }
}
