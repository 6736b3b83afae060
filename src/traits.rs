//! Source trait shared by the built-in connectors.
//!
//! A [`CatalogSource`] turns one external catalog into a stream of
//! [`TitleRecord`](crate::models::TitleRecord)s pushed into an
//! [`IngestSink`]. It also exposes the [`ArtFetcher`] that can read art for
//! the locators it produced, so the driver can resolve lazy art after the
//! load has finished.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        CatalogSource         │
//! │  ┌────────────┐ ┌─────────┐  │
//! │  │ FileSource │ │HttpSource│ │
//! │  └────────────┘ └─────────┘  │
//! └──────────────┬───────────────┘
//!                ▼
//!     ingest(&mut IngestSink) → staging Database
//! ```

use std::sync::Arc;

use anyhow::Result;

use crate::art::{ArtFetcher, FileArtFetcher, HttpArtFetcher};
use crate::config::{Config, SourceConfig};
use crate::connector_file::FileSource;
use crate::connector_http::HttpSource;
use crate::error::LoadError;
use crate::ingest::IngestSink;

/// A catalog source that produces records for ingestion.
///
/// `ingest` runs on the loader thread. It must call
/// [`IngestSink::check_cancelled`] often enough that a shutdown request is
/// observed promptly, and must propagate [`LoadError::Cancelled`] untouched.
pub trait CatalogSource: Send + Sync {
    /// Instance name, e.g. `"library"`.
    fn name(&self) -> &str;

    /// One-line description, used by `catalog sources`.
    fn description(&self) -> &str;

    /// Source type identifier (`"file"`, `"http"`).
    fn source_type(&self) -> &str;

    /// `"{type}:{name}"`, used in log lines.
    fn source_label(&self) -> String {
        format!("{}:{}", self.source_type(), self.name())
    }

    /// Fetcher able to read art for the locators this source emits.
    fn art_fetcher(&self) -> &dyn ArtFetcher;

    /// Parse the whole source into `sink`.
    fn ingest(&self, sink: &mut IngestSink<'_>) -> Result<(), LoadError>;
}

/// Build the configured source.
pub fn source_from_config(config: &Config) -> Result<Box<dyn CatalogSource>> {
    let name = config.catalog.kind.to_lowercase();
    let source: Box<dyn CatalogSource> = match &config.source {
        SourceConfig::File(cfg) => Box::new(FileSource::new(name, cfg.clone())),
        SourceConfig::Http(cfg) => Box::new(HttpSource::new(name, cfg.clone())?),
    };
    Ok(source)
}

/// Standalone art fetcher for the configured source, used by the driver to
/// serve lazy art independently of any single load.
pub fn art_fetcher_from_config(config: &Config) -> Result<Arc<dyn ArtFetcher>> {
    let fetcher: Arc<dyn ArtFetcher> = match &config.source {
        SourceConfig::File(cfg) => {
            let root = cfg
                .image_dir
                .clone()
                .or_else(|| cfg.path.parent().map(|p| p.to_path_buf()));
            Arc::new(FileArtFetcher::new(root))
        }
        SourceConfig::Http(cfg) => Arc::new(HttpArtFetcher::new(
            &cfg.base_url,
            crate::connector_http::build_client(cfg)?,
        )),
    };
    Ok(fetcher)
}
