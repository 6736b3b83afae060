//! Cover art acquisition.
//!
//! Sources only know how to fetch raw bytes for a locator ([`ArtFetcher`]).
//! The resolution policy lives once, in [`ArtResolver`] (ingest side) and
//! [`resolve_bytes`] (serving side):
//!
//! | Source supplies | During ingest | On first demand |
//! |-----------------|---------------|-----------------|
//! | thumbnail locator | thumbnail bytes read | large fetched lazily |
//! | large locator only | large bytes read; thumbnail downscaled if `eager_thumbnails` | thumbnail downscaled from large |
//! | nothing | no image | - |
//!
//! A failure on one asset never fails the load: the collection is inserted
//! without art and the failure is logged at the configured level.

use std::io::Cursor;
use std::path::PathBuf;

use image::{DynamicImage, ImageFormat};
use tracing::Level;

use crate::database::Database;
use crate::error::ArtError;
use crate::models::{ArtLocators, Image, ImageId, ImageSlot, Resolution};
use crate::persistent_id::art_persistent_id;

/// Fetch raw bytes for one art locator. Implemented once per source kind.
pub trait ArtFetcher: Send + Sync {
    fn fetch(&self, locator: &str, resolution: Resolution) -> Result<Vec<u8>, ArtError>;
}

/// Art policy knobs, resolved from the `[art]` config table.
#[derive(Debug, Clone)]
pub struct ArtPolicy {
    /// Downscale the large asset during ingest when no thumbnail locator exists.
    pub eager_thumbnails: bool,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Level at which per-record art failures are logged.
    pub log_level: Level,
}

impl Default for ArtPolicy {
    fn default() -> Self {
        Self {
            eager_thumbnails: false,
            thumbnail_width: 200,
            thumbnail_height: 300,
            log_level: Level::DEBUG,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fetchers
// ═══════════════════════════════════════════════════════════════════════

/// Reads art from the local filesystem. Relative locators resolve against
/// `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileArtFetcher {
    root: Option<PathBuf>,
}

impl FileArtFetcher {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn path_for(&self, locator: &str) -> PathBuf {
        let path = PathBuf::from(locator);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

impl ArtFetcher for FileArtFetcher {
    fn fetch(&self, locator: &str, _resolution: Resolution) -> Result<Vec<u8>, ArtError> {
        std::fs::read(self.path_for(locator)).map_err(|source| ArtError::Io {
            locator: locator.to_string(),
            source,
        })
    }
}

/// Fetches art from the media server. Shares the load's client so every
/// request reuses the same connection pool.
#[derive(Debug, Clone)]
pub struct HttpArtFetcher {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpArtFetcher {
    pub fn new(base_url: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    /// Absolute URL for a server path or an already absolute locator.
    pub fn url_for(&self, locator: &str) -> String {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            locator.to_string()
        } else if locator.starts_with('/') {
            format!("{}{}", self.base_url, locator)
        } else {
            format!("{}/{}", self.base_url, locator)
        }
    }
}

impl ArtFetcher for HttpArtFetcher {
    fn fetch(&self, locator: &str, _resolution: Resolution) -> Result<Vec<u8>, ArtError> {
        let http_err = |message: String| ArtError::Http {
            locator: locator.to_string(),
            message,
        };
        let resp = self
            .client
            .get(self.url_for(locator))
            .send()
            .map_err(|e| http_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(http_err(format!("HTTP {}", resp.status())));
        }
        let bytes = resp.bytes().map_err(|e| http_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ingest-side resolution
// ═══════════════════════════════════════════════════════════════════════

/// Applies the art policy for one load, holding the source's fetcher by
/// reference.
pub struct ArtResolver<'a> {
    fetcher: &'a dyn ArtFetcher,
    policy: ArtPolicy,
    failures: u64,
}

impl<'a> ArtResolver<'a> {
    pub fn new(fetcher: &'a dyn ArtFetcher, policy: ArtPolicy) -> Self {
        Self {
            fetcher,
            policy,
            failures: 0,
        }
    }

    /// Number of per-record art failures seen so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Acquire art for record `uid` and insert it into `db`.
    ///
    /// Returns `None` when the record has no usable art.
    pub fn acquire(&mut self, db: &mut Database, uid: &str, art: &ArtLocators) -> Option<ImageId> {
        if art.is_empty() {
            return None;
        }
        let mut large = ImageSlot::with_locator(art.large.clone());
        let mut thumbnail = ImageSlot::with_locator(art.thumbnail.clone());

        if let Some(locator) = &art.thumbnail {
            match self.fetcher.fetch(locator, Resolution::Thumbnail) {
                Ok(bytes) => fill_slot(&mut thumbnail, bytes),
                Err(e) => self.report(uid, Resolution::Thumbnail, &e),
            }
        }

        if !thumbnail.is_resolved() {
            let Some(locator) = art.large.clone() else {
                return None;
            };
            let bytes = match self.fetcher.fetch(&locator, Resolution::Large) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.report(uid, Resolution::Large, &e);
                    return None;
                }
            };
            if self.policy.eager_thumbnails {
                match make_thumbnail(
                    &bytes,
                    self.policy.thumbnail_width,
                    self.policy.thumbnail_height,
                ) {
                    Ok(thumb) => fill_slot(&mut thumbnail, thumb),
                    Err(e) => self.report(uid, Resolution::Thumbnail, &e),
                }
            }
            fill_slot(&mut large, bytes);
        }

        Some(db.insert_image(large, thumbnail))
    }

    fn report(&mut self, uid: &str, resolution: Resolution, err: &ArtError) {
        self.failures += 1;
        log_art_failure(self.policy.log_level, uid, resolution, err);
    }
}

fn log_art_failure(level: Level, uid: &str, resolution: Resolution, err: &ArtError) {
    if level == Level::ERROR {
        tracing::error!(record = uid, %resolution, "art unavailable: {}", err);
    } else if level == Level::WARN {
        tracing::warn!(record = uid, %resolution, "art unavailable: {}", err);
    } else if level == Level::INFO {
        tracing::info!(record = uid, %resolution, "art unavailable: {}", err);
    } else if level == Level::DEBUG {
        tracing::debug!(record = uid, %resolution, "art unavailable: {}", err);
    } else {
        tracing::trace!(record = uid, %resolution, "art unavailable: {}", err);
    }
}

fn fill_slot(slot: &mut ImageSlot, bytes: Vec<u8>) {
    slot.persistent_id = Some(art_persistent_id(&bytes));
    slot.bytes = Some(bytes);
}

// ═══════════════════════════════════════════════════════════════════════
// Serving-side resolution
// ═══════════════════════════════════════════════════════════════════════

/// Raw bytes for one resolution of `image`, resolving lazily on first demand.
///
/// A thumbnail without cached bytes is fetched from its locator if it has
/// one, otherwise synthesized by downscaling the large resolution. Resolved
/// bytes are cached in the slot.
pub fn resolve_bytes(
    image: &mut Image,
    resolution: Resolution,
    fetcher: &dyn ArtFetcher,
    policy: &ArtPolicy,
) -> Result<Vec<u8>, ArtError> {
    if let Some(bytes) = &image.slot(resolution).bytes {
        return Ok(bytes.clone());
    }

    if let Some(locator) = image.slot(resolution).locator.clone() {
        match fetcher.fetch(&locator, resolution) {
            Ok(bytes) => {
                fill_slot(image.slot_mut(resolution), bytes.clone());
                return Ok(bytes);
            }
            Err(e) if resolution == Resolution::Large => return Err(e),
            Err(e) => {
                tracing::debug!(image = image.id.0, "thumbnail fetch failed, downscaling: {}", e)
            }
        }
    }

    if resolution == Resolution::Thumbnail {
        let large = resolve_bytes(image, Resolution::Large, fetcher, policy)?;
        let thumb = make_thumbnail(&large, policy.thumbnail_width, policy.thumbnail_height)?;
        fill_slot(&mut image.thumbnail, thumb.clone());
        return Ok(thumb);
    }

    Err(ArtError::Unavailable)
}

/// Downscale encoded image bytes to fit `max_width` x `max_height`,
/// re-encoded as JPEG. Images already within bounds keep their size.
pub fn make_thumbnail(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>, ArtError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_width || img.height() > max_height {
        img.thumbnail(max_width, max_height)
    } else {
        img
    };
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}
