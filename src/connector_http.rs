//! Media server connector.
//!
//! Reads a remote library over HTTP. The directory document lists the
//! library sections; every matching section is then read page by page, each
//! page streamed straight from the response body into the XML reader. All
//! requests, art included, go through one [`reqwest::blocking::Client`].
//!
//! # Configuration
//!
//! ```toml
//! [source.http]
//! base_url = "http://media.local:32400"
//! section_type = "movie"
//! sections = ["Films"]     # optional allow-list of section titles
//! page_size = 200
//! timeout_secs = 30
//! ```
//!
//! # Pagination
//!
//! Sections are requested with `start`/`size` query parameters. Paging stops
//! when a page carries no `Video` elements or the offset reaches the
//! container's `totalSize`. A server that omits `totalSize` is read until a
//! short page, or until a page repeats only titles already seen.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::art::{ArtFetcher, HttpArtFetcher};
use crate::config::HttpSourceConfig;
use crate::error::LoadError;
use crate::ingest::IngestSink;
use crate::models::{cap_user_rating, ArtLocators, ItemRecord, TitleRecord};
use crate::traits::CatalogSource;
use crate::xml::{self, ElementPath};

const DIRECTORY_PATH: &[&str] = &["MediaContainer", "Directory"];
const VIDEO_PATH: &[&str] = &["MediaContainer", "Video"];

/// Semantic field carried by a `Video` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoField {
    Uid,
    Title,
    SortTitle,
    Sequence,
    Year,
    DurationMs,
    Rating,
    Summary,
    Studio,
    AddedAt,
    UserRating,
    Thumb,
    ThumbSmall,
}

const VIDEO_ATTRIBUTES: &[(&str, VideoField)] = &[
    ("ratingKey", VideoField::Uid),
    ("title", VideoField::Title),
    ("titleSort", VideoField::SortTitle),
    ("index", VideoField::Sequence),
    ("year", VideoField::Year),
    ("duration", VideoField::DurationMs),
    ("contentRating", VideoField::Rating),
    ("summary", VideoField::Summary),
    ("studio", VideoField::Studio),
    ("addedAt", VideoField::AddedAt),
    ("userRating", VideoField::UserRating),
    ("thumb", VideoField::Thumb),
    ("thumbSmall", VideoField::ThumbSmall),
];

/// One library section from the directory document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: String,
    pub section_type: String,
    pub title: String,
}

/// What one page contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSummary {
    /// `Video` elements seen, skipped ones included.
    pub videos: u64,
    /// `MediaContainer@totalSize`, when the server sent it.
    pub total_size: Option<u64>,
}

#[derive(Debug, Default)]
struct MediaPart {
    duration: u32,
    channels: u8,
    aspect_ratio: String,
    resolution: String,
    container: String,
}

/// Accumulators for the `Video` currently open.
#[derive(Debug, Default)]
struct VideoBuffers {
    record: TitleRecord,
    media: Vec<MediaPart>,
    location: Option<String>,
}

impl VideoBuffers {
    fn start(&mut self, e: &BytesStart<'_>) -> Result<(), LoadError> {
        *self = Self::default();
        let mut thumb = None;
        let mut thumb_small = None;
        for (key, value) in xml::attributes(e)? {
            let Some((_, field)) = VIDEO_ATTRIBUTES.iter().find(|(name, _)| *name == key) else {
                continue;
            };
            let value = value.trim().to_string();
            let r = &mut self.record;
            match field {
                VideoField::Uid => r.uid = value,
                VideoField::Title => r.title = value,
                VideoField::SortTitle => r.sort_title = value,
                VideoField::Sequence => r.sequence = value.parse().ok(),
                VideoField::Year => r.year = value.parse().ok(),
                VideoField::DurationMs => {
                    r.duration = value.parse::<u64>().ok().and_then(ms_to_secs).unwrap_or(0)
                }
                VideoField::Rating => r.rating = value,
                VideoField::Summary => r.description = value,
                VideoField::Studio => r.studio = value,
                VideoField::AddedAt => r.added_at = value.parse().ok(),
                VideoField::UserRating => {
                    r.user_rating = value.parse::<f64>().ok().and_then(cap_user_rating)
                }
                VideoField::Thumb => thumb = Some(value).filter(|v| !v.is_empty()),
                VideoField::ThumbSmall => thumb_small = Some(value).filter(|v| !v.is_empty()),
            }
        }
        self.record.art = ArtLocators {
            large: thumb,
            thumbnail: thumb_small,
        };
        Ok(())
    }

    fn child(&mut self, rel: &[String], e: &BytesStart<'_>) -> Result<(), LoadError> {
        if xml::matches_tokens(rel, &["Media"]) {
            let duration = xml::attribute(e, "duration")?
                .and_then(|v| v.trim().parse::<u64>().ok())
                .and_then(ms_to_secs)
                .unwrap_or(self.record.duration);
            self.media.push(MediaPart {
                duration,
                channels: xml::attribute(e, "audioChannels")?
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
                aspect_ratio: xml::attribute(e, "aspectRatio")?.unwrap_or_default(),
                resolution: xml::attribute(e, "videoResolution")?.unwrap_or_default(),
                container: xml::attribute(e, "container")?.unwrap_or_default(),
            });
        } else if xml::matches_tokens(rel, &["Genre"]) {
            if let Some(tag) = xml::attribute(e, "tag")? {
                self.record.categories.push(tag.trim().to_string());
            }
        } else if xml::matches_tokens(rel, &["Role"]) {
            if let Some(tag) = xml::attribute(e, "tag")?.filter(|t| !t.trim().is_empty()) {
                self.record.cast.push(tag.trim().to_string());
            }
        } else if xml::matches_tokens(rel, &["Director"]) {
            if self.record.artist.is_empty() {
                self.record.artist = xml::attribute(e, "tag")?.unwrap_or_default().trim().to_string();
            }
        } else if xml::matches_tokens(rel, &["Location"]) && self.location.is_none() {
            self.location = xml::attribute(e, "path")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> TitleRecord {
        let mut record = std::mem::take(&mut self.record);
        if let Some(first) = self.media.first() {
            record.media_format = first.container.clone();
            record.aspect_ratio = first.aspect_ratio.clone();
        }
        let several = self.media.len() > 1;
        record.items = self
            .media
            .iter()
            .map(|m| ItemRecord {
                name: media_name(&record.title, m, several),
                duration: m.duration,
                channels: m.channels,
            })
            .collect();
        record.location = self.location.take().unwrap_or_default();
        self.media.clear();
        record
    }
}

/// Milliseconds to whole seconds. Values past `u32` seconds are unusable.
fn ms_to_secs(ms: u64) -> Option<u32> {
    u32::try_from(ms / 1000).ok()
}

/// A lone version is named after the title; several versions are told apart
/// by resolution and container.
fn media_name(title: &str, media: &MediaPart, several: bool) -> String {
    if !several {
        return title.to_string();
    }
    let label = [media.resolution.as_str(), media.container.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if label.is_empty() {
        title.to_string()
    } else {
        format!("{} ({})", title, label)
    }
}

/// Transport failures surface from the reader as I/O errors.
fn read_error(e: quick_xml::Error) -> LoadError {
    match e {
        quick_xml::Error::Io(io) => LoadError::Network(io.to_string()),
        other => LoadError::from(other),
    }
}

/// Parse a directory document into its sections.
pub fn parse_directory<R: BufRead>(input: R) -> Result<Vec<Section>, LoadError> {
    let mut reader = xml::streaming_reader(input);
    let mut buf = Vec::new();
    let mut path = ElementPath::new();
    let mut sections = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(read_error)? {
            Event::Start(e) => {
                path.push(xml::element_name(&e));
                if path.is(DIRECTORY_PATH) {
                    let key = xml::attribute(&e, "key")?.unwrap_or_default();
                    if key.is_empty() {
                        debug!("directory entry without key ignored");
                    } else {
                        sections.push(Section {
                            key,
                            section_type: xml::attribute(&e, "type")?.unwrap_or_default(),
                            title: xml::attribute(&e, "title")?.unwrap_or_default(),
                        });
                    }
                }
            }
            Event::End(e) => path.pop(&xml::end_name(e.name().as_ref()))?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    path.ensure_closed()?;
    Ok(sections)
}

/// Stream one section page into `sink`.
pub fn parse_page<R: BufRead>(
    input: R,
    sink: &mut IngestSink<'_>,
) -> Result<PageSummary, LoadError> {
    let mut reader = xml::streaming_reader(input);
    let mut buf = Vec::new();
    let mut path = ElementPath::new();
    let mut video = VideoBuffers::default();
    let mut summary = PageSummary::default();

    loop {
        match reader.read_event_into(&mut buf).map_err(read_error)? {
            Event::Start(e) => {
                sink.check_cancelled()?;
                path.push(xml::element_name(&e));
                if path.is(&["MediaContainer"]) {
                    summary.total_size = xml::attribute(&e, "totalSize")?
                        .and_then(|v| v.trim().parse().ok());
                } else if path.is(VIDEO_PATH) {
                    video.start(&e)?;
                } else if let Some(rel) = path.relative_to(VIDEO_PATH) {
                    video.child(rel, &e)?;
                }
            }
            Event::End(e) => {
                let closing_video = path.is(VIDEO_PATH);
                path.pop(&xml::end_name(e.name().as_ref()))?;
                if closing_video {
                    summary.videos += 1;
                    sink.submit(video.finish())?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    path.ensure_closed()?;
    Ok(summary)
}

/// Client shared by every request of one source.
pub fn build_client(config: &HttpSourceConfig) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// A configured media server library.
pub struct HttpSource {
    name: String,
    config: HttpSourceConfig,
    fetcher: HttpArtFetcher,
}

impl HttpSource {
    pub fn new(name: String, config: HttpSourceConfig) -> anyhow::Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            name,
            fetcher: HttpArtFetcher::new(&config.base_url, client),
            config,
        })
    }

    fn get(&self, path: &str) -> Result<Response, LoadError> {
        let url = self.fetcher.url_for(path);
        let resp = self
            .fetcher
            .client()
            .get(&url)
            .send()
            .map_err(|e| LoadError::Network(format!("GET {}: {}", url, e)))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(LoadError::SourceNotFound(url));
        }
        if !resp.status().is_success() {
            return Err(LoadError::Network(format!("GET {}: HTTP {}", url, resp.status())));
        }
        Ok(resp)
    }

    /// Sections selected by the type filter and the allow-list.
    pub fn sections(&self) -> Result<Vec<Section>, LoadError> {
        let resp = self.get("/library/sections")?;
        let all = parse_directory(BufReader::new(resp))?;
        Ok(all
            .into_iter()
            .filter(|s| s.section_type == self.config.section_type)
            .filter(|s| self.config.sections.is_empty() || self.config.sections.contains(&s.title))
            .collect())
    }

    fn ingest_section(&self, section: &Section, sink: &mut IngestSink<'_>) -> Result<(), LoadError> {
        let page_size = u64::from(self.config.page_size);
        let mut offset: u64 = 0;
        loop {
            sink.check_cancelled()?;
            let path = format!(
                "/library/sections/{}/all?start={}&size={}",
                section.key, offset, page_size
            );
            let resp = self.get(&path).map_err(|e| match e {
                // The directory listed it, so a 404 here is not "no source".
                LoadError::SourceNotFound(url) => {
                    LoadError::Network(format!("GET {}: HTTP 404 Not Found", url))
                }
                other => other,
            })?;
            let duplicates_before = sink.stats().skipped_duplicate;
            let page = parse_page(BufReader::new(resp), sink)?;
            let repeated = sink.stats().skipped_duplicate - duplicates_before;
            offset += page.videos;
            debug!(section = %section.title, offset, "page read");

            let more = match page.total_size {
                Some(total) => offset < total,
                None => page.videos >= page_size,
            };
            if page.videos == 0 || !more {
                return Ok(());
            }
            if repeated == page.videos {
                // A server ignoring `start` hands back the same page forever.
                warn!(section = %section.title, offset, "page repeated earlier titles; stopping");
                return Ok(());
            }
        }
    }
}

impl CatalogSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Media server library over HTTP"
    }

    fn source_type(&self) -> &str {
        "http"
    }

    fn art_fetcher(&self) -> &dyn ArtFetcher {
        &self.fetcher
    }

    fn ingest(&self, sink: &mut IngestSink<'_>) -> Result<(), LoadError> {
        let sections = self.sections()?;
        info!(
            source = %self.source_label(),
            "{} section(s) of type '{}'",
            sections.len(),
            self.config.section_type
        );
        for section in &sections {
            info!(section = %section.title, key = %section.key, "reading section");
            self.ingest_section(section, sink)?;
        }
        Ok(())
    }
}
