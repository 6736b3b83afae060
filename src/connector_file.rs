//! Exported library file connector.
//!
//! Reads a single exported collection document in one push-style pass. The
//! reader keeps an explicit [`ElementPath`]; recognized paths below the
//! per-title element accumulate text into per-field buffers, and the end of
//! each per-title element flushes those buffers into one [`TitleRecord`].
//!
//! # Configuration
//!
//! ```toml
//! [source.file]
//! path = "/data/collection.xml"
//! image_dir = "/data/images"   # optional
//! ```
//!
//! # Document shape
//!
//! ```xml
//! <Collection>
//!   <DVD>
//!     <ID>0123456789</ID>
//!     <Title>Heat</Title>
//!     <RunningTime>170</RunningTime>
//!     <Genres><Genre>Crime</Genre></Genres>
//!     <Actors><Actor FirstName="Al" LastName="Pacino"/></Actors>
//!     <Discs><Disc><DescriptionSideA>Feature</DescriptionSideA></Disc></Discs>
//!   </DVD>
//! </Collection>
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use tracing::info;

use crate::art::{ArtFetcher, FileArtFetcher};
use crate::config::FileSourceConfig;
use crate::error::LoadError;
use crate::ingest::IngestSink;
use crate::models::{cap_user_rating, ArtLocators, ItemRecord, TitleRecord};
use crate::traits::CatalogSource;
use crate::xml::{self, ElementPath};

/// Path of the per-title element.
const TITLE_PATH: &[&str] = &["Collection", "DVD"];

/// Text fields recognized below the per-title element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Id,
    Title,
    SortTitle,
    CollectionNumber,
    ProductionYear,
    RunningTime,
    Rating,
    MediaType,
    AspectRatio,
    Overview,
    Genre,
    Studio,
    AudioChannels,
    DiscDescription,
    DiscLocation,
    DiscSlot,
    PurchaseDate,
    CoverFront,
    CoverThumb,
}

impl Field {
    /// Repeated fields are collected per element instance instead of
    /// accumulating across the whole title.
    fn is_repeated(self) -> bool {
        matches!(
            self,
            Field::Genre
                | Field::Studio
                | Field::AudioChannels
                | Field::DiscDescription
                | Field::DiscLocation
                | Field::DiscSlot
        )
    }
}

const FIELD_PATHS: &[(&[&str], Field)] = &[
    (&["ID"], Field::Id),
    (&["Title"], Field::Title),
    (&["SortTitle"], Field::SortTitle),
    (&["CollectionNumber"], Field::CollectionNumber),
    (&["ProductionYear"], Field::ProductionYear),
    (&["RunningTime"], Field::RunningTime),
    (&["Rating"], Field::Rating),
    (&["MediaType"], Field::MediaType),
    (&["Format", "FormatAspectRatio"], Field::AspectRatio),
    (&["Overview"], Field::Overview),
    (&["Genres", "Genre"], Field::Genre),
    (&["Studios", "Studio"], Field::Studio),
    (&["Audio", "AudioTrack", "AudioChannels"], Field::AudioChannels),
    (&["Discs", "Disc", "DescriptionSideA"], Field::DiscDescription),
    (&["Discs", "Disc", "Location"], Field::DiscLocation),
    (&["Discs", "Disc", "Slot"], Field::DiscSlot),
    (&["PurchaseInfo", "PurchaseDate"], Field::PurchaseDate),
    (&["CoverFront"], Field::CoverFront),
    (&["CoverThumb"], Field::CoverThumb),
];

fn field_for(rel: &[String]) -> Option<Field> {
    FIELD_PATHS
        .iter()
        .find(|(path, _)| xml::matches_tokens(rel, path))
        .map(|(_, field)| *field)
}

#[derive(Debug, Default)]
struct DiscBuffer {
    description: String,
    location: String,
    slot: String,
}

/// Everything accumulated for the title currently being read.
#[derive(Debug, Default)]
struct TitleBuffers {
    text: HashMap<Field, String>,
    genres: Vec<String>,
    studios: Vec<String>,
    channels: Vec<String>,
    cast: Vec<String>,
    director: Option<String>,
    film_rating: Option<String>,
    discs: Vec<DiscBuffer>,
}

impl TitleBuffers {
    fn clear(&mut self) {
        *self = Self::default();
    }

    fn append(&mut self, field: Field, chunk: &str) {
        self.text.entry(field).or_default().push_str(chunk);
    }

    fn value(&self, field: Field) -> &str {
        self.text.get(&field).map(|s| s.trim()).unwrap_or("")
    }

    /// Close one instance of a repeated field.
    fn close_repeated(&mut self, field: Field) {
        let value = self
            .text
            .remove(&field)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        match field {
            Field::Genre if !value.is_empty() => self.genres.push(value),
            Field::Studio if !value.is_empty() => self.studios.push(value),
            Field::AudioChannels if !value.is_empty() => self.channels.push(value),
            Field::DiscDescription => {
                if let Some(disc) = self.discs.last_mut() {
                    disc.description.push_str(&value);
                }
            }
            Field::DiscLocation => {
                if let Some(disc) = self.discs.last_mut() {
                    disc.location.push_str(&value);
                }
            }
            Field::DiscSlot => {
                if let Some(disc) = self.discs.last_mut() {
                    disc.slot.push_str(&value);
                }
            }
            _ => {}
        }
    }

    /// Attribute-carrying elements below the title.
    fn open_element(&mut self, rel: &[String], e: &BytesStart<'_>) -> Result<(), LoadError> {
        if xml::matches_tokens(rel, &["Actors", "Actor"]) {
            let first = xml::attribute(e, "FirstName")?.unwrap_or_default();
            let last = xml::attribute(e, "LastName")?.unwrap_or_default();
            let name = format!("{} {}", first.trim(), last.trim()).trim().to_string();
            if !name.is_empty() {
                self.cast.push(name);
            }
        } else if xml::matches_tokens(rel, &["Credits", "Credit"]) {
            let is_director = xml::attribute(e, "CreditType")?.as_deref() == Some("Direction");
            if is_director && self.director.is_none() {
                let first = xml::attribute(e, "FirstName")?.unwrap_or_default();
                let last = xml::attribute(e, "LastName")?.unwrap_or_default();
                let name = format!("{} {}", first.trim(), last.trim()).trim().to_string();
                if !name.is_empty() {
                    self.director = Some(name);
                }
            }
        } else if xml::matches_tokens(rel, &["Review"]) {
            self.film_rating = xml::attribute(e, "Film")?;
        } else if xml::matches_tokens(rel, &["Discs", "Disc"]) {
            self.discs.push(DiscBuffer::default());
        } else if let Some(field) = field_for(rel) {
            if field.is_repeated() {
                self.text.remove(&field);
            }
        }
        Ok(())
    }

    /// Consume the buffers into a record for the record policy.
    fn flush(&mut self, images: &ImageConventions) -> TitleRecord {
        let uid = self.value(Field::Id).to_string();
        let title = self.value(Field::Title).to_string();
        let year = self.value(Field::ProductionYear).parse::<u16>().ok();
        let duration = self
            .value(Field::RunningTime)
            .parse::<u32>()
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .unwrap_or(0);
        let channels = self
            .channels
            .iter()
            .map(|c| parse_channels(c))
            .max()
            .unwrap_or(0);

        let single_disc = self.discs.len() == 1;
        let items = self
            .discs
            .iter()
            .enumerate()
            .map(|(n, disc)| ItemRecord {
                name: if disc.description.trim().is_empty() {
                    format!("Disc {}", n + 1)
                } else {
                    disc.description.trim().to_string()
                },
                duration: if single_disc { duration } else { 0 },
                channels,
            })
            .collect();

        let location = self
            .discs
            .iter()
            .find(|d| !d.location.trim().is_empty())
            .map(|d| {
                if d.slot.trim().is_empty() {
                    d.location.trim().to_string()
                } else {
                    format!("{} / {}", d.location.trim(), d.slot.trim())
                }
            })
            .unwrap_or_default();

        let added_at = NaiveDate::parse_from_str(self.value(Field::PurchaseDate), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp());

        let art = images.locators(
            &uid,
            non_empty(self.value(Field::CoverFront)),
            non_empty(self.value(Field::CoverThumb)),
        );

        let record = TitleRecord {
            sort_title: self.value(Field::SortTitle).to_string(),
            artist: self.director.clone().unwrap_or_default(),
            sequence: self.value(Field::CollectionNumber).parse().ok(),
            added_at,
            user_rating: self
                .film_rating
                .as_deref()
                .and_then(|r| r.trim().parse::<f64>().ok())
                .and_then(cap_user_rating),
            description: self.value(Field::Overview).to_string(),
            year,
            duration,
            media_format: self.value(Field::MediaType).to_string(),
            aspect_ratio: self.value(Field::AspectRatio).to_string(),
            cast: std::mem::take(&mut self.cast),
            rating: self.value(Field::Rating).to_string(),
            studio: self.studios.join(", "),
            location,
            categories: std::mem::take(&mut self.genres),
            items,
            art,
            uid,
            title,
        };
        self.clear();
        record
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// "5.1" → 6, "2.0" → 2, "Mono" → 1.
fn parse_channels(raw: &str) -> u8 {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "mono" => return 1,
        "stereo" => return 2,
        _ => {}
    }
    raw.split('.')
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .fold(0u8, |acc, n| acc.saturating_add(n))
}

/// Where art lives when the document does not name it explicitly.
#[derive(Debug, Clone, Default)]
struct ImageConventions {
    image_dir: Option<std::path::PathBuf>,
}

impl ImageConventions {
    fn locators(
        &self,
        uid: &str,
        front: Option<String>,
        thumb: Option<String>,
    ) -> ArtLocators {
        let conventional = |relative: String| -> Option<String> {
            let dir = self.image_dir.as_ref()?;
            if uid.is_empty() || !dir.join(&relative).is_file() {
                return None;
            }
            Some(relative)
        };
        ArtLocators {
            large: front.or_else(|| conventional(format!("{}f.jpg", uid))),
            thumbnail: thumb.or_else(|| conventional(format!("thumbnails/{}f.jpg", uid))),
        }
    }
}

/// Stream one exported collection document into `sink`.
///
/// `image_dir`, when given, enables the `<ID>f.jpg` art convention.
pub fn parse_collection<R: BufRead>(
    input: R,
    sink: &mut IngestSink<'_>,
    image_dir: Option<&Path>,
) -> Result<(), LoadError> {
    let images = ImageConventions {
        image_dir: image_dir.map(Path::to_path_buf),
    };
    let mut reader = xml::streaming_reader(input);
    let mut buf = Vec::new();
    let mut path = ElementPath::new();
    let mut buffers = TitleBuffers::default();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                sink.check_cancelled()?;
                saw_root = true;
                path.push(xml::element_name(&e));
                if path.is(TITLE_PATH) {
                    buffers.clear();
                } else if let Some(rel) = path.relative_to(TITLE_PATH) {
                    buffers.open_element(rel, &e)?;
                }
            }
            Event::Text(e) => {
                if let Some(field) = path.relative_to(TITLE_PATH).and_then(field_for) {
                    let chunk = xml::text(&e)?;
                    buffers.append(field, &chunk);
                }
            }
            Event::CData(e) => {
                if let Some(field) = path.relative_to(TITLE_PATH).and_then(field_for) {
                    buffers.append(field, &xml::cdata(&e));
                }
            }
            Event::End(e) => {
                let name = xml::end_name(e.name().as_ref());
                let closing_title = path.is(TITLE_PATH);
                if let Some(field) = path.relative_to(TITLE_PATH).and_then(field_for) {
                    if field.is_repeated() {
                        buffers.close_repeated(field);
                    }
                }
                path.pop(&name)?;
                if closing_title {
                    let record = buffers.flush(&images);
                    sink.submit(record)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    path.ensure_closed()?;
    if !saw_root {
        return Err(LoadError::MalformedSource(
            "document has no root element".to_string(),
        ));
    }
    Ok(())
}

/// A configured exported-library file.
pub struct FileSource {
    name: String,
    config: FileSourceConfig,
    fetcher: FileArtFetcher,
}

impl FileSource {
    pub fn new(name: String, config: FileSourceConfig) -> Self {
        let root = config
            .image_dir
            .clone()
            .or_else(|| config.path.parent().map(Path::to_path_buf));
        Self {
            name,
            fetcher: FileArtFetcher::new(root),
            config,
        }
    }
}

impl CatalogSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Exported collection XML file"
    }

    fn source_type(&self) -> &str {
        "file"
    }

    fn art_fetcher(&self) -> &dyn ArtFetcher {
        &self.fetcher
    }

    fn ingest(&self, sink: &mut IngestSink<'_>) -> Result<(), LoadError> {
        let path = &self.config.path;
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::SourceNotFound(path.display().to_string()),
            _ => LoadError::MalformedSource(format!("cannot read {}: {}", path.display(), e)),
        })?;
        info!(source = %self.source_label(), "reading {}", path.display());
        parse_collection(
            BufReader::new(file),
            sink,
            self.config.image_dir.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::{ArtPolicy, ArtResolver};
    use crate::database::Database;
    use crate::ingest::IngestStats;
    use std::sync::atomic::{AtomicBool, AtomicU64};

    fn load(doc: &str) -> Result<(Database, IngestStats), LoadError> {
        let mut db = Database::new();
        let cancel = AtomicBool::new(false);
        let done = AtomicU64::new(0);
        let fetcher = FileArtFetcher::default();
        let art = ArtResolver::new(&fetcher, ArtPolicy::default());
        let mut sink = IngestSink::new(&mut db, "Movies", &cancel, &done, art);
        parse_collection(doc.as_bytes(), &mut sink, None)?;
        let stats = sink.finish();
        Ok((db, stats))
    }

    #[test]
    fn single_title_fields() {
        let doc = r#"<?xml version="1.0"?>
<Collection>
  <DVD>
    <ID>A1</ID>
    <Title>Space <![CDATA[Odyssey]]> 2001</Title>
    <SortTitle>Space Odyssey</SortTitle>
    <ProductionYear>2001</ProductionYear>
    <RunningTime>118</RunningTime>
    <Rating>PG</Rating>
    <MediaType>DVD</MediaType>
    <Format><FormatAspectRatio>2.35</FormatAspectRatio></Format>
    <Overview>Monolith &amp; friends.</Overview>
    <Genres><Genre>Science-Fiction</Genre><Genre>Classic</Genre></Genres>
    <Studios><Studio>MGM</Studio><Studio>Stanley Kubrick Productions</Studio></Studios>
    <Actors>
      <Actor FirstName="Keir" LastName="Dullea"/>
      <Actor FirstName="Gary" LastName="Lockwood"/>
    </Actors>
    <Credits><Credit CreditType="Writing" FirstName="Arthur" LastName="Clarke"/><Credit CreditType="Direction" FirstName="Stanley" LastName="Kubrick"/></Credits>
    <Audio><AudioTrack><AudioChannels>2.0</AudioChannels></AudioTrack><AudioTrack><AudioChannels>5.1</AudioChannels></AudioTrack></Audio>
    <Discs><Disc><DescriptionSideA>Feature</DescriptionSideA><Location>Shelf A</Location><Slot>12</Slot></Disc></Discs>
    <PurchaseInfo><PurchaseDate>2005-03-01</PurchaseDate></PurchaseInfo>
    <Review Film="9"/>
  </DVD>
</Collection>"#;
        let (db, stats) = load(doc).unwrap();
        assert_eq!(stats.inserted, 1);
        let title = db.title_by_uid("A1").unwrap();
        assert_eq!(title.title, "Space Odyssey 2001");
        assert_eq!(title.sort_title, "Space Odyssey");
        assert_eq!(title.artist, "Stanley Kubrick");
        assert_eq!(title.user_rating, Some(9));
        assert_eq!(title.added_at, Some(1_109_635_200));

        let c = db.collection_by_uid("A1").unwrap();
        assert_eq!(c.duration, 7080);
        assert_eq!(c.year, Some(2001));
        assert_eq!(c.description, "Monolith & friends.");
        assert_eq!(c.studio, "MGM, Stanley Kubrick Productions");
        assert_eq!(c.cast, vec!["Keir Dullea", "Gary Lockwood"]);
        assert_eq!(c.lead_actor.as_deref(), Some("Keir Dullea"));
        assert_eq!(c.location, "Shelf A / 12");
        assert_eq!(c.aspect_ratio, "2.35");
        assert_eq!(c.categories.len(), 3);
        assert!(db.category_by_name("SCIENCE-FICTION").is_some());

        let items: Vec<_> = db.items_of(c.id).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Feature");
        assert_eq!(items[0].duration, 7080);
        assert_eq!(items[0].channels, 6);
    }

    #[test]
    fn buffers_reset_between_titles() {
        let doc = "<Collection>\
            <DVD><ID>1</ID><Title>One</Title><Genres><Genre>Drama</Genre></Genres>\
            <Discs><Disc/><Disc/></Discs></DVD>\
            <DVD><ID>2</ID><Title>Two</Title></DVD>\
            </Collection>";
        let (db, _) = load(doc).unwrap();
        let one = db.collection_by_uid("1").unwrap();
        let names: Vec<_> = db.items_of(one.id).map(|i| i.name.clone()).collect();
        assert_eq!(names, vec!["Disc 1", "Disc 2"]);

        let two = db.collection_by_uid("2").unwrap();
        assert_eq!(two.categories.len(), 1);
        assert_eq!(db.items_of(two.id).count(), 1);
    }

    #[test]
    fn mismatched_nesting_is_fatal() {
        let doc = "<Collection><DVD><ID>1</ID><Title>One</DVD></Title></Collection>";
        assert!(matches!(load(doc), Err(LoadError::MalformedSource(_))));
    }

    #[test]
    fn truncated_document_is_fatal() {
        let doc = "<Collection><DVD><ID>1</ID><Title>One</Title></DVD>";
        assert!(matches!(load(doc), Err(LoadError::MalformedSource(_))));
    }

    #[test]
    fn empty_document_is_fatal() {
        assert!(matches!(load(""), Err(LoadError::MalformedSource(_))));
    }

    #[test]
    fn missing_id_skips_record_only() {
        let doc = "<Collection><DVD><ID></ID><Title>Ghost</Title></DVD>\
            <DVD><ID>2</ID><Title>Real</Title></DVD></Collection>";
        let (db, stats) = load(doc).unwrap();
        assert_eq!(db.title_count(), 1);
        assert_eq!(stats.skipped_missing_id, 1);
    }

    #[test]
    fn oversized_running_time_is_unknown_duration() {
        let doc = "<Collection><DVD><ID>1</ID><Title>Good</Title><RunningTime>90</RunningTime></DVD>\
            <DVD><ID>2</ID><Title>Huge</Title><RunningTime>99999999</RunningTime></DVD></Collection>";
        let (db, stats) = load(doc).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(db.collection_by_uid("1").unwrap().duration, 5400);
        let huge = db.collection_by_uid("2").unwrap();
        assert_eq!(huge.duration, 0);
        assert_eq!(db.items_of(huge.id).next().unwrap().duration, 0);
    }

    #[test]
    fn blank_director_credit_is_ignored() {
        let doc = r#"<Collection><DVD><ID>1</ID><Title>One</Title><Credits>
            <Credit CreditType="Direction" FirstName=" " LastName=""/>
            <Credit CreditType="Direction" FirstName="Agnes" LastName="Varda"/>
            </Credits></DVD></Collection>"#;
        let (db, _) = load(doc).unwrap();
        assert_eq!(db.title_by_uid("1").unwrap().artist, "Agnes Varda");
    }

    #[test]
    fn channel_notation() {
        assert_eq!(parse_channels("5.1"), 6);
        assert_eq!(parse_channels("7.1"), 8);
        assert_eq!(parse_channels("2.0"), 2);
        assert_eq!(parse_channels("Mono"), 1);
        assert_eq!(parse_channels("n/a"), 0);
    }

    #[test]
    fn image_dir_convention() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("thumbnails")).unwrap();
        std::fs::write(tmp.path().join("A1f.jpg"), b"large").unwrap();
        let images = ImageConventions {
            image_dir: Some(tmp.path().to_path_buf()),
        };
        let art = images.locators("A1", None, None);
        assert_eq!(art.large.as_deref(), Some("A1f.jpg"));
        assert_eq!(art.thumbnail, None);

        let explicit = images.locators("A1", Some("x.png".into()), None);
        assert_eq!(explicit.large.as_deref(), Some("x.png"));
    }
}
