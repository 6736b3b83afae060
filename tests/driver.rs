use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_harness::art::{ArtFetcher, FileArtFetcher};
use catalog_harness::config::FileSourceConfig;
use catalog_harness::connector_file::FileSource;
use catalog_harness::database::Database;
use catalog_harness::driver::{CatalogDriver, DriverOptions, DriverState, SourceFactory};
use catalog_harness::error::{ArtError, LoadError, NotDoneYet};
use catalog_harness::ingest::IngestSink;
use catalog_harness::loader::{Loader, LoaderOptions, LoaderState};
use catalog_harness::models::{ImageId, Resolution, TitleRecord, TitleSet, TitleSetId};
use catalog_harness::progress::{MemoryStatus, StatusUpdate};
use catalog_harness::traits::CatalogSource;
use tempfile::TempDir;

/// Submits its records, then waits until the gate opens or the load is
/// cancelled.
struct GatedSource {
    records: Vec<(String, String)>,
    gate: Arc<AtomicBool>,
    fetcher: FileArtFetcher,
}

impl CatalogSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }
    fn description(&self) -> &str {
        "test source held open by a gate"
    }
    fn source_type(&self) -> &str {
        "test"
    }
    fn art_fetcher(&self) -> &dyn ArtFetcher {
        &self.fetcher
    }
    fn ingest(&self, sink: &mut IngestSink<'_>) -> Result<(), LoadError> {
        for (uid, title) in &self.records {
            sink.submit(TitleRecord {
                uid: uid.clone(),
                title: title.clone(),
                ..TitleRecord::default()
            })?;
        }
        while !self.gate.load(Ordering::Acquire) {
            sink.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

/// Ignores cancellation for `stall` before noticing it.
struct StubbornSource {
    stall: Duration,
    fetcher: FileArtFetcher,
}

impl CatalogSource for StubbornSource {
    fn name(&self) -> &str {
        "stubborn"
    }
    fn description(&self) -> &str {
        "test source that is slow to cancel"
    }
    fn source_type(&self) -> &str {
        "test"
    }
    fn art_fetcher(&self) -> &dyn ArtFetcher {
        &self.fetcher
    }
    fn ingest(&self, sink: &mut IngestSink<'_>) -> Result<(), LoadError> {
        std::thread::sleep(self.stall);
        sink.check_cancelled()
    }
}

fn gated(records: &[(&str, &str)], gate: &Arc<AtomicBool>) -> Box<dyn CatalogSource> {
    Box::new(GatedSource {
        records: records
            .iter()
            .map(|(u, t)| (u.to_string(), t.to_string()))
            .collect(),
        gate: Arc::clone(gate),
        fetcher: FileArtFetcher::default(),
    })
}

fn file_factory(path: PathBuf, image_dir: Option<PathBuf>) -> SourceFactory {
    Box::new(move || {
        let source = FileSource::new(
            "test".to_string(),
            FileSourceConfig {
                path: path.clone(),
                image_dir: image_dir.clone(),
            },
        );
        Ok(Box::new(source) as Box<dyn CatalogSource>)
    })
}

fn options() -> DriverOptions {
    DriverOptions {
        loader: LoaderOptions::default(),
        reload_interval: None,
        retry_interval: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(5),
    }
}

fn file_driver(dir: &Path, status: &MemoryStatus) -> CatalogDriver {
    CatalogDriver::new(
        file_factory(dir.join("collection.xml"), Some(dir.to_path_buf())),
        Arc::new(FileArtFetcher::new(Some(dir.to_path_buf()))),
        Arc::new(status.clone()),
        options(),
    )
}

fn tick_until_idle(driver: &mut CatalogDriver) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while driver.is_loading() {
        assert!(Instant::now() < deadline, "driver never finished loading");
        driver.tick(Instant::now());
        std::thread::sleep(Duration::from_millis(5));
    }
}

const TWO_TITLES: &str = "<Collection>\
    <DVD><ID>1</ID><Title>One</Title><CoverFront>1f.png</CoverFront></DVD>\
    <DVD><ID>2</ID><Title>Two</Title></DVD>\
    </Collection>";

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(300, 450, image::Rgb([1, 2, 3]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[test]
fn cancelled_load_leaves_seeded_staging_untouched() {
    let mut seeded = Database::new();
    let seed_id = seeded.insert_title(TitleSet {
        id: TitleSetId(0),
        uid: "seed".to_string(),
        sort_title: "Seed".to_string(),
        title: "Seed".to_string(),
        artist: String::new(),
        sequence: 1,
        added_at: None,
        user_rating: None,
        collections: Vec::new(),
    });
    let before = seeded.title(seed_id).cloned().unwrap();

    let gate = Arc::new(AtomicBool::new(false));
    let mut loader = Loader::new(gated(&[], &gate), LoaderOptions::default());
    loader.start_load(seeded).unwrap();

    let started = Instant::now();
    assert!(loader.shutdown(Duration::from_secs(2)));
    assert!(started.elapsed() < Duration::from_secs(2));
    let status = loader.status();
    assert!(status.state.is_terminal());
    assert_ne!(status.state, LoaderState::Ready);

    let done = loader.complete_load().unwrap();
    assert!(matches!(done.outcome, Err(LoadError::Cancelled)));
    assert_eq!(done.database.title(seed_id), Some(&before));
    assert_eq!(done.database.title_count(), 1);
}

#[test]
fn timed_out_shutdown_abandons_until_thread_exits() {
    let source = Box::new(StubbornSource {
        stall: Duration::from_millis(300),
        fetcher: FileArtFetcher::default(),
    });
    let mut loader = Loader::new(source, LoaderOptions::default());
    loader.start_load(Database::new()).unwrap();

    assert!(!loader.shutdown(Duration::from_millis(20)));
    assert!(loader.is_abandoned());
    assert_eq!(loader.status().state, LoaderState::Failed);
    assert_eq!(loader.complete_load().unwrap_err(), NotDoneYet);

    let deadline = Instant::now() + Duration::from_secs(10);
    while !loader.thread_exited() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(loader.status().state, LoaderState::Failed);
    let done = loader.complete_load().unwrap();
    assert!(matches!(done.outcome, Err(LoadError::Cancelled)));
}

#[test]
fn successful_load_is_hot_swapped_and_published() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("collection.xml"), TWO_TITLES).unwrap();
    let status = MemoryStatus::new();
    let mut driver = file_driver(tmp.path(), &status);
    assert_eq!(driver.state(), DriverState::NotLoaded);

    assert!(driver.request_reload());
    assert_eq!(driver.state(), DriverState::Loading);
    tick_until_idle(&mut driver);

    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(driver.database().title_count(), 2);
    assert_eq!(status.title_count(), Some(2));
    assert_eq!(
        status.persistent_id().as_deref(),
        driver.persistent_id()
    );
    assert!(status
        .updates()
        .iter()
        .any(|u| matches!(u, StatusUpdate::LoadStatus(s) if s.starts_with("Loading: "))));
}

#[test]
fn failed_reload_keeps_live_catalog() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("collection.xml");
    fs::write(&path, TWO_TITLES).unwrap();
    let status = MemoryStatus::new();
    let mut driver = file_driver(tmp.path(), &status);

    driver.request_reload();
    tick_until_idle(&mut driver);
    let before = driver.database().canonical_bytes().unwrap();
    let id = driver.persistent_id().map(str::to_string);

    fs::write(&path, "<Collection><DVD><ID>3</ID></Collection>").unwrap();
    assert!(driver.request_reload());
    tick_until_idle(&mut driver);

    assert_eq!(driver.state(), DriverState::LoadFailed);
    assert_eq!(status.load_status().as_deref(), Some("Not loaded"));
    assert_eq!(driver.database().canonical_bytes().unwrap(), before);
    assert_eq!(driver.persistent_id().map(str::to_string), id);
}

#[test]
fn reload_while_loading_is_a_no_op_and_cancel_keeps_live() {
    let gate = Arc::new(AtomicBool::new(true));
    let factory_gate = Arc::clone(&gate);
    let factory: SourceFactory = Box::new(move || Ok(gated(&[("1", "One")], &factory_gate)));
    let status = MemoryStatus::new();
    let mut driver = CatalogDriver::new(
        factory,
        Arc::new(FileArtFetcher::default()),
        Arc::new(status.clone()),
        options(),
    );

    assert!(driver.request_reload());
    tick_until_idle(&mut driver);
    assert_eq!(driver.state(), DriverState::Loaded);
    let before = driver.database().canonical_bytes().unwrap();

    gate.store(false, Ordering::Release);
    assert!(driver.request_reload());
    assert!(!driver.request_reload());
    driver.tick(Instant::now());
    assert!(driver.is_loading());

    assert!(driver.shutdown());
    assert!(!driver.is_loading());
    assert_eq!(driver.abandoned_loaders(), 0);
    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(driver.database().canonical_bytes().unwrap(), before);
}

#[test]
fn missing_source_retries_after_interval() {
    let tmp = TempDir::new().unwrap();
    let status = MemoryStatus::new();
    let mut driver = file_driver(tmp.path(), &status);

    driver.request_reload();
    tick_until_idle(&mut driver);
    assert_eq!(driver.state(), DriverState::NotLoaded);
    assert_eq!(status.load_status().as_deref(), Some("Not loaded"));

    fs::write(tmp.path().join("collection.xml"), TWO_TITLES).unwrap();
    // Before the retry interval nothing happens.
    driver.tick(Instant::now());
    assert!(!driver.is_loading());

    driver.tick(Instant::now() + Duration::from_secs(31));
    assert!(driver.is_loading());
    tick_until_idle(&mut driver);
    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(driver.database().title_count(), 2);
}

#[test]
fn art_is_served_lazily_from_the_live_catalog() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("collection.xml"), TWO_TITLES).unwrap();
    fs::write(tmp.path().join("1f.png"), png()).unwrap();
    let status = MemoryStatus::new();
    let mut driver = file_driver(tmp.path(), &status);
    driver.request_reload();
    tick_until_idle(&mut driver);

    let image = driver.database().collection_by_uid("1").unwrap().art.unwrap();
    let large = driver.art_bytes(image, Resolution::Large).unwrap();
    assert_eq!(large, png());

    let thumb = driver.art_bytes(image, Resolution::Thumbnail).unwrap();
    let decoded = image::load_from_memory(&thumb).unwrap();
    assert!(decoded.width() <= 200 && decoded.height() <= 300);
    assert!(driver.database().image(image).unwrap().thumbnail.persistent_id.is_some());

    assert!(matches!(
        driver.art_bytes(ImageId(99), Resolution::Large),
        Err(ArtError::UnknownImage)
    ));
}
