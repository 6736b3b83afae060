//! Catalog driver: owns the live catalog and decides when to reload it.
//!
//! The driver is polled from the owner's thread with [`CatalogDriver::tick`].
//! It never blocks on a load; it reads the loader's atomics, republishes
//! progress, and only when the loader reports `Ready` swaps the staging
//! database in. Any other outcome leaves the live catalog as it was.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::art::{resolve_bytes, ArtFetcher, ArtPolicy};
use crate::config::Config;
use crate::database::Database;
use crate::error::{ArtError, LoadError};
use crate::loader::{CompletedLoad, LoadSummary, Loader, LoaderOptions, LoaderState};
use crate::models::{ImageId, Resolution};
use crate::progress::{format_number, StatusSurface, StatusUpdate};
use crate::traits::{self, CatalogSource};

/// Builds a fresh source for every load attempt.
pub type SourceFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn CatalogSource>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    NotLoaded,
    Loading,
    Loaded,
    LoadFailed,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub loader: LoaderOptions,
    /// `None` disables periodic reloads.
    pub reload_interval: Option<Duration>,
    /// Delay before retrying a source that was not found.
    pub retry_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            loader: LoaderOptions::default(),
            reload_interval: None,
            retry_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DriverOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            loader: LoaderOptions {
                kind: config.catalog.kind.clone(),
                art: config.art.policy(&config.source)?,
            },
            reload_interval: config.catalog.reload_interval(),
            retry_interval: config.catalog.retry_interval(),
            shutdown_timeout: config.catalog.shutdown_timeout(),
        })
    }
}

pub struct CatalogDriver {
    live: Database,
    live_id: Option<String>,
    state: DriverState,
    factory: SourceFactory,
    art: Arc<dyn ArtFetcher>,
    status: Arc<dyn StatusSurface>,
    options: DriverOptions,
    loader: Option<Loader>,
    abandoned: Vec<Loader>,
    next_reload: Option<Instant>,
    last_summary: Option<LoadSummary>,
}

impl CatalogDriver {
    pub fn new(
        factory: SourceFactory,
        art: Arc<dyn ArtFetcher>,
        status: Arc<dyn StatusSurface>,
        options: DriverOptions,
    ) -> Self {
        Self {
            live: Database::new(),
            live_id: None,
            state: DriverState::NotLoaded,
            factory,
            art,
            status,
            options,
            loader: None,
            abandoned: Vec::new(),
            next_reload: None,
            last_summary: None,
        }
    }

    /// Driver for the configured source.
    pub fn from_config(config: &Config, status: Arc<dyn StatusSurface>) -> anyhow::Result<Self> {
        let options = DriverOptions::from_config(config)?;
        let art = traits::art_fetcher_from_config(config)?;
        let config = config.clone();
        let factory: SourceFactory = Box::new(move || traits::source_from_config(&config));
        Ok(Self::new(factory, art, status, options))
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The catalog currently being served.
    pub fn database(&self) -> &Database {
        &self.live
    }

    pub fn persistent_id(&self) -> Option<&str> {
        self.live_id.as_deref()
    }

    pub fn last_summary(&self) -> Option<&LoadSummary> {
        self.last_summary.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_some()
    }

    /// Loaders whose threads did not confirm exit at shutdown.
    pub fn abandoned_loaders(&self) -> usize {
        self.abandoned.len()
    }

    /// Start a load into a fresh staging database.
    ///
    /// Returns `false` without doing anything while a load is running.
    pub fn request_reload(&mut self) -> bool {
        if self.loader.is_some() {
            return false;
        }
        self.next_reload = None;
        let source = match (self.factory)() {
            Ok(source) => source,
            Err(e) => {
                warn!("could not create catalog source: {:#}", e);
                self.fail_attempt();
                return false;
            }
        };
        let mut loader = Loader::new(source, self.options.loader.clone());
        if loader.start_load(Database::new()).is_err() {
            return false;
        }
        self.loader = Some(loader);
        self.state = DriverState::Loading;
        self.publish_progress(0);
        true
    }

    /// Advance the driver. Call periodically from the owning thread.
    pub fn tick(&mut self, now: Instant) {
        self.reap_abandoned();

        let Some(loader) = &self.loader else {
            if self.next_reload.is_some_and(|at| now >= at) {
                info!("scheduled catalog reload");
                self.request_reload();
            }
            return;
        };

        let status = loader.status();
        match status.state {
            LoaderState::Init | LoaderState::Loading => self.publish_progress(status.records_done),
            LoaderState::Ready | LoaderState::Failed => self.collect(now),
        }
    }

    /// Raw bytes for one resolution of a served image, resolving lazily.
    pub fn art_bytes(&mut self, image: ImageId, resolution: Resolution) -> Result<Vec<u8>, ArtError> {
        let policy: &ArtPolicy = &self.options.loader.art;
        let image = self.live.image_mut(image).ok_or(ArtError::UnknownImage)?;
        resolve_bytes(image, resolution, &*self.art, policy)
    }

    /// Cancel any in-flight load, waiting up to the configured bound.
    ///
    /// Returns `true` if every loader thread has exited.
    pub fn shutdown(&mut self) -> bool {
        if let Some(mut loader) = self.loader.take() {
            if loader.shutdown(self.options.shutdown_timeout) {
                let _ = loader.complete_load();
                if self.state == DriverState::Loading {
                    self.state = self.settled_state();
                }
            } else {
                self.abandoned.push(loader);
                self.state = self.settled_state();
            }
        }
        self.next_reload = None;
        self.reap_abandoned();
        self.abandoned.is_empty()
    }

    fn collect(&mut self, now: Instant) {
        let Some(mut loader) = self.loader.take() else {
            return;
        };
        let CompletedLoad { mut database, outcome } = match loader.complete_load() {
            Ok(done) => done,
            Err(_) => {
                self.loader = Some(loader);
                return;
            }
        };

        match outcome {
            Ok(summary) => {
                if self.live_id.as_deref() == Some(summary.persistent_id.as_str()) {
                    info!("catalog unchanged ({})", summary.persistent_id);
                }
                self.live.take_contents_from(&mut database);
                self.live_id = Some(summary.persistent_id.clone());
                self.state = DriverState::Loaded;
                self.status
                    .publish(StatusUpdate::PersistentId(summary.persistent_id.clone()));
                self.status
                    .publish(StatusUpdate::TitleCount(summary.titles as u64));
                self.status.publish(StatusUpdate::LoadStatus(format!(
                    "Loaded: {} titles",
                    format_number(summary.titles as u64)
                )));
                self.last_summary = Some(summary);
                self.next_reload = self.options.reload_interval.map(|d| now + d);
            }
            Err(e) => {
                self.status
                    .publish(StatusUpdate::LoadStatus("Not loaded".to_string()));
                match &e {
                    LoadError::SourceNotFound(what) => {
                        info!(
                            "catalog source {} not found; retrying in {:?}",
                            what, self.options.retry_interval
                        );
                        self.state = DriverState::NotLoaded;
                        self.next_reload = Some(now + self.options.retry_interval);
                    }
                    quiet if !quiet.is_operator_facing() => {
                        info!("catalog load ended: {}", quiet);
                        self.state = self.settled_state();
                    }
                    other => {
                        warn!("catalog load failed: {}", other);
                        self.state = DriverState::LoadFailed;
                        self.next_reload = self.options.reload_interval.map(|d| now + d);
                    }
                }
            }
        }
    }

    fn fail_attempt(&mut self) {
        self.status
            .publish(StatusUpdate::LoadStatus("Not loaded".to_string()));
        self.state = DriverState::LoadFailed;
        self.next_reload = self.options.reload_interval.map(|d| Instant::now() + d);
    }

    /// State to fall back to when an attempt ends without a verdict.
    fn settled_state(&self) -> DriverState {
        if self.live_id.is_some() {
            DriverState::Loaded
        } else {
            DriverState::NotLoaded
        }
    }

    fn publish_progress(&self, records_done: u64) {
        self.status.publish(StatusUpdate::LoadStatus(format!(
            "Loading: {} titles processed so far",
            format_number(records_done)
        )));
    }

    fn reap_abandoned(&mut self) {
        self.abandoned.retain_mut(|loader| {
            if !loader.thread_exited() {
                return true;
            }
            let _ = loader.complete_load();
            info!("abandoned catalog loader exited");
            false
        });
    }
}

impl Drop for CatalogDriver {
    fn drop(&mut self) {
        if self.loader.is_some() {
            self.shutdown();
        }
    }
}
