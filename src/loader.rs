//! Background catalog loader.
//!
//! A [`Loader`] runs one load at a time on a dedicated `catalog-loader`
//! thread. The staging [`Database`] is moved into that thread and comes back
//! out through the [`JoinHandle`], so nothing else can observe it mid-load.
//! The owner polls [`Loader::status`], which only reads atomics.
//!
//! ```text
//! Init ──start_load──▶ Loading ──▶ Ready
//!                         │
//!                         └──────▶ Failed   (error, cancel, timed-out shutdown)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::art::{ArtPolicy, ArtResolver};
use crate::database::Database;
use crate::error::{AlreadyLoading, LoadError, NotDoneYet};
use crate::ingest::{IngestSink, IngestStats};
use crate::traits::CatalogSource;

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LoaderState {
    Init = 0,
    Loading = 1,
    Ready = 2,
    Failed = 3,
}

impl LoaderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LoaderState::Loading,
            2 => LoaderState::Ready,
            3 => LoaderState::Failed,
            _ => LoaderState::Init,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoaderState::Ready | LoaderState::Failed)
    }
}

/// Snapshot returned by [`Loader::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStatus {
    pub state: LoaderState,
    /// Records processed so far, skipped ones included. Never decreases
    /// during a load.
    pub records_done: u64,
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Media kind for the "All <kind>" category.
    pub kind: String,
    pub art: ArtPolicy,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            kind: "Movies".to_string(),
            art: ArtPolicy::default(),
        }
    }
}

/// What a successful load produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub persistent_id: String,
    pub titles: usize,
    pub collections: usize,
    pub items: usize,
    pub categories: usize,
    pub images: usize,
    pub stats: IngestStats,
}

/// Result of [`Loader::complete_load`]: the staging database handed back,
/// plus the outcome of the load that filled it.
#[derive(Debug)]
pub struct CompletedLoad {
    pub database: Database,
    pub outcome: Result<LoadSummary, LoadError>,
}

/// State shared with the load thread.
#[derive(Debug, Default)]
struct LoaderShared {
    state: AtomicU8,
    records_done: AtomicU64,
    cancel: AtomicBool,
}

impl LoaderShared {
    fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Leave `Loading` for `to`. A no-op if the state was already forced.
    fn finish(&self, to: LoaderState) {
        let _ = self.state.compare_exchange(
            LoaderState::Loading as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

type LoadThread = JoinHandle<(Database, Result<LoadSummary, LoadError>)>;

pub struct Loader {
    source: Arc<dyn CatalogSource>,
    options: LoaderOptions,
    shared: Arc<LoaderShared>,
    handle: Option<LoadThread>,
    /// Outcome of a load that never got a thread.
    stillborn: Option<CompletedLoad>,
    abandoned: bool,
}

impl Loader {
    pub fn new(source: Box<dyn CatalogSource>, options: LoaderOptions) -> Self {
        Self {
            source: Arc::from(source),
            options,
            shared: Arc::new(LoaderShared::default()),
            handle: None,
            stillborn: None,
            abandoned: false,
        }
    }

    pub fn source(&self) -> &dyn CatalogSource {
        &*self.source
    }

    /// Begin loading into `staging` on the background thread.
    ///
    /// Rejected while a previous load has not been collected with
    /// [`complete_load`](Self::complete_load); `staging` is then handed back
    /// untouched.
    pub fn start_load(&mut self, staging: Database) -> Result<(), AlreadyLoading> {
        if self.handle.is_some() || self.stillborn.is_some() || self.abandoned {
            warn!(
                source = %self.source.source_label(),
                "load requested while one is in progress; ignoring"
            );
            return Err(AlreadyLoading(staging));
        }

        self.shared.cancel.store(false, Ordering::Release);
        self.shared.records_done.store(0, Ordering::Release);
        self.shared
            .state
            .store(LoaderState::Loading as u8, Ordering::Release);

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();
        let spawned = std::thread::Builder::new()
            .name("catalog-loader".to_string())
            .spawn(move || run_load(&*source, &options, &shared, staging));

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                warn!("could not start loader thread: {}", e);
                self.shared.finish(LoaderState::Failed);
                self.stillborn = Some(CompletedLoad {
                    database: Database::new(),
                    outcome: Err(LoadError::Thread(e.to_string())),
                });
            }
        }
        Ok(())
    }

    /// Current state and progress. Lock-free.
    pub fn status(&self) -> LoaderStatus {
        let exited = self.thread_exited();
        let mut state = self.shared.state();
        // A thread that is gone without leaving Loading has panicked.
        if state == LoaderState::Loading && exited && self.handle.is_some() {
            state = LoaderState::Failed;
        }
        LoaderStatus {
            state,
            records_done: self.shared.records_done.load(Ordering::Acquire),
        }
    }

    /// Whether no load thread is still running.
    pub fn thread_exited(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Collect a finished load.
    ///
    /// Returns [`NotDoneYet`] until the load has reached `Ready` or `Failed`,
    /// and, after a timed-out [`shutdown`](Self::shutdown), until the thread
    /// has actually exited.
    pub fn complete_load(&mut self) -> Result<CompletedLoad, NotDoneYet> {
        if !self.status().state.is_terminal() {
            return Err(NotDoneYet);
        }
        if let Some(done) = self.stillborn.take() {
            return Ok(done);
        }
        let Some(handle) = self.handle.take() else {
            return Err(NotDoneYet);
        };
        if !handle.is_finished() && self.abandoned {
            self.handle = Some(handle);
            return Err(NotDoneYet);
        }
        self.abandoned = false;
        match handle.join() {
            Ok((database, outcome)) => Ok(CompletedLoad { database, outcome }),
            Err(_) => {
                warn!("loader thread panicked; staging database lost");
                Ok(CompletedLoad {
                    database: Database::new(),
                    outcome: Err(LoadError::Thread("loader thread panicked".to_string())),
                })
            }
        }
    }

    /// Request cancellation and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `true` once no thread is running. On timeout the state is
    /// forced to `Failed`, the loader is marked abandoned and `false` is
    /// returned.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.shared.cancel.store(true, Ordering::Release);
        let Some(handle) = &self.handle else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    source = %self.source.source_label(),
                    "loader did not stop within {:?}; abandoning it",
                    timeout
                );
                self.shared.finish(LoaderState::Failed);
                self.abandoned = true;
                return false;
            }
            std::thread::sleep(SHUTDOWN_POLL.min(deadline - now));
        }
        true
    }
}

/// Body of the load thread.
fn run_load(
    source: &dyn CatalogSource,
    options: &LoaderOptions,
    shared: &LoaderShared,
    mut staging: Database,
) -> (Database, Result<LoadSummary, LoadError>) {
    let label = source.source_label();
    info!(source = %label, "catalog load started");
    let outcome = load_into(source, options, shared, &mut staging);
    match &outcome {
        Ok(summary) => info!(
            source = %label,
            titles = summary.titles,
            skipped = summary.stats.skipped(),
            "catalog load finished ({})",
            summary.persistent_id
        ),
        Err(e) if e.is_operator_facing() => warn!(source = %label, "catalog load failed: {}", e),
        Err(e) => info!(source = %label, "catalog load ended: {}", e),
    }
    let state = if outcome.is_ok() {
        LoaderState::Ready
    } else {
        LoaderState::Failed
    };
    shared.finish(state);
    (staging, outcome)
}

fn load_into(
    source: &dyn CatalogSource,
    options: &LoaderOptions,
    shared: &LoaderShared,
    staging: &mut Database,
) -> Result<LoadSummary, LoadError> {
    let art = ArtResolver::new(source.art_fetcher(), options.art.clone());
    let mut sink = IngestSink::new(
        staging,
        &options.kind,
        &shared.cancel,
        &shared.records_done,
        art,
    );
    source.ingest(&mut sink)?;
    sink.check_cancelled()?;
    let stats = sink.finish();

    let persistent_id = staging
        .persistent_id()
        .map_err(|e| LoadError::Finalize(e.to_string()))?;
    Ok(LoadSummary {
        persistent_id,
        titles: staging.title_count(),
        collections: staging.collection_count(),
        items: staging.items().len(),
        categories: staging.categories().len() + usize::from(staging.all_category().is_some()),
        images: staging.images().len(),
        stats,
    })
}
