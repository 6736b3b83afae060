//! Record-level ingestion policy shared by every connector.
//!
//! Connectors parse their source and hand each flushed [`TitleRecord`] to an
//! [`IngestSink`]. The sink owns the decisions that must be identical across
//! sources:
//!
//! - records without an external uid or a name are skipped, not fatal
//! - the first occurrence of a uid wins; later duplicates are skipped
//! - every inserted collection joins the "All <Kind>" category
//! - art is acquired through the source's [`ArtFetcher`](crate::art::ArtFetcher)
//!
//! The sink is also the cancellation checkpoint: connectors call
//! [`IngestSink::check_cancelled`] once per element start and propagate the
//! resulting [`LoadError::Cancelled`] with `?`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::art::ArtResolver;
use crate::database::Database;
use crate::error::{LoadError, SkipReason};
use crate::models::{
    CategoryId, Collection, CollectionId, Item, ItemId, TitleRecord, TitleSet, TitleSetId,
};

/// Counters for one pass over a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub inserted: u64,
    pub skipped_missing_id: u64,
    pub skipped_missing_name: u64,
    pub skipped_duplicate: u64,
    pub art_failures: u64,
}

impl IngestStats {
    pub fn skipped(&self) -> u64 {
        self.skipped_missing_id + self.skipped_missing_name + self.skipped_duplicate
    }

    fn record_skip(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::MissingId => self.skipped_missing_id += 1,
            SkipReason::MissingName(_) => self.skipped_missing_name += 1,
            SkipReason::DuplicateId(_) => self.skipped_duplicate += 1,
        }
    }
}

/// Destination for flushed records during one load.
pub struct IngestSink<'a> {
    db: &'a mut Database,
    cancel: &'a AtomicBool,
    records_done: &'a AtomicU64,
    art: ArtResolver<'a>,
    all_category: CategoryId,
    next_sequence: u32,
    stats: IngestStats,
}

impl<'a> IngestSink<'a> {
    /// Wrap the staging database. Creates the "All <kind>" category before
    /// any record is seen.
    pub fn new(
        db: &'a mut Database,
        kind: &str,
        cancel: &'a AtomicBool,
        records_done: &'a AtomicU64,
        art: ArtResolver<'a>,
    ) -> Self {
        let all_category = db.ensure_all_category(kind);
        let next_sequence = db.title_count() as u32 + 1;
        Self {
            db,
            cancel,
            records_done,
            art,
            all_category,
            next_sequence,
            stats: IngestStats::default(),
        }
    }

    /// Cooperative cancellation point.
    pub fn check_cancelled(&self) -> Result<(), LoadError> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }

    /// Apply the record policy to one flushed record.
    ///
    /// Skips are absorbed here; only cancellation is returned as an error.
    pub fn submit(&mut self, record: TitleRecord) -> Result<(), LoadError> {
        self.check_cancelled()?;
        match self.insert(record) {
            Ok(_) => self.stats.inserted += 1,
            Err(reason) => {
                debug!("skipping record: {}", reason);
                self.stats.record_skip(&reason);
            }
        }
        self.records_done.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn database(&self) -> &Database {
        &*self.db
    }

    pub fn finish(mut self) -> IngestStats {
        self.stats.art_failures = self.art.failures();
        self.stats
    }

    fn insert(&mut self, record: TitleRecord) -> Result<TitleSetId, SkipReason> {
        let uid = record.uid.trim().to_string();
        if uid.is_empty() {
            return Err(SkipReason::MissingId);
        }
        let title = record.title.trim().to_string();
        if title.is_empty() {
            return Err(SkipReason::MissingName(uid));
        }
        if self.db.title_by_uid(&uid).is_some() || self.db.collection_by_uid(&uid).is_some() {
            return Err(SkipReason::DuplicateId(uid));
        }

        let sequence = match record.sequence {
            Some(seq) => seq,
            None => self.next_sequence,
        };
        self.next_sequence += 1;

        let sort_title = if record.sort_title.trim().is_empty() {
            title.clone()
        } else {
            record.sort_title.trim().to_string()
        };

        let title_id = self.db.insert_title(TitleSet {
            id: TitleSetId(0),
            uid: uid.clone(),
            sort_title,
            title: title.clone(),
            artist: record.artist.clone(),
            sequence,
            added_at: record.added_at,
            user_rating: record.user_rating,
            collections: Vec::new(),
        });

        let art = self.art.acquire(self.db, &uid, &record.art);

        let mut categories = vec![self.all_category];
        for name in &record.categories {
            if name.trim().is_empty() {
                continue;
            }
            let id = self.db.category_for(name);
            if !categories.contains(&id) {
                categories.push(id);
            }
        }

        let collection_id = self.db.insert_collection(Collection {
            id: CollectionId(0),
            uid,
            title_set: title_id,
            description: record.description,
            year: record.year,
            duration: record.duration,
            media_format: record.media_format,
            aspect_ratio: record.aspect_ratio,
            lead_actor: record.cast.first().cloned(),
            cast: record.cast,
            rating: record.rating,
            studio: record.studio,
            location: record.location,
            art,
            categories,
            items: Vec::new(),
        });

        if record.items.is_empty() {
            self.db.insert_item(Item {
                id: ItemId(0),
                collection: collection_id,
                name: title,
                artist: record.artist.clone(),
                duration: record.duration,
                year: record.year,
                channels: 0,
            });
        }
        for item in record.items {
            self.db.insert_item(Item {
                id: ItemId(0),
                collection: collection_id,
                name: item.name,
                artist: record.artist.clone(),
                duration: item.duration,
                year: record.year,
                channels: item.channels,
            });
        }

        Ok(title_id)
    }
}
