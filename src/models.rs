//! Core data models used throughout Catalog Harness.
//!
//! [`TitleRecord`] is what a connector produces for one title before the
//! record policy runs. Everything else is a catalog entity owned by a
//! [`Database`](crate::database::Database) generation.

use serde::Serialize;

/// Upper bound for user ratings; larger source values are capped.
pub const MAX_USER_RATING: u8 = 10;

/// Numeric id of the synthetic "All <Kind>" category in every generation.
pub const ALL_CATEGORY_ID: CategoryId = CategoryId(0);

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

numeric_id!(
    /// In-process reference to a [`TitleSet`]. Valid for one generation only.
    TitleSetId
);
numeric_id!(
    /// In-process reference to a [`Collection`].
    CollectionId
);
numeric_id!(
    /// In-process reference to an [`Item`].
    ItemId
);
numeric_id!(
    /// In-process reference to a [`Category`].
    CategoryId
);
numeric_id!(
    /// In-process reference to an [`Image`].
    ImageId
);

/// Top-level title as the source system knows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleSet {
    pub id: TitleSetId,
    pub uid: String,
    pub sort_title: String,
    pub title: String,
    pub artist: String,
    pub sequence: u32,
    /// Epoch seconds, as supplied by the source.
    pub added_at: Option<i64>,
    pub user_rating: Option<u8>,
    pub collections: Vec<CollectionId>,
}

/// One release of a title (a disc set, a library entry).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: CollectionId,
    pub uid: String,
    pub title_set: TitleSetId,
    pub description: String,
    pub year: Option<u16>,
    /// Seconds.
    pub duration: u32,
    pub media_format: String,
    pub aspect_ratio: String,
    pub cast: Vec<String>,
    pub lead_actor: Option<String>,
    pub rating: String,
    pub studio: String,
    pub location: String,
    pub art: Option<ImageId>,
    pub categories: Vec<CategoryId>,
    pub items: Vec<ItemId>,
}

/// A playable unit of a collection (disc, media file).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub collection: CollectionId,
    pub name: String,
    pub artist: String,
    pub duration: u32,
    pub year: Option<u16>,
    pub channels: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// Uppercased display name; the category's identity.
    pub key: String,
}

/// The two art resolutions an image can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Resolution {
    Large,
    Thumbnail,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Large => write!(f, "large"),
            Resolution::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// One resolution of an image. Cached bytes are not part of the catalog's
/// identity and are skipped when serializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageSlot {
    pub locator: Option<String>,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
    /// Defined only once `bytes` have been read at least once.
    pub persistent_id: Option<String>,
}

impl ImageSlot {
    pub fn with_locator(locator: Option<String>) -> Self {
        Self {
            locator,
            bytes: None,
            persistent_id: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.bytes.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub id: ImageId,
    pub large: ImageSlot,
    pub thumbnail: ImageSlot,
}

impl Image {
    pub fn slot(&self, resolution: Resolution) -> &ImageSlot {
        match resolution {
            Resolution::Large => &self.large,
            Resolution::Thumbnail => &self.thumbnail,
        }
    }

    pub fn slot_mut(&mut self, resolution: Resolution) -> &mut ImageSlot {
        match resolution {
            Resolution::Large => &mut self.large,
            Resolution::Thumbnail => &mut self.thumbnail,
        }
    }
}

/// Art locators supplied by a source for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtLocators {
    pub large: Option<String>,
    pub thumbnail: Option<String>,
}

impl ArtLocators {
    pub fn is_empty(&self) -> bool {
        self.large.is_none() && self.thumbnail.is_none()
    }
}

/// Raw item inside a [`TitleRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRecord {
    pub name: String,
    pub duration: u32,
    pub channels: u8,
}

/// Raw title produced by a connector at flush time.
///
/// Fields are already trimmed and typed; the record policy in
/// [`ingest`](crate::ingest) decides whether it becomes entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleRecord {
    pub uid: String,
    pub title: String,
    pub sort_title: String,
    pub artist: String,
    pub sequence: Option<u32>,
    pub added_at: Option<i64>,
    pub user_rating: Option<u8>,
    pub description: String,
    pub year: Option<u16>,
    pub duration: u32,
    pub media_format: String,
    pub aspect_ratio: String,
    pub cast: Vec<String>,
    pub rating: String,
    pub studio: String,
    pub location: String,
    pub categories: Vec<String>,
    pub items: Vec<ItemRecord>,
    pub art: ArtLocators,
}

/// Clamp a raw rating into `1..=MAX_USER_RATING`; zero or negative means unrated.
pub fn cap_user_rating(raw: f64) -> Option<u8> {
    if !raw.is_finite() || raw < 1.0 {
        return None;
    }
    Some(raw.round().min(MAX_USER_RATING as f64) as u8)
}
