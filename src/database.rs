//! The catalog container.
//!
//! A [`Database`] is one generation of the catalog. Loads populate a fresh
//! staging instance; the driver adopts it wholesale with
//! [`Database::take_contents_from`]. Entities are append-only: numeric ids
//! are vector positions and stay valid for the lifetime of the generation.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{
    Category, CategoryId, Collection, CollectionId, Image, ImageId, ImageSlot, Item, ItemId,
    TitleSet, TitleSetId, ALL_CATEGORY_ID,
};

#[derive(Debug, Default, Serialize)]
pub struct Database {
    all_category: Option<Category>,
    categories: Vec<Category>,
    titles: Vec<TitleSet>,
    collections: Vec<Collection>,
    items: Vec<Item>,
    images: Vec<Image>,
    #[serde(skip)]
    title_index: HashMap<String, TitleSetId>,
    #[serde(skip)]
    collection_index: HashMap<String, CollectionId>,
    #[serde(skip)]
    category_index: HashMap<String, CategoryId>,
}

/// Identity key of a category: trimmed, uppercased display name.
pub fn category_key(name: &str) -> String {
    name.trim().to_uppercase()
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
            && self.collections.is_empty()
            && self.categories.is_empty()
            && self.images.is_empty()
            && self.all_category.is_none()
    }

    /// Drop every entity, leaving an empty generation.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Hot swap: discard this database's content and take all of `other`'s,
    /// leaving `other` empty.
    pub fn take_contents_from(&mut self, other: &mut Database) {
        *self = std::mem::take(other);
    }

    // ── Categories ──────────────────────────────────────────────────────

    /// Create the synthetic "All <Kind>" category if this generation does
    /// not have one yet. Always returns [`ALL_CATEGORY_ID`].
    pub fn ensure_all_category(&mut self, kind: &str) -> CategoryId {
        if self.all_category.is_none() {
            let name = format!("All {}", kind.trim());
            self.all_category = Some(Category {
                id: ALL_CATEGORY_ID,
                key: category_key(&name),
                name,
            });
        }
        ALL_CATEGORY_ID
    }

    pub fn all_category(&self) -> Option<&Category> {
        self.all_category.as_ref()
    }

    /// Get or create the explicit category for `name`, by uppercased key.
    pub fn category_for(&mut self, name: &str) -> CategoryId {
        let key = category_key(name);
        if let Some(id) = self.category_index.get(&key) {
            return *id;
        }
        // Explicit ids start after the reserved "All" id.
        let id = CategoryId(self.categories.len() as u32 + 1);
        self.categories.push(Category {
            id,
            name: name.trim().to_string(),
            key: key.clone(),
        });
        self.category_index.insert(key, id);
        id
    }

    pub fn category_by_name(&self, name: &str) -> Option<&Category> {
        self.category_index
            .get(&category_key(name))
            .and_then(|id| self.category(*id))
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        if id == ALL_CATEGORY_ID {
            return self.all_category.as_ref();
        }
        self.categories.get(id.index() - 1)
    }

    /// Explicit categories in creation order (the "All" category excluded).
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Collections belonging to `category`, in insertion order.
    pub fn collections_in(&self, category: CategoryId) -> impl Iterator<Item = &Collection> {
        self.collections
            .iter()
            .filter(move |c| c.categories.contains(&category))
    }

    // ── Titles, collections, items ──────────────────────────────────────

    /// Insert a title. The `id` and `collections` fields are assigned here.
    pub fn insert_title(&mut self, mut title: TitleSet) -> TitleSetId {
        let id = TitleSetId(self.titles.len() as u32);
        title.id = id;
        title.collections.clear();
        self.title_index.insert(title.uid.clone(), id);
        self.titles.push(title);
        id
    }

    /// Insert a collection under its title set. The `id` and `items` fields
    /// are assigned here.
    pub fn insert_collection(&mut self, mut collection: Collection) -> CollectionId {
        let id = CollectionId(self.collections.len() as u32);
        collection.id = id;
        collection.items.clear();
        if let Some(title) = self.titles.get_mut(collection.title_set.index()) {
            title.collections.push(id);
        }
        self.collection_index.insert(collection.uid.clone(), id);
        self.collections.push(collection);
        id
    }

    pub fn insert_item(&mut self, mut item: Item) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        item.id = id;
        if let Some(collection) = self.collections.get_mut(item.collection.index()) {
            collection.items.push(id);
        }
        self.items.push(item);
        id
    }

    pub fn title_by_uid(&self, uid: &str) -> Option<&TitleSet> {
        self.title_index.get(uid).map(|id| &self.titles[id.index()])
    }

    pub fn collection_by_uid(&self, uid: &str) -> Option<&Collection> {
        self.collection_index
            .get(uid)
            .map(|id| &self.collections[id.index()])
    }

    pub fn title(&self, id: TitleSetId) -> Option<&TitleSet> {
        self.titles.get(id.index())
    }

    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id.index())
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id.index())
    }

    pub fn titles(&self) -> &[TitleSet] {
        &self.titles
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_of(&self, collection: CollectionId) -> impl Iterator<Item = &Item> {
        self.collection(collection)
            .into_iter()
            .flat_map(move |c| c.items.iter().filter_map(move |id| self.item(*id)))
    }

    pub fn title_count(&self) -> usize {
        self.titles.len()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    // ── Images ──────────────────────────────────────────────────────────

    pub fn insert_image(&mut self, large: ImageSlot, thumbnail: ImageSlot) -> ImageId {
        let id = ImageId(self.images.len() as u32);
        self.images.push(Image {
            id,
            large,
            thumbnail,
        });
        id
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.get(id.index())
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.images.get_mut(id.index())
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    // ── Identity ────────────────────────────────────────────────────────

    /// Canonical serialization of the whole generation. Excludes lookup
    /// indexes and cached image bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// See [`catalog_persistent_id`](crate::persistent_id::catalog_persistent_id).
    pub fn persistent_id(&self) -> Result<String, serde_json::Error> {
        crate::persistent_id::catalog_persistent_id(self)
    }
}
