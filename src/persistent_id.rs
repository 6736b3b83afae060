//! Content-derived identifiers used for change detection.
//!
//! Both ids are lowercase SHA-256 hex strings. They depend only on catalog
//! content, never on time or memory layout.

use sha2::{Digest, Sha256};

use crate::database::Database;

/// Number of leading bytes of an art asset that feed its persistent id.
pub const ART_ID_PREFIX_BYTES: usize = 16 * 1024;

/// Persistent id of a whole catalog generation.
pub fn catalog_persistent_id(db: &Database) -> Result<String, serde_json::Error> {
    let bytes = db.canonical_bytes()?;
    Ok(hex_sha256(&bytes))
}

/// Persistent id of one image resolution, from a bounded prefix of its bytes.
///
/// Assets sharing their first [`ART_ID_PREFIX_BYTES`] bytes get the same id.
pub fn art_persistent_id(bytes: &[u8]) -> String {
    let end = bytes.len().min(ART_ID_PREFIX_BYTES);
    hex_sha256(&bytes[..end])
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageSlot;

    #[test]
    fn art_id_only_reads_prefix() {
        let mut a = vec![7u8; ART_ID_PREFIX_BYTES];
        let mut b = a.clone();
        a.extend_from_slice(b"tail one");
        b.extend_from_slice(b"a different tail");
        assert_eq!(art_persistent_id(&a), art_persistent_id(&b));

        let mut c = a.clone();
        c[0] = 8;
        assert_ne!(art_persistent_id(&a), art_persistent_id(&c));
    }

    #[test]
    fn art_id_of_short_asset_hashes_everything() {
        assert_eq!(
            art_persistent_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn catalog_id_is_stable_and_content_sensitive() {
        let build = |kind: &str| {
            let mut db = Database::new();
            db.ensure_all_category(kind);
            db.category_for("Drama");
            db.insert_image(ImageSlot::with_locator(Some("x.jpg".into())), ImageSlot::default());
            db
        };
        let a = catalog_persistent_id(&build("Movies")).unwrap();
        let b = catalog_persistent_id(&build("Movies")).unwrap();
        let c = catalog_persistent_id(&build("Films")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
