//! # Catalog Harness
//!
//! Background ingestion of a media catalog for a media-serving engine.
//!
//! A catalog is built from one of two sources: an exported collection XML
//! file on local disk, or a media server's HTTP library API read page by
//! page. Both are parsed in a single streaming pass on a dedicated loader
//! thread into a staging [`Database`](database::Database). Only a fully
//! successful load replaces the live catalog, in one step.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ CatalogSource│──▶│ IngestSink  │──▶│   staging    │
//! │  file / http │   │ record rules│   │   Database   │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!        ▲  loader thread                     │ join
//! ┌──────┴───────┐                     ┌──────▼───────┐
//! │    Loader    │◀────── tick ────────│CatalogDriver │──▶ StatusSurface
//! └──────────────┘                     │ live Database│
//!                                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog entities and raw records |
//! | [`database`] | One catalog generation |
//! | [`persistent_id`] | Content-derived ids |
//! | [`art`] | Cover art fetching and thumbnails |
//! | [`xml`] | Streaming XML helpers |
//! | [`ingest`] | Record policy shared by connectors |
//! | [`connector_file`] | Exported collection file connector |
//! | [`connector_http`] | Media server connector |
//! | [`traits`] | Source trait and construction |
//! | [`loader`] | Background load state machine |
//! | [`driver`] | Live catalog orchestration |
//! | [`progress`] | Status surfaces |
//! | [`sources`] | Source health checks |

pub mod art;
pub mod config;
pub mod connector_file;
pub mod connector_http;
pub mod database;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod persistent_id;
pub mod progress;
pub mod sources;
pub mod traits;
pub mod xml;
