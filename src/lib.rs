//! Tilawa - Quran reader and student progress API
//!
//! Library providing the assembled Quran corpus, read-only queries over it,
//! and per-student state behind a JSON-file or SQLite backend.

pub mod quran;
pub mod assembler;
pub mod query;
pub mod cache;
pub mod store;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
pub mod routes;

pub use assembler::{Corpus, SourcePaths};
pub use config::Config;
pub use error::TilawaError;
pub use query::{PageView, QueryService, SearchHit, SearchResults};
pub use quran::{Ayah, Reciter, RevelationType, Surah, SurahSummary};
pub use routes::router;
pub use state::AppState;
pub use store::{open_store, JsonFileStore, ProgressStore, SqliteStore};
