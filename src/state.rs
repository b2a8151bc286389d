//! Application state management

use crate::assembler::{self, Corpus, SourcePaths};
use crate::auth::{LoginThrottle, SessionRegistry};
use crate::config::{Config, MAX_SESSION_TTL_HOURS};
use crate::error::TilawaError;
use crate::query::QueryService;
use crate::quran::default_reciters;
use crate::store::{open_store, ProgressStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a request handler needs, shared behind an `Arc`
pub struct AppState {
    pub config: Config,
    pub query: QueryService,
    pub store: Arc<dyn ProgressStore>,
    pub sessions: SessionRegistry,
    pub login_throttle: LoginThrottle,
}

impl AppState {
    /// Load the corpus from disk, open the configured store and run the password migration
    pub fn new(config: Config) -> Result<Self, TilawaError> {
        info!("Using data directory {:?}", config.data_dir);
        let corpus = assembler::load(&SourcePaths {
            quran: config.quran_file.clone(),
            tafsir: config.tafsir_file.clone(),
            surahs: config.surahs_file.clone(),
        });
        if !corpus.is_ready() {
            warn!("Quran corpus is empty; reader endpoints will return not found");
        }

        let store = open_store(&config)?;
        let migrated = store.migrate_plaintext_passwords()?;
        if migrated > 0 {
            info!(migrated, backend = store.backend(), "Password migration complete");
        }

        Ok(Self::with_parts(config, corpus, store))
    }

    /// Assemble state from an already loaded corpus and store
    pub fn with_parts(config: Config, corpus: Corpus, store: Arc<dyn ProgressStore>) -> Self {
        let query = QueryService::new(
            Arc::new(corpus),
            default_reciters(),
            config.search_cap,
            config.page_cache,
        );
        let ttl_hours = config.session_ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS);
        let sessions = SessionRegistry::new(chrono::Duration::hours(ttl_hours));
        let login_throttle = LoginThrottle::per_minute(config.login_per_minute);

        Self {
            config,
            query,
            store,
            sessions,
            login_throttle,
        }
    }
}
