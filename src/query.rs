//! Read-only queries over the assembled corpus

use crate::assembler::Corpus;
use crate::cache::PageCache;
use crate::error::TilawaError;
use crate::quran::{Ayah, Reciter, Surah, SurahSummary, PAGE_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Queries shorter than this (in characters, after trimming) are rejected
pub const MIN_QUERY_CHARS: usize = 2;

/// Ayahs on one page, grouped by surah number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub page: u16,
    pub surahs: BTreeMap<u16, Vec<Ayah>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub surah: u16,
    pub surah_name: String,
    pub ayah: u16,
    pub text: String,
    pub page: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

pub struct QueryService {
    corpus: Arc<Corpus>,
    reciters: Vec<Reciter>,
    pages: PageCache,
    search_cap: usize,
}

impl QueryService {
    pub fn new(corpus: Arc<Corpus>, reciters: Vec<Reciter>, search_cap: usize, page_cache: usize) -> Self {
        Self {
            corpus,
            reciters,
            pages: PageCache::new(page_cache),
            search_cap: search_cap.max(1),
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn surah(&self, number: u16) -> Option<&Surah> {
        self.corpus.surah(number)
    }

    pub fn surah_summaries(&self) -> Vec<SurahSummary> {
        self.corpus.summaries()
    }

    /// Ayahs on `page` grouped by surah. `None` when out of range or empty.
    pub fn page(&self, page: u16) -> Option<Arc<PageView>> {
        if page == 0 || page > PAGE_COUNT {
            return None;
        }

        self.pages.get_or_build(page, || {
            let mut surahs: BTreeMap<u16, Vec<Ayah>> = BTreeMap::new();
            for surah in self.corpus.surahs() {
                for ayah in surah.ayahs.iter().filter(|a| a.page == page) {
                    surahs.entry(surah.number).or_default().push(ayah.clone());
                }
            }
            (!surahs.is_empty()).then_some(PageView { page, surahs })
        })
    }

    /// Case-insensitive substring scan in reading order, truncated to `limit` (bounded by the cap)
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<SearchResults, TilawaError> {
        let trimmed = query.trim();
        if trimmed.chars().count() < MIN_QUERY_CHARS {
            return Err(TilawaError::InvalidQuery(format!(
                "query must be at least {} characters",
                MIN_QUERY_CHARS
            )));
        }

        let limit = limit.unwrap_or(self.search_cap).clamp(1, self.search_cap);
        let needle = trimmed.to_lowercase();

        let matches: Vec<(&Surah, &Ayah)> = self
            .corpus
            .surahs()
            .iter()
            .flat_map(|surah| surah.ayahs.iter().map(move |ayah| (surah, ayah)))
            .filter(|(_, ayah)| ayah.text.to_lowercase().contains(&needle))
            .collect();
        let total = matches.len();

        let results: Vec<SearchHit> = matches
            .into_iter()
            .take(limit)
            .map(|(surah, ayah)| SearchHit {
                surah: surah.number,
                surah_name: surah.name.clone(),
                ayah: ayah.number_in_surah,
                text: ayah.text.clone(),
                page: ayah.page,
            })
            .collect();

        Ok(SearchResults {
            query: trimmed.to_string(),
            total,
            results,
        })
    }

    pub fn reciters(&self) -> &[Reciter] {
        &self.reciters
    }

    pub fn reciter(&self, id: &str) -> Option<&Reciter> {
        self.reciters.iter().find(|r| r.id == id)
    }
}
