//! Builds the in-memory corpus from the Quran text, tafsir and surah list documents

use crate::quran::{Ayah, RevelationType, Surah, SurahSummary, JUZ_COUNT, PAGE_COUNT};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Documents may be exported bare or wrapped as `{"code": 200, "data": ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextDocument {
    pub surahs: Vec<SourceSurah>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSurah {
    pub number: u16,
    pub name: Option<String>,
    pub english_name: Option<String>,
    pub english_name_translation: Option<String>,
    pub revelation_type: Option<String>,
    #[serde(default)]
    pub ayahs: Vec<SourceAyah>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAyah {
    pub number: Option<u32>,
    pub number_in_surah: Option<u16>,
    #[serde(default)]
    pub text: String,
    pub page: Option<u16>,
    pub juz: Option<u16>,
    pub hizb_quarter: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurahMeta {
    pub number: u16,
    pub name: String,
    #[serde(default)]
    pub english_name: String,
    #[serde(default)]
    pub english_name_translation: String,
    pub number_of_ayahs: Option<u16>,
    pub revelation_type: Option<String>,
}

/// File locations of the three source documents
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub quran: PathBuf,
    pub tafsir: PathBuf,
    pub surahs: PathBuf,
}

/// The assembled, immutable Quran text
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    surahs: Vec<Surah>,
}

impl Corpus {
    pub fn new(mut surahs: Vec<Surah>) -> Self {
        surahs.sort_by_key(|s| s.number);
        Self { surahs }
    }

    pub fn is_ready(&self) -> bool {
        !self.surahs.is_empty()
    }

    pub fn surahs(&self) -> &[Surah] {
        &self.surahs
    }

    pub fn surah(&self, number: u16) -> Option<&Surah> {
        self.surahs.iter().find(|s| s.number == number)
    }

    pub fn summaries(&self) -> Vec<SurahSummary> {
        self.surahs.iter().map(Surah::summary).collect()
    }

    pub fn ayah_count(&self) -> usize {
        self.surahs.iter().map(|s| s.ayahs.len()).sum()
    }
}

/// Fallback page for a surah when the source carries none.
///
/// This is a linear approximation, not the Madani mushaf pagination.
pub fn estimated_page(surah: u16) -> u16 {
    let page = (f64::from(surah) * 5.3).ceil() as u16;
    page.clamp(1, PAGE_COUNT)
}

pub fn estimated_juz(surah: u16) -> u16 {
    surah.div_ceil(4).clamp(1, JUZ_COUNT)
}

pub fn estimated_hizb_quarter(surah: u16) -> u16 {
    surah.div_ceil(2).max(1)
}

/// Load and assemble the corpus. Failures degrade to an empty corpus.
pub fn load(paths: &SourcePaths) -> Corpus {
    let quran: TextDocument = match read_document(&paths.quran) {
        Ok(doc) => doc,
        Err(e) => {
            error!("Failed to load Quran text from {:?}: {:#}", paths.quran, e);
            return Corpus::default();
        }
    };

    let meta: Vec<SurahMeta> = match read_document(&paths.surahs) {
        Ok(meta) => meta,
        Err(e) => {
            error!("Failed to load surah list from {:?}: {:#}", paths.surahs, e);
            return Corpus::default();
        }
    };

    let tafsir: TextDocument = match read_document(&paths.tafsir) {
        Ok(doc) => doc,
        Err(e) => {
            error!("Failed to load tafsir from {:?}: {:#}", paths.tafsir, e);
            return Corpus::default();
        }
    };

    let corpus = assemble(quran, tafsir, meta);
    info!(
        surahs = corpus.surahs().len(),
        ayahs = corpus.ayah_count(),
        "Quran corpus loaded"
    );
    corpus
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let envelope: Envelope<T> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {:?}", path))?;
    Ok(envelope.into_inner())
}

/// Merge text, tafsir and metadata. Tafsir is matched by surah number and ayah position.
pub fn assemble(quran: TextDocument, tafsir: TextDocument, meta: Vec<SurahMeta>) -> Corpus {
    let mut tafsir_by_surah: HashMap<u16, Vec<String>> = tafsir
        .surahs
        .into_iter()
        .map(|s| (s.number, s.ayahs.into_iter().map(|a| a.text).collect()))
        .collect();
    let meta_by_surah: HashMap<u16, SurahMeta> = meta.into_iter().map(|m| (m.number, m)).collect();

    let mut estimated = 0usize;
    let mut surahs = Vec::with_capacity(quran.surahs.len());

    for source in quran.surahs {
        let number = source.number;
        let tafsir_texts = tafsir_by_surah.remove(&number).unwrap_or_default();

        let ayahs: Vec<Ayah> = source
            .ayahs
            .into_iter()
            .enumerate()
            .map(|(idx, a)| {
                let position_estimated = a.page.is_none() || a.juz.is_none() || a.hizb_quarter.is_none();
                if position_estimated {
                    estimated += 1;
                }
                Ayah {
                    number: a.number,
                    number_in_surah: a.number_in_surah.unwrap_or(idx as u16 + 1),
                    text: a.text,
                    page: a.page.unwrap_or_else(|| estimated_page(number)),
                    juz: a.juz.unwrap_or_else(|| estimated_juz(number)),
                    hizb_quarter: a.hizb_quarter.unwrap_or_else(|| estimated_hizb_quarter(number)),
                    tafsir: tafsir_texts.get(idx).cloned().unwrap_or_default(),
                    position_estimated,
                }
            })
            .collect();

        let meta = meta_by_surah.get(&number);
        let number_of_ayahs = meta
            .and_then(|m| m.number_of_ayahs)
            .unwrap_or(ayahs.len() as u16);
        if usize::from(number_of_ayahs) != ayahs.len() {
            warn!(
                surah = number,
                declared = number_of_ayahs,
                actual = ayahs.len(),
                "Declared ayah count does not match text"
            );
        }

        let revelation_type = meta
            .and_then(|m| m.revelation_type.as_deref())
            .or(source.revelation_type.as_deref())
            .and_then(RevelationType::parse)
            .unwrap_or_default();

        surahs.push(Surah {
            number,
            name: meta
                .map(|m| m.name.clone())
                .or(source.name)
                .unwrap_or_default(),
            english_name: meta
                .map(|m| m.english_name.clone())
                .filter(|s| !s.is_empty())
                .or(source.english_name)
                .unwrap_or_default(),
            english_name_translation: meta
                .map(|m| m.english_name_translation.clone())
                .filter(|s| !s.is_empty())
                .or(source.english_name_translation)
                .unwrap_or_default(),
            revelation_type,
            number_of_ayahs,
            ayahs,
        });
    }

    if estimated > 0 {
        warn!(
            ayahs = estimated,
            "Ayah positions missing from source, using estimated page/juz/hizb values"
        );
    }

    Corpus::new(surahs)
}
