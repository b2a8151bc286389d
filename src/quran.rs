//! Quran text types and the static reciter list

use serde::{Deserialize, Serialize};

pub const SURAH_COUNT: u16 = 114;
pub const PAGE_COUNT: u16 = 604;
pub const JUZ_COUNT: u16 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RevelationType {
    #[default]
    Meccan,
    Medinan,
}

impl RevelationType {
    /// Accepts the spellings found in common Quran exports ("Meccan", "makkah", "Medinan", "madinah")
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "meccan" | "makkah" | "makki" | "mecca" => Some(RevelationType::Meccan),
            "medinan" | "madinah" | "madani" | "medina" => Some(RevelationType::Medinan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ayah {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    pub number_in_surah: u16,
    pub text: String,
    pub page: u16,
    pub juz: u16,
    pub hizb_quarter: u16,
    pub tafsir: String,
    /// Set when page/juz/hizbQuarter were not in the source and came from the fallback formula
    pub position_estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Surah {
    pub number: u16,
    pub name: String,
    pub english_name: String,
    pub english_name_translation: String,
    pub revelation_type: RevelationType,
    pub number_of_ayahs: u16,
    pub ayahs: Vec<Ayah>,
}

impl Surah {
    pub fn summary(&self) -> SurahSummary {
        SurahSummary {
            number: self.number,
            name: self.name.clone(),
            english_name: self.english_name.clone(),
            english_name_translation: self.english_name_translation.clone(),
            revelation_type: self.revelation_type,
            number_of_ayahs: self.number_of_ayahs,
        }
    }
}

/// Surah metadata without its text, for the index listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurahSummary {
    pub number: u16,
    pub name: String,
    pub english_name: String,
    pub english_name_translation: String,
    pub revelation_type: RevelationType,
    pub number_of_ayahs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reciter {
    pub id: String,
    pub name: String,
    pub arabic_name: String,
    pub audio_base: String,
}

impl Reciter {
    /// Full-surah recording URL, e.g. `https://server8.mp3quran.net/afs/001.mp3`
    pub fn surah_audio_url(&self, surah: u16) -> String {
        format!("{}{:03}.mp3", self.audio_base, surah)
    }
}

const RECITERS: &[(&str, &str, &str, &str)] = &[
    ("alafasy", "Mishary Rashid Alafasy", "مشاري راشد العفاسي", "https://server8.mp3quran.net/afs/"),
    ("abdulbasit", "Abdul Basit Abdul Samad", "عبد الباسط عبد الصمد", "https://server7.mp3quran.net/basit/"),
    ("husary", "Mahmoud Khalil Al-Husary", "محمود خليل الحصري", "https://server13.mp3quran.net/husr/"),
    ("minshawi", "Mohamed Siddiq El-Minshawi", "محمد صديق المنشاوي", "https://server10.mp3quran.net/minsh/"),
    ("sudais", "Abdul Rahman Al-Sudais", "عبد الرحمن السديس", "https://server11.mp3quran.net/sds/"),
];

pub fn default_reciters() -> Vec<Reciter> {
    RECITERS
        .iter()
        .map(|(id, name, arabic_name, audio_base)| Reciter {
            id: id.to_string(),
            name: name.to_string(),
            arabic_name: arabic_name.to_string(),
            audio_base: audio_base.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revelation_type_spellings() {
        assert_eq!(RevelationType::parse("Meccan"), Some(RevelationType::Meccan));
        assert_eq!(RevelationType::parse(" madinah "), Some(RevelationType::Medinan));
        assert_eq!(RevelationType::parse("unknown"), None);
    }

    #[test]
    fn test_surah_audio_url_pads_number() {
        let reciter = &default_reciters()[0];
        assert_eq!(reciter.surah_audio_url(1), "https://server8.mp3quran.net/afs/001.mp3");
        assert_eq!(reciter.surah_audio_url(114), "https://server8.mp3quran.net/afs/114.mp3");
    }
}
