//! Per-student persisted state behind interchangeable backends

mod json_file;
mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

use crate::config::Config;
use crate::error::TilawaError;
use crate::quran::SURAH_COUNT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Tag value that marks a note's surah as memorized
pub const MEMORIZED_TAG: &str = "memorized";

pub const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub surah: u16,
    pub ayah: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccount {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl NewStudent {
    /// Collects every problem rather than stopping at the first
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name is required".to_string());
        }
        if !looks_like_email(&self.email) {
            problems.push("email is invalid".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            problems.push(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(TilawaError::Validation(problems))
        }
    }
}

fn looks_like_email(raw: &str) -> bool {
    let raw = raw.trim();
    match raw.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: i64,
    pub last_surah: u16,
    pub last_ayah: u16,
    pub bookmarked_verses: Vec<VerseRef>,
    pub memorized_surahs: Vec<String>,
    pub updated_at: String,
}

impl StudentProgress {
    pub fn new(student_id: i64) -> Self {
        Self {
            student_id,
            last_surah: 1,
            last_ayah: 1,
            bookmarked_verses: Vec::new(),
            memorized_surahs: Vec::new(),
            updated_at: now(),
        }
    }

    /// Apply only the fields present in `update`
    pub fn merge(&mut self, update: &ProgressUpdate) {
        if let Some(surah) = update.last_surah {
            self.last_surah = surah;
        }
        if let Some(ayah) = update.last_ayah {
            self.last_ayah = ayah;
        }
        if let Some(bookmarks) = &update.bookmarked_verses {
            self.bookmarked_verses = bookmarks.clone();
        }
        if let Some(names) = &update.memorized_surahs {
            self.memorized_surahs = dedupe_names(names);
        }
        self.updated_at = now();
    }

    /// Remove the bookmark if present, otherwise append it
    pub fn toggle_bookmark(&mut self, verse: VerseRef) {
        if let Some(pos) = self.bookmarked_verses.iter().position(|v| *v == verse) {
            self.bookmarked_verses.remove(pos);
        } else {
            self.bookmarked_verses.push(verse);
        }
        self.updated_at = now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub last_surah: Option<u16>,
    pub last_ayah: Option<u16>,
    pub bookmarked_verses: Option<Vec<VerseRef>>,
    pub memorized_surahs: Option<Vec<String>>,
}

impl ProgressUpdate {
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();
        if let Some(surah) = self.last_surah {
            check_surah(surah, "lastSurah", &mut problems);
        }
        if self.last_ayah == Some(0) {
            problems.push("lastAyah must be at least 1".to_string());
        }
        for verse in self.bookmarked_verses.iter().flatten() {
            check_verse(*verse, &mut problems);
        }
        finish(problems)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentNote {
    pub id: i64,
    pub student_id: i64,
    pub surah_number: u16,
    pub ayah_number: u16,
    pub note: String,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl StudentNote {
    pub fn marks_memorized(&self) -> bool {
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(MEMORIZED_TAG))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub surah_number: u16,
    pub ayah_number: u16,
    pub note: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl NewNote {
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();
        check_verse(
            VerseRef {
                surah: self.surah_number,
                ayah: self.ayah_number,
            },
            &mut problems,
        );
        if self.note.trim().is_empty() {
            problems.push("note is required".to_string());
        }
        finish(problems)
    }
}

/// A recitation mistake recorded against an ayah
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecitationError {
    pub id: i64,
    pub student_id: i64,
    pub surah_number: u16,
    pub ayah_number: u16,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecitationError {
    pub surah_number: u16,
    pub ayah_number: u16,
    pub description: String,
}

impl NewRecitationError {
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();
        check_verse(
            VerseRef {
                surah: self.surah_number,
                ayah: self.ayah_number,
            },
            &mut problems,
        );
        if self.description.trim().is_empty() {
            problems.push("description is required".to_string());
        }
        finish(problems)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: i64,
    pub student_id: i64,
    pub started_at: String,
    pub duration_minutes: u32,
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudySession {
    pub started_at: Option<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewStudySession {
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();
        if self.duration_minutes == 0 {
            problems.push("durationMinutes must be at least 1".to_string());
        }
        if let Some(started) = &self.started_at {
            if chrono::DateTime::parse_from_rfc3339(started).is_err() {
                problems.push("startedAt must be an RFC 3339 timestamp".to_string());
            }
        }
        finish(problems)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub student_id: i64,
    pub amount: f64,
    pub currency: String,
    pub note: String,
    pub paid_at: String,
}

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewPayment {
    pub fn validate(&self) -> Result<(), TilawaError> {
        let mut problems = Vec::new();
        if !self.amount.is_finite() || self.amount <= 0.0 {
            problems.push("amount must be a positive number".to_string());
        }
        if let Some(currency) = &self.currency {
            let currency = currency.trim();
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                problems.push("currency must be a three-letter code".to_string());
            }
        }
        finish(problems)
    }

    pub fn currency_code(&self) -> String {
        self.currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
    }
}

/// Memorized surahs as recorded in progress plus those marked through note tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memorized {
    pub surahs: Vec<String>,
    pub tagged_surah_numbers: Vec<u16>,
}

/// Durable per-student state.
///
/// Implementations must give identical observable behavior; the conformance
/// suite in `tests/store_conformance.rs` runs against each of them.
pub trait ProgressStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Create an account. Fails with `Conflict` when the email is taken.
    fn create_student(&self, new: &NewStudent) -> Result<StudentAccount, TilawaError>;

    fn find_student(&self, id: i64) -> Result<Option<StudentAccount>, TilawaError>;

    /// Account and stored password (hash or legacy plaintext) for an email
    fn credentials(&self, email: &str) -> Result<Option<(StudentAccount, String)>, TilawaError>;

    /// Rehash every stored password that is not already a bcrypt hash
    fn migrate_plaintext_passwords(&self) -> Result<usize, TilawaError>;

    /// Existing progress, or a freshly stored default record
    fn get_progress(&self, student_id: i64) -> Result<StudentProgress, TilawaError>;

    fn update_progress(&self, student_id: i64, update: &ProgressUpdate) -> Result<StudentProgress, TilawaError>;

    fn toggle_bookmark(&self, student_id: i64, verse: VerseRef) -> Result<StudentProgress, TilawaError>;

    fn add_note(&self, student_id: i64, note: &NewNote) -> Result<StudentNote, TilawaError>;

    fn list_notes(&self, student_id: i64, surah: Option<u16>) -> Result<Vec<StudentNote>, TilawaError>;

    fn add_error(&self, student_id: i64, error: &NewRecitationError) -> Result<RecitationError, TilawaError>;

    fn list_errors(&self, student_id: i64) -> Result<Vec<RecitationError>, TilawaError>;

    fn add_session(&self, student_id: i64, session: &NewStudySession) -> Result<StudySession, TilawaError>;

    fn list_sessions(&self, student_id: i64) -> Result<Vec<StudySession>, TilawaError>;

    fn add_payment(&self, student_id: i64, payment: &NewPayment) -> Result<Payment, TilawaError>;

    fn list_payments(&self, student_id: i64) -> Result<Vec<Payment>, TilawaError>;

    fn find_student_by_email(&self, email: &str) -> Result<Option<StudentAccount>, TilawaError> {
        Ok(self.credentials(email)?.map(|(account, _)| account))
    }

    /// Account for matching credentials, `None` on unknown email or wrong password
    fn authenticate(&self, email: &str, password: &str) -> Result<Option<StudentAccount>, TilawaError> {
        match self.credentials(email)? {
            Some((account, stored)) if verify_password(password, &stored)? => Ok(Some(account)),
            _ => Ok(None),
        }
    }

    fn memorized(&self, student_id: i64) -> Result<Memorized, TilawaError> {
        let progress = self.get_progress(student_id)?;
        let mut tagged: Vec<u16> = self
            .list_notes(student_id, None)?
            .iter()
            .filter(|n| n.marks_memorized())
            .map(|n| n.surah_number)
            .collect();
        tagged.sort_unstable();
        tagged.dedup();

        Ok(Memorized {
            surahs: progress.memorized_surahs,
            tagged_surah_numbers: tagged,
        })
    }
}

/// Pick the backend: SQLite when `DATABASE_URL` is set, the JSON file otherwise
pub fn open_store(config: &Config) -> Result<Arc<dyn ProgressStore>, TilawaError> {
    match config.sqlite_path() {
        Some(path) => {
            info!("Using SQLite progress store at {:?}", path);
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        None => {
            info!("Using JSON file progress store at {:?}", config.students_file);
            Ok(Arc::new(JsonFileStore::new(config.students_file.clone())))
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, TilawaError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub fn is_bcrypt_hash(stored: &str) -> bool {
    stored.len() == 60 && ["$2a$", "$2b$", "$2x$", "$2y$"].iter().any(|p| stored.starts_with(p))
}

/// Plaintext passwords awaiting migration. An empty password never verifies, so it stays empty.
pub fn needs_rehash(stored: &str) -> bool {
    !stored.is_empty() && !is_bcrypt_hash(stored)
}

/// Legacy plaintext passwords still compare by equality until migrated
pub fn verify_password(password: &str, stored: &str) -> Result<bool, TilawaError> {
    if is_bcrypt_hash(stored) {
        Ok(bcrypt::verify(password, stored)?)
    } else {
        Ok(!stored.is_empty() && password == stored)
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn dedupe_names(names: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !seen.iter().any(|s: &String| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

pub(crate) fn clean_tags(tags: Option<&Vec<String>>) -> Vec<String> {
    tags.map(|t| dedupe_names(t)).unwrap_or_default()
}

fn check_surah(surah: u16, field: &str, problems: &mut Vec<String>) {
    if surah == 0 || surah > SURAH_COUNT {
        problems.push(format!("{} must be between 1 and {}", field, SURAH_COUNT));
    }
}

fn check_verse(verse: VerseRef, problems: &mut Vec<String>) {
    check_surah(verse.surah, "surah", problems);
    if verse.ayah == 0 {
        problems.push("ayah must be at least 1".to_string());
    }
}

fn finish(problems: Vec<String>) -> Result<(), TilawaError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(TilawaError::Validation(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_student_validation_collects_all() {
        let new = NewStudent {
            name: " ".to_string(),
            email: "nobody".to_string(),
            password: "abc".to_string(),
        };
        match new.validate() {
            Err(TilawaError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_email_shapes() {
        assert!(looks_like_email("student@example.com"));
        assert!(!looks_like_email("student@example"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a@b@c.com"));
        assert_eq!(normalize_email("  Student@Example.COM "), "student@example.com");
    }

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let mut progress = StudentProgress::new(7);
        progress.merge(&ProgressUpdate {
            last_surah: Some(2),
            ..Default::default()
        });
        progress.merge(&ProgressUpdate {
            last_ayah: Some(5),
            ..Default::default()
        });
        assert_eq!((progress.last_surah, progress.last_ayah), (2, 5));
    }

    #[test]
    fn test_toggle_bookmark() {
        let mut progress = StudentProgress::new(1);
        let verse = VerseRef { surah: 2, ayah: 255 };
        progress.toggle_bookmark(verse);
        assert_eq!(progress.bookmarked_verses, vec![verse]);
        progress.toggle_bookmark(verse);
        assert!(progress.bookmarked_verses.is_empty());
    }

    #[test]
    fn test_memorized_tag_matching() {
        let note = StudentNote {
            id: 1,
            student_id: 1,
            surah_number: 112,
            ayah_number: 1,
            note: "done".to_string(),
            tags: vec!["Memorized ".to_string()],
            created_at: now(),
        };
        assert!(note.marks_memorized());
    }

    #[test]
    fn test_plaintext_password_still_verifies() {
        assert!(verify_password("secret1", "secret1").unwrap());
        assert!(!verify_password("secret2", "secret1").unwrap());
        assert!(!verify_password("", "").unwrap());
    }

    #[test]
    fn test_hashed_password_verifies() {
        let hash = bcrypt::hash("secret1", 4).unwrap();
        assert!(is_bcrypt_hash(&hash));
        assert!(!needs_rehash(&hash));
        assert!(needs_rehash("plain-pass"));
        assert!(!needs_rehash(""));
        assert!(verify_password("secret1", &hash).unwrap());
        assert!(!verify_password("secret2", &hash).unwrap());
    }

    #[test]
    fn test_progress_update_validation() {
        let update = ProgressUpdate {
            last_surah: Some(115),
            last_ayah: Some(0),
            bookmarked_verses: Some(vec![VerseRef { surah: 0, ayah: 1 }]),
            memorized_surahs: None,
        };
        match update.validate() {
            Err(TilawaError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(ProgressUpdate::default().validate().is_ok());
    }

    #[test]
    fn test_payment_currency() {
        let payment = NewPayment {
            amount: 10.0,
            currency: Some(" sar".to_string()),
            note: None,
        };
        assert!(payment.validate().is_ok());
        assert_eq!(payment.currency_code(), "SAR");

        let bad = NewPayment {
            amount: -1.0,
            currency: Some("riyal".to_string()),
            note: None,
        };
        assert!(bad.validate().is_err());
    }
}
