//! Progress store backed by a single JSON document on disk

use super::{
    clean_tags, hash_password, needs_rehash, normalize_email, now, NewNote, NewPayment,
    NewRecitationError, NewStudent, NewStudySession, Payment, ProgressStore, ProgressUpdate,
    RecitationError, StudentAccount, StudentNote, StudentProgress, StudySession, VerseRef,
};
use crate::error::TilawaError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredStudent {
    id: i64,
    name: String,
    email: String,
    password: String,
    created_at: String,
}

impl StoredStudent {
    fn account(&self) -> StudentAccount {
        StudentAccount {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// On-disk layout of `students.json`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StudentsDocument {
    students: Vec<StoredStudent>,
    progress: Vec<StudentProgress>,
    notes: Vec<StudentNote>,
    errors: Vec<RecitationError>,
    sessions: Vec<StudySession>,
    payments: Vec<Payment>,
}

impl StudentsDocument {
    fn progress_mut(&mut self, student_id: i64) -> &mut StudentProgress {
        let idx = match self.progress.iter().position(|p| p.student_id == student_id) {
            Some(idx) => idx,
            None => {
                self.progress.push(StudentProgress::new(student_id));
                self.progress.len() - 1
            }
        };
        &mut self.progress[idx]
    }
}

fn next_id<T>(items: &[T], id: impl Fn(&T) -> i64) -> i64 {
    items.iter().map(id).max().unwrap_or(0) + 1
}

/// Whole-file JSON store.
///
/// Every read-modify-write cycle holds `write_lock`, and the file is replaced
/// through a temporary sibling plus rename, so concurrent requests in this
/// process cannot lose each other's updates and readers never see a torn file.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, TilawaError> {
        self.write_lock
            .lock()
            .map_err(|_| TilawaError::Other("Failed to acquire store lock".to_string()))
    }

    fn read(&self) -> Result<StudentsDocument, TilawaError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StudentsDocument::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn write(&self, doc: &StudentsDocument) -> Result<(), TilawaError> {
        let parent_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent_dir)?;

        let temp_file = NamedTempFile::new_in(parent_dir)?;
        {
            let mut writer = BufWriter::new(&temp_file);
            serde_json::to_writer_pretty(&mut writer, doc)?;
            writer.flush()?;
        }
        temp_file
            .persist(&self.path)
            .map_err(|e| TilawaError::Io(e.error.to_string()))?;
        debug!("Wrote {:?}", self.path);
        Ok(())
    }

    /// Run `f` against the document under the lock and persist the result
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StudentsDocument) -> Result<T, TilawaError>,
    ) -> Result<T, TilawaError> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;
        let value = f(&mut doc)?;
        self.write(&doc)?;
        Ok(value)
    }

    fn inspect<T>(&self, f: impl FnOnce(&StudentsDocument) -> T) -> Result<T, TilawaError> {
        let _guard = self.lock()?;
        let doc = self.read()?;
        Ok(f(&doc))
    }
}

impl ProgressStore for JsonFileStore {
    fn backend(&self) -> &'static str {
        "json"
    }

    fn create_student(&self, new: &NewStudent) -> Result<StudentAccount, TilawaError> {
        let email = normalize_email(&new.email);
        let password = hash_password(&new.password)?;

        self.mutate(|doc| {
            if doc.students.iter().any(|s| normalize_email(&s.email) == email) {
                return Err(TilawaError::Conflict("email already registered".to_string()));
            }
            let student = StoredStudent {
                id: next_id(&doc.students, |s| s.id),
                name: new.name.trim().to_string(),
                email,
                password,
                created_at: now(),
            };
            let account = student.account();
            doc.students.push(student);
            Ok(account)
        })
    }

    fn find_student(&self, id: i64) -> Result<Option<StudentAccount>, TilawaError> {
        self.inspect(|doc| doc.students.iter().find(|s| s.id == id).map(StoredStudent::account))
    }

    fn credentials(&self, email: &str) -> Result<Option<(StudentAccount, String)>, TilawaError> {
        let email = normalize_email(email);
        self.inspect(|doc| {
            doc.students
                .iter()
                .find(|s| normalize_email(&s.email) == email)
                .map(|s| (s.account(), s.password.clone()))
        })
    }

    fn migrate_plaintext_passwords(&self) -> Result<usize, TilawaError> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;

        let mut migrated = 0;
        for student in doc.students.iter_mut().filter(|s| needs_rehash(&s.password)) {
            student.password = hash_password(&student.password)?;
            migrated += 1;
        }

        if migrated > 0 {
            self.write(&doc)?;
            info!(migrated, "Rehashed plaintext passwords");
        }
        Ok(migrated)
    }

    fn get_progress(&self, student_id: i64) -> Result<StudentProgress, TilawaError> {
        let _guard = self.lock()?;
        let mut doc = self.read()?;

        if let Some(progress) = doc.progress.iter().find(|p| p.student_id == student_id) {
            return Ok(progress.clone());
        }

        let progress = doc.progress_mut(student_id).clone();
        self.write(&doc)?;
        Ok(progress)
    }

    fn update_progress(&self, student_id: i64, update: &ProgressUpdate) -> Result<StudentProgress, TilawaError> {
        self.mutate(|doc| {
            let progress = doc.progress_mut(student_id);
            progress.merge(update);
            Ok(progress.clone())
        })
    }

    fn toggle_bookmark(&self, student_id: i64, verse: VerseRef) -> Result<StudentProgress, TilawaError> {
        self.mutate(|doc| {
            let progress = doc.progress_mut(student_id);
            progress.toggle_bookmark(verse);
            Ok(progress.clone())
        })
    }

    fn add_note(&self, student_id: i64, note: &NewNote) -> Result<StudentNote, TilawaError> {
        self.mutate(|doc| {
            let stored = StudentNote {
                id: next_id(&doc.notes, |n| n.id),
                student_id,
                surah_number: note.surah_number,
                ayah_number: note.ayah_number,
                note: note.note.trim().to_string(),
                tags: clean_tags(note.tags.as_ref()),
                created_at: now(),
            };
            doc.notes.push(stored.clone());
            Ok(stored)
        })
    }

    fn list_notes(&self, student_id: i64, surah: Option<u16>) -> Result<Vec<StudentNote>, TilawaError> {
        self.inspect(|doc| {
            doc.notes
                .iter()
                .filter(|n| n.student_id == student_id)
                .filter(|n| surah.map_or(true, |s| n.surah_number == s))
                .cloned()
                .collect()
        })
    }

    fn add_error(&self, student_id: i64, error: &NewRecitationError) -> Result<RecitationError, TilawaError> {
        self.mutate(|doc| {
            let stored = RecitationError {
                id: next_id(&doc.errors, |e| e.id),
                student_id,
                surah_number: error.surah_number,
                ayah_number: error.ayah_number,
                description: error.description.trim().to_string(),
                created_at: now(),
            };
            doc.errors.push(stored.clone());
            Ok(stored)
        })
    }

    fn list_errors(&self, student_id: i64) -> Result<Vec<RecitationError>, TilawaError> {
        self.inspect(|doc| {
            doc.errors
                .iter()
                .filter(|e| e.student_id == student_id)
                .cloned()
                .collect()
        })
    }

    fn add_session(&self, student_id: i64, session: &NewStudySession) -> Result<StudySession, TilawaError> {
        self.mutate(|doc| {
            let stored = StudySession {
                id: next_id(&doc.sessions, |s| s.id),
                student_id,
                started_at: session.started_at.clone().unwrap_or_else(now),
                duration_minutes: session.duration_minutes,
                notes: session.notes.clone().unwrap_or_default(),
            };
            doc.sessions.push(stored.clone());
            Ok(stored)
        })
    }

    fn list_sessions(&self, student_id: i64) -> Result<Vec<StudySession>, TilawaError> {
        self.inspect(|doc| {
            doc.sessions
                .iter()
                .filter(|s| s.student_id == student_id)
                .cloned()
                .collect()
        })
    }

    fn add_payment(&self, student_id: i64, payment: &NewPayment) -> Result<Payment, TilawaError> {
        self.mutate(|doc| {
            let stored = Payment {
                id: next_id(&doc.payments, |p| p.id),
                student_id,
                amount: payment.amount,
                currency: payment.currency_code(),
                note: payment.note.clone().unwrap_or_default(),
                paid_at: now(),
            };
            doc.payments.push(stored.clone());
            Ok(stored)
        })
    }

    fn list_payments(&self, student_id: i64) -> Result<Vec<Payment>, TilawaError> {
        self.inspect(|doc| {
            doc.payments
                .iter()
                .filter(|p| p.student_id == student_id)
                .cloned()
                .collect()
        })
    }
}
