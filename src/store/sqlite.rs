//! Progress store backed by SQLite

use super::{
    clean_tags, dedupe_names, hash_password, needs_rehash, normalize_email, now, NewNote,
    NewPayment, NewRecitationError, NewStudent, NewStudySession, Payment, ProgressStore,
    ProgressUpdate, RecitationError, StudentAccount, StudentNote, StudentProgress, StudySession,
    VerseRef,
};
use crate::error::TilawaError;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- One row per student; bookmarks and memorized surahs are JSON arrays
CREATE TABLE IF NOT EXISTS student_progress (
    student_id INTEGER PRIMARY KEY,
    last_surah INTEGER NOT NULL DEFAULT 1,
    last_ayah INTEGER NOT NULL DEFAULT 1,
    bookmarked_verses TEXT NOT NULL DEFAULT '[]',
    memorized_surahs TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS student_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    surah_number INTEGER NOT NULL,
    ayah_number INTEGER NOT NULL,
    note TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS student_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    surah_number INTEGER NOT NULL,
    ayah_number INTEGER NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS study_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    paid_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_student_notes_student
ON student_notes(student_id, surah_number);

CREATE INDEX IF NOT EXISTS idx_student_errors_student
ON student_errors(student_id);

CREATE INDEX IF NOT EXISTS idx_study_sessions_student
ON study_sessions(student_id);

CREATE INDEX IF NOT EXISTS idx_payments_student
ON payments(student_id);
"#;

const PROGRESS_COLUMNS: &str =
    "student_id, last_surah, last_ayah, bookmarked_verses, memorized_surahs, updated_at";

/// Opens a fresh connection per operation; single-statement writes rely on
/// SQLite's per-statement atomicity, multi-step ones run in a transaction.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure the schema exists
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, TilawaError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        store.connection()?.execute_batch(SCHEMA)?;
        info!("Progress database ready at {:?}", store.db_path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> Result<Connection, TilawaError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn ensure_progress(conn: &Connection, student_id: i64) -> Result<(), TilawaError> {
        conn.execute(
            "INSERT OR IGNORE INTO student_progress (student_id, updated_at) VALUES (?1, ?2)",
            params![student_id, now()],
        )?;
        Ok(())
    }

    fn load_progress(conn: &Connection, student_id: i64) -> Result<StudentProgress, TilawaError> {
        let sql = format!("SELECT {} FROM student_progress WHERE student_id = ?1", PROGRESS_COLUMNS);
        let (progress, bookmarks, memorized) = conn.query_row(&sql, [student_id], row_to_progress)?;
        Ok(StudentProgress {
            bookmarked_verses: serde_json::from_str(&bookmarks)?,
            memorized_surahs: serde_json::from_str(&memorized)?,
            ..progress
        })
    }
}

fn row_to_account(row: &Row) -> rusqlite::Result<StudentAccount> {
    Ok(StudentAccount {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Progress with its JSON columns still raw, decoded by the caller
fn row_to_progress(row: &Row) -> rusqlite::Result<(StudentProgress, String, String)> {
    Ok((
        StudentProgress {
            student_id: row.get(0)?,
            last_surah: row.get(1)?,
            last_ayah: row.get(2)?,
            bookmarked_verses: Vec::new(),
            memorized_surahs: Vec::new(),
            updated_at: row.get(5)?,
        },
        row.get(3)?,
        row.get(4)?,
    ))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

impl ProgressStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn create_student(&self, new: &NewStudent) -> Result<StudentAccount, TilawaError> {
        let conn = self.connection()?;
        let email = normalize_email(&new.email);
        let created_at = now();

        let inserted = conn.execute(
            "INSERT INTO students (name, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new.name.trim(), email, hash_password(&new.password)?, created_at],
        );

        match inserted {
            Ok(_) => Ok(StudentAccount {
                id: conn.last_insert_rowid(),
                name: new.name.trim().to_string(),
                email,
                created_at,
            }),
            Err(e) if is_unique_violation(&e) => {
                Err(TilawaError::Conflict("email already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_student(&self, id: i64) -> Result<Option<StudentAccount>, TilawaError> {
        let conn = self.connection()?;
        Ok(conn
            .query_row(
                "SELECT id, name, email, created_at FROM students WHERE id = ?1",
                [id],
                row_to_account,
            )
            .optional()?)
    }

    fn credentials(&self, email: &str) -> Result<Option<(StudentAccount, String)>, TilawaError> {
        let conn = self.connection()?;
        Ok(conn
            .query_row(
                "SELECT id, name, email, created_at, password FROM students WHERE email = ?1",
                [normalize_email(email)],
                |row| Ok((row_to_account(row)?, row.get::<_, String>(4)?)),
            )
            .optional()?)
    }

    fn migrate_plaintext_passwords(&self) -> Result<usize, TilawaError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let plaintext: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, password FROM students")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(i64, String)>, _>>()?;
            rows.into_iter().filter(|(_, pw)| needs_rehash(pw)).collect()
        };

        for (id, password) in &plaintext {
            tx.execute(
                "UPDATE students SET password = ?1 WHERE id = ?2",
                params![hash_password(password)?, id],
            )?;
        }
        tx.commit()?;

        if !plaintext.is_empty() {
            info!(migrated = plaintext.len(), "Rehashed plaintext passwords");
        }
        Ok(plaintext.len())
    }

    fn get_progress(&self, student_id: i64) -> Result<StudentProgress, TilawaError> {
        let conn = self.connection()?;
        Self::ensure_progress(&conn, student_id)?;
        Self::load_progress(&conn, student_id)
    }

    fn update_progress(&self, student_id: i64, update: &ProgressUpdate) -> Result<StudentProgress, TilawaError> {
        let conn = self.connection()?;
        Self::ensure_progress(&conn, student_id)?;

        let bookmarks = update
            .bookmarked_verses
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let memorized = update
            .memorized_surahs
            .as_ref()
            .map(|names| serde_json::to_string(&dedupe_names(names)))
            .transpose()?;

        conn.execute(
            "UPDATE student_progress SET
                last_surah = COALESCE(?2, last_surah),
                last_ayah = COALESCE(?3, last_ayah),
                bookmarked_verses = COALESCE(?4, bookmarked_verses),
                memorized_surahs = COALESCE(?5, memorized_surahs),
                updated_at = ?6
             WHERE student_id = ?1",
            params![student_id, update.last_surah, update.last_ayah, bookmarks, memorized, now()],
        )?;

        Self::load_progress(&conn, student_id)
    }

    fn toggle_bookmark(&self, student_id: i64, verse: VerseRef) -> Result<StudentProgress, TilawaError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        Self::ensure_progress(&tx, student_id)?;
        let mut progress = Self::load_progress(&tx, student_id)?;
        progress.toggle_bookmark(verse);

        tx.execute(
            "UPDATE student_progress SET bookmarked_verses = ?2, updated_at = ?3 WHERE student_id = ?1",
            params![
                student_id,
                serde_json::to_string(&progress.bookmarked_verses)?,
                progress.updated_at
            ],
        )?;
        tx.commit()?;

        Ok(progress)
    }

    fn add_note(&self, student_id: i64, note: &NewNote) -> Result<StudentNote, TilawaError> {
        let conn = self.connection()?;
        let tags = clean_tags(note.tags.as_ref());
        let created_at = now();

        conn.execute(
            "INSERT INTO student_notes (student_id, surah_number, ayah_number, note, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student_id,
                note.surah_number,
                note.ayah_number,
                note.note.trim(),
                serde_json::to_string(&tags)?,
                created_at
            ],
        )?;

        Ok(StudentNote {
            id: conn.last_insert_rowid(),
            student_id,
            surah_number: note.surah_number,
            ayah_number: note.ayah_number,
            note: note.note.trim().to_string(),
            tags,
            created_at,
        })
    }

    fn list_notes(&self, student_id: i64, surah: Option<u16>) -> Result<Vec<StudentNote>, TilawaError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, student_id, surah_number, ayah_number, note, tags, created_at
             FROM student_notes
             WHERE student_id = ?1 AND (?2 IS NULL OR surah_number = ?2)
             ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map(params![student_id, surah], |row| {
                Ok((
                    StudentNote {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        surah_number: row.get(2)?,
                        ayah_number: row.get(3)?,
                        note: row.get(4)?,
                        tags: Vec::new(),
                        created_at: row.get(6)?,
                    },
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(note, tags)| {
                Ok(StudentNote {
                    tags: serde_json::from_str(&tags)?,
                    ..note
                })
            })
            .collect()
    }

    fn add_error(&self, student_id: i64, error: &NewRecitationError) -> Result<RecitationError, TilawaError> {
        let conn = self.connection()?;
        let created_at = now();

        conn.execute(
            "INSERT INTO student_errors (student_id, surah_number, ayah_number, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                student_id,
                error.surah_number,
                error.ayah_number,
                error.description.trim(),
                created_at
            ],
        )?;

        Ok(RecitationError {
            id: conn.last_insert_rowid(),
            student_id,
            surah_number: error.surah_number,
            ayah_number: error.ayah_number,
            description: error.description.trim().to_string(),
            created_at,
        })
    }

    fn list_errors(&self, student_id: i64) -> Result<Vec<RecitationError>, TilawaError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, student_id, surah_number, ayah_number, description, created_at
             FROM student_errors WHERE student_id = ?1 ORDER BY id ASC",
        )?;

        let errors = stmt
            .query_map([student_id], |row| {
                Ok(RecitationError {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    surah_number: row.get(2)?,
                    ayah_number: row.get(3)?,
                    description: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(errors)
    }

    fn add_session(&self, student_id: i64, session: &NewStudySession) -> Result<StudySession, TilawaError> {
        let conn = self.connection()?;
        let started_at = session.started_at.clone().unwrap_or_else(now);
        let notes = session.notes.clone().unwrap_or_default();

        conn.execute(
            "INSERT INTO study_sessions (student_id, started_at, duration_minutes, notes)
             VALUES (?1, ?2, ?3, ?4)",
            params![student_id, started_at, session.duration_minutes, notes],
        )?;

        Ok(StudySession {
            id: conn.last_insert_rowid(),
            student_id,
            started_at,
            duration_minutes: session.duration_minutes,
            notes,
        })
    }

    fn list_sessions(&self, student_id: i64) -> Result<Vec<StudySession>, TilawaError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, student_id, started_at, duration_minutes, notes
             FROM study_sessions WHERE student_id = ?1 ORDER BY id ASC",
        )?;

        let sessions = stmt
            .query_map([student_id], |row| {
                Ok(StudySession {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    started_at: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    notes: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn add_payment(&self, student_id: i64, payment: &NewPayment) -> Result<Payment, TilawaError> {
        let conn = self.connection()?;
        let currency = payment.currency_code();
        let note = payment.note.clone().unwrap_or_default();
        let paid_at = now();

        conn.execute(
            "INSERT INTO payments (student_id, amount, currency, note, paid_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![student_id, payment.amount, currency, note, paid_at],
        )?;

        Ok(Payment {
            id: conn.last_insert_rowid(),
            student_id,
            amount: payment.amount,
            currency,
            note,
            paid_at,
        })
    }

    fn list_payments(&self, student_id: i64) -> Result<Vec<Payment>, TilawaError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, student_id, amount, currency, note, paid_at
             FROM payments WHERE student_id = ?1 ORDER BY id ASC",
        )?;

        let payments = stmt
            .query_map([student_id], |row| {
                Ok(Payment {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    amount: row.get(2)?,
                    currency: row.get(3)?,
                    note: row.get(4)?,
                    paid_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payments)
    }
}
