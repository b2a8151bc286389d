//! Environment-driven configuration

use std::{env, fmt::Display, net::SocketAddr, ops::RangeInclusive, path::Path, path::PathBuf, str::FromStr};

use tracing::{info, warn};

/// Upper bound on search results regardless of what the client asks for
pub const DEFAULT_SEARCH_CAP: usize = 50;

/// Default number of assembled pages kept in memory
pub const DEFAULT_PAGE_CACHE: usize = 128;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Longest accepted session lifetime, one year
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub quran_file: PathBuf,
    pub tafsir_file: PathBuf,
    pub surahs_file: PathBuf,
    pub students_file: PathBuf,
    /// When set, progress is stored in SQLite at this path instead of the JSON file
    pub database_url: Option<String>,
    pub search_cap: usize,
    pub page_cache: usize,
    pub session_ttl_hours: i64,
    pub login_per_minute: u32,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let data_dir: PathBuf = try_load("TILAWA_DATA_DIR", "data");

        Self {
            bind: try_load("TILAWA_BIND", "127.0.0.1:3000"),
            quran_file: path_or("TILAWA_QURAN_FILE", &data_dir, "quran.json"),
            tafsir_file: path_or("TILAWA_TAFSIR_FILE", &data_dir, "tafsir.json"),
            surahs_file: path_or("TILAWA_SURAHS_FILE", &data_dir, "surahs.json"),
            students_file: path_or("TILAWA_STUDENTS_FILE", &data_dir, "students.json"),
            database_url: var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            search_cap: try_load("TILAWA_SEARCH_CAP", "50"),
            page_cache: try_load("TILAWA_PAGE_CACHE", "128"),
            session_ttl_hours: within(
                "TILAWA_SESSION_TTL_HOURS",
                try_load("TILAWA_SESSION_TTL_HOURS", "24"),
                1..=MAX_SESSION_TTL_HOURS,
                DEFAULT_SESSION_TTL_HOURS,
            ),
            login_per_minute: try_load("TILAWA_LOGIN_PER_MINUTE", "10"),
            cors_origin: var("TILAWA_CORS_ORIGIN").ok(),
            data_dir,
        }
    }

    /// Configuration rooted at `data_dir` with every other value at its default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            quran_file: data_dir.join("quran.json"),
            tafsir_file: data_dir.join("tafsir.json"),
            surahs_file: data_dir.join("surahs.json"),
            students_file: data_dir.join("students.json"),
            database_url: None,
            search_cap: DEFAULT_SEARCH_CAP,
            page_cache: DEFAULT_PAGE_CACHE,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            login_per_minute: 10,
            cors_origin: None,
            data_dir,
        }
    }

    /// SQLite file path from `DATABASE_URL`, accepting a `sqlite://` prefix
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        self.database_url.as_deref().map(|url| {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url);
            PathBuf::from(path)
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| ())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
                .parse()
                .map_err(|e| warn!("Invalid default for {key}: {e}"))
                .expect("Built-in default misconfigured!")
        }
    }
}

fn within<T>(key: &str, value: T, range: RangeInclusive<T>, default: T) -> T
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        value
    } else {
        warn!(
            "{key} value {value} outside {}..={}, using default: {default}",
            range.start(),
            range.end()
        );
        default
    }
}

fn path_or(key: &str, data_dir: &Path, file_name: &str) -> PathBuf {
    var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(file_name))
}
