//! Read-only access to the ticketing system's database, the authority on
//! which work-log entries really exist.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::RecordSystemError;
use crate::state_machine::TargetId;

/// Inclusive time range, converted to epoch milliseconds for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn from_millis(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.to.timestamp_millis()
    }
}

/// A task row as stored in the system of record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntry {
    pub entry_id: i64,
    pub title: String,
    pub spent_hours: f64,
    pub estimated_hours: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of the marker-less diagnostic count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCount {
    pub count: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

pub trait SystemOfRecord: Send + Sync {
    /// Entries attached to `target` created inside `window` whose description
    /// contains `fragment` (a `LIKE '%fragment%'` match).
    fn find_entries(
        &self,
        target: TargetId,
        window: &TimeWindow,
        fragment: &str,
    ) -> Result<Vec<RecordedEntry>, RecordSystemError>;

    /// Every entry attached to `target` inside `window`, regardless of text.
    fn count_entries(
        &self,
        target: TargetId,
        window: &TimeWindow,
    ) -> Result<WindowCount, RecordSystemError>;
}

/// Titles of the most recently opened tasks, newest first.
pub trait RecentTitles: Send + Sync {
    fn recent_titles(&self, limit: usize) -> Result<Vec<String>, RecordSystemError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    task_id INTEGER PRIMARY KEY,
    target_id INTEGER NOT NULL,
    title TEXT,
    description TEXT,
    spent_hours TEXT,
    estimated_hours TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_target_created ON tasks (target_id, created_at);
";

// Hours are stored as text with a decimal comma.
const FIND_ENTRIES_SQL: &str = "
SELECT DISTINCT
    task_id,
    COALESCE(title, ''),
    CAST(REPLACE(COALESCE(spent_hours, ''), ',', '.') AS REAL),
    CAST(REPLACE(COALESCE(estimated_hours, ''), ',', '.') AS REAL),
    created_at
FROM tasks
WHERE target_id = ?1
  AND created_at >= ?2
  AND created_at <= ?3
  AND description LIKE ?4 ESCAPE '\\'
ORDER BY created_at, task_id
";

const COUNT_ENTRIES_SQL: &str = "
SELECT COUNT(*), MIN(created_at), MAX(created_at)
FROM tasks
WHERE target_id = ?1
  AND created_at >= ?2
  AND created_at <= ?3
";

const RECENT_TITLES_SQL: &str = "
SELECT title
FROM tasks
WHERE title IS NOT NULL AND TRIM(title) <> ''
ORDER BY created_at DESC, task_id DESC
LIMIT ?1
";

/// System of record backed by a SQLite database file.
pub struct SqliteSystemOfRecord {
    database_path: PathBuf,
}

impl SqliteSystemOfRecord {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Creates the `tasks` table when missing. Used for local mirrors and tests.
    pub fn ensure_schema(&self) -> Result<(), RecordSystemError> {
        self.with_connection(|connection| connection.execute_batch(SCHEMA))
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, RecordSystemError> {
        let connection = Connection::open(&self.database_path)?;
        Ok(operation(&connection)?)
    }
}

impl SystemOfRecord for SqliteSystemOfRecord {
    fn find_entries(
        &self,
        target: TargetId,
        window: &TimeWindow,
        fragment: &str,
    ) -> Result<Vec<RecordedEntry>, RecordSystemError> {
        let rows = self.with_connection(|connection| {
            let mut statement = connection.prepare(FIND_ENTRIES_SQL)?;
            let rows = statement.query_map(
                params![
                    target.0,
                    window.from_millis(),
                    window.to_millis(),
                    like_pattern(fragment)
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(entry_id, title, spent_hours, estimated_hours, created_ms)| {
                Ok(RecordedEntry {
                    entry_id,
                    title,
                    spent_hours,
                    estimated_hours,
                    created_at: from_millis(created_ms)?,
                })
            })
            .collect()
    }

    fn count_entries(
        &self,
        target: TargetId,
        window: &TimeWindow,
    ) -> Result<WindowCount, RecordSystemError> {
        let (count, earliest, latest) = self.with_connection(|connection| {
            connection.query_row(
                COUNT_ENTRIES_SQL,
                params![target.0, window.from_millis(), window.to_millis()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
        })?;

        Ok(WindowCount {
            count: u64::try_from(count).unwrap_or_default(),
            earliest: earliest.map(from_millis).transpose()?,
            latest: latest.map(from_millis).transpose()?,
        })
    }
}

impl RecentTitles for SqliteSystemOfRecord {
    fn recent_titles(&self, limit: usize) -> Result<Vec<String>, RecordSystemError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|connection| {
            let mut statement = connection.prepare(RECENT_TITLES_SQL)?;
            let titles = statement
                .query_map(params![limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(titles)
        })
    }
}

/// `%fragment%` with LIKE wildcards in the fragment escaped.
pub fn like_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, RecordSystemError> {
    DateTime::from_timestamp_millis(ms).ok_or(RecordSystemError::InvalidTimestamp(ms))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Inserts one task row into a database created with `ensure_schema`.
    pub fn insert_task(
        store: &SqliteSystemOfRecord,
        task_id: i64,
        target: i64,
        title: &str,
        description: &str,
        spent: &str,
        created_at: DateTime<Utc>,
    ) {
        let connection = Connection::open(store.database_path()).unwrap();
        connection
            .execute(
                "INSERT INTO tasks (task_id, target_id, title, description, spent_hours, estimated_hours, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
                params![
                    task_id,
                    target,
                    title,
                    description,
                    spent,
                    created_at.timestamp_millis()
                ],
            )
            .unwrap();
    }

    pub fn fresh_store() -> (tempfile::TempDir, SqliteSystemOfRecord) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSystemOfRecord::new(dir.path().join("servicedesk.db"));
        store.ensure_schema().unwrap();
        (dir, store)
    }
}
