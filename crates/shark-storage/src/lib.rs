use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use shark_core::{
    keys, Epic, EpicPriority, Feature, ItemStatus, Task, TaskHistoryEntry, TaskStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const SYNC_SCHEMA_VERSION: i64 = 1;
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

const KEY_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpic {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub status: ItemStatus,
    pub priority: EpicPriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeature {
    pub epic_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskHistory {
    pub task_id: i64,
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub agent: Option<String>,
    pub notes: Option<String>,
}

/// Partial update of the descriptive columns shared by every work item.
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_path: Option<String>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.file_path.is_none()
    }
}

pub struct SyncStore {
    conn: Connection,
}

impl SyncStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.configure_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.configure_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
        ))?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SYNC_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SYNC_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_sync_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        self.repo().table_exists(table_name)
    }

    /// Queries outside of any explicit transaction (autocommit).
    pub fn repo(&self) -> Repository<'_> {
        Repository { conn: &self.conn }
    }

    /// Starts the single transaction a sync run performs all of its writes in.
    pub fn transaction(&mut self) -> Result<StoreTransaction<'_>, StorageError> {
        let tx = self.conn.transaction()?;
        Ok(StoreTransaction { tx })
    }
}

/// Open write transaction. Dropping it without `commit` rolls everything back.
pub struct StoreTransaction<'c> {
    tx: Transaction<'c>,
}

impl<'c> StoreTransaction<'c> {
    pub fn repo(&self) -> Repository<'_> {
        Repository { conn: &self.tx }
    }

    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback()?;
        Ok(())
    }
}

/// Plain record access over either the bare connection or an open transaction.
#[derive(Clone, Copy)]
pub struct Repository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> {
    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn insert_epic(&self, epic: &NewEpic) -> Result<Epic, StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "
            INSERT INTO epics (
                key,
                title,
                description,
                status,
                priority,
                file_path,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ",
            params![
                epic.key,
                epic.title,
                epic.description,
                epic.status.as_str(),
                epic.priority.as_str(),
                epic.file_path,
                now,
            ],
        )?;
        self.require_epic(&epic.key)
    }

    pub fn epic_by_key(&self, key: &str) -> Result<Option<Epic>, StorageError> {
        let epic = self
            .conn
            .query_row(
                "
                SELECT id, key, title, description, status, priority, file_path,
                       created_at, updated_at
                FROM epics
                WHERE key = ?1
                ",
                [key],
                epic_from_row,
            )
            .optional()?;
        Ok(epic)
    }

    fn require_epic(&self, key: &str) -> Result<Epic, StorageError> {
        self.epic_by_key(key)?.ok_or_else(|| StorageError::NotFound {
            kind: "epic",
            key: key.to_string(),
        })
    }

    pub fn epics(&self) -> Result<Vec<Epic>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, key, title, description, status, priority, file_path,
                   created_at, updated_at
            FROM epics
            ORDER BY key ASC
            ",
        )?;
        let rows = stmt.query_map([], epic_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_epic(&self, key: &str, update: &ItemUpdate) -> Result<bool, StorageError> {
        if update.is_empty() {
            return Ok(false);
        }
        let changes = self.conn.execute(
            "
            UPDATE epics SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                file_path = COALESCE(?4, file_path),
                updated_at = ?5
            WHERE key = ?1
            ",
            params![
                key,
                update.title,
                update.description,
                update.file_path,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changes > 0)
    }

    pub fn insert_feature(&self, feature: &NewFeature) -> Result<Feature, StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "
            INSERT INTO features (
                epic_id,
                key,
                title,
                description,
                status,
                file_path,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ",
            params![
                feature.epic_id,
                feature.key,
                feature.title,
                feature.description,
                feature.status.as_str(),
                feature.file_path,
                now,
            ],
        )?;
        self.feature_by_key(&feature.key)?
            .ok_or_else(|| StorageError::NotFound {
                kind: "feature",
                key: feature.key.clone(),
            })
    }

    pub fn feature_by_key(&self, key: &str) -> Result<Option<Feature>, StorageError> {
        let feature = self
            .conn
            .query_row(
                "
                SELECT id, epic_id, key, title, description, status, file_path,
                       created_at, updated_at
                FROM features
                WHERE key = ?1
                ",
                [key],
                feature_from_row,
            )
            .optional()?;
        Ok(feature)
    }

    pub fn features(&self) -> Result<Vec<Feature>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, epic_id, key, title, description, status, file_path,
                   created_at, updated_at
            FROM features
            ORDER BY key ASC
            ",
        )?;
        let rows = stmt.query_map([], feature_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_feature(&self, key: &str, update: &ItemUpdate) -> Result<bool, StorageError> {
        if update.is_empty() {
            return Ok(false);
        }
        let changes = self.conn.execute(
            "
            UPDATE features SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                file_path = COALESCE(?4, file_path),
                updated_at = ?5
            WHERE key = ?1
            ",
            params![
                key,
                update.title,
                update.description,
                update.file_path,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changes > 0)
    }

    /// Moves a feature (and with it, its tasks) under another epic.
    pub fn reparent_feature(&self, key: &str, epic_id: i64) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE features SET epic_id = ?2, updated_at = ?3
            WHERE key = ?1 AND epic_id != ?2
            ",
            params![key, epic_id, Utc::now().to_rfc3339()],
        )?;
        Ok(changes > 0)
    }

    pub fn insert_task(&self, task: &NewTask) -> Result<Task, StorageError> {
        let now = Utc::now().to_rfc3339();
        if let Some(path) = &task.file_path {
            self.release_task_file_path(path, None, &now)?;
        }
        self.conn.execute(
            "
            INSERT INTO tasks (
                feature_id,
                key,
                title,
                description,
                status,
                priority,
                file_path,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ",
            params![
                task.feature_id,
                task.key,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority,
                task.file_path,
                now,
            ],
        )?;
        self.task_by_key(&task.key)?
            .ok_or_else(|| StorageError::NotFound {
                kind: "task",
                key: task.key.clone(),
            })
    }

    pub fn task_by_key(&self, key: &str) -> Result<Option<Task>, StorageError> {
        let task = self
            .conn
            .query_row(
                "
                SELECT id, feature_id, key, title, description, status, priority,
                       assigned_agent, file_path, created_at, updated_at
                FROM tasks
                WHERE key = ?1
                ",
                [key],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Bulk fetch keyed by task key; keys without a record are simply absent.
    pub fn tasks_by_keys(&self, keys: &[String]) -> Result<BTreeMap<String, Task>, StorageError> {
        let mut found = BTreeMap::new();
        for chunk in keys.chunks(KEY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "
                SELECT id, feature_id, key, title, description, status, priority,
                       assigned_agent, file_path, created_at, updated_at
                FROM tasks
                WHERE key IN ({placeholders})
                "
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), task_from_row)?;
            for task in rows {
                let task = task?;
                found.insert(task.key.clone(), task);
            }
        }
        Ok(found)
    }

    pub fn tasks(&self) -> Result<Vec<Task>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, feature_id, key, title, description, status, priority,
                   assigned_agent, file_path, created_at, updated_at
            FROM tasks
            ORDER BY key ASC
            ",
        )?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn tasks_with_file_path(&self) -> Result<Vec<Task>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, feature_id, key, title, description, status, priority,
                   assigned_agent, file_path, created_at, updated_at
            FROM tasks
            WHERE file_path IS NOT NULL
            ORDER BY key ASC
            ",
        )?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn task_file_paths(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path FROM tasks WHERE file_path IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    pub fn task_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
    }

    /// Writes title/description; status, priority and agent are not reachable here.
    pub fn update_task(&self, key: &str, update: &ItemUpdate) -> Result<bool, StorageError> {
        if update.is_empty() {
            return Ok(false);
        }
        let now = Utc::now().to_rfc3339();
        if let Some(path) = &update.file_path {
            let task = self.task_by_key(key)?.ok_or_else(|| StorageError::NotFound {
                kind: "task",
                key: key.to_string(),
            })?;
            self.release_task_file_path(path, Some(task.id), &now)?;
        }
        let changes = self.conn.execute(
            "
            UPDATE tasks SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                file_path = COALESCE(?4, file_path),
                updated_at = ?5
            WHERE key = ?1
            ",
            params![key, update.title, update.description, update.file_path, now],
        )?;
        Ok(changes > 0)
    }

    /// Nulls `path` on every task other than `keep`, returning how many were released.
    fn release_task_file_path(
        &self,
        path: &str,
        keep: Option<i64>,
        now: &str,
    ) -> Result<usize, StorageError> {
        let released = self.conn.execute(
            "
            UPDATE tasks SET file_path = NULL, updated_at = ?3
            WHERE file_path = ?1 AND (?2 IS NULL OR id != ?2)
            ",
            params![path, keep, now],
        )?;
        Ok(released)
    }

    pub fn delete_task(&self, key: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM tasks WHERE key = ?1", [key])?;
        Ok(changes > 0)
    }

    /// Highest task sequence already used under a feature.
    pub fn max_task_sequence(&self, feature_key: &str) -> Result<Option<u32>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT t.key
            FROM tasks t
            JOIN features f ON f.id = t.feature_id
            WHERE f.key = ?1
            ",
        )?;
        let rows = stmt.query_map([feature_key], |row| row.get::<_, String>(0))?;
        let mut max = None;
        for key in rows {
            let key = key?;
            if let Some(parts) = keys::parse_task_key(&key) {
                if parts.feature_key == feature_key {
                    max = max.max(Some(parts.sequence));
                }
            }
        }
        Ok(max)
    }

    pub fn insert_task_history(&self, entry: &NewTaskHistory) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO task_history (
                task_id,
                old_status,
                new_status,
                agent,
                notes,
                timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                entry.task_id,
                entry.old_status.map(|status| status.as_str()),
                entry.new_status.as_str(),
                entry.agent,
                entry.notes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn task_history(&self, task_id: i64) -> Result<Vec<TaskHistoryEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, task_id, old_status, new_status, agent, notes, timestamp
            FROM task_history
            WHERE task_id = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            let old_status: Option<String> = row.get(2)?;
            let old_status = old_status
                .map(|value| parse_column::<TaskStatus>(2, &value))
                .transpose()?;
            let new_status: String = row.get(3)?;
            Ok(TaskHistoryEntry {
                id: row.get(0)?,
                task_id: row.get(1)?,
                old_status,
                new_status: parse_column(3, &new_status)?,
                agent: row.get(4)?,
                notes: row.get(5)?,
                timestamp: timestamp_column(row, 6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn history_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM task_history", [], |row| row.get(0))?)
    }
}

fn epic_from_row(row: &Row<'_>) -> rusqlite::Result<Epic> {
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    Ok(Epic {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_column(4, &status)?,
        priority: parse_column(5, &priority)?,
        file_path: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<Feature> {
    let status: String = row.get(5)?;
    Ok(Feature {
        id: row.get(0)?,
        epic_id: row.get(1)?,
        key: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parse_column(5, &status)?,
        file_path: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        feature_id: row.get(1)?,
        key: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parse_column(5, &status)?,
        priority: row.get(6)?,
        assigned_agent: row.get(7)?,
        file_path: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_timestamp(&value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn seed_feature(store: &SyncStore, epic_key: &str, feature_key: &str) -> Feature {
        let repo = store.repo();
        let epic = match repo.epic_by_key(epic_key).expect("lookup epic") {
            Some(epic) => epic,
            None => repo
                .insert_epic(&NewEpic {
                    key: epic_key.to_string(),
                    title: format!("Epic {epic_key}"),
                    description: None,
                    file_path: None,
                    status: ItemStatus::Active,
                    priority: EpicPriority::Medium,
                })
                .expect("insert epic"),
        };
        repo.insert_feature(&NewFeature {
            epic_id: epic.id,
            key: feature_key.to_string(),
            title: format!("Feature {feature_key}"),
            description: None,
            file_path: None,
            status: ItemStatus::Active,
        })
        .expect("insert feature")
    }

    fn new_task(feature: &Feature, key: &str, path: Option<&str>) -> NewTask {
        NewTask {
            feature_id: feature.id,
            key: key.to_string(),
            title: format!("Task {key}"),
            description: None,
            file_path: path.map(str::to_string),
            status: TaskStatus::INITIAL,
            priority: shark_core::DEFAULT_TASK_PRIORITY,
        }
    }

    #[test]
    fn migration_creates_sync_tables() {
        let db = SyncStore::open_in_memory().expect("open db");
        for table in ["epics", "features", "tasks", "task_history"] {
            assert!(db.table_exists(table).expect("table check"));
        }
        assert_eq!(
            db.schema_version().expect("schema version"),
            SYNC_SCHEMA_VERSION
        );
    }

    #[test]
    fn reopening_a_file_database_is_idempotent() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let db = SyncStore::open(file.path()).expect("open db");
            seed_feature(&db, "E01", "E01-F01");
        }
        let db = SyncStore::open(file.path()).expect("reopen db");
        assert_eq!(db.schema_version().expect("version"), SYNC_SCHEMA_VERSION);
        assert!(db
            .repo()
            .feature_by_key("E01-F01")
            .expect("lookup")
            .is_some());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("raw open");
            conn.execute("PRAGMA user_version = 99", [])
                .expect("bump version");
        }
        let err = SyncStore::open(file.path()).err().expect("must fail");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 99, .. }
        ));
    }

    #[test]
    fn task_roundtrip_and_bulk_lookup() {
        let db = SyncStore::open_in_memory().expect("open db");
        let feature = seed_feature(&db, "E01", "E01-F01");
        let repo = db.repo();

        let created = repo
            .insert_task(&new_task(&feature, "T-E01-F01-001", Some("/docs/a.md")))
            .expect("insert task");
        assert_eq!(created.status, TaskStatus::Todo);
        assert_eq!(created.priority, 5);
        repo.insert_task(&new_task(&feature, "T-E01-F01-002", None))
            .expect("insert second");

        let found = repo
            .tasks_by_keys(&[
                "T-E01-F01-001".to_string(),
                "T-E01-F01-002".to_string(),
                "T-E09-F09-009".to_string(),
            ])
            .expect("bulk fetch");
        assert_eq!(found.len(), 2);
        assert_eq!(
            found["T-E01-F01-001"].file_path.as_deref(),
            Some("/docs/a.md")
        );
        assert_eq!(repo.max_task_sequence("E01-F01").expect("max"), Some(2));
        assert_eq!(repo.max_task_sequence("E01-F02").expect("max"), None);
    }

    #[test]
    fn update_task_never_touches_status_and_refreshes_updated_at() {
        let db = SyncStore::open_in_memory().expect("open db");
        let feature = seed_feature(&db, "E01", "E01-F01");
        let repo = db.repo();
        let created = repo
            .insert_task(&new_task(&feature, "T-E01-F01-001", None))
            .expect("insert");

        let changed = repo
            .update_task(
                "T-E01-F01-001",
                &ItemUpdate {
                    title: Some("Renamed".to_string()),
                    ..ItemUpdate::default()
                },
            )
            .expect("update");
        assert!(changed);
        let updated = repo
            .task_by_key("T-E01-F01-001")
            .expect("lookup")
            .expect("exists");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.status, created.status);
        assert_eq!(updated.description, None);
        assert!(updated.updated_at >= created.updated_at);
        assert!(!repo
            .update_task("T-E01-F01-001", &ItemUpdate::default())
            .expect("noop"));
    }

    #[test]
    fn claiming_a_path_releases_the_previous_owner() {
        let db = SyncStore::open_in_memory().expect("open db");
        let feature = seed_feature(&db, "E01", "E01-F01");
        let repo = db.repo();
        repo.insert_task(&new_task(&feature, "T-E01-F01-001", Some("/docs/a.md")))
            .expect("insert first");
        repo.insert_task(&new_task(&feature, "T-E01-F01-002", Some("/docs/b.md")))
            .expect("insert second");

        repo.update_task(
            "T-E01-F01-002",
            &ItemUpdate {
                file_path: Some("/docs/a.md".to_string()),
                ..ItemUpdate::default()
            },
        )
        .expect("claim path");

        let first = repo
            .task_by_key("T-E01-F01-001")
            .expect("lookup")
            .expect("exists");
        let second = repo
            .task_by_key("T-E01-F01-002")
            .expect("lookup")
            .expect("exists");
        assert_eq!(first.file_path, None);
        assert_eq!(second.file_path.as_deref(), Some("/docs/a.md"));

        repo.insert_task(&new_task(&feature, "T-E01-F01-003", Some("/docs/a.md")))
            .expect("insert claiming path");
        let paths = repo.task_file_paths().expect("paths");
        assert_eq!(paths.len(), 1);
        assert_eq!(
            repo.tasks_with_file_path().expect("with path")[0].key,
            "T-E01-F01-003"
        );
    }

    #[test]
    fn deleting_an_epic_cascades_to_features_tasks_and_history() {
        let db = SyncStore::open_in_memory().expect("open db");
        let feature = seed_feature(&db, "E01", "E01-F01");
        let repo = db.repo();
        let task = repo
            .insert_task(&new_task(&feature, "T-E01-F01-001", None))
            .expect("insert");
        repo.insert_task_history(&NewTaskHistory {
            task_id: task.id,
            old_status: None,
            new_status: TaskStatus::Todo,
            agent: Some("sync".to_string()),
            notes: Some("Imported from file".to_string()),
        })
        .expect("history");
        let history = repo.task_history(task.id).expect("history rows");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, None);
        assert_eq!(history[0].notes.as_deref(), Some("Imported from file"));

        db.conn
            .execute("DELETE FROM epics WHERE key = 'E01'", [])
            .expect("delete epic");
        assert!(repo.feature_by_key("E01-F01").expect("lookup").is_none());
        assert_eq!(repo.task_count().expect("count"), 0);
        assert_eq!(repo.history_count().expect("count"), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut db = SyncStore::open_in_memory().expect("open db");
        let feature = seed_feature(&db, "E01", "E01-F01");
        {
            let tx = db.transaction().expect("begin");
            tx.repo()
                .insert_task(&new_task(&feature, "T-E01-F01-001", None))
                .expect("insert in tx");
            assert_eq!(tx.repo().task_count().expect("count in tx"), 1);
        }
        assert_eq!(db.repo().task_count().expect("count"), 0);

        let tx = db.transaction().expect("begin");
        tx.repo()
            .insert_task(&new_task(&feature, "T-E01-F01-001", None))
            .expect("insert in tx");
        tx.commit().expect("commit");
        assert_eq!(db.repo().task_count().expect("count"), 1);
    }

    #[test]
    fn epic_and_feature_updates_coalesce_missing_fields() {
        let db = SyncStore::open_in_memory().expect("open db");
        seed_feature(&db, "E01", "E01-F01");
        let second = db
            .repo()
            .insert_epic(&NewEpic {
                key: "E02".to_string(),
                title: "Second".to_string(),
                description: None,
                file_path: None,
                status: ItemStatus::Active,
                priority: EpicPriority::High,
            })
            .expect("insert epic");
        let repo = db.repo();

        repo.update_epic(
            "E01",
            &ItemUpdate {
                description: Some("Core work".to_string()),
                ..ItemUpdate::default()
            },
        )
        .expect("update epic");
        let epic = repo.epic_by_key("E01").expect("lookup").expect("exists");
        assert_eq!(epic.title, "Epic E01");
        assert_eq!(epic.description.as_deref(), Some("Core work"));

        assert!(repo.reparent_feature("E01-F01", second.id).expect("reparent"));
        assert!(!repo.reparent_feature("E01-F01", second.id).expect("noop"));
        let feature = repo
            .feature_by_key("E01-F01")
            .expect("lookup")
            .expect("exists");
        assert_eq!(feature.epic_id, second.id);
        assert_eq!(repo.epics().expect("epics").len(), 2);
        assert_eq!(repo.features().expect("features").len(), 1);
    }
}
