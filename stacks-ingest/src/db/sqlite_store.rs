//! SQLite implementation of the store traits
//!
//! Ids are UUID text, timestamps RFC 3339 text with a fixed microsecond
//! precision so string comparison in SQL orders them correctly.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use stacks_common::db::{
    Library, LibraryType, ProductionRecord, QuarantineRecord, RecordStatus, StagingRecord,
};
use stacks_common::{Error, Result};
use std::path::PathBuf;
use uuid::Uuid;

use super::{ItemStore, LibraryStore, QuarantineStore, SettingsStore};

const STAGING_COLUMNS: &str = "id, name, directory, filename, relative_path, content_hash, size_bytes, \
     artist, album, original_path, status, promoted_to, created_at, updated_at";

const PRODUCTION_COLUMNS: &str = "id, library_id, staging_id, name, directory, filename, relative_path, \
     content_hash, size_bytes, artist, album, status, created_at, updated_at";

/// Store backed by one SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn fmt_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Bad timestamp '{}': {}", value, e)))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidInput(format!("Bad uuid '{}': {}", value, e)))
}

fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn library_from_row(row: &SqliteRow) -> Result<Library> {
    let id: String = row.try_get("id")?;
    let path: String = row.try_get("path")?;
    let library_type: String = row.try_get("library_type")?;
    let locked: i64 = row.try_get("locked")?;

    Ok(Library {
        id: parse_uuid(&id)?,
        name: row.try_get("name")?,
        path: PathBuf::from(path),
        library_type: library_type.parse::<LibraryType>()?,
        locked: locked != 0,
    })
}

fn staging_from_row(row: &SqliteRow) -> Result<StagingRecord> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let size: i64 = row.try_get("size_bytes")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StagingRecord {
        id: parse_uuid(&id)?,
        name: row.try_get("name")?,
        directory: row.try_get("directory")?,
        filename: row.try_get("filename")?,
        relative_path: row.try_get("relative_path")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: size.max(0) as u64,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        original_path: row.try_get("original_path")?,
        status: status.parse()?,
        promoted_to: parse_optional_uuid(row.try_get("promoted_to")?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn production_from_row(row: &SqliteRow) -> Result<ProductionRecord> {
    let id: String = row.try_get("id")?;
    let library_id: String = row.try_get("library_id")?;
    let status: String = row.try_get("status")?;
    let size: i64 = row.try_get("size_bytes")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ProductionRecord {
        id: parse_uuid(&id)?,
        library_id: parse_uuid(&library_id)?,
        staging_id: parse_optional_uuid(row.try_get("staging_id")?)?,
        name: row.try_get("name")?,
        directory: row.try_get("directory")?,
        filename: row.try_get("filename")?,
        relative_path: row.try_get("relative_path")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: size.max(0) as u64,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        status: status.parse()?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn quarantine_from_row(row: &SqliteRow) -> Result<QuarantineRecord> {
    let id: String = row.try_get("id")?;
    let reason: String = row.try_get("reason")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(QuarantineRecord {
        id: parse_uuid(&id)?,
        file_path: row.try_get("file_path")?,
        original_path: row.try_get("original_path")?,
        reason: reason.parse()?,
        message: row.try_get("message")?,
        library_id: parse_optional_uuid(row.try_get("library_id")?)?,
        created_at: parse_time(&created_at)?,
    })
}

/// Fail with NotFound when an update touched no row
fn expect_one(rows: u64, what: &str, id: Uuid) -> Result<()> {
    if rows == 0 {
        return Err(Error::NotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

#[async_trait]
impl LibraryStore for SqliteStore {
    async fn insert_library(&self, library: &Library) -> Result<()> {
        sqlx::query(
            "INSERT INTO libraries (id, name, path, library_type, locked) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(library.id.to_string())
        .bind(&library.name)
        .bind(library.path.to_string_lossy().into_owned())
        .bind(library.library_type.as_str())
        .bind(library.locked as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_library(&self, id: Uuid) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT id, name, path, library_type, locked FROM libraries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(library_from_row).transpose()
    }

    async fn find_library_by_name(&self, name: &str) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT id, name, path, library_type, locked FROM libraries WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(library_from_row).transpose()
    }

    async fn list_libraries(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query("SELECT id, name, path, library_type, locked FROM libraries ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(library_from_row).collect()
    }

    async fn set_library_locked(&self, id: Uuid, locked: bool) -> Result<()> {
        let result = sqlx::query("UPDATE libraries SET locked = ? WHERE id = ?")
            .bind(locked as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "library", id)
    }

    async fn library_usage_bytes(&self, id: Uuid) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM production_items WHERE library_id = ? AND status = 'committed'",
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert_staging_pending(&self, record: &StagingRecord, reject_duplicate_content: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO staging_items (id, name, directory, filename, relative_path, content_hash, size_bytes,
                                       artist, album, original_path, status, promoted_to, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?
            WHERE ? = 0 OR (
                NOT EXISTS (SELECT 1 FROM staging_items WHERE content_hash = ? AND status != 'quarantined')
                AND NOT EXISTS (SELECT 1 FROM production_items WHERE content_hash = ?)
            )
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.directory)
        .bind(&record.filename)
        .bind(&record.relative_path)
        .bind(&record.content_hash)
        .bind(record.size_bytes as i64)
        .bind(&record.artist)
        .bind(&record.album)
        .bind(&record.original_path)
        .bind(fmt_time(&record.created_at))
        .bind(fmt_time(&record.updated_at))
        .bind(reject_duplicate_content as i64)
        .bind(&record.content_hash)
        .bind(&record.content_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit_staging(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE staging_items SET status = 'committed', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(fmt_time(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "pending staging item", id)
    }

    async fn discard_staging(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM staging_items WHERE id = ? AND status = 'pending'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_staging(&self, id: Uuid) -> Result<Option<StagingRecord>> {
        let sql = format!("SELECT {} FROM staging_items WHERE id = ?", STAGING_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(staging_from_row).transpose()
    }

    async fn list_staging(&self, status: RecordStatus) -> Result<Vec<StagingRecord>> {
        let sql = format!(
            "SELECT {} FROM staging_items WHERE status = ? ORDER BY created_at",
            STAGING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(staging_from_row).collect()
    }

    async fn mark_staging_promoted(&self, id: Uuid, production_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE staging_items SET status = 'promoted', promoted_to = ?, updated_at = ? \
             WHERE id = ? AND status = 'committed'",
        )
        .bind(production_id.to_string())
        .bind(fmt_time(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "committed staging item", id)
    }

    async fn mark_staging_quarantined(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE staging_items SET status = 'quarantined', updated_at = ? WHERE id = ? AND status = 'committed'",
        )
        .bind(fmt_time(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "committed staging item", id)
    }

    async fn insert_production_pending(&self, record: &ProductionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO production_items (id, library_id, staging_id, name, directory, filename, relative_path,
                                          content_hash, size_bytes, artist, album, status, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM production_items WHERE content_hash = ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.library_id.to_string())
        .bind(record.staging_id.map(|id| id.to_string()))
        .bind(&record.name)
        .bind(&record.directory)
        .bind(&record.filename)
        .bind(&record.relative_path)
        .bind(&record.content_hash)
        .bind(record.size_bytes as i64)
        .bind(&record.artist)
        .bind(&record.album)
        .bind(fmt_time(&record.created_at))
        .bind(fmt_time(&record.updated_at))
        .bind(&record.content_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit_production(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE production_items SET status = 'committed', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(fmt_time(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "pending production item", id)
    }

    async fn discard_production(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM production_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_production(&self, id: Uuid) -> Result<Option<ProductionRecord>> {
        let sql = format!("SELECT {} FROM production_items WHERE id = ?", PRODUCTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(production_from_row).transpose()
    }

    async fn list_production(&self, status: RecordStatus) -> Result<Vec<ProductionRecord>> {
        let sql = format!(
            "SELECT {} FROM production_items WHERE status = ? ORDER BY created_at",
            PRODUCTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(production_from_row).collect()
    }

    async fn content_exists(&self, content_hash: &str) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM staging_items
                WHERE content_hash = ? AND status IN ('committed', 'promoted')
            ) OR EXISTS (
                SELECT 1 FROM production_items
                WHERE content_hash = ? AND status = 'committed'
            )
            "#,
        )
        .bind(content_hash)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    async fn is_processed(&self, path: &str, content_hash: &str) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_files WHERE path = ? AND content_hash = ?)",
        )
        .bind(path)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    async fn mark_processed(&self, path: &str, content_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_files (path, content_hash, processed_at) VALUES (?, ?, ?)
            ON CONFLICT(path, content_hash) DO UPDATE SET processed_at = excluded.processed_at
            "#,
        )
        .bind(path)
        .bind(content_hash)
        .bind(fmt_time(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuarantineStore for SqliteStore {
    async fn insert_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quarantine_records (id, file_path, original_path, reason, message, library_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.file_path)
        .bind(&record.original_path)
        .bind(record.reason.as_str())
        .bind(&record.message)
        .bind(record.library_id.map(|id| id.to_string()))
        .bind(fmt_time(&record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_quarantine(&self, id: Uuid) -> Result<Option<QuarantineRecord>> {
        let row = sqlx::query(
            "SELECT id, file_path, original_path, reason, message, library_id, created_at \
             FROM quarantine_records WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(quarantine_from_row).transpose()
    }

    async fn delete_quarantine(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM quarantine_records WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        let rows = sqlx::query(
            "SELECT id, file_path, original_path, reason, message, library_id, created_at \
             FROM quarantine_records ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(quarantine_from_row).collect()
    }

    async fn list_quarantine_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QuarantineRecord>> {
        let rows = sqlx::query(
            "SELECT id, file_path, original_path, reason, message, library_id, created_at \
             FROM quarantine_records WHERE created_at < ? ORDER BY created_at",
        )
        .bind(fmt_time(&cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(quarantine_from_row).collect()
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_raw_setting(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_raw_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
