//! Runtime settings stored in the `settings` table
//!
//! Typed accessors over [`SettingsStore`]. Values are stored as text and
//! parsed on read.

use stacks_common::{Error, Result};

use super::SettingsStore;

/// Scan worker count override
pub const SCAN_WORKER_COUNT_KEY: &str = "scan_worker_count";
/// Scan file limit override
pub const SCAN_MAX_FILES_KEY: &str = "scan_max_files";

/// Accepted range for the scan worker count
pub const SCAN_WORKER_BOUNDS: (usize, usize) = (1, 64);

/// Scan worker count from settings, falling back to `configured`.
///
/// Out-of-range or unparsable values are ignored with a warning.
pub async fn scan_worker_count(store: &dyn SettingsStore, configured: usize) -> Result<usize> {
    let raw = match store.get_raw_setting(SCAN_WORKER_COUNT_KEY).await? {
        Some(raw) => raw,
        None => return Ok(configured),
    };

    let (min, max) = SCAN_WORKER_BOUNDS;
    match raw.trim().parse::<usize>() {
        Ok(count) if (min..=max).contains(&count) => Ok(count),
        Ok(count) => {
            tracing::warn!(
                key = SCAN_WORKER_COUNT_KEY,
                value = count,
                min,
                max,
                fallback = configured,
                "Scan worker count out of bounds, using configured value"
            );
            Ok(configured)
        }
        Err(e) => {
            tracing::warn!(
                key = SCAN_WORKER_COUNT_KEY,
                value = %raw,
                error = %e,
                fallback = configured,
                "Unparsable scan worker count, using configured value"
            );
            Ok(configured)
        }
    }
}

/// Scan file limit from settings, falling back to `configured`.
///
/// Zero and unparsable values are ignored with a warning.
pub async fn scan_max_files(store: &dyn SettingsStore, configured: Option<usize>) -> Result<Option<usize>> {
    match get_setting::<usize>(store, SCAN_MAX_FILES_KEY).await {
        Ok(Some(0)) => {
            tracing::warn!(key = SCAN_MAX_FILES_KEY, "Scan file limit of zero ignored");
            Ok(configured)
        }
        Ok(Some(limit)) => Ok(Some(limit)),
        Ok(None) => Ok(configured),
        Err(Error::Config(msg)) => {
            tracing::warn!(key = SCAN_MAX_FILES_KEY, error = %msg, "Using configured scan file limit");
            Ok(configured)
        }
        Err(e) => Err(e),
    }
}

/// Generic typed getter
pub async fn get_setting<T>(store: &dyn SettingsStore, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match store.get_raw_setting(key).await? {
        Some(value) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setter (upsert)
pub async fn set_setting<T>(store: &dyn SettingsStore, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    store.set_raw_setting(key, &value.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use stacks_common::db::open_in_memory;

    async fn setup_test_store() -> SqliteStore {
        SqliteStore::new(open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_scan_worker_count_defaults_to_config() {
        let store = setup_test_store().await;
        assert_eq!(scan_worker_count(&store, 4).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_scan_worker_count_override() {
        let store = setup_test_store().await;
        set_setting(&store, SCAN_WORKER_COUNT_KEY, 12).await.unwrap();
        assert_eq!(scan_worker_count(&store, 4).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_scan_worker_count_out_of_bounds_falls_back() {
        let store = setup_test_store().await;

        set_setting(&store, SCAN_WORKER_COUNT_KEY, 0).await.unwrap();
        assert_eq!(scan_worker_count(&store, 4).await.unwrap(), 4);

        set_setting(&store, SCAN_WORKER_COUNT_KEY, 65).await.unwrap();
        assert_eq!(scan_worker_count(&store, 4).await.unwrap(), 4);

        set_setting(&store, SCAN_WORKER_COUNT_KEY, "lots").await.unwrap();
        assert_eq!(scan_worker_count(&store, 4).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_set_setting_upserts() {
        let store = setup_test_store().await;
        set_setting(&store, SCAN_MAX_FILES_KEY, 10).await.unwrap();
        set_setting(&store, SCAN_MAX_FILES_KEY, 20).await.unwrap();

        assert_eq!(scan_max_files(&store, None).await.unwrap(), Some(20));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings WHERE key = ?")
            .bind(SCAN_MAX_FILES_KEY)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1, "Should have exactly one entry after update");
    }

    #[tokio::test]
    async fn test_bad_typed_value_is_config_error() {
        let store = setup_test_store().await;
        set_setting(&store, SCAN_MAX_FILES_KEY, "many").await.unwrap();
        assert!(matches!(
            get_setting::<usize>(&store, SCAN_MAX_FILES_KEY).await,
            Err(Error::Config(_))
        ));
        assert_eq!(scan_max_files(&store, Some(500)).await.unwrap(), Some(500));
    }
}
