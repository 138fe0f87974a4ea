//! SQLite-backed snapshot store.
//!
//! One table keyed by autoincrement id. The store owns the dataset
//! snapshotter handle: it is authoritative for dataset snapshots and
//! destroys them when rows are retention-swept or removed.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, warn};

use zockimate_common::options::{HistoryOptions, RemoveOptions, SortBy};
use zockimate_common::{
    labels, ContainerSnapshot, ImageReference, Result, SnapshotMetadata, ZockimateError,
};

use crate::zfs::DatasetSnapshotter;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS container_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_name TEXT NOT NULL,
    image_id TEXT NOT NULL,
    image_digest TEXT,
    image_tag TEXT,
    original_image TEXT NOT NULL,
    config BLOB,
    host_config BLOB,
    network_config BLOB,
    zfs_snapshot TEXT,
    status TEXT,
    message TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(container_name, created_at)
);
CREATE INDEX IF NOT EXISTS idx_container_name ON container_snapshots(container_name);
CREATE INDEX IF NOT EXISTS idx_created_at ON container_snapshots(created_at);
CREATE INDEX IF NOT EXISTS idx_container_status ON container_snapshots(status);
CREATE INDEX IF NOT EXISTS idx_container_message ON container_snapshots(message);
"#;

pub struct SnapshotStore {
    pool: Pool<Sqlite>,
    zfs: Arc<dyn DatasetSnapshotter>,
}

impl SnapshotStore {
    /// Opens (creating if needed) the store at `path` and ensures the schema.
    pub async fn open(path: &Path, zfs: Arc<dyn DatasetSnapshotter>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ZockimateError::Store(format!("failed to create database directory: {e}"))
            })?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::open_url(&url, zfs).await
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory(zfs: Arc<dyn DatasetSnapshotter>) -> Result<Self> {
        Self::open_url("sqlite::memory:", zfs).await
    }

    async fn open_url(url: &str, zfs: Arc<dyn DatasetSnapshotter>) -> Result<Self> {
        // Single connection: every write path is a single statement and the
        // process serializes mutations anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(store_err)?;
        sqlx::query(SCHEMA).execute(&pool).await.map_err(store_err)?;
        Ok(Self { pool, zfs })
    }

    /// Inserts the snapshot, stamping `created_at` with the current UTC
    /// time, and records the assigned id back into it.
    pub async fn save(&self, snapshot: &mut ContainerSnapshot) -> Result<i64> {
        let created_at = Utc::now();
        let id = self.insert_at(snapshot, created_at).await?;
        snapshot.id = id;
        snapshot.created_at = created_at;
        debug!(id, container = %snapshot.container_name, "saved snapshot");
        Ok(id)
    }

    async fn insert_at(
        &self,
        snapshot: &ContainerSnapshot,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO container_snapshots (
                container_name, image_id, image_digest, image_tag, original_image,
                config, host_config, network_config, zfs_snapshot, status, message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&snapshot.container_name)
        .bind(&snapshot.image_ref.id)
        .bind(&snapshot.image_ref.repo_digest)
        .bind(&snapshot.image_ref.tag)
        .bind(&snapshot.image_ref.original)
        .bind(&snapshot.config)
        .bind(&snapshot.host_config)
        .bind(&snapshot.network_config)
        .bind(&snapshot.zfs_snapshot)
        .bind(&snapshot.status)
        .bind(&snapshot.message)
        .bind(format_time(created_at))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.last_insert_rowid())
    }

    /// Fetches one snapshot: the exact row when `id > 0` (the container
    /// name must match, so a typo cannot restore another container's
    /// state), else the most recent for the container.
    pub async fn get(&self, container_name: &str, id: i64) -> Result<ContainerSnapshot> {
        let row = if id > 0 {
            sqlx::query(
                "SELECT * FROM container_snapshots WHERE container_name = ? AND id = ?",
            )
            .bind(container_name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT * FROM container_snapshots WHERE container_name = ? \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(container_name)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(store_err)?;

        let row = row.ok_or_else(|| ZockimateError::SnapshotNotFound(container_name.to_string()))?;
        snapshot_from_row(&row)
    }

    /// Snapshot history, filtered and ordered per the options. `last` and
    /// `limit` are applied after the query, in order.
    pub async fn history(&self, opts: &HistoryOptions) -> Result<Vec<SnapshotMetadata>> {
        let mut sql = String::from(
            "SELECT id, container_name, image_tag, image_id, image_digest, status, message, \
             created_at FROM container_snapshots",
        );
        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if !opts.containers.is_empty() {
            let placeholders = vec!["?"; opts.containers.len()].join(",");
            conditions.push(format!("container_name IN ({placeholders})"));
            binds.extend(opts.containers.iter().cloned());
        }
        if let Some(since) = opts.since {
            conditions.push("created_at >= ?".to_string());
            binds.push(format_time(since));
        }
        if let Some(before) = opts.before {
            conditions.push("created_at <= ?".to_string());
            binds.push(format_time(before));
        }
        if !opts.search.is_empty() {
            conditions.push("(message LIKE ? OR status LIKE ?)".to_string());
            let pattern = format!("%{}%", opts.search);
            binds.push(pattern.clone());
            binds.push(pattern);
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(match opts.sort_by {
            SortBy::Container => " ORDER BY container_name, created_at DESC",
            SortBy::Date => " ORDER BY created_at DESC",
        });

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(metadata_from_row(row)?);
        }

        if opts.last {
            let mut seen = std::collections::HashSet::new();
            entries.retain(|e| seen.insert(e.container_name.clone()));
        }
        if opts.limit > 0 {
            entries.truncate(opts.limit);
        }
        Ok(entries)
    }

    /// Retention sweep: keeps the `retain` most recent snapshots of the
    /// container, destroying the dataset snapshot of each dropped row
    /// (best-effort) before deleting it.
    pub async fn cleanup(&self, container_name: &str, retain: usize) -> Result<()> {
        let rows = sqlx::query(
            "SELECT id, zfs_snapshot FROM container_snapshots WHERE container_name = ? \
             ORDER BY created_at DESC, id DESC LIMIT -1 OFFSET ?",
        )
        .bind(container_name)
        .bind(retain as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        for row in &rows {
            let id: i64 = row.try_get("id").map_err(store_err)?;
            let handle: Option<String> = row.try_get("zfs_snapshot").map_err(store_err)?;

            if let Some(handle) = handle.filter(|h| !h.is_empty()) {
                if let Err(e) = self.zfs.destroy(&handle).await {
                    warn!(%handle, error = %e, "failed to destroy dataset snapshot");
                }
            }
            sqlx::query("DELETE FROM container_snapshots WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            debug!(id, container = container_name, "swept old snapshot");
        }
        Ok(())
    }

    /// Moves every row of `old` to `new`; refuses when `new` is already in
    /// use. Returns the number of rows updated.
    pub async fn rename(&self, old: &str, new: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM container_snapshots WHERE container_name = ?")
                .bind(new)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        if count > 0 {
            return Err(ZockimateError::Store(format!(
                "container with name {new} already exists in database"
            )));
        }

        let result =
            sqlx::query("UPDATE container_snapshots SET container_name = ? WHERE container_name = ?")
                .bind(new)
                .bind(old)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    /// Deletes rows of the container matching the remove filters. With
    /// `opts.zfs`, the dataset snapshots of the doomed rows are destroyed
    /// first (best-effort). Returns the number of rows deleted.
    pub async fn remove(&self, container_name: &str, opts: &RemoveOptions) -> Result<u64> {
        let mut conditions = vec!["container_name = ?".to_string()];
        let mut binds = vec![container_name.to_string()];

        if !opts.all {
            if let Some(before) = opts.before {
                conditions.push("created_at < ?".to_string());
                binds.push(format_time(before));
            }
            if let Some(older_than) = opts.older_than {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(older_than)
                        .map_err(|e| ZockimateError::Config(format!("invalid duration: {e}")))?;
                conditions.push("created_at < ?".to_string());
                binds.push(format_time(cutoff));
            }
        }
        let where_clause = conditions.join(" AND ");

        if opts.zfs {
            let sql =
                format!("SELECT zfs_snapshot FROM container_snapshots WHERE {where_clause}");
            let mut query = sqlx::query(&sql);
            for bind in &binds {
                query = query.bind(bind);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
            for row in &rows {
                let handle: Option<String> = row.try_get("zfs_snapshot").map_err(store_err)?;
                if let Some(handle) = handle.filter(|h| !h.is_empty()) {
                    if let Err(e) = self.zfs.destroy(&handle).await {
                        warn!(%handle, error = %e, "failed to destroy dataset snapshot");
                    }
                }
            }
        }

        let sql = format!("DELETE FROM container_snapshots WHERE {where_clause}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let result = query.execute(&self.pool).await.map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_row_time(raw: &str) -> Result<DateTime<Utc>> {
    labels::parse_time(raw)
        .ok_or_else(|| ZockimateError::Store(format!("failed to parse created_at: {raw:?}")))
}

fn store_err(err: sqlx::Error) -> ZockimateError {
    ZockimateError::Store(err.to_string())
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContainerSnapshot> {
    let created_at: String = row.try_get("created_at").map_err(store_err)?;
    Ok(ContainerSnapshot {
        id: row.try_get("id").map_err(store_err)?,
        container_name: row.try_get("container_name").map_err(store_err)?,
        image_ref: ImageReference {
            id: row.try_get("image_id").map_err(store_err)?,
            repo_digest: optional(row, "image_digest")?,
            tag: optional(row, "image_tag")?,
            original: row.try_get("original_image").map_err(store_err)?,
            platform: String::new(),
        },
        config: row.try_get("config").map_err(store_err)?,
        host_config: row.try_get("host_config").map_err(store_err)?,
        network_config: row.try_get("network_config").map_err(store_err)?,
        zfs_snapshot: optional(row, "zfs_snapshot")?,
        status: optional(row, "status")?,
        message: optional(row, "message")?,
        created_at: parse_row_time(&created_at)?,
    })
}

fn metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SnapshotMetadata> {
    let created_at: String = row.try_get("created_at").map_err(store_err)?;
    Ok(SnapshotMetadata {
        id: row.try_get("id").map_err(store_err)?,
        container_name: row.try_get("container_name").map_err(store_err)?,
        image_tag: optional(row, "image_tag")?,
        image_id: row.try_get("image_id").map_err(store_err)?,
        repo_digest: optional(row, "image_digest")?,
        status: optional(row, "status")?,
        message: optional(row, "message")?,
        created_at: parse_row_time(&created_at)?,
    })
}

fn optional(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<String> {
    let value: Option<String> = row.try_get(column).map_err(store_err)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::MemorySnapshotter;
    use chrono::TimeZone;

    fn sample(name: &str, message: &str) -> ContainerSnapshot {
        ContainerSnapshot {
            id: 0,
            container_name: name.to_string(),
            image_ref: ImageReference {
                id: "sha256:aaa".to_string(),
                repo_digest: "nginx@sha256:abc".to_string(),
                tag: "nginx:1.24".to_string(),
                original: "nginx:1.24".to_string(),
                platform: "amd64/linux".to_string(),
            },
            config: br#"{"Image":"nginx:1.24"}"#.to_vec(),
            host_config: b"{}".to_vec(),
            network_config: br#"{"EndpointsConfig":{}}"#.to_vec(),
            zfs_snapshot: String::new(),
            status: "snapshot".to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, secs).unwrap()
    }

    async fn memory_store() -> (SnapshotStore, Arc<MemorySnapshotter>) {
        let zfs = Arc::new(MemorySnapshotter::new());
        let store = SnapshotStore::open_in_memory(zfs.clone()).await.unwrap();
        (store, zfs)
    }

    #[tokio::test]
    async fn save_assigns_increasing_ids_and_get_roundtrips() {
        let (store, _) = memory_store().await;

        let mut first = sample("web", "first");
        let id = store.save(&mut first).await.unwrap();
        assert!(id > 0);
        assert_eq!(first.id, id);

        let loaded = store.get("web", id).await.unwrap();
        assert_eq!(loaded.container_name, "web");
        assert_eq!(loaded.message, "first");
        assert_eq!(loaded.image_ref.repo_digest, "nginx@sha256:abc");
        assert_eq!(loaded.config, first.config);
        assert_eq!(loaded.created_at.timestamp(), first.created_at.timestamp());
    }

    #[tokio::test]
    async fn get_by_id_requires_matching_container_name() {
        let (store, _) = memory_store().await;
        let mut snap = sample("web", "only");
        let id = store.save(&mut snap).await.unwrap();

        assert!(matches!(
            store.get("db", id).await,
            Err(ZockimateError::SnapshotNotFound(_))
        ));
        assert!(matches!(
            store.get("db", 0).await,
            Err(ZockimateError::SnapshotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_without_id_returns_most_recent() {
        let (store, _) = memory_store().await;
        for (i, msg) in ["old", "mid", "new"].iter().enumerate() {
            store
                .insert_at(&sample("web", msg), at(i as u32))
                .await
                .unwrap();
        }

        let latest = store.get("web", 0).await.unwrap();
        assert_eq!(latest.message, "new");
    }

    #[tokio::test]
    async fn duplicate_container_and_timestamp_is_rejected() {
        let (store, _) = memory_store().await;
        let snap = sample("web", "one");
        store.insert_at(&snap, at(0)).await.unwrap();
        assert!(store.insert_at(&snap, at(0)).await.is_err());
        // A different container at the same instant is fine.
        store.insert_at(&sample("db", "two"), at(0)).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_keeps_the_newest_and_destroys_dataset_snapshots() {
        let (store, zfs) = memory_store().await;
        let mut handles = Vec::new();
        for i in 0..5u32 {
            let mut snap = sample("web", &format!("save {i}"));
            snap.zfs_snapshot = zfs.create("tank/web").await.unwrap();
            handles.push(snap.zfs_snapshot.clone());
            store.insert_at(&snap, at(i)).await.unwrap();
        }

        store.cleanup("web", 3).await.unwrap();

        let remaining = store.history(&HistoryOptions::default()).await.unwrap();
        assert_eq!(remaining.len(), 3);
        let messages: Vec<_> = remaining.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["save 4", "save 3", "save 2"]);
        // The two oldest dataset snapshots are gone.
        assert_eq!(zfs.destroyed().await, handles[..2].to_vec());
    }

    #[tokio::test]
    async fn cleanup_with_exactly_retain_rows_deletes_nothing() {
        let (store, zfs) = memory_store().await;
        for i in 0..3u32 {
            store
                .insert_at(&sample("web", &format!("save {i}")), at(i))
                .await
                .unwrap();
        }

        store.cleanup("web", 3).await.unwrap();

        let remaining = store.history(&HistoryOptions::default()).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(zfs.destroyed().await.is_empty());
    }

    #[tokio::test]
    async fn history_filters_and_orders() {
        let (store, _) = memory_store().await;
        store.insert_at(&sample("web", "deploy"), at(0)).await.unwrap();
        store.insert_at(&sample("db", "backup"), at(1)).await.unwrap();
        store.insert_at(&sample("web", "Pre-update snapshot"), at(2)).await.unwrap();

        let by_container = store
            .history(&HistoryOptions {
                containers: vec!["web".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_container.len(), 2);
        assert!(by_container.iter().all(|e| e.container_name == "web"));
        assert_eq!(by_container[0].message, "Pre-update snapshot");

        let searched = store
            .history(&HistoryOptions {
                search: "Pre-update".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);

        let since = store
            .history(&HistoryOptions {
                since: Some(at(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(since.len(), 2);

        let last_per_container = store
            .history(&HistoryOptions {
                last: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(last_per_container.len(), 2);

        let limited = store
            .history(&HistoryOptions {
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message, "Pre-update snapshot");

        let by_name = store
            .history(&HistoryOptions {
                sort_by: SortBy::Container,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name[0].container_name, "db");
    }

    #[tokio::test]
    async fn rename_refuses_collisions_and_moves_rows() {
        let (store, _) = memory_store().await;
        store.insert_at(&sample("web", "a"), at(0)).await.unwrap();
        store.insert_at(&sample("web", "b"), at(1)).await.unwrap();
        store.insert_at(&sample("db", "c"), at(2)).await.unwrap();

        assert!(store.rename("web", "db").await.is_err());

        let moved = store.rename("web", "frontend").await.unwrap();
        assert_eq!(moved, 2);
        assert!(store.get("web", 0).await.is_err());
        assert_eq!(store.get("frontend", 0).await.unwrap().message, "b");
    }

    #[tokio::test]
    async fn remove_honors_filters_and_zfs_flag() {
        let (store, zfs) = memory_store().await;
        let mut old = sample("web", "old");
        old.zfs_snapshot = zfs.create("tank/web").await.unwrap();
        let old_handle = old.zfs_snapshot.clone();
        store.insert_at(&old, at(0)).await.unwrap();

        let mut fresh = sample("web", "fresh");
        fresh.zfs_snapshot = zfs.create("tank/web").await.unwrap();
        store.insert_at(&fresh, at(30)).await.unwrap();

        let deleted = store
            .remove(
                "web",
                &RemoveOptions {
                    before: Some(at(10)),
                    zfs: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(zfs.destroyed().await, vec![old_handle]);
        assert_eq!(store.get("web", 0).await.unwrap().message, "fresh");

        let rest = store
            .remove(
                "web",
                &RemoveOptions {
                    all: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rest, 1);
        assert!(store.get("web", 0).await.is_err());
    }
}
