// src/storage/postgres.rs

//! PostgreSQL player store.
//!
//! ## Tables
//!
//! ```text
//! players          uid (PK), username, crew, source_tag, last_seen, created_at, updated_at
//! servers          sid (PK), time, restart_at, players (jsonb [{uid, Username}])
//! system_metadata  key (PK), value, updated_at
//! ```
//!
//! Upserts only touch a row when one of the mutable columns differs, so
//! replaying a batch leaves `updated_at` alone.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::error::{AppError, Result};
use crate::models::{
    DatabaseConfig, PlayerFilter, PlayerRecord, PlayerUpdate, PlayerView, ServerAnnotation,
};
use crate::storage::{PlayerReader, PlayerStore, UpsertCounts};

/// Metadata key holding the last successful sync time.
const LAST_SYNC_KEY: &str = "players_last_fetch";

/// Rows per multi-row statement (5 binds each, well under the bind limit).
const BULK_STATEMENT_ROWS: usize = 5000;

/// Upper bound on rows returned by a lookup.
const SEARCH_LIMIT: i64 = 100;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS players (
        uid         TEXT PRIMARY KEY,
        username    TEXT NOT NULL DEFAULT '',
        crew        TEXT,
        source_tag  TEXT NOT NULL,
        last_seen   TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS players_username_idx ON players (username)",
    r"
    CREATE TABLE IF NOT EXISTS servers (
        sid         TEXT PRIMARY KEY,
        time        TEXT,
        restart_at  TIMESTAMPTZ,
        players     JSONB NOT NULL DEFAULT '[]'::jsonb
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS system_metadata (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
];

const INSERT_COLUMNS: &str = "INSERT INTO players (uid, username, crew, source_tag, last_seen) ";

const UPSERT_TAIL: &str = r"
    ON CONFLICT (uid) DO UPDATE SET
        username = EXCLUDED.username,
        crew = EXCLUDED.crew,
        last_seen = EXCLUDED.last_seen,
        updated_at = now()
    WHERE (players.username, players.crew, players.last_seen)
        IS DISTINCT FROM (EXCLUDED.username, EXCLUDED.crew, EXCLUDED.last_seen)
    RETURNING (xmax = 0) AS inserted
";

/// PostgreSQL-backed [`PlayerStore`] and [`PlayerReader`].
#[derive(Clone)]
pub struct PgPlayerStore {
    pool: PgPool,
}

impl PgPlayerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the configured pool limits, retrying once after 2s.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        let pool = match options.clone().connect(url).await {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("[DB] Connection failed ({}), retrying in 2s", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
                options.connect(url).await?
            }
        };
        log::info!("[DB] Connected");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn server_for(&self, player: &PlayerRecord) -> Result<Option<ServerAnnotation>> {
        let listed = json!([{ "uid": player.external_id, "Username": player.display_name }]);
        let row = sqlx::query(
            r"
            SELECT sid, time, restart_at
            FROM servers
            WHERE players @> $1
            LIMIT 1
            ",
        )
        .bind(listed)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ServerAnnotation {
                server_id: row.try_get("sid")?,
                time: row.try_get("time")?,
                restart_at: row.try_get("restart_at")?,
            })
        })
        .transpose()
    }
}

/// Count a `RETURNING (xmax = 0)` result set against the rows sent.
fn count_returned(sent: usize, inserted_flags: &[bool]) -> UpsertCounts {
    let inserted = inserted_flags.iter().filter(|&&i| i).count();
    UpsertCounts {
        inserted,
        updated: inserted_flags.len() - inserted,
        unchanged: sent - inserted_flags.len(),
    }
}

/// Keep the last record per key. A multi-row upsert cannot touch a row twice.
fn last_per_key(records: &[PlayerRecord]) -> Vec<&PlayerRecord> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<&PlayerRecord> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(record.external_id.as_str()) {
            Some(&i) => unique[i] = record,
            None => {
                position.insert(&record.external_id, unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

fn player_from_row(row: &sqlx::postgres::PgRow) -> Result<PlayerRecord> {
    Ok(PlayerRecord {
        external_id: row.try_get("uid")?,
        display_name: row.try_get("username")?,
        crew_tag: row.try_get("crew")?,
        source_tag: row.try_get("source_tag")?,
        last_seen_at: row.try_get("last_seen")?,
    })
}

#[async_trait]
impl PlayerStore for PgPlayerStore {
    async fn upsert_one(&self, record: &PlayerRecord) -> Result<UpsertCounts> {
        let sql = format!("{INSERT_COLUMNS} VALUES ($1, $2, $3, $4, $5) {UPSERT_TAIL}");
        let row = sqlx::query(&sql)
            .bind(&record.external_id)
            .bind(&record.display_name)
            .bind(&record.crew_tag)
            .bind(&record.source_tag)
            .bind(record.last_seen_at)
            .fetch_optional(&self.pool)
            .await?;

        let flags = match row {
            Some(row) => vec![row.try_get::<bool, _>("inserted")?],
            None => Vec::new(),
        };
        Ok(count_returned(1, &flags))
    }

    async fn upsert_many(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        let sql = format!("{INSERT_COLUMNS} VALUES ($1, $2, $3, $4, $5) {UPSERT_TAIL}");
        let mut tx = self.pool.begin().await?;
        let mut flags = Vec::with_capacity(records.len());

        for record in records {
            let row = sqlx::query(&sql)
                .bind(&record.external_id)
                .bind(&record.display_name)
                .bind(&record.crew_tag)
                .bind(&record.source_tag)
                .bind(record.last_seen_at)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                flags.push(row.try_get::<bool, _>("inserted")?);
            }
        }

        tx.commit().await?;
        Ok(count_returned(records.len(), &flags))
    }

    async fn bulk_native_upsert(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        let unique = last_per_key(records);
        let mut tx = self.pool.begin().await?;
        let mut flags = Vec::with_capacity(unique.len());

        for chunk in unique.chunks(BULK_STATEMENT_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_COLUMNS);
            builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.external_id)
                    .push_bind(&record.display_name)
                    .push_bind(&record.crew_tag)
                    .push_bind(&record.source_tag)
                    .push_bind(record.last_seen_at);
            });
            builder.push(UPSERT_TAIL);

            let rows = builder.build().fetch_all(&mut *tx).await?;
            for row in rows {
                flags.push(row.try_get::<bool, _>("inserted")?);
            }
        }

        tx.commit().await?;
        // Collapsed duplicates count as unchanged.
        Ok(count_returned(records.len(), &flags))
    }

    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT uid FROM players WHERE uid = ANY($1)")
            .bind(keys)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("uid").map_err(AppError::from))
            .collect()
    }

    async fn create_many(&self, records: &[PlayerRecord]) -> Result<usize> {
        let mut created = 0;
        for chunk in records.chunks(BULK_STATEMENT_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_COLUMNS);
            builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.external_id)
                    .push_bind(&record.display_name)
                    .push_bind(&record.crew_tag)
                    .push_bind(&record.source_tag)
                    .push_bind(record.last_seen_at);
            });
            builder.push(" ON CONFLICT (uid) DO NOTHING");

            let result = builder.build().execute(&self.pool).await?;
            created += result.rows_affected() as usize;
        }
        Ok(created)
    }

    async fn update_one(&self, key: &str, update: &PlayerUpdate) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE players
            SET username = $2, crew = $3, last_seen = $4, updated_at = now()
            WHERE uid = $1
              AND (username, crew, last_seen) IS DISTINCT FROM ($2, $3, $4)
            ",
        )
        .bind(key)
        .bind(&update.display_name)
        .bind(&update.crew_tag)
        .bind(update.last_seen_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_sync(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO system_metadata (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            ",
        )
        .bind(LAST_SYNC_KEY)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlayerReader for PgPlayerStore {
    async fn search_by_key_or_name(&self, filter: &PlayerFilter) -> Result<Vec<PlayerView>> {
        let rows = sqlx::query(
            r"
            SELECT uid, username, crew, source_tag, last_seen
            FROM players
            WHERE ($1::text IS NULL OR uid = $1)
              AND ($2::text IS NULL OR username = $2)
            ORDER BY uid
            LIMIT $3
            ",
        )
        .bind(&filter.uid)
        .bind(&filter.username)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let players = rows.iter().map(player_from_row).collect::<Result<Vec<_>>>()?;
        try_join_all(players.into_iter().map(|player| async move {
            let server = self.server_for(&player).await?;
            Ok::<_, AppError>(PlayerView { player, server })
        }))
        .await
    }

    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM system_metadata WHERE key = $1")
                .bind(LAST_SYNC_KEY)
                .fetch_optional(&self.pool)
                .await?;

        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| AppError::validation(format!("Bad {LAST_SYNC_KEY} value {v:?}: {e}")))
            })
            .transpose()
    }
}
