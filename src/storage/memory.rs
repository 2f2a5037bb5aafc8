// src/storage/memory.rs

//! In-process player store.
//!
//! Backs `--dry-run` cycles and tests. All operations run under one lock, so
//! every call is atomic.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{AppError, Result};
use crate::models::{PlayerFilter, PlayerRecord, PlayerUpdate, PlayerView, ServerAnnotation};
use crate::storage::{PlayerReader, PlayerStore, UpsertCounts, differs};

/// A server listing: annotation plus the `(uid, username)` pairs it lists.
#[derive(Debug, Clone)]
struct ServerListing {
    annotation: ServerAnnotation,
    players: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    players: Mutex<BTreeMap<String, PlayerRecord>>,
    servers: Mutex<Vec<ServerListing>>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<PlayerRecord> {
        self.players.lock().get(key).cloned()
    }

    /// Register a server listing used to annotate lookups.
    pub fn add_server(&self, annotation: ServerAnnotation, players: Vec<(String, String)>) {
        self.servers.lock().push(ServerListing {
            annotation,
            players,
        });
    }

    fn upsert_locked(
        players: &mut BTreeMap<String, PlayerRecord>,
        record: &PlayerRecord,
    ) -> UpsertCounts {
        match players.get_mut(&record.external_id) {
            None => {
                players.insert(record.external_id.clone(), record.clone());
                UpsertCounts::inserted()
            }
            Some(current) => {
                let update = record.update_fields();
                if differs(current, &update) {
                    apply(current, update);
                    UpsertCounts::updated()
                } else {
                    UpsertCounts::unchanged()
                }
            }
        }
    }

    fn server_for(&self, record: &PlayerRecord) -> Option<ServerAnnotation> {
        self.servers
            .lock()
            .iter()
            .find(|s| {
                s.players
                    .iter()
                    .any(|(uid, name)| *uid == record.external_id && *name == record.display_name)
            })
            .map(|s| s.annotation.clone())
    }
}

fn apply(current: &mut PlayerRecord, update: PlayerUpdate) {
    current.display_name = update.display_name;
    current.crew_tag = update.crew_tag;
    current.last_seen_at = update.last_seen_at;
}

fn check_keys(records: &[PlayerRecord]) -> Result<()> {
    match records.iter().position(|r| r.external_id.is_empty()) {
        Some(index) => Err(AppError::MissingKey { index }),
        None => Ok(()),
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn upsert_one(&self, record: &PlayerRecord) -> Result<UpsertCounts> {
        check_keys(std::slice::from_ref(record))?;
        Ok(Self::upsert_locked(&mut self.players.lock(), record))
    }

    async fn upsert_many(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        check_keys(records)?;
        let mut players = self.players.lock();
        let mut counts = UpsertCounts::default();
        for record in records {
            counts += Self::upsert_locked(&mut players, record);
        }
        Ok(counts)
    }

    async fn bulk_native_upsert(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        self.upsert_many(records).await
    }

    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        let players = self.players.lock();
        Ok(keys
            .iter()
            .filter(|k| players.contains_key(*k))
            .cloned()
            .collect())
    }

    async fn create_many(&self, records: &[PlayerRecord]) -> Result<usize> {
        check_keys(records)?;
        let mut players = self.players.lock();
        let mut created = 0;
        for record in records {
            if !players.contains_key(&record.external_id) {
                players.insert(record.external_id.clone(), record.clone());
                created += 1;
            }
        }
        Ok(created)
    }

    async fn update_one(&self, key: &str, update: &PlayerUpdate) -> Result<bool> {
        let mut players = self.players.lock();
        match players.get_mut(key) {
            Some(current) if differs(current, update) => {
                apply(current, update.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_sync(&self, at: DateTime<Utc>) -> Result<()> {
        *self.last_sync.lock() = Some(at);
        Ok(())
    }
}

#[async_trait]
impl PlayerReader for MemoryStore {
    async fn search_by_key_or_name(&self, filter: &PlayerFilter) -> Result<Vec<PlayerView>> {
        let matches: Vec<PlayerRecord> = self
            .players
            .lock()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        Ok(matches
            .into_iter()
            .map(|player| PlayerView {
                server: self.server_for(&player),
                player,
            })
            .collect())
    }

    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.last_sync.lock())
    }
}
