//! Processed-event ledger.
//!
//! Monitors deduplicate external items on `(userId, type, sourceId)`.  A
//! `moka` cache answers repeat checks without touching disk; when a
//! [`Database`] is attached the `processed_events` table makes the ledger
//! survive restarts.

use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use intentflow_core::{DedupKey, EventType};

use crate::db::Database;
use crate::error::StoreResult;

const DEFAULT_CAPACITY: u64 = 100_000;
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Remembers which external items were already turned into events.
#[derive(Clone)]
pub struct DedupLedger {
    hot: Cache<DedupKey, ()>,
    db: Option<Database>,
}

impl std::fmt::Debug for DedupLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupLedger")
            .field("cached", &self.hot.entry_count())
            .field("durable", &self.db.is_some())
            .finish()
    }
}

impl DedupLedger {
    /// A purely in-memory ledger.
    pub fn in_memory() -> Self {
        Self::build(None, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// A ledger backed by the `processed_events` table.
    pub fn durable(db: Database) -> Self {
        Self::build(Some(db), DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Override cache sizing.  The durable table is unaffected.
    pub fn with_cache(self, capacity: u64, ttl: Duration) -> Self {
        Self::build(self.db, capacity, ttl)
    }

    fn build(db: Option<Database>, capacity: u64, ttl: Duration) -> Self {
        Self {
            hot: Cache::builder()
                .name("processed_events")
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            db,
        }
    }

    /// Record an item as processed.  Returns `true` when this call claimed
    /// it and `false` when it had been seen before.
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        user_id: &str,
        event_type: EventType,
        source_id: &str,
    ) -> StoreResult<bool> {
        let key = DedupKey::new(user_id, event_type, source_id);

        let entry = self.hot.entry(key.clone()).or_insert(()).await;
        if !entry.is_fresh() {
            debug!(dedup_key = %key, "duplicate item (cache)");
            return Ok(false);
        }

        let Some(db) = &self.db else {
            return Ok(true);
        };

        let row = key.clone();
        let inserted = db
            .execute(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO processed_events \
                        (user_id, event_type, source_id, processed_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        row.user_id,
                        row.event_type.as_str(),
                        row.source_id,
                        chrono::Utc::now().timestamp()
                    ],
                )?)
            })
            .await;

        match inserted {
            Ok(0) => {
                debug!(dedup_key = %key, "duplicate item (ledger)");
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(err) => {
                // Let the next poll retry the item.
                self.hot.invalidate(&key).await;
                Err(err)
            }
        }
    }

    /// Whether an item has been processed, without claiming it.
    pub async fn contains(
        &self,
        user_id: &str,
        event_type: EventType,
        source_id: &str,
    ) -> StoreResult<bool> {
        let key = DedupKey::new(user_id, event_type, source_id);
        if self.hot.contains_key(&key) {
            return Ok(true);
        }
        let Some(db) = &self.db else {
            return Ok(false);
        };
        db.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM processed_events \
                 WHERE user_id = ?1 AND event_type = ?2 AND source_id = ?3",
                rusqlite::params![key.user_id, key.event_type.as_str(), key.source_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }
}
