//! Auxiliary statistics caches
//!
//! One cache per enabled granularity. A cache is written only by its refresh
//! job and read only when a document is built. Refreshes run detached from
//! the tick that launched them; the last writer wins.

use crate::error::Result;
use crate::logging::StructuredLogger;
use crate::vendor::{Session, VendorClient};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Statistic refresh bucket
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [Self::Hourly, Self::Daily, Self::Monthly, Self::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent successful refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticSnapshot {
    /// `None` until the first successful refresh
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub data: Option<Value>,
}

impl StatisticSnapshot {
    /// Data is only trusted once a refresh has completed
    pub fn trusted_data(&self) -> Option<&Value> {
        self.last_refreshed_at.and(self.data.as_ref())
    }
}

#[derive(Debug)]
struct CacheSlot {
    granularity: Granularity,
    cadence: chrono::Duration,
    snapshot: RwLock<StatisticSnapshot>,
}

/// Shared handle to one granularity's snapshot
#[derive(Debug, Clone)]
pub struct StatCache {
    slot: Arc<CacheSlot>,
}

impl StatCache {
    pub fn new(granularity: Granularity, cadence: chrono::Duration) -> Self {
        Self {
            slot: Arc::new(CacheSlot {
                granularity,
                cadence,
                snapshot: RwLock::new(StatisticSnapshot::default()),
            }),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.slot.granularity
    }

    pub fn cadence(&self) -> chrono::Duration {
        self.slot.cadence
    }

    /// Never refreshed, or the cadence has elapsed
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot().last_refreshed_at {
            None => true,
            Some(at) => now > at + self.slot.cadence,
        }
    }

    /// At least one refresh has completed
    pub fn is_warm(&self) -> bool {
        self.snapshot().last_refreshed_at.is_some()
    }

    /// Replace timestamp and data in one write
    pub fn store(&self, refreshed_at: DateTime<Utc>, data: Value) {
        let mut guard = self
            .slot
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = StatisticSnapshot {
            last_refreshed_at: Some(refreshed_at),
            data: Some(data),
        };
    }

    pub fn snapshot(&self) -> StatisticSnapshot {
        self.slot
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Per-granularity read view handed to the normalizer
pub type StatisticsView = BTreeMap<Granularity, StatisticSnapshot>;

/// The enabled caches of one instance
#[derive(Debug, Clone, Default)]
pub struct StatCacheSet {
    caches: Vec<StatCache>,
}

impl StatCacheSet {
    pub fn new(cadences: impl IntoIterator<Item = (Granularity, chrono::Duration)>) -> Self {
        let mut caches: Vec<StatCache> = Vec::new();
        for (granularity, cadence) in cadences {
            if caches.iter().all(|c| c.granularity() != granularity) {
                caches.push(StatCache::new(granularity, cadence));
            }
        }
        caches.sort_by_key(StatCache::granularity);
        Self { caches }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatCache> {
        self.caches.iter()
    }

    pub fn get(&self, granularity: Granularity) -> Option<&StatCache> {
        self.caches.iter().find(|c| c.granularity() == granularity)
    }

    pub fn granularities(&self) -> Vec<Granularity> {
        self.caches.iter().map(StatCache::granularity).collect()
    }

    /// Every configured granularity has been populated at least once
    pub fn all_warm(&self) -> bool {
        self.caches.iter().all(StatCache::is_warm)
    }

    pub fn stale(&self, now: DateTime<Utc>) -> Vec<StatCache> {
        self.caches
            .iter()
            .filter(|c| c.is_stale(now))
            .cloned()
            .collect()
    }

    pub fn view(&self) -> StatisticsView {
        self.caches
            .iter()
            .map(|c| (c.granularity(), c.snapshot()))
            .collect()
    }
}

/// One detached refresh of a single cache
pub struct StatRefreshJob {
    pub client: Arc<dyn VendorClient>,
    pub cache: StatCache,
    pub serial: String,
    pub session: Session,
    /// Local calendar date the statistics are requested for
    pub date: NaiveDate,
    /// Set at shutdown; late results are discarded
    pub closed: Arc<AtomicBool>,
    pub logger: StructuredLogger,
}

impl StatRefreshJob {
    /// Fetch and store, stamped with the time the response arrived.
    /// Failures leave the previous snapshot untouched.
    pub async fn run(self) -> bool {
        let granularity = self.cache.granularity();
        match self.fetch().await {
            Ok(data) => {
                if self.closed.load(Ordering::SeqCst) {
                    self.logger
                        .debug(&format!("Discarding {} statistics after shutdown", granularity));
                    return false;
                }
                self.cache.store(Utc::now(), data);
                self.logger
                    .debug(&format!("Refreshed {} statistics", granularity));
                true
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "Refreshing {} statistics failed, keeping previous snapshot: {}",
                    granularity, e
                ));
                false
            }
        }
    }

    async fn fetch(&self) -> Result<Value> {
        self.client
            .get_statistics(
                &self.serial,
                &self.session,
                self.cache.granularity(),
                self.date,
            )
            .await
    }
}
