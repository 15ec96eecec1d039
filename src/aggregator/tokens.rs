use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::aggregator::client::{SwapAggregator, TokenMetadata};

#[derive(Clone)]
struct Snapshot {
    entries: Vec<TokenMetadata>,
    last_refreshed: DateTime<Utc>,
}

/// Time-boxed token-metadata cache. Entries are reused for the
/// freshness window; a failed refresh serves the previous snapshot, so
/// the cache degrades to stale-but-non-empty before it degrades to
/// empty.
pub struct TokenCache {
    aggregator: Arc<dyn SwapAggregator>,
    snapshot: RwLock<Option<Snapshot>>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(aggregator: Arc<dyn SwapAggregator>, ttl: Duration) -> Self {
        Self {
            aggregator,
            snapshot: RwLock::new(None),
            ttl,
        }
    }

    /// One-hour freshness window, matching the aggregator list's own
    /// update cadence
    pub fn hourly(aggregator: Arc<dyn SwapAggregator>) -> Self {
        Self::new(aggregator, Duration::from_secs(3600))
    }

    pub async fn get(&self) -> Vec<TokenMetadata> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(snap) = snapshot.as_ref() {
                let age = Utc::now() - snap.last_refreshed;
                if age.num_seconds() < self.ttl.as_secs() as i64 {
                    debug!("Token cache hit ({} entries)", snap.entries.len());
                    return snap.entries.clone();
                }
            }
        }

        match self.aggregator.token_list().await {
            Ok(entries) => {
                let mut snapshot = self.snapshot.write().await;
                *snapshot = Some(Snapshot {
                    entries: entries.clone(),
                    last_refreshed: Utc::now(),
                });
                entries
            }
            Err(e) => {
                warn!("Token list refresh failed: {}", e);
                let snapshot = self.snapshot.read().await;
                match snapshot.as_ref() {
                    // Stale beats empty
                    Some(snap) => snap.entries.clone(),
                    None => Vec::new(),
                }
            }
        }
    }

    /// Look up metadata for a mint, if the cache knows it
    pub async fn find(&self, mint: &str) -> Option<TokenMetadata> {
        self.get().await.into_iter().find(|t| t.address == mint)
    }
}
