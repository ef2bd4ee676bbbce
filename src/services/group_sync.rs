//! Background group sync: keeps the trading-group mirror fresh and sweeps
//! expired failed-lookup entries on the same tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::groups::GroupDirectory;
use crate::lookup_cache::FailedLookupCache;

pub struct GroupSyncService {
    directory: Arc<GroupDirectory>,
    lookups: FailedLookupCache,
    interval: Duration,
}

impl GroupSyncService {
    pub fn new(directory: Arc<GroupDirectory>, lookups: FailedLookupCache, interval: Duration) -> Self {
        Self {
            directory,
            lookups,
            interval,
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "GroupSyncService: starting (interval={}s)",
            self.interval.as_secs()
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("GroupSyncService: stopped");
    }

    /// One sync pass; failures are logged and retried on the next tick
    pub async fn run_once(&self) {
        match self.directory.sync().await {
            Ok(count) => debug!("GroupSyncService: {count} groups synced"),
            Err(e) => warn!("GroupSyncService: sync failed: {e}"),
        }
        let swept = self.lookups.sweep_expired();
        if swept > 0 {
            debug!("GroupSyncService: swept {swept} expired lookup entries");
        }
    }
}
