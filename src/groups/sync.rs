//! Trading-group catalogue mirror
//!
//! `sync` upserts every group the venue reports and only then deactivates the
//! ones it no longer reports, so readers see the old or the new catalogue but
//! never a half-applied one.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::{DefaultSlot, GroupUpsert, TradingGroup};
use crate::error::{GatewayError, Result};
use crate::gateway::AccountGateway;
use crate::persistence::RecordStore;
use crate::venue::GroupDescriptor;

/// Result of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    pub reported: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub deactivated: u64,
}

/// Cached active catalogue with a generation bumped on every clear, so a
/// read that raced a clear is not installed afterwards
#[derive(Default)]
struct SnapshotCell {
    generation: u64,
    groups: Option<Arc<Vec<TradingGroup>>>,
}

impl SnapshotCell {
    fn clear(&mut self) {
        self.generation += 1;
        self.groups = None;
    }

    /// Install only if nothing cleared the cell since `generation` was read
    fn install(&mut self, generation: u64, groups: Arc<Vec<TradingGroup>>) -> bool {
        if self.generation != generation {
            return false;
        }
        self.groups = Some(groups);
        true
    }
}

type Snapshot = Arc<RwLock<SnapshotCell>>;

pub struct GroupDirectory {
    gateway: AccountGateway,
    store: Arc<dyn RecordStore>,
    /// Cached active catalogue, dropped on sync, admin changes and invalidation
    snapshot: Snapshot,
    sync_lock: Mutex<()>,
}

impl GroupDirectory {
    /// Registers a hook so connection invalidation also drops the snapshot
    pub fn new(gateway: AccountGateway, store: Arc<dyn RecordStore>) -> Self {
        let snapshot: Snapshot = Arc::new(RwLock::new(SnapshotCell::default()));
        let hook_snapshot = snapshot.clone();
        gateway.connections().on_invalidate(move || {
            hook_snapshot.write().clear();
        });
        Self {
            gateway,
            store,
            snapshot,
            sync_lock: Mutex::new(()),
        }
    }

    /// Mirror the venue catalogue; returns the number of groups upserted
    pub async fn sync(&self) -> Result<usize> {
        Ok(self.sync_report().await?.upserted)
    }

    #[instrument(skip(self))]
    pub async fn sync_report(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let started = std::time::Instant::now();

        let descriptors = self
            .gateway
            .call("group_enumerate", 0, |s| {
                let total = s.group_total();
                let mut descriptors = Vec::with_capacity(total as usize);
                for index in 0..total {
                    descriptors.push(s.group_next(index)?);
                }
                Ok(descriptors)
            })
            .await?;

        let synced_at = Utc::now();
        let (upserts, skipped) = map_descriptors(&descriptors, synced_at);
        let mut report = SyncReport {
            reported: descriptors.len(),
            skipped,
            ..Default::default()
        };

        for upsert in &upserts {
            self.store.upsert_trading_group(upsert).await?;
            report.upserted += 1;
        }

        if upserts.is_empty() {
            warn!(
                "Venue reported no usable groups ({} descriptors), keeping local catalogue active",
                descriptors.len()
            );
        } else {
            let keep: Vec<String> = upserts.into_iter().map(|u| u.name).collect();
            for retired in self
                .store
                .list_trading_groups(true)
                .await?
                .iter()
                .filter(|g| (g.is_default || g.is_demo_default) && !keep.contains(&g.name))
            {
                warn!(
                    "Group {} left the venue catalogue and loses its default flags (default={}, demo_default={})",
                    retired.name, retired.is_default, retired.is_demo_default
                );
            }
            report.deactivated = self
                .store
                .deactivate_groups_except(&keep, synced_at)
                .await?;
        }

        self.clear_snapshot();
        info!(
            "Group sync: {} upserted, {} deactivated, {} skipped in {}ms",
            report.upserted,
            report.deactivated,
            report.skipped,
            started.elapsed().as_millis()
        );
        Ok(report)
    }

    // ==================== Administration ====================

    /// Make `name` the real-server default; clears the flag everywhere else
    pub async fn set_default(&self, name: &str) -> Result<TradingGroup> {
        self.set_slot(name, DefaultSlot::Live).await
    }

    /// Make `name` the demo default; never touches the real-server default
    pub async fn set_demo_default(&self, name: &str) -> Result<TradingGroup> {
        self.set_slot(name, DefaultSlot::Demo).await
    }

    async fn set_slot(&self, name: &str, slot: DefaultSlot) -> Result<TradingGroup> {
        let group = self.find(name).await?;
        if !group.active {
            return Err(GatewayError::Validation(format!(
                "group {name} is inactive and cannot be the {}",
                slot.as_str()
            )));
        }
        self.store.set_default_group(name, slot).await?;
        self.clear_snapshot();
        info!("Group {} is now the {}", name, slot.as_str());
        self.find(name).await
    }

    pub async fn set_alias(&self, name: &str, alias: Option<&str>) -> Result<TradingGroup> {
        let alias = alias.map(str::trim).filter(|a| !a.is_empty());
        self.store.set_group_alias(name, alias).await?;
        self.clear_snapshot();
        self.find(name).await
    }

    // ==================== Reads ====================

    pub async fn list_groups(&self, active_only: bool) -> Result<Vec<TradingGroup>> {
        if !active_only {
            return self.store.list_trading_groups(false).await;
        }
        Ok(self.active_catalogue().await?.as_ref().clone())
    }

    /// Current holder of a default slot
    pub async fn default_group(&self, slot: DefaultSlot) -> Result<Option<TradingGroup>> {
        let catalogue = self.active_catalogue().await?;
        Ok(catalogue
            .iter()
            .find(|g| match slot {
                DefaultSlot::Live => g.is_default,
                DefaultSlot::Demo => g.is_demo_default,
            })
            .cloned())
    }

    async fn active_catalogue(&self) -> Result<Arc<Vec<TradingGroup>>> {
        let generation = {
            let cell = self.snapshot.read();
            if let Some(cached) = cell.groups.clone() {
                return Ok(cached);
            }
            cell.generation
        };
        let groups = Arc::new(self.store.list_trading_groups(true).await?);
        if self.snapshot.write().install(generation, groups.clone()) {
            debug!("Group catalogue snapshot refreshed ({} groups)", groups.len());
        } else {
            debug!("Group catalogue changed during refresh, not caching");
        }
        Ok(groups)
    }

    async fn find(&self, name: &str) -> Result<TradingGroup> {
        self.store
            .list_trading_groups(false)
            .await?
            .into_iter()
            .find(|g| g.name == name)
            .ok_or_else(|| GatewayError::NotFound(format!("trading group {name}")))
    }

    fn clear_snapshot(&self) {
        self.snapshot.write().clear();
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.read().groups.is_some()
    }
}

/// Map raw descriptors to upserts, dropping nameless and duplicate entries
fn map_descriptors(
    descriptors: &[GroupDescriptor],
    synced_at: chrono::DateTime<Utc>,
) -> (Vec<GroupUpsert>, usize) {
    let mut seen = BTreeSet::new();
    let mut upserts = Vec::with_capacity(descriptors.len());
    let mut skipped = 0;
    for descriptor in descriptors {
        match descriptor.to_upsert(synced_at) {
            Some(upsert) if seen.insert(upsert.name.clone()) => upserts.push(upsert),
            Some(upsert) => {
                debug!("Duplicate group {} in venue catalogue", upsert.name);
                skipped += 1;
            }
            None => {
                warn!("Skipping venue group without a name: {:?}", descriptor);
                skipped += 1;
            }
        }
    }
    (upserts, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GroupKind;
    use crate::test_support::Harness;

    fn group(name: &str) -> GroupDescriptor {
        GroupDescriptor::new()
            .with_field("group", name)
            .with_field("currency", "USD")
    }

    async fn directory(h: &Harness) -> GroupDirectory {
        GroupDirectory::new(h.gateway.clone(), h.store.clone())
    }

    fn flags(groups: &[TradingGroup]) -> Vec<(String, bool, bool, bool)> {
        groups
            .iter()
            .map(|g| (g.name.clone(), g.active, g.is_default, g.is_demo_default))
            .collect()
    }

    #[tokio::test]
    async fn sync_mirrors_catalogue() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;

        assert_eq!(dir.sync().await.unwrap(), 2);
        let demo = h.store.group("demo\\standard").await.unwrap();
        assert_eq!(demo.kind, GroupKind::Demo);
        assert_eq!(demo.currency.as_deref(), Some("USD"));
        assert!(demo.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn sync_twice_is_idempotent() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();
        dir.set_default("real\\standard").await.unwrap();
        dir.set_demo_default("demo\\standard").await.unwrap();

        dir.sync().await.unwrap();
        let first = flags(&dir.list_groups(false).await.unwrap());
        dir.sync().await.unwrap();
        let second = flags(&dir.list_groups(false).await.unwrap());
        assert_eq!(first, second);
        assert!(first.iter().any(|(_, _, live, _)| *live));
    }

    #[tokio::test]
    async fn groups_gone_from_venue_are_deactivated() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        h.venue.set_groups(vec![group("real\\standard"), group("real\\vip")]);
        let report = dir.sync_report().await.unwrap();
        assert_eq!(report.upserted, 2);
        assert_eq!(report.deactivated, 1);

        let active: Vec<String> = dir
            .list_groups(true)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(active, vec!["real\\standard", "real\\vip"]);
        assert!(!h.store.group("demo\\standard").await.unwrap().active);
    }

    #[tokio::test]
    async fn nameless_and_duplicate_descriptors_are_skipped() {
        let h = Harness::connected().await;
        h.venue.set_groups(vec![
            group("real\\a"),
            GroupDescriptor::new().with_field("currency", "EUR"),
            group("real\\a"),
        ]);
        let dir = directory(&h).await;
        let report = dir.sync_report().await.unwrap();
        assert_eq!(report.reported, 3);
        assert_eq!(report.upserted, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn default_moves_from_a_to_b() {
        let h = Harness::connected().await;
        h.venue.set_groups(vec![group("real\\a"), group("real\\b"), group("real\\c")]);
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        dir.set_default("real\\a").await.unwrap();
        dir.set_default("real\\b").await.unwrap();

        let groups = dir.list_groups(false).await.unwrap();
        let defaults: Vec<&str> = groups
            .iter()
            .filter(|g| g.is_default)
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(defaults, vec!["real\\b"]);
    }

    #[tokio::test]
    async fn demo_default_is_independent() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        dir.set_default("real\\standard").await.unwrap();
        dir.set_demo_default("demo\\standard").await.unwrap();
        dir.set_demo_default("real\\standard").await.unwrap();

        let live = dir.default_group(DefaultSlot::Live).await.unwrap().unwrap();
        assert_eq!(live.name, "real\\standard");
        let demo = dir.default_group(DefaultSlot::Demo).await.unwrap().unwrap();
        assert_eq!(demo.name, "real\\standard");
        assert!(!h.store.group("demo\\standard").await.unwrap().is_demo_default);
        assert!(h.store.group("real\\standard").await.unwrap().is_default);
    }

    #[tokio::test]
    async fn unknown_or_inactive_group_cannot_be_default() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        let err = dir.set_default("real\\ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        h.venue.set_groups(vec![group("real\\standard")]);
        dir.sync().await.unwrap();
        let err = dir.set_demo_default("demo\\standard").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn alias_overrides_display_name() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        let group = dir
            .set_alias("real\\standard", Some("Standard"))
            .await
            .unwrap();
        assert_eq!(group.display_name(), "Standard");
        dir.sync().await.unwrap();
        let group = h.store.group("real\\standard").await.unwrap();
        assert_eq!(group.alias.as_deref(), Some("Standard"));

        let cleared = dir.set_alias("real\\standard", Some("  ")).await.unwrap();
        assert_eq!(cleared.display_name(), "real\\standard");
    }

    #[tokio::test]
    async fn invalidation_drops_snapshot() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();
        dir.list_groups(true).await.unwrap();
        assert!(dir.has_snapshot());

        h.manager.invalidate_async().await.unwrap();
        assert!(!dir.has_snapshot());
    }

    #[tokio::test]
    async fn failed_enumeration_leaves_mirror_untouched() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        h.manager.invalidate_async().await.unwrap();
        h.venue.refuse_connect(Some(crate::venue::VenueCode::ERR_NETWORK));
        assert!(dir.sync().await.is_err());
        assert_eq!(dir.list_groups(true).await.unwrap().len(), 2);
    }

    #[test]
    fn cleared_cell_refuses_a_stale_install() {
        let mut cell = SnapshotCell::default();
        let generation = cell.generation;
        cell.clear();
        assert!(!cell.install(generation, Arc::new(Vec::new())));
        assert!(cell.groups.is_none());

        let generation = cell.generation;
        assert!(cell.install(generation, Arc::new(Vec::new())));
        assert!(cell.groups.is_some());
    }

    #[tokio::test]
    async fn refresh_racing_invalidation_is_not_cached() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();

        // a reader picks up the generation, then invalidation lands before it installs
        let generation = dir.snapshot.read().generation;
        let stale = Arc::new(h.store.list_trading_groups(true).await.unwrap());
        h.manager.invalidate_async().await.unwrap();
        assert!(!dir.snapshot.write().install(generation, stale));
        assert!(!dir.has_snapshot());

        assert_eq!(dir.list_groups(true).await.unwrap().len(), 2);
        assert!(dir.has_snapshot());
    }

    #[tokio::test]
    async fn retired_group_releases_default_slots() {
        let h = Harness::connected().await;
        let dir = directory(&h).await;
        dir.sync().await.unwrap();
        dir.set_demo_default("demo\\standard").await.unwrap();
        dir.set_default("real\\standard").await.unwrap();

        h.venue.set_groups(vec![group("real\\standard")]);
        dir.sync().await.unwrap();

        let retired = h.store.group("demo\\standard").await.unwrap();
        assert!(!retired.active);
        assert!(!retired.is_demo_default);
        assert!(dir.default_group(DefaultSlot::Demo).await.unwrap().is_none());
        assert_eq!(
            dir.default_group(DefaultSlot::Live).await.unwrap().map(|g| g.name),
            Some("real\\standard".to_string())
        );
    }
}
