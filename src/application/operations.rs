//! Site operations shared by the admin HTTP surface and the CLI.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    application::{
        license::{LicenseService, resolve_tier},
        options::{
            ImportError, OptionsError, OptionsStore, activate_defaults, export_settings,
            import_settings, snapshot_or_default,
        },
        wiring::{Wiring, wire},
    },
    cache::{PageCacheEngine, StoreError},
    domain::{features::Feature, settings::OptimizationSettings, tier::Tier},
    util::bytes::human_bytes,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatsView {
    pub entries: u64,
    pub bytes: u64,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityView {
    pub feature: Feature,
    pub minimum_tier: Tier,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilitiesView {
    pub tier: Tier,
    pub features: Vec<CapabilityView>,
}

#[derive(Clone)]
pub struct SiteOperations {
    store: Arc<dyn OptionsStore>,
    license: LicenseService,
    engine: PageCacheEngine,
}

impl SiteOperations {
    pub fn new(
        store: Arc<dyn OptionsStore>,
        license: LicenseService,
        engine: PageCacheEngine,
    ) -> Self {
        Self {
            store,
            license,
            engine,
        }
    }

    pub fn license(&self) -> &LicenseService {
        &self.license
    }

    pub fn engine(&self) -> &PageCacheEngine {
        &self.engine
    }

    pub fn options(&self) -> &Arc<dyn OptionsStore> {
        &self.store
    }

    /// Settings and tier read from one snapshot, then wired.
    pub async fn wiring_at(&self, now: OffsetDateTime) -> Wiring {
        let snapshot = snapshot_or_default(self.store.as_ref()).await;
        let settings = OptimizationSettings::from_snapshot(&snapshot);
        wire(&settings, resolve_tier(&snapshot, now))
    }

    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        self.engine.clear_all().await
    }

    pub async fn cache_stats(&self) -> Result<CacheStatsView, StoreError> {
        let stats = self.engine.stats().await?;
        Ok(CacheStatsView {
            entries: stats.entries,
            bytes: stats.bytes,
            size: human_bytes(stats.bytes),
        })
    }

    pub async fn capabilities_at(&self, now: OffsetDateTime) -> CapabilitiesView {
        let tier = self.license.resolver().effective_tier_at(now).await;
        CapabilitiesView {
            tier,
            features: Feature::all()
                .map(|feature| CapabilityView {
                    feature,
                    minimum_tier: feature.minimum_tier(),
                    available: feature.is_available_for(tier),
                })
                .collect(),
        }
    }

    pub async fn export_settings(&self, now: OffsetDateTime) -> Result<String, OptionsError> {
        export_settings(self.store.as_ref(), now).await
    }

    pub async fn import_settings(&self, json: &str) -> Result<usize, ImportError> {
        import_settings(self.store.as_ref(), json).await
    }

    pub async fn activate_defaults(&self) -> Result<usize, OptionsError> {
        activate_defaults(self.store.as_ref()).await
    }
}
