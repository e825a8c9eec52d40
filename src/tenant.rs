use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Strip everything but `[A-Za-z0-9_-]` so the name is safe as a file stem.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Per-tenant engines. Each tenant (a rental company or storefront) gets its own engine, WAL,
/// compactor and, when configured, pending-booking reaper. All tenants share the catalog.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
}

impl TenantManager {
    pub fn new(config: EngineConfig, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            engines: DashMap::new(),
            config,
            catalog,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get or lazily create the engine for `tenant`. Must run inside a tokio runtime.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        // Entry lock keeps two callers from replaying the same WAL twice
        let engine = match self.engines.entry(tenant.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                std::fs::create_dir_all(&self.config.data_dir)?;
                let wal_path = self.config.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(
                    wal_path,
                    Arc::new(NotifyHub::new()),
                    self.catalog.clone(),
                    self.config.engine.clone(),
                )?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(reaper::run_compactor(engine.clone(), self.config.compact_threshold));
        if let Some(ttl) = self.config.pending_ttl {
            tokio::spawn(reaper::run_reaper(engine.clone(), ttl));
        }

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant = %safe_name, stock = engine.state.len(), "tenant loaded");
        Ok(engine)
    }

    /// Loaded tenant names, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Compact every loaded tenant's WAL concurrently. Returns the tenants that failed.
    pub async fn compact_all(&self) -> Vec<(String, EngineError)> {
        let engines: Vec<(String, Arc<Engine>)> = self
            .engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let results = join_all(engines.into_iter().map(|(tenant, engine)| async move {
            (tenant, engine.compact_wal().await)
        }))
        .await;

        let mut failures = Vec::new();
        for (tenant, result) in results {
            if let Err(e) = result {
                warn!(%tenant, "compaction failed: {e}");
                failures.push((tenant, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::model::RentableItem;
    use rust_decimal::Decimal;
    use std::fs;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentlock_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(name: &str) -> (TenantManager, Arc<InMemoryCatalog>, PathBuf) {
        let dir = test_data_dir(name);
        let catalog = Arc::new(InMemoryCatalog::new());
        let config = EngineConfig {
            data_dir: dir.clone(),
            ..EngineConfig::default()
        };
        (TenantManager::new(config, catalog.clone()), catalog, dir)
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let (tm, catalog, _) = manager("isolation");
        let item = Ulid::new();
        let branch = Ulid::new();
        catalog.upsert(RentableItem {
            id: item,
            price_per_day: Decimal::ONE,
            minimum_rental_days: 1,
        });

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();
        eng_a.provision_stock(item, branch, 1, None).await.unwrap();
        eng_b.provision_stock(item, branch, 5, None).await.unwrap();

        assert_eq!(eng_a.get_capacity(item, branch).await.unwrap().total, 1);
        assert_eq!(eng_b.get_capacity(item, branch).await.unwrap().total, 5);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let (tm, _, dir) = manager("lazy");
        assert!(fs::read_dir(&dir).unwrap().next().is_none());
        let _eng = tm.get_or_create("acme").unwrap();
        assert!(dir.join("acme.wal").exists());
        assert_eq!(tm.tenants(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let (tm, _, _) = manager("same_eng");
        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let (tm, _, dir) = manager("sanitize");
        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let (tm, _, _) = manager("name_too_long");
        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let (tm, _, _) = manager("count_limit");
        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }

    #[tokio::test]
    async fn compact_all_succeeds() {
        let (tm, _, _) = manager("compact_all");
        tm.get_or_create("a").unwrap();
        tm.get_or_create("b").unwrap();
        assert!(tm.compact_all().await.is_empty());
    }
}
