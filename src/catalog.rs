use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::RentableItem;

#[derive(Debug, Clone, Error)]
#[error("catalog unavailable: {0}")]
pub struct CatalogError(pub String);

/// Read-only lookup of rentable items, owned by the catalog service.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn rentable_item(&self, id: Ulid) -> Result<Option<RentableItem>, CatalogError>;
}

/// Catalog backed by a concurrent map, for embedding and tests.
pub struct InMemoryCatalog {
    items: DashMap<Ulid, RentableItem>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or replace an item. Replacing changes the price for future admissions only.
    pub fn upsert(&self, item: RentableItem) {
        self.items.insert(item.id, item);
    }

    pub fn remove(&self, id: &Ulid) -> Option<RentableItem> {
        self.items.remove(id).map(|(_, item)| item)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn rentable_item(&self, id: Ulid) -> Result<Option<RentableItem>, CatalogError> {
        Ok(self.items.get(&id).map(|e| e.value().clone()))
    }
}
