//! Read-only item catalog joined into unit views.
//!
//! Items are owned elsewhere; the depot only reads name, category and unit
//! label by id.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use depot_core::ItemId;

use crate::store::postgres::map_sqlx_error;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    pub category: Option<String>,
    pub unit: Option<String>,
}

#[async_trait::async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError>;
}

#[async_trait::async_trait]
impl<C> ItemCatalog for std::sync::Arc<C>
where
    C: ItemCatalog + ?Sized,
{
    async fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        (**self).item(id).await
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryItemCatalog {
    items: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: CatalogItem) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        items.insert(item.id, item);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(items.get(&id).cloned())
    }
}

/// Reads `items(id, name, category, unit)`.
#[derive(Debug, Clone)]
pub struct PostgresItemCatalog {
    pool: PgPool,
}

impl PostgresItemCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ItemCatalog for PostgresItemCatalog {
    async fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        let row = sqlx::query("SELECT id, name, category, unit FROM items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("catalog_item", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| StoreError::Corrupt(format!("item {id}: {e}"));
        let id: Uuid = row.try_get("id").map_err(decode)?;
        Ok(Some(CatalogItem {
            id: ItemId::from_uuid(id),
            name: row.try_get("name").map_err(decode)?,
            category: row.try_get("category").map_err(decode)?,
            unit: row.try_get("unit").map_err(decode)?,
        }))
    }
}
