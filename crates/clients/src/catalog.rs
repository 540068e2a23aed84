//! Catalog lookup trait, HTTP adapter and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Price/title/stock snapshot returned by the catalog.
///
/// Extra catalog fields (description, images, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub title: String,
    pub price: Money,
    pub stock: u32,
}

impl ProductSnapshot {
    pub fn new(id: impl Into<ProductId>, title: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price,
            stock,
        }
    }
}

/// Errors from a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Short machine reason reported in validation details.
    pub fn reason(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::Unavailable(_) => "unavailable",
        }
    }
}

/// Read-only access to product snapshots.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn lookup(&self, product_id: &ProductId) -> Result<ProductSnapshot, CatalogError>;
}

/// Catalog reached over HTTP at `GET {base_url}/products/{id}`.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogLookup for HttpCatalog {
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    async fn lookup(&self, product_id: &ProductId) -> Result<ProductSnapshot, CatalogError> {
        let url = format!("{}/products/{}", self.base_url, product_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(product_id.clone()));
        }
        if !status.is_success() {
            tracing::warn!(%status, "catalog lookup failed");
            return Err(CatalogError::Unavailable(format!(
                "catalog responded with {status}"
            )));
        }

        response
            .json::<ProductSnapshot>()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("invalid catalog response: {e}")))
    }
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<ProductId, ProductSnapshot>,
    unavailable: bool,
    lookups: usize,
}

/// In-memory catalog, used when no catalog URL is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductSnapshot>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// The small demo dataset the storefront ships with.
    pub fn demo() -> Self {
        Self::with_products([
            ProductSnapshot::new("p1", "Wireless Headphones", Money::from_cents(9999), 120),
            ProductSnapshot::new("p2", "Gaming Mouse", Money::from_cents(4950), 80),
            ProductSnapshot::new("p3", "Coffee Mug", Money::from_cents(999), 300),
            ProductSnapshot::new("p4", "Yoga Mat", Money::from_cents(2500), 50),
        ])
    }

    pub fn upsert(&self, product: ProductSnapshot) {
        self.state
            .write()
            .products
            .insert(product.id.clone(), product);
    }

    pub fn remove(&self, product_id: &ProductId) {
        self.state.write().products.remove(product_id);
    }

    /// Makes every lookup fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.state.read().lookups
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn lookup(&self, product_id: &ProductId) -> Result<ProductSnapshot, CatalogError> {
        let mut state = self.state.write();
        state.lookups += 1;

        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog offline".to_string()));
        }
        state
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(product_id.clone()))
    }
}
