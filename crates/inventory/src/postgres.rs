use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Page, PageRequest, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::ledger::{ensure_positive, reasons, record_mutation};
use crate::{
    DEFAULT_REORDER_LEVEL, InventoryItem, InventoryLedger, InventoryLogEntry, LedgerError,
    LogAction, RestockOutcome, RestockRequest, Result,
};

const ITEM_COLUMNS: &str =
    "product_id, stock, reserved, warehouse, reorder_level, last_restock, created_at, updated_at";

/// PostgreSQL-backed inventory ledger.
///
/// Each mutation runs in one transaction holding the product row lock
/// (`SELECT ... FOR UPDATE`), so concurrent reservations of one product are
/// serialized by the database.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_item(row: PgRow) -> Result<InventoryItem> {
        Ok(InventoryItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            stock: to_u32(row.try_get("stock")?),
            reserved: to_u32(row.try_get("reserved")?),
            warehouse: row.try_get("warehouse")?,
            reorder_level: to_u32(row.try_get("reorder_level")?),
            last_restock: row.try_get("last_restock")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_log(row: PgRow) -> Result<InventoryLogEntry> {
        let action: String = row.try_get("action")?;
        let action = action.parse::<LogAction>().map_err(|e| {
            LedgerError::Database(sqlx::Error::Decode(e.into()))
        })?;

        Ok(InventoryLogEntry {
            id: row.try_get("id")?,
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            action,
            quantity: to_u32(row.try_get("quantity")?),
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn lock_item(
        tx: &mut Transaction<'_, Postgres>,
        product_id: &ProductId,
    ) -> Result<InventoryItem> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE product_id = $1 FOR UPDATE"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| LedgerError::NotFound(product_id.clone()))?;

        Self::row_to_item(row)
    }

    /// Must be called while holding the row lock so a concurrent caller with
    /// the same key observes the committed claim.
    async fn key_applied(
        tx: &mut Transaction<'_, Postgres>,
        product_id: &ProductId,
        action: LogAction,
        key: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM inventory_applied_keys
                WHERE product_id = $1 AND action = $2 AND idempotency_key = $3
            )
            "#,
        )
        .bind(product_id.as_str())
        .bind(action.as_str())
        .bind(key)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }

    async fn claim_key(
        tx: &mut Transaction<'_, Postgres>,
        product_id: &ProductId,
        action: LogAction,
        key: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_applied_keys (product_id, action, idempotency_key, applied_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(product_id.as_str())
        .bind(action.as_str())
        .bind(key)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_log(
        tx: &mut Transaction<'_, Postgres>,
        product_id: &ProductId,
        action: LogAction,
        quantity: u32,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_logs (product_id, action, quantity, reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(product_id.as_str())
        .bind(action.as_str())
        .bind(i64::from(quantity))
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Shared body of reserve and release.
    async fn adjust_reserved(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
        adjustment: Adjustment,
    ) -> Result<InventoryItem> {
        ensure_positive(quantity)?;
        let action = adjustment.action();
        let mut tx = self.pool.begin().await?;
        let item = Self::lock_item(&mut tx, product_id).await?;

        if let Some(key) = idempotency_key
            && Self::key_applied(&mut tx, product_id, action, key).await?
        {
            tx.commit().await?;
            tracing::debug!(%product_id, %action, "mutation already applied for key");
            return Ok(item);
        }

        let (delta, reason) = match adjustment {
            Adjustment::Reserve => {
                let available = item.available();
                if available < quantity {
                    return Err(LedgerError::InsufficientStock {
                        product_id: product_id.clone(),
                        requested: quantity,
                        available,
                    });
                }
                (i64::from(quantity), reasons::ORDER_PLACEMENT)
            }
            Adjustment::Release => {
                if quantity > item.reserved {
                    return Err(LedgerError::OverRelease {
                        product_id: product_id.clone(),
                        requested: quantity,
                        reserved: item.reserved,
                    });
                }
                (-i64::from(quantity), reasons::ORDER_CANCELLATION)
            }
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory_items SET reserved = reserved + $2, updated_at = $3
            WHERE product_id = $1
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(delta)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        let updated = Self::row_to_item(row)?;

        if let Some(key) = idempotency_key {
            Self::claim_key(&mut tx, product_id, action, key).await?;
        }
        Self::append_log(&mut tx, product_id, action, quantity, reason).await?;
        tx.commit().await?;

        record_mutation(action, quantity);
        tracing::debug!(%product_id, %action, available = updated.available(), "reservation adjusted");
        Ok(updated)
    }
}

#[derive(Debug, Clone, Copy)]
enum Adjustment {
    Reserve,
    Release,
}

impl Adjustment {
    fn action(self) -> LogAction {
        match self {
            Adjustment::Reserve => LogAction::Reserved,
            Adjustment::Release => LogAction::Released,
        }
    }
}

/// Columns are BIGINT guarded by CHECK constraints; clamp instead of failing.
fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    async fn get(&self, product_id: &ProductId) -> Result<InventoryItem> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE product_id = $1"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::NotFound(product_id.clone()))?;

        Self::row_to_item(row)
    }

    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem> {
        self.adjust_reserved(product_id, quantity, idempotency_key, Adjustment::Reserve)
            .await
    }

    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem> {
        self.adjust_reserved(product_id, quantity, idempotency_key, Adjustment::Release)
            .await
    }

    async fn restock(
        &self,
        product_id: &ProductId,
        request: RestockRequest,
    ) -> Result<RestockOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_items
                (product_id, stock, reserved, warehouse, reorder_level, last_restock, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $5, $6, $6)
            ON CONFLICT (product_id) DO NOTHING
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(i64::from(request.stock.unwrap_or(0)))
        .bind(request.warehouse.as_deref())
        .bind(i64::from(request.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL)))
        .bind(request.stock.map(|_| now))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let (item, created) = match inserted {
            Some(row) => (Self::row_to_item(row)?, true),
            None => {
                let current = Self::lock_item(&mut tx, product_id).await?;
                if let Some(stock) = request.stock
                    && stock < current.reserved
                {
                    return Err(LedgerError::StockBelowReserved {
                        product_id: product_id.clone(),
                        stock,
                        reserved: current.reserved,
                    });
                }

                let row = sqlx::query(&format!(
                    r#"
                    UPDATE inventory_items SET
                        stock = COALESCE($2, stock),
                        warehouse = COALESCE($3, warehouse),
                        reorder_level = COALESCE($4, reorder_level),
                        last_restock = CASE WHEN $2 IS NULL THEN last_restock ELSE $5 END,
                        updated_at = $5
                    WHERE product_id = $1
                    RETURNING {ITEM_COLUMNS}
                    "#
                ))
                .bind(product_id.as_str())
                .bind(request.stock.map(i64::from))
                .bind(request.warehouse.as_deref())
                .bind(request.reorder_level.map(i64::from))
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                (Self::row_to_item(row)?, false)
            }
        };

        if let Some(stock) = request.stock {
            Self::append_log(&mut tx, product_id, LogAction::Added, stock, reasons::ADMIN_RESTOCK)
                .await?;
        }
        tx.commit().await?;

        if let Some(stock) = request.stock {
            record_mutation(LogAction::Added, stock);
        }
        tracing::info!(%product_id, created, stock = item.stock, "inventory restocked");
        Ok(RestockOutcome { item, created })
    }

    async fn seed(&self, product_id: &ProductId, stock: u32) -> Result<InventoryItem> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_items
                (product_id, stock, reserved, reorder_level, last_restock, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $4, $4)
            ON CONFLICT (product_id) DO NOTHING
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(product_id.as_str())
        .bind(i64::from(stock))
        .bind(i64::from(DEFAULT_REORDER_LEVEL))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let item = match inserted {
            Some(row) => {
                let item = Self::row_to_item(row)?;
                Self::append_log(&mut tx, product_id, LogAction::Added, stock, reasons::CATALOG_SEED)
                    .await?;
                tx.commit().await?;
                record_mutation(LogAction::Added, stock);
                tracing::info!(%product_id, stock, "inventory seeded from catalog");
                item
            }
            None => {
                tx.rollback().await?;
                self.get(product_id).await?
            }
        };
        Ok(item)
    }

    async fn expire_keys(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM inventory_applied_keys WHERE applied_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn logs(
        &self,
        product_id: &ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryLogEntry>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inventory_logs WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, action, quantity, reason, created_at
            FROM inventory_logs
            WHERE product_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Self::row_to_log)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: page.page(),
            limit: page.limit(),
        })
    }
}
