//! PostgreSQL implementation of the store traits.
//!
//! Tables are created by `migrations/`. Queries are runtime-checked
//! (`query_as` + `FromRow`) so the crate builds without a live database.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{CartStore, OrderStore, ProductStore, RepositoryError, StockApplication, TransitionCommit, UserDirectory};
use crate::domain::aggregates::{
    Cart, CartLine, LineItem, Order, OrderRecord, OrderStatus, PaymentRecord, Product, StockChange, StockLedgerEntry,
    StockLevel, StockReason,
};
use crate::domain::value_objects::{Money, OrderId, ProductId, Quantity, UserId};

/// Create a `PostgreSQL` connection pool.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
        if rows.is_empty() { return Ok(vec![]); }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_id, product_id, title, quantity, unit_price, subtotal
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItemRow>> = HashMap::new();
        for item in items { grouped.entry(item.order_id).or_default().push(item); }

        rows.into_iter()
            .map(|row| {
                let items = grouped.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect()
    }
}

const ORDER_COLUMNS: &str = "id, user_id, total, currency, status, payment_method, preference_id, payment_id, \
                             gateway_status, gateway_payload, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    total: Decimal,
    currency: String,
    status: String,
    payment_method: String,
    preference_id: Option<String>,
    payment_id: Option<String>,
    gateway_status: Option<String>,
    gateway_payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    title: String,
    quantity: i32,
    unit_price: Decimal,
    subtotal: Decimal,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> Result<Order, RepositoryError> {
        let status = OrderStatus::parse(&self.status)
            .map_err(|e| RepositoryError::DataCorruption(format!("order {}: {e}", self.id)))?;
        let items = items
            .into_iter()
            .map(|i| {
                let quantity = u32::try_from(i.quantity)
                    .ok()
                    .and_then(|q| Quantity::new(q).ok())
                    .ok_or_else(|| RepositoryError::DataCorruption(format!("order {}: quantity {}", self.id, i.quantity)))?;
                Ok(LineItem {
                    product_id: ProductId::from_uuid(i.product_id),
                    title: i.title,
                    quantity,
                    unit_price: Money::new(i.unit_price, &self.currency),
                    subtotal: Money::new(i.subtotal, &self.currency),
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Order::from(OrderRecord {
            id: OrderId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            items,
            total: Money::new(self.total, &self.currency),
            status,
            payment_method: self.payment_method,
            preference_id: self.preference_id,
            payment: PaymentRecord {
                payment_id: self.payment_id,
                gateway_status: self.gateway_status,
                gateway_payload: self.gateway_payload,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    unit_price: Decimal,
    currency: String,
    stock: i32,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Self {
            id: ProductId::from_uuid(r.id),
            name: r.name,
            unit_price: Money::new(r.unit_price, &r.currency),
            stock: r.stock,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    product_id: Uuid,
    delta: i32,
    reason: String,
    actor_id: Option<Uuid>,
    order_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for StockLedgerEntry {
    type Error = RepositoryError;
    fn try_from(r: LedgerRow) -> Result<Self, Self::Error> {
        let reason = StockReason::parse(&r.reason)
            .ok_or_else(|| RepositoryError::DataCorruption(format!("ledger {}: reason '{}'", r.id, r.reason)))?;
        Ok(Self {
            id: r.id,
            product_id: ProductId::from_uuid(r.product_id),
            delta: r.delta,
            reason,
            actor: r.actor_id.map(UserId::from_uuid),
            order_id: r.order_id.map(OrderId::from_uuid),
            created_at: r.created_at,
        })
    }
}

const LEDGER_COLUMNS: &str = "id, product_id, delta, reason, actor_id, order_id, created_at";

/// Locks the product row, clamps, writes the stock and appends the ledger
/// entry on the caller's transaction.
async fn apply_stock_change_in(conn: &mut PgConnection, change: &StockChange) -> Result<StockApplication, RepositoryError> {
    let current: Option<(i32,)> = sqlx::query_as("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
        .bind(change.product_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;
    let Some((stock,)) = current else {
        return Ok(None);
    };

    let level = StockLevel::apply(stock, change.delta);
    let product = sqlx::query_as::<_, ProductRow>(
        "UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1
         RETURNING id, name, unit_price, currency, stock, updated_at",
    )
    .bind(change.product_id.as_uuid())
    .bind(level.stock)
    .fetch_one(&mut *conn)
    .await?;

    let entry = StockLedgerEntry::record(change, level.applied);
    sqlx::query(
        "INSERT INTO stock_ledger (id, product_id, delta, reason, actor_id, order_id, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(entry.product_id.as_uuid())
    .bind(entry.delta)
    .bind(entry.reason.as_str())
    .bind(entry.actor.map(|u| u.as_uuid()))
    .bind(entry.order_id.map(|o| o.as_uuid()))
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(Some((Product::from(product), entry)))
}

async fn clear_cart_in(conn: &mut PgConnection, user_id: UserId) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE carts SET total = 0, updated_at = NOW() WHERE user_id = $1")
        .bind(user_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orders (id, user_id, total, currency, status, payment_method, preference_id, payment_id,
                                 gateway_status, gateway_payload, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.total().amount())
        .bind(order.total().currency())
        .bind(order.status().as_str())
        .bind(order.payment_method())
        .bind(order.preference_id())
        .bind(order.payment().payment_id.as_deref())
        .bind(order.payment().gateway_status.as_deref())
        .bind(order.payment().gateway_payload.clone())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("order {} or its preference already exists", order.id()))
            }
            e => RepositoryError::Database(e),
        })?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, position, product_id, title, quantity, unit_price, subtotal)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(order.id().as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_uuid())
            .bind(&item.title)
            .bind(item.quantity.value() as i32)
            .bind(item.unit_price.amount())
            .bind(item.subtotal.amount())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn find_by_preference(&self, preference_id: &str) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE preference_id = $1"))
            .bind(preference_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"))
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<Option<Vec<StockApplication>>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let swapped = sqlx::query("UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(commit.order_id.as_uuid())
            .bind(commit.from.as_str())
            .bind(commit.to.as_str())
            .execute(&mut *tx)
            .await?;
        if swapped.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut applied = Vec::with_capacity(commit.stock.len());
        for change in &commit.stock {
            applied.push(apply_stock_change_in(&mut *tx, change).await?);
        }
        if let Some(user_id) = commit.clear_cart {
            clear_cart_in(&mut *tx, user_id).await?;
        }
        tx.commit().await?;
        Ok(Some(applied))
    }

    async fn record_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE orders SET payment_id = $2, gateway_status = $3, gateway_payload = $4, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(payment.payment_id.as_deref())
        .bind(payment.gateway_status.as_deref())
        .bind(payment.gateway_payload.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_pending_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE orders SET payment_id = $2, gateway_status = $3, gateway_payload = $4, updated_at = NOW()
             WHERE id = $1 AND status = $5",
        )
        .bind(id.as_uuid())
        .bind(payment.payment_id.as_deref())
        .bind(payment.gateway_status.as_deref())
        .bind(payment.gateway_payload.clone())
        .bind(OrderStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, unit_price, currency, stock, updated_at FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn apply_stock_change(&self, change: &StockChange) -> Result<StockApplication, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let applied = apply_stock_change_in(&mut *tx, change).await?;
        tx.commit().await?;
        Ok(applied)
    }

    async fn history(&self, id: ProductId) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE product_id = $1 ORDER BY created_at DESC"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StockLedgerEntry::try_from)
        .collect()
    }

    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StockLedgerEntry::try_from)
        .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartItemRow {
    product_id: Uuid,
    quantity: i32,
    subtotal: Decimal,
}

#[async_trait]
impl CartStore for PgStore {
    async fn get(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        let total: Option<(Decimal,)> = sqlx::query_as("SELECT total FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some((total,)) = total else {
            return Ok(Cart::empty(user_id));
        };

        let items = sqlx::query_as::<_, CartItemRow>(
            "SELECT product_id, quantity, subtotal FROM cart_items WHERE user_id = $1 ORDER BY product_id",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| {
            let quantity = u32::try_from(r.quantity)
                .ok()
                .and_then(|q| Quantity::new(q).ok())
                .ok_or_else(|| RepositoryError::DataCorruption(format!("cart of {user_id}: quantity {}", r.quantity)))?;
            Ok(CartLine { product_id: ProductId::from_uuid(r.product_id), quantity, subtotal: r.subtotal })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Cart { user_id, items, total })
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn email(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(email,)| email))
    }
}
