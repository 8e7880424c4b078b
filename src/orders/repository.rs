use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::orders::error::OrderError;
use crate::orders::{
    NewOrder, Order, OrderDetails, OrderFilter, OrderItem, OrderItemRequest, OrderStatus,
    PriceCalculator, Product,
};

/// Persistence for orders and the stock they consume
///
/// `create_order` is all-or-nothing: stock is checked and decremented in the
/// same atomic step that records the order. `transition` is a compare-and-set
/// on the current status.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderDetails, OrderError>;

    /// Move the order from `from` to `to`
    ///
    /// Fails with `NotFound` for a missing order and with
    /// `InvalidTransition { from: <actual>, to }` when the status differs.
    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Order, OrderError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, OrderError>;

    /// Page of orders, newest first, and the total count for the filter
    async fn list_orders(&self, filter: OrderFilter) -> Result<(Vec<OrderDetails>, i64), OrderError>;

    async fn orders_for_owner(&self, owner_id: i32) -> Result<Vec<OrderDetails>, OrderError>;

    async fn find_products(&self, ids: &[i32]) -> Result<Vec<Product>, OrderError>;
}

/// Sum requested quantities per product, keyed in ascending product id order
pub(crate) fn aggregate_demand(lines: &[OrderItemRequest]) -> Result<BTreeMap<i32, i32>, OrderError> {
    if lines.is_empty() {
        return Err(OrderError::Validation(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut demand = BTreeMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(OrderError::Validation(format!(
                "Quantity must be at least 1, got {}",
                line.quantity
            )));
        }
        let total = demand.entry(line.product_id).or_insert(0i32);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            OrderError::Validation(format!("Quantity too large for product {}", line.product_id))
        })?;
    }
    Ok(demand)
}

/// Check summed demand against locked product rows
///
/// Returns the unit price snapshot of every requested product.
pub(crate) fn check_stock(
    demand: &BTreeMap<i32, i32>,
    products: &HashMap<i32, Product>,
) -> Result<HashMap<i32, Decimal>, OrderError> {
    let mut prices = HashMap::with_capacity(demand.len());
    for (&product_id, &requested) in demand {
        let product = products
            .get(&product_id)
            .ok_or(OrderError::ProductNotFound(product_id))?;

        if product.amount_in_stock < requested {
            return Err(OrderError::InsufficientStock {
                product_id,
                requested,
                available: product.amount_in_stock,
            });
        }
        prices.insert(product_id, product.price);
    }
    Ok(prices)
}

/// Order total from the requested lines and their price snapshots
pub(crate) fn order_total(lines: &[OrderItemRequest], prices: &HashMap<i32, Decimal>) -> Decimal {
    PriceCalculator::total_of(lines.iter().map(|line| {
        let unit_price = prices.get(&line.product_id).copied().unwrap_or_default();
        (line.quantity, unit_price)
    }))
}

const ORDER_COLUMNS: &str = "id, owner_id, cart_session, status, total_price, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price";
const PRODUCT_COLUMNS: &str = "id, article, title, price, amount_in_stock";

/// Postgres-backed order store
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the items of `orders` and pair them up, keeping the order of `orders`
    async fn attach_items(&self, orders: Vec<Order>) -> Result<Vec<OrderDetails>, OrderError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {} FROM order_items WHERE order_id = ANY($1) ORDER BY id",
            ITEM_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = by_order.remove(&order.id).unwrap_or_default();
                OrderDetails { order, items }
            })
            .collect())
    }

    /// Lock the requested product rows in ascending id order
    async fn lock_products(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[i32],
    ) -> Result<HashMap<i32, Product>, OrderError> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            PRODUCT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(products.into_iter().map(|product| (product.id, product)).collect())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderDetails, OrderError> {
        let demand = aggregate_demand(&new_order.lines)?;
        let product_ids: Vec<i32> = demand.keys().copied().collect();

        // Dropping the transaction on any early return rolls back every lock and write
        let mut tx = self.pool.begin().await?;

        let products = Self::lock_products(&mut tx, &product_ids).await?;
        let prices = check_stock(&demand, &products)?;

        for (&product_id, &requested) in &demand {
            sqlx::query("UPDATE products SET amount_in_stock = amount_in_stock - $1 WHERE id = $2")
                .bind(requested)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }

        let total_price = order_total(&new_order.lines, &prices);
        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (id, owner_id, cart_session, status, total_price) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new_order.owner_id)
        .bind(&new_order.cart_session)
        .bind(OrderStatus::InProgress)
        .bind(total_price)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_foreign_key_violation() {
                    return OrderError::Validation("Order owner does not exist".to_string());
                }
            }
            OrderError::from(e)
        })?;

        let mut items = Vec::with_capacity(new_order.lines.len());
        for line in &new_order.lines {
            let unit_price = prices.get(&line.product_id).copied().unwrap_or_default();
            let item = sqlx::query_as::<_, OrderItem>(&format!(
                "INSERT INTO order_items (order_id, product_id, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4) RETURNING {}",
                ITEM_COLUMNS
            ))
            .bind(order.id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(unit_price)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item);
        }

        tx.commit().await?;

        Ok(OrderDetails { order, items })
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Order, OrderError> {
        let updated = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = $3 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(to)
        .bind(id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(order) = updated {
            return Ok(order);
        }

        let actual = sqlx::query_scalar::<_, OrderStatus>("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            None => Err(OrderError::NotFound),
            Some(actual) => Err(OrderError::InvalidTransition { from: actual, to }),
        }
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, OrderError> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match order {
            Some(order) => Ok(self.attach_items(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<(Vec<OrderDetails>, i64), OrderError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders \
             WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id \
             LIMIT $2 OFFSET $3",
            ORDER_COLUMNS
        ))
        .bind(filter.status)
        .bind(i64::from(filter.limit))
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(filter.status)
        .fetch_one(&self.pool)
        .await?;

        Ok((self.attach_items(orders).await?, total))
    }

    async fn orders_for_owner(&self, owner_id: i32) -> Result<Vec<OrderDetails>, OrderError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        self.attach_items(orders).await
    }

    async fn find_products(&self, ids: &[i32]) -> Result<Vec<Product>, OrderError> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = ANY($1) ORDER BY id",
            PRODUCT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }
}
