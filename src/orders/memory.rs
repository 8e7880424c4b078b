// In-memory order store
//
// One mutex covers products and orders, so a stock check and its decrement can
// never interleave with another order.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::orders::error::OrderError;
use crate::orders::repository::{aggregate_demand, check_stock, order_total, OrderStore};
use crate::orders::{NewOrder, Order, OrderDetails, OrderFilter, OrderItem, OrderStatus, Product, StatusMachine};

#[derive(Default)]
struct Inventory {
    next_product_id: i32,
    next_item_id: i32,
    products: BTreeMap<i32, Product>,
    orders: HashMap<Uuid, OrderDetails>,
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: Mutex<Inventory>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product with an initial stock
    pub async fn add_product(&self, article: &str, title: &str, price: Decimal, stock: i32) -> Product {
        let mut inventory = self.inner.lock().await;
        inventory.next_product_id += 1;
        let product = Product {
            id: inventory.next_product_id,
            article: article.to_string(),
            title: title.to_string(),
            price,
            amount_in_stock: stock,
        };
        inventory.products.insert(product.id, product.clone());
        product
    }

    pub async fn stock_of(&self, product_id: i32) -> Option<i32> {
        self.inner
            .lock()
            .await
            .products
            .get(&product_id)
            .map(|product| product.amount_in_stock)
    }
}

fn newest_first(orders: &mut [OrderDetails]) {
    orders.sort_by(|a, b| {
        b.order
            .created_at
            .cmp(&a.order.created_at)
            .then_with(|| a.order.id.cmp(&b.order.id))
    });
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderDetails, OrderError> {
        let demand = aggregate_demand(&new_order.lines)?;

        let mut inventory = self.inner.lock().await;
        let locked: HashMap<i32, Product> = demand
            .keys()
            .filter_map(|id| inventory.products.get(id).map(|p| (*id, p.clone())))
            .collect();
        let prices = check_stock(&demand, &locked)?;

        for (product_id, requested) in &demand {
            if let Some(product) = inventory.products.get_mut(product_id) {
                product.amount_in_stock -= requested;
            }
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            owner_id: new_order.owner_id,
            cart_session: new_order.cart_session.clone(),
            status: OrderStatus::InProgress,
            total_price: order_total(&new_order.lines, &prices),
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(new_order.lines.len());
        for line in &new_order.lines {
            inventory.next_item_id += 1;
            items.push(OrderItem {
                id: inventory.next_item_id,
                order_id: order.id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: prices.get(&line.product_id).copied().unwrap_or_default(),
            });
        }

        let details = OrderDetails { order, items };
        inventory.orders.insert(details.order.id, details.clone());
        Ok(details)
    }

    async fn transition(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Order, OrderError> {
        let mut inventory = self.inner.lock().await;
        let details = inventory.orders.get_mut(&id).ok_or(OrderError::NotFound)?;

        let actual = details.order.status;
        if actual != from {
            return Err(OrderError::InvalidTransition { from: actual, to });
        }

        details.order.status = StatusMachine::transition(actual, to)?;
        details.order.updated_at = Utc::now();
        Ok(details.order.clone())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderDetails>, OrderError> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<(Vec<OrderDetails>, i64), OrderError> {
        let inventory = self.inner.lock().await;
        let mut matching: Vec<OrderDetails> = inventory
            .orders
            .values()
            .filter(|details| filter.status.map_or(true, |status| details.order.status == status))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn orders_for_owner(&self, owner_id: i32) -> Result<Vec<OrderDetails>, OrderError> {
        let inventory = self.inner.lock().await;
        let mut owned: Vec<OrderDetails> = inventory
            .orders
            .values()
            .filter(|details| details.order.owner_id == Some(owner_id))
            .cloned()
            .collect();
        newest_first(&mut owned);
        Ok(owned)
    }

    async fn find_products(&self, ids: &[i32]) -> Result<Vec<Product>, OrderError> {
        let inventory = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inventory.products.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::OrderItemRequest;
    use rust_decimal_macros::dec;

    fn new_order(product_id: i32, quantity: i32) -> NewOrder {
        NewOrder {
            owner_id: Some(1),
            cart_session: None,
            lines: vec![OrderItemRequest { product_id, quantity }],
        }
    }

    #[tokio::test]
    async fn test_failed_order_changes_nothing() {
        let store = InMemoryOrderStore::new();
        let a = store.add_product("A-1", "First", dec!(1.00), 5).await;
        let b = store.add_product("B-1", "Second", dec!(1.00), 1).await;

        let order = NewOrder {
            owner_id: None,
            cart_session: Some("cart".to_string()),
            lines: vec![
                OrderItemRequest { product_id: a.id, quantity: 2 },
                OrderItemRequest { product_id: b.id, quantity: 2 },
            ],
        };
        assert!(matches!(
            store.create_order(order).await,
            Err(OrderError::InsufficientStock { .. })
        ));
        assert_eq!(store.stock_of(a.id).await, Some(5));
        assert_eq!(store.stock_of(b.id).await, Some(1));
        assert_eq!(store.list_orders(OrderFilter { status: None, page: 1, limit: 10 }).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_transition_reports_actual_status() {
        let store = InMemoryOrderStore::new();
        let p = store.add_product("P-1", "Product", dec!(3.00), 3).await;
        let details = store.create_order(new_order(p.id, 1)).await.unwrap();
        let id = details.order.id;

        let err = store
            .transition(id, OrderStatus::Processed, OrderStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition { from: OrderStatus::InProgress, to: OrderStatus::Completed }
        ));

        let order = store
            .transition(id, OrderStatus::InProgress, OrderStatus::Processed)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processed);

        assert!(matches!(
            store.transition(Uuid::new_v4(), OrderStatus::InProgress, OrderStatus::Processed).await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_orders_filters_and_pages() {
        let store = InMemoryOrderStore::new();
        let p = store.add_product("P-2", "Product", dec!(1.00), 10).await;
        for _ in 0..3 {
            store.create_order(new_order(p.id, 1)).await.unwrap();
        }
        let first = store.list_orders(OrderFilter { status: None, page: 1, limit: 2 }).await.unwrap();
        assert_eq!(first.0.len(), 2);
        assert_eq!(first.1, 3);

        let second = store.list_orders(OrderFilter { status: None, page: 2, limit: 2 }).await.unwrap();
        assert_eq!(second.0.len(), 1);

        let processed = store
            .list_orders(OrderFilter { status: Some(OrderStatus::Processed), page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(processed.1, 0);
    }
}
