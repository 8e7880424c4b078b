use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Identity, Role, Shopper};
use crate::orders::{
    AdminCreateOrderRequest, CreateOrderRequest, Invoice, InvoiceLine, NewOrder, Order, OrderError,
    OrderFilter, OrderListQuery, OrderPage, OrderResponse, OrderStatus, OrderStore, PriceCalculator,
    StatusMachine,
};

/// Retry policy for read projections
///
/// Mutations are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before retry `n` is `n * backoff`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Service for order business logic
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    retry: RetryPolicy,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn OrderStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Run a read, retrying transient storage failures with linear backoff
    async fn read<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrderError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut tried = 0;
        loop {
            tried += 1;
            match attempt().await {
                Err(err) if err.is_transient() && tried < attempts => {
                    tracing::warn!(
                        "Transient failure in {} (attempt {}/{}): {}",
                        operation,
                        tried,
                        attempts,
                        err
                    );
                    tokio::time::sleep(self.retry.backoff * tried).await;
                }
                result => return result,
            }
        }
    }

    /// Place an order from the shop, for a signed-in customer or a guest cart
    ///
    /// The order starts IN_PROGRESS and its stock is taken immediately.
    pub async fn place_order(
        &self,
        shopper: &Shopper,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, OrderError> {
        request.validate()?;

        let (owner_id, cart_session) = match shopper {
            Shopper::Customer(identity) => (Some(identity.user_id), None),
            Shopper::Guest { cart_session } => (None, Some(cart_session.clone())),
        };

        self.create(NewOrder {
            owner_id,
            cart_session,
            lines: request.items,
        })
        .await
    }

    /// Create an order from the back office, optionally on behalf of a client
    pub async fn admin_create_order(
        &self,
        request: AdminCreateOrderRequest,
    ) -> Result<OrderResponse, OrderError> {
        request.validate()?;

        self.create(NewOrder {
            owner_id: request.owner_id,
            cart_session: None,
            lines: request.items,
        })
        .await
    }

    async fn create(&self, new_order: NewOrder) -> Result<OrderResponse, OrderError> {
        for line in &new_order.lines {
            line.validate()?;
        }

        let details = self.store.create_order(new_order).await?;
        tracing::info!(
            "Order {} created with {} lines, total {}",
            details.order.id,
            details.items.len(),
            details.order.total_price
        );
        Ok(details.into())
    }

    /// IN_PROGRESS → PROCESSED
    pub async fn process_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.advance(order_id, OrderStatus::Processed).await
    }

    /// PROCESSED → COMPLETED; the invoice becomes available
    pub async fn complete_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.advance(order_id, OrderStatus::Completed).await
    }

    async fn advance(&self, order_id: Uuid, to: OrderStatus) -> Result<Order, OrderError> {
        let from = StatusMachine::required_source(to).ok_or_else(|| {
            OrderError::Validation(format!("Orders cannot be moved to {}", to))
        })?;

        let order = self.store.transition(order_id, from, to).await.map_err(|err| {
            if let OrderError::InvalidTransition { from, to } = &err {
                tracing::debug!("Rejected transition of order {} from {} to {}", order_id, from, to);
            }
            err
        })?;

        tracing::info!("Order {} moved from {} to {}", order_id, from, to);
        Ok(order)
    }

    /// Admin listing with optional status filter and pagination
    pub async fn list_orders(&self, query: OrderListQuery) -> Result<OrderPage, OrderError> {
        let filter = OrderFilter::from(query);
        let (orders, total) = self
            .read("list_orders", || self.store.list_orders(filter))
            .await?;

        Ok(OrderPage {
            orders: orders.into_iter().map(OrderResponse::from).collect(),
            page: filter.page,
            limit: filter.limit,
            total,
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, OrderError> {
        self.read("get_order", || self.store.find_order(order_id))
            .await?
            .map(OrderResponse::from)
            .ok_or(OrderError::NotFound)
    }

    /// Order history of a signed-in client, newest first
    pub async fn user_orders(&self, user_id: i32) -> Result<Vec<OrderResponse>, OrderError> {
        let orders = self
            .read("user_orders", || self.store.orders_for_owner(user_id))
            .await?;
        Ok(orders.into_iter().map(OrderResponse::from).collect())
    }

    /// Invoice of a COMPLETED order, for its owner or any moderator
    pub async fn invoice(&self, requester: &Identity, order_id: Uuid) -> Result<Invoice, OrderError> {
        let details = self
            .read("invoice", || self.store.find_order(order_id))
            .await?
            .ok_or(OrderError::NotFound)?;

        let is_owner = details.order.owner_id == Some(requester.user_id);
        if !is_owner && !requester.role.meets_minimum(Role::Moderator) {
            tracing::warn!(
                "User {} requested the invoice of order {} they do not own",
                requester.user_id,
                order_id
            );
            return Err(OrderError::Forbidden);
        }

        if details.order.status != OrderStatus::Completed {
            return Err(OrderError::InvoiceUnavailable {
                status: details.order.status,
            });
        }

        let product_ids: Vec<i32> = details.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<i32, _> = self
            .read("invoice_products", || self.store.find_products(&product_ids))
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let lines: Vec<InvoiceLine> = details
            .items
            .iter()
            .map(|item| {
                let product = products.get(&item.product_id);
                InvoiceLine {
                    product_id: item.product_id,
                    article: product.map(|p| p.article.clone()).unwrap_or_default(),
                    title: product.map(|p| p.title.clone()).unwrap_or_default(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal: PriceCalculator::calculate_subtotal(item.quantity, item.unit_price),
                }
            })
            .collect();
        let subtotals: Vec<_> = lines.iter().map(|line| line.subtotal).collect();

        Ok(Invoice {
            order_id: details.order.id,
            owner_id: details.order.owner_id,
            issued_at: details.order.updated_at,
            total: PriceCalculator::calculate_total(&subtotals),
            lines,
        })
    }
}
