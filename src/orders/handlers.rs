// HTTP handlers for order endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::auth::{AuthenticatedUser, Shopper};
use crate::orders::{
    AdminCreateOrderRequest, CreateOrderRequest, Invoice, InvoiceQuery, Order, OrderError,
    OrderIdParams, OrderListQuery, OrderPage, OrderResponse, OrderService,
};

/// Handler for POST /api/shopping/order
/// Places an order for a signed-in customer or a guest cart session
pub async fn place_order_handler(
    shopper: Shopper,
    State(service): State<Arc<OrderService>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), OrderError> {
    let order = service.place_order(&shopper, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Handler for POST /api/admin/order
pub async fn admin_create_order_handler(
    State(service): State<Arc<OrderService>>,
    Json(request): Json<AdminCreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), OrderError> {
    let order = service.admin_create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Handler for GET /api/admin/orders
pub async fn list_orders_handler(
    State(service): State<Arc<OrderService>>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderPage>, OrderError> {
    Ok(Json(service.list_orders(query).await?))
}

/// Handler for GET /api/admin/order?id=
pub async fn get_order_handler(
    State(service): State<Arc<OrderService>>,
    Query(params): Query<OrderIdParams>,
) -> Result<Json<OrderResponse>, OrderError> {
    Ok(Json(service.get_order(params.id).await?))
}

/// Handler for PUT /api/admin/processed-order
pub async fn process_order_handler(
    State(service): State<Arc<OrderService>>,
    Json(params): Json<OrderIdParams>,
) -> Result<Json<Order>, OrderError> {
    Ok(Json(service.process_order(params.id).await?))
}

/// Handler for PUT /api/admin/complete-order
pub async fn complete_order_handler(
    State(service): State<Arc<OrderService>>,
    Json(params): Json<OrderIdParams>,
) -> Result<Json<Order>, OrderError> {
    Ok(Json(service.complete_order(params.id).await?))
}

/// Handler for GET /api/client/user-orders
pub async fn user_orders_handler(
    AuthenticatedUser(identity): AuthenticatedUser,
    State(service): State<Arc<OrderService>>,
) -> Result<Json<Vec<OrderResponse>>, OrderError> {
    Ok(Json(service.user_orders(identity.user_id).await?))
}

/// Handler for GET /api/invoice?order_id=
pub async fn invoice_handler(
    AuthenticatedUser(identity): AuthenticatedUser,
    State(service): State<Arc<OrderService>>,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<Invoice>, OrderError> {
    Ok(Json(service.invoice(&identity, query.order_id).await?))
}
