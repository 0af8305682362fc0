use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::entities::{order, order_item};
use crate::errors::{ErrorBody, ServiceError};
use crate::handlers::ApiJson;
use crate::repositories::order_repository::{OrderScope, OrderSummary, StatusCounts};
use crate::services::orders::{CreateOrderInput, CreatedOrder};
use crate::AppState;

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/track", post(track_order))
        .route(
            "/:order_id",
            get(get_order)
                .patch(update_order_status)
                .delete(delete_order),
        )
}

// Wire DTOs

/// One order with its cart lines, as returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: i64,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_address: Option<String>,
    pub customer_city: Option<String>,
    pub customer_zip: Option<String>,
    pub country: String,
    pub service_type: String,
    #[schema(value_type = String, example = "5.00")]
    pub delivery_fee: Decimal,
    pub payment_method: Option<String>,
    #[schema(value_type = String, example = "0.00")]
    pub payment_fee: Decimal,
    pub payment_status: String,
    pub packeta_point: Option<String>,
    pub notes: Option<String>,
    #[schema(value_type = String, example = "54.99")]
    pub total: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemDetail>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDetail {
    pub id: i64,
    pub device: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub repair_type: String,
    pub repair_name: String,
    #[schema(value_type = String, example = "49.99")]
    pub price: Decimal,
    pub printer: Option<String>,
    pub filament: Option<String>,
    pub color: Option<String>,
    pub parts: Option<i32>,
    pub file_name: Option<String>,
}

impl OrderDetail {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            customer_address: order.customer_address,
            customer_city: order.customer_city,
            customer_zip: order.customer_zip,
            country: order.country,
            service_type: order.service_type,
            delivery_fee: order.delivery_fee,
            payment_method: order.payment_method,
            payment_fee: order.payment_fee,
            payment_status: order.payment_status,
            packeta_point: order.packeta_point,
            notes: order.notes,
            total: order.total,
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items.into_iter().map(OrderItemDetail::from).collect(),
        }
    }
}

impl From<order_item::Model> for OrderItemDetail {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            device: item.device,
            brand: item.brand,
            model: item.model,
            repair_type: item.repair_type,
            repair_name: item.repair_name,
            price: item.price,
            printer: item.printer,
            filament: item.filament,
            color: item.color,
            parts: item.parts,
            file_name: item.file_name,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackOrderRequest {
    #[validate(length(min = 1, message = "Order number is required"))]
    pub order_number: String,
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// One of the seven order statuses, e.g. `in-progress`
    pub status: String,
}

// Response envelopes

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderListBody {
    pub success: bool,
    pub orders: Vec<OrderSummary>,
    pub status_counts: StatusCounts,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderBody {
    pub success: bool,
    pub order: OrderDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedBody {
    pub success: bool,
    pub message: String,
    pub order: CreatedOrder,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusView {
    pub id: i64,
    pub order_number: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusChangedBody {
    pub success: bool,
    pub message: String,
    pub order: OrderStatusView,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageBody {
    pub success: bool,
    pub message: String,
}

fn parse_order_id(raw: &str) -> Result<i64, ServiceError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ServiceError::ValidationError(format!("Invalid order id: {}", raw)))
}

fn scope_for(user: &AuthUser) -> OrderScope {
    if user.is_manager() {
        OrderScope::Any
    } else {
        OrderScope::OwnedBy(user.id)
    }
}

fn require_manager(user: &AuthUser) -> Result<(), ServiceError> {
    if user.is_manager() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only staff can manage orders".to_string(),
        ))
    }
}

/// List orders visible to the caller
#[utoipa::path(
    get,
    path = "/orders",
    summary = "List orders",
    description = "Orders visible to the caller, newest first, with dashboard status counts. Staff see every order, customers only their own.",
    responses(
        (status = 200, description = "Orders retrieved", body = OrderListBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<OrderListBody>, ServiceError> {
    let (orders, status_counts) = state.orders.list_orders(scope_for(&auth_user)).await?;
    Ok(Json(OrderListBody {
        success: true,
        orders,
        status_counts,
    }))
}

/// Public order tracking
#[utoipa::path(
    post,
    path = "/orders/track",
    summary = "Track an order",
    description = "Looks an order up by order number and email. No authentication; both values match case-insensitively.",
    request_body = TrackOrderRequest,
    responses(
        (status = 200, description = "Order found", body = OrderBody),
        (status = 400, description = "Missing number or email", body = ErrorBody),
        (status = 404, description = "No matching order", body = ErrorBody),
    )
)]
pub async fn track_order(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TrackOrderRequest>,
) -> Result<Json<OrderBody>, ServiceError> {
    request.validate()?;
    let (order, items) = state
        .orders
        .track_order(&request.order_number, &request.email)
        .await?;
    Ok(Json(OrderBody {
        success: true,
        order: OrderDetail::from_parts(order, items),
    }))
}

/// Fetch one order with its items
#[utoipa::path(
    get,
    path = "/orders/{order_id}",
    summary = "Get order",
    description = "One order with its items. Customers only reach orders tied to their account; a foreign order answers 404.",
    params(("order_id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = OrderBody),
        (status = 400, description = "Malformed order id", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<OrderBody>, ServiceError> {
    let id = parse_order_id(&order_id)?;
    let (order, items) = state.orders.get_order(id, scope_for(&auth_user)).await?;
    Ok(Json(OrderBody {
        success: true,
        order: OrderDetail::from_parts(order, items),
    }))
}

/// Checkout
#[utoipa::path(
    post,
    path = "/orders",
    summary = "Create order",
    description = "Creates an order from a cart payload. Guests may order; a signed-in customer becomes the order's owner.",
    request_body = CreateOrderInput,
    responses(
        (status = 201, description = "Order created", body = CreatedBody),
        (status = 400, description = "Invalid cart or customer data", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody),
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    ApiJson(input): ApiJson<CreateOrderInput>,
) -> Result<(StatusCode, Json<CreatedBody>), ServiceError> {
    let user_id = auth_user.map(|user| user.id);
    let order = state.orders.create_order(input, user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedBody {
            success: true,
            message: format!("Order {} created", order.order_number),
            order,
        }),
    ))
}

/// Set an order's status
#[utoipa::path(
    patch,
    path = "/orders/{order_id}",
    summary = "Update order status",
    description = "Staff only. Sets the order to any of the seven statuses and queues the customer notification.",
    params(("order_id" = i64, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = StatusChangedBody),
        (status = 400, description = "Unknown status value", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 403, description = "Caller is not staff", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> Result<Json<StatusChangedBody>, ServiceError> {
    require_manager(&auth_user)?;
    let id = parse_order_id(&order_id)?;
    let updated = state.orders.transition_status(id, &request.status).await?;
    Ok(Json(StatusChangedBody {
        success: true,
        message: format!("Order {} is now {}", updated.order_number, updated.status),
        order: OrderStatusView {
            id: updated.id,
            order_number: updated.order_number,
            status: updated.status,
            updated_at: updated.updated_at,
        },
    }))
}

/// Delete an order
#[utoipa::path(
    delete,
    path = "/orders/{order_id}",
    summary = "Delete order",
    description = "Staff only. Removes the order together with its items and queued notifications.",
    params(("order_id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order deleted", body = MessageBody),
        (status = 400, description = "Malformed order id", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 403, description = "Caller is not staff", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<MessageBody>, ServiceError> {
    require_manager(&auth_user)?;
    let id = parse_order_id(&order_id)?;
    state.orders.delete_order(id).await?;
    Ok(Json(MessageBody {
        success: true,
        message: "Order deleted".to_string(),
    }))
}
