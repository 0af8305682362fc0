use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::entities::order::{ActiveModel as OrderActiveModel, Model as OrderModel};
use crate::entities::order_item::{ActiveModel as OrderItemActiveModel, Model as OrderItemModel};
use crate::errors::ServiceError;
use crate::notifications::{
    outbox, NotificationKind, NotificationPayload, OrderDigest, TemplateData,
};
use crate::pricing::{self, ServiceType};
use crate::repositories::order_repository::{
    OrderRepository, OrderScope, OrderSummary, StatusCounts,
};

/// Workflow states an order can sit in. Any state may be set from any
/// other; the staff decide what makes sense for a repair, so no
/// adjacency graph is enforced here.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Waiting,
    Delivering,
    Completed,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// One cart line as the storefront submits it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInput {
    pub device: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub repair_type: String,
    pub repair_name: String,
    /// Unit price; the storefront sends numbers and numeric strings
    #[schema(value_type = Object)]
    pub price: Value,
    pub printer: Option<String>,
    pub filament: Option<String>,
    pub color: Option<String>,
    pub parts: Option<i32>,
    pub file_name: Option<String>,
}

/// Checkout request body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(email(message = "A valid customer email is required"))]
    pub customer_email: String,
    #[validate(length(min = 1, message = "Customer phone is required"))]
    pub customer_phone: String,
    pub customer_address: Option<String>,
    pub customer_city: Option<String>,
    pub customer_zip: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,
    pub service_type: ServiceType,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub delivery_fee: Option<Value>,
    pub payment_method: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payment_fee: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub packeta_point: Option<Value>,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub cart_items: Vec<CartItemInput>,
}

fn default_country() -> String {
    "Česká republika".to_string()
}

/// Payload returned from a successful checkout.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub id: i64,
    pub order_number: String,
    #[schema(value_type = String, example = "54.99")]
    pub total: Decimal,
    pub item_count: i64,
    pub status: String,
}

static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Produces an `EZF-<epoch millis>-<4 digit>` number. The atomic guard
/// keeps two calls in the same millisecond from drawing the same random
/// suffix; the unique index on `order_number` catches everything else.
fn generate_order_number() -> String {
    use rand::Rng;
    loop {
        let millis = chrono::Utc::now().timestamp_millis() as u64;
        let suffix: u64 = rand::thread_rng().gen_range(1000..10_000);
        let candidate = millis * 10_000 + suffix;
        let last = LAST_ISSUED.load(Ordering::Relaxed);
        if candidate != last
            && LAST_ISSUED
                .compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return format!("EZF-{}-{}", millis, suffix);
        }
    }
}

fn has_pickup_point(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// Serialized form of the pickup point for storage. Strings are kept
/// verbatim; structured payloads are stored as compact JSON.
fn packeta_point_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(v) => Some(v.to_string()),
    }
}

/// Coordinates order writes: validation, pricing, persistence, and the
/// notification intents that follow a successful commit.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    repo: OrderRepository,
    owner_email: String,
    shop_name: String,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, cfg: &AppConfig) -> Self {
        Self {
            repo: OrderRepository::new(db.clone()),
            db,
            owner_email: cfg.owner_email.clone(),
            shop_name: cfg.shop_name.clone(),
        }
    }

    /// Turns a cart into a persisted order. Validation and pricing run
    /// before any write; the two checkout notifications are queued only
    /// after the order transaction has committed and cannot fail it.
    #[instrument(skip(self, input), fields(customer_email = %input.customer_email, service_type = %input.service_type))]
    pub async fn create_order(
        &self,
        input: CreateOrderInput,
        user_id: Option<Uuid>,
    ) -> Result<CreatedOrder, ServiceError> {
        input.validate()?;
        validate_items(&input.cart_items)?;
        if input.service_type.requires_pickup_point()
            && !has_pickup_point(input.packeta_point.as_ref())
        {
            return Err(ServiceError::ValidationError(
                "Zásilkovna orders need a pickup point".to_string(),
            ));
        }

        let prices: Vec<Value> = input.cart_items.iter().map(|i| i.price.clone()).collect();
        let quote = pricing::quote_order(
            &prices,
            input.service_type,
            input.delivery_fee.as_ref(),
            input.payment_fee.as_ref(),
        )?;

        let mut attempt = 0;
        let (order, items) = loop {
            attempt += 1;
            let order_number = generate_order_number();

            let order_row = OrderActiveModel {
                order_number: Set(order_number),
                customer_name: Set(input.customer_name.trim().to_string()),
                customer_email: Set(input.customer_email.trim().to_string()),
                customer_phone: Set(input.customer_phone.trim().to_string()),
                customer_address: Set(input.customer_address.clone()),
                customer_city: Set(input.customer_city.clone()),
                customer_zip: Set(input.customer_zip.clone()),
                country: Set(input.country.clone()),
                service_type: Set(input.service_type.as_str().to_string()),
                delivery_fee: Set(quote.delivery_fee),
                payment_method: Set(input.payment_method.clone()),
                payment_fee: Set(quote.payment_fee),
                payment_status: Set("unpaid".to_string()),
                packeta_point: Set(packeta_point_text(input.packeta_point.as_ref())),
                notes: Set(input.notes.clone()),
                total: Set(quote.total),
                status: Set(OrderStatus::Pending.as_str().to_string()),
                user_id: Set(user_id),
                ..Default::default()
            };

            let item_rows = input
                .cart_items
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    let price = pricing::parse_price(&item.price).ok_or_else(|| {
                        ServiceError::ValidationError(format!(
                            "Item at position {} has an invalid price",
                            position
                        ))
                    })?;
                    if price.is_zero() || price.is_sign_negative() {
                        return Err(ServiceError::ValidationError(format!(
                            "Item at position {} must have a positive price",
                            position
                        )));
                    }
                    Ok(OrderItemActiveModel {
                        device: Set(item.device.trim().to_string()),
                        brand: Set(item.brand.clone()),
                        model: Set(item.model.clone()),
                        repair_type: Set(item.repair_type.trim().to_string()),
                        repair_name: Set(item.repair_name.trim().to_string()),
                        price: Set(price),
                        printer: Set(item.printer.clone()),
                        filament: Set(item.filament.clone()),
                        color: Set(item.color.clone()),
                        parts: Set(item.parts),
                        file_name: Set(item.file_name.clone()),
                        ..Default::default()
                    })
                })
                .collect::<Result<Vec<_>, ServiceError>>()?;

            match self.repo.create_order(order_row, item_rows).await {
                Ok(created) => break created,
                Err(ServiceError::Conflict(_)) if attempt < 3 => {
                    warn!(attempt, "Order number collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        let payload = NotificationPayload {
            digest: OrderDigest::from_order(&order, items.len() as i64),
            template: TemplateData::for_shop(&self.shop_name),
        };
        for (kind, recipient) in [
            (
                NotificationKind::OrderConfirmation,
                order.customer_email.as_str(),
            ),
            (NotificationKind::OwnerNewOrder, self.owner_email.as_str()),
        ] {
            if let Err(e) =
                outbox::enqueue(self.db.as_ref(), order.id, kind, recipient, &payload).await
            {
                warn!(
                    error = %e,
                    order_number = %order.order_number,
                    kind = kind.as_str(),
                    "Could not enqueue checkout notification"
                );
            }
        }

        info!(
            order_id = order.id,
            order_number = %order.order_number,
            total = %order.total,
            "Order created"
        );

        Ok(CreatedOrder {
            id: order.id,
            order_number: order.order_number,
            total: order.total,
            item_count: items.len() as i64,
            status: order.status,
        })
    }

    /// Moves an order to a new status and queues the customer-facing
    /// status mail. Setting the status an order already has still
    /// advances `updated_at` but queues nothing.
    #[instrument(skip(self), fields(order_id = order_id, status = status))]
    pub async fn transition_status(
        &self,
        order_id: i64,
        status: &str,
    ) -> Result<OrderModel, ServiceError> {
        let next = OrderStatus::from_str(status.trim())
            .map_err(|_| ServiceError::InvalidStatus(status.to_string()))?;

        let (prior, updated) = self.repo.update_status(order_id, next.as_str()).await?;

        if prior.status != updated.status {
            let item_count = match self.repo.count_items(order_id).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, order_id, "Could not count items for status mail");
                    0
                }
            };
            let payload = NotificationPayload {
                digest: OrderDigest::from_order(&updated, item_count),
                template: TemplateData::for_status(&self.shop_name, &updated.status),
            };
            if let Err(e) = outbox::enqueue(
                self.db.as_ref(),
                updated.id,
                NotificationKind::StatusUpdate,
                &updated.customer_email,
                &payload,
            )
            .await
            {
                warn!(
                    error = %e,
                    order_number = %updated.order_number,
                    "Could not enqueue status notification"
                );
            }
            info!(
                order_id,
                from = %prior.status,
                to = %updated.status,
                "Order status updated"
            );
        }

        Ok(updated)
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn delete_order(&self, order_id: i64) -> Result<(), ServiceError> {
        self.repo.delete_order(order_id).await?;
        info!(order_id, "Order deleted");
        Ok(())
    }

    pub async fn list_orders(
        &self,
        scope: OrderScope,
    ) -> Result<(Vec<OrderSummary>, StatusCounts), ServiceError> {
        let orders = self.repo.list_with_item_counts(scope).await?;
        let counts = self.repo.status_counts(scope).await?;
        Ok((orders, counts))
    }

    pub async fn get_order(
        &self,
        order_id: i64,
        scope: OrderScope,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        self.repo
            .get_order(order_id, scope)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Public tracking lookup by order number and email, no role check.
    pub async fn track_order(
        &self,
        order_number: &str,
        email: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        self.repo
            .find_by_number_and_email(order_number, email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }
}

fn validate_items(items: &[CartItemInput]) -> Result<(), ServiceError> {
    for (position, item) in items.iter().enumerate() {
        if item.device.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Item at position {} is missing a device",
                position
            )));
        }
        if item.repair_type.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Item at position {} is missing a repair type",
                position
            )));
        }
        if item.repair_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Item at position {} is missing a repair name",
                position
            )));
        }
    }
    Ok(())
}
