//! Customer and owner notifications.
//!
//! Deliveries are best effort by contract: a notification may be dropped,
//! but it must never block or fail an order operation. The service side
//! only appends intents to the outbox table; the worker in [`outbox`]
//! drains them through a [`NotificationGateway`] implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::entities::order;

pub mod outbox;

/// What a notification is about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationKind {
    /// Receipt mailed to the customer right after checkout
    OrderConfirmation,
    /// Heads-up mailed to the shop owner about a new order
    OwnerNewOrder,
    /// Progress mail sent to the customer on a status change
    StatusUpdate,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    /// No provider is configured; the message is intentionally dropped
    SkippedUnconfigured,
    Failed(String),
}

/// The order fields templates need, captured at enqueue time. The worker
/// renders from this snapshot and never re-reads the order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDigest {
    pub order_id: i64,
    pub order_number: String,
    pub customer_name: String,
    pub service_type: String,
    pub status: String,
    pub total: Decimal,
    pub item_count: i64,
    pub pickup_point: Option<String>,
}

impl OrderDigest {
    pub fn from_order(order: &order::Model, item_count: i64) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_name: order.customer_name.clone(),
            service_type: order.service_type.clone(),
            status: order.status.clone(),
            total: order.total,
            item_count,
            pickup_point: order.packeta_point.as_deref().and_then(pickup_point_line),
        }
    }
}

/// Renders a stored pickup point document into one printable line.
/// Returns `None` when the document is unreadable or carries no fields.
pub fn pickup_point_line(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let get = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let parts: Vec<&str> = [get("name"), get("street"), get("city"), get("zip")]
        .into_iter()
        .flatten()
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Extra template fields that ride along with the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateData {
    pub shop_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_color: Option<String>,
}

impl TemplateData {
    pub fn for_shop(shop_name: &str) -> Self {
        Self {
            shop_name: shop_name.to_string(),
            status_label: None,
            status_color: None,
        }
    }

    pub fn for_status(shop_name: &str, status: &str) -> Self {
        let presentation = status_presentation(status);
        Self {
            shop_name: shop_name.to_string(),
            status_label: presentation.map(|p| p.label.to_string()),
            status_color: presentation.map(|p| p.color.to_string()),
        }
    }
}

/// The complete document stored in an outbox row's payload column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub digest: OrderDigest,
    pub template: TemplateData,
}

/// Customer-facing wording and accent color for a status mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPresentation {
    pub label: &'static str,
    pub color: &'static str,
}

pub fn status_presentation(status: &str) -> Option<StatusPresentation> {
    let (label, color) = match status {
        "pending" => ("Pending", "#f59e0b"),
        "in-progress" => ("In progress", "#3b82f6"),
        "waiting" => ("Waiting", "#a855f7"),
        "delivering" => ("Out for delivery", "#06b6d4"),
        "completed" => ("Completed", "#22c55e"),
        "delivered" => ("Delivered", "#16a34a"),
        "cancelled" => ("Cancelled", "#ef4444"),
        _ => return None,
    };
    Some(StatusPresentation { label, color })
}

/// Transport behind the outbox worker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Attempts to deliver one notification. Implementations report
    /// failure through the returned [`Outcome`], never by panicking.
    async fn deliver(
        &self,
        kind: NotificationKind,
        order: &OrderDigest,
        recipient: &str,
        template: &TemplateData,
    ) -> Outcome;
}

/// Gateway that renders each message into the application log. Stands in
/// for a real mail provider; deployments without a configured sender get
/// `SkippedUnconfigured` instead of silent drops.
#[derive(Debug, Clone)]
pub struct LogMailer {
    enabled: bool,
    sender: Option<String>,
}

impl LogMailer {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            enabled: cfg.notifications_enabled,
            sender: cfg.notifications_from.clone(),
        }
    }

    #[cfg(test)]
    pub fn new(enabled: bool, sender: Option<String>) -> Self {
        Self { enabled, sender }
    }
}

#[async_trait]
impl NotificationGateway for LogMailer {
    #[instrument(skip(self, order, template), fields(order_number = %order.order_number))]
    async fn deliver(
        &self,
        kind: NotificationKind,
        order: &OrderDigest,
        recipient: &str,
        template: &TemplateData,
    ) -> Outcome {
        if !self.enabled {
            return Outcome::SkippedUnconfigured;
        }
        let Some(sender) = &self.sender else {
            return Outcome::SkippedUnconfigured;
        };

        let subject = match kind {
            NotificationKind::OrderConfirmation => {
                format!("Order {} confirmed", order.order_number)
            }
            NotificationKind::OwnerNewOrder => {
                format!("New order {} received", order.order_number)
            }
            NotificationKind::StatusUpdate => format!(
                "Order {} update: {}",
                order.order_number,
                template.status_label.as_deref().unwrap_or(&order.status)
            ),
        };

        info!(
            kind = kind.as_str(),
            from = %sender,
            to = recipient,
            subject = %subject,
            items = order.item_count,
            total = %order.total,
            pickup_point = order.pickup_point.as_deref().unwrap_or("-"),
            shop = %template.shop_name,
            "Notification delivered"
        );
        Outcome::Delivered
    }
}
