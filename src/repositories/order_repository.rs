use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::notification_outbox::{Column as OutboxColumn, Entity as NotificationOutbox};
use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel,
};
use crate::entities::order_item::{
    ActiveModel as OrderItemActiveModel, Column as ItemColumn, Entity as OrderItem,
    Model as OrderItemModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Visibility boundary for order reads. Managers see every order, a
/// signed-in customer only the orders tied to their account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    Any,
    OwnedBy(Uuid),
}

/// One row of the order list: the order's own columns plus how many cart
/// lines it carries, counted in the same query.
#[derive(Debug, Clone, FromQueryResult, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: i64,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub service_type: String,
    #[schema(value_type = String, example = "54.99")]
    pub total: Decimal,
    pub status: String,
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dashboard buckets over order statuses. Cancelled orders are not
/// counted anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, FromQueryResult)]
struct StatusCountRow {
    status: String,
    count: i64,
}

impl StatusCounts {
    fn absorb(&mut self, status: &str, count: i64) {
        match status {
            "pending" => self.pending += count,
            "in-progress" | "waiting" | "delivering" => self.in_progress += count,
            "completed" | "delivered" => self.completed += count,
            _ => {}
        }
    }
}

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Persists an order together with all of its items in one
    /// transaction. Nothing is written if any insert fails.
    pub async fn create_order(
        &self,
        order: OrderActiveModel,
        items: Vec<OrderItemActiveModel>,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let txn = self.base.get_db().begin().await.map_err(|e| {
            error!("Failed to open transaction for order create: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let order = order.insert(&txn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict("Order number already taken".to_string())
            } else {
                error!("Failed to insert order: {}", e);
                ServiceError::DatabaseError(e)
            }
        })?;

        let mut saved_items = Vec::with_capacity(items.len());
        for mut item in items {
            item.order_id = Set(order.id);
            let saved = item.insert(&txn).await.map_err(|e| {
                error!("Failed to insert order item for order {}: {}", order.id, e);
                ServiceError::DatabaseError(e)
            })?;
            saved_items.push(saved);
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order create: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        Ok((order, saved_items))
    }

    /// Loads an order and its items, honoring the visibility scope. An
    /// order outside the scope reads as absent, not as forbidden.
    pub async fn get_order(
        &self,
        id: i64,
        scope: OrderScope,
    ) -> Result<Option<(OrderModel, Vec<OrderItemModel>)>, ServiceError> {
        let mut query = Order::find_by_id(id);
        if let OrderScope::OwnedBy(user_id) = scope {
            query = query.filter(Column::UserId.eq(user_id));
        }

        let Some(order) = query
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        let items = order
            .find_related(OrderItem)
            .order_by_asc(ItemColumn::Id)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(Some((order, items)))
    }

    /// Public tracking lookup: order number and customer email must both
    /// match, compared case-insensitively.
    pub async fn find_by_number_and_email(
        &self,
        order_number: &str,
        email: &str,
    ) -> Result<Option<(OrderModel, Vec<OrderItemModel>)>, ServiceError> {
        let number = order_number.trim().to_lowercase();
        let email = email.trim().to_lowercase();

        let Some(order) = Order::find()
            .filter(Expr::expr(Func::lower(Expr::col(Column::OrderNumber))).eq(number))
            .filter(Expr::expr(Func::lower(Expr::col(Column::CustomerEmail))).eq(email))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        let items = order
            .find_related(OrderItem)
            .order_by_asc(ItemColumn::Id)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(Some((order, items)))
    }

    pub async fn count_items(&self, order_id: i64) -> Result<i64, ServiceError> {
        let count = OrderItem::find()
            .filter(ItemColumn::OrderId.eq(order_id))
            .count(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(count as i64)
    }

    /// Lists orders newest first with a per-order item count. The count
    /// rides along the same query via a grouped left join instead of one
    /// follow-up query per row.
    pub async fn list_with_item_counts(
        &self,
        scope: OrderScope,
    ) -> Result<Vec<OrderSummary>, ServiceError> {
        let mut query = Order::find()
            .select_only()
            .column(Column::Id)
            .column(Column::OrderNumber)
            .column(Column::CustomerName)
            .column(Column::CustomerEmail)
            .column(Column::ServiceType)
            .column(Column::Total)
            .column(Column::Status)
            .column(Column::CreatedAt)
            .column(Column::UpdatedAt)
            .column_as(ItemColumn::Id.count(), "item_count")
            .left_join(OrderItem)
            .group_by(Column::Id)
            .order_by_desc(Column::CreatedAt);

        if let OrderScope::OwnedBy(user_id) = scope {
            query = query.filter(Column::UserId.eq(user_id));
        }

        query
            .into_model::<OrderSummary>()
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Counts orders per dashboard bucket with a single grouped query.
    pub async fn status_counts(&self, scope: OrderScope) -> Result<StatusCounts, ServiceError> {
        let mut query = Order::find()
            .select_only()
            .column(Column::Status)
            .column_as(Column::Id.count(), "count")
            .group_by(Column::Status);

        if let OrderScope::OwnedBy(user_id) = scope {
            query = query.filter(Column::UserId.eq(user_id));
        }

        let rows = query
            .into_model::<StatusCountRow>()
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            counts.absorb(&row.status, row.count);
        }
        Ok(counts)
    }

    /// Moves an order to a new status, touching nothing but the status
    /// and updated_at columns. Returns the row as it was before the
    /// write together with the updated row.
    pub async fn update_status(
        &self,
        id: i64,
        status: &str,
    ) -> Result<(OrderModel, OrderModel), ServiceError> {
        let existing = Order::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

        let prior = existing.clone();
        let mut active: OrderActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.updated_at = Set(Utc::now());

        let updated = active.update(self.base.get_db()).await.map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => {
                ServiceError::NotFound(format!("Order {} not found", id))
            }
            other => {
                error!("Failed to update status of order {}: {}", id, other);
                ServiceError::DatabaseError(other)
            }
        })?;

        Ok((prior, updated))
    }

    /// Removes an order and everything hanging off it. Dependent rows go
    /// first so the delete behaves the same whether or not the backend
    /// enforces the cascading foreign keys.
    pub async fn delete_order(&self, id: i64) -> Result<(), ServiceError> {
        let txn = self.base.get_db().begin().await.map_err(|e| {
            error!("Failed to open transaction for order delete: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        NotificationOutbox::delete_many()
            .filter(OutboxColumn::OrderId.eq(id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        OrderItem::delete_many()
            .filter(ItemColumn::OrderId.eq(id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let result = Order::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", id)));
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order delete: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        Ok(())
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
