//! Transactional outbox for notification intents.
//!
//! Order writes append rows here once their transaction has committed; a
//! background worker drains due rows and hands them to the configured
//! [`NotificationGateway`]. A failed delivery is retried with exponential
//! backoff until [`MAX_ATTEMPTS`], then parked as `failed`.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{NotificationGateway, NotificationKind, NotificationPayload, Outcome};
use crate::entities::notification_outbox::{self, Entity as NotificationOutbox};
use crate::errors::ServiceError;

const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Skipped,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Skipped => "skipped",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Appends one notification intent. Call after the surrounding order
/// write has committed; the worker picks the row up on its next pass.
pub async fn enqueue<C: ConnectionTrait>(
    db: &C,
    order_id: i64,
    kind: NotificationKind,
    recipient: &str,
    payload: &NotificationPayload,
) -> Result<Uuid, ServiceError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let row = notification_outbox::ActiveModel {
        id: Set(id),
        order_id: Set(order_id),
        kind: Set(kind.as_str().to_string()),
        recipient: Set(recipient.to_string()),
        payload: Set(serde_json::to_string(payload)?),
        status: Set(OutboxStatus::Pending.as_str().to_string()),
        attempts: Set(0),
        last_error: Set(None),
        next_attempt_at: Set(now),
        delivered_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(db).await.map_err(ServiceError::db_error)?;
    debug!(
        "Enqueued outbox notification {} kind={} order_id={}",
        id,
        kind.as_str(),
        order_id
    );
    Ok(id)
}

/// Spawns the polling worker. One worker per process; rows are claimed
/// one at a time, so no cross-process locking is attempted.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn NotificationGateway>,
    poll_interval: Duration,
    batch_size: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            poll_ms = poll_interval.as_millis() as u64,
            batch = batch_size,
            "Notification outbox worker started"
        );
        loop {
            match drain_once(&db, gateway.as_ref(), batch_size).await {
                Ok(0) => {}
                Ok(count) => debug!("Dispatched {} outbox notifications", count),
                Err(e) => error!("Outbox drain pass failed: {}", e),
            }
            sleep(poll_interval).await;
        }
    })
}

/// Processes one batch of due rows. Returns how many rows were handled.
pub async fn drain_once(
    db: &DatabaseConnection,
    gateway: &dyn NotificationGateway,
    batch_size: u64,
) -> Result<usize, ServiceError> {
    let due = NotificationOutbox::find()
        .filter(notification_outbox::Column::Status.eq(OutboxStatus::Pending.as_str()))
        .filter(notification_outbox::Column::NextAttemptAt.lte(Utc::now()))
        .order_by_asc(notification_outbox::Column::NextAttemptAt)
        .limit(batch_size)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    let mut processed = 0;
    for row in due {
        let row_id = row.id;
        let attempts = row.attempts + 1;

        let mut claim: notification_outbox::ActiveModel = row.clone().into();
        claim.status = Set(OutboxStatus::Processing.as_str().to_string());
        claim.attempts = Set(attempts);
        claim.updated_at = Set(Utc::now());
        if let Err(e) = claim.update(db).await {
            warn!("Could not claim outbox row {}: {}", row_id, e);
            continue;
        }

        let change = match decode_row(&row) {
            Ok((kind, payload)) => {
                let outcome = gateway
                    .deliver(kind, &payload.digest, &row.recipient, &payload.template)
                    .await;
                resolution(&outcome, attempts, Utc::now())
            }
            // A row that cannot be decoded will never deliver.
            Err(reason) => Resolution::failed(reason),
        };
        if let Err(e) = apply_resolution(db, row_id, &change).await {
            warn!("Could not record outcome for outbox row {}: {}", row_id, e);
        }
        processed += 1;
    }
    Ok(processed)
}

fn decode_row(
    row: &notification_outbox::Model,
) -> Result<(NotificationKind, NotificationPayload), String> {
    let kind = row
        .kind
        .parse::<NotificationKind>()
        .map_err(|_| format!("unknown notification kind {:?}", row.kind))?;
    let payload: NotificationPayload = serde_json::from_str(&row.payload)
        .map_err(|e| format!("unreadable payload: {}", e))?;
    Ok((kind, payload))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolution {
    status: OutboxStatus,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

impl Resolution {
    fn failed(reason: String) -> Self {
        Self {
            status: OutboxStatus::Failed,
            last_error: Some(reason),
            next_attempt_at: None,
            delivered_at: None,
        }
    }
}

/// Maps a delivery outcome onto the row mutation to apply.
fn resolution(outcome: &Outcome, attempts: i32, now: DateTime<Utc>) -> Resolution {
    match outcome {
        Outcome::Delivered => Resolution {
            status: OutboxStatus::Delivered,
            last_error: None,
            next_attempt_at: None,
            delivered_at: Some(now),
        },
        Outcome::SkippedUnconfigured => Resolution {
            status: OutboxStatus::Skipped,
            last_error: None,
            next_attempt_at: None,
            delivered_at: None,
        },
        Outcome::Failed(reason) if attempts < MAX_ATTEMPTS => Resolution {
            status: OutboxStatus::Pending,
            last_error: Some(reason.clone()),
            next_attempt_at: Some(now + backoff_delay(attempts)),
            delivered_at: None,
        },
        Outcome::Failed(reason) => Resolution::failed(format!(
            "max attempts exceeded, last error: {}",
            reason
        )),
    }
}

fn backoff_delay(attempts: i32) -> ChronoDuration {
    let secs = BASE_BACKOFF_SECS.saturating_pow(attempts.max(1) as u32);
    let jitter_ms = Utc::now().timestamp_millis() % 1000;
    ChronoDuration::seconds(secs as i64) + ChronoDuration::milliseconds(jitter_ms)
}

async fn apply_resolution(
    db: &DatabaseConnection,
    id: Uuid,
    change: &Resolution,
) -> Result<(), sea_orm::DbErr> {
    let row = notification_outbox::ActiveModel {
        id: Set(id),
        status: Set(change.status.as_str().to_string()),
        last_error: Set(change.last_error.clone()),
        next_attempt_at: match change.next_attempt_at {
            Some(at) => Set(at),
            None => NotSet,
        },
        delivered_at: Set(change.delivered_at),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    row.update(db).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::entities::order;
    use crate::notifications::{MockNotificationGateway, OrderDigest, TemplateData};
    use crate::schema::ensure_schema;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectOptions, Database};

    async fn test_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();

        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "test_secret_that_is_definitely_long_enough_042".into(),
            "development".into(),
        );
        ensure_schema(&db, &cfg).await.unwrap();
        db
    }

    async fn seed_order(db: &DatabaseConnection) -> order::Model {
        order::ActiveModel {
            order_number: Set("EZF-1700000000000-4321".to_string()),
            customer_name: Set("Jana Novotná".to_string()),
            customer_email: Set("jana@example.com".to_string()),
            customer_phone: Set("+420601111222".to_string()),
            customer_address: Set(None),
            customer_city: Set(None),
            customer_zip: Set(None),
            country: Set("Česká republika".to_string()),
            service_type: Set("pickup".to_string()),
            delivery_fee: Set(dec!(5)),
            payment_method: Set(None),
            payment_fee: Set(Decimal::ZERO),
            payment_status: Set("unpaid".to_string()),
            packeta_point: Set(None),
            notes: Set(None),
            total: Set(dec!(54.99)),
            status: Set("pending".to_string()),
            user_id: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn payload_for(order: &order::Model) -> NotificationPayload {
        NotificationPayload {
            digest: OrderDigest::from_order(order, 1),
            template: TemplateData::for_shop("EZFix"),
        }
    }

    async fn fetch(db: &DatabaseConnection, id: Uuid) -> notification_outbox::Model {
        NotificationOutbox::find_by_id(id).one(db).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn drain_delivers_due_rows() {
        let db = test_db().await;
        let order = seed_order(&db).await;
        let payload = payload_for(&order);

        let first = enqueue(
            &db,
            order.id,
            NotificationKind::OrderConfirmation,
            "jana@example.com",
            &payload,
        )
        .await
        .unwrap();
        let second = enqueue(
            &db,
            order.id,
            NotificationKind::OwnerNewOrder,
            "info@ezfix.cz",
            &payload,
        )
        .await
        .unwrap();

        let mut gateway = MockNotificationGateway::new();
        gateway
            .expect_deliver()
            .times(2)
            .returning(|_, _, _, _| Outcome::Delivered);

        let processed = drain_once(&db, &gateway, 20).await.unwrap();
        assert_eq!(processed, 2);

        for id in [first, second] {
            let row = fetch(&db, id).await;
            assert_eq!(row.status, "delivered");
            assert_eq!(row.attempts, 1);
            assert!(row.delivered_at.is_some());
            assert!(row.last_error.is_none());
        }
    }

    #[tokio::test]
    async fn failed_delivery_backs_off_until_due_again() {
        let db = test_db().await;
        let order = seed_order(&db).await;
        let payload = payload_for(&order);

        let id = enqueue(
            &db,
            order.id,
            NotificationKind::OrderConfirmation,
            "jana@example.com",
            &payload,
        )
        .await
        .unwrap();

        let mut gateway = MockNotificationGateway::new();
        gateway
            .expect_deliver()
            .times(1)
            .returning(|_, _, _, _| Outcome::Failed("smtp down".to_string()));

        assert_eq!(drain_once(&db, &gateway, 20).await.unwrap(), 1);

        let row = fetch(&db, id).await;
        assert_eq!(row.status, "pending");
        assert_eq!(row.attempts, 1);
        assert_eq!(row.last_error.as_deref(), Some("smtp down"));
        assert!(row.next_attempt_at > Utc::now());

        // Not due yet, so a second pass must leave the row alone.
        let mut idle = MockNotificationGateway::new();
        idle.expect_deliver().times(0);
        assert_eq!(drain_once(&db, &idle, 20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unconfigured_gateway_parks_row_as_skipped() {
        let db = test_db().await;
        let order = seed_order(&db).await;
        let payload = payload_for(&order);

        let id = enqueue(
            &db,
            order.id,
            NotificationKind::StatusUpdate,
            "jana@example.com",
            &payload,
        )
        .await
        .unwrap();

        let mut gateway = MockNotificationGateway::new();
        gateway
            .expect_deliver()
            .times(1)
            .returning(|_, _, _, _| Outcome::SkippedUnconfigured);

        assert_eq!(drain_once(&db, &gateway, 20).await.unwrap(), 1);
        let row = fetch(&db, id).await;
        assert_eq!(row.status, "skipped");
        assert!(row.delivered_at.is_none());

        assert_eq!(drain_once(&db, &gateway, 20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_park_row_as_failed() {
        let db = test_db().await;
        let order = seed_order(&db).await;
        let payload = payload_for(&order);

        let id = enqueue(
            &db,
            order.id,
            NotificationKind::OrderConfirmation,
            "jana@example.com",
            &payload,
        )
        .await
        .unwrap();

        // Pretend earlier passes already burned all but the last attempt.
        notification_outbox::ActiveModel {
            id: Set(id),
            attempts: Set(MAX_ATTEMPTS - 1),
            ..Default::default()
        }
        .update(&db)
        .await
        .unwrap();

        let mut gateway = MockNotificationGateway::new();
        gateway
            .expect_deliver()
            .times(1)
            .returning(|_, _, _, _| Outcome::Failed("smtp down".to_string()));

        assert_eq!(drain_once(&db, &gateway, 20).await.unwrap(), 1);
        let row = fetch(&db, id).await;
        assert_eq!(row.status, "failed");
        assert_eq!(row.attempts, MAX_ATTEMPTS);
        assert!(row.last_error.as_deref().unwrap().contains("smtp down"));
    }

    #[tokio::test]
    async fn undecodable_row_fails_without_touching_the_gateway() {
        let db = test_db().await;
        let order = seed_order(&db).await;
        let now = Utc::now();

        let id = Uuid::new_v4();
        notification_outbox::ActiveModel {
            id: Set(id),
            order_id: Set(order.id),
            kind: Set("telegram".to_string()),
            recipient: Set("jana@example.com".to_string()),
            payload: Set("{}".to_string()),
            status: Set(OutboxStatus::Pending.as_str().to_string()),
            attempts: Set(0),
            last_error: Set(None),
            next_attempt_at: Set(now),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        let mut gateway = MockNotificationGateway::new();
        gateway.expect_deliver().times(0);

        assert_eq!(drain_once(&db, &gateway, 20).await.unwrap(), 1);
        let row = fetch(&db, id).await;
        assert_eq!(row.status, "failed");
        assert!(row.last_error.as_deref().unwrap().contains("telegram"));
    }

    #[test]
    fn resolution_maps_outcomes_onto_row_changes() {
        let now = Utc::now();

        let delivered = resolution(&Outcome::Delivered, 1, now);
        assert_eq!(delivered.status, OutboxStatus::Delivered);
        assert_eq!(delivered.delivered_at, Some(now));
        assert!(delivered.next_attempt_at.is_none());

        let skipped = resolution(&Outcome::SkippedUnconfigured, 1, now);
        assert_eq!(skipped.status, OutboxStatus::Skipped);
        assert!(skipped.delivered_at.is_none());

        let retried = resolution(&Outcome::Failed("boom".into()), 2, now);
        assert_eq!(retried.status, OutboxStatus::Pending);
        let due = retried.next_attempt_at.unwrap();
        assert!(due >= now + ChronoDuration::seconds(4));
        assert!(due < now + ChronoDuration::seconds(6));

        let parked = resolution(&Outcome::Failed("boom".into()), MAX_ATTEMPTS, now);
        assert_eq!(parked.status, OutboxStatus::Failed);
        assert!(parked.last_error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        assert!(backoff_delay(1) >= ChronoDuration::seconds(2));
        assert!(backoff_delay(3) >= ChronoDuration::seconds(8));
        assert!(backoff_delay(3) < backoff_delay(7));
    }
}
