use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::errors::{ErrorBody, ServiceError};
use crate::AppState;

/// Sliding-window count of storefront visitors. Each request carrying an
/// `x-visitor-id` header refreshes that visitor's last-seen time; anyone
/// seen within the window counts as online.
#[derive(Clone)]
pub struct PresenceTracker {
    seen: Arc<DashMap<String, Instant>>,
    window: Duration,
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Arc::new(DashMap::new()),
            window,
        }
    }

    pub fn touch(&self, visitor_id: &str) {
        let id = visitor_id.trim();
        // Header values are client-controlled; drop junk that would bloat the map.
        if id.is_empty() || id.len() > 128 {
            return;
        }
        self.seen.insert(id.to_string(), Instant::now());
    }

    pub fn online(&self) -> usize {
        let now = Instant::now();
        self.seen
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) < self.window)
            .count()
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        self.seen
            .retain(|_, last_seen| now.duration_since(*last_seen) < self.window);
    }
}

/// Spawns the periodic sweep that drops visitors once they age out.
pub fn start_sweeper(tracker: PresenceTracker, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        loop {
            timer.tick().await;
            tracker.sweep();
            debug!("Presence sweep completed");
        }
    })
}

/// Middleware that records the caller's visitor id, when present.
pub async fn track_presence(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(visitor) = request
        .headers()
        .get("x-visitor-id")
        .and_then(|value| value.to_str().ok())
    {
        state.presence.touch(visitor);
    }
    next.run(request).await
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceBody {
    pub success: bool,
    pub online: usize,
}

/// Current number of online visitors
#[utoipa::path(
    get,
    path = "/presence",
    summary = "Online visitors",
    description = "Staff only. Visitors seen within the sliding presence window.",
    responses(
        (status = 200, description = "Current count", body = PresenceBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 403, description = "Caller is not staff", body = ErrorBody),
    ),
    security(("Bearer" = []))
)]
pub async fn online_visitors(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<PresenceBody>, ServiceError> {
    if !auth_user.is_manager() {
        return Err(ServiceError::Forbidden(
            "Only staff can view visitor presence".to_string(),
        ));
    }
    Ok(Json(PresenceBody {
        success: true,
        online: state.presence.online(),
    }))
}

pub fn presence_routes() -> Router<AppState> {
    Router::new().route("/", get(online_visitors))
}
