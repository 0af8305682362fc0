//! EZFix API Library
//!
//! Order intake, pricing, and fulfilment backend for the EZFix storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod notifications;
pub mod openapi;
pub mod presence;
pub mod pricing;
pub mod repositories;
pub mod schema;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::presence::PresenceTracker;
use crate::services::OrderService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub orders: OrderService,
    pub presence: PresenceTracker,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> Self {
        let orders = OrderService::new(db.clone(), &config);
        let presence = PresenceTracker::new(config.presence_window());
        Self {
            db,
            config,
            orders,
            presence,
        }
    }
}

/// Routing surface shared by the binary and the integration tests.
/// Operational layers (tracing, CORS, timeouts) are stacked on top in `main`.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/health", handlers::health::health_routes())
        .nest("/presence", presence::presence_routes())
        .merge(openapi::swagger_ui())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            presence::track_presence,
        ))
        .with_state(state)
}
