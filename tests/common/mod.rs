#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use sea_orm::{ConnectOptions, Database};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use ezfix_api::{auth::Claims, config::AppConfig, schema, AppState};

pub const JWT_SECRET: &str = "integration_secret_nobody_relies_on_123456";

/// Helper harness for spinning up an application backed by an in-memory
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_owned());
        opts.max_connections(1).sqlx_logging(false);
        let pool = Database::connect(opts)
            .await
            .expect("failed to create test database");

        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );

        schema::ensure_schema(&pool, &cfg)
            .await
            .expect("failed to prepare test schema");

        let state = AppState::new(Arc::new(pool), cfg);
        let router = ezfix_api::app_router(state.clone());

        Self { router, state }
    }

    /// Mint a bearer token signed with the test secret.
    pub fn token_for(&self, user_id: Uuid, role: &str, email: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            name: Some("Integration User".to_string()),
            email: Some(email.to_string()),
            role: role.to_string(),
            iat: now,
            exp: now + 3600,
            jti: Some(Uuid::new_v4().to_string()),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode test token")
    }

    pub fn manager_token(&self) -> String {
        self.token_for(Uuid::new_v4(), "manager", "manager@ezfix.cz")
    }

    pub fn customer_token(&self, user_id: Uuid) -> String {
        self.token_for(user_id, "customer", "customer@example.com")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

/// Read a JSON response body.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response body")
}

/// The canonical screen-repair checkout: one 49.99 item picked up in the
/// shop, 5.00 handling fee, free payment method.
pub fn checkout_payload() -> Value {
    json!({
        "customerName": "Jana Novotná",
        "customerEmail": "jana@example.com",
        "customerPhone": "+420601111222",
        "customerAddress": "Příkopy 12",
        "customerCity": "Praha",
        "customerZip": "11000",
        "serviceType": "pickup",
        "deliveryFee": 5,
        "paymentMethod": "cash",
        "paymentFee": 0,
        "cartItems": [
            {
                "device": "phone",
                "brand": "Apple",
                "model": "iPhone 13",
                "repairType": "screen",
                "repairName": "Screen replacement",
                "price": 49.99
            }
        ]
    })
}
