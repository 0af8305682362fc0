//! Session token verification.
//!
//! The storefront issues JWTs at login; this service only verifies them.
//! Two extractors cover the API surface: [`AuthUser`] rejects requests
//! without a valid token, [`OptionalAuthUser`] lets guest checkout and
//! public tracking through while still identifying signed-in customers.

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::AppState;

/// Roles allowed to manage every order in the shop.
pub const MANAGER_ROLES: [&str; 3] = ["owner", "manager", "worker"];

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Single role; tokens without one are plain customers
    #[serde(default = "default_role")]
    pub role: String,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// JWT ID
    #[serde(default)]
    pub jti: Option<String>,
}

fn default_role() -> String {
    "customer".to_string()
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: String,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// Whether this user may list, update and delete any order
    pub fn is_manager(&self) -> bool {
        MANAGER_ROLES.contains(&self.role.as_str())
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = ServiceError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::AuthError("Invalid session token".to_string()))?;
        Ok(AuthUser {
            id,
            name: claims.name,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// Decodes and validates a session token
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ServiceError::AuthError("Session token has expired".to_string())
        }
        _ => ServiceError::AuthError("Invalid session token".to_string()),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServiceError::AuthError("Missing bearer token".to_string()))?;
        let claims = decode_token(token, &state.config.jwt_secret)?;
        AuthUser::try_from(claims)
    }
}

/// Extractor that never rejects: an absent or invalid token simply yields
/// no user, which the order endpoints treat as a guest.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthUser(
            <AuthUser as FromRequestParts<S>>::from_request_parts(parts, state)
                .await
                .ok(),
        ))
    }
}
