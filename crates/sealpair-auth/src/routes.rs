//! HTTP routes.
//!
//! - `POST /authenticate`: `{"identity"}` → `{"authToken"}`
//! - `GET /kms-jwt`: bearer token → `{"kmsToken"}`

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    routing::{get, post},
};
use sealpair_kms::{Environment, KmsJwt};
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, time::Instant};
use tower_http::trace::TraceLayer;

use crate::{config::AuthServerConfig, error::ApiError};

/// Bearer token size in bytes before hex encoding.
const BEARER_TOKEN_SIZE: usize = 32;

/// Shared handler state.
#[derive(Clone)]
pub struct AuthState<E: Environment> {
    config: Arc<AuthServerConfig>,
    jwt: KmsJwt,
    env: E,
    /// Bearer token → session
    sessions: Arc<RwLock<HashMap<String, BearerSession>>>,
}

/// Identity a bearer token was issued to, and when.
#[derive(Debug, Clone)]
struct BearerSession {
    identity: String,
    issued_at: Instant,
}

impl BearerSession {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.issued_at.elapsed() >= ttl
    }
}

impl<E: Environment> AuthState<E> {
    /// Create empty state.
    pub fn new(config: AuthServerConfig, env: E) -> Self {
        let jwt = KmsJwt::new(&config.jwt_secret);
        Self { config: Arc::new(config), jwt, env, sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Number of bearer tokens held, expired ones included until pruned.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[derive(Deserialize)]
struct AuthenticateRequest {
    identity: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateResponse {
    auth_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KmsTokenResponse {
    kms_token: String,
}

/// Build the router over `state`.
pub fn router<E: Environment>(state: AuthState<E>) -> Router {
    Router::new()
        .route("/authenticate", post(authenticate::<E>))
        .route("/kms-jwt", get(kms_jwt::<E>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn authenticate<E: Environment>(
    State(state): State<AuthState<E>>,
    Json(request): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    let identity = request.identity.trim();
    if identity.is_empty() {
        return Err(ApiError::BadRequest { reason: "identity must not be empty".to_string() });
    }
    if !state.config.admits(identity) {
        tracing::warn!(identity, "Rejected identity");
        return Err(ApiError::Forbidden { identity: identity.to_string() });
    }

    let auth_token = hex::encode(state.env.random_array::<BEARER_TOKEN_SIZE>());
    let session = BearerSession { identity: identity.to_string(), issued_at: Instant::now() };
    {
        let mut sessions = state.sessions.write().await;
        let ttl = state.config.bearer_ttl;
        sessions.retain(|_, held| !held.is_expired(ttl));
        sessions.insert(auth_token.clone(), session);
    }

    tracing::info!(identity, "Authenticated");
    Ok(Json(AuthenticateResponse { auth_token }))
}

async fn kms_jwt<E: Environment>(
    State(state): State<AuthState<E>>,
    headers: HeaderMap,
) -> Result<Json<KmsTokenResponse>, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let session = state.sessions.read().await.get(bearer).cloned().ok_or(ApiError::Unauthorized)?;
    if session.is_expired(state.config.bearer_ttl) {
        tracing::debug!(identity = %session.identity, "Rejected expired bearer token");
        return Err(ApiError::Unauthorized);
    }
    let identity = session.identity;

    let token = state
        .jwt
        .issue(&identity, state.config.token_ttl)
        .map_err(|e| ApiError::Internal { reason: e.to_string() })?;

    tracing::debug!(%identity, "Issued KMS token");
    Ok(Json(KmsTokenResponse { kms_token: token.as_str().to_string() }))
}
