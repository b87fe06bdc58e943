//! Caller identity extractors
//!
//! The upstream session layer authenticates readers and injects
//! `X-Owner-Id`. Webhook glue authenticates with `X-Internal-Secret`.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::state::AppState;
use super::types::ApiError;
use crate::purchase::OwnerId;

pub const OWNER_HEADER: &str = "x-owner-id";
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

const MAX_OWNER_ID_LEN: usize = 128;

/// Owner injected by the session layer
#[derive(Debug, Clone)]
pub struct AuthenticatedOwner(pub OwnerId);

impl<S> FromRequestParts<S> for AuthenticatedOwner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-Owner-Id header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid X-Owner-Id header"))?
            .trim();

        if raw.is_empty() || raw.len() > MAX_OWNER_ID_LEN {
            return Err(ApiError::unauthorized("Invalid X-Owner-Id header"));
        }
        Ok(AuthenticatedOwner(OwnerId::new(raw)))
    }
}

/// Caller that presented the internal webhook secret
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequestParts<Arc<AppState>> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(INTERNAL_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing X-Internal-Secret header"))?;

        if !state.internal_secret_matches(presented) {
            tracing::warn!("Internal confirm rejected: bad secret");
            return Err(ApiError::unauthorized("Invalid internal secret"));
        }
        Ok(InternalCaller)
    }
}
