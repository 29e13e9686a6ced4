//! Caller identity and the authorization seams the hub depends on.

use std::collections::HashSet;
use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gateway_common::id::{prefix, prefixed_ulid};

use crate::error::ApiError;
use crate::hub::platform::Platform;

/// Header carrying the user ID of the service-side operator.
pub const OP_USER_ID_HEADER: &str = "x-op-user-id";
/// Header carrying the caller's trace/operation ID.
pub const OPERATION_ID_HEADER: &str = "x-operation-id";

/// Identity of whoever invoked an administrative operation.
#[derive(Debug, Clone)]
pub struct Operator {
    pub user_id: String,
    pub operation_id: String,
}

impl Operator {
    /// Operator with a freshly generated operation ID.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            operation_id: prefixed_ulid(prefix::OPERATION),
        }
    }
}

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(OP_USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing x-op-user-id header"))?
            .to_string();

        let OperationId(operation_id) = OperationId::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});

        Ok(Operator {
            user_id,
            operation_id,
        })
    }
}

/// Caller-supplied operation ID, or a generated one.
#[derive(Debug, Clone)]
pub struct OperationId(pub String);

impl<S> FromRequestParts<S> for OperationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(OPERATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| prefixed_ulid(prefix::OPERATION));
        Ok(OperationId(id))
    }
}

/// Decides whether an operator may use administrative operations.
pub trait Authorizer: Send + Sync {
    fn is_administrator(&self, operator: &Operator) -> bool;
}

/// Fixed list of app-manager user IDs.
#[derive(Debug, Clone, Default)]
pub struct AppManagers {
    user_ids: HashSet<String>,
}

impl AppManagers {
    pub fn new(user_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_ids: user_ids.into_iter().collect(),
        }
    }
}

impl Authorizer for AppManagers {
    fn is_administrator(&self, operator: &Operator) -> bool {
        self.user_ids.contains(&operator.user_id)
    }
}

/// Checks the credential a client presents in IDENTIFY.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, user_id: &str, platform: Platform, token: &str) -> Result<(), &'static str>;
}

/// Accepts every handshake. For deployments where an upstream proxy has
/// already validated the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustUpstream;

#[async_trait]
impl TokenVerifier for TrustUpstream {
    async fn verify(&self, _user_id: &str, _platform: Platform, _token: &str) -> Result<(), &'static str> {
        Ok(())
    }
}
