//! Caller authentication for worker and task routes.
//!
//! Two callers are accepted: the database webhook, which marks its requests
//! with `x-internal-webhook: true`, and the cron trigger, which presents
//! `Authorization: Bearer <WORKER_SECRET>`.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use relay_common::error::AppError;

use crate::state::AppState;

pub const INTERNAL_WEBHOOK_HEADER: &str = "x-internal-webhook";

/// Who is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    InternalWebhook,
    Bearer,
}

/// Extractor for routes restricted to trusted callers.
///
/// ```ignore
/// async fn handler(auth: WorkerAuth) -> impl IntoResponse {
///     tracing::info!(caller = ?auth.caller, "called");
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WorkerAuth {
    pub caller: Caller,
}

/// Check request headers against the configured secret.
///
/// With no secret configured only the internal webhook marker is accepted.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<Caller, AppError> {
    let internal = headers
        .get(INTERNAL_WEBHOOK_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if internal {
        return Ok(Caller::InternalWebhook);
    }

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (bearer, secret) {
        (Some(token), Some(secret)) if secret_matches(token, secret) => Ok(Caller::Bearer),
        _ => Err(AppError::Auth("Unauthorized".to_string())),
    }
}

/// Constant-time byte comparison.
fn secret_matches(token: &str, secret: &str) -> bool {
    token.as_bytes().ct_eq(secret.as_bytes()).into()
}

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = authorize(&parts.headers, state.config.worker_secret.as_deref())?;
        Ok(WorkerAuth { caller })
    }
}
