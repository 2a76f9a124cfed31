use crate::edge::error::deny_response;
use crate::edge::validator::EdgeValidator;
use crate::issuer::token_prefix;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

/// Token consumed by the edge validator, available to downstream handlers
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RedeemedToken(pub String);

/// Middleware admitting a request only if it consumes a pending one-time token
pub async fn one_time_token_middleware(
    State(validator): State<EdgeValidator>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    let mut response = match validator.admit(req.uri().query()).await {
        Ok(token) => {
            debug!(token = token_prefix(&token), %path, "Token consumed, forwarding");
            req.extensions_mut().insert(RedeemedToken(token));
            next.run(req).await
        }
        Err(cause) => {
            warn!(kind = cause.kind(), %cause, %path, "Redemption denied");
            deny_response()
        }
    };

    // Every fetch must come back through the validator
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
