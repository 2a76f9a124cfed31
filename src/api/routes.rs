use crate::AppState;
use crate::edge::RedeemedToken;
use crate::issuer::{IssueUrlResponse, token_prefix};
use crate::object_store::normalize_key;
use axum::body::Body;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use mime_guess::from_path;
use serde_json::json;
use tracing::{debug, error, info};

/// Issue a fresh one-time URL for the configured asset
pub async fn get_url(Extension(state): Extension<AppState>) -> Response<Body> {
    match state.issuer.issue().await {
        Ok(issued) => {
            info!(
                token = token_prefix(&issued.token),
                expires_at = ?issued.expires_at,
                "One-time URL issued"
            );
            let mut res = (
                StatusCode::OK,
                Json(IssueUrlResponse {
                    url: issued.url,
                    expires_at: issued.expires_at,
                }),
            )
                .into_response();
            res.headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            res
        }
        Err(error) => {
            error!(%error, "Failed to issue one-time URL");
            err_response(error.to_err_code(), &error.to_string())
        }
    }
}

/// Requested slice of an object
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a single `Range: bytes=...` header against an object of `size` bytes.
/// Malformed or multi-range headers are ignored and the full object is served.
fn parse_range(headers: &HeaderMap, size: u64) -> ByteRange {
    let Some(spec) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
    else {
        return ByteRange::Full;
    };

    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };

    match (first.trim(), last.trim()) {
        ("", "") => ByteRange::Full,
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if size == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial {
                start: size.saturating_sub(n),
                end: size - 1,
            },
            Err(_) => ByteRange::Full,
        },
        (first, last) => {
            let Ok(start) = first.parse::<u64>() else {
                return ByteRange::Full;
            };
            let end = if last.is_empty() {
                None
            } else {
                match last.parse::<u64>() {
                    Ok(end) if end >= start => Some(end),
                    _ => return ByteRange::Full,
                }
            };

            if start >= size {
                return ByteRange::Unsatisfiable;
            }
            ByteRange::Partial {
                start,
                end: end.map_or(size - 1, |end| end.min(size - 1)),
            }
        }
    }
}

/// Stream the object behind a redeemed URL
pub async fn serve_asset(
    Extension(state): Extension<AppState>,
    Extension(RedeemedToken(token)): Extension<RedeemedToken>,
    AxumPath(path): AxumPath<String>,
    req: Request<Body>,
) -> Response<Body> {
    let Some(key) = normalize_key(&path) else {
        return file_not_found();
    };

    let size = match state.object_store.stat(&key).await {
        Ok(Some(size)) => size,
        Ok(None) => {
            // The token is already spent at this point
            error!(%key, token = token_prefix(&token), "Redeemed URL points at a missing object");
            return file_not_found();
        }
        Err(error) => {
            error!(%key, ?error, "Failed to stat object");
            return err_response(StatusCode::BAD_GATEWAY, "Object store unavailable");
        }
    };

    let content_type = from_path(&key).first_or_octet_stream();

    if size == 0 {
        return with_object_headers(Response::new(Body::empty()), content_type.as_ref(), 0);
    }

    let (status, start, end) = match parse_range(req.headers(), size) {
        ByteRange::Full => (StatusCode::OK, 0, size - 1),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end),
        ByteRange::Unsatisfiable => {
            let mut res = err_response(StatusCode::RANGE_NOT_SATISFIABLE, "Range not satisfiable");
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                res.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return res;
        }
    };

    let stream = match state.object_store.stream_range(&key, start, end).await {
        Ok(stream) => stream,
        Err(error) => {
            error!(%key, ?error, "Failed to open object stream");
            return err_response(StatusCode::BAD_GATEWAY, "Object store unavailable");
        }
    };

    debug!(%key, start, end, size, token = token_prefix(&token), "Serving object");

    let mut res = with_object_headers(
        Response::new(Body::from_stream(stream)),
        content_type.as_ref(),
        end - start + 1,
    );
    *res.status_mut() = status;
    if status == StatusCode::PARTIAL_CONTENT
        && let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
    {
        res.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    res
}

fn with_object_headers(mut res: Response<Body>, content_type: &str, len: u64) -> Response<Body> {
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    res
}

fn file_not_found() -> Response<Body> {
    err_response(StatusCode::NOT_FOUND, "File not found")
}

pub(crate) fn err_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = json!({
        "error": message,
        "status": status.as_u16()
    });
    (status, Json(body)).into_response()
}
