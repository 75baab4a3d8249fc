use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::assembler::{Assembled, CacheStatus};

pub const CACHE_STATUS_HEADER: &str = "x-cache-status";
/// Older dashboard builds read `X-Cache`.
pub const LEGACY_CACHE_HEADER: &str = "x-cache";

const NO_STORE: &str = "no-cache, no-store, must-revalidate";

pub fn success<T: Serialize>(data: T) -> (StatusCode, Json<T>) {
    (StatusCode::OK, Json(data))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(data))
}

/// Dashboard payload with cache headers. Bypassed requests are marked
/// non-cacheable for intermediaries too.
pub fn cached(assembled: Assembled, max_age_secs: u64) -> Response {
    let cache_control = if assembled.cache_status == CacheStatus::Bypass {
        NO_STORE.to_string()
    } else {
        format!("public, max-age={}, stale-while-revalidate=300", max_age_secs)
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    let status = HeaderValue::from_static(assembled.cache_status.as_str());
    headers.insert(CACHE_STATUS_HEADER, status.clone());
    headers.insert(LEGACY_CACHE_HEADER, status);

    (StatusCode::OK, headers, Json(assembled.body)).into_response()
}
