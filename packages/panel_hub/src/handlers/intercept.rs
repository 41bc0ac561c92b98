//! Fetch interception fallback.
//!
//! Every request no reserved route claims lands here and runs through the
//! cache engine: cache-first for shell assets, network-first for
//! navigations, network-only for the denylist. What the engine declines
//! (non-GET methods, cross-site requests) is proxied to the upstream
//! origin untouched and uncached.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri, header, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use shell_cache::{CachedResponse, FetchRequest, Intercept};

use crate::AppState;

/// Largest request body the passthrough proxy will buffer.
const PASSTHROUGH_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Caller headers relayed on engine-driven network fetches. The engine
/// synthesizes its own upstream request, so credentials and content
/// negotiation must ride along explicitly or an authenticated
/// `GET /api/...` reaches the backend credential-less.
const RELAYED_HEADERS: &[&str] = &["authorization", "cookie", "accept", "accept-language"];

pub async fn intercept_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let fetch = fetch_request(&parts.method, &parts.uri, &parts.headers);

    match state.engine.intercept(&fetch).await {
        Intercept::Respond(response) => into_http(response),
        Intercept::Passthrough => passthrough(&state, &fetch, &parts, body).await,
    }
}

/// Reduce raw request parts to what classification needs.
///
/// `Sec-Fetch-Mode: navigate` marks top-level document loads; clients
/// without fetch metadata are recognized by an `Accept` header asking for
/// HTML. Cross-site requests (per `Sec-Fetch-Site`) are left alone.
fn fetch_request(method: &Method, uri: &Uri, headers: &HeaderMap) -> FetchRequest {
    let navigation = match header_str(headers, "sec-fetch-mode") {
        Some(mode) => mode == "navigate",
        None => header_str(headers, "accept").is_some_and(|accept| accept.contains("text/html")),
    };
    let same_origin = match header_str(headers, "sec-fetch-site") {
        Some(site) => site == "same-origin" || site == "none",
        None => true,
    };

    let relayed = RELAYED_HEADERS
        .iter()
        .filter_map(|name| {
            header_str(headers, name).map(|value| (name.to_string(), value.to_string()))
        })
        .collect();

    FetchRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        same_origin,
        navigation,
        headers: relayed,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn into_http(response: CachedResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

/// Forward a request the cache layer does not handle to the upstream
/// origin, relaying method, query, content type, and body.
async fn passthrough(state: &AppState, fetch: &FetchRequest, parts: &Parts, body: Body) -> Response {
    let origin = state.config.upstream.origin.trim_end_matches('/');
    let url = format!("{}{}", origin, fetch.target());

    let bytes = match to_bytes(body, PASSTHROUGH_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(url = %url, "Failed to buffer passthrough body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut upstream = state.http.request(parts.method.clone(), &url);
    if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
        upstream = upstream.header(header::CONTENT_TYPE, content_type.clone());
    }

    match upstream.body(bytes.to_vec()).send().await {
        Ok(response) => {
            let status = response.status();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match response.bytes().await {
                Ok(body) => (
                    status,
                    [(header::CONTENT_TYPE, content_type)],
                    body.to_vec(),
                )
                    .into_response(),
                Err(e) => {
                    warn!(url = %url, "Passthrough body read failed: {}", e);
                    StatusCode::BAD_GATEWAY.into_response()
                }
            }
        }
        Err(e) => {
            warn!(url = %url, "Passthrough request failed: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
