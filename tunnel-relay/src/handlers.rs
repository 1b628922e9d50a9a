//! Public-facing axum router: a health check plus the proxy fallback that
//! forwards everything else into whichever tunnel session matches the
//! request's `Host` header.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tunnel_wire::{HeaderMap as WireHeaderMap, RequestFrame, ResponseFrame};
use uuid::Uuid;

use crate::error::UnknownHostError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(proxy)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    let Some(hostname) = extract_hostname(&req) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };

    let Some(session) = state.registry.lookup(&hostname) else {
        return if is_primary_host(&hostname, state.config.base_domain.as_deref()) {
            static_fallback()
        } else {
            UnknownHostError.into_response()
        };
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read request body").into_response(),
    };

    let mut headers = WireHeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.append(name.as_str(), value);
        }
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let id = parts
        .headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let frame = RequestFrame {
        id,
        method: parts.method.to_string(),
        path,
        headers,
        body: body_bytes.to_vec(),
    };

    let rx = match session.dispatch(frame) {
        Ok(rx) => rx,
        Err(synthetic) => return response_from_frame(synthetic),
    };

    match tokio::time::timeout(state.config.response_timeout(), rx).await {
        Ok(Ok(response)) => response_from_frame(response),
        Ok(Err(_)) => (StatusCode::BAD_GATEWAY, "tunnel closed before responding").into_response(),
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "tunnel did not respond in time").into_response(),
    }
}

fn extract_hostname(req: &Request) -> Option<String> {
    req.headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or(host).to_string())
}

/// True for the relay's own marketing host or a loopback variant — the
/// cases spec.md routes to the out-of-scope static fallback collaborator
/// instead of the "tunnel not found" 502.
fn is_primary_host(hostname: &str, base_domain: Option<&str>) -> bool {
    base_domain.is_some_and(|base| hostname.eq_ignore_ascii_case(base))
        || hostname.eq_ignore_ascii_case("localhost")
        || hostname == "127.0.0.1"
}

/// Stands in for the static marketing/dashboard site the core does not
/// implement (spec.md §1's out-of-scope web dashboard). A real deployment
/// substitutes a real static-file or reverse-proxy handler here.
fn static_fallback() -> Response {
    (StatusCode::OK, "tunnel relay").into_response()
}

fn response_from_frame(frame: ResponseFrame) -> Response {
    let mut builder = Response::builder().status(frame.status_code);
    for (name, values) in frame.headers.iter() {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(frame.body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "malformed tunnel response").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::token::default_validator;
    use axum::body::Body as AxumBody;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_responds_ok() {
        let state = AppState::new(Config::from_env(), default_validator());
        let app = router(state);
        let response = app
            .oneshot(HttpRequest::builder().uri("/health").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn unknown_host_returns_bad_gateway() {
        let state = AppState::new(Config::from_env(), default_validator());
        let app = router(state);
        let request = HttpRequest::builder()
            .uri("/whatever")
            .header("host", "nowhere.example.com")
            .body(AxumBody::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn missing_host_header_is_bad_request() {
        let state = AppState::new(Config::from_env(), default_validator());
        let app = router(state);
        let request = HttpRequest::builder().uri("/whatever").body(AxumBody::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn base_domain_without_a_session_falls_back_instead_of_502() {
        let mut config = Config::from_env();
        config.base_domain = Some("relay.example.com".to_string());
        let state = AppState::new(config, default_validator());
        let app = router(state);
        let request = HttpRequest::builder()
            .uri("/")
            .header("host", "relay.example.com")
            .body(AxumBody::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
