//! Cross-cutting layers applied to every route.
//!
//! Layers run top to bottom on the way in:
//! 1. request tracing (method, path, client address, status, latency)
//! 2. CORS
//! 3. panic recovery
//! 4. response timeout (`writeTimeout`)
//! 5. request body timeout (`readTimeout`)
//!
//! A timeout of `0` seconds disables that layer.

use crate::config::ServerConfig;
use crate::response::ApiResponse;
use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, Span};

/// Wrap `router` with the standard middleware stack.
pub fn apply(mut router: Router, config: &ServerConfig) -> Router {
    if config.read_timeout > 0 {
        router = router.layer(RequestBodyTimeoutLayer::new(Duration::from_secs(
            config.read_timeout,
        )));
    }
    if config.write_timeout > 0 {
        router = router.layer(TimeoutLayer::new(Duration::from_secs(
            config.write_timeout,
        )));
    }

    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    let client = req
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string())
                        .unwrap_or_else(|| "-".to_string());

                    tracing::info_span!(
                        "request",
                        method = %req.method(),
                        path = %req.uri().path(),
                        client = %client,
                    )
                })
                .on_request(())
                .on_response(|res: &Response<_>, latency: Duration, _span: &Span| {
                    info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "request completed"
                    );
                }),
        )
        .layer(build_cors(&config.allow_origins))
        .layer(CatchPanicLayer::custom(handle_panic));

    router.layer(middleware)
}

/// CORS policy for the configured origins. `*` allows any origin.
pub fn build_cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::from(AnyOrigin)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
}

/// Convert a handler panic into a 500 envelope.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, "Recovered from handler panic");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(format!(
            "Internal server error: {}",
            detail
        ))),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get};
    use tower::ServiceExt;

    fn test_router(config: &ServerConfig) -> Router {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/panic", get(|| async { panic!("boom") as () }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route(
                "/brief",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    "brief"
                }),
            );
        apply(router, config)
    }

    #[tokio::test]
    async fn test_panic_becomes_500_and_server_continues() {
        let app = test_router(&ServerConfig::default());

        let response = app
            .clone()
            .oneshot(Request::get("/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error: boom");

        let response = app
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_write_timeout_returns_408() {
        let config = ServerConfig {
            write_timeout: 1,
            ..ServerConfig::default()
        };
        let app = test_router(&config);

        let response = app
            .clone()
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let response = app
            .oneshot(Request::get("/brief").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_zero_timeouts_are_disabled() {
        let config = ServerConfig {
            read_timeout: 0,
            write_timeout: 0,
            ..ServerConfig::default()
        };
        let response = test_router(&config)
            .oneshot(Request::get("/brief").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin_by_default() {
        let response = test_router(&ServerConfig::default())
            .oneshot(
                Request::get("/ok")
                    .header(header::ORIGIN, "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_cors_restricts_to_listed_origins() {
        let config = ServerConfig {
            allow_origins: vec!["http://allowed.test".to_string()],
            ..ServerConfig::default()
        };
        let app = test_router(&config);

        let response = app
            .clone()
            .oneshot(
                Request::get("/ok")
                    .header(header::ORIGIN, "http://allowed.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://allowed.test"
        );

        let response = app
            .oneshot(
                Request::get("/ok")
                    .header(header::ORIGIN, "http://other.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
