use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, any, get, on};
use meshsim_core::time::format_duration;
use meshsim_core::topology::HttpMethod;
use meshsim_core::{MeshError, Result};
use tower_http::trace::TraceLayer;
use tracing::{Level, warn};

use crate::service::{InboundRequest, ServiceResponse, ServiceRuntime};
use crate::trace::TRACEPARENT_HEADER;

const TEST_ROUTE: &str = "/test";

struct RouteTarget {
    runtime: ServiceRuntime,
    service: String,
    path: String,
}

/// Inbound surface of one hosted service: a route per declared endpoint with its
/// declared methods, a `/test` probe, and a 404 fallback.
pub fn service_router(runtime: &ServiceRuntime, service: &str) -> Result<Router> {
    let descriptor = runtime.topology().service(service)?;

    let mut router = Router::new();
    for endpoint in &descriptor.endpoints {
        let target = Arc::new(RouteTarget {
            runtime: runtime.clone(),
            service: service.to_string(),
            path: endpoint.path.clone(),
        });
        let filter = endpoint
            .methods
            .iter()
            .map(|m| method_filter(*m))
            .reduce(MethodFilter::or)
            .unwrap_or(MethodFilter::GET);
        router = router.route(
            &endpoint.path,
            on(filter, move |method: Method, headers: HeaderMap, body: Bytes| {
                let target = Arc::clone(&target);
                async move { dispatch(&target, &method, &headers, body.len()).await }
            }),
        );
    }

    if descriptor.endpoint(TEST_ROUTE).is_none() {
        let probe = format!("Test route for {service}");
        router = router.route(
            TEST_ROUTE,
            get(move || {
                let probe = probe.clone();
                async move { text_response(200, probe) }
            }),
        );
    }

    let name = service.to_string();
    Ok(router
        .fallback(move |uri: Uri| {
            let name = name.clone();
            async move {
                let err = MeshError::NotFound(format!("endpoint {name}{}", uri.path()));
                text_response(err.status_code(), err.to_string())
            }
        })
        .layer(trace_layer()))
}

/// Shared gateway surface: `/{service}/{path}` dispatches to the hosted service.
/// `/{service}` and `/{service}/` reach the service's root endpoint.
pub fn gateway_router(runtime: &ServiceRuntime) -> Router {
    let nested = runtime.clone();
    let root = runtime.clone();
    let root_route = any(
        move |Path(service): Path<String>, method: Method, headers: HeaderMap, body: Bytes| {
            let target = RouteTarget {
                runtime: root.clone(),
                service,
                path: "/".to_string(),
            };
            async move { dispatch(&target, &method, &headers, body.len()).await }
        },
    );

    Router::new()
        .route(
            "/{service}/{*rest}",
            any(
                move |Path((service, rest)): Path<(String, String)>,
                      method: Method,
                      headers: HeaderMap,
                      body: Bytes| {
                    let target = RouteTarget {
                        runtime: nested.clone(),
                        service,
                        path: format!("/{rest}"),
                    };
                    async move { dispatch(&target, &method, &headers, body.len()).await }
                },
            ),
        )
        .route("/{service}", root_route.clone())
        .route("/{service}/", root_route)
        .fallback(|uri: Uri| async move {
            let err = MeshError::NotFound(format!("gateway route {}", uri.path()));
            text_response(err.status_code(), err.to_string())
        })
        .layer(trace_layer())
}

async fn dispatch(
    target: &RouteTarget,
    method: &Method,
    headers: &HeaderMap,
    payload_size: usize,
) -> Response {
    let Ok(method) = HttpMethod::parse(method.as_str()) else {
        return text_response(405, format!("method {method} not allowed"));
    };
    let inbound = InboundRequest {
        method,
        traceparent: headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        payload_size: u64::try_from(payload_size).unwrap_or(u64::MAX),
    };

    let deadline = target.runtime.request_timeout();
    let handled = target
        .runtime
        .handle(&target.service, &target.path, inbound);
    match tokio::time::timeout(deadline, handled).await {
        Ok(ServiceResponse { status, body }) => text_response(status, body),
        Err(_) => {
            warn!(
                service = %target.service,
                path = %target.path,
                deadline = %format_duration(deadline),
                "inbound request exceeded deadline"
            );
            text_response(
                504,
                format!(
                    "{}{} did not complete within {}",
                    target.service,
                    target.path,
                    format_duration(deadline)
                ),
            )
        }
    }
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Patch => MethodFilter::PATCH,
        HttpMethod::Delete => MethodFilter::DELETE,
    }
}

fn text_response(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    tower_http::trace::DefaultMakeSpan,
    tower_http::trace::DefaultOnRequest,
    tower_http::trace::DefaultOnResponse,
> {
    TraceLayer::new_for_http()
        .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO))
}
