//! Cross-origin policy and request correlation for the game API

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer, ExposeHeaders};
use uuid::Uuid;

/// Correlates a response, its error body and the server logs
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Browsers place bets and cash out with POST and read state with GET.
/// An empty list or `*` opens the API to any origin.
pub fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    let wildcard = allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*");
    let origins = if wildcard {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]))
}

/// Tag every request with an id, reusing one the client sent, and echo it on
/// the response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = client_request_id(request.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn client_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Request id handed to handlers through request extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);
