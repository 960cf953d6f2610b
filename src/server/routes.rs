// src/server/routes.rs

//! HTTP handlers for proxied origins.

use super::context::ProxyState;
use crate::core::DeltaCacheError;
use crate::core::engine::RequestOptions;
use crate::core::engine::{delta, object};
use crate::core::headers::{X_RESULT, add_response_headers, extract_header, set_result_header};
use crate::core::origin::{ObjectRequest, UpstreamObject, caql::parse_time_range_query};
use crate::core::timeseries::wire;
use axum::Router;
use axum::extract::{ConnectInfo, Path, Query, RawQuery, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

const FIND_PATH: &str = "/find";

/// Builds the proxy router. Serve it with connect info so handlers see the client address.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/{origin}/caql", get(caql_handler))
        .route("/{origin}/find", get(find_handler))
        .route("/{origin}/health", get(health_handler))
        .with_state(state)
}

/// Maps engine errors onto HTTP responses.
pub struct ApiError(DeltaCacheError);

impl From<DeltaCacheError> for ApiError {
    fn from(e: DeltaCacheError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            e if e.is_parameter_error() => StatusCode::BAD_REQUEST,
            e if e.is_upstream_error() => StatusCode::BAD_GATEWAY,
            DeltaCacheError::UnknownOrigin(_) => StatusCode::NOT_FOUND,
            DeltaCacheError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, self.0);
        } else {
            debug!("Request rejected with {}: {}", status, self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Reads per-request switches from the client headers.
fn request_options(headers: &HeaderMap) -> RequestOptions {
    let purge = extract_header(headers, CACHE_CONTROL.as_str()).is_some_and(|value| {
        value
            .split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
    });
    RequestOptions { purge }
}

fn object_response(
    state: &ProxyState,
    object: UpstreamObject,
    engine: &str,
    status: &str,
) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(value) = object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(CONTENT_TYPE, value);
    }
    add_response_headers(&mut headers, &state.app);
    set_result_header(&mut headers, engine, status, "", &Default::default());
    let code = StatusCode::from_u16(object.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (code, headers, object.body).into_response()
}

async fn caql_handler(
    State(state): State<Arc<ProxyState>>,
    Path(origin): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let route = state.route(&origin)?;
    let options = request_options(&headers);
    let query = parse_time_range_query(&params)?.with_client(headers, remote.ip().to_string());
    let response = route.delta.fetch(&query, options).await?;
    let body = wire::encode(&response.series)?;

    let mut out = HeaderMap::new();
    out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    add_response_headers(&mut out, &state.app);
    set_result_header(
        &mut out,
        delta::ENGINE_NAME,
        response.status.as_str(),
        response.ff_status.as_str(),
        &response.fetched,
    );
    debug!(
        "Served {} for origin '{}': {}",
        response.extent,
        origin,
        out.get(X_RESULT).and_then(|v| v.to_str().ok()).unwrap_or_default()
    );
    Ok((StatusCode::OK, out, body).into_response())
}

async fn find_handler(
    State(state): State<Arc<ProxyState>>,
    Path(origin): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let route = state.route(&origin)?;
    let options = request_options(&headers);
    let request = ObjectRequest {
        path: FIND_PATH.to_string(),
        query,
        headers,
        remote_addr: remote.ip().to_string(),
    };
    let response = route.object.fetch(&request, options).await?;
    Ok(object_response(
        &state,
        response.object,
        object::ENGINE_NAME,
        response.status.as_str(),
    ))
}

async fn health_handler(
    State(state): State<Arc<ProxyState>>,
    Path(origin): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    let route = state.route(&origin)?;
    let object = route.http.health_check(&remote.ip().to_string()).await?;
    Ok(object_response(&state, object, "", ""))
}
