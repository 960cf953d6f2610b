// src/core/origin/http.rs

//! An origin reached over HTTP with `reqwest`.

use super::{ObjectRequest, Origin, UpstreamObject, UpstreamSeries, caql, is_cacheable};
use crate::config::{AppInfo, OriginConfig};
use crate::core::DeltaCacheError;
use crate::core::headers::{add_proxy_headers, remove_client_headers, update_headers};
use crate::core::timeseries::{TimeRangeQuery, wire};
use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Method;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use tracing::debug;
use url::Url;

/// Upstream path used for health checks when none is configured.
const DEFAULT_HEALTH_PATH: &str = "/state";

/// A CAQL-speaking time-series backend.
pub struct HttpOrigin {
    config: OriginConfig,
    base: Url,
    client: reqwest::Client,
    app: AppInfo,
}

impl HttpOrigin {
    pub fn new(config: OriginConfig, app: AppInfo) -> Result<Self, DeltaCacheError> {
        let base = Url::parse(&config.origin_url).map_err(|e| {
            DeltaCacheError::Internal(format!(
                "invalid origin_url '{}' for origin '{}': {e}",
                config.origin_url, config.name
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            base,
            client,
            app,
        })
    }

    /// Headers sent with every upstream request.
    fn upstream_headers(&self, client_headers: &HeaderMap, remote_addr: &str) -> HeaderMap {
        let mut headers = client_headers.clone();
        remove_client_headers(&mut headers);
        add_proxy_headers(remote_addr, &mut headers, &self.app);
        update_headers(&mut headers, &self.config.request_headers);
        headers
    }

    async fn get_object(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
    ) -> Result<UpstreamObject, DeltaCacheError> {
        debug!("Fetching object from origin '{}': {}", self.config.name, url);
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        let cache_control = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok());
        Ok(UpstreamObject {
            status: status.as_u16(),
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            cacheable: status.is_success() && is_cacheable(cache_control),
            body,
        })
    }

    /// Proxies the configured health check to the origin.
    ///
    /// A `-` in any of the health check settings selects the default for it:
    /// path `/state`, verb `GET`, no query.
    pub async fn health_check(&self, remote_addr: &str) -> Result<UpstreamObject, DeltaCacheError> {
        let mut url = self.base.clone();
        match self.config.health_check_upstream_path.as_str() {
            "-" => url.set_path(DEFAULT_HEALTH_PATH),
            path => url.set_path(path),
        }
        match self.config.health_check_query.as_str() {
            "-" => url.set_query(None),
            query => url.set_query(Some(query)),
        }
        let method = match self.config.health_check_verb.as_str() {
            "-" => Method::GET,
            verb => Method::from_bytes(verb.to_ascii_uppercase().as_bytes()).map_err(|_| {
                DeltaCacheError::Internal(format!("invalid health check verb '{verb}'"))
            })?,
        };
        let headers = self.upstream_headers(&HeaderMap::new(), remote_addr);
        self.get_object(method, url, headers).await
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &OriginConfig {
        &self.config
    }

    async fn fetch_timeseries(
        &self,
        query: &TimeRangeQuery,
    ) -> Result<UpstreamSeries, DeltaCacheError> {
        let url = caql::upstream_url(&self.base, &self.config.timeseries_path, query);
        debug!("Fetching {} from origin '{}': {}", query.extent, self.config.name, url);

        let response = self
            .client
            .get(url)
            .headers(self.upstream_headers(&query.headers, &query.remote_addr))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeltaCacheError::UpstreamStatus(status.as_u16()));
        }
        let cacheable = is_cacheable(
            response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.bytes().await?;
        let series = wire::decode(&body)?;
        Ok(UpstreamSeries { series, cacheable })
    }

    async fn fetch_object(
        &self,
        request: &ObjectRequest,
    ) -> Result<UpstreamObject, DeltaCacheError> {
        let mut url = self.base.clone();
        url.set_path(&format!(
            "{}/{}",
            self.base.path().trim_end_matches('/'),
            request.path.trim_start_matches('/')
        ));
        url.set_query(request.query.as_deref());
        let headers = self.upstream_headers(&request.headers, &request.remote_addr);
        self.get_object(Method::GET, url, headers).await
    }
}
