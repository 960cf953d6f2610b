// src/core/engine/object.rs

//! The object proxy engine: whole-response caching for non-timeseries paths.

use super::flight::FlightGroup;
use super::{RequestOptions, timed_fetch};
use crate::core::DeltaCacheError;
use crate::core::cache::{Cache, LookupStatus};
use crate::core::headers::format_result;
use crate::core::metrics::{FLIGHT_JOINS_TOTAL, LOOKUPS_TOTAL};
use crate::core::origin::{ObjectRequest, Origin, UpstreamObject};
use crate::core::timeseries::ExtentList;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ENGINE_NAME: &str = "ObjectProxyCache";

/// The stored form of an upstream response.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
struct CachedObject {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl From<&UpstreamObject> for CachedObject {
    fn from(object: &UpstreamObject) -> Self {
        Self {
            status: object.status,
            content_type: object.content_type.clone(),
            body: object.body.to_vec(),
        }
    }
}

impl From<CachedObject> for UpstreamObject {
    fn from(object: CachedObject) -> Self {
        Self {
            status: object.status,
            content_type: object.content_type,
            body: Bytes::from(object.body),
            cacheable: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectResponse {
    pub object: UpstreamObject,
    pub status: LookupStatus,
}

impl ObjectResponse {
    pub fn result_header(&self) -> Option<String> {
        format_result(ENGINE_NAME, self.status.as_str(), "", &ExtentList::new())
    }
}

/// Cache key for an object request: origin, path and query string.
pub fn object_key(origin: &str, request: &ObjectRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.path.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.query.as_deref().unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ObjectProxyCache {
    cache: Arc<dyn Cache>,
    origin: Arc<dyn Origin>,
    flights: FlightGroup<UpstreamObject>,
}

impl ObjectProxyCache {
    pub fn new(cache: Arc<dyn Cache>, origin: Arc<dyn Origin>) -> Self {
        Self {
            cache,
            origin,
            flights: FlightGroup::new(),
        }
    }

    pub async fn fetch(
        &self,
        request: &ObjectRequest,
        options: RequestOptions,
    ) -> Result<ObjectResponse, DeltaCacheError> {
        let origin_name = self.origin.name().to_string();
        let key = object_key(&origin_name, request);

        let status = if options.purge {
            self.cache.remove(&key).await;
            LookupStatus::Purge
        } else {
            match self.cache.retrieve(&key, false).await {
                Ok((data, status)) => {
                    match bincode::decode_from_slice::<CachedObject, _>(
                        &data,
                        bincode::config::standard(),
                    ) {
                        Ok((cached, _)) => {
                            LOOKUPS_TOTAL
                                .with_label_values(&[ENGINE_NAME, origin_name.as_str(), status.as_str()])
                                .inc();
                            return Ok(ObjectResponse {
                                object: cached.into(),
                                status,
                            });
                        }
                        Err(e) => {
                            warn!("Ignoring unreadable cached object '{}': {}", key, e);
                            LookupStatus::KeyMiss
                        }
                    }
                }
                Err(e) => match e.lookup_status() {
                    Some(status) => status,
                    None => {
                        warn!("Ignoring unreadable cached object '{}': {}", key, e);
                        LookupStatus::KeyMiss
                    }
                },
            }
        };
        LOOKUPS_TOTAL
            .with_label_values(&[ENGINE_NAME, origin_name.as_str(), status.as_str()])
            .inc();

        let origin = Arc::clone(&self.origin);
        let scoped = request.clone();
        let (result, joined) = self
            .flights
            .run(key.clone(), move || async move {
                let name = origin.name().to_string();
                let timeout = origin.config().timeout;
                timed_fetch(&name, timeout, origin.fetch_object(&scoped)).await
            })
            .await;
        if joined {
            FLIGHT_JOINS_TOTAL
                .with_label_values(&[origin_name.as_str()])
                .inc();
        }
        let object = result?;

        if object.cacheable && object.is_success() {
            let ttl = self.origin.config().object_ttl;
            match bincode::encode_to_vec(CachedObject::from(&object), bincode::config::standard()) {
                Ok(data) => {
                    if let Err(e) = self.cache.store(&key, Bytes::from(data), ttl).await {
                        warn!("Failed to cache object '{}': {}", key, e);
                    }
                }
                Err(e) => warn!("Failed to encode object '{}': {}", key, e),
            }
        } else {
            debug!(
                "Not caching object '{}' from origin '{}' (status {})",
                request.path, origin_name, object.status
            );
        }

        Ok(ObjectResponse { object, status })
    }
}
