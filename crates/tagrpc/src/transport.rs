//! # Transport Abstraction
//!
//! The seam between the pipeline and the network. A transport moves one
//! encoded request to an endpoint and hands back the response bytes; it
//! knows nothing about tags, filters or retry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::TransportError;
use crate::service::Service;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Sends a request to `uri` and waits for its response.
///
/// Object safe, so clients hold an `Arc<dyn Transport>`. Timeouts are
/// applied by the caller.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_and_receive(&self, uri: &str, request: Vec<u8>) -> TransportResult<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_and_receive(&self, uri: &str, request: Vec<u8>) -> TransportResult<Vec<u8>> {
        (**self).send_and_receive(uri, request).await
    }
}

/// Delivers requests to services in the same process, keyed by URI.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    services: Arc<DashMap<String, Arc<Service>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, uri: impl Into<String>, service: Arc<Service>) {
        self.services.insert(uri.into(), service);
    }

    pub fn unbind(&self, uri: &str) -> Option<Arc<Service>> {
        self.services.remove(uri).map(|(_, service)| service)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_and_receive(&self, uri: &str, request: Vec<u8>) -> TransportResult<Vec<u8>> {
        // Clone out of the map so no shard lock is held across the call.
        let service = self
            .services
            .get(uri)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Refused(uri.to_string()))?;
        Ok(service.handle(request).await)
    }
}
