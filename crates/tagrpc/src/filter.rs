//! # Byte Filters
//!
//! Filters transform whole encoded messages: compression, encryption,
//! tracing. Both ends apply the same list.
//!
//! ## Invariants
//! - **Symmetry**: outgoing bytes pass through the filters in registration
//!   order and incoming bytes in reverse, so filter N's output transform is
//!   undone by filter N's input transform with everything registered after
//!   it already peeled off.

use std::sync::Arc;

use crate::error::Result;

pub trait Filter: Send + Sync + 'static {
    /// Transforms bytes arriving from the peer.
    fn input(&self, data: Vec<u8>) -> Result<Vec<u8>>;
    /// Transforms bytes about to be sent to the peer.
    fn output(&self, data: Vec<u8>) -> Result<Vec<u8>>;
}

/// An ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: impl Filter) {
        self.filters.push(Arc::new(filter));
    }

    pub fn push_arc(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Applies input transforms, last registered first.
    pub fn input(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        self.filters.iter().rev().try_fold(data, |data, filter| filter.input(data))
    }

    /// Applies output transforms in registration order.
    pub fn output(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        self.filters.iter().try_fold(data, |data, filter| filter.output(data))
    }
}

/// Traces message sizes and a printable preview at debug level.
#[derive(Debug, Clone, Default)]
pub struct LoggingFilter {
    pub label: &'static str,
}

impl LoggingFilter {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

const PREVIEW_LEN: usize = 64;

fn preview(data: &[u8]) -> String {
    let end = data.len().min(PREVIEW_LEN);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

impl Filter for LoggingFilter {
    fn input(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        tracing::debug!(label = self.label, bytes = data.len(), preview = %preview(&data), "input");
        Ok(data)
    }

    fn output(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        tracing::debug!(label = self.label, bytes = data.len(), preview = %preview(&data), "output");
        Ok(data)
    }
}

/// XORs every byte with a repeating key. Not encryption; it only makes the
/// payload unreadable to anything that skipped the filter.
#[derive(Debug, Clone)]
pub struct XorFilter {
    key: Vec<u8>,
}

impl XorFilter {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn apply(&self, mut data: Vec<u8>) -> Vec<u8> {
        if self.key.is_empty() {
            return data;
        }
        for (byte, k) in data.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
        data
    }
}

impl Filter for XorFilter {
    fn input(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self.apply(data))
    }

    fn output(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self.apply(data))
    }
}
