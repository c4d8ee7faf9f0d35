//! # Tagrpc
//!
//! Remote procedure calls over the tagpack format.
//!
//! A [`Client`] encodes a method name and arguments into a request, runs it
//! through handler chains and byte [`Filter`]s, and hands it to a
//! [`Transport`]. On the far side a [`Service`] undoes the filters, looks the
//! method up, runs it and answers with a result or an error message. Both
//! ends share the [`protocol`] framing and the middleware traits in
//! [`handler`].
//!
//! Transports:
//! - [`MemoryTransport`] delivers to services in the same process.
//! - [`SocketTransport`] / [`SocketServer`] speak length-prefixed frames
//!   over TCP, pooled half-duplex or multiplexed full-duplex.

pub mod client;
pub mod context;
pub mod endpoints;
pub mod error;
pub mod filter;
pub mod handler;
pub mod protocol;
pub mod service;
pub mod settings;
pub mod socket;
pub mod transport;

pub use client::Client;
pub use client::ClientBuilder;
pub use client::backoff;

pub use context::ClientContext;
pub use context::ServiceContext;
pub use context::UserData;

pub use endpoints::Endpoints;

pub use error::Error;
pub use error::Result;
pub use error::TransportError;

pub use filter::Filter;
pub use filter::FilterChain;
pub use filter::LoggingFilter;
pub use filter::XorFilter;

pub use handler::FilterHandler;
pub use handler::Invocation;
pub use handler::InvokeHandler;
pub use handler::NextFilter;
pub use handler::NextInvoke;
pub use handler::Reply;

pub use service::Method;
pub use service::Service;

pub use settings::ClientOptions;
pub use settings::InvokeSettings;
pub use settings::MethodOptions;
pub use settings::ResultMode;
pub use settings::SocketOptions;

pub use socket::SocketServer;
pub use socket::SocketTransport;

pub use transport::MemoryTransport;
pub use transport::Transport;

pub use tagpack::Value;

#[cfg(test)]
mod tests;
