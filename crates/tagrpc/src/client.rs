//! # Client Pipeline
//!
//! A call passes through these stages, outermost first:
//!
//! 1. invoke handlers, around
//! 2. request encoding and response decoding, around
//! 3. before-filter handlers, around
//! 4. output filters (in order) / input filters (reverse order), around
//! 5. the retry loop, around
//! 6. after-filter handlers, around
//! 7. the transport, under the call timeout.
//!
//! ## Invariants
//! - **Retry What Is Safe**: only transport failures are retried, only for
//!   idempotent calls, and at most `retry` times.
//! - **Failover First**: with failswitch on, every transport failure moves
//!   the endpoint cursor before the next attempt is made.
//! - **Nothing Swallowed**: a failure reaches the caller, or for oneway
//!   calls the error hook.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use pledge::Promise;
use tagpack::FromValue;
use tagpack::Value;

use crate::context::ClientContext;
use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::error::Result;
use crate::error::TransportError;
use crate::filter::Filter;
use crate::filter::FilterChain;
use crate::handler::FilterHandler;
use crate::handler::FilterStage;
use crate::handler::Invocation;
use crate::handler::InvokeHandler;
use crate::handler::InvokeStage;
use crate::handler::NextFilter;
use crate::handler::NextInvoke;
use crate::handler::Reply;
use crate::protocol;
use crate::settings::ClientOptions;
use crate::settings::InvokeSettings;
use crate::settings::ResultMode;
use crate::settings::SocketOptions;
use crate::socket::SocketTransport;
use crate::transport::Transport;

/// Called with the method name when a oneway call fails.
pub type ErrorHook = dyn Fn(&str, &Error) + Send + Sync;

/// Called after the endpoint cursor moves.
pub type FailswitchHook = dyn Fn(&Endpoints) + Send + Sync;

const BACKOFF_STEP_MS: i64 = 500;
const BACKOFF_CAP_MS: i64 = 5000;

/// Delay before retry number `retried`, counting from 1.
///
/// Grows by 500ms per retry up to 5s. With failswitch on it is reduced by
/// 500ms per extra endpoint, so a client with several endpoints retries the
/// next one straight away. Never negative.
pub fn backoff(retried: usize, failswitch: bool, endpoints: usize) -> Duration {
    let mut interval = retried as i64 * BACKOFF_STEP_MS;
    if failswitch {
        interval -= endpoints.saturating_sub(1) as i64 * BACKOFF_STEP_MS;
    }
    Duration::from_millis(interval.clamp(0, BACKOFF_CAP_MS) as u64)
}

/// An RPC client. Cheap to clone; clones share endpoints and connections.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    filters: FilterChain,
    invoke_handlers: Vec<Arc<dyn InvokeHandler<ClientContext>>>,
    before_filter_handlers: Vec<Arc<dyn FilterHandler<ClientContext>>>,
    after_filter_handlers: Vec<Arc<dyn FilterHandler<ClientContext>>>,
    on_error: Option<Arc<ErrorHook>>,
    on_failswitch: Option<Arc<FailswitchHook>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    /// Calls `name` and returns its result. When the call is by reference
    /// and the service echoes arguments, `args` is overwritten with them.
    ///
    /// Oneway calls return `Value::Null` at once and run in the background.
    pub async fn invoke(&self, name: &str, args: &mut Vec<Value>, settings: Option<InvokeSettings>) -> Result<Value> {
        let settings = settings.unwrap_or_default();
        let mut ctx = ClientContext::new(&self.inner.options, &settings);
        let call = Invocation::new(name, args.clone());

        if ctx.oneway {
            let client = self.clone();
            tokio::spawn(async move {
                let name = call.name.clone();
                if let Err(error) = client.run(call, &mut ctx).await {
                    client.report(&name, &error);
                }
            });
            return Ok(Value::Null);
        }

        let reply = self.run(call, &mut ctx).await?;
        if let Some(echoed) = reply.args {
            *args = echoed;
        }
        Ok(reply.result)
    }

    /// Calls `name` and converts the result.
    pub async fn call<R: FromValue>(&self, name: &str, args: Vec<Value>) -> Result<R> {
        let mut args = args;
        let value = self.invoke(name, &mut args, None).await?;
        Ok(value.cast::<R>()?)
    }

    /// Starts a call and returns a promise for its result.
    pub fn invoke_promise(&self, name: &str, args: Vec<Value>, settings: Option<InvokeSettings>) -> Promise<Value> {
        let client = self.clone();
        let name = name.to_string();
        Promise::from_future(async move {
            let mut args = args;
            client
                .invoke(&name, &mut args, settings)
                .await
                .map_err(pledge::Error::from)
        })
    }

    /// Asks the service for the names it publishes.
    pub async fn functions(&self) -> Result<Vec<String>> {
        let inner = &*self.inner;
        let mut ctx = ClientContext::new(&inner.options, &InvokeSettings::default());
        let stage = FilterAndSend { inner };
        let response = NextFilter::new(&inner.before_filter_handlers, &stage)
            .filter(protocol::encode_functions_request(), &mut ctx)
            .await?;
        protocol::decode_functions(&response)
    }

    async fn run(&self, call: Invocation, ctx: &mut ClientContext) -> Result<Reply> {
        let inner = &*self.inner;
        let chain = NextInvoke::new(&inner.invoke_handlers, inner).invoke(call, ctx);
        AssertUnwindSafe(chain)
            .catch_unwind()
            .await
            .map_err(Error::from_panic)?
    }

    fn report(&self, name: &str, error: &Error) {
        tracing::warn!(method = %name, %error, "oneway call failed");
        if let Some(hook) = &self.inner.on_error {
            hook(name, error);
        }
    }
}

impl ClientInner {
    async fn send_request(&self, request: Vec<u8>, ctx: &mut ClientContext) -> Result<Vec<u8>> {
        let stage = Transmit { inner: self };
        loop {
            let attempt = NextFilter::new(&self.after_filter_handlers, &stage)
                .filter(request.clone(), ctx)
                .await;
            let error = match attempt {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() => error,
                Err(error) => return Err(error),
            };
            tracing::debug!(uri = %ctx.uri, retried = ctx.retried, %error, "request failed");

            if ctx.failswitch {
                self.endpoints.failswitch();
                if let Some(hook) = &self.on_failswitch {
                    hook(&self.endpoints);
                }
            }
            if !ctx.idempotent || ctx.retried >= ctx.retry {
                return Err(error);
            }

            ctx.retried += 1;
            let delay = backoff(ctx.retried, ctx.failswitch, self.endpoints.len());
            tracing::debug!(retried = ctx.retried, delay_ms = delay.as_millis() as u64, "retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl InvokeStage<ClientContext> for ClientInner {
    async fn invoke(&self, call: Invocation, ctx: &mut ClientContext) -> Result<Reply> {
        let request = protocol::encode_request(&call, ctx.byref, ctx.simple)?;
        let stage = FilterAndSend { inner: self };
        let response = NextFilter::new(&self.before_filter_handlers, &stage)
            .filter(request, ctx)
            .await?;
        if ctx.oneway {
            return Ok(Reply::new(Value::Null));
        }
        protocol::decode_response(&response, ctx.mode)
    }
}

/// Output filters, the retry loop, then input filters.
struct FilterAndSend<'c> {
    inner: &'c ClientInner,
}

#[async_trait]
impl<'c> FilterStage<ClientContext> for FilterAndSend<'c> {
    async fn filter(&self, request: Vec<u8>, ctx: &mut ClientContext) -> Result<Vec<u8>> {
        let request = self.inner.filters.output(request)?;
        let response = self.inner.send_request(request, ctx).await?;
        self.inner.filters.input(response)
    }
}

/// One attempt against the current endpoint.
struct Transmit<'c> {
    inner: &'c ClientInner,
}

#[async_trait]
impl<'c> FilterStage<ClientContext> for Transmit<'c> {
    async fn filter(&self, request: Vec<u8>, ctx: &mut ClientContext) -> Result<Vec<u8>> {
        let uri = self
            .inner
            .endpoints
            .current()
            .ok_or_else(|| Error::Config("no endpoint configured".into()))?
            .to_string();
        ctx.uri = uri.clone();
        tracing::debug!(%uri, bytes = request.len(), "sending request");
        let response = tokio::time::timeout(ctx.timeout, self.inner.transport.send_and_receive(&uri, request))
            .await
            .map_err(|_| TransportError::Timeout)??;
        tracing::debug!(%uri, bytes = response.len(), "received response");
        Ok(response)
    }
}

// ============================================================================
//  BUILDER
// ============================================================================

#[derive(Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    keep_order: bool,
    socket: SocketOptions,
    transport: Option<Arc<dyn Transport>>,
    filters: FilterChain,
    invoke_handlers: Vec<Arc<dyn InvokeHandler<ClientContext>>>,
    before_filter_handlers: Vec<Arc<dyn FilterHandler<ClientContext>>>,
    after_filter_handlers: Vec<Arc<dyn FilterHandler<ClientContext>>>,
    on_error: Option<Arc<ErrorHook>>,
    on_failswitch: Option<Arc<FailswitchHook>>,
}

impl ClientBuilder {
    /// Replaces all options, endpoints included.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.options.uris.push(uri.into());
        self
    }

    pub fn uris<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.uris.extend(uris.into_iter().map(Into::into));
        self
    }

    /// Uses endpoints in the order given instead of shuffling them.
    pub fn keep_order(mut self) -> Self {
        self.keep_order = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.options.idempotent = idempotent;
        self
    }

    pub fn failswitch(mut self, failswitch: bool) -> Self {
        self.options.failswitch = failswitch;
        self
    }

    pub fn byref(mut self, byref: bool) -> Self {
        self.options.byref = byref;
        self
    }

    pub fn simple(mut self, simple: bool) -> Self {
        self.options.simple = simple;
        self
    }

    pub fn oneway(mut self, oneway: bool) -> Self {
        self.options.oneway = oneway;
        self
    }

    pub fn mode(mut self, mode: ResultMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Options for the default socket transport.
    pub fn socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn invoke_handler(mut self, handler: impl InvokeHandler<ClientContext>) -> Self {
        self.invoke_handlers.push(Arc::new(handler));
        self
    }

    pub fn before_filter_handler(mut self, handler: impl FilterHandler<ClientContext>) -> Self {
        self.before_filter_handlers.push(Arc::new(handler));
        self
    }

    pub fn after_filter_handler(mut self, handler: impl FilterHandler<ClientContext>) -> Self {
        self.after_filter_handlers.push(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn on_failswitch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Endpoints) + Send + Sync + 'static,
    {
        self.on_failswitch = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Client> {
        if self.options.uris.is_empty() {
            return Err(Error::Config("at least one endpoint uri is required".into()));
        }
        let uris = self.options.uris.clone();
        let endpoints = if self.keep_order {
            Endpoints::ordered(uris)
        } else {
            Endpoints::new(uris)
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SocketTransport::new(self.socket)),
        };
        Ok(Client {
            inner: Arc::new(ClientInner {
                options: self.options,
                endpoints,
                transport,
                filters: self.filters,
                invoke_handlers: self.invoke_handlers,
                before_filter_handlers: self.before_filter_handlers,
                after_filter_handlers: self.after_filter_handlers,
                on_error: self.on_error,
                on_failswitch: self.on_failswitch,
            }),
        })
    }
}
