//! # Service Dispatcher
//!
//! Maps method names to Rust functions and turns request bytes into
//! response bytes. Stages, outermost first:
//!
//! 1. before-filter handlers, around
//! 2. input filters (reverse order) / output filters (in order), around
//! 3. after-filter handlers, around
//! 4. request decoding and method lookup, around
//! 5. invoke handlers, around
//! 6. the method itself.
//!
//! ## Invariants
//! - **Always Answers**: every request yields a response. Failures, panics
//!   included, become an error response carrying the message.
//! - **Case Insensitive**: method names are matched ignoring ASCII case;
//!   the function list reports them as registered.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tagpack::Value;
use tagpack::tags;

use crate::context::ServiceContext;
use crate::error::Error;
use crate::error::Result;
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
use crate::protocol::Request;
use crate::protocol::ResultBody;
use crate::settings::MethodOptions;
use crate::settings::ResultMode;

/// A method that may rewrite its arguments for by-reference callers.
pub type SyncMethod = dyn Fn(&mut Vec<Value>, &ServiceContext) -> Result<Value> + Send + Sync;

/// A method that runs as a future. By-reference callers get their
/// arguments back unchanged.
pub type AsyncMethod = dyn Fn(Vec<Value>, ServiceContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

#[derive(Clone)]
enum Handler {
    Sync(Arc<SyncMethod>),
    Async(Arc<AsyncMethod>),
}

impl Handler {
    async fn run(&self, mut args: Vec<Value>, ctx: &ServiceContext) -> Result<(Value, Vec<Value>)> {
        match self {
            Handler::Sync(f) => {
                let result = catch_unwind(AssertUnwindSafe(|| (**f)(&mut args, ctx)))
                    .map_err(Error::from_panic)??;
                Ok((result, args))
            }
            Handler::Async(f) => {
                let future = (**f)(args.clone(), ctx.clone());
                let result = AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .map_err(Error::from_panic)??;
                Ok((result, args))
            }
        }
    }
}

/// A published method.
#[derive(Clone)]
pub struct Method {
    name: String,
    handler: Handler,
    options: MethodOptions,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &MethodOptions {
        &self.options
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

/// Name published for the missing-method fallback.
pub const MISSING_METHOD: &str = "*";

#[derive(Default)]
pub struct Service {
    methods: HashMap<String, Method>,
    /// Published names in registration order.
    names: Vec<String>,
    missing: Option<Method>,
    filters: FilterChain,
    invoke_handlers: Vec<Arc<dyn InvokeHandler<ServiceContext>>>,
    before_filter_handlers: Vec<Arc<dyn FilterHandler<ServiceContext>>>,
    after_filter_handlers: Vec<Arc<dyn FilterHandler<ServiceContext>>>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    //  REGISTRATION
    // ========================================================================

    fn add_method(&mut self, name: &str, handler: Handler, options: MethodOptions) -> &mut Self {
        let name = match &options.namespace {
            Some(ns) => format!("{}_{}", ns, name),
            None => name.to_string(),
        };
        let key = name.to_ascii_lowercase();
        self.names.retain(|existing| existing.to_ascii_lowercase() != key);
        self.names.push(name.clone());
        tracing::debug!(method = %name, "published");
        self.methods.insert(key, Method { name, handler, options });
        self
    }

    pub fn add_function<F>(&mut self, name: &str, f: F, options: MethodOptions) -> &mut Self
    where
        F: Fn(&mut Vec<Value>, &ServiceContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.add_method(name, Handler::Sync(Arc::new(f)), options)
    }

    pub fn add_async_function<F, Fut>(&mut self, name: &str, f: F, options: MethodOptions) -> &mut Self
    where
        F: Fn(Vec<Value>, ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Arc<AsyncMethod> = Arc::new(move |args, ctx| f(args, ctx).boxed());
        self.add_method(name, Handler::Async(handler), options)
    }

    /// Handles calls to names nothing else matches. The requested name is
    /// in `ServiceContext::method`.
    pub fn add_missing_method<F>(&mut self, f: F, options: MethodOptions) -> &mut Self
    where
        F: Fn(&mut Vec<Value>, &ServiceContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.missing = Some(Method {
            name: MISSING_METHOD.to_string(),
            handler: Handler::Sync(Arc::new(f)),
            options,
        });
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Method> {
        let key = name.to_ascii_lowercase();
        self.names.retain(|existing| existing.to_ascii_lowercase() != key);
        self.methods.remove(&key)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    /// Published names, plus `*` when a missing-method fallback is set.
    pub fn function_names(&self) -> Vec<String> {
        let mut names = self.names.clone();
        if self.missing.is_some() {
            names.push(MISSING_METHOD.to_string());
        }
        names
    }

    pub fn add_filter(&mut self, filter: impl Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn add_invoke_handler(&mut self, handler: impl InvokeHandler<ServiceContext>) -> &mut Self {
        self.invoke_handlers.push(Arc::new(handler));
        self
    }

    pub fn add_before_filter_handler(&mut self, handler: impl FilterHandler<ServiceContext>) -> &mut Self {
        self.before_filter_handlers.push(Arc::new(handler));
        self
    }

    pub fn add_after_filter_handler(&mut self, handler: impl FilterHandler<ServiceContext>) -> &mut Self {
        self.after_filter_handlers.push(Arc::new(handler));
        self
    }

    // ========================================================================
    //  HANDLING
    // ========================================================================

    /// Answers one request.
    pub async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
        let mut ctx = ServiceContext::default();
        self.handle_with(request, &mut ctx).await
    }

    pub async fn handle_with(&self, request: Vec<u8>, ctx: &mut ServiceContext) -> Vec<u8> {
        let stage = Unfilter { service: self };
        let chain = NextFilter::new(&self.before_filter_handlers, &stage).filter(request, ctx);
        match AssertUnwindSafe(chain).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => self.error_response(&e),
            Err(payload) => self.error_response(&Error::from_panic(payload)),
        }
    }

    fn error_response(&self, error: &Error) -> Vec<u8> {
        tracing::warn!(%error, "request failed");
        let response = protocol::encode_error(&error.to_string());
        match self.filters.output(response.clone()) {
            Ok(filtered) => filtered,
            Err(e) => {
                tracing::warn!(error = %e, "output filter failed on error response");
                response
            }
        }
    }

    async fn dispatch(&self, request: &[u8], ctx: &mut ServiceContext) -> Result<Vec<u8>> {
        let call = match protocol::decode_request(request)? {
            Request::Functions => return protocol::encode_functions(&self.function_names()),
            Request::Call(call) => call,
        };
        let key = call.name.to_ascii_lowercase();
        let method = match self.methods.get(&key) {
            Some(method) => method,
            None => self
                .missing
                .as_ref()
                .ok_or_else(|| Error::MethodNotFound(call.name.clone()))?,
        };
        ctx.method = call.name.clone();
        ctx.options = method.options.clone();
        ctx.byref = call.byref;
        ctx.missing_method = !self.methods.contains_key(&key);

        let stage = RunMethod { method };
        let invocation = Invocation::new(call.name, call.args);
        let reply = NextInvoke::new(&self.invoke_handlers, &stage)
            .invoke(invocation, ctx)
            .await?;
        encode_reply(&reply, ctx)
    }
}

fn raw_result<'v>(value: &'v Value, ctx: &ServiceContext) -> Result<&'v [u8]> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        other => Err(Error::Config(format!(
            "{} must return bytes in {:?} mode, got {}",
            ctx.method,
            ctx.options.mode,
            other.kind()
        ))),
    }
}

fn encode_reply(reply: &Reply, ctx: &ServiceContext) -> Result<Vec<u8>> {
    let simple = ctx.options.simple;
    if ctx.options.oneway {
        return protocol::encode_result(ResultBody::Value(&Value::Null), None, simple);
    }
    let args = match &reply.args {
        Some(args) if ctx.byref && ctx.options.byref => Some(args.as_slice()),
        _ => None,
    };
    match ctx.options.mode {
        ResultMode::Normal => protocol::encode_result(ResultBody::Value(&reply.result), args, simple),
        ResultMode::Serialized => {
            let encoded = raw_result(&reply.result, ctx)?;
            protocol::encode_result(ResultBody::Encoded(encoded), args, simple)
        }
        ResultMode::Raw => {
            let mut response = raw_result(&reply.result, ctx)?.to_vec();
            response.push(tags::END);
            Ok(response)
        }
        ResultMode::RawWithEndTag => Ok(raw_result(&reply.result, ctx)?.to_vec()),
    }
}

/// Input filters, the after-filter chain, then output filters.
struct Unfilter<'s> {
    service: &'s Service,
}

#[async_trait]
impl<'s> FilterStage<ServiceContext> for Unfilter<'s> {
    async fn filter(&self, request: Vec<u8>, ctx: &mut ServiceContext) -> Result<Vec<u8>> {
        let service = self.service;
        let request = service.filters.input(request)?;
        let stage = Dispatch { service };
        let response = NextFilter::new(&service.after_filter_handlers, &stage)
            .filter(request, ctx)
            .await?;
        service.filters.output(response)
    }
}

/// Decoding, dispatch and encoding. Method failures become error responses
/// here, so the filter stages see them as ordinary bytes.
struct Dispatch<'s> {
    service: &'s Service,
}

#[async_trait]
impl<'s> FilterStage<ServiceContext> for Dispatch<'s> {
    async fn filter(&self, request: Vec<u8>, ctx: &mut ServiceContext) -> Result<Vec<u8>> {
        match self.service.dispatch(&request, ctx).await {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::warn!(method = %ctx.method, %error, "call failed");
                Ok(protocol::encode_error(&error.to_string()))
            }
        }
    }
}

struct RunMethod<'m> {
    method: &'m Method,
}

#[async_trait]
impl<'m> InvokeStage<ServiceContext> for RunMethod<'m> {
    async fn invoke(&self, call: Invocation, ctx: &mut ServiceContext) -> Result<Reply> {
        if ctx.options.oneway {
            let handler = self.method.handler.clone();
            let detached = ctx.clone();
            tokio::spawn(async move {
                if let Err(error) = handler.run(call.args, &detached).await {
                    tracing::warn!(method = %detached.method, %error, "oneway method failed");
                }
            });
            return Ok(Reply::new(Value::Null));
        }
        let (result, args) = self.method.handler.run(call.args, ctx).await?;
        Ok(Reply::with_args(result, args))
    }
}
