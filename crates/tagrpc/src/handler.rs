//! # Handler Chains
//!
//! Middleware wraps a stage of the pipeline in onion layers. Each handler
//! receives the call and a [`NextInvoke`] / [`NextFilter`] for the rest of
//! the chain; it may call it once, several times, or not at all.
//!
//! ## Invariants
//! - **Registration Order**: the first handler registered is the outermost
//!   layer, so it sees the call first and the result last.
//! - **Shared Context**: every layer gets the same `&mut` context, so
//!   changes made on the way in are visible on the way out.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tagpack::Value;

use crate::error::Result;

/// A method name with its arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<Value>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A call's result, with the arguments echoed back when requested.
#[derive(Debug, Clone)]
pub struct Reply {
    pub result: Value,
    pub args: Option<Vec<Value>>,
}

impl Reply {
    pub fn new(result: Value) -> Self {
        Self { result, args: None }
    }

    pub fn with_args(result: Value, args: Vec<Value>) -> Self {
        Self {
            result,
            args: Some(args),
        }
    }
}

/// Middleware around the encode/decode stage of a call.
#[async_trait]
pub trait InvokeHandler<C: Send + 'static>: Send + Sync + 'static {
    async fn invoke(&self, call: Invocation, ctx: &mut C, next: NextInvoke<'_, C>) -> Result<Reply>;
}

/// Middleware around the encoded request bytes.
#[async_trait]
pub trait FilterHandler<C: Send + 'static>: Send + Sync + 'static {
    async fn filter(&self, request: Vec<u8>, ctx: &mut C, next: NextFilter<'_, C>) -> Result<Vec<u8>>;
}

/// The stage an invoke chain wraps.
#[async_trait]
pub(crate) trait InvokeStage<C: Send + 'static>: Send + Sync {
    async fn invoke(&self, call: Invocation, ctx: &mut C) -> Result<Reply>;
}

/// The stage a filter chain wraps.
#[async_trait]
pub(crate) trait FilterStage<C: Send + 'static>: Send + Sync {
    async fn filter(&self, request: Vec<u8>, ctx: &mut C) -> Result<Vec<u8>>;
}

/// The remainder of an invoke chain.
pub struct NextInvoke<'a, C: Send + 'static> {
    handlers: &'a [Arc<dyn InvokeHandler<C>>],
    stage: &'a dyn InvokeStage<C>,
}

impl<C: Send + 'static> Clone for NextInvoke<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Send + 'static> Copy for NextInvoke<'_, C> {}

impl<'a, C: Send + 'static> NextInvoke<'a, C> {
    pub(crate) fn new(handlers: &'a [Arc<dyn InvokeHandler<C>>], stage: &'a dyn InvokeStage<C>) -> Self {
        Self { handlers, stage }
    }

    /// Runs the rest of the chain.
    pub fn invoke<'b>(self, call: Invocation, ctx: &'b mut C) -> BoxFuture<'b, Result<Reply>>
    where
        'a: 'b,
    {
        match self.handlers.split_first() {
            Some((first, rest)) => first.invoke(call, ctx, NextInvoke::new(rest, self.stage)),
            None => self.stage.invoke(call, ctx),
        }
    }
}

/// The remainder of a filter chain.
pub struct NextFilter<'a, C: Send + 'static> {
    handlers: &'a [Arc<dyn FilterHandler<C>>],
    stage: &'a dyn FilterStage<C>,
}

impl<C: Send + 'static> Clone for NextFilter<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Send + 'static> Copy for NextFilter<'_, C> {}

impl<'a, C: Send + 'static> NextFilter<'a, C> {
    pub(crate) fn new(handlers: &'a [Arc<dyn FilterHandler<C>>], stage: &'a dyn FilterStage<C>) -> Self {
        Self { handlers, stage }
    }

    /// Runs the rest of the chain.
    pub fn filter<'b>(self, request: Vec<u8>, ctx: &'b mut C) -> BoxFuture<'b, Result<Vec<u8>>>
    where
        'a: 'b,
    {
        match self.handlers.split_first() {
            Some((first, rest)) => first.filter(request, ctx, NextFilter::new(rest, self.stage)),
            None => self.stage.filter(request, ctx),
        }
    }
}
