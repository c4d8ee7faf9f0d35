//! Per-call state threaded through handler chains.

use std::collections::HashMap;
use std::time::Duration;

use tagpack::Value;

use crate::settings::ClientOptions;
use crate::settings::InvokeSettings;
use crate::settings::MethodOptions;
use crate::settings::ResultMode;

/// Scratch space handlers use to pass values down or up the chain.
#[derive(Debug, Clone, Default)]
pub struct UserData {
    entries: HashMap<String, Value>,
}

impl UserData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }
}

/// Settings in force for one client call, plus its retry count.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub timeout: Duration,
    pub retry: usize,
    pub idempotent: bool,
    pub failswitch: bool,
    pub byref: bool,
    pub simple: bool,
    pub oneway: bool,
    pub mode: ResultMode,
    /// Retries spent so far.
    pub retried: usize,
    /// Endpoint of the most recent attempt.
    pub uri: String,
    pub data: UserData,
}

impl ClientContext {
    pub fn new(options: &ClientOptions, settings: &InvokeSettings) -> Self {
        Self {
            timeout: settings.timeout.unwrap_or(options.timeout),
            retry: settings.retry.unwrap_or(options.retry),
            idempotent: settings.idempotent.unwrap_or(options.idempotent),
            failswitch: settings.failswitch.unwrap_or(options.failswitch),
            byref: settings.byref.unwrap_or(options.byref),
            simple: settings.simple.unwrap_or(options.simple),
            oneway: settings.oneway.unwrap_or(options.oneway),
            mode: settings.mode.unwrap_or(options.mode),
            retried: 0,
            uri: String::new(),
            data: UserData::default(),
        }
    }
}

/// State for one call a service is handling.
#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    /// Name as the caller sent it.
    pub method: String,
    pub options: MethodOptions,
    /// The caller asked for arguments back.
    pub byref: bool,
    /// Dispatched to the missing-method fallback.
    pub missing_method: bool,
    pub data: UserData,
}
