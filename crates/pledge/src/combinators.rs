//! Combinators over several promises: `all`, `race` and `any`.
//!
//! Inputs are never cancelled. Once a combined promise settles, the
//! remaining inputs keep running and their outcomes are dropped.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::error::Error;
use crate::promise::Promise;

/// Fulfills with every value, in input order, or rejects with the first
/// rejection. No inputs fulfill immediately with an empty vector.
pub fn all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolved(Vec::new());
    }

    struct Gather<T> {
        values: Vec<Option<T>>,
        remaining: usize,
    }

    let result = Promise::new();
    let gather = Arc::new(Mutex::new(Gather {
        values: (0..promises.len()).map(|_| None).collect(),
        remaining: promises.len(),
    }));

    for (index, promise) in promises.iter().enumerate() {
        let result = result.clone();
        let gather = gather.clone();
        promise.subscribe(Box::new(move |outcome| {
            match outcome {
                Ok(value) => {
                    let mut gather = gather.lock().unwrap_or_else(PoisonError::into_inner);
                    gather.values[index] = Some(value);
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        let values = gather.values.iter_mut().filter_map(Option::take).collect();
                        drop(gather);
                        result.fulfill(values);
                    }
                }
                Err(reason) => {
                    result.reject(reason);
                }
            }
        }));
    }
    result
}

/// Settles like whichever input settles first.
pub fn race<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let result = Promise::new();
    for promise in promises {
        promise.fill(&result);
    }
    result
}

/// Fulfills with the first fulfilled input. Rejects with every reason, in
/// input order, only once all inputs have rejected. No inputs reject
/// immediately with `EmptyIterable`.
pub fn any<T, I>(promises: I) -> Promise<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::rejected(Error::EmptyIterable);
    }

    struct Failures {
        reasons: Vec<Option<Error>>,
        remaining: usize,
    }

    let result = Promise::new();
    let failures = Arc::new(Mutex::new(Failures {
        reasons: (0..promises.len()).map(|_| None).collect(),
        remaining: promises.len(),
    }));

    for (index, promise) in promises.iter().enumerate() {
        let result = result.clone();
        let failures = failures.clone();
        promise.subscribe(Box::new(move |outcome| {
            match outcome {
                Ok(value) => {
                    result.fulfill(value);
                }
                Err(reason) => {
                    let mut failures = failures.lock().unwrap_or_else(PoisonError::into_inner);
                    failures.reasons[index] = Some(reason);
                    failures.remaining -= 1;
                    if failures.remaining == 0 {
                        let reasons = failures.reasons.iter_mut().filter_map(Option::take).collect();
                        drop(failures);
                        result.reject(Error::AllRejected(reasons));
                    }
                }
            }
        }));
    }
    result
}
