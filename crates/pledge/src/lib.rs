//! # Pledge
//!
//! One-shot promises for gluing asynchronous results together.
//!
//! A [`Promise`] is settled once, by whoever gets there first, and fans its
//! outcome out to continuations registered with `then`, `catch` and
//! friends. Each continuation runs as its own tokio task and yields a new
//! promise, so chains compose without growing the stack. Promises are also
//! plain futures and can be awaited.

pub mod combinators;
pub mod error;
pub mod promise;
mod scheduler;

pub use combinators::all;
pub use combinators::any;
pub use combinators::race;

pub use error::Error;
pub use error::Result;

pub use promise::IntoResolution;
pub use promise::Promise;
pub use promise::Resolution;
pub use promise::State;
