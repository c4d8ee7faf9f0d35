//! # Endpoint List
//!
//! The configured URIs are shuffled once, so a fleet of clients started
//! in the same order does not pile onto the first server. Failover walks
//! forward through that fixed order and wraps; every wrap is a fail round.

use std::sync::Mutex;
use std::sync::PoisonError;

use rand::seq::SliceRandom;

#[derive(Debug, Default)]
struct Cursor {
    index: usize,
    fail_round: usize,
}

#[derive(Debug)]
pub struct Endpoints {
    uris: Vec<String>,
    cursor: Mutex<Cursor>,
}

impl Endpoints {
    /// Shuffles `uris` and starts at the first.
    pub fn new(uris: Vec<String>) -> Self {
        let mut uris = uris;
        uris.shuffle(&mut rand::thread_rng());
        Self::ordered(uris)
    }

    /// Keeps `uris` in the given order.
    pub fn ordered(uris: Vec<String>) -> Self {
        Self {
            uris,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    pub fn index(&self) -> usize {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).index
    }

    pub fn fail_round(&self) -> usize {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).fail_round
    }

    pub fn current(&self) -> Option<&str> {
        self.uris.get(self.index()).map(String::as_str)
    }

    /// Moves to the next endpoint and returns it. Wrapping to the start, or
    /// having only one endpoint, counts a fail round.
    pub fn failswitch(&self) -> Option<&str> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let n = self.uris.len();
        if n > 1 && cursor.index < n - 1 {
            cursor.index += 1;
        } else {
            cursor.index = 0;
            cursor.fail_round += 1;
        }
        tracing::debug!(index = cursor.index, fail_round = cursor.fail_round, "failswitch");
        self.uris.get(cursor.index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failswitch_walks_forward_and_wraps() {
        let endpoints = Endpoints::ordered(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(endpoints.current(), Some("a"));
        assert_eq!(endpoints.failswitch(), Some("b"));
        assert_eq!(endpoints.failswitch(), Some("c"));
        assert_eq!(endpoints.fail_round(), 0);
        assert_eq!(endpoints.failswitch(), Some("a"));
        assert_eq!(endpoints.fail_round(), 1);
    }

    #[test]
    fn single_endpoint_counts_rounds() {
        let endpoints = Endpoints::ordered(vec!["only".into()]);
        assert_eq!(endpoints.failswitch(), Some("only"));
        assert_eq!(endpoints.failswitch(), Some("only"));
        assert_eq!(endpoints.fail_round(), 2);
    }

    #[test]
    fn shuffle_keeps_every_uri() {
        let uris: Vec<String> = (0..16).map(|i| format!("tcp://10.0.0.{}:4321", i)).collect();
        let endpoints = Endpoints::new(uris.clone());
        let mut shuffled = endpoints.uris().to_vec();
        shuffled.sort();
        let mut expected = uris;
        expected.sort();
        assert_eq!(shuffled, expected);
        assert!(Endpoints::new(Vec::new()).current().is_none());
    }
}
