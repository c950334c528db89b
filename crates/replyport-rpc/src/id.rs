use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::IdStrategy;

/// Prefix of randomly drawn correlation ids.
pub const RANDOM_ID_PREFIX: &str = "promise::";

const RANDOM_TOKEN_LEN: usize = 8;

/// Mints candidate correlation ids. Uniqueness against live calls is
/// enforced by the registry, which re-draws on collision.
#[derive(Debug)]
pub(crate) struct IdGenerator {
    strategy: IdStrategy,
    counter: AtomicU64,
}

impl IdGenerator {
    pub(crate) fn new(strategy: IdStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_id(&self) -> String {
        match self.strategy {
            IdStrategy::Counter => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
                n.to_string()
            }
            IdStrategy::Random => format!("{RANDOM_ID_PREFIX}{}", random_token(RANDOM_TOKEN_LEN)),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
