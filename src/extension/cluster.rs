//! Load-balance capability
//!
//! Only the default strategy ships here; others plug in through the
//! extension registry under their own scheme.

use rand::Rng;
use std::sync::Arc;

use super::protocol::{Invocation, Invoker};

/// Parameter carrying a provider's relative weight
pub const WEIGHT_KEY: &str = "weight";
pub const DEFAULT_WEIGHT: u64 = 100;
/// Weights above this are clamped
pub const MAX_WEIGHT: u64 = u32::MAX as u64;

pub const RANDOM_SCHEME: &str = "random";

/// Picks one provider out of the current candidates
pub trait LoadBalance: Send + Sync {
    /// `None` only when `invokers` is empty
    fn select(&self, invokers: &[Arc<dyn Invoker>], invocation: &Invocation) -> Option<Arc<dyn Invoker>>;
}

fn weight_of(invoker: &Arc<dyn Invoker>) -> u64 {
    invoker
        .descriptor()
        .param_u64(WEIGHT_KEY)
        .unwrap_or(DEFAULT_WEIGHT)
        .min(MAX_WEIGHT)
}

/// Weighted random choice; uniform when every provider has the same weight
#[derive(Debug, Default)]
pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn select(&self, invokers: &[Arc<dyn Invoker>], _invocation: &Invocation) -> Option<Arc<dyn Invoker>> {
        match invokers {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let weights: Vec<u64> = invokers.iter().map(weight_of).collect();
                let total = weights.iter().fold(0u64, |sum, w| sum.saturating_add(*w));
                let uniform = weights.windows(2).all(|w| w[0] == w[1]);
                let mut rng = rand::rng();

                if total == 0 || uniform {
                    return Some(invokers[rng.random_range(0..invokers.len())].clone());
                }

                let mut offset = rng.random_range(0..total);
                for (invoker, weight) in invokers.iter().zip(&weights) {
                    if offset < *weight {
                        return Some(invoker.clone());
                    }
                    offset -= weight;
                }
                invokers.last().cloned()
            }
        }
    }
}
