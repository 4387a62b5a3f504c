//! Weighted round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Server, LoadBalancer};

/// Weighted round-robin selector.
///
/// A shared cursor advances by one per pick and is mapped onto the
/// cumulative weights of the eligible servers, so over `total weight`
/// consecutive picks each server is chosen exactly `weight` times.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    cursor: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        let total: usize = servers.iter().map(|s| s.weight() as usize).sum();
        if total == 0 {
            return None;
        }

        let mut point = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
        for server in servers {
            let weight = server.weight() as usize;
            if point < weight {
                return Some(server.clone());
            }
            point -= weight;
        }
        // A concurrent weight update shrank the total; fall back to the first server.
        servers.iter().find(|s| s.weight() > 0).cloned()
    }
}
