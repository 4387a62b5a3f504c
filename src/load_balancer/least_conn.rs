//! Dynamic round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Server, LoadBalancer};

/// Dynamic round-robin selector.
/// Selects the server with the lowest in-flight requests per unit of weight;
/// ties are broken by a rotating start position so equally loaded servers
/// share traffic.
#[derive(Debug, Default)]
pub struct DynamicRoundRobin {
    rotation: AtomicUsize,
}

impl DynamicRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for DynamicRoundRobin {
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        if servers.is_empty() {
            return None;
        }

        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % servers.len();
        // min_by keeps the first minimum, which is the earliest in rotation order.
        (0..servers.len())
            .map(|offset| &servers[(start + offset) % servers.len()])
            .min_by(|a, b| load(a, b).cmp(&load(b, a)))
            .cloned()
    }
}

/// `(active + 1) / weight` of `server`, scaled by `other`'s weight so two
/// loads compare without division.
fn load(server: &Server, other: &Server) -> u64 {
    (server.active_requests() as u64 + 1) * u64::from(other.weight().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(port: u16) -> Arc<Server> {
        weighted(port, 1)
    }

    fn weighted(port: u16, weight: u32) -> Arc<Server> {
        Arc::new(Server::new(&format!("http://127.0.0.1:{port}"), weight).unwrap())
    }

    #[test]
    fn test_least_loaded() {
        let lb = DynamicRoundRobin::new();
        let b1 = server(8080);
        let b2 = server(8081);
        let servers = vec![b1.clone(), b2.clone()];

        // artificially load b1
        let _g1 = b1.track();

        // Should pick b2 (0 in flight)
        let s1 = lb.next_server(&servers).unwrap();
        assert_eq!(s1.key(), b2.key());

        let _g2 = b2.track();
        let _g3 = b2.track(); // now b2 has 2, b1 has 1

        let s2 = lb.next_server(&servers).unwrap();
        assert_eq!(s2.key(), b1.key());
    }

    #[test]
    fn rotates_on_ties() {
        let lb = DynamicRoundRobin::new();
        let servers = vec![server(8080), server(8081), server(8082)];

        let picks: Vec<String> = (0..3)
            .map(|_| lb.next_server(&servers).unwrap().key().to_string())
            .collect();
        assert_eq!(
            picks,
            servers.iter().map(|s| s.key().to_string()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn heavier_servers_absorb_more_in_flight_requests() {
        let lb = DynamicRoundRobin::new();
        let heavy = weighted(8080, 3);
        let light = weighted(8081, 1);
        let servers = vec![heavy.clone(), light.clone()];

        // heavy: 3 per 3 weight, light: 2 per 1 weight.
        let _h = [heavy.track(), heavy.track()];
        let _l = light.track();
        assert_eq!(lb.next_server(&servers).unwrap().key(), heavy.key());
        assert_eq!(lb.next_server(&servers).unwrap().key(), heavy.key());

        let _more = [heavy.track(), heavy.track(), heavy.track(), heavy.track()];
        // heavy: 7 per 3 weight, light still 2.
        assert_eq!(lb.next_server(&servers).unwrap().key(), light.key());
    }
}
