//! Rolling request statistics for the circuit breaker.
//!
//! The window is a ring of fixed-width buckets. Recording or reading
//! advances the ring first, so expired buckets never leak into a snapshot.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Upper bounds (ms) of the latency histogram; the last slot is unbounded.
const LATENCY_BOUNDS_MS: [f64; 14] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];
const LATENCY_SLOTS: usize = LATENCY_BOUNDS_MS.len() + 1;

/// What happened to one forwarded request.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub status: u16,
    pub network_error: bool,
    pub latency: Duration,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    requests: u64,
    network_errors: u64,
    statuses: BTreeMap<u16, u64>,
    latency: [u64; LATENCY_SLOTS],
}

impl Bucket {
    fn record(&mut self, outcome: &Outcome) {
        self.requests += 1;
        if outcome.network_error {
            self.network_errors += 1;
        }
        *self.statuses.entry(outcome.status).or_default() += 1;
        let ms = outcome.latency.as_secs_f64() * 1000.0;
        let slot = LATENCY_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_SLOTS - 1);
        self.latency[slot] += 1;
    }
}

/// Aggregated statistics over the live buckets.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    requests: u64,
    network_errors: u64,
    statuses: BTreeMap<u16, u64>,
    latency: [u64; LATENCY_SLOTS],
}

impl WindowStats {
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Share of requests that failed at the transport level.
    pub fn network_error_ratio(&self) -> f64 {
        ratio(self.network_errors, self.requests)
    }

    /// Responses in `[from, to)` divided by responses in `[div_from, div_to)`.
    pub fn response_code_ratio(&self, from: u16, to: u16, div_from: u16, div_to: u16) -> f64 {
        ratio(self.count_statuses(from, to), self.count_statuses(div_from, div_to))
    }

    /// Upper latency bound (ms) below which `quantile` of requests fall.
    pub fn latency_at_quantile_ms(&self, quantile: f64) -> f64 {
        let total: u64 = self.latency.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let target = (quantile.clamp(0.0, 100.0) / 100.0 * total as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (slot, count) in self.latency.iter().enumerate() {
            seen += count;
            if seen >= target {
                return LATENCY_BOUNDS_MS
                    .get(slot)
                    .copied()
                    .unwrap_or(f64::INFINITY);
            }
        }
        f64::INFINITY
    }

    fn count_statuses(&self, from: u16, to: u16) -> u64 {
        if from >= to {
            return 0;
        }
        self.statuses.range(from..to).map(|(_, count)| count).sum()
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Ring of buckets covering `bucket_width * bucket_count`.
#[derive(Debug)]
pub struct RollingWindow {
    bucket_width: Duration,
    buckets: Vec<Bucket>,
    current: usize,
    current_start: Instant,
}

impl RollingWindow {
    pub fn new(bucket_width: Duration, bucket_count: usize, now: Instant) -> Self {
        Self {
            bucket_width: bucket_width.max(Duration::from_millis(1)),
            buckets: vec![Bucket::default(); bucket_count.max(1)],
            current: 0,
            current_start: now,
        }
    }

    pub fn record_at(&mut self, now: Instant, outcome: Outcome) {
        self.advance(now);
        self.buckets[self.current].record(&outcome);
    }

    pub fn snapshot_at(&mut self, now: Instant) -> WindowStats {
        self.advance(now);
        let mut stats = WindowStats::default();
        for bucket in &self.buckets {
            stats.requests += bucket.requests;
            stats.network_errors += bucket.network_errors;
            for (status, count) in &bucket.statuses {
                *stats.statuses.entry(*status).or_default() += count;
            }
            for (total, count) in stats.latency.iter_mut().zip(bucket.latency.iter()) {
                *total += count;
            }
        }
        stats
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.current_start);
        let steps = (elapsed.as_nanos() / self.bucket_width.as_nanos()) as usize;
        if steps == 0 {
            return;
        }
        if steps >= self.buckets.len() {
            for bucket in &mut self.buckets {
                *bucket = Bucket::default();
            }
            self.current = 0;
        } else {
            for _ in 0..steps {
                self.current = (self.current + 1) % self.buckets.len();
                self.buckets[self.current] = Bucket::default();
            }
        }
        self.current_start += self.bucket_width * steps as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(status: u16, ms: u64) -> Outcome {
        Outcome {
            status,
            network_error: false,
            latency: Duration::from_millis(ms),
        }
    }

    fn failed() -> Outcome {
        Outcome {
            status: 502,
            network_error: true,
            latency: Duration::from_millis(1),
        }
    }

    #[test]
    fn computes_ratios() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(1), 10, start);
        window.record_at(start, ok(200, 3));
        window.record_at(start, ok(500, 3));
        window.record_at(start, ok(503, 3));
        window.record_at(start, failed());

        let stats = window.snapshot_at(start);
        assert_eq!(stats.requests(), 4);
        assert_eq!(stats.network_error_ratio(), 0.25);
        assert_eq!(stats.response_code_ratio(500, 600, 0, 600), 0.75);
        assert_eq!(stats.response_code_ratio(400, 500, 0, 600), 0.0);
    }

    #[test]
    fn empty_window_is_zero() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(1), 10, start);
        let stats = window.snapshot_at(start);
        assert_eq!(stats.network_error_ratio(), 0.0);
        assert_eq!(stats.latency_at_quantile_ms(50.0), 0.0);
    }

    #[test]
    fn latency_quantiles_use_bucket_bounds() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(1), 10, start);
        for _ in 0..9 {
            window.record_at(start, ok(200, 3));
        }
        window.record_at(start, ok(200, 400));

        let stats = window.snapshot_at(start);
        assert_eq!(stats.latency_at_quantile_ms(50.0), 5.0);
        assert_eq!(stats.latency_at_quantile_ms(90.0), 5.0);
        assert_eq!(stats.latency_at_quantile_ms(99.0), 500.0);
    }

    #[test]
    fn old_buckets_expire() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(1), 3, start);
        window.record_at(start, failed());
        window.record_at(start + Duration::from_millis(1500), ok(200, 1));

        assert_eq!(window.snapshot_at(start + Duration::from_millis(2500)).requests(), 2);
        assert_eq!(window.snapshot_at(start + Duration::from_millis(3100)).requests(), 1);
        assert_eq!(window.snapshot_at(start + Duration::from_secs(60)).requests(), 0);
    }
}
