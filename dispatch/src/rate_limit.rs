// Per-client sliding window admission control.
//
// Each client owns a queue of admission timestamps behind its own lock, so clients never
// block each other. Queues live in a bounded cache: a client idle for a whole window has
// nothing left to remember and is evicted, and the total number of tracked clients is
// capped to bound memory under address churn.
use crate::config::RateLimitConfig;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Timestamps = Arc<Mutex<VecDeque<Instant>>>;

pub struct RateLimiter {
    clients: Cache<String, Timestamps>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let clients = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_idle(config.window())
            .build();

        RateLimiter {
            clients,
            window: config.window(),
            max_requests: config.max_requests,
        }
    }

    /// Records a request from `client_id` if it fits in the window.
    ///
    /// Rejected requests are not recorded.
    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    /// Whether [`RateLimiter::admit`] would currently succeed. Records nothing.
    pub fn would_admit(&self, client_id: &str) -> bool {
        self.would_admit_at(client_id, Instant::now())
    }

    fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        let timestamps = self
            .clients
            .get_with_by_ref(client_id, || Arc::new(Mutex::new(VecDeque::new())));
        let mut timestamps = timestamps.lock();

        self.prune(&mut timestamps, now);
        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    fn would_admit_at(&self, client_id: &str, now: Instant) -> bool {
        match self.clients.get(client_id) {
            Some(timestamps) => {
                let mut timestamps = timestamps.lock();
                self.prune(&mut timestamps, now);
                timestamps.len() < self.max_requests
            }
            None => true,
        }
    }

    // Drops every timestamp at or before the start of the window ending at `now`.
    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        let Some(window_start) = now.checked_sub(self.window) else {
            return;
        };
        while timestamps.front().is_some_and(|t| *t <= window_start) {
            timestamps.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window_secs: u64, max_requests: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window_secs,
            max_requests,
            max_clients: 1000,
        })
    }

    #[test]
    fn test_admits_up_to_threshold() {
        let limiter = limiter(900, 100);
        let now = Instant::now();

        for _ in 0..100 {
            assert!(limiter.admit_at("10.0.0.1", now));
        }
        assert!(!limiter.admit_at("10.0.0.1", now));
        assert!(!limiter.would_admit_at("10.0.0.1", now));

        // Other clients are unaffected
        assert!(limiter.would_admit_at("10.0.0.2", now));
        assert!(limiter.admit_at("10.0.0.2", now));
    }

    #[test]
    fn test_rejections_do_not_count() {
        let limiter = limiter(900, 100);
        let start = Instant::now();

        for i in 0..100 {
            assert!(limiter.admit_at("client", start + Duration::from_secs(i)));
        }
        // Hammer the limiter while over quota
        for i in 0..500 {
            assert!(!limiter.admit_at("client", start + Duration::from_secs(100 + i % 100)));
        }

        // Once the first admission leaves the window exactly one slot frees up
        let later = start + Duration::from_secs(900);
        assert!(limiter.admit_at("client", later));
        assert!(!limiter.admit_at("client", later));

        // And one more each time another original admission expires
        let later = start + Duration::from_secs(901);
        assert!(limiter.admit_at("client", later));
        assert!(!limiter.admit_at("client", later));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(60, 2);
        let start = Instant::now();

        assert!(limiter.admit_at("client", start));
        assert!(limiter.admit_at("client", start + Duration::from_secs(30)));
        assert!(!limiter.admit_at("client", start + Duration::from_secs(59)));

        // A timestamp exactly one window old is outside the window
        assert!(limiter.would_admit_at("client", start + Duration::from_secs(60)));
        assert!(limiter.admit_at("client", start + Duration::from_secs(60)));
        assert!(!limiter.admit_at("client", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_would_admit_records_nothing() {
        let limiter = limiter(900, 1);
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.would_admit_at("client", now));
        }
        assert!(limiter.admit_at("client", now));
        assert!(!limiter.would_admit_at("client", now));
    }

    #[test]
    fn test_concurrent_admission() {
        let limiter = Arc::new(limiter(900, 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.admit("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
