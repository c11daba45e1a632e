use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Leaky bucket: each admitted request adds one unit, one unit drains per `period`.
#[derive(Debug, Clone, Copy)]
pub struct Bucket {
    level: u32,
    last_drain: Instant,
}

impl Bucket {
    pub fn new(now: Instant) -> Self {
        Self {
            level: 0,
            last_drain: now,
        }
    }

    fn drain(&mut self, period: Duration, now: Instant) {
        let period_ms = period.as_millis().max(1);
        let elapsed = now.saturating_duration_since(self.last_drain).as_millis();
        let drained = elapsed / period_ms;
        if drained == 0 {
            return;
        }

        self.level = self.level.saturating_sub(drained.min(u32::MAX as u128) as u32);
        self.last_drain += Duration::from_millis((drained * period_ms).min(u64::MAX as u128) as u64);
    }

    /// Admits one request unless `burst` requests are already pending.
    pub fn admit(&mut self, burst: u32, period: Duration, now: Instant) -> bool {
        self.drain(period, now);
        if self.level < burst {
            self.level += 1;
            true
        } else {
            false
        }
    }

    fn is_empty(&self) -> bool {
        self.level == 0
    }
}

/// One bucket per source address plus bookkeeping to keep the table bounded.
#[derive(Debug)]
pub struct RateLimiter {
    burst: u32,
    period: Duration,
    max_tracked: usize,
    buckets: HashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new(burst: u32, period: Duration, max_tracked: usize) -> Self {
        Self {
            burst,
            period,
            max_tracked,
            buckets: HashMap::new(),
        }
    }

    pub fn admit(&mut self, ip: IpAddr, now: Instant) -> bool {
        if !self.buckets.contains_key(&ip) && self.buckets.len() >= self.max_tracked {
            self.prune(now);
            if self.buckets.len() >= self.max_tracked {
                return false;
            }
        }

        self.buckets
            .entry(ip)
            .or_insert_with(|| Bucket::new(now))
            .admit(self.burst, self.period, now)
    }

    fn prune(&mut self, now: Instant) {
        let period = self.period;
        self.buckets.retain(|_, bucket| {
            bucket.drain(period, now);
            !bucket.is_empty()
        });
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
