use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rotating pool of outbound proxy endpoints with health tracking.
///
/// Endpoints rotate round-robin. A proxy that fails
/// `failure_threshold` times in a row is excluded for `cooldown`, then
/// reinstated with a clean slate. The pool is safe for concurrent
/// acquire/report calls.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    failure_threshold: u32,
    cooldown: Duration,
}

struct PoolInner {
    proxies: Vec<ProxyState>,
    cursor: usize,
}

struct ProxyState {
    url: String,
    consecutive_failures: u32,
    cooling_until: Option<Instant>,
}

impl ProxyPool {
    pub fn new(urls: Vec<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        ProxyPool {
            inner: Mutex::new(PoolInner {
                proxies: urls
                    .into_iter()
                    .map(|url| ProxyState {
                        url,
                        consecutive_failures: 0,
                        cooling_until: None,
                    })
                    .collect(),
                cursor: 0,
            }),
            failure_threshold,
            cooldown,
        }
    }

    /// Next healthy proxy in rotation, skipping `avoid` (the proxy used for
    /// the previous attempt on the same item) when another healthy endpoint
    /// exists. Returns None when every proxy is cooling down.
    pub fn acquire(&self, avoid: Option<&str>) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let total = inner.proxies.len();
        if total == 0 {
            return None;
        }

        let mut fallback: Option<usize> = None;
        for offset in 0..total {
            let index = (inner.cursor + offset) % total;
            if !inner.proxies[index].is_healthy(now) {
                continue;
            }
            if avoid == Some(inner.proxies[index].url.as_str()) {
                fallback.get_or_insert(index);
                continue;
            }
            inner.cursor = (index + 1) % total;
            inner.proxies[index].reinstate_if_cooled(now);
            return Some(inner.proxies[index].url.clone());
        }

        // Only the avoided proxy is healthy; reuse it rather than stall.
        fallback.map(|index| {
            inner.cursor = (index + 1) % total;
            inner.proxies[index].reinstate_if_cooled(now);
            inner.proxies[index].url.clone()
        })
    }

    pub fn report_success(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(proxy) = inner.proxies.iter_mut().find(|p| p.url == url) {
            proxy.consecutive_failures = 0;
            proxy.cooling_until = None;
        }
    }

    pub fn report_failure(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(proxy) = inner.proxies.iter_mut().find(|p| p.url == url) {
            proxy.consecutive_failures += 1;
            if proxy.consecutive_failures >= self.failure_threshold {
                proxy.cooling_until = Some(Instant::now() + self.cooldown);
            }
        }
    }
}

impl ProxyState {
    fn is_healthy(&self, now: Instant) -> bool {
        match self.cooling_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    fn reinstate_if_cooled(&mut self, now: Instant) {
        if matches!(self.cooling_until, Some(until) if now >= until) {
            self.cooling_until = None;
            self.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(urls: &[&str], threshold: u32, cooldown: Duration) -> ProxyPool {
        ProxyPool::new(
            urls.iter().map(|u| u.to_string()).collect(),
            threshold,
            cooldown,
        )
    }

    #[test]
    fn rotates_round_robin() {
        let pool = pool(&["a", "b", "c"], 3, Duration::from_secs(60));
        assert_eq!(pool.acquire(None).as_deref(), Some("a"));
        assert_eq!(pool.acquire(None).as_deref(), Some("b"));
        assert_eq!(pool.acquire(None).as_deref(), Some("c"));
        assert_eq!(pool.acquire(None).as_deref(), Some("a"));
    }

    #[test]
    fn avoids_previous_proxy_when_alternative_exists() {
        let pool = pool(&["a", "b"], 3, Duration::from_secs(60));
        let first = pool.acquire(None).unwrap();
        let second = pool.acquire(Some(&first)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn reuses_sole_healthy_proxy_when_no_alternative() {
        let pool = pool(&["a"], 3, Duration::from_secs(60));
        let first = pool.acquire(None).unwrap();
        assert_eq!(pool.acquire(Some(&first)).as_deref(), Some("a"));
    }

    #[test]
    fn consecutive_failures_trigger_cooldown() {
        let pool = pool(&["a", "b"], 2, Duration::from_secs(60));
        pool.report_failure("a");
        pool.report_failure("a");
        for _ in 0..4 {
            assert_eq!(pool.acquire(None).as_deref(), Some("b"));
        }
    }

    #[test]
    fn success_resets_failure_streak() {
        let pool = pool(&["a", "b"], 2, Duration::from_secs(60));
        pool.report_failure("a");
        pool.report_success("a");
        pool.report_failure("a");
        // Streak was broken, so "a" stays in rotation.
        let mut seen_a = false;
        for _ in 0..4 {
            if pool.acquire(None).as_deref() == Some("a") {
                seen_a = true;
            }
        }
        assert!(seen_a);
    }

    #[test]
    fn cooled_proxy_is_reinstated() {
        let pool = pool(&["a"], 1, Duration::ZERO);
        pool.report_failure("a");
        // Zero cooldown expires immediately; the proxy comes back clean.
        assert_eq!(pool.acquire(None).as_deref(), Some("a"));
        pool.report_failure("a");
        assert_eq!(pool.acquire(None).as_deref(), Some("a"));
    }

    #[test]
    fn returns_none_when_all_proxies_cooling() {
        let pool = pool(&["a", "b"], 1, Duration::from_secs(60));
        pool.report_failure("a");
        pool.report_failure("b");
        assert_eq!(pool.acquire(None), None);
    }
}
