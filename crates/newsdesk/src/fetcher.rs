//! HTTP client shared by the RSS crawler and the web scraper: per-host
//! token-bucket rate limiting, a TTL'd robots.txt cache, retry/backoff, and
//! an optional round-robin proxy pool with failure-based circuit breaking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use newsdesk_core::errors::{CoreError, CoreResult};
use reqwest::{Client, StatusCode};
use texting_robots::Robot;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::FetcherConfig;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const ROBOTS_TTL: Duration = Duration::from_secs(3_600);
const CIRCUIT_OPEN_DURATION: Duration = Duration::from_secs(60);
const CIRCUIT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rps: f64) -> Self {
        Self { tokens: rps.max(0.01), capacity: rps.max(0.01), refill_per_sec: rps.max(0.01), last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Returns how long the caller must wait before a token is available,
    /// consuming it immediately if one already is.
    fn acquire_wait(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        self.tokens = 0.0;
        wait
    }
}

struct CachedRobots {
    robot: Option<Robot>,
    fetched_at: Instant,
}

struct ProxySlot {
    client: Client,
    consecutive_failures: u32,
    circuit_open_until: Option<Instant>,
}

pub struct Fetcher {
    direct: Client,
    user_agent: String,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    robots: Mutex<HashMap<String, CachedRobots>>,
    proxies: Mutex<Vec<ProxySlot>>,
    next_proxy: Mutex<usize>,
}

impl Fetcher {
    pub fn new(config: &FetcherConfig) -> CoreResult<Self> {
        let timeout = Duration::from_secs(config.timeout_s);
        let direct = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::dependency(format!("building http client: {e}")))?;

        let mut proxies = Vec::new();
        for proxy_url in &config.proxies {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| CoreError::dependency(e.to_string()))?;
            let client = Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(timeout)
                .proxy(proxy)
                .build()
                .map_err(|e| CoreError::dependency(e.to_string()))?;
            proxies.push(ProxySlot { client, consecutive_failures: 0, circuit_open_until: None });
        }

        Ok(Self {
            direct,
            user_agent: config.user_agent.clone(),
            buckets: Mutex::new(HashMap::new()),
            robots: Mutex::new(HashMap::new()),
            proxies: Mutex::new(proxies),
            next_proxy: Mutex::new(0),
        })
    }

    fn host_of(url: &str) -> String {
        url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string())).unwrap_or_else(|| url.to_string())
    }

    async fn wait_for_token(&self, host: &str, rps: f64) {
        let wait = {
            let mut buckets = self.buckets.lock().await;
            let bucket = buckets.entry(host.to_string()).or_insert_with(|| TokenBucket::new(rps));
            bucket.acquire_wait()
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Consults (and populates) the robots.txt cache for `url`'s host.
    /// When the robots.txt itself cannot be fetched, deny.
    pub async fn can_fetch(&self, url: &str) -> bool {
        let host = Self::host_of(url);
        {
            let robots = self.robots.lock().await;
            if let Some(cached) = robots.get(&host) {
                if cached.fetched_at.elapsed() < ROBOTS_TTL {
                    return cached.robot.as_ref().map(|r| r.allowed(url)).unwrap_or(false);
                }
            }
        }

        let robots_url = match url::Url::parse(url) {
            Ok(mut u) => {
                u.set_path("/robots.txt");
                u.set_query(None);
                u.to_string()
            }
            Err(_) => return false,
        };

        let robot = match self.direct.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => Robot::new(&self.user_agent, body.as_bytes()).ok(),
                Err(_) => None,
            },
            // No robots.txt (404) is conventionally treated as allow-all.
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => Robot::new(&self.user_agent, b"").ok(),
            _ => None,
        };

        let allowed = robot.as_ref().map(|r| r.allowed(url)).unwrap_or(false);
        self.robots
            .lock()
            .await
            .insert(host, CachedRobots { robot, fetched_at: Instant::now() });
        allowed
    }

    /// Returns the client to use and, if it is a proxy, the slot index so
    /// the caller can report success/failure back for circuit breaking.
    async fn pick_client(&self) -> (Client, Option<usize>) {
        let mut proxies = self.proxies.lock().await;
        if proxies.is_empty() {
            return (self.direct.clone(), None);
        }
        let mut idx_guard = self.next_proxy.lock().await;
        let start = *idx_guard;
        for offset in 0..proxies.len() {
            let idx = (start + offset) % proxies.len();
            let slot = &mut proxies[idx];
            if let Some(until) = slot.circuit_open_until {
                if Instant::now() < until {
                    continue;
                }
                slot.circuit_open_until = None;
                slot.consecutive_failures = 0;
            }
            *idx_guard = (idx + 1) % proxies.len();
            return (slot.client.clone(), Some(idx));
        }
        warn!("all proxies circuit-open, falling back to direct connection");
        (self.direct.clone(), None)
    }

    async fn record_proxy_result(&self, slot_index: Option<usize>, success: bool) {
        let Some(idx) = slot_index else { return };
        let mut proxies = self.proxies.lock().await;
        let Some(slot) = proxies.get_mut(idx) else { return };
        if success {
            slot.consecutive_failures = 0;
        } else {
            slot.consecutive_failures += 1;
            if slot.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
                slot.circuit_open_until = Some(Instant::now() + CIRCUIT_OPEN_DURATION);
            }
        }
    }

    /// Fetches `url` honoring robots.txt, the per-host token bucket, and
    /// the retry policy: up to 3 tries on network errors with exponential
    /// backoff starting at 500ms, no retry on 4xx, exactly one retry on 5xx.
    pub async fn fetch(&self, url: &str, per_host_rps: f64) -> CoreResult<FetchedPage> {
        if !self.can_fetch(url).await {
            return Err(CoreError::dependency(format!("robots.txt disallows fetching {url}")));
        }

        let host = Self::host_of(url);
        let mut attempt = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        let mut retried_5xx = false;

        loop {
            self.wait_for_token(&host, per_host_rps).await;
            let (client, slot_index) = self.pick_client().await;

            match client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_client_error() {
                        self.record_proxy_result(slot_index, true).await;
                        return Err(CoreError::dependency(format!("{url} returned {status}")));
                    }
                    if status.is_server_error() {
                        self.record_proxy_result(slot_index, false).await;
                        if !retried_5xx {
                            retried_5xx = true;
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                        return Err(CoreError::dependency(format!("{url} returned {status}")));
                    }
                    self.record_proxy_result(slot_index, true).await;
                    let final_url = resp.url().to_string();
                    let body = resp.text().await.map_err(|e| CoreError::dependency(e.to_string()))?;
                    return Ok(FetchedPage { final_url, status: status.as_u16(), body });
                }
                Err(e) => {
                    self.record_proxy_result(slot_index, false).await;
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(CoreError::dependency(format!("fetching {url}: {e}")));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1.0);
        assert_eq!(bucket.acquire_wait(), Duration::ZERO);
        let wait = bucket.acquire_wait();
        assert!(wait > Duration::ZERO);
    }
}
