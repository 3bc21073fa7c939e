//! Blocking HTTP transport shared by every site handler.
//!
//! One outbound primitive ([Fetch]) wrapped by two decorators: [RateLimited]
//! enforces a minimum delay between requests behind a single mutex, and
//! [Retrying] retries classified transient failures with capped exponential
//! backoff. [Transport] is the composed stack built from config.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::config::{DownloadConfig, DEFAULT_USER_AGENT};
use crate::error::{ConfigError, NetworkError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MILLIS: u64 = 1000;
const MAX_REDIRECTS: usize = 10;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    PostForm(Vec<(String, String)>),
}

/// Which client identity to present. `Browser` mimics a desktop Chrome
/// navigation for sites that reject non-browser clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Standard,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub profile: Profile,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            profile: Profile::Standard,
        }
    }

    pub fn post_form(url: impl Into<String>, form: &[(&str, &str)]) -> Self {
        Self {
            url: url.into(),
            method: Method::PostForm(
                form.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            profile: Profile::Standard,
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }
}

/// A successful (2xx) response, fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Fetched {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The single outbound-request primitive. Non-2xx responses are errors.
pub trait Fetch {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError>;

    fn get_text(&self, url: &str) -> Result<String, NetworkError> {
        self.fetch(&Request::get(url)).map(|f| f.text())
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        self.fetch(&Request::get(url)).map(|f| f.body)
    }
}

impl<F: Fetch + ?Sized> Fetch for &F {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
        (**self).fetch(request)
    }
}

/// reqwest-backed fetcher holding one pooled client per [Profile].
#[derive(Debug)]
pub struct HttpFetcher {
    standard: reqwest::blocking::Client,
    browser: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let standard = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(NetworkError::Client)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        let browser = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(NetworkError::Client)?;

        Ok(Self { standard, browser })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
        let client = match request.profile {
            Profile::Standard => &self.standard,
            Profile::Browser => &self.browser,
        };
        let builder = match &request.method {
            Method::Get => client.get(&request.url),
            Method::PostForm(form) => client.post(&request.url).form(form),
        };
        let response = builder.send().map_err(|source| NetworkError::Request {
            url: request.url.clone(),
            source,
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NetworkError::RateLimited {
                url: request.url.clone(),
            });
        }
        if !status.is_success() {
            return Err(NetworkError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(|source| NetworkError::Body {
            url: request.url.clone(),
            source,
        })?;
        Ok(Fetched {
            url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Global rate limiter: at least `delay` between the start of consecutive requests.
#[derive(Debug)]
pub struct RateLimited<F> {
    inner: F,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<F> RateLimited<F> {
    pub fn new(inner: F, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last_request: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Acquire, read, compute delay, sleep, write, release. The lock is held
    /// across the sleep so concurrent callers queue behind each other.
    fn wait_turn(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl<F: Fetch> Fetch for RateLimited<F> {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
        self.wait_turn();
        self.inner.fetch(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `failures`-th failed attempt (1-based): `min(initial * 2^(n-1), max)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Retries [NetworkError::is_retryable] failures; everything else is returned at once.
#[derive(Debug)]
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<F: Fetch> Fetch for Retrying<F> {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.fetch(request) {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The composed transport used for one download run. Dropping it releases
/// the pooled connections.
#[derive(Debug)]
pub struct Transport {
    inner: Retrying<RateLimited<HttpFetcher>>,
}

impl Transport {
    pub fn new() -> Result<Self, NetworkError> {
        Self::builder().build()
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    /// GET and decode the body as text.
    pub fn get(&self, url: &str) -> Result<String, NetworkError> {
        self.get_text(url)
    }

    pub fn get_with(&self, url: &str, profile: Profile) -> Result<String, NetworkError> {
        self.fetch(&Request::get(url).with_profile(profile))
            .map(|f| f.text())
    }

    /// POST form data through the same rate limiter and retry policy.
    pub fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, NetworkError> {
        self.fetch(&Request::post_form(url, form)).map(|f| f.text())
    }

    pub fn delay(&self) -> Duration {
        self.inner.inner.delay()
    }
}

impl Fetch for Transport {
    fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
        debug!(url = %request.url, profile = ?request.profile, "Fetching");
        self.inner.fetch(request)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        debug!("Closing HTTP transport");
    }
}

/// Builder for [Transport] with optional User-Agent, delay, timeout and retry settings.
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    user_agent: Option<String>,
    delay: Duration,
    timeout: Duration,
    policy: RetryPolicy,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay: Duration::from_millis(DEFAULT_DELAY_MILLIS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            policy: RetryPolicy::default(),
        }
    }
}

impl TransportBuilder {
    pub fn from_config(config: &DownloadConfig) -> Result<Self, ConfigError> {
        Ok(Self::default()
            .user_agent(config.user_agent.clone())
            .delay(config.request_delay()?)
            .timeout(config.request_timeout()?)
            .max_attempts(config.max_retries))
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy.max_attempts = n.max(1);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Transport, NetworkError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let http = HttpFetcher::new(&user_agent, self.timeout)?;
        Ok(Transport {
            inner: Retrying::new(RateLimited::new(http, self.delay), self.policy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Replays scripted outcomes and counts calls.
    struct Scripted {
        outcomes: RefCell<VecDeque<Result<u16, NetworkError>>>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<u16, NetworkError>>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl Fetch for Scripted {
        fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
            self.calls.set(self.calls.get() + 1);
            let next = self.outcomes.borrow_mut().pop_front().unwrap_or(Ok(200));
            next.map(|status| Fetched {
                url: request.url.clone(),
                status,
                content_type: Some("text/html".into()),
                body: b"ok".to_vec(),
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn status(code: u16) -> NetworkError {
        NetworkError::HttpStatus {
            status: code,
            url: "https://x.test/".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn retries_transient_failures_until_success() -> Result<(), NetworkError> {
        let inner = Scripted::new(vec![Err(status(503)), Err(status(502)), Ok(200)]);
        let retrying = Retrying::new(&inner, fast_policy());
        let body = retrying.get_text("https://x.test/")?;
        assert_eq!(body, "ok");
        assert_eq!(inner.calls.get(), 3);
        Ok(())
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let inner = Scripted::new(vec![Err(status(500)), Err(status(500)), Err(status(500)), Ok(200)]);
        let retrying = Retrying::new(&inner, fast_policy());
        let result = retrying.get_text("https://x.test/");
        assert!(matches!(result, Err(NetworkError::HttpStatus { status: 500, .. })));
        assert_eq!(inner.calls.get(), 3);
    }

    #[test]
    fn permanent_client_errors_are_not_retried() {
        let inner = Scripted::new(vec![Err(status(404))]);
        let retrying = Retrying::new(&inner, fast_policy());
        let result = retrying.get_bytes("https://x.test/");
        assert!(matches!(result, Err(NetworkError::HttpStatus { status: 404, .. })));
        assert_eq!(inner.calls.get(), 1);
    }

    #[test]
    fn rate_limit_responses_are_retried() -> Result<(), NetworkError> {
        let inner = Scripted::new(vec![
            Err(NetworkError::RateLimited {
                url: "https://x.test/".into(),
            }),
            Ok(200),
        ]);
        let retrying = Retrying::new(&inner, fast_policy());
        retrying.get_text("https://x.test/")?;
        assert_eq!(inner.calls.get(), 2);
        Ok(())
    }

    #[test]
    fn rate_limiter_spaces_sequential_requests() -> Result<(), NetworkError> {
        let inner = Scripted::new(vec![]);
        let delay = Duration::from_millis(30);
        let limited = RateLimited::new(&inner, delay);
        let start = Instant::now();
        for _ in 0..4 {
            limited.get_text("https://x.test/")?;
        }
        assert!(start.elapsed() >= delay * 3);
        assert_eq!(inner.calls.get(), 4);
        Ok(())
    }

    #[test]
    fn first_request_is_not_delayed() -> Result<(), NetworkError> {
        let inner = Scripted::new(vec![]);
        let limited = RateLimited::new(&inner, Duration::from_secs(5));
        let start = Instant::now();
        limited.get_text("https://x.test/")?;
        assert!(start.elapsed() < Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn post_form_request_carries_pairs() {
        let r = Request::post_form("https://x.test/ajax", &[("action", "go"), ("page", "-1")])
            .with_profile(Profile::Browser);
        assert_eq!(
            r.method,
            Method::PostForm(vec![
                ("action".to_string(), "go".to_string()),
                ("page".to_string(), "-1".to_string()),
            ])
        );
        assert_eq!(r.profile, Profile::Browser);
    }

    #[test]
    fn builder_applies_config() -> Result<(), ConfigError> {
        let cfg = DownloadConfig {
            rate_limit: 0.25,
            max_retries: 0,
            ..DownloadConfig::default()
        };
        let b = TransportBuilder::from_config(&cfg)?;
        assert_eq!(b.delay, Duration::from_millis(250));
        assert_eq!(b.policy.max_attempts, 1);

        let infinite = DownloadConfig {
            rate_limit: f64::INFINITY,
            ..DownloadConfig::default()
        };
        assert!(matches!(
            TransportBuilder::from_config(&infinite),
            Err(ConfigError::Duration { .. })
        ));
        Ok(())
    }
}
