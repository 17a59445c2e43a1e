//! Cold-start prober
//!
//! Hosting platforms that suspend idle services take a while to answer the
//! first request. Before the first connect we poke the relay's health
//! endpoint a few times; whatever the outcome, the caller connects afterwards.

use super::error::ProbeError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeupConfig {
    /// Substrings of relay URLs that identify suspend-on-idle hosts
    pub patterns: Vec<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub probe_timeout: Duration,
}

impl Default for WakeupConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["onrender.com".to_string()],
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupStatus {
    pub waking_up: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Map a relay WebSocket URL to its HTTP health endpoint
pub fn health_url_for(relay_url: &str) -> String {
    let base = if let Some(rest) = relay_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = relay_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        relay_url.to_string()
    };
    format!("{}/health", base.trim_end_matches('/'))
}

pub struct ColdStartProber {
    relay_url: String,
    health_url: String,
    config: WakeupConfig,
    client: reqwest::Client,
    waking: AtomicBool,
    attempts: AtomicU32,
}

impl ColdStartProber {
    pub fn new(relay_url: impl Into<String>, config: WakeupConfig) -> Result<Self, ProbeError> {
        let relay_url = relay_url.into();
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            health_url: health_url_for(&relay_url),
            relay_url,
            config,
            client,
            waking: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Whether the relay looks like it may be suspended
    pub fn applies(&self) -> bool {
        self.config
            .patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && self.relay_url.contains(pattern.as_str()))
    }

    /// One GET against the health endpoint
    pub async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.config.probe_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status().as_u16()))
        }
    }

    /// Probe until the relay answers or attempts run out.
    ///
    /// Returns `true` if the relay answered. A call made while another is in
    /// flight returns `false` immediately.
    pub async fn wake(&self) -> bool {
        if self.waking.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _guard = WakingGuard(&self.waking);
        self.attempts.store(0, Ordering::SeqCst);

        info!("Waking up relay at {}", self.health_url);
        for attempt in 1..=self.config.max_attempts {
            self.attempts.store(attempt, Ordering::SeqCst);

            match self.probe().await {
                Ok(()) => {
                    info!("Relay is awake after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => {
                    info!("Wake-up attempt {} failed: {}", attempt, e);
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        warn!(
            "Could not wake up relay after {} attempts",
            self.config.max_attempts
        );
        false
    }

    pub fn status(&self) -> WakeupStatus {
        WakeupStatus {
            waking_up: self.waking.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
            max_attempts: self.config.max_attempts,
        }
    }
}

/// Clears the in-flight flag even if `wake` is cancelled
struct WakingGuard<'a>(&'a AtomicBool);

impl Drop for WakingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn fast_config() -> WakeupConfig {
        WakeupConfig {
            patterns: vec!["onrender.com".to_string()],
            max_attempts: 3,
            retry_delay: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(500),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{}", addr)
    }

    #[test]
    fn test_health_url_for() {
        assert_eq!(health_url_for("ws://localhost:3001"), "http://localhost:3001/health");
        assert_eq!(
            health_url_for("wss://relay.onrender.com/"),
            "https://relay.onrender.com/health"
        );
    }

    #[test]
    fn test_applies_only_to_matching_hosts() {
        let prober = ColdStartProber::new("wss://relay.onrender.com", fast_config()).unwrap();
        assert!(prober.applies());

        let prober = ColdStartProber::new("ws://localhost:3001", fast_config()).unwrap();
        assert!(!prober.applies());
    }

    #[tokio::test]
    async fn test_wake_succeeds_on_healthy_relay() {
        let url = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let prober = ColdStartProber::new(url, fast_config()).unwrap();

        assert!(prober.wake().await);
        let status = prober.status();
        assert_eq!(status.attempts, 1);
        assert!(!status.waking_up);
    }

    #[tokio::test]
    async fn test_wake_gives_up_after_max_attempts() {
        let url = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let prober = ColdStartProber::new(url, fast_config()).unwrap();

        assert!(!prober.wake().await);
        assert_eq!(prober.status().attempts, 3);
        assert!(!prober.status().waking_up);
    }

    #[tokio::test]
    async fn test_concurrent_wake_returns_immediately() {
        let url = serve(Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "ok"
            }),
        ))
        .await;
        let prober = Arc::new(ColdStartProber::new(url, fast_config()).unwrap());

        let first = tokio::spawn({
            let prober = prober.clone();
            async move { prober.wake().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(prober.status().waking_up);
        assert!(!prober.wake().await);
        assert!(first.await.unwrap());
    }
}
