use std::time::Duration;

use crate::error::AppError;
use crate::throttle::ThrottleConfig;

/// Desktop user agents rotated across direct HTTP attempts.
pub const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36 Edg/127.0.0.0",
];

/// User agent for the mobile-profile render retry.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Mobile Safari/537.36";

/// Timeouts and retry policy for [`FetchOrchestrator`](crate::orchestrator::FetchOrchestrator).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub request_timeout: Duration,
    pub render_timeout: Duration,
    pub warmup_timeout: Duration,
    pub interactive_timeout: Duration,
    /// Offer the human-assisted solve once every automatic tier failed.
    pub interactive: bool,
    /// Direct HTTP attempts before escalating to render.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
    /// Pause between a successful warm-up and the retried request.
    pub warmup_pause: Duration,
    pub throttle: ThrottleConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(35),
            render_timeout: Duration::from_secs(45),
            warmup_timeout: Duration::from_secs(45),
            interactive_timeout: Duration::from_secs(150),
            interactive: false,
            max_attempts: 3,
            backoff_base: Duration::from_millis(400),
            backoff_jitter: Duration::from_millis(200),
            warmup_pause: Duration::from_millis(600),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn with_interactive(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_backoff(mut self, base: Duration, jitter: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_warmup_pause(mut self, pause: Duration) -> Self {
        self.warmup_pause = pause;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// No waiting anywhere; for tests.
    pub fn immediate() -> Self {
        Self::default()
            .with_throttle(ThrottleConfig::new(Duration::ZERO))
            .with_backoff(Duration::ZERO, Duration::ZERO)
            .with_warmup_pause(Duration::ZERO)
    }

    /// Read overrides from `CHAPTERWATCH_*` environment variables.
    ///
    /// - `CHAPTERWATCH_REQUEST_TIMEOUT_SECS` (default 35)
    /// - `CHAPTERWATCH_RENDER_TIMEOUT_SECS` (default 45)
    /// - `CHAPTERWATCH_WARMUP_TIMEOUT_SECS` (default 45)
    /// - `CHAPTERWATCH_INTERACTIVE_TIMEOUT_SECS` (default 150)
    /// - `CHAPTERWATCH_INTERACTIVE` (`true`/`false`, default false)
    /// - `CHAPTERWATCH_MAX_ATTEMPTS` (default 3)
    /// - `CHAPTERWATCH_THROTTLE_MS` (default 900)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHAPTERWATCH_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHAPTERWATCH_RENDER_TIMEOUT_SECS")? {
            config.render_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHAPTERWATCH_WARMUP_TIMEOUT_SECS")? {
            config.warmup_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHAPTERWATCH_INTERACTIVE_TIMEOUT_SECS")? {
            config.interactive_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = parse_var::<bool, _>(&lookup, "CHAPTERWATCH_INTERACTIVE")? {
            config.interactive = flag;
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "CHAPTERWATCH_MAX_ATTEMPTS")? {
            if n == 0 {
                return Err(AppError::ConfigError(
                    "CHAPTERWATCH_MAX_ATTEMPTS must be at least 1".into(),
                ));
            }
            config.max_attempts = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHAPTERWATCH_THROTTLE_MS")? {
            config.throttle.min_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

/// Policy for [`UpdateScanner`](crate::scanner::UpdateScanner).
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Upper bound for one entry's whole pipeline; the entry is cancelled
    /// when it runs out.
    pub entry_timeout: Duration,
    /// Try the template probe before a full fetch.
    pub probe: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            entry_timeout: Duration::from_secs(300),
            probe: true,
        }
    }
}

impl ScanConfig {
    pub fn with_entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    pub fn with_probe(mut self, enabled: bool) -> Self {
        self.probe = enabled;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = FetchConfig::default();
        assert_eq!(c.request_timeout, Duration::from_secs(35));
        assert_eq!(c.render_timeout, Duration::from_secs(45));
        assert_eq!(c.interactive_timeout, Duration::from_secs(150));
        assert_eq!(c.max_attempts, 3);
        assert!(!c.interactive);
        assert_eq!(DESKTOP_USER_AGENTS.len(), 3);
    }

    #[test]
    fn from_lookup_applies_overrides() {
        let c = FetchConfig::from_lookup(lookup(&[
            ("CHAPTERWATCH_INTERACTIVE", "true"),
            ("CHAPTERWATCH_MAX_ATTEMPTS", "5"),
            ("CHAPTERWATCH_THROTTLE_MS", "1500"),
            ("CHAPTERWATCH_RENDER_TIMEOUT_SECS", " "),
        ]))
        .unwrap();
        assert!(c.interactive);
        assert_eq!(c.max_attempts, 5);
        assert_eq!(c.throttle.min_delay, Duration::from_millis(1500));
        assert_eq!(c.render_timeout, Duration::from_secs(45));
    }

    #[test]
    fn from_lookup_rejects_malformed_values() {
        assert!(matches!(
            FetchConfig::from_lookup(lookup(&[("CHAPTERWATCH_MAX_ATTEMPTS", "lots")])),
            Err(AppError::ConfigError(_))
        ));
        assert!(matches!(
            FetchConfig::from_lookup(lookup(&[("CHAPTERWATCH_MAX_ATTEMPTS", "0")])),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn scan_config_builder() {
        let c = ScanConfig::default()
            .with_entry_timeout(Duration::from_secs(10))
            .with_probe(false);
        assert_eq!(c.entry_timeout, Duration::from_secs(10));
        assert!(!c.probe);
    }
}
