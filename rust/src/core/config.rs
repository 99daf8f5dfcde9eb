use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::identity::{Canonicalizer, NumberPlan};
use crate::reconcile::MatchPolicy;
use crate::scheduler::PollIntervals;

pub const CONFIG_FILE: &str = "switchboard_config.json";

const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_MAX_PAGES: u32 = 20;
const DEFAULT_FAILURE_TOAST_AFTER: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub disable_network: Option<bool>,

    pub conversation_poll_ms: Option<u64>,
    pub fast_poll_ms: Option<u64>,
    pub slow_poll_ms: Option<u64>,

    pub text_match_window_ms: Option<i64>,
    pub media_match_window_ms: Option<i64>,

    pub country_code: Option<String>,
    pub national_prefix: Option<String>,
    pub subscriber_pattern: Option<String>,
    pub subscriber_len: Option<usize>,
    pub max_phone_len: Option<usize>,
    pub opaque_key_len: Option<usize>,

    pub conversations_page_size: Option<u32>,
    pub conversations_max_pages: Option<u32>,
    pub fetch_failure_toast_after: Option<u32>,
    pub request_timeout_ms: Option<u64>,
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "ignoring unreadable config");
            AppConfig::default()
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn millis_or(v: Option<u64>, default: Duration) -> Duration {
    v.filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl AppConfig {
    pub fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("SWITCHBOARD_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub fn base_url(&self) -> Option<String> {
        env_non_empty("SWITCHBOARD_BASE_URL")
            .or_else(|| self.base_url.clone().filter(|u| !u.trim().is_empty()))
    }

    pub fn api_token(&self) -> Option<String> {
        env_non_empty("SWITCHBOARD_API_TOKEN")
            .or_else(|| self.api_token.clone().filter(|t| !t.trim().is_empty()))
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        let d = PollIntervals::default();
        PollIntervals {
            conversations: millis_or(self.conversation_poll_ms, d.conversations),
            fast: millis_or(self.fast_poll_ms, d.fast),
            slow: millis_or(self.slow_poll_ms, d.slow),
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        let d = MatchPolicy::default();
        MatchPolicy {
            text_window_ms: self
                .text_match_window_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(d.text_window_ms),
            media_window_ms: self
                .media_match_window_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(d.media_window_ms),
        }
    }

    /// Build the canonicalizer, falling back to the built-in plan if the
    /// configured subscriber pattern doesn't compile.
    pub fn canonicalizer(&self) -> Canonicalizer {
        let d = Canonicalizer::default();
        let max_phone_len = self.max_phone_len.unwrap_or(d.max_phone_len());
        let opaque_key_len = self.opaque_key_len.unwrap_or(d.opaque_key_len());
        let custom_plan = self.country_code.is_some()
            || self.national_prefix.is_some()
            || self.subscriber_pattern.is_some()
            || self.subscriber_len.is_some();
        if !custom_plan {
            return Canonicalizer::new(d.plan().clone(), max_phone_len, opaque_key_len);
        }
        let base = d.plan();
        let plan = NumberPlan::new(
            self.country_code.as_deref().unwrap_or(base.country_code()),
            self.national_prefix
                .as_deref()
                .unwrap_or(base.national_prefix()),
            self.subscriber_pattern
                .as_deref()
                .unwrap_or(base.subscriber_pattern()),
            self.subscriber_len.unwrap_or(base.subscriber_len()),
        );
        match plan {
            Ok(plan) => Canonicalizer::new(plan, max_phone_len, opaque_key_len),
            Err(e) => {
                tracing::warn!(%e, "invalid subscriber_pattern; using default number plan");
                Canonicalizer::new(base.clone(), max_phone_len, opaque_key_len)
            }
        }
    }

    pub fn page_size(&self) -> u32 {
        self.conversations_page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn max_pages(&self) -> u32 {
        self.conversations_max_pages
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_PAGES)
    }

    pub fn failure_toast_after(&self) -> u32 {
        self.fetch_failure_toast_after
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_FAILURE_TOAST_AFTER)
    }

    pub fn request_timeout(&self) -> Duration {
        millis_or(
            self.request_timeout_ms,
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(cfg.poll_intervals(), PollIntervals::default());
        assert_eq!(cfg.match_policy(), MatchPolicy::default());
        assert_eq!(cfg.failure_toast_after(), 3);
        assert_eq!(cfg.page_size(), 50);
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"{ not json").unwrap();
        let cfg = load_app_config(&dir.path().to_string_lossy());
        assert!(cfg.base_url.is_none());
        assert_eq!(cfg.poll_intervals(), PollIntervals::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            br#"{ "fast_poll_ms": 50, "text_match_window_ms": 5000, "disable_network": true }"#,
        )
        .unwrap();
        let cfg = load_app_config(&dir.path().to_string_lossy());
        let iv = cfg.poll_intervals();
        assert_eq!(iv.fast, Duration::from_millis(50));
        assert_eq!(iv.slow, Duration::from_secs(15));
        assert_eq!(cfg.match_policy().text_window_ms, 5_000);
        assert_eq!(cfg.match_policy().media_window_ms, 60_000);
        assert!(!cfg.network_enabled());
    }

    #[test]
    fn custom_number_plan_is_applied() {
        let cfg = AppConfig {
            country_code: Some("44".into()),
            national_prefix: Some("0".into()),
            subscriber_pattern: Some(r"7\d{9}".into()),
            subscriber_len: Some(10),
            ..AppConfig::default()
        };
        let id = cfg.canonicalizer().canonicalize("447911123456@s.whatsapp.net");
        assert_eq!(id.key, "07911123456");
        assert!(!id.is_opaque);
    }

    #[test]
    fn bad_subscriber_pattern_falls_back_to_default_plan() {
        let cfg = AppConfig {
            subscriber_pattern: Some("([".into()),
            ..AppConfig::default()
        };
        let id = cfg.canonicalizer().canonicalize("201001234567@s.whatsapp.net");
        assert_eq!(id.key, "01001234567");
    }
}
