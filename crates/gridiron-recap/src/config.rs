use std::time::Duration;

use crate::video::PollPolicy;

pub const DEFAULT_TEXTGEN_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq)]
pub struct RecapConfig {
    pub textgen_base_url: Option<String>,
    pub textgen_api_key: Option<String>,
    pub textgen_model: String,
    pub video_base_url: Option<String>,
    pub video_api_key: Option<String>,
    pub poll: PollPolicy,
    pub http_timeout: Duration,
}

impl Default for RecapConfig {
    fn default() -> Self {
        Self {
            textgen_base_url: None,
            textgen_api_key: None,
            textgen_model: DEFAULT_TEXTGEN_MODEL.to_string(),
            video_base_url: None,
            video_api_key: None,
            poll: PollPolicy::default(),
            http_timeout: Duration::from_secs(120),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl RecapConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            textgen_base_url: non_empty("TEXTGEN_BASE_URL"),
            textgen_api_key: non_empty("TEXTGEN_API_KEY"),
            textgen_model: non_empty("TEXTGEN_MODEL").unwrap_or(defaults.textgen_model),
            video_base_url: non_empty("VIDEO_API_BASE_URL"),
            video_api_key: non_empty("VIDEO_API_KEY"),
            poll: PollPolicy {
                interval: non_empty("VIDEO_POLL_INTERVAL_SECS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.poll.interval),
                max_attempts: non_empty("VIDEO_MAX_POLL_ATTEMPTS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.poll.max_attempts),
            },
            http_timeout: defaults.http_timeout,
        }
    }

    /// Base URL and key, when text generation is configured.
    pub fn textgen(&self) -> Option<(&str, &str)> {
        Some((self.textgen_base_url.as_deref()?, self.textgen_api_key.as_deref()?))
    }

    pub fn video(&self) -> Option<(&str, &str)> {
        Some((self.video_base_url.as_deref()?, self.video_api_key.as_deref()?))
    }
}
