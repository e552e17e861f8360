pub mod api;
pub mod app;
pub mod contract;
pub mod service;
pub mod sse;
pub mod storage;
pub mod store;
pub mod view;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_API_URL: &str = "http://localhost:8000";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_STATE_DIR: &str = ".farecast";
    const DEFAULT_STAGE_RESET_MS: u64 = 1500;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub api_url: String,
        pub api_timeout: Duration,
        pub state_dir: PathBuf,
        pub stage_reset_delay: Duration,
        pub stream_keepalive_secs: Option<u32>,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                api_url: DEFAULT_API_URL.to_string(),
                api_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                state_dir: PathBuf::from(DEFAULT_STATE_DIR),
                stage_reset_delay: Duration::from_millis(DEFAULT_STAGE_RESET_MS),
                stream_keepalive_secs: None,
                sentry_dsn: None,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let api_url = std::env::var("FARECAST_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
            reqwest::Url::parse(&api_url)
                .with_context(|| format!("FARECAST_API_URL is not a valid URL: {api_url}"))?;

            let timeout_secs = std::env::var("FARECAST_API_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS);

            let state_dir = std::env::var("FARECAST_STATE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

            let stage_reset_ms = std::env::var("FARECAST_STAGE_RESET_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_STAGE_RESET_MS);

            let stream_keepalive_secs = std::env::var("FARECAST_STREAM_KEEPALIVE_SECS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0);

            Ok(Self {
                api_url,
                api_timeout: Duration::from_secs(timeout_secs),
                state_dir,
                stage_reset_delay: Duration::from_millis(stage_reset_ms),
                stream_keepalive_secs,
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }
    }
}
