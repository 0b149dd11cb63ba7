/// Application configuration module
use crate::domain::TimeWindow;
use std::env;
use std::str::FromStr;

const DEFAULT_URL: &str = "http://www.tams.com.ar/organismos/vuelos.aspx";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub scraper: ScraperConfig,
    pub cache: CacheConfig,
    /// Background warm-up interval; 0 disables it
    pub refresh_every_seconds: u64,
    /// Offset used when rendering timestamps for consumers
    pub utc_offset_hours: i32,
}

#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub base_url: String,
    pub airport: String,
    pub default_window: TimeWindow,
    pub alternate_window: TimeWindow,
    pub max_pages: usize,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            airport: "AEP".to_string(),
            default_window: TimeWindow(6),
            alternate_window: TimeWindow(-1),
            max_pages: 3,
            request_timeout_seconds: 10,
            max_retries: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = ScraperConfig::default();

        let scraper = ScraperConfig {
            base_url: env_string("FLIGHTS_URL", &defaults.base_url),
            airport: env_string("AIRPORT", &defaults.airport),
            default_window: TimeWindow(env_parse("DEFAULT_WINDOW_HOURS", defaults.default_window.0)),
            alternate_window: TimeWindow(env_parse(
                "ALTERNATE_WINDOW_HOURS",
                defaults.alternate_window.0,
            )),
            max_pages: env_parse("MAX_PAGES", defaults.max_pages).max(1),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            user_agent: env_string("USER_AGENT", &defaults.user_agent),
        };

        if scraper.base_url.trim().is_empty() {
            anyhow::bail!("FLIGHTS_URL must not be empty");
        }

        Ok(Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:5000"),
            scraper,
            cache: CacheConfig {
                ttl_seconds: env_parse("CACHE_TTL_SECONDS", 120),
            },
            refresh_every_seconds: env_parse("REFRESH_EVERY_SECONDS", 0),
            utc_offset_hours: env_parse("UTC_OFFSET_HOURS", -3),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
