use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "https://climate.weather.gc.ca/climate_data/bulk_data_e.html";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub station_id: String,
    pub location: String,
    pub feed_url: String,
    pub plots_dir: PathBuf,
    pub refresh_minutes: u64,
    pub fetch_timeout_secs: u64,
    pub request_pause_ms: u64,
    pub rate_limit_max_attempts: usize,
    pub rate_limit_base_delay_ms: u64,
    pub db_busy_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://weather.sqlite3".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            station_id: "27174".to_string(),
            location: "Winnipeg".to_string(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            plots_dir: PathBuf::from("plots"),
            refresh_minutes: 60,
            fetch_timeout_secs: 25,
            request_pause_ms: 400,
            rate_limit_max_attempts: 3,
            rate_limit_base_delay_ms: 2000,
            db_busy_timeout_secs: 5,
            user_agent: format!("weather-tracker-service/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Build the configuration from environment variables.
    ///
    /// Every setting has a default; numeric values that fail to parse fall
    /// back to it.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Config {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
            station_id: env::var("STATION_ID").unwrap_or(defaults.station_id),
            location: env::var("LOCATION").unwrap_or(defaults.location),
            feed_url: env::var("FEED_URL").unwrap_or(defaults.feed_url),
            plots_dir: env::var("PLOTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.plots_dir),
            refresh_minutes: parse_var("REFRESH_MINUTES", defaults.refresh_minutes),
            fetch_timeout_secs: parse_var("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
            request_pause_ms: parse_var("REQUEST_PAUSE_MS", defaults.request_pause_ms),
            rate_limit_max_attempts: parse_var(
                "RATE_LIMIT_MAX_ATTEMPTS",
                defaults.rate_limit_max_attempts,
            ),
            rate_limit_base_delay_ms: parse_var(
                "RATE_LIMIT_BASE_DELAY_MS",
                defaults.rate_limit_base_delay_ms,
            ),
            db_busy_timeout_secs: parse_var("DB_BUSY_TIMEOUT_SECS", defaults.db_busy_timeout_secs),
            user_agent: env::var("USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn db_busy_timeout(&self) -> Duration {
        Duration::from_secs(self.db_busy_timeout_secs)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.station_id, "27174");
        assert_eq!(config.location, "Winnipeg");
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(25));
        assert!(config.user_agent.starts_with("weather-tracker-service/"));
    }

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("WTS_TEST_GARBAGE_PORT", "not-a-port");
        assert_eq!(parse_var("WTS_TEST_GARBAGE_PORT", 8080u16), 8080);

        env::set_var("WTS_TEST_GOOD_PORT", " 9090 ");
        assert_eq!(parse_var("WTS_TEST_GOOD_PORT", 8080u16), 9090);

        assert_eq!(parse_var("WTS_TEST_UNSET_VALUE", 42u64), 42);
    }
}
