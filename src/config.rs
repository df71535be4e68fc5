use crate::error::{BillMonitorError, Result};
use log::debug;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-flash-latest";
pub const DEFAULT_LATITUDE: f64 = -22.839445;
pub const DEFAULT_LONGITUDE: f64 = -43.398826;
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";
pub const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// How long to wait for an uploaded document to leave the processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Only needed when new bills have to be extracted.
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub bills_dir: PathBuf,
    pub bills_file: PathBuf,
    pub weather_file: PathBuf,
    pub archive_url: String,
    pub forecast_url: String,
    pub poll: PollPolicy,
    /// Pause after each extracted bill, to stay under the document API's rate limits.
    pub item_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            timezone: DEFAULT_TIMEZONE.to_string(),
            bills_dir: PathBuf::from("Faturas"),
            bills_file: PathBuf::from("bills_history.json"),
            weather_file: PathBuf::from("weather_history.json"),
            archive_url: OPEN_METEO_ARCHIVE_URL.to_string(),
            forecast_url: OPEN_METEO_FORECAST_URL.to_string(),
            poll: PollPolicy::default(),
            item_delay: Duration::from_secs(2),
        }
    }
}

impl MonitorConfig {
    /// Builds the configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        config.gemini_api_key = lookup("GEMINI_API_KEY").filter(|key| !key.trim().is_empty());
        if let Some(model) = lookup("GEMINI_MODEL") {
            config.model = model;
        }
        if let Some(lat) = lookup("BILL_MONITOR_LATITUDE") {
            config.latitude = parse_var("BILL_MONITOR_LATITUDE", &lat)?;
        }
        if let Some(lon) = lookup("BILL_MONITOR_LONGITUDE") {
            config.longitude = parse_var("BILL_MONITOR_LONGITUDE", &lon)?;
        }
        if let Some(tz) = lookup("BILL_MONITOR_TIMEZONE") {
            config.timezone = tz;
        }
        if let Some(dir) = lookup("BILL_MONITOR_BILLS_DIR") {
            config.bills_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("BILL_MONITOR_BILLS_FILE") {
            config.bills_file = PathBuf::from(file);
        }
        if let Some(file) = lookup("BILL_MONITOR_WEATHER_FILE") {
            config.weather_file = PathBuf::from(file);
        }

        debug!(
            "Configuration: model={}, location=({}, {}), bills_dir={}",
            config.model,
            config.latitude,
            config.longitude,
            config.bills_dir.display()
        );
        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.gemini_api_key.as_deref().ok_or_else(|| {
            BillMonitorError::Config(
                "GEMINI_API_KEY not found in environment variables. Set it in a .env file or export it."
                    .to_string(),
            )
        })
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| BillMonitorError::Config(format!("Invalid value for {}: '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = MonitorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.bills_file, PathBuf::from("bills_history.json"));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = MonitorConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "secret"),
            ("BILL_MONITOR_LATITUDE", "-23.5"),
            ("BILL_MONITOR_WEATHER_FILE", "data/weather.json"),
        ]))
        .unwrap();
        assert_eq!(config.require_api_key().unwrap(), "secret");
        assert_eq!(config.latitude, -23.5);
        assert_eq!(config.longitude, DEFAULT_LONGITUDE);
        assert_eq!(config.weather_file, PathBuf::from("data/weather.json"));
    }

    #[test]
    fn test_invalid_coordinate_is_rejected() {
        let result = MonitorConfig::from_lookup(lookup_from(&[("BILL_MONITOR_LONGITUDE", "west")]));
        assert!(matches!(result, Err(BillMonitorError::Config(_))));
    }
}
