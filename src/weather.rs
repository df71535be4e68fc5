use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use reqwest::Client;

use crate::config::MonitorConfig;
use crate::error::{BillMonitorError, Result};
use crate::schema::{WeatherHistory, DAILY_TEMPERATURE_FIELDS};
use crate::store::{BillStore, WeatherStore};
use crate::utils::format_weather_date;

/// The archive lags a couple of days behind the present.
pub const ARCHIVE_LAG_DAYS: i64 = 2;
/// How far before the earliest reading to start when there is no weather history yet.
pub const BILL_LOOKBACK_DAYS: i64 = 35;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 365;
/// Longest forecast horizon the forecast endpoint serves.
pub const MAX_FORECAST_DAYS: u32 = 16;

#[async_trait]
pub trait WeatherSource {
    /// Recorded daily temperatures for `[start, end]`.
    async fn fetch_history(&self, start: NaiveDate, end: NaiveDate) -> Result<WeatherHistory>;

    /// Daily forecast starting today and covering `days` days.
    async fn fetch_forecast(&self, days: u32) -> Result<WeatherHistory>;
}

#[async_trait]
impl<T: WeatherSource + Sync + ?Sized> WeatherSource for &T {
    async fn fetch_history(&self, start: NaiveDate, end: NaiveDate) -> Result<WeatherHistory> {
        (**self).fetch_history(start, end).await
    }

    async fn fetch_forecast(&self, days: u32) -> Result<WeatherHistory> {
        (**self).fetch_forecast(days).await
    }
}

#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Client,
    archive_url: String,
    forecast_url: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
}

impl OpenMeteoClient {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            client: Client::new(),
            archive_url: config.archive_url.clone(),
            forecast_url: config.forecast_url.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            timezone: config.timezone.clone(),
        }
    }

    fn base_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("daily", DAILY_TEMPERATURE_FIELDS.join(",")),
            ("timezone", self.timezone.clone()),
        ]
    }

    async fn get_daily(&self, url: &str, query: &[(&str, String)]) -> Result<WeatherHistory> {
        let res = self.client.get(url).query(query).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(BillMonitorError::WeatherData(format!(
                "Weather API error (status {}): {}",
                status, err_text
            )));
        }

        let history: WeatherHistory = res.json().await?;
        debug!("Weather API returned {} days", history.len());
        Ok(history)
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn fetch_history(&self, start: NaiveDate, end: NaiveDate) -> Result<WeatherHistory> {
        let mut query = self.base_query();
        query.push(("start_date", format_weather_date(start)));
        query.push(("end_date", format_weather_date(end)));

        info!("Fetching weather from {} to {}...", start, end);
        self.get_daily(&self.archive_url, &query).await
    }

    async fn fetch_forecast(&self, days: u32) -> Result<WeatherHistory> {
        let mut query = self.base_query();
        query.push(("forecast_days", days.clamp(1, MAX_FORECAST_DAYS).to_string()));

        info!("Fetching {}-day temperature forecast...", days);
        self.get_daily(&self.forecast_url, &query).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeatherUpdate {
    UpToDate,
    Updated { added_days: usize },
}

/// Keeps the weather history file current up to the archive's lag.
pub struct WeatherUpdater<S> {
    source: S,
    weather: WeatherStore,
    bills: BillStore,
}

impl<S: WeatherSource> WeatherUpdater<S> {
    pub fn new(source: S, weather: WeatherStore, bills: BillStore) -> Self {
        Self {
            source,
            weather,
            bills,
        }
    }

    /// First day still missing from the history.
    ///
    /// In order of preference: the day after the last recorded date, 35 days before the earliest
    /// bill reading, or a year before `today`.
    pub fn start_date(&self, today: NaiveDate) -> NaiveDate {
        match self.weather.load() {
            Ok(Some(history)) => match history.last_date() {
                Ok(Some(last)) => return last + Duration::days(1),
                Ok(None) => {}
                Err(e) => warn!("Error reading existing weather file: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("Error reading existing weather file: {}", e),
        }

        match self.bills.load() {
            Ok(Some(bills)) => {
                if let Some(earliest) = bills.iter().filter_map(|b| b.reading_date()).min() {
                    return earliest - Duration::days(BILL_LOOKBACK_DAYS);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Error reading bills file: {}", e),
        }

        today - Duration::days(DEFAULT_LOOKBACK_DAYS)
    }

    pub fn end_date(today: NaiveDate) -> NaiveDate {
        today - Duration::days(ARCHIVE_LAG_DAYS)
    }

    /// Fetches and stores the missing range. Errors leave the file untouched.
    pub async fn try_update(&self, today: NaiveDate) -> Result<WeatherUpdate> {
        let start = self.start_date(today);
        let end = Self::end_date(today);

        if start > end {
            info!("Weather data is already up to date.");
            return Ok(WeatherUpdate::UpToDate);
        }

        let incoming = self.source.fetch_history(start, end).await?;
        let mut history = self.weather.load()?.unwrap_or_default();
        let added_days = history.merge(incoming)?;
        self.weather.save(&history)?;

        info!(
            "Weather data saved to '{}' ({} new days).",
            self.weather.path().display(),
            added_days
        );
        Ok(WeatherUpdate::Updated { added_days })
    }

    /// Runs [`WeatherUpdater::try_update`] and reports success as a flag.
    pub async fn update(&self, today: NaiveDate) -> bool {
        match self.try_update(today).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Weather update failed: {}", e);
                false
            }
        }
    }
}
