//! Everything the dashboard shows, computed from the two history stores.
//!
//! [`Dashboard`] reads the stores once and keeps the result until [`Dashboard::clear_cache`] (or
//! a refresh) drops it. A [`DashboardReport`] holds chart-ready series and can be rendered as text
//! or exported as JSON.

use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use std::fmt::Write as _;

use crate::config::MonitorConfig;
use crate::forecast::{derive_bill_views, project_open_cycle};
use crate::schema::{BillRecord, BillView, DailyTemperature, Projection, TariffFlag};
use crate::store::{BillStore, WeatherStore};
use crate::utils::mean;
use crate::weather::WeatherSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

/// Both stores, loaded and joined.
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub views: Vec<BillView>,
    pub weather: Vec<DailyTemperature>,
    pub notices: Vec<Notice>,
}

impl DashboardData {
    /// Reads both stores. Missing or unreadable files become notices, never errors.
    pub fn load(config: &MonitorConfig) -> Self {
        let mut notices = Vec::new();
        let bill_store = BillStore::new(&config.bills_file);
        let weather_store = WeatherStore::new(&config.weather_file);

        let bills = match bill_store.load() {
            Ok(Some(bills)) => bills,
            Ok(None) => {
                notices.push(Notice::error(format!(
                    "File {} not found.",
                    bill_store.path().display()
                )));
                return Self {
                    notices,
                    ..Default::default()
                };
            }
            Err(e) => {
                notices.push(Notice::error(format!(
                    "Could not read {}: {}",
                    bill_store.path().display(),
                    e
                )));
                return Self {
                    notices,
                    ..Default::default()
                };
            }
        };

        let weather = match weather_store.load() {
            Ok(Some(history)) => history.days().unwrap_or_else(|e| {
                notices.push(Notice::warning(format!("Weather history is malformed: {}", e)));
                Vec::new()
            }),
            Ok(None) => {
                notices.push(Notice::warning(format!(
                    "File {} not found. Weather data will not be shown.",
                    weather_store.path().display()
                )));
                Vec::new()
            }
            Err(e) => {
                notices.push(Notice::warning(format!(
                    "Could not read {}: {}",
                    weather_store.path().display(),
                    e
                )));
                Vec::new()
            }
        };

        Self::from_parts(&bills, weather, notices)
    }

    pub fn from_parts(
        bills: &[BillRecord],
        weather: Vec<DailyTemperature>,
        notices: Vec<Notice>,
    ) -> Self {
        Self {
            views: derive_bill_views(bills, &weather),
            weather,
            notices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_spent: f64,
    pub total_consumption_kwh: f64,
    pub average_bill: Option<f64>,
    pub average_temperature: Option<f64>,
}

impl Kpis {
    pub fn from_views(views: &[BillView]) -> Self {
        let totals: Vec<f64> = views.iter().filter_map(|v| v.total_amount).collect();
        let consumption: Vec<f64> = views.iter().filter_map(|v| v.consumption_kwh).collect();
        let temps: Vec<f64> = views.iter().filter_map(|v| v.trailing_mean_temp).collect();

        Self {
            total_spent: totals.iter().sum(),
            total_consumption_kwh: consumption.iter().sum(),
            average_bill: mean(&totals),
            average_temperature: mean(&temps),
        }
    }
}

/// One bar/line pair of the consumption vs. temperature chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub label: String,
    pub consumption_kwh: Option<f64>,
    pub mean_temperature: Option<f64>,
    pub is_estimate: bool,
}

/// One bubble of the temperature vs. cost chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub label: String,
    pub temperature: f64,
    pub total_amount: f64,
    /// Bubble size.
    pub consumption_kwh: Option<f64>,
    pub flag: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub kpis: Kpis,
    pub timeline: Vec<TimelinePoint>,
    pub scatter: Vec<ScatterPoint>,
    pub table: Vec<BillView>,
    pub projection: Option<Projection>,
    pub notices: Vec<Notice>,
}

impl DashboardReport {
    pub fn build(data: &DashboardData, projection: Option<Projection>, notices: Vec<Notice>) -> Self {
        let mut timeline: Vec<TimelinePoint> = data
            .views
            .iter()
            .map(|v| TimelinePoint {
                label: v.reference_month.clone(),
                consumption_kwh: v.consumption_kwh,
                mean_temperature: v.trailing_mean_temp,
                is_estimate: false,
            })
            .collect();
        if let Some(projection) = &projection {
            let view = projection.to_view();
            timeline.push(TimelinePoint {
                label: view.reference_month,
                consumption_kwh: view.consumption_kwh,
                mean_temperature: view.trailing_mean_temp,
                is_estimate: true,
            });
        }

        let scatter = if data.weather.is_empty() {
            Vec::new()
        } else {
            data.views
                .iter()
                .filter_map(|v| {
                    let flag = v.tariff_flag.clone().unwrap_or(TariffFlag::Green);
                    Some(ScatterPoint {
                        label: v.reference_month.clone(),
                        temperature: v.trailing_mean_temp?,
                        total_amount: v.total_amount?,
                        consumption_kwh: v.consumption_kwh,
                        flag: flag.label().to_string(),
                        color: flag.color().to_string(),
                    })
                })
                .collect()
        };

        Self {
            kpis: Kpis::from_views(&data.views),
            timeline,
            scatter,
            table: data.views.clone(),
            projection,
            notices,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let opt = |value: Option<f64>, precision: usize| match value {
            Some(v) => format!("{:.*}", precision, v),
            None => "-".to_string(),
        };

        for notice in &self.notices {
            let tag = match notice.level {
                NoticeLevel::Error => "ERROR",
                NoticeLevel::Warning => "WARNING",
            };
            let _ = writeln!(out, "[{}] {}", tag, notice.message);
        }
        if !self.notices.is_empty() {
            out.push('\n');
        }

        if self.is_empty() {
            out.push_str("No data to display.\n");
            return out;
        }

        let _ = writeln!(out, "Electricity bills & weather");
        let _ = writeln!(out, "  Total spent        R$ {:.2}", self.kpis.total_spent);
        let _ = writeln!(
            out,
            "  Total consumption  {} kWh",
            self.kpis.total_consumption_kwh
        );
        let _ = writeln!(
            out,
            "  Average bill       R$ {}",
            opt(self.kpis.average_bill, 2)
        );
        let _ = writeln!(
            out,
            "  Average temp.      {}",
            self.kpis
                .average_temperature
                .map(|t| format!("{:.1} °C", t))
                .unwrap_or_else(|| "N/A".to_string())
        );

        let _ = writeln!(out, "\nConsumption vs. temperature");
        let _ = writeln!(out, "  {:<22} {:>10} {:>8}", "Month", "kWh", "°C");
        for point in &self.timeline {
            let label = if point.is_estimate {
                format!("{} (est.)", point.label)
            } else {
                point.label.clone()
            };
            let _ = writeln!(
                out,
                "  {:<22} {:>10} {:>8}",
                label,
                opt(point.consumption_kwh, 0),
                opt(point.mean_temperature, 1)
            );
        }

        if !self.scatter.is_empty() {
            let _ = writeln!(out, "\nTemperature vs. cost");
            let _ = writeln!(
                out,
                "  {:<22} {:>8} {:>12} {:>8}  {}",
                "Month", "°C", "R$", "kWh", "Flag"
            );
            for point in &self.scatter {
                let _ = writeln!(
                    out,
                    "  {:<22} {:>8.1} {:>12.2} {:>8}  {}",
                    point.label,
                    point.temperature,
                    point.total_amount,
                    opt(point.consumption_kwh, 0),
                    point.flag
                );
            }
        }

        if let Some(p) = &self.projection {
            let _ = writeln!(
                out,
                "\nForecast for {} ({} to {})",
                p.reference_month, p.cycle_start, p.cycle_end
            );
            let _ = writeln!(
                out,
                "  Hybrid temperature  {:.1} °C ({} observed, {} forecast, {} padded days)",
                p.hybrid_avg_temp, p.observed_days, p.forecast_days, p.padded_days
            );
            let _ = writeln!(
                out,
                "  Consumption         {:.0} kWh ({:.2} kWh/°C)",
                p.predicted_consumption, p.avg_factor
            );
            let _ = writeln!(
                out,
                "  Cost                R$ {:.2} (R$ {:.3}/kWh)",
                p.predicted_cost, p.avg_cost_per_unit
            );
        }

        let _ = writeln!(out, "\nDetails");
        let _ = writeln!(
            out,
            "  {:<22} {:>10} {:>8} {:<20} {:>6}  {}",
            "Month", "R$", "kWh", "Flag", "°C", "Due"
        );
        for view in &self.table {
            let flag = view
                .tariff_flag
                .as_ref()
                .map(|f| f.label().to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<22} {:>10} {:>8} {:<20} {:>6}  {}",
                view.reference_month,
                opt(view.total_amount, 2),
                opt(view.consumption_kwh, 0),
                flag,
                opt(view.trailing_mean_temp, 1),
                view.due_date.as_deref().unwrap_or("-")
            );
        }

        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub new_bills: usize,
    pub weather_updated: bool,
}

impl RefreshOutcome {
    pub fn message(&self) -> String {
        let mut msg = format!("Success! {} new bill(s) processed.", self.new_bills);
        if self.weather_updated {
            msg.push_str(" Weather updated.");
        }
        msg
    }
}

pub struct Dashboard<W> {
    config: MonitorConfig,
    weather_source: W,
    cache: Option<DashboardData>,
}

impl<W: WeatherSource + Sync> Dashboard<W> {
    pub fn new(config: MonitorConfig, weather_source: W) -> Self {
        Self {
            config,
            weather_source,
            cache: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// Builds the report for `today`. A failed projection turns into a warning.
    pub async fn report(&mut self, today: NaiveDate) -> DashboardReport {
        let data = self
            .cache
            .get_or_insert_with(|| DashboardData::load(&self.config));
        let mut notices = data.notices.clone();

        let projection = if data.views.is_empty() {
            None
        } else {
            match project_open_cycle(&data.views, &data.weather, &self.weather_source, today).await
            {
                Ok(projection) => projection,
                Err(e) => {
                    warn!("Forecast unavailable: {}", e);
                    notices.push(Notice::warning(format!("Could not compute forecast: {}", e)));
                    None
                }
            }
        };

        DashboardReport::build(data, projection, notices)
    }

    /// Extracts new bills, brings the weather history up to date and drops the cached data.
    #[cfg(feature = "gemini")]
    pub async fn refresh<B: crate::llm::BillSource>(
        &mut self,
        bill_source: B,
        today: NaiveDate,
    ) -> crate::error::Result<RefreshOutcome> {
        let bills = BillStore::new(&self.config.bills_file);
        let new_bills = crate::llm::BillExtractor::new(bill_source, bills.clone())
            .with_item_delay(self.config.item_delay)
            .process_directory(&self.config.bills_dir)
            .await?;

        let updater = crate::weather::WeatherUpdater::new(
            &self.weather_source,
            WeatherStore::new(&self.config.weather_file),
            bills,
        );
        let weather_updated = updater.update(today).await;

        self.clear_cache();
        let outcome = RefreshOutcome {
            new_bills,
            weather_updated,
        };
        log::info!("{}", outcome.message());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BillExtraction;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bill(month: &str, reading: &str, total: f64, kwh: f64, flag: Option<&str>) -> BillRecord {
        BillRecord::new(
            BillExtraction {
                total_amount: Some(total),
                reference_month: Some(month.to_string()),
                consumption_kwh: Some(kwh),
                current_reading: Some(reading.to_string()),
                tariff_flag: flag.map(str::to_string),
                ..Default::default()
            },
            format!("{}.pdf", month.replace('/', "_")),
            "2024-03-01 12:00:00",
        )
    }

    fn flat_weather(start: NaiveDate, days: usize, mean: f64) -> Vec<DailyTemperature> {
        start
            .iter_days()
            .take(days)
            .map(|date| DailyTemperature {
                date,
                max: None,
                min: None,
                mean: Some(mean),
            })
            .collect()
    }

    #[test]
    fn test_report_series() {
        let bills = vec![
            bill("FEVEREIRO/2024", "10/02/2024", 300.0, 400.0, Some("Amarela")),
            bill("JANEIRO/2024", "10/01/2024", 200.0, 250.0, None),
            bill("SEM LEITURA", "??", 999.0, 999.0, None),
        ];
        let weather = flat_weather(date(2023, 12, 1), 80, 25.0);
        let data = DashboardData::from_parts(&bills, weather, Vec::new());

        let report = DashboardReport::build(&data, None, Vec::new());
        assert_eq!(report.table.len(), 2);
        assert_eq!(report.timeline[0].label, "JANEIRO/2024");
        assert_eq!(report.kpis.total_spent, 500.0);
        assert_eq!(report.kpis.total_consumption_kwh, 650.0);
        assert_eq!(report.kpis.average_bill, Some(250.0));
        assert_eq!(report.kpis.average_temperature, Some(25.0));

        assert_eq!(report.scatter.len(), 2);
        assert_eq!(report.scatter[0].flag, "Verde");
        assert_eq!(report.scatter[1].color, "yellow");

        let text = report.render_text();
        assert!(text.contains("R$ 500.00"));
        assert!(text.contains("FEVEREIRO/2024"));
    }

    #[test]
    fn test_scatter_needs_weather() {
        let bills = vec![bill("JANEIRO/2024", "10/01/2024", 200.0, 250.0, None)];
        let data = DashboardData::from_parts(&bills, Vec::new(), Vec::new());
        let report = DashboardReport::build(&data, None, Vec::new());

        assert!(report.scatter.is_empty());
        assert_eq!(report.kpis.average_temperature, None);
        assert!(report.render_text().contains("N/A"));
    }

    #[test]
    fn test_empty_report_renders_notices() {
        let data = DashboardData::default();
        let report = DashboardReport::build(
            &data,
            None,
            vec![Notice::error("File bills_history.json not found.")],
        );
        let text = report.render_text();
        assert!(text.starts_with("[ERROR] File bills_history.json not found."));
        assert!(text.contains("No data to display."));
    }

    #[test]
    fn test_refresh_message() {
        let outcome = RefreshOutcome {
            new_bills: 2,
            weather_updated: true,
        };
        assert_eq!(
            outcome.message(),
            "Success! 2 new bill(s) processed. Weather updated."
        );
        let outcome = RefreshOutcome {
            new_bills: 0,
            weather_updated: false,
        };
        assert_eq!(outcome.message(), "Success! 0 new bill(s) processed.");
    }
}
