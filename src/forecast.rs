//! Consumption/temperature correlation and the hybrid projection of the open billing cycle.
//!
//! Every historical bill yields an *efficiency factor* (kWh per °C of trailing mean
//! temperature) and a cost per kWh. The open cycle's consumption is projected as the average
//! factor times the cycle's mean temperature, where the cycle mean blends temperatures already
//! recorded with the forecast for the days still ahead.

use chrono::{Duration, NaiveDate};
use log::{debug, info};

use crate::error::{BillMonitorError, Result};
use crate::schema::{BillRecord, BillView, DailyTemperature, Projection};
use crate::utils::{days_inclusive, mean, month_label};
use crate::weather::{WeatherSource, MAX_FORECAST_DAYS};

pub const CYCLE_DAYS: usize = 30;
pub const TRAILING_WINDOW_DAYS: i64 = 30;
/// Used for padding when no temperature at all is known for the cycle.
pub const FALLBACK_TEMPERATURE: f64 = 25.0;
/// Extra forecast days requested beyond the end of the cycle.
pub const FORECAST_MARGIN_DAYS: u64 = 5;
/// Offset from the cycle start that picks the month a projection is labeled with.
pub const LABEL_OFFSET_DAYS: i64 = 15;

/// Mean of the daily mean temperatures in `[reading_date - 30 days, reading_date]`.
pub fn trailing_mean_temperature(days: &[DailyTemperature], reading_date: NaiveDate) -> Option<f64> {
    let window_start = reading_date - Duration::days(TRAILING_WINDOW_DAYS);
    let temps: Vec<f64> = days
        .iter()
        .filter(|d| d.date >= window_start && d.date <= reading_date)
        .filter_map(|d| d.mean)
        .collect();
    mean(&temps)
}

/// Joins every bill with its trailing mean temperature, sorted by reading date.
///
/// Bills without a parseable reading date are left out.
pub fn derive_bill_views(bills: &[BillRecord], days: &[DailyTemperature]) -> Vec<BillView> {
    let mut views: Vec<BillView> = bills
        .iter()
        .filter_map(|bill| {
            let reading_date = bill.reading_date()?;
            let extraction = &bill.extraction;
            Some(BillView {
                reference_month: extraction
                    .reference_month
                    .clone()
                    .unwrap_or_else(|| month_label(reading_date)),
                reading_date,
                total_amount: extraction.total_amount,
                consumption_kwh: extraction.consumption_kwh,
                tariff_flag: bill.tariff_flag(),
                due_date: extraction.due_date.clone(),
                trailing_mean_temp: trailing_mean_temperature(days, reading_date),
                source_file: Some(bill.source_file.clone()),
                is_estimate: false,
            })
        })
        .collect();

    views.sort_by_key(|v| v.reading_date);
    views
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyFactors {
    /// Average kWh per °C of trailing mean temperature.
    pub avg_factor: f64,
    pub avg_cost_per_unit: f64,
    /// Number of bills the factor was averaged over.
    pub sample_size: usize,
}

/// Averages the per-bill efficiency factor and cost per kWh over the usable bills.
///
/// A bill is usable when both its consumption and trailing temperature are known and non-zero.
/// The cost average only takes bills that also carry a total amount.
pub fn efficiency_factors(views: &[BillView]) -> Result<EfficiencyFactors> {
    let mut factors = Vec::new();
    let mut costs = Vec::new();

    for view in views.iter().filter(|v| !v.is_estimate) {
        let (Some(consumption), Some(temp)) = (view.consumption_kwh, view.trailing_mean_temp)
        else {
            continue;
        };
        if consumption == 0.0 || temp == 0.0 {
            continue;
        }

        factors.push(consumption / temp);
        if let Some(total) = view.total_amount {
            costs.push(total / consumption);
        }
    }

    let avg_factor = mean(&factors).ok_or_else(|| {
        BillMonitorError::InsufficientData(
            "no bill has both consumption and a trailing mean temperature".to_string(),
        )
    })?;

    Ok(EfficiencyFactors {
        avg_factor,
        avg_cost_per_unit: mean(&costs).unwrap_or(0.0),
        sample_size: factors.len(),
    })
}

/// The open billing cycle following the most recent reading. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingCycle {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingCycle {
    pub fn after(last_reading: NaiveDate) -> Self {
        let start = last_reading + Duration::days(1);
        Self {
            start,
            end: start + Duration::days(CYCLE_DAYS as i64 - 1),
        }
    }

    /// Whether `today` is past the first day of the cycle, i.e. at least one day has elapsed.
    pub fn has_started(&self, today: NaiveDate) -> bool {
        today > self.start
    }

    /// Days from the cycle start through yesterday, clamped to the cycle.
    pub fn elapsed(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let yesterday = today - Duration::days(1);
        (self.start, yesterday.min(self.end))
    }

    /// Days from today through the cycle end; zero once the cycle is over.
    pub fn remaining_days(&self, today: NaiveDate) -> u64 {
        days_inclusive(today, self.end)
    }

    pub fn label(&self) -> String {
        month_label(self.start + Duration::days(LABEL_OFFSET_DAYS))
    }
}

/// Pads `temps` up to a full cycle with the mean of what is already there, or with
/// [`FALLBACK_TEMPERATURE`] when it is empty. Returns how many entries were added.
pub fn pad_to_cycle(temps: &mut Vec<f64>) -> usize {
    if temps.len() >= CYCLE_DAYS {
        return 0;
    }
    let fill = mean(temps).unwrap_or(FALLBACK_TEMPERATURE);
    let missing = CYCLE_DAYS - temps.len();
    temps.resize(CYCLE_DAYS, fill);
    missing
}

/// Returns `(predicted_consumption, predicted_cost)`.
pub fn predict(avg_factor: f64, hybrid_avg_temp: f64, avg_cost_per_unit: f64) -> (f64, f64) {
    let consumption = avg_factor * hybrid_avg_temp;
    (consumption, consumption * avg_cost_per_unit)
}

/// Builds the projection from temperatures already gathered for the cycle.
pub fn hybrid_projection(
    factors: &EfficiencyFactors,
    cycle: &BillingCycle,
    observed: &[f64],
    forecast: &[f64],
) -> Projection {
    let mut temps: Vec<f64> = observed.iter().chain(forecast).copied().collect();
    let padded_days = pad_to_cycle(&mut temps);
    let hybrid_avg_temp = mean(&temps).unwrap_or(FALLBACK_TEMPERATURE);
    let (predicted_consumption, predicted_cost) =
        predict(factors.avg_factor, hybrid_avg_temp, factors.avg_cost_per_unit);

    Projection {
        reference_month: cycle.label(),
        cycle_start: cycle.start,
        cycle_end: cycle.end,
        observed_days: observed.len(),
        forecast_days: forecast.len(),
        padded_days,
        hybrid_avg_temp,
        avg_factor: factors.avg_factor,
        avg_cost_per_unit: factors.avg_cost_per_unit,
        predicted_consumption,
        predicted_cost,
    }
}

fn means_between(days: &[DailyTemperature], start: NaiveDate, end: NaiveDate) -> Vec<f64> {
    days.iter()
        .filter(|d| d.date >= start && d.date <= end)
        .filter_map(|d| d.mean)
        .collect()
}

/// Projects consumption and cost of the billing cycle that is still open on `today`.
///
/// Returns `Ok(None)` when there are no bills or the cycle has not started yet.
pub async fn project_open_cycle<S: WeatherSource + ?Sized>(
    views: &[BillView],
    history: &[DailyTemperature],
    source: &S,
    today: NaiveDate,
) -> Result<Option<Projection>> {
    let Some(last_reading) = views
        .iter()
        .filter(|v| !v.is_estimate)
        .map(|v| v.reading_date)
        .max()
    else {
        return Ok(None);
    };

    let cycle = BillingCycle::after(last_reading);
    if !cycle.has_started(today) {
        debug!("Billing cycle starting {} has not started yet", cycle.start);
        return Ok(None);
    }

    let factors = efficiency_factors(views)?;

    let (elapsed_start, elapsed_end) = cycle.elapsed(today);
    let observed = means_between(history, elapsed_start, elapsed_end);

    let remaining = cycle.remaining_days(today);
    let forecast = if remaining > 0 {
        let horizon = (remaining + FORECAST_MARGIN_DAYS).min(MAX_FORECAST_DAYS as u64) as u32;
        let upcoming = source.fetch_forecast(horizon).await?.days()?;
        means_between(&upcoming, today, cycle.end)
    } else {
        Vec::new()
    };

    let projection = hybrid_projection(&factors, &cycle, &observed, &forecast);
    info!(
        "Projected {}: {:.0} kWh, R$ {:.2} (hybrid temp {:.1} °C from {} observed, {} forecast, {} padded days)",
        projection.reference_month,
        projection.predicted_consumption,
        projection.predicted_cost,
        projection.hybrid_avg_temp,
        projection.observed_days,
        projection.forecast_days,
        projection.padded_days
    );
    Ok(Some(projection))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day(date: NaiveDate, mean: f64) -> DailyTemperature {
        DailyTemperature {
            date,
            max: None,
            min: None,
            mean: Some(mean),
        }
    }

    fn view(reading_date: NaiveDate, consumption: f64, temp: f64, total: f64) -> BillView {
        BillView {
            reference_month: month_label(reading_date),
            reading_date,
            total_amount: Some(total),
            consumption_kwh: Some(consumption),
            tariff_flag: None,
            due_date: None,
            trailing_mean_temp: Some(temp),
            source_file: None,
            is_estimate: false,
        }
    }

    #[test]
    fn test_trailing_window_bounds() {
        let reading = date(2024, 2, 15);
        let days = vec![
            day(date(2024, 1, 15), 100.0),
            day(date(2024, 1, 16), 20.0),
            day(date(2024, 2, 15), 30.0),
            day(date(2024, 2, 16), 100.0),
        ];
        assert_eq!(trailing_mean_temperature(&days, reading), Some(25.0));
        assert_eq!(trailing_mean_temperature(&days, date(2023, 6, 1)), None);
    }

    #[test]
    fn test_efficiency_factors_average_independently() {
        let views = vec![
            view(date(2024, 1, 5), 300.0, 30.0, 240.0),
            view(date(2024, 2, 5), 200.0, 20.0, 200.0),
        ];
        let factors = efficiency_factors(&views).unwrap();
        assert_eq!(factors.avg_factor, 10.0);
        assert!((factors.avg_cost_per_unit - 0.9).abs() < 1e-9);
        assert_eq!(factors.sample_size, 2);
    }

    #[test]
    fn test_efficiency_factors_need_a_usable_bill() {
        let mut v = view(date(2024, 1, 5), 300.0, 30.0, 240.0);
        v.trailing_mean_temp = None;
        assert!(matches!(
            efficiency_factors(&[v]),
            Err(BillMonitorError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_padding_reaches_a_full_cycle() {
        let mut temps = vec![20.0, 22.0, 24.0];
        assert_eq!(pad_to_cycle(&mut temps), 27);
        assert_eq!(temps.len(), CYCLE_DAYS);
        assert!(temps[3..].iter().all(|t| *t == 22.0));

        let mut empty = Vec::new();
        assert_eq!(pad_to_cycle(&mut empty), 30);
        assert!(empty.iter().all(|t| *t == FALLBACK_TEMPERATURE));

        let mut full = vec![21.0; CYCLE_DAYS];
        assert_eq!(pad_to_cycle(&mut full), 0);
    }

    #[test]
    fn test_prediction_arithmetic() {
        let (consumption, cost) = predict(10.0, 25.0, 0.8);
        assert_eq!(consumption, 250.0);
        assert!((cost - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_billing_cycle_geometry() {
        let cycle = BillingCycle::after(date(2026, 10, 5));
        assert_eq!(cycle.start, date(2026, 10, 6));
        assert_eq!(cycle.end, date(2026, 11, 4));
        assert_eq!(cycle.label(), "OUTUBRO/2026");

        assert!(!cycle.has_started(date(2026, 10, 6)));
        assert!(cycle.has_started(date(2026, 10, 7)));

        let today = date(2026, 10, 18);
        assert_eq!(cycle.elapsed(today), (date(2026, 10, 6), date(2026, 10, 17)));
        assert_eq!(cycle.remaining_days(today), 18);
        assert_eq!(cycle.remaining_days(date(2026, 11, 10)), 0);
        assert_eq!(
            cycle.elapsed(date(2026, 11, 10)),
            (date(2026, 10, 6), date(2026, 11, 4))
        );
    }

    #[test]
    fn test_hybrid_projection_blends_observed_and_forecast() {
        let factors = EfficiencyFactors {
            avg_factor: 10.0,
            avg_cost_per_unit: 0.8,
            sample_size: 3,
        };
        let cycle = BillingCycle::after(date(2024, 1, 31));
        let observed = vec![24.0; 10];
        let forecast = vec![26.0; 20];

        let projection = hybrid_projection(&factors, &cycle, &observed, &forecast);
        assert_eq!(projection.padded_days, 0);
        assert!((projection.hybrid_avg_temp - 25.333333333333332).abs() < 1e-9);
        assert!((projection.predicted_consumption - 253.33333333333331).abs() < 1e-9);
        assert_eq!(projection.reference_month, "FEVEREIRO/2024");
        assert!(projection.to_view().is_estimate);
    }
}
