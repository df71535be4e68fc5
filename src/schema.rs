use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{BillMonitorError, Result};
use crate::utils::{format_weather_date, parse_bill_date, parse_weather_date};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ChargeItem {
    #[serde(rename = "descricao", alias = "description", default)]
    #[schemars(description = "Line description exactly as printed on the bill")]
    pub description: Option<String>,

    #[serde(rename = "valor", alias = "amount", default, deserialize_with = "lenient_amount")]
    #[schemars(description = "Line amount in BRL (negative for credits)")]
    pub amount: Option<f64>,
}

/// The fields the document model is asked to read off a bill.
///
/// Keys on the wire match the bill's own vocabulary so that history files written by earlier
/// runs keep loading. Every field is nullable: the model returns `null` for anything it cannot
/// find on the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct BillExtraction {
    #[serde(rename = "valor_total", default, deserialize_with = "lenient_amount")]
    #[schemars(description = "Total amount due on the bill, in BRL")]
    pub total_amount: Option<f64>,

    #[serde(rename = "mes_referencia")]
    #[schemars(description = "Reference month of the bill, e.g. \"JANEIRO/2024\"")]
    pub reference_month: Option<String>,

    #[serde(rename = "vencimento")]
    #[schemars(description = "Due date, DD/MM/YYYY")]
    pub due_date: Option<String>,

    #[serde(rename = "consumo_kwh", default, deserialize_with = "lenient_amount")]
    #[schemars(description = "Total billed consumption in kWh")]
    pub consumption_kwh: Option<f64>,

    #[serde(rename = "codigo_instalacao")]
    #[schemars(description = "Installation / customer code")]
    pub installation_code: Option<String>,

    #[serde(rename = "leitura_atual")]
    #[schemars(description = "Date of the current meter reading, DD/MM/YYYY")]
    pub current_reading: Option<String>,

    #[serde(rename = "leitura_proxima")]
    #[schemars(description = "Scheduled date of the next meter reading, DD/MM/YYYY")]
    pub next_reading: Option<String>,

    #[serde(rename = "bandeira_tarifaria")]
    #[schemars(description = "Tariff flag color in force: \"Verde\", \"Amarela\" or \"Vermelha\"")]
    pub tariff_flag: Option<String>,

    #[serde(rename = "adicional_bandeira", default, deserialize_with = "lenient_amount")]
    #[schemars(description = "Extra amount charged because of the tariff flag, or null")]
    pub flag_surcharge: Option<f64>,

    #[serde(rename = "detalhes_tarifas", default, deserialize_with = "null_as_empty")]
    #[schemars(description = "Itemized billing composition (description and amount)")]
    pub charges: Vec<ChargeItem>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a number, null, or a numeric string such as "312.45" or "R$ 1.234,56".
/// Text that is not a number reads as null.
fn lenient_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(text)) => parse_amount(&text),
        None => None,
    })
}

fn parse_amount(text: &str) -> Option<f64> {
    let cleaned = text.trim().trim_start_matches("R$").trim();
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.to_string()
    };
    normalized.parse().ok()
}

/// One processed invoice as persisted in the bill history store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillRecord {
    #[serde(flatten)]
    pub extraction: BillExtraction,

    /// File name of the source PDF; unique across the store.
    #[serde(rename = "arquivo_origem", default)]
    pub source_file: String,

    #[serde(rename = "data_processamento", default)]
    pub processed_at: Option<String>,

    /// Keys the extraction does not model, kept so that rewriting the store loses nothing.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl BillRecord {
    pub fn new(
        extraction: BillExtraction,
        source_file: impl Into<String>,
        processed_at: impl Into<String>,
    ) -> Self {
        Self {
            extraction,
            source_file: source_file.into(),
            processed_at: Some(processed_at.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Date of the meter reading that closed this bill, if present and parseable.
    pub fn reading_date(&self) -> Option<NaiveDate> {
        self.extraction
            .current_reading
            .as_deref()
            .and_then(|raw| parse_bill_date(raw).ok())
    }

    pub fn tariff_flag(&self) -> Option<TariffFlag> {
        self.extraction
            .tariff_flag
            .as_deref()
            .map(TariffFlag::from_label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TariffFlag {
    Green,
    Yellow,
    Red,
    /// Both yellow and red were in force during the cycle.
    YellowAndRed,
    Other(String),
}

impl TariffFlag {
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        let has_yellow = normalized.contains("amarela") || normalized.contains("yellow");
        let has_red = normalized.contains("vermelha") || normalized.contains("red");

        match (has_yellow, has_red) {
            (true, true) => TariffFlag::YellowAndRed,
            (true, false) => TariffFlag::Yellow,
            (false, true) => TariffFlag::Red,
            _ if normalized.contains("verde") || normalized.contains("green") => {
                TariffFlag::Green
            }
            _ => TariffFlag::Other(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TariffFlag::Green => "Verde",
            TariffFlag::Yellow => "Amarela",
            TariffFlag::Red => "Vermelha",
            TariffFlag::YellowAndRed => "Amarela e Vermelha",
            TariffFlag::Other(label) => label,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            TariffFlag::Green => "green",
            TariffFlag::Yellow => "yellow",
            TariffFlag::Red => "red",
            TariffFlag::YellowAndRed => "orange",
            TariffFlag::Other(_) => "gray",
        }
    }
}

pub const FIELD_TIME: &str = "time";
pub const FIELD_TEMP_MAX: &str = "temperature_2m_max";
pub const FIELD_TEMP_MIN: &str = "temperature_2m_min";
pub const FIELD_TEMP_MEAN: &str = "temperature_2m_mean";

/// Daily fields requested from the weather service.
pub const DAILY_TEMPERATURE_FIELDS: [&str; 3] = [FIELD_TEMP_MAX, FIELD_TEMP_MIN, FIELD_TEMP_MEAN];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyTemperature {
    pub date: NaiveDate,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub mean: Option<f64>,
}

/// Column-oriented daily weather history, shaped like the weather service's response.
///
/// `daily` maps a field name to its ordered list of values; `daily["time"]` holds the dates and
/// every list has the same length. Any other top-level keys of the service payload (coordinates,
/// units, ...) are kept as they came.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeatherHistory {
    #[serde(default)]
    pub daily: BTreeMap<String, Vec<Value>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WeatherHistory {
    pub fn from_days(days: &[DailyTemperature]) -> Self {
        let mut daily: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for day in days {
            daily
                .entry(FIELD_TIME.to_string())
                .or_default()
                .push(Value::from(format_weather_date(day.date)));
            for (field, value) in [
                (FIELD_TEMP_MAX, day.max),
                (FIELD_TEMP_MIN, day.min),
                (FIELD_TEMP_MEAN, day.mean),
            ] {
                daily
                    .entry(field.to_string())
                    .or_default()
                    .push(value.map(Value::from).unwrap_or(Value::Null));
            }
        }
        Self {
            daily,
            extra: serde_json::Map::new(),
        }
    }

    fn times(&self) -> &[Value] {
        self.daily.get(FIELD_TIME).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.times().len()
    }

    pub fn is_empty(&self) -> bool {
        self.times().is_empty()
    }

    pub fn last_date(&self) -> Result<Option<NaiveDate>> {
        match self.times().last() {
            Some(value) => {
                let raw = value.as_str().ok_or_else(|| {
                    BillMonitorError::WeatherData(format!("Non-string date value: {}", value))
                })?;
                Ok(Some(parse_weather_date(raw)?))
            }
            None => Ok(None),
        }
    }

    /// Row-oriented view of the temperature columns.
    pub fn days(&self) -> Result<Vec<DailyTemperature>> {
        let column = |field: &str, idx: usize| -> Option<f64> {
            self.daily
                .get(field)
                .and_then(|values| values.get(idx))
                .and_then(Value::as_f64)
        };

        self.times()
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let raw = value.as_str().ok_or_else(|| {
                    BillMonitorError::WeatherData(format!("Non-string date value: {}", value))
                })?;
                Ok(DailyTemperature {
                    date: parse_weather_date(raw)?,
                    max: column(FIELD_TEMP_MAX, idx),
                    min: column(FIELD_TEMP_MIN, idx),
                    mean: column(FIELD_TEMP_MEAN, idx),
                })
            })
            .collect()
    }

    /// Merges `incoming` into this history keyed by date and returns the number of rows added.
    ///
    /// An empty history takes `incoming` wholesale. Otherwise only rows whose date is not yet
    /// present are appended, one value per existing field (null when `incoming` lacks the
    /// field), and the result is kept in ascending date order.
    pub fn merge(&mut self, incoming: WeatherHistory) -> Result<usize> {
        if self.is_empty() {
            let added = incoming.len();
            *self = incoming;
            return Ok(added);
        }

        let mut known: HashSet<String> = self
            .times()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let incoming_times = incoming.daily.get(FIELD_TIME).ok_or_else(|| {
            BillMonitorError::WeatherData("Incoming weather data has no 'time' column".to_string())
        })?;

        let mut new_rows = Vec::new();
        for (idx, value) in incoming_times.iter().enumerate() {
            let raw = value.as_str().ok_or_else(|| {
                BillMonitorError::WeatherData(format!("Non-string date value: {}", value))
            })?;
            if known.insert(raw.to_string()) {
                new_rows.push(idx);
            }
        }

        for (field, values) in self.daily.iter_mut() {
            let source = incoming.daily.get(field);
            for &idx in &new_rows {
                let value = source
                    .and_then(|column| column.get(idx))
                    .cloned()
                    .unwrap_or(Value::Null);
                values.push(value);
            }
        }

        self.sort_by_date();
        Ok(new_rows.len())
    }

    fn sort_by_date(&mut self) {
        let times = self.times();
        let mut order: Vec<usize> = (0..times.len()).collect();
        // ISO dates order lexicographically.
        order.sort_by(|&a, &b| times[a].as_str().cmp(&times[b].as_str()));

        if order.iter().enumerate().all(|(pos, &idx)| pos == idx) {
            return;
        }

        for values in self.daily.values_mut() {
            let reordered = order
                .iter()
                .map(|&idx| values.get(idx).cloned().unwrap_or(Value::Null))
                .collect();
            *values = reordered;
        }
    }
}

/// A bill joined with the temperature of its consumption period, ready for display.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillView {
    pub reference_month: String,
    pub reading_date: NaiveDate,
    pub total_amount: Option<f64>,
    pub consumption_kwh: Option<f64>,
    pub tariff_flag: Option<TariffFlag>,
    pub due_date: Option<String>,
    /// Mean of the daily mean temperatures over the 30 days ending on the reading date.
    pub trailing_mean_temp: Option<f64>,
    pub source_file: Option<String>,
    /// Set on the synthetic row describing the still-open billing cycle.
    pub is_estimate: bool,
}

/// Hybrid projection for the open billing cycle. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Projection {
    pub reference_month: String,
    pub cycle_start: NaiveDate,
    pub cycle_end: NaiveDate,
    /// Days of the cycle covered by recorded temperatures.
    pub observed_days: usize,
    /// Days of the cycle covered by the weather forecast.
    pub forecast_days: usize,
    /// Entries added by padding to reach a full cycle. The forecast reaches at most 16 days
    /// ahead, so early in a cycle the days past that horizon are counted here as well.
    pub padded_days: usize,
    pub hybrid_avg_temp: f64,
    pub avg_factor: f64,
    pub avg_cost_per_unit: f64,
    pub predicted_consumption: f64,
    pub predicted_cost: f64,
}

impl Projection {
    pub fn to_view(&self) -> BillView {
        BillView {
            reference_month: self.reference_month.clone(),
            reading_date: self.cycle_end,
            total_amount: Some(self.predicted_cost),
            consumption_kwh: Some(self.predicted_consumption),
            tariff_flag: None,
            due_date: None,
            trailing_mean_temp: Some(self.hybrid_avg_temp),
            source_file: None,
            is_estimate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bill_record_reads_history_keys() {
        let raw = json!({
            "valor_total": 312.45,
            "mes_referencia": "JANEIRO/2024",
            "vencimento": "20/01/2024",
            "consumo_kwh": 410,
            "codigo_instalacao": "0412345678",
            "leitura_atual": "05/01/2024",
            "leitura_proxima": "05/02/2024",
            "bandeira_tarifaria": "Verde",
            "adicional_bandeira": null,
            "detalhes_tarifas": [
                { "descricao": "Consumo", "valor": 280.10 },
                { "descricao": "CIP", "valor": 32.35 }
            ],
            "arquivo_origem": "fatura_jan.pdf",
            "data_processamento": "2024-01-21 10:00:00"
        });

        let record: BillRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.source_file, "fatura_jan.pdf");
        assert_eq!(record.extraction.consumption_kwh, Some(410.0));
        assert_eq!(record.extraction.charges.len(), 2);
        assert_eq!(
            record.reading_date(),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(record.tariff_flag(), Some(TariffFlag::Green));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["arquivo_origem"], "fatura_jan.pdf");
        assert_eq!(back["leitura_atual"], "05/01/2024");
    }

    #[test]
    fn test_bill_record_tolerates_missing_fields() {
        let record: BillRecord =
            serde_json::from_value(json!({ "arquivo_origem": "a.pdf" })).unwrap();
        assert_eq!(record.extraction, BillExtraction::default());
        assert_eq!(record.reading_date(), None);
        assert_eq!(record.tariff_flag(), None);
    }

    #[test]
    fn test_bill_record_accepts_nulls_and_numeric_strings() {
        let record: BillRecord = serde_json::from_value(json!({
            "valor_total": "R$ 1.234,56",
            "consumo_kwh": "410",
            "adicional_bandeira": "não se aplica",
            "detalhes_tarifas": null,
            "arquivo_origem": "fatura_fev.pdf"
        }))
        .unwrap();

        assert_eq!(record.extraction.total_amount, Some(1234.56));
        assert_eq!(record.extraction.consumption_kwh, Some(410.0));
        assert_eq!(record.extraction.flag_surcharge, None);
        assert!(record.extraction.charges.is_empty());

        let charges: BillExtraction = serde_json::from_value(json!({
            "detalhes_tarifas": [{ "descricao": "CIP", "valor": "32,35" }, { "descricao": null, "valor": null }]
        }))
        .unwrap();
        assert_eq!(charges.charges[0].amount, Some(32.35));
        assert_eq!(charges.charges[1], ChargeItem { description: None, amount: None });
    }

    #[test]
    fn test_bill_record_keeps_unmodeled_keys() {
        let raw = json!({
            "valor_total": 98.1,
            "numero_cliente": "X1",
            "medidor": { "numero": 778 },
            "arquivo_origem": "fatura_mar.pdf",
            "data_processamento": "2024-03-21 10:00:00"
        });

        let record: BillRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.extra["numero_cliente"], json!("X1"));
        assert!(!record.extra.contains_key("valor_total"));
        assert!(!record.extra.contains_key("arquivo_origem"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["numero_cliente"], raw["numero_cliente"]);
        assert_eq!(back["medidor"], raw["medidor"]);
        assert_eq!(back["valor_total"], json!(98.1));
    }

    #[test]
    fn test_tariff_flag_labels() {
        assert_eq!(TariffFlag::from_label("Verde"), TariffFlag::Green);
        assert_eq!(TariffFlag::from_label("AMARELA"), TariffFlag::Yellow);
        assert_eq!(TariffFlag::from_label("Vermelha - Patamar 1"), TariffFlag::Red);
        assert_eq!(
            TariffFlag::from_label("Amarela e Vermelha"),
            TariffFlag::YellowAndRed
        );
        assert_eq!(
            TariffFlag::from_label("Escassez Hídrica"),
            TariffFlag::Other("Escassez Hídrica".to_string())
        );
        assert_eq!(TariffFlag::YellowAndRed.color(), "orange");
    }

    #[test]
    fn test_merge_appends_later_dates() {
        let mut existing: WeatherHistory = serde_json::from_value(json!({
            "daily": { "time": ["2024-01-01"], "temperature_2m_mean": [20] }
        }))
        .unwrap();
        let incoming: WeatherHistory = serde_json::from_value(json!({
            "daily": { "time": ["2024-01-02"], "temperature_2m_mean": [22] }
        }))
        .unwrap();

        let added = existing.merge(incoming).unwrap();
        assert_eq!(added, 1);
        assert_eq!(
            serde_json::to_value(&existing.daily).unwrap(),
            json!({ "time": ["2024-01-01", "2024-01-02"], "temperature_2m_mean": [20, 22] })
        );
    }

    #[test]
    fn test_merge_skips_duplicate_dates_and_keeps_order() {
        let d = |day: u32, mean: f64| DailyTemperature {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            max: Some(mean + 4.0),
            min: Some(mean - 4.0),
            mean: Some(mean),
        };
        let mut existing = WeatherHistory::from_days(&[d(2, 21.0), d(3, 22.0)]);
        let incoming = WeatherHistory::from_days(&[d(1, 20.0), d(3, 99.0), d(4, 23.0)]);

        let added = existing.merge(incoming).unwrap();
        assert_eq!(added, 2);

        let days = existing.days().unwrap();
        let dates: Vec<u32> = days.iter().map(|d| chrono::Datelike::day(&d.date)).collect();
        assert_eq!(dates, vec![1, 2, 3, 4]);
        assert_eq!(days[2].mean, Some(22.0));
        assert_eq!(existing.daily[FIELD_TEMP_MAX].len(), 4);
    }

    #[test]
    fn test_merge_into_empty_takes_incoming() {
        let mut existing = WeatherHistory::default();
        let incoming: WeatherHistory = serde_json::from_value(json!({
            "latitude": -22.84,
            "daily": { "time": ["2024-01-01"], "temperature_2m_mean": [20.5] }
        }))
        .unwrap();

        assert_eq!(existing.merge(incoming.clone()).unwrap(), 1);
        assert_eq!(existing, incoming);
        assert_eq!(existing.extra["latitude"], json!(-22.84));
    }

    #[test]
    fn test_merge_pads_missing_fields_with_null() {
        let mut existing: WeatherHistory = serde_json::from_value(json!({
            "daily": { "time": ["2024-01-01"], "temperature_2m_max": [25], "temperature_2m_mean": [20] }
        }))
        .unwrap();
        let incoming: WeatherHistory = serde_json::from_value(json!({
            "daily": { "time": ["2024-01-02"], "temperature_2m_mean": [22] }
        }))
        .unwrap();

        existing.merge(incoming).unwrap();
        assert_eq!(existing.daily[FIELD_TEMP_MAX], vec![json!(25), Value::Null]);
    }
}
