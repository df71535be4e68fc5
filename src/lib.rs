//! # Bill Monitor
//!
//! Tracks household electricity bills against local temperature.
//!
//! ## Core Concepts
//!
//! - **Bill history**: one record per invoice PDF, extracted by a document model (Gemini) and
//!   keyed by the PDF's file name. Re-running the extractor only touches new files.
//! - **Weather history**: daily max/min/mean temperatures from Open-Meteo, kept contiguous and
//!   keyed by date.
//! - **Bill view**: a bill joined with the mean temperature of the 30 days before its reading.
//! - **Hybrid projection**: the open billing cycle's consumption, estimated from the average
//!   kWh-per-degree factor of past bills and a cycle temperature that blends recorded days with
//!   the forecast for the days ahead.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bill_monitor::*;
//! use chrono::Local;
//!
//! let config = MonitorConfig::from_env()?;
//! let mut dashboard = Dashboard::new(config.clone(), OpenMeteoClient::new(&config));
//!
//! let today = Local::now().date_naive();
//! let source = llm::GeminiBillSource::from_config(&config)?;
//! let outcome = dashboard.refresh(source, today).await?;
//! println!("{}", outcome.message());
//!
//! let report = dashboard.report(today).await;
//! println!("{}", report.render_text());
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod forecast;
pub mod schema;
pub mod store;
pub mod utils;
pub mod weather;

#[cfg(feature = "gemini")]
pub mod llm;

pub use config::{MonitorConfig, PollPolicy};
pub use dashboard::{
    Dashboard, DashboardData, DashboardReport, Kpis, Notice, NoticeLevel, RefreshOutcome,
    ScatterPoint, TimelinePoint,
};
pub use error::{BillMonitorError, Result};
pub use forecast::{
    derive_bill_views, efficiency_factors, hybrid_projection, pad_to_cycle, predict,
    project_open_cycle, trailing_mean_temperature, BillingCycle, EfficiencyFactors,
};
pub use schema::*;
pub use store::{BillStore, WeatherStore};
pub use weather::{OpenMeteoClient, WeatherSource, WeatherUpdate, WeatherUpdater};
