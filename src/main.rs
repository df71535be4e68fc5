use bill_monitor::llm::{BillExtractor, GeminiBillSource};
use bill_monitor::{
    BillStore, Dashboard, MonitorConfig, OpenMeteoClient, WeatherStore, WeatherUpdater,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

/// Electricity bill monitor.
/// Extracts bill PDFs with Gemini, keeps a daily temperature history from Open-Meteo and
/// reports consumption against temperature, with a projection for the open billing cycle.
#[derive(Parser, Debug)]
#[command(version, long_about)]
struct Cli {
    /// Directory holding the bill PDFs.
    #[arg(long, global = true)]
    bills_dir: Option<PathBuf>,
    /// Bill history JSON file.
    #[arg(long, global = true)]
    bills_file: Option<PathBuf>,
    /// Weather history JSON file.
    #[arg(long, global = true)]
    weather_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract bills that are not in the history yet.
    Extract,
    /// Bring the weather history up to date.
    Weather,
    /// Extract new bills, update the weather and print the report.
    Refresh,
    /// Print the dashboard report.
    Report {
        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn config(&self) -> bill_monitor::Result<MonitorConfig> {
        let mut config = MonitorConfig::from_env()?;
        if let Some(dir) = &self.bills_dir {
            config.bills_dir = dir.clone();
        }
        if let Some(file) = &self.bills_file {
            config.bills_file = file.clone();
        }
        if let Some(file) = &self.weather_file {
            config.weather_file = file.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = cli.config()?;
    let today = Local::now().date_naive();
    let weather = OpenMeteoClient::new(&config);

    match cli.command {
        Command::Extract => {
            let source = GeminiBillSource::from_config(&config)?;
            let count = BillExtractor::new(source, BillStore::new(&config.bills_file))
                .with_item_delay(config.item_delay)
                .process_directory(&config.bills_dir)
                .await?;
            println!("{} new bill(s) added.", count);
        }
        Command::Weather => {
            let updater = WeatherUpdater::new(
                weather,
                WeatherStore::new(&config.weather_file),
                BillStore::new(&config.bills_file),
            );
            if !updater.update(today).await {
                return Err("weather update failed".into());
            }
        }
        Command::Refresh => {
            let source = GeminiBillSource::from_config(&config)?;
            let mut dashboard = Dashboard::new(config, weather);
            match dashboard.refresh(source, today).await {
                Ok(outcome) => println!("{}\n", outcome.message()),
                Err(e) => eprintln!("Error while updating: {}\n", e),
            }
            print!("{}", dashboard.report(today).await.render_text());
        }
        Command::Report { json } => {
            let mut dashboard = Dashboard::new(config, weather);
            let report = dashboard.report(today).await;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_text());
            }
        }
    }

    Ok(())
}
