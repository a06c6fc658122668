use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triage_core::{
    DataSource, LabKind, PatientRecord, PriorityLevel, ReqwestTransport, TriageConfig,
};
use triage_fhir::{CallbackParams, FileTokenStore};
use triage_service::{FetchOutcome, NotificationLevel, PatientDataService, TriageBoard};

#[derive(Parser, Debug)]
#[command(
    name = "triage-cli",
    about = "Fetch lab results and print the patient triage board."
)]
struct Args {
    /// Data source: legacy-vitals, fhir or mock.
    #[arg(short, long, default_value = "mock")]
    source: DataSource,

    /// Number of patients to request. Defaults to the configured count.
    #[arg(short, long)]
    count: Option<usize>,

    /// JSON configuration file. `TRIAGE_*` variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the Epic session is kept between runs.
    #[arg(long, default_value = ".triage/epic-session.json")]
    token_file: PathBuf,

    /// Full redirect URL received after authorizing with Epic.
    #[arg(long)]
    callback_url: Option<String>,

    /// Forget the stored Epic session and exit.
    #[arg(long)]
    logout: bool,

    /// Print the fetch outcome as JSON instead of a board.
    #[arg(long)]
    json: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TriageConfig> {
    let mut config = match path {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("could not read config file {path:?}"))?;
            TriageConfig::from_json_str(&data)?
        }
        None => TriageConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    tracing::debug!(source = %args.source, token_file = ?args.token_file, "configuration loaded");

    let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
    let store = Arc::new(FileTokenStore::new(&args.token_file));
    let service = PatientDataService::new(&config, transport, store)?;

    if args.logout {
        service.logout();
        println!("Epic session cleared.");
        return Ok(());
    }

    if let Some(url) = &args.callback_url {
        let params = CallbackParams::from_url(url)?;
        service
            .handle_callback(&params)
            .await
            .context("Epic authorization failed")?;
        println!("Authenticated with Epic.");
    }

    let count = args.count.unwrap_or(config.default_count);
    let outcome = service.fetch_patient_data(args.source, count).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if let Some(redirect) = &outcome.redirect {
        println!(
            "Authorization required. Open this URL in a browser:\n\n  {}\n",
            redirect.url
        );
        println!("Then run again with --callback-url '<the URL you were redirected to>'.");
        return Ok(());
    }

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &FetchOutcome) {
    for notification in &outcome.notifications {
        let prefix = match notification.level {
            NotificationLevel::Info => "note",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        eprintln!("{prefix}: {}", notification.message);
    }

    println!("Source: {}", outcome.actual_source.display_name());
    let board = TriageBoard::from_records(outcome.records.iter().cloned());
    for level in PriorityLevel::ALL {
        let column = board.column(level);
        println!("\n{} ({})", level.label(), column.len());
        for record in column {
            println!("  {}", format_row(record));
        }
    }
}

/// Imputed labs print as `?` so a missing reading is never mistaken for a result.
fn format_lab(record: &PatientRecord, lab: LabKind, value: f64) -> String {
    if record.imputed_labs().contains(&lab) {
        "?".to_string()
    } else {
        format!("{value:.1}")
    }
}

fn format_row(record: &PatientRecord) -> String {
    let factors: Vec<&str> = record.factors().iter().map(|tag| tag.label()).collect();
    format!(
        "{:<22} {:<16} {:<10} Hb {:>4}  K {:>3}  {}",
        record.display_name(),
        record.external_patient_id(),
        record.date_of_birth_display().unwrap_or_default(),
        format_lab(record, LabKind::Hemoglobin, record.hemoglobin()),
        format_lab(record, LabKind::Potassium, record.potassium()),
        factors.join(", ")
    )
}
