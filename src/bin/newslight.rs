//! Newslight CLI - Command-line interface for the interaction tracker
//!
//! Commands:
//! - replay: Play a timed focus script through the tracker and deliver its events
//! - preview: Print the payload an interaction would produce, without sending it
//! - validate: Validate tracking events (NDJSON)
//! - doctor: Diagnose tracker configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use newslight_tracker::transport::parse_endpoint;
use newslight_tracker::{
    ArticleCatalog, DeliveryPayload, DeliveryStatsSnapshot, EventKind, FocusScript,
    InteractionTracker, Session, TrackError, TrackerConfig, TrackingEvent, TrafficLightThresholds,
    PRODUCER_NAME, TRACKER_VERSION,
};

/// Newslight - Interaction tracking for the traffic-light news reader
#[derive(Parser)]
#[command(name = "newslight")]
#[command(version = TRACKER_VERSION)]
#[command(
    about = "Track reader interactions and deliver them to the experiment webhook",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a timed focus script through the tracker (real time)
    Replay {
        /// Script file path, NDJSON focus steps (use - for stdin)
        #[arg(short, long)]
        script: PathBuf,

        #[command(flatten)]
        session: SessionArgs,

        #[command(flatten)]
        delivery: DeliveryArgs,

        /// How long to wait for pending deliveries after teardown
        #[arg(long, default_value = "10000")]
        grace_ms: u64,
    },

    /// Print the payload an interaction would produce, without sending it
    Preview {
        /// Article identifier
        #[arg(short, long)]
        article: String,

        /// Interaction kind
        #[arg(long, value_enum, default_value = "click")]
        kind: PreviewKind,

        /// Interval duration for view and hover previews
        #[arg(long, default_value = "0")]
        duration_ms: u64,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Validate tracking events
    Validate {
        /// Input file path, NDJSON events (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose tracker configuration
    Doctor {
        #[command(flatten)]
        delivery: DeliveryArgs,

        /// Check a catalog file
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Session inputs shared by replay and preview
#[derive(clap::Args)]
struct SessionArgs {
    /// Launch URL or query string carrying the participant parameter
    #[arg(long, default_value = "")]
    launch: String,

    /// Article catalog (JSON array or {"articles": [...]})
    #[arg(long)]
    catalog: Option<PathBuf>,
}

/// Delivery overrides; unset values fall back to NEWSLIGHT_* environment variables
#[derive(clap::Args)]
struct DeliveryArgs {
    /// Webhook URL receiving event batches
    #[arg(long)]
    webhook_url: Option<String>,

    /// Retries after the first failed attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Base backoff delay in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,
}

impl DeliveryArgs {
    fn to_config(&self) -> Result<TrackerConfig, TrackError> {
        let mut config = TrackerConfig::from_env()?;
        if let Some(url) = &self.webhook_url {
            let url = url.trim();
            config.webhook_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(delay);
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(timeout);
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PreviewKind {
    /// Article card click
    Click,
    /// Detail-view reading interval
    View,
    /// Traffic-light hover interval
    Hover,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), NewslightCliError> {
    match cli.command {
        Commands::Replay {
            script,
            session,
            delivery,
            grace_ms,
        } => cmd_replay(&script, &session, &delivery, grace_ms).await,

        Commands::Preview {
            article,
            kind,
            duration_ms,
            session,
        } => cmd_preview(&article, kind, duration_ms, &session),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor {
            delivery,
            catalog,
            json,
        } => cmd_doctor(&delivery, catalog.as_deref(), json),
    }
}

async fn cmd_replay(
    script_path: &Path,
    session_args: &SessionArgs,
    delivery: &DeliveryArgs,
    grace_ms: u64,
) -> Result<(), NewslightCliError> {
    let script = FocusScript::parse_ndjson(&read_input(script_path)?)?;
    if script.is_empty() {
        return Err(NewslightCliError::NoSignals);
    }

    let config = delivery.to_config()?;
    let session = Session::from_launch_with_param(&session_args.launch, &config.participant_param);
    let catalog = load_catalog(session_args.catalog.as_deref(), config.thresholds)?;

    let mut tracker = InteractionTracker::from_config(&config, session, Arc::new(catalog))?;
    info!(steps = script.len(), "replaying focus script");

    let signals = tracker.play(script).await;
    let stats = tracker.shutdown(Duration::from_millis(grace_ms)).await;

    let report = ReplayReport {
        participant_id: tracker.session().participant_label().to_string(),
        delivery_enabled: config.delivery_enabled(),
        signals,
        stats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_preview(
    article: &str,
    kind: PreviewKind,
    duration_ms: u64,
    session_args: &SessionArgs,
) -> Result<(), NewslightCliError> {
    let config = TrackerConfig::from_env()?;
    let session = Session::from_launch_with_param(&session_args.launch, &config.participant_param);
    let catalog = load_catalog(session_args.catalog.as_deref(), config.thresholds)?;

    let participant = session.participant_label();
    let metadata = catalog.lookup(Some(article));
    let duration = Duration::from_millis(duration_ms);

    let event = match kind {
        PreviewKind::Click => TrackingEvent::click(participant, article, metadata.as_ref()),
        PreviewKind::View => TrackingEvent::interval(
            EventKind::ArticleView,
            participant,
            article,
            duration,
            metadata.as_ref(),
        ),
        PreviewKind::Hover => TrackingEvent::interval(
            EventKind::TrafficLightHover,
            participant,
            article,
            duration,
            metadata.as_ref(),
        ),
    };

    let payload = DeliveryPayload::single(event, participant);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), NewslightCliError> {
    let input_data = read_input(input)?;

    let mut total_events = 0;
    let mut errors = Vec::new();

    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        total_events += 1;

        let problem = match serde_json::from_str::<TrackingEvent>(trimmed) {
            Err(e) => Some((None, format!("Failed to parse event: {}", e))),
            Ok(event) => match event.validate() {
                Err(e) => Some((Some(event.article_id), e.to_string())),
                Ok(()) if event.kind().is_none() => Some((
                    Some(event.article_id),
                    format!("unknown eventType '{}'", event.event_type),
                )),
                Ok(()) => None,
            },
        };

        if let Some((article_id, error)) = problem {
            errors.push(ValidationErrorDetail {
                line: index + 1,
                article_id,
                error,
            });
        }
    }

    let report = ValidationReport {
        total_events,
        valid_events: total_events - errors.len(),
        invalid_events: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Article {} (line {}): {}",
                    err.article_id.as_deref().unwrap_or("unknown"),
                    err.line,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(NewslightCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    delivery: &DeliveryArgs,
    catalog: Option<&Path>,
    json: bool,
) -> Result<(), NewslightCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "tracker_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Tracker version {}", TRACKER_VERSION),
    });

    match delivery.to_config() {
        Ok(config) => {
            let endpoint_check = match config.webhook_url.as_deref() {
                None => DoctorCheck {
                    name: "webhook".to_string(),
                    status: CheckStatus::Warning,
                    message: "No webhook configured; events will be discarded".to_string(),
                },
                Some(url) => match parse_endpoint(url) {
                    Ok(endpoint) => DoctorCheck {
                        name: "webhook".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Delivering to {}",
                            endpoint.host_str().unwrap_or("unknown host")
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "webhook".to_string(),
                        status: CheckStatus::Error,
                        message: e.to_string(),
                    },
                },
            };
            checks.push(endpoint_check);

            let policy = config.retry_policy();
            let schedule: Vec<String> = policy
                .schedule()
                .iter()
                .map(|d| format!("{}ms", d.as_millis()))
                .collect();
            checks.push(DoctorCheck {
                name: "retry_policy".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} attempts max, backoff [{}]",
                    policy.max_attempts(),
                    schedule.join(", ")
                ),
            });

            checks.push(DoctorCheck {
                name: "participant_param".to_string(),
                status: CheckStatus::Ok,
                message: format!("Participant read from '?{}='", config.participant_param),
            });

            if let Some(catalog_path) = catalog {
                let catalog_check = match fs::read_to_string(catalog_path) {
                    Ok(content) => {
                        match ArticleCatalog::from_json_with_thresholds(&content, config.thresholds)
                        {
                            Ok(parsed) => DoctorCheck {
                                name: "catalog".to_string(),
                                status: if parsed.is_empty() {
                                    CheckStatus::Warning
                                } else {
                                    CheckStatus::Ok
                                },
                                message: format!("Catalog valid ({} articles)", parsed.len()),
                            },
                            Err(e) => DoctorCheck {
                                name: "catalog".to_string(),
                                status: CheckStatus::Error,
                                message: e.to_string(),
                            },
                        }
                    }
                    Err(e) => DoctorCheck {
                        name: "catalog".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Cannot read catalog file: {}", e),
                    },
                };
                checks.push(catalog_check);
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    // Replay reads scripts from stdin when given '-'
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (script replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TRACKER_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Newslight Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NewslightCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<String, NewslightCliError> {
    if path.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            info!("reading from terminal, finish input with Ctrl-D");
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_catalog(
    path: Option<&Path>,
    thresholds: TrafficLightThresholds,
) -> Result<ArticleCatalog, NewslightCliError> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Ok(ArticleCatalog::from_json_with_thresholds(&content, thresholds)?)
        }
        None => Ok(ArticleCatalog::with_thresholds(Vec::new(), thresholds)),
    }
}

// Error types

#[derive(Debug)]
enum NewslightCliError {
    Io(io::Error),
    Track(TrackError),
    Json(serde_json::Error),
    NoSignals,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for NewslightCliError {
    fn from(e: io::Error) -> Self {
        NewslightCliError::Io(e)
    }
}

impl From<TrackError> for NewslightCliError {
    fn from(e: TrackError) -> Self {
        NewslightCliError::Track(e)
    }
}

impl From<serde_json::Error> for NewslightCliError {
    fn from(e: serde_json::Error) -> Self {
        NewslightCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NewslightCliError> for CliError {
    fn from(e: NewslightCliError) -> Self {
        match e {
            NewslightCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NewslightCliError::Track(e) => {
                let hint = match &e {
                    TrackError::Config(_) | TrackError::InvalidEndpoint(_) => {
                        "Run 'newslight doctor' to inspect the configuration"
                    }
                    _ => "Check input format",
                };
                CliError {
                    code: "TRACK_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NewslightCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NewslightCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No focus signals found in script".to_string(),
                hint: Some("Ensure the script file is not empty".to_string()),
            },
            NewslightCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            NewslightCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ReplayReport {
    participant_id: String,
    delivery_enabled: bool,
    signals: usize,
    stats: DeliveryStatsSnapshot,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
    article_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
