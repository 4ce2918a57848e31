use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use fcb_booking::{
    Issuance, IssuanceWorker, IssuerSettings, LogMailer, Mailer, MatchWindow, ResendMailer, TicketIssuer,
    TicketRenderer,
};
use fcb_config::Config;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

mod server;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("FCB_GIT_HASH");

fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Parser)]
#[command(name = "fcb")]
#[command(about = "FC Bažantnice match booking and ticketing")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("FCB_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (default: from config, else info)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Database URL (default: from config, else sqlite:fcb.db)
    #[arg(long, global = true)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the ticket issuance worker
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Add a match
    AddMatch {
        /// Title (e.g. "FCB vs Sokol")
        #[arg(long)]
        title: String,
        /// Date, YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Kickoff, HH:MM
        #[arg(long)]
        time: String,
        /// Capacity override for one class, CLASS=SEATS (repeatable)
        #[arg(long = "capacity")]
        capacities: Vec<String>,
    },
    /// List matches with seats taken per class
    ListMatches {
        /// Only matches from today on
        #[arg(long)]
        upcoming: bool,
    },
    /// List reservations
    ListReservations {
        /// Only reservations for this match
        #[arg(long = "match")]
        match_id: Option<i64>,
    },
    /// Cancel a pending reservation
    CancelReservation {
        id: i64,
    },
    /// Issue the ticket for a paid reservation now
    IssueTicket {
        id: i64,
    },
    /// Process due ticket issuance jobs once and exit
    RunWorker,
}

// --- Logging ---

fn init_logging(level: &str, utc: bool) {
    let filter = EnvFilter::new(level);

    if utc {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(OffsetTime::new(
                time::UtcOffset::UTC,
                time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
                ),
            ))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Wiring ---

fn build_issuer(config: &Config, pool: &SqlitePool, http: &reqwest::Client) -> Arc<TicketIssuer> {
    let mailer: Arc<dyn Mailer> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(http.clone(), key.clone(), config.mail_from.clone())),
        None => {
            warn!("RESEND_API_KEY is not set; tickets will be logged, not emailed");
            Arc::new(LogMailer)
        }
    };
    let renderer = TicketRenderer::new(config.base_url.clone(), config.classes.clone());
    let settings = IssuerSettings {
        validity_months: config.ticket_validity_months,
        lease: chrono::Duration::seconds(config.issuance_lease_secs as i64),
        admin_email: config.admin_email.clone(),
    };
    Arc::new(TicketIssuer::new(pool.clone(), mailer, renderer, settings))
}

/// Outbound calls must finish well inside the issuance lease, or a stalled
/// delivery could overlap with the issuer that takes its claim over.
fn http_timeout(lease_secs: u64) -> Duration {
    Duration::from_secs((lease_secs / 4).clamp(1, 30))
}

fn parse_capacity(spec: &str) -> anyhow::Result<(String, u32)> {
    let (class, seats) = spec
        .rsplit_once('=')
        .ok_or_else(|| anyhow::anyhow!("capacity must look like CLASS=SEATS, got '{spec}'"))?;
    Ok((class.trim().to_string(), seats.trim().parse()?))
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(level) = &cli.log_level { config.log_level = level.to_string(); }
    if cli.utc { config.utc = true; }
    if let Some(url) = &cli.db_url { config.db_url = url.clone(); }
    if let Commands::Serve { port: Some(port) } = &cli.command { config.port = *port; }

    init_logging(&config.log_level, config.utc);

    let pool = fcb_db::connect(&config.db_url).await?;
    fcb_db::migrate(&pool).await?;
    let http = reqwest::Client::builder()
        .timeout(http_timeout(config.issuance_lease_secs))
        .build()?;

    match cli.command {
        Commands::Serve { .. } => {
            let issuer = build_issuer(&config, &pool, &http);
            server::run_server(Arc::new(config), pool, issuer, http).await?;
        }
        Commands::AddMatch { title, date, time, capacities } => {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid date '{date}': {e}"))?;
            NaiveTime::parse_from_str(&time, "%H:%M")
                .map_err(|e| anyhow::anyhow!("invalid time '{time}': {e}"))?;
            let capacities = capacities
                .iter()
                .map(|c| parse_capacity(c))
                .collect::<anyhow::Result<Vec<_>>>()?;
            for (class, _) in &capacities {
                if config.class(class).is_none() {
                    anyhow::bail!("unknown class '{class}'");
                }
            }
            let game = fcb_db::create_match(&pool, &title, &date, &time, &capacities).await?;
            println!("Added match {} – {} {} (id={})", game.title, game.date, game.time, game.id);
        }
        Commands::ListMatches { upcoming } => {
            let window = MatchWindow { upcoming, days: None };
            let matches = fcb_booking::list_matches_with_occupancy(&pool, &config.classes, window).await?;
            if matches.is_empty() {
                println!("No matches found.");
            } else {
                println!("{:<6} {:<12} {:<6} {:<30} {}", "ID", "Date", "Time", "Title", "Seats (taken/capacity)");
                println!("{}", "-".repeat(100));
                for m in &matches {
                    let seats: Vec<String> = m
                        .classes
                        .iter()
                        .map(|c| match c.capacity {
                            Some(cap) => format!("{}: {}/{}", c.class, c.occupied, cap),
                            None => format!("{}: {}", c.class, c.occupied),
                        })
                        .collect();
                    println!(
                        "{:<6} {:<12} {:<6} {:<30} {}",
                        m.fixture.id,
                        m.fixture.date,
                        m.fixture.time,
                        m.fixture.title,
                        seats.join(", "),
                    );
                }
                println!("\n{} match(es) total", matches.len());
            }
        }
        Commands::ListReservations { match_id } => {
            let reservations = fcb_db::list_reservations(&pool, match_id).await?;
            if reservations.is_empty() {
                println!("No reservations found.");
            } else {
                println!(
                    "{:<6} {:<6} {:<12} {:<10} {:<25} {:<30} {}",
                    "ID", "Match", "Class", "Status", "Name", "Email", "Created"
                );
                println!("{}", "-".repeat(120));
                for r in &reservations {
                    println!(
                        "{:<6} {:<6} {:<12} {:<10} {:<25} {:<30} {}",
                        r.id, r.match_id, r.class, r.status, r.name, r.email, r.created_at
                    );
                }
                println!("\n{} reservation(s) total", reservations.len());
            }
        }
        Commands::CancelReservation { id } => {
            if fcb_db::cancel_reservation(&pool, id).await? {
                info!(reservation_id = id, "Reservation cancelled");
                println!("Reservation {id} cancelled");
            } else {
                match fcb_db::get_reservation(&pool, id).await? {
                    Some(r) => anyhow::bail!("reservation {id} is {} and cannot be cancelled", r.status),
                    None => anyhow::bail!("reservation {id} not found"),
                }
            }
        }
        Commands::IssueTicket { id } => {
            let issuer = build_issuer(&config, &pool, &http);
            match issuer.issue_ticket(id).await? {
                Issuance::Issued { valid_until, .. } => {
                    println!("Ticket for reservation {id} delivered, valid until {valid_until}");
                }
                Issuance::AlreadyIssued => println!("Reservation {id} already has a ticket"),
                Issuance::InProgress => println!("Reservation {id} is being issued by another process"),
                Issuance::NotEligible => println!("Reservation {id} is missing or not paid"),
            }
        }
        Commands::RunWorker => {
            let issuer = build_issuer(&config, &pool, &http);
            let worker = IssuanceWorker::new(
                pool.clone(),
                issuer,
                Arc::new(Notify::new()),
                Duration::from_secs(config.worker_poll_secs),
                config.worker_max_attempts,
            );
            let report = worker.run_once().await?;
            println!(
                "{} issued, {} skipped, {} deferred, {} failed",
                report.issued, report.skipped, report.deferred, report.failed
            );
        }
    }

    Ok(())
}
