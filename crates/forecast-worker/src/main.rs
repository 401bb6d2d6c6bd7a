use std::path::PathBuf;
use std::time::Duration;

use facet::Facet;
use figue as args;
use forecast_engine::db::init_sqlite;
use forecast_engine::{Db, queue};
use forecast_types::{JOB_KIND_RECOMPUTE_CASE, JOB_KIND_RECOMPUTE_CORPUS, SingleCasePayload};
use tracing::{error, info};

mod rate;
mod worker;

use worker::WorkerConfig;

#[derive(Facet, Debug)]
struct ServeCli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
}

#[derive(Facet, Debug)]
struct ClientCli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: ClientCommand,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum ClientCommand {
    EnqueueCase {
        #[facet(args::named)]
        case_id: i64,
    },
    EnqueueCorpus,
    Status {
        #[facet(args::named)]
        job_id: i64,
    },
}

const QUEUE_DB_ENV: &str = "FORECAST_QUEUE_DB";
const STORE_DB_ENV: &str = "FORECAST_DB";
const CONCURRENCY_ENV: &str = "FORECAST_WORKER_CONCURRENCY";
const RATE_MAX_ENV: &str = "FORECAST_WORKER_RATE_MAX";
const RATE_WINDOW_ENV: &str = "FORECAST_WORKER_RATE_WINDOW_SECS";
const POLL_MS_ENV: &str = "FORECAST_WORKER_POLL_MS";

const DEFAULT_CONCURRENCY: usize = 2;
const DEFAULT_RATE_MAX: usize = 50;
const DEFAULT_RATE_WINDOW_SECS: u64 = 10;
const DEFAULT_POLL_MS: u64 = 250;

fn main() {
    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    if cli_args
        .first()
        .map(String::as_str)
        .is_some_and(is_client_command)
    {
        if let Err(err) = run_client() {
            eprintln!("{err}");
            std::process::exit(1);
        }
        return;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async {
            if let Err(err) = run_server().await {
                eprintln!("{err}");
                std::process::exit(1);
            }
        });
}

fn is_client_command(value: &str) -> bool {
    matches!(value, "enqueue-case" | "enqueue-corpus" | "status")
}

async fn run_server() -> Result<(), String> {
    let _cli = parse_serve_cli()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let queue_db = required_queue_db()?;
    let store_path = std::env::var(STORE_DB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| queue_db.path().to_path_buf());
    let store = Db::new(store_path);

    let config = WorkerConfig {
        concurrency: env_parse(CONCURRENCY_ENV, DEFAULT_CONCURRENCY)?,
        rate_max_starts: env_parse(RATE_MAX_ENV, DEFAULT_RATE_MAX)?,
        rate_window: Duration::from_secs(env_parse(RATE_WINDOW_ENV, DEFAULT_RATE_WINDOW_SECS)?),
        poll_interval: Duration::from_millis(env_parse(POLL_MS_ENV, DEFAULT_POLL_MS)?),
    };

    init_sqlite(&queue_db)
        .map_err(|e| format!("failed to init queue db at {:?}: {e}", queue_db.path()))?;
    if store.path() != queue_db.path() {
        init_sqlite(&store).map_err(|e| format!("failed to init store at {:?}: {e}", store.path()))?;
    }

    info!(
        queue_db = %queue_db.path().display(),
        store_db = %store.path().display(),
        concurrency = config.concurrency,
        rate_max_starts = config.rate_max_starts,
        rate_window_secs = config.rate_window.as_secs(),
        "forecast worker ready"
    );

    worker::run_worker(store, queue_db, config).await
}

fn required_queue_db() -> Result<Db, String> {
    match std::env::var(QUEUE_DB_ENV) {
        Ok(path) if !path.is_empty() => Ok(Db::new(PathBuf::from(path))),
        _ => {
            // Starting without a queue would silently drop every enqueue.
            error!("{QUEUE_DB_ENV} is not set; refusing to start");
            Err(format!(
                "{QUEUE_DB_ENV} must point at the queue database; refusing to start without it"
            ))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn run_client() -> Result<(), String> {
    let cli = parse_client_cli()?;
    let queue_db = match std::env::var(QUEUE_DB_ENV) {
        Ok(path) if !path.is_empty() => Db::new(PathBuf::from(path)),
        _ => return Err(format!("{QUEUE_DB_ENV} must point at the queue database")),
    };
    init_sqlite(&queue_db)
        .map_err(|e| format!("failed to init queue db at {:?}: {e}", queue_db.path()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    runtime.block_on(async {
        match cli.command {
            ClientCommand::EnqueueCase { case_id } => {
                let payload = serde_json::to_string(&SingleCasePayload {
                    repository_case_id: case_id,
                })
                .map_err(|e| format!("encode payload: {e}"))?;
                let job_id = queue::enqueue(&queue_db, JOB_KIND_RECOMPUTE_CASE, &payload).await?;
                println!("enqueued {JOB_KIND_RECOMPUTE_CASE} job {job_id} for case {case_id}");
            }
            ClientCommand::EnqueueCorpus => {
                let job_id = queue::enqueue(&queue_db, JOB_KIND_RECOMPUTE_CORPUS, "{}").await?;
                println!("enqueued {JOB_KIND_RECOMPUTE_CORPUS} job {job_id}");
            }
            ClientCommand::Status { job_id } => match queue::job_status(&queue_db, job_id).await? {
                Some(status) => {
                    println!(
                        "job {job_id}: {} (attempts {})",
                        status.status, status.attempts
                    );
                    if let Some(error) = status.error {
                        println!("  error: {error}");
                    }
                    if let Some(report) = status.report_json {
                        println!("  report: {report}");
                    }
                }
                None => println!("job {job_id}: not found"),
            },
        }
        Ok::<(), String>(())
    })
}

fn parse_serve_cli() -> Result<ServeCli, String> {
    let figue_config = args::builder::<ServeCli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("forecast-worker")
                .description("Queue worker for forecast recomputation jobs")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}

fn parse_client_cli() -> Result<ClientCli, String> {
    let figue_config = args::builder::<ClientCli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("forecast-worker")
                .description("Enqueue and inspect forecast recomputation jobs")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}
