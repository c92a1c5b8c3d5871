//! remote-spool CLI
//!
//! Entry point for the `remote-spool` command-line tool.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_spool::config::{user_config_path, EffectiveConfig};
use remote_spool::job::{load_description, load_item_data, validate_item_data};
use remote_spool::poll::{CompletionPoller, PollOutcome};
use remote_spool::schedd::{build_transport, connect, ScheddClient};
use remote_spool::spool::{run_cycle, InputBundler, RetrievalClient, SubmissionClient};
use remote_spool::summary::{ExitCode, RunOutcome, RunSummary};
use remote_spool::token::{
    await_token, default_token_name, request_token, write_token, DEFAULT_AUTHORIZATIONS,
};
use remote_spool::{CancelToken, ClusterId, ItemData, JobDescription, SpoolConfig, SpoolError};

#[derive(Parser)]
#[command(name = "remote-spool")]
#[command(about = "Submit jobs to a remote queue, spool their inputs and retrieve their outputs", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file layered over ~/.config/remote-spool/config.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Pool directory to locate the queue in
    #[arg(long, global = true)]
    pool: Option<String>,

    /// Queue name (default: the pool's default queue)
    #[arg(long, global = true)]
    schedd: Option<String>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args)]
struct SubmitArgs {
    /// Submit description (.json or .toml)
    description: PathBuf,

    /// Item data, one instance per row (.json or .toml)
    #[arg(long)]
    items: Option<PathBuf>,

    /// Number of instances (default: number of item rows, or 1)
    #[arg(long)]
    count: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue jobs on hold and spool their inputs
    Submit(SubmitArgs),

    /// Wait until every job of a cluster has completed
    Wait {
        cluster: i64,
    },

    /// Fetch the outputs of a completed cluster
    Retrieve {
        cluster: i64,

        /// Remove the records once their outputs are retrieved
        #[arg(long)]
        remove: bool,
    },

    /// Submit, wait and retrieve
    Run {
        #[command(flatten)]
        submit: SubmitArgs,

        /// Remove the records once their outputs are retrieved
        #[arg(long)]
        remove: bool,
    },

    /// Request a submit token and store it in the token directory
    Token {
        /// Identity to request the token for (default: $USER@fs)
        #[arg(long)]
        identity: Option<String>,

        /// Authorizations to request
        #[arg(long, num_args = 1.., default_values = DEFAULT_AUTHORIZATIONS)]
        authz: Vec<String>,

        /// Token file name (default: remote-submit-for-<schedd>)
        #[arg(long)]
        name: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Submit(_) => "submit",
            Commands::Wait { .. } => "wait",
            Commands::Retrieve { .. } => "retrieve",
            Commands::Run { .. } => "run",
            Commands::Token { .. } => "token",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let started = Instant::now();
    let command = cli.command.name();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let summary = RunSummary::from_error(command, None, &e, elapsed_ms(started));
            finish(&summary, cli.global.json);
        }
    };
    init_tracing(config.debug);

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_handler() {
        warn!(error = %e, "cannot install interrupt handler");
    }

    let summary = match execute(&cli.command, &config, cancel, started) {
        Ok(summary) => summary,
        Err(e) => RunSummary::from_error(command, None, &e, elapsed_ms(started)),
    };
    finish(&summary, cli.global.json);
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "remote_spool=debug"
    } else {
        "remote_spool=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn load_config(cli: &Cli) -> Result<SpoolConfig, SpoolError> {
    let mut overrides = serde_json::Map::new();
    if let Some(ref pool) = cli.global.pool {
        overrides.insert("pool".to_string(), json!(pool));
    }
    if let Some(ref schedd) = cli.global.schedd {
        overrides.insert("schedd".to_string(), json!(schedd));
    }
    if cli.global.debug {
        overrides.insert("debug".to_string(), json!(true));
    }
    match cli.command {
        Commands::Retrieve { remove: true, .. } | Commands::Run { remove: true, .. } => {
            overrides.insert("remove_after_retrieve".to_string(), json!(true));
        }
        _ => {}
    }

    let user_path = home_dir().map(|home| user_config_path(&home));
    let effective = EffectiveConfig::build(
        user_path.as_deref(),
        cli.global.config.as_deref(),
        Some(serde_json::Value::Object(overrides)),
    )?;
    Ok(effective.into_settings())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn finish(summary: &RunSummary, json: bool) -> ! {
    if json {
        match summary.to_json() {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error serializing summary: {}", e),
        }
    } else {
        println!("{}", summary.human_summary);
        for instance in summary.instances.iter().filter(|i| !i.is_success()) {
            println!(
                "  {}: {}",
                instance.job_id,
                instance.message.as_deref().unwrap_or("failed")
            );
        }
    }
    process::exit(summary.exit_code);
}

/// Description, item data and instance count from the submit arguments
fn load_submission(args: &SubmitArgs) -> Result<(JobDescription, ItemData, usize), SpoolError> {
    let description = load_description(&args.description)?;
    let item_data = match args.items {
        Some(ref path) => load_item_data(path)?,
        None => Vec::new(),
    };
    let count = args.count.unwrap_or(if item_data.is_empty() { 1 } else { item_data.len() });
    validate_item_data(count, &item_data)?;
    Ok((description, item_data, count))
}

fn client(config: &SpoolConfig, cancel: CancelToken) -> Result<ScheddClient, SpoolError> {
    let transport = build_transport(config).map_err(|e| SpoolError::Config(e.to_string()))?;
    connect(transport, config, cancel)
}

fn execute(
    command: &Commands,
    config: &SpoolConfig,
    cancel: CancelToken,
    started: Instant,
) -> Result<RunSummary, SpoolError> {
    match command {
        Commands::Submit(args) => {
            let (description, item_data, count) = load_submission(args)?;
            let client = client(config, cancel)?;
            let submitter = SubmissionClient::new(
                &client,
                InputBundler::new(&config.input_dir),
                config.retention(),
            );
            let report = submitter.submit(&description, count, &item_data)?;
            Ok(report.summary("submit", elapsed_ms(started)))
        }
        Commands::Wait { cluster } => {
            let client = client(config, cancel)?;
            let cluster = ClusterId(*cluster);
            let mut poller = CompletionPoller::from_timings(&client, &config.timings());
            let summary = match poller.await_completion(&cluster.constraint())? {
                PollOutcome::Completed(records) => RunSummary::success(
                    "wait",
                    Some(cluster),
                    &format!("{} jobs completed", records.len()),
                    elapsed_ms(started),
                ),
                PollOutcome::Vanished => {
                    let mut summary = RunSummary::success("wait", Some(cluster), "", elapsed_ms(started))
                        .with_outcome(RunOutcome::Failed, ExitCode::Transfer);
                    summary.human_summary = format!("no jobs of cluster {} left in the queue", cluster);
                    summary
                }
            };
            Ok(summary)
        }
        Commands::Retrieve { cluster, .. } => {
            let client = client(config, cancel)?;
            let cluster = ClusterId(*cluster);
            let retriever = RetrievalClient::new(
                &client,
                &config.output_dir,
                config.retrieved_marker.clone(),
                config.retrieve_policy(),
            );
            let report = retriever.retrieve(&cluster.constraint(), config.remove_after_retrieve)?;
            Ok(report.summary("retrieve", Some(cluster), elapsed_ms(started)))
        }
        Commands::Run { submit, .. } => {
            let (description, item_data, count) = load_submission(submit)?;
            let client = client(config, cancel)?;
            let report = run_cycle(&client, config, &description, count, &item_data)?;
            Ok(report.summary(elapsed_ms(started)))
        }
        Commands::Token {
            identity,
            authz,
            name,
        } => {
            let identity = match identity {
                Some(identity) => identity.clone(),
                None => default_identity()?,
            };
            let client = client(config, cancel)?;
            let schedd = client.address().name.clone();

            let request_id = request_token(
                &client,
                &identity,
                authz,
                config.token_request_attempts,
                config.retry_policy(),
            )?;
            eprintln!("Your token request id is: {}", request_id);
            eprintln!("To approve it, log in to the submit host and run:");
            eprintln!(
                "  condor_token_request_approve -name {} -type SCHEDD -reqid {}",
                schedd, request_id
            );

            let token = await_token(
                &client,
                &request_id,
                Duration::from_secs(config.poll_interval_seconds),
                config.deadline_seconds.map(Duration::from_secs),
            )?;
            let name = name.clone().unwrap_or_else(|| default_token_name(&schedd));
            let path = write_token(&token_dir(config), &name, &token)?;
            Ok(RunSummary::success(
                "token",
                None,
                &format!("token saved to {}", path.display()),
                elapsed_ms(started),
            ))
        }
    }
}

fn default_identity() -> Result<String, SpoolError> {
    std::env::var("USER")
        .map(|user| format!("{}@fs", user))
        .map_err(|_| SpoolError::Config("--identity is required when $USER is not set".to_string()))
}

fn token_dir(config: &SpoolConfig) -> PathBuf {
    config.token_dir_path(home_dir().as_deref())
}
